pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod policy;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod validation;
pub mod workers;
