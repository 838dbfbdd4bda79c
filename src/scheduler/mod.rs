pub mod adjuster;
pub mod goals;
pub mod plan_generator;
pub mod recommend;
pub mod service;
pub mod signals;

pub use service::SchedulerService;
