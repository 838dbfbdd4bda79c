pub mod daily_plans;
pub mod documents;
pub mod flashcards;
pub mod goals;
pub mod profiles;
pub mod quiz_attempts;
pub mod recommendations;
pub mod recompute;
pub mod schedules;
