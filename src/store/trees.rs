pub const META: &str = "meta";

pub const PROFILES: &str = "learning_profiles";
pub const GOALS: &str = "learning_goals";
pub const SCHEDULES: &str = "study_schedules";
pub const ACTIVE_SCHEDULES: &str = "active_schedules";
pub const DAILY_PLANS: &str = "daily_study_plans";
pub const RECOMMENDATIONS: &str = "recommendations";

// Read-only replicas fed by collaborating services
pub const FLASHCARDS: &str = "flashcards";
pub const FLASHCARD_DUE_INDEX: &str = "flashcard_due_index";
pub const QUIZ_ATTEMPTS: &str = "quiz_attempts";
pub const DOCUMENTS: &str = "documents";
