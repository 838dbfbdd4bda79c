use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FlashcardReview,
    Quiz,
    Reading,
    FreePractice,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FlashcardReview => "flashcard_review",
            Self::Quiz => "quiz",
            Self::Reading => "reading",
            Self::FreePractice => "free_practice",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedTask {
    pub task_type: TaskType,
    pub title: String,
    #[serde(default)]
    pub target_ids: Vec<String>,
    pub estimated_minutes: u32,
    pub priority: TaskPriority,
    pub reason: String,
    pub topic: Option<String>,
    #[serde(default)]
    pub completed: bool,
    pub actual_minutes: Option<u32>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
    PartiallyCompleted,
    Skipped,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PlanPriority {
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PlanDifficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStudyPlan {
    pub id: String,
    pub user_id: String,
    pub plan_date: NaiveDate,
    pub schedule_id: Option<String>,
    pub recommended_tasks: Vec<RecommendedTask>,
    pub total_estimated_minutes: u32,
    pub priority: PlanPriority,
    pub difficulty: PlanDifficulty,
    pub summary: String,
    pub status: PlanStatus,
    pub completed_tasks_count: u32,
    pub total_tasks_count: u32,
    pub completion_percentage: f64,
    #[serde(default)]
    pub actual_minutes_spent: u32,
    /// Mean accuracy (0-100) of the tasks that reported one.
    pub accuracy: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DailyStudyPlan {
    fn transition_error(&self, to: PlanStatus) -> SchedulerError {
        SchedulerError::InvalidTransition {
            entity: "daily_plan",
            from: self.status.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        if self.status != PlanStatus::Pending {
            return Err(self.transition_error(PlanStatus::InProgress));
        }
        self.status = PlanStatus::InProgress;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn complete_task(
        &mut self,
        index: usize,
        minutes_spent: u32,
        accuracy: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        if !self.status.is_open() {
            return Err(self.transition_error(PlanStatus::Completed));
        }
        if let Some(acc) = accuracy {
            if !(0.0..=100.0).contains(&acc) {
                return Err(SchedulerError::validation("accuracy must be within [0, 100]"));
            }
        }
        let total = self.recommended_tasks.len();
        let Some(task) = self.recommended_tasks.get_mut(index) else {
            return Err(SchedulerError::validation(format!(
                "task index {index} out of range (plan has {total} tasks)"
            )));
        };
        if task.completed {
            return Err(SchedulerError::Conflict(format!(
                "task {index} already completed"
            )));
        }

        task.completed = true;
        task.actual_minutes = Some(minutes_spent);
        task.accuracy = accuracy;

        if self.status == PlanStatus::Pending {
            self.started_at = Some(now);
        }
        self.actual_minutes_spent = self.actual_minutes_spent.saturating_add(minutes_spent);
        self.recount(now);
        Ok(())
    }

    pub fn skip(&mut self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        if !self.status.is_open() {
            return Err(self.transition_error(PlanStatus::Skipped));
        }
        self.status = if self.completed_tasks_count > 0 {
            PlanStatus::PartiallyCompleted
        } else {
            PlanStatus::Skipped
        };
        self.updated_at = now;
        Ok(())
    }

    /// End-of-day close: untouched plans become skipped, started ones partial.
    /// Returns `false` when the plan was already closed.
    pub fn close(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.is_open() {
            return false;
        }
        self.status = if self.status == PlanStatus::InProgress || self.completed_tasks_count > 0 {
            PlanStatus::PartiallyCompleted
        } else {
            PlanStatus::Skipped
        };
        self.updated_at = now;
        true
    }

    fn recount(&mut self, now: DateTime<Utc>) {
        let completed = self
            .recommended_tasks
            .iter()
            .filter(|t| t.completed)
            .count() as u32;
        self.total_tasks_count = self.recommended_tasks.len() as u32;
        self.completed_tasks_count = completed.min(self.total_tasks_count);
        self.completion_percentage = if self.total_tasks_count == 0 {
            0.0
        } else {
            (self.completed_tasks_count as f64 / self.total_tasks_count as f64 * 100.0)
                .clamp(0.0, 100.0)
        };

        let accuracies: Vec<f64> = self
            .recommended_tasks
            .iter()
            .filter_map(|t| t.accuracy)
            .collect();
        self.accuracy = if accuracies.is_empty() {
            None
        } else {
            Some(accuracies.iter().sum::<f64>() / accuracies.len() as f64)
        };

        if self.completed_tasks_count == self.total_tasks_count {
            self.status = PlanStatus::Completed;
            self.completed_at = Some(now);
        } else {
            self.status = PlanStatus::InProgress;
        }
        self.updated_at = now;
    }
}

impl Store {
    /// Insert a plan; a second plan for the same `(user, date)` is a conflict.
    pub fn create_daily_plan(&self, plan: &DailyStudyPlan) -> Result<(), StoreError> {
        let key = keys::daily_plan_key(&plan.user_id, plan.plan_date)?;
        let swapped = self.daily_plans.compare_and_swap(
            key.as_bytes(),
            None as Option<&[u8]>,
            Some(Self::serialize(plan)?),
        )?;
        if swapped.is_err() {
            return Err(StoreError::Conflict {
                entity: "daily_plan".to_string(),
                key,
            });
        }
        Ok(())
    }

    pub fn put_daily_plan(&self, plan: &DailyStudyPlan) -> Result<(), StoreError> {
        let key = keys::daily_plan_key(&plan.user_id, plan.plan_date)?;
        self.daily_plans
            .insert(key.as_bytes(), Self::serialize(plan)?)?;
        Ok(())
    }

    pub fn get_daily_plan(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStudyPlan>, StoreError> {
        let key = keys::daily_plan_key(user_id, date)?;
        match self.daily_plans.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn delete_daily_plan(&self, user_id: &str, date: NaiveDate) -> Result<bool, StoreError> {
        let key = keys::daily_plan_key(user_id, date)?;
        Ok(self.daily_plans.remove(key.as_bytes())?.is_some())
    }

    /// Plans dated within `[from, to]`, ascending by date.
    pub fn list_daily_plans(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyStudyPlan>, StoreError> {
        let start = keys::daily_plan_key(user_id, from)?;
        let end = keys::daily_plan_key(user_id, to)?;
        let mut plans = Vec::new();
        for item in self.daily_plans.range(start.as_bytes()..=end.as_bytes()) {
            let (_, value) = item?;
            plans.push(Self::deserialize::<DailyStudyPlan>(&value)?);
        }
        Ok(plans)
    }

    /// All of a user's plans, ascending by date.
    pub fn list_user_plans(&self, user_id: &str) -> Result<Vec<DailyStudyPlan>, StoreError> {
        let prefix = keys::user_prefix(user_id)?;
        let mut plans = Vec::new();
        for item in self.daily_plans.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            plans.push(Self::deserialize::<DailyStudyPlan>(&value)?);
        }
        Ok(plans)
    }

    /// Every still-open plan dated strictly before `date`, across all users.
    pub fn list_open_plans_before(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<DailyStudyPlan>, StoreError> {
        let mut plans = Vec::new();
        for item in self.daily_plans.iter() {
            let (_, value) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    tracing::warn!(error = %e, "Error scanning daily plans");
                    continue;
                }
            };
            let plan: DailyStudyPlan = match Self::deserialize(&value) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable daily plan");
                    continue;
                }
            };
            if plan.plan_date < date && plan.status.is_open() {
                plans.push(plan);
            }
        }
        Ok(plans)
    }
}
