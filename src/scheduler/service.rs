use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::constants::{DEFAULT_MAX_DAILY_LOAD, DEFAULT_MIN_DAILY_LOAD};
use crate::error::SchedulerError;
use crate::policy::SchedulerPolicy;
use crate::scheduler::adjuster::{self, AdjustmentOutcome};
use crate::scheduler::goals::{self, GoalProgressReport, GoalUpdate, NewGoal};
use crate::scheduler::plan_generator::{self, PlanInputs};
use crate::scheduler::recommend;
use crate::scheduler::signals;
use crate::store::operations::daily_plans::{DailyStudyPlan, PlanStatus};
use crate::store::operations::goals::{GoalStatus, LearningGoal};
use crate::store::operations::profiles::LearningProfile;
use crate::store::operations::recommendations::{Recommendation, RecommendationAction};
use crate::store::operations::schedules::{
    AdaptationMode, CatchUpStrategy, ScheduleConfig, ScheduleStats, ScheduleType, StudySchedule,
};
use crate::store::{Store, StoreError};
use crate::validation;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSchedule {
    pub name: String,
    #[serde(default = "default_schedule_type")]
    pub schedule_type: ScheduleType,
    pub schedule_config: ScheduleConfig,
    #[serde(default = "default_adaptation_mode")]
    pub adaptation_mode: AdaptationMode,
    pub min_daily_load: Option<u32>,
    pub max_daily_load: Option<u32>,
    #[serde(default = "default_catch_up")]
    pub catch_up_strategy: CatchUpStrategy,
    #[serde(default)]
    pub activate: bool,
}

fn default_schedule_type() -> ScheduleType {
    ScheduleType::Daily
}

fn default_adaptation_mode() -> AdaptationMode {
    AdaptationMode::Moderate
}

fn default_catch_up() -> CatchUpStrategy {
    CatchUpStrategy::Gradual
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub schedule_type: Option<ScheduleType>,
    pub schedule_config: Option<ScheduleConfig>,
    pub adaptation_mode: Option<AdaptationMode>,
    pub min_daily_load: Option<u32>,
    pub max_daily_load: Option<u32>,
    pub catch_up_strategy: Option<CatchUpStrategy>,
}

/// Closed plans of one schedule folded into adherence stats.
pub fn schedule_stats(plans: &[DailyStudyPlan]) -> ScheduleStats {
    let closed: Vec<&DailyStudyPlan> = plans.iter().filter(|p| !p.status.is_open()).collect();
    let count = |status: PlanStatus| closed.iter().filter(|p| p.status == status).count() as u32;
    let total = closed.len() as u32;
    let completed = count(PlanStatus::Completed);
    ScheduleStats {
        total_days_scheduled: total,
        days_completed: completed,
        days_missed: count(PlanStatus::Skipped),
        days_partial: count(PlanStatus::PartiallyCompleted),
        avg_adherence_rate: if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        },
    }
}

/// Plans of the adjuster's lookback window that belong to `schedule`.
/// Plans generated without a schedule are attributed to it as well.
pub fn adjuster_history(
    store: &Store,
    schedule: &StudySchedule,
    today: NaiveDate,
    history_days: i64,
) -> Result<Vec<DailyStudyPlan>, StoreError> {
    let from = today - Duration::days(history_days);
    Ok(store
        .list_daily_plans(&schedule.user_id, from, today)?
        .into_iter()
        .filter(|p| p.schedule_id.as_deref().map_or(true, |id| id == schedule.id))
        .collect())
}

/// Synchronous operations of the scheduler. Every method validates input,
/// runs without retries and reports failures to the caller.
pub struct SchedulerService {
    store: Arc<Store>,
    policy: Arc<RwLock<SchedulerPolicy>>,
}

impl SchedulerService {
    pub fn new(store: Arc<Store>, policy: SchedulerPolicy) -> Self {
        Self {
            store,
            policy: Arc::new(RwLock::new(policy)),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn policy(&self) -> SchedulerPolicy {
        self.policy.read().await.clone()
    }

    pub async fn reload_policy(&self, policy: SchedulerPolicy) -> Result<(), String> {
        policy.validate()?;
        *self.policy.write().await = policy;
        tracing::info!("Scheduler policy reloaded");
        Ok(())
    }

    // ── Profile ──

    pub async fn profile(&self, user_id: &str) -> Result<LearningProfile, SchedulerError> {
        let default_load = self.policy.read().await.profile.default_daily_load;
        Ok(self.store.get_or_create_profile(user_id, default_load)?)
    }

    async fn sync_profile_load(&self, user_id: &str, daily_minutes: u32) -> Result<(), SchedulerError> {
        let mut profile = self.profile(user_id).await?;
        if profile.recommended_daily_load != daily_minutes {
            profile.recommended_daily_load = daily_minutes;
            profile.updated_at = Utc::now();
            self.store.put_profile(&profile)?;
        }
        Ok(())
    }

    // ── Goals ──

    pub async fn create_goal(&self, user_id: &str, input: NewGoal) -> Result<LearningGoal, SchedulerError> {
        let policy = self.policy().await;
        let now = Utc::now();
        let goal = goals::build_goal(user_id, input, now.date_naive(), now, &policy.goals)?;
        self.store.create_goal(&goal)?;
        tracing::info!(user_id, goal_id = %goal.id, goal_type = goal.goal_type.as_str(), "Goal created");
        Ok(goal)
    }

    pub async fn get_goal(&self, user_id: &str, goal_id: &str) -> Result<LearningGoal, SchedulerError> {
        self.store
            .get_goal(user_id, goal_id)?
            .ok_or_else(|| SchedulerError::not_found("goal", goal_id))
    }

    pub async fn list_goals(
        &self,
        user_id: &str,
        status: Option<GoalStatus>,
    ) -> Result<Vec<LearningGoal>, SchedulerError> {
        let all = self.store.list_goals(user_id)?;
        Ok(match status {
            Some(wanted) => all.into_iter().filter(|g| g.status == wanted).collect(),
            None => all,
        })
    }

    pub async fn update_goal(
        &self,
        user_id: &str,
        goal_id: &str,
        update: GoalUpdate,
    ) -> Result<LearningGoal, SchedulerError> {
        let policy = self.policy().await;
        let mut goal = self.get_goal(user_id, goal_id).await?;
        let now = Utc::now();
        goals::apply_update(&mut goal, update, now.date_naive(), now, &policy.goals)?;
        self.store.put_goal(&goal)?;
        Ok(goal)
    }

    pub async fn transition_goal(
        &self,
        user_id: &str,
        goal_id: &str,
        next: GoalStatus,
    ) -> Result<LearningGoal, SchedulerError> {
        let mut goal = self.get_goal(user_id, goal_id).await?;
        let from = goal.status;
        goals::transition(&mut goal, next, Utc::now())?;
        self.store.put_goal(&goal)?;
        tracing::info!(
            user_id,
            goal_id,
            from = from.as_str(),
            to = next.as_str(),
            "Goal status changed"
        );
        Ok(goal)
    }

    pub async fn delete_goal(&self, user_id: &str, goal_id: &str) -> Result<(), SchedulerError> {
        if !self.store.delete_goal(user_id, goal_id)? {
            return Err(SchedulerError::not_found("goal", goal_id));
        }
        Ok(())
    }

    pub async fn goal_progress(
        &self,
        user_id: &str,
        goal_id: &str,
    ) -> Result<GoalProgressReport, SchedulerError> {
        let policy = self.policy().await;
        let goal = self.get_goal(user_id, goal_id).await?;
        Ok(goals::progress_report(&goal, Utc::now().date_naive(), &policy.goals))
    }

    // ── Schedules ──

    pub async fn create_schedule(
        &self,
        user_id: &str,
        input: NewSchedule,
    ) -> Result<StudySchedule, SchedulerError> {
        let min = input.min_daily_load.unwrap_or(DEFAULT_MIN_DAILY_LOAD);
        let max = input.max_daily_load.unwrap_or(DEFAULT_MAX_DAILY_LOAD);
        validation::validate_schedule_name(&input.name).map_err(SchedulerError::Validation)?;
        validation::validate_schedule(&input.schedule_type, &input.schedule_config, min, max)
            .map_err(SchedulerError::Validation)?;

        let now = Utc::now();
        let schedule = StudySchedule {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: input.name.trim().to_string(),
            schedule_type: input.schedule_type,
            schedule_config: input.schedule_config,
            adaptation_mode: input.adaptation_mode,
            min_daily_load: min,
            max_daily_load: max,
            catch_up_strategy: input.catch_up_strategy,
            is_active: false,
            stats: ScheduleStats::default(),
            last_adjusted_at: None,
            adjustment_reason: None,
            adjustment_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.create_schedule(&schedule)?;
        tracing::info!(user_id, schedule_id = %schedule.id, "Schedule created");

        if input.activate {
            return self.activate_schedule(user_id, &schedule.id).await;
        }
        Ok(schedule)
    }

    pub async fn get_schedule(&self, user_id: &str, schedule_id: &str) -> Result<StudySchedule, SchedulerError> {
        self.store
            .get_schedule(user_id, schedule_id)?
            .ok_or_else(|| SchedulerError::not_found("schedule", schedule_id))
    }

    pub async fn list_schedules(&self, user_id: &str) -> Result<Vec<StudySchedule>, SchedulerError> {
        Ok(self.store.list_schedules(user_id)?)
    }

    pub async fn active_schedule(&self, user_id: &str) -> Result<Option<StudySchedule>, SchedulerError> {
        Ok(self.store.get_active_schedule(user_id)?)
    }

    pub async fn update_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
        update: ScheduleUpdate,
    ) -> Result<StudySchedule, SchedulerError> {
        let schedule = self.get_schedule(user_id, schedule_id).await?;
        let name = update.name.unwrap_or_else(|| schedule.name.clone());
        let schedule_type = update.schedule_type.unwrap_or_else(|| schedule.schedule_type.clone());
        let config = update
            .schedule_config
            .unwrap_or_else(|| schedule.schedule_config.clone());
        let min = update.min_daily_load.unwrap_or(schedule.min_daily_load);
        let max = update.max_daily_load.unwrap_or(schedule.max_daily_load);
        validation::validate_schedule_name(&name).map_err(SchedulerError::Validation)?;
        validation::validate_schedule(&schedule_type, &config, min, max)
            .map_err(SchedulerError::Validation)?;

        let minutes_changed = config.daily_minutes != schedule.schedule_config.daily_minutes;
        let name = name.trim().to_string();
        let now = Utc::now();
        let schedule = self.store.update_schedule(user_id, schedule_id, |s| {
            s.name = name.clone();
            s.schedule_type = schedule_type.clone();
            s.schedule_config = config.clone();
            s.min_daily_load = min;
            s.max_daily_load = max;
            if let Some(mode) = update.adaptation_mode {
                s.adaptation_mode = mode;
            }
            if let Some(strategy) = update.catch_up_strategy {
                s.catch_up_strategy = strategy;
            }
            s.updated_at = now;
            true
        })?;

        if minutes_changed && schedule.is_active {
            self.sync_profile_load(user_id, schedule.schedule_config.daily_minutes)
                .await?;
        }
        Ok(schedule)
    }

    /// Activate one schedule; every other schedule of the user is deactivated
    /// in the same transaction.
    pub async fn activate_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<StudySchedule, SchedulerError> {
        let schedule = self.store.activate_schedule(user_id, schedule_id, Utc::now())?;
        self.sync_profile_load(user_id, schedule.schedule_config.daily_minutes)
            .await?;
        tracing::info!(user_id, schedule_id, "Schedule activated");
        Ok(schedule)
    }

    pub async fn deactivate_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<StudySchedule, SchedulerError> {
        Ok(self.store.deactivate_schedule(user_id, schedule_id, Utc::now())?)
    }

    pub async fn delete_schedule(&self, user_id: &str, schedule_id: &str) -> Result<(), SchedulerError> {
        if !self.store.delete_schedule(user_id, schedule_id)? {
            return Err(SchedulerError::not_found("schedule", schedule_id));
        }
        Ok(())
    }

    /// Recompute adherence stats from every closed plan of the schedule.
    pub async fn refresh_schedule_stats(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<StudySchedule, SchedulerError> {
        self.get_schedule(user_id, schedule_id).await?;
        let plans: Vec<DailyStudyPlan> = self
            .store
            .list_user_plans(user_id)?
            .into_iter()
            .filter(|p| p.schedule_id.as_deref() == Some(schedule_id))
            .collect();
        let stats = schedule_stats(&plans);
        let now = Utc::now();
        Ok(self.store.update_schedule(user_id, schedule_id, |s| {
            if s.stats == stats {
                return false;
            }
            s.stats = stats.clone();
            s.updated_at = now;
            true
        })?)
    }

    // ── Daily plans ──

    pub async fn generate_plan(&self, user_id: &str, date: NaiveDate) -> Result<DailyStudyPlan, SchedulerError> {
        self.generate_plan_at(user_id, date, Utc::now()).await
    }

    /// Build and persist the plan for `(user, date)`. An existing plan is a
    /// conflict; delete it first to force regeneration.
    pub async fn generate_plan_at(
        &self,
        user_id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<DailyStudyPlan, SchedulerError> {
        let policy = self.policy().await;
        let profile = self
            .store
            .get_or_create_profile(user_id, policy.profile.default_daily_load)?;
        let schedule = self.store.get_active_schedule(user_id)?;

        let due = signals::load_due_items(&self.store, user_id, now, policy.plan.due_candidate_cap)?;
        let attempts =
            signals::load_attempts(&self.store, user_id, now, policy.plan.weak_topic_lookback_days)?;
        let weak = signals::weak_topics(
            &signals::topic_scores(&attempts),
            policy.plan.weak_topic_threshold,
            policy.plan.weak_topic_min_attempts,
            policy.plan.weak_topic_cap,
        );
        let active_goals = self.store.list_active_goals(user_id)?;
        let focus_areas: Vec<String> = schedule
            .as_ref()
            .map(|s| s.schedule_config.focus_areas.clone())
            .unwrap_or_default();

        let plan = plan_generator::generate(
            &PlanInputs {
                user_id,
                plan_date: date,
                now,
                schedule_id: schedule.as_ref().map(|s| s.id.as_str()),
                time_budget: profile.recommended_daily_load,
                due: &due,
                weak_topics: &weak,
                goals: &active_goals,
                focus_areas: &focus_areas,
            },
            &policy.plan,
        );
        self.store.create_daily_plan(&plan)?;
        tracing::info!(
            user_id,
            plan_date = %date,
            tasks = plan.total_tasks_count,
            minutes = plan.total_estimated_minutes,
            "Daily plan generated"
        );
        Ok(plan)
    }

    pub async fn get_plan(&self, user_id: &str, date: NaiveDate) -> Result<DailyStudyPlan, SchedulerError> {
        self.store
            .get_daily_plan(user_id, date)?
            .ok_or_else(|| SchedulerError::not_found("daily_plan", &date.to_string()))
    }

    pub async fn list_plans(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyStudyPlan>, SchedulerError> {
        if to < from {
            return Err(SchedulerError::validation("`to` must not be before `from`"));
        }
        Ok(self.store.list_daily_plans(user_id, from, to)?)
    }

    async fn mutate_plan(
        &self,
        user_id: &str,
        date: NaiveDate,
        f: impl FnOnce(&mut DailyStudyPlan) -> Result<(), SchedulerError>,
    ) -> Result<DailyStudyPlan, SchedulerError> {
        let mut plan = self.get_plan(user_id, date).await?;
        f(&mut plan)?;
        self.store.put_daily_plan(&plan)?;
        Ok(plan)
    }

    pub async fn start_plan(&self, user_id: &str, date: NaiveDate) -> Result<DailyStudyPlan, SchedulerError> {
        self.mutate_plan(user_id, date, |p| p.start(Utc::now())).await
    }

    pub async fn complete_task(
        &self,
        user_id: &str,
        date: NaiveDate,
        task_index: usize,
        minutes_spent: u32,
        accuracy: Option<f64>,
    ) -> Result<DailyStudyPlan, SchedulerError> {
        self.mutate_plan(user_id, date, |p| {
            p.complete_task(task_index, minutes_spent, accuracy, Utc::now())
        })
        .await
    }

    pub async fn skip_plan(&self, user_id: &str, date: NaiveDate) -> Result<DailyStudyPlan, SchedulerError> {
        self.mutate_plan(user_id, date, |p| p.skip(Utc::now())).await
    }

    pub async fn close_plan(&self, user_id: &str, date: NaiveDate) -> Result<DailyStudyPlan, SchedulerError> {
        self.mutate_plan(user_id, date, |p| {
            p.close(Utc::now());
            Ok(())
        })
        .await
    }

    pub async fn delete_plan(&self, user_id: &str, date: NaiveDate) -> Result<(), SchedulerError> {
        if !self.store.delete_daily_plan(user_id, date)? {
            return Err(SchedulerError::not_found("daily_plan", &date.to_string()));
        }
        Ok(())
    }

    // ── Recommendations ──

    /// Purge expired recommendations, then persist up to `max` new ones.
    pub async fn generate_recommendations(&self, user_id: &str, max: usize) -> Result<usize, SchedulerError> {
        if max == 0 {
            return Err(SchedulerError::validation("max must be >= 1"));
        }
        let policy = self.policy().await;
        Ok(recommend::generate_and_store(
            &self.store,
            user_id,
            max,
            Utc::now(),
            &policy,
        )?)
    }

    pub async fn active_recommendations(&self, user_id: &str) -> Result<Vec<Recommendation>, SchedulerError> {
        Ok(self.store.list_active_recommendations(user_id, Utc::now())?)
    }

    pub async fn record_recommendation_action(
        &self,
        user_id: &str,
        recommendation_id: &str,
        action: RecommendationAction,
    ) -> Result<Recommendation, SchedulerError> {
        Ok(self
            .store
            .record_recommendation_action(user_id, recommendation_id, action, Utc::now())?)
    }

    // ── Adjuster ──

    pub async fn adjust_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<AdjustmentOutcome, SchedulerError> {
        let policy = self.policy().await;
        let schedule = self.get_schedule(user_id, schedule_id).await?;
        let now = Utc::now();
        let today = now.date_naive();
        let history = adjuster_history(&self.store, &schedule, today, policy.adjuster.history_days)?;
        let outcome = adjuster::evaluate(&schedule, &history, today, &policy.adjuster);

        if outcome.adjusted {
            let schedule = self
                .store
                .update_schedule(user_id, schedule_id, |s| adjuster::apply(s, &outcome, now))?;
            if schedule.is_active {
                self.sync_profile_load(user_id, schedule.schedule_config.daily_minutes)
                    .await?;
            }
            tracing::info!(
                user_id,
                schedule_id,
                from = outcome.previous_daily_minutes,
                to = outcome.new_daily_minutes,
                reason = %outcome.reason,
                "Schedule load adjusted"
            );
        } else {
            tracing::debug!(user_id, schedule_id, reason = %outcome.reason, "No schedule adjustment");
        }
        Ok(outcome)
    }
}
