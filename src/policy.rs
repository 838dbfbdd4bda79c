use serde::{Deserialize, Serialize};

use crate::config::SchedulerEnvConfig;
use crate::constants::{DEFAULT_DAILY_LOAD_MINUTES, DEFAULT_RECOMMENDATION_CAP, MAX_DAILY_MINUTES};

/// 目标进度判定阈值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalPolicy {
    /// 允许落后于预期进度的百分点
    pub on_track_tolerance: f64,
    pub mastery_min_repetitions: u32,
    pub mastery_min_ease: f64,
}

impl Default for GoalPolicy {
    fn default() -> Self {
        Self {
            on_track_tolerance: 10.0,
            mastery_min_repetitions: 3,
            mastery_min_ease: 2.0,
        }
    }
}

/// 每日计划的时间分配
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPolicy {
    pub due_candidate_cap: usize,
    pub review_max_cards: usize,
    pub minutes_per_card: f64,
    /// 复习任务最多占预算的比例
    pub review_budget_share: f64,
    pub min_review_minutes: u32,
    pub weak_topic_task_count: usize,
    pub weak_topic_task_minutes: u32,
    /// 已用预算达到该比例后不再添加薄弱主题任务
    pub weak_topic_budget_share: f64,
    pub min_goal_task_minutes: u32,
    pub fallback_task_minutes: u32,
    pub weak_topic_threshold: f64,
    pub weak_topic_min_attempts: usize,
    pub weak_topic_cap: usize,
    pub weak_topic_lookback_days: i64,
    pub critical_due_count: usize,
    pub high_due_count: usize,
    pub goal_deadline_days: i64,
    pub hard_high_priority_tasks: usize,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self {
            due_candidate_cap: 50,
            review_max_cards: 20,
            minutes_per_card: 0.5,
            review_budget_share: 0.4,
            min_review_minutes: 5,
            weak_topic_task_count: 2,
            weak_topic_task_minutes: 15,
            weak_topic_budget_share: 0.7,
            min_goal_task_minutes: 10,
            fallback_task_minutes: 15,
            weak_topic_threshold: 70.0,
            weak_topic_min_attempts: 1,
            weak_topic_cap: 3,
            weak_topic_lookback_days: 30,
            critical_due_count: 30,
            high_due_count: 15,
            goal_deadline_days: 7,
            hard_high_priority_tasks: 2,
        }
    }
}

/// 各类推荐的有效期（小时）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationTtl {
    pub due_flashcards_hours: i64,
    pub weak_topic_hours: i64,
    pub quiz_suggestion_hours: i64,
    pub document_reread_hours: i64,
    pub goal_progress_hours: i64,
    pub reinforcement_hours: i64,
}

impl Default for RecommendationTtl {
    fn default() -> Self {
        Self {
            due_flashcards_hours: 24,
            weak_topic_hours: 72,
            quiz_suggestion_hours: 48,
            document_reread_hours: 168,
            goal_progress_hours: 48,
            reinforcement_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationPolicy {
    /// Due cards read for tag grouping; independent of the plan's candidate cap.
    #[serde(default = "default_due_scan_cap")]
    pub due_scan_cap: usize,
    pub urgent_group_size: usize,
    pub relevance_divisor: f64,
    pub weak_topic_threshold: f64,
    pub weak_topic_min_attempts: usize,
    pub weak_topic_lookback_days: i64,
    pub recent_topic_days: i64,
    pub recent_topic_cap: usize,
    pub document_cap: usize,
    pub reinforcement_accuracy: f64,
    pub default_max: usize,
    #[serde(default)]
    pub ttl: RecommendationTtl,
}

fn default_due_scan_cap() -> usize {
    2_000
}

impl Default for RecommendationPolicy {
    fn default() -> Self {
        Self {
            due_scan_cap: default_due_scan_cap(),
            urgent_group_size: 10,
            relevance_divisor: 20.0,
            weak_topic_threshold: 70.0,
            weak_topic_min_attempts: 2,
            weak_topic_lookback_days: 30,
            recent_topic_days: 7,
            recent_topic_cap: 3,
            document_cap: 3,
            reinforcement_accuracy: 85.0,
            default_max: DEFAULT_RECOMMENDATION_CAP,
            ttl: RecommendationTtl::default(),
        }
    }
}

/// 负载调节器的触发条件与调整幅度
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjusterPolicy {
    pub history_days: i64,
    pub low_adherence: f64,
    pub consecutive_missed_trigger: u32,
    pub overload_window: usize,
    pub overload_accuracy: f64,
    pub overload_share: f64,
    pub overload_min_samples: usize,
    pub catch_up_trigger_days: u32,
    pub overload_reduction: f64,
    pub gradual_minutes_per_day: u32,
    pub gradual_cap: u32,
    pub intensive_minutes_per_day: u32,
    pub intensive_cap: u32,
    pub increase_adherence: f64,
    pub increase_performance: f64,
    pub increase_ratio: f64,
    pub increase_min_minutes: u32,
    pub increase_max_minutes: u32,
}

impl Default for AdjusterPolicy {
    fn default() -> Self {
        Self {
            history_days: 30,
            low_adherence: 50.0,
            consecutive_missed_trigger: 3,
            overload_window: 5,
            overload_accuracy: 60.0,
            overload_share: 0.6,
            overload_min_samples: 3,
            catch_up_trigger_days: 5,
            overload_reduction: 0.25,
            gradual_minutes_per_day: 2,
            gradual_cap: 15,
            intensive_minutes_per_day: 5,
            intensive_cap: 30,
            increase_adherence: 90.0,
            increase_performance: 85.0,
            increase_ratio: 0.10,
            increase_min_minutes: 1,
            increase_max_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePolicy {
    pub default_daily_load: u32,
    pub strong_topic_threshold: f64,
}

impl Default for ProfilePolicy {
    fn default() -> Self {
        Self {
            default_daily_load: DEFAULT_DAILY_LOAD_MINUTES,
            strong_topic_threshold: 85.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerPolicy {
    #[serde(default)]
    pub goals: GoalPolicy,
    #[serde(default)]
    pub plan: PlanPolicy,
    #[serde(default)]
    pub recommendations: RecommendationPolicy,
    #[serde(default)]
    pub adjuster: AdjusterPolicy,
    #[serde(default)]
    pub profile: ProfilePolicy,
}

fn unit_range(value: f64, name: &str) -> Result<(), String> {
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{name} must be in [0,1]"));
    }
    Ok(())
}

fn percent_range(value: f64, name: &str) -> Result<(), String> {
    if !(0.0..=100.0).contains(&value) {
        return Err(format!("{name} must be in [0,100]"));
    }
    Ok(())
}

impl SchedulerPolicy {
    pub fn from_env(env_config: &SchedulerEnvConfig) -> Self {
        let mut policy = Self::default();
        policy.profile.default_daily_load = env_config.default_daily_load;
        policy.recommendations.weak_topic_lookback_days = env_config.recommendation_lookback_days;
        policy
    }

    pub fn validate(&self) -> Result<(), String> {
        percent_range(self.goals.on_track_tolerance, "goals.on_track_tolerance")?;
        if self.goals.mastery_min_ease <= 0.0 {
            return Err("goals.mastery_min_ease must be > 0".to_string());
        }

        let plan = &self.plan;
        if plan.minutes_per_card <= 0.0 {
            return Err("plan.minutes_per_card must be > 0".to_string());
        }
        unit_range(plan.review_budget_share, "plan.review_budget_share")?;
        unit_range(plan.weak_topic_budget_share, "plan.weak_topic_budget_share")?;
        if plan.review_budget_share > plan.weak_topic_budget_share {
            return Err("plan.review_budget_share must not exceed plan.weak_topic_budget_share".to_string());
        }
        percent_range(plan.weak_topic_threshold, "plan.weak_topic_threshold")?;
        if plan.weak_topic_min_attempts == 0 {
            return Err("plan.weak_topic_min_attempts must be >= 1".to_string());
        }
        if plan.review_max_cards > plan.due_candidate_cap {
            return Err("plan.review_max_cards must not exceed plan.due_candidate_cap".to_string());
        }
        if plan.fallback_task_minutes == 0 {
            return Err("plan.fallback_task_minutes must be > 0".to_string());
        }
        if plan.high_due_count > plan.critical_due_count {
            return Err("plan.high_due_count must not exceed plan.critical_due_count".to_string());
        }
        if plan.weak_topic_lookback_days <= 0 {
            return Err("plan.weak_topic_lookback_days must be > 0".to_string());
        }

        let rec = &self.recommendations;
        if rec.relevance_divisor <= 0.0 {
            return Err("recommendations.relevance_divisor must be > 0".to_string());
        }
        percent_range(rec.weak_topic_threshold, "recommendations.weak_topic_threshold")?;
        percent_range(rec.reinforcement_accuracy, "recommendations.reinforcement_accuracy")?;
        if rec.weak_topic_lookback_days <= 0 || rec.recent_topic_days <= 0 {
            return Err("recommendations lookback windows must be > 0".to_string());
        }
        if rec.default_max == 0 {
            return Err("recommendations.default_max must be >= 1".to_string());
        }
        if rec.due_scan_cap < plan.due_candidate_cap {
            return Err("recommendations.due_scan_cap must be >= plan.due_candidate_cap".to_string());
        }
        let ttl = &rec.ttl;
        if [
            ttl.due_flashcards_hours,
            ttl.weak_topic_hours,
            ttl.quiz_suggestion_hours,
            ttl.document_reread_hours,
            ttl.goal_progress_hours,
            ttl.reinforcement_hours,
        ]
        .iter()
        .any(|h| *h <= 0)
        {
            return Err("recommendations.ttl values must be > 0".to_string());
        }

        let adj = &self.adjuster;
        if adj.history_days <= 0 {
            return Err("adjuster.history_days must be > 0".to_string());
        }
        percent_range(adj.low_adherence, "adjuster.low_adherence")?;
        percent_range(adj.overload_accuracy, "adjuster.overload_accuracy")?;
        percent_range(adj.increase_adherence, "adjuster.increase_adherence")?;
        percent_range(adj.increase_performance, "adjuster.increase_performance")?;
        unit_range(adj.overload_share, "adjuster.overload_share")?;
        unit_range(adj.overload_reduction, "adjuster.overload_reduction")?;
        unit_range(adj.increase_ratio, "adjuster.increase_ratio")?;
        if adj.overload_window == 0 || adj.overload_min_samples > adj.overload_window {
            return Err("adjuster.overload_min_samples must be within adjuster.overload_window".to_string());
        }
        if adj.increase_min_minutes > adj.increase_max_minutes {
            return Err("adjuster.increase_min_minutes must not exceed increase_max_minutes".to_string());
        }

        let profile = &self.profile;
        if profile.default_daily_load == 0 || profile.default_daily_load > MAX_DAILY_MINUTES {
            return Err(format!(
                "profile.default_daily_load must be in [1,{MAX_DAILY_MINUTES}]"
            ));
        }
        percent_range(profile.strong_topic_threshold, "profile.strong_topic_threshold")?;

        Ok(())
    }
}
