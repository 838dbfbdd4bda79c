//! Feedback controller for a schedule's daily load.
//!
//! Analysis and decision are pure functions of the schedule and its plan
//! history; the caller persists the outcome.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::policy::AdjusterPolicy;
use crate::store::operations::daily_plans::{DailyStudyPlan, PlanStatus};
use crate::store::operations::schedules::{AdaptationMode, CatchUpStrategy, StudySchedule};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchUp {
    pub days: u32,
    pub total_minutes: u32,
    pub estimated_catch_up_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceAnalysis {
    pub total_past_days: u32,
    pub completed_days: u32,
    pub partial_days: u32,
    pub missed_days: u32,
    /// 0-100; an empty history counts as fully adherent.
    pub adherence_rate: f64,
    pub consecutive_missed: u32,
    pub avg_performance: Option<f64>,
    pub is_overloaded: bool,
    pub catch_up: CatchUp,
    /// Some plan changed after the schedule was last adjusted.
    pub has_new_activity: bool,
}

impl AdherenceAnalysis {
    pub fn catch_up_needed(&self) -> bool {
        self.catch_up.days > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    StrictMode,
    NoNewActivity,
    NotTriggered,
    Overload,
    Burnout,
    CatchUp,
    CatchUpSkipped,
    Increase,
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentOutcome {
    pub adjusted: bool,
    pub kind: AdjustmentKind,
    pub reason: String,
    pub previous_daily_minutes: u32,
    pub new_daily_minutes: u32,
    pub analysis: AdherenceAnalysis,
}

/// A plan counts as missed once skipped, or when it was never touched and its
/// day is over (rollover may not have closed it yet).
fn is_missed(plan: &DailyStudyPlan, today: NaiveDate) -> bool {
    match plan.status {
        PlanStatus::Skipped => true,
        PlanStatus::Pending => plan.plan_date < today,
        _ => false,
    }
}

/// Analyse plans dated before `today`. `history` may be in any order.
pub fn analyze(
    history: &[DailyStudyPlan],
    today: NaiveDate,
    last_adjusted_at: Option<DateTime<Utc>>,
    policy: &AdjusterPolicy,
) -> AdherenceAnalysis {
    let mut past: Vec<&DailyStudyPlan> = history.iter().filter(|p| p.plan_date < today).collect();
    past.sort_by_key(|p| p.plan_date);

    let total = past.len() as u32;
    let completed = past
        .iter()
        .filter(|p| p.status == PlanStatus::Completed)
        .count() as u32;
    let partial = past
        .iter()
        .filter(|p| p.status == PlanStatus::PartiallyCompleted)
        .count() as u32;
    let missed: Vec<&&DailyStudyPlan> = past.iter().filter(|p| is_missed(p, today)).collect();

    let adherence_rate = if total == 0 {
        100.0
    } else {
        completed as f64 / total as f64 * 100.0
    };

    let consecutive_missed = past
        .iter()
        .rev()
        .take_while(|p| is_missed(p, today))
        .count() as u32;

    let performance: Vec<f64> = past
        .iter()
        .filter(|p| p.status == PlanStatus::Completed)
        .filter_map(|p| p.accuracy)
        .collect();
    let avg_performance = if performance.is_empty() {
        None
    } else {
        Some(performance.iter().sum::<f64>() / performance.len() as f64)
    };

    let recent: Vec<f64> = performance
        .iter()
        .rev()
        .take(policy.overload_window)
        .copied()
        .collect();
    let is_overloaded = recent.len() >= policy.overload_min_samples && {
        let low = recent.iter().filter(|a| **a < policy.overload_accuracy).count();
        low as f64 / recent.len() as f64 >= policy.overload_share
    };

    let missed_days = missed.len() as u32;
    let catch_up = CatchUp {
        days: missed_days,
        total_minutes: missed.iter().map(|p| p.total_estimated_minutes).sum(),
        estimated_catch_up_days: (missed_days / 2).max(1),
    };

    // 今天的计划还在进行中，不算新的历史
    let has_new_activity = match last_adjusted_at {
        None => true,
        Some(stamp) => past.iter().any(|p| p.updated_at > stamp),
    };

    AdherenceAnalysis {
        total_past_days: total,
        completed_days: completed,
        partial_days: partial,
        missed_days,
        adherence_rate,
        consecutive_missed,
        avg_performance,
        is_overloaded,
        catch_up,
        has_new_activity,
    }
}

fn ready_for_more(analysis: &AdherenceAnalysis, schedule: &StudySchedule, policy: &AdjusterPolicy) -> bool {
    analysis.total_past_days > 0
        && analysis.adherence_rate >= policy.increase_adherence
        && analysis
            .avg_performance
            .is_some_and(|p| p >= policy.increase_performance)
        && schedule.schedule_config.daily_minutes < schedule.max_daily_load
}

pub fn is_triggered(analysis: &AdherenceAnalysis, policy: &AdjusterPolicy) -> bool {
    analysis.adherence_rate < policy.low_adherence
        || analysis.consecutive_missed >= policy.consecutive_missed_trigger
        || analysis.is_overloaded
        || analysis.catch_up.days >= policy.catch_up_trigger_days
}

/// Decide the new daily load. First matching rule wins.
pub fn decide(
    schedule: &StudySchedule,
    analysis: AdherenceAnalysis,
    policy: &AdjusterPolicy,
) -> AdjustmentOutcome {
    let current = schedule.schedule_config.daily_minutes;
    let outcome = |kind: AdjustmentKind, new_minutes: u32, reason: String, analysis: AdherenceAnalysis| {
        AdjustmentOutcome {
            adjusted: new_minutes != current,
            kind,
            reason,
            previous_daily_minutes: current,
            new_daily_minutes: new_minutes,
            analysis,
        }
    };

    if schedule.adaptation_mode == AdaptationMode::Strict {
        return outcome(
            AdjustmentKind::StrictMode,
            current,
            "Schedule uses strict adaptation mode; load is never adjusted".to_string(),
            analysis,
        );
    }
    if !analysis.has_new_activity {
        return outcome(
            AdjustmentKind::NoNewActivity,
            current,
            "No new plan activity since the last adjustment".to_string(),
            analysis,
        );
    }
    if !is_triggered(&analysis, policy) && !ready_for_more(&analysis, schedule, policy) {
        return outcome(
            AdjustmentKind::NotTriggered,
            current,
            "No adjustment needed".to_string(),
            analysis,
        );
    }

    let burnout = analysis.consecutive_missed >= policy.consecutive_missed_trigger;
    if analysis.is_overloaded || burnout {
        let reduction = (current as f64 * policy.overload_reduction).round() as u32;
        let new_minutes = current.saturating_sub(reduction).max(schedule.min_daily_load);
        let (kind, reason) = if analysis.is_overloaded {
            (
                AdjustmentKind::Overload,
                format!(
                    "Overload detected: low accuracy on recent plans, daily load {current} -> {new_minutes} min"
                ),
            )
        } else {
            (
                AdjustmentKind::Burnout,
                format!(
                    "Burnout risk: {} consecutive missed days, daily load {current} -> {new_minutes} min",
                    analysis.consecutive_missed
                ),
            )
        };
        return outcome(kind, new_minutes, reason, analysis);
    }

    if analysis.catch_up_needed() && is_triggered(&analysis, policy) {
        let days = analysis.catch_up.days;
        let increase = match schedule.catch_up_strategy {
            CatchUpStrategy::Skip => {
                return outcome(
                    AdjustmentKind::CatchUpSkipped,
                    current,
                    format!("{days} missed days left as is (catch-up strategy: skip)"),
                    analysis,
                );
            }
            CatchUpStrategy::Gradual => (policy.gradual_minutes_per_day * days).min(policy.gradual_cap),
            CatchUpStrategy::Intensive => {
                (policy.intensive_minutes_per_day * days).min(policy.intensive_cap)
            }
        };
        let new_minutes = current.saturating_add(increase).min(schedule.max_daily_load).max(current);
        return outcome(
            AdjustmentKind::CatchUp,
            new_minutes,
            format!(
                "Catching up on {days} missed days over ~{} days, daily load {current} -> {new_minutes} min",
                analysis.catch_up.estimated_catch_up_days
            ),
            analysis,
        );
    }

    if ready_for_more(&analysis, schedule, policy) {
        let step = ((current as f64 * policy.increase_ratio).round() as u32)
            .clamp(policy.increase_min_minutes, policy.increase_max_minutes);
        let new_minutes = current.saturating_add(step).min(schedule.max_daily_load);
        return outcome(
            AdjustmentKind::Increase,
            new_minutes,
            format!(
                "Strong adherence ({:.0}%) and performance, daily load {current} -> {new_minutes} min",
                analysis.adherence_rate
            ),
            analysis,
        );
    }

    outcome(
        AdjustmentKind::NoChange,
        current,
        "Signals present but no rule changes the load".to_string(),
        analysis,
    )
}

/// Analyse and decide in one step.
pub fn evaluate(
    schedule: &StudySchedule,
    history: &[DailyStudyPlan],
    today: NaiveDate,
    policy: &AdjusterPolicy,
) -> AdjustmentOutcome {
    let analysis = analyze(history, today, schedule.last_adjusted_at, policy);
    decide(schedule, analysis, policy)
}

/// Write an applied outcome onto the schedule. Returns `false` for no-ops.
pub fn apply(schedule: &mut StudySchedule, outcome: &AdjustmentOutcome, now: DateTime<Utc>) -> bool {
    if !outcome.adjusted {
        return false;
    }
    schedule.schedule_config.daily_minutes = outcome.new_daily_minutes;
    schedule.last_adjusted_at = Some(now);
    schedule.adjustment_reason = Some(outcome.reason.clone());
    schedule.adjustment_count += 1;
    schedule.updated_at = now;
    true
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::operations::daily_plans::{PlanDifficulty, PlanPriority};
    use crate::store::operations::schedules::{ScheduleConfig, ScheduleStats, ScheduleType};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 20).unwrap()
    }

    fn schedule(mode: AdaptationMode, strategy: CatchUpStrategy, minutes: u32) -> StudySchedule {
        let now = Utc::now();
        StudySchedule {
            id: "s1".into(),
            user_id: "u1".into(),
            name: "Daily".into(),
            schedule_type: ScheduleType::Daily,
            schedule_config: ScheduleConfig {
                daily_minutes: minutes,
                days_per_week: 7,
                activity_distribution: Default::default(),
                focus_areas: vec![],
            },
            adaptation_mode: mode,
            min_daily_load: 15,
            max_daily_load: 60,
            catch_up_strategy: strategy,
            is_active: true,
            stats: ScheduleStats::default(),
            last_adjusted_at: None,
            adjustment_reason: None,
            adjustment_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn plan(days_ago: i64, status: PlanStatus, accuracy: Option<f64>) -> DailyStudyPlan {
        let now = Utc::now();
        DailyStudyPlan {
            id: format!("p{days_ago}"),
            user_id: "u1".into(),
            plan_date: today() - Duration::days(days_ago),
            schedule_id: Some("s1".into()),
            recommended_tasks: vec![],
            total_estimated_minutes: 30,
            priority: PlanPriority::Normal,
            difficulty: PlanDifficulty::Easy,
            summary: String::new(),
            status,
            completed_tasks_count: 0,
            total_tasks_count: 1,
            completion_percentage: 0.0,
            actual_minutes_spent: 0,
            accuracy,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn missed_streak(n: i64) -> Vec<DailyStudyPlan> {
        (1..=n).map(|d| plan(d, PlanStatus::Skipped, None)).collect()
    }

    #[test]
    fn strict_mode_never_adjusts() {
        let s = schedule(AdaptationMode::Strict, CatchUpStrategy::Gradual, 30);
        let out = evaluate(&s, &missed_streak(5), today(), &AdjusterPolicy::default());
        assert!(!out.adjusted);
        assert_eq!(out.kind, AdjustmentKind::StrictMode);
        assert!(out.reason.contains("strict"));
        assert_eq!(out.new_daily_minutes, 30);
        assert_eq!(out.analysis.consecutive_missed, 5);
    }

    #[test]
    fn overload_cuts_a_quarter_rounded() {
        let s = schedule(AdaptationMode::Moderate, CatchUpStrategy::Gradual, 30);
        let history = vec![
            plan(5, PlanStatus::Completed, Some(50.0)),
            plan(4, PlanStatus::Completed, Some(55.0)),
            plan(3, PlanStatus::Completed, Some(90.0)),
            plan(2, PlanStatus::Completed, Some(40.0)),
            plan(1, PlanStatus::Completed, Some(58.0)),
        ];
        let out = evaluate(&s, &history, today(), &AdjusterPolicy::default());
        assert!(out.analysis.is_overloaded);
        assert_eq!(out.kind, AdjustmentKind::Overload);
        assert_eq!(out.new_daily_minutes, 22);
    }

    #[test]
    fn reduction_is_floored_at_min_load() {
        let s = schedule(AdaptationMode::Flexible, CatchUpStrategy::Gradual, 16);
        let out = evaluate(&s, &missed_streak(3), today(), &AdjusterPolicy::default());
        assert_eq!(out.kind, AdjustmentKind::Burnout);
        assert_eq!(out.new_daily_minutes, 15);
    }

    #[test]
    fn activity_on_todays_plan_is_not_new_history() {
        let stamp = Utc::now();
        let mut history = missed_streak(3);
        for p in history.iter_mut() {
            p.updated_at = stamp - Duration::hours(1);
        }
        let mut current = plan(0, PlanStatus::InProgress, None);
        current.updated_at = stamp + Duration::minutes(5);
        history.push(current);

        let analysis = analyze(&history, today(), Some(stamp), &AdjusterPolicy::default());
        assert!(!analysis.has_new_activity);

        history[0].updated_at = stamp + Duration::minutes(1);
        let analysis = analyze(&history, today(), Some(stamp), &AdjusterPolicy::default());
        assert!(analysis.has_new_activity);
    }

    #[test]
    fn overload_needs_minimum_samples() {
        let history = vec![
            plan(2, PlanStatus::Completed, Some(30.0)),
            plan(1, PlanStatus::Completed, Some(30.0)),
        ];
        let analysis = analyze(&history, today(), None, &AdjusterPolicy::default());
        assert!(!analysis.is_overloaded);
    }

    #[test]
    fn catch_up_strategies() {
        // 5 missed days, broken streak so burnout does not fire
        let mut history: Vec<_> = (2..=6).map(|d| plan(d * 2, PlanStatus::Skipped, None)).collect();
        history.extend((0..5).map(|d| plan(d * 2 + 1, PlanStatus::Completed, Some(80.0))));
        let policy = AdjusterPolicy::default();

        let gradual = evaluate(
            &schedule(AdaptationMode::Moderate, CatchUpStrategy::Gradual, 30),
            &history,
            today(),
            &policy,
        );
        assert_eq!(gradual.kind, AdjustmentKind::CatchUp);
        assert_eq!(gradual.new_daily_minutes, 40);
        assert_eq!(gradual.analysis.catch_up.estimated_catch_up_days, 2);

        let intensive = evaluate(
            &schedule(AdaptationMode::Moderate, CatchUpStrategy::Intensive, 30),
            &history,
            today(),
            &policy,
        );
        assert_eq!(intensive.new_daily_minutes, 55);

        let capped = evaluate(
            &schedule(AdaptationMode::Moderate, CatchUpStrategy::Intensive, 50),
            &history,
            today(),
            &policy,
        );
        assert_eq!(capped.new_daily_minutes, 60);

        let skip = evaluate(
            &schedule(AdaptationMode::Moderate, CatchUpStrategy::Skip, 30),
            &history,
            today(),
            &policy,
        );
        assert!(!skip.adjusted);
        assert_eq!(skip.kind, AdjustmentKind::CatchUpSkipped);
    }

    #[test]
    fn strong_history_raises_load() {
        let s = schedule(AdaptationMode::HighlyAdaptive, CatchUpStrategy::Gradual, 30);
        let history: Vec<_> = (1..=10)
            .map(|d| plan(d, PlanStatus::Completed, Some(92.0)))
            .collect();
        let out = evaluate(&s, &history, today(), &AdjusterPolicy::default());
        assert_eq!(out.kind, AdjustmentKind::Increase);
        assert_eq!(out.new_daily_minutes, 33);
    }

    #[test]
    fn empty_history_is_a_no_op() {
        let s = schedule(AdaptationMode::Moderate, CatchUpStrategy::Gradual, 30);
        let out = evaluate(&s, &[], today(), &AdjusterPolicy::default());
        assert!(!out.adjusted);
        assert_eq!(out.analysis.adherence_rate, 100.0);
        assert_eq!(out.kind, AdjustmentKind::NotTriggered);
    }

    #[test]
    fn second_call_without_new_plans_is_a_no_op() {
        let mut s = schedule(AdaptationMode::Moderate, CatchUpStrategy::Gradual, 30);
        let history = missed_streak(4);
        let policy = AdjusterPolicy::default();

        let first = evaluate(&s, &history, today(), &policy);
        assert!(first.adjusted);
        assert!(apply(&mut s, &first, Utc::now() + Duration::seconds(1)));
        assert_eq!(s.adjustment_count, 1);

        let second = evaluate(&s, &history, today(), &policy);
        assert!(!second.adjusted);
        assert_eq!(second.kind, AdjustmentKind::NoNewActivity);
        assert!(!apply(&mut s, &second, Utc::now()));
        assert_eq!(s.schedule_config.daily_minutes, first.new_daily_minutes);
    }

    #[test]
    fn todays_plan_is_not_history() {
        let history = vec![plan(0, PlanStatus::Pending, None)];
        let analysis = analyze(&history, today(), None, &AdjusterPolicy::default());
        assert_eq!(analysis.total_past_days, 0);
        assert_eq!(analysis.consecutive_missed, 0);
    }
}
