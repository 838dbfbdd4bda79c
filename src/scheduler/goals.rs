use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::policy::GoalPolicy;
use crate::store::operations::flashcards::Flashcard;
use crate::store::operations::goals::{
    GoalPriority, GoalProgress, GoalStatus, LearningGoal, Milestone, TargetMetrics,
};
use crate::validation;

/// Where a goal stands relative to a linear timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub total_days: i64,
    pub days_passed: i64,
    pub expected_progress: f64,
    pub is_on_track: bool,
    pub days_behind: u32,
}

/// expected = passed / total * 100; on track within `tolerance` points;
/// days behind = round((expected - completion) / (100 / total)), floored at 0.
pub fn project(
    start: NaiveDate,
    target: NaiveDate,
    today: NaiveDate,
    completion: f64,
    tolerance: f64,
) -> Projection {
    let total_days = (target - start).num_days().max(1);
    let days_passed = (today - start).num_days().clamp(0, total_days);
    let expected_progress = days_passed as f64 / total_days as f64 * 100.0;
    let is_on_track = completion >= expected_progress - tolerance;
    let per_day = 100.0 / total_days as f64;
    let behind = ((expected_progress - completion) / per_day).round();
    Projection {
        total_days,
        days_passed,
        expected_progress,
        is_on_track,
        days_behind: if behind > 0.0 { behind as u32 } else { 0 },
    }
}

fn ratio(value: f64, target: f64) -> f64 {
    if target <= 0.0 {
        return 0.0;
    }
    (value / target * 100.0).clamp(0.0, 100.0)
}

/// Completion in [0, 100]. Mismatched metric/progress variants are corrupt data.
pub fn completion_percentage(
    metrics: &TargetMetrics,
    progress: &GoalProgress,
) -> Result<f64, SchedulerError> {
    let value = match (metrics, progress) {
        (
            TargetMetrics::VocabularyCount { target_words },
            GoalProgress::VocabularyCount { words_mastered },
        ) => ratio(*words_mastered as f64, *target_words as f64),
        (TargetMetrics::QuizScore { target_score, .. }, GoalProgress::QuizScore { latest_score, .. }) => {
            ratio(*latest_score, *target_score)
        }
        (
            TargetMetrics::ExamPreparation { target_score, .. },
            GoalProgress::ExamPreparation { average_score, .. },
        ) => ratio(*average_score, *target_score),
        (TargetMetrics::TimeBased { target_minutes }, GoalProgress::TimeBased { minutes_studied }) => {
            ratio(*minutes_studied as f64, *target_minutes as f64)
        }
        (
            TargetMetrics::TopicMastery { target_mastery, .. },
            GoalProgress::TopicMastery { mastery, .. },
        ) => ratio(*mastery, *target_mastery),
        _ => {
            return Err(SchedulerError::permanent(format!(
                "progress {:?} does not match goal type {}",
                progress.goal_type(),
                metrics.goal_type().as_str()
            )))
        }
    };
    Ok(value)
}

/// Store new progress, then refresh completion, projection, milestones, and
/// auto-complete once the target is reached.
pub fn apply_progress(
    goal: &mut LearningGoal,
    progress: GoalProgress,
    today: NaiveDate,
    now: DateTime<Utc>,
    policy: &GoalPolicy,
) -> Result<(), SchedulerError> {
    let completion = completion_percentage(&goal.target_metrics, &progress)?;
    goal.current_progress = progress;
    goal.completion_percentage = completion;
    refresh_projection(goal, today, policy);

    for milestone in goal.milestones.iter_mut() {
        if !milestone.achieved && completion >= milestone.target_percentage {
            milestone.achieved = true;
            milestone.achieved_at = Some(now);
        }
    }

    if completion >= 100.0 && goal.status == GoalStatus::Active {
        goal.status = GoalStatus::Completed;
        goal.completed_at = Some(now);
        tracing::info!(user_id = %goal.user_id, goal_id = %goal.id, "Goal completed");
    }
    goal.updated_at = now;
    Ok(())
}

pub fn refresh_projection(goal: &mut LearningGoal, today: NaiveDate, policy: &GoalPolicy) {
    let p = project(
        goal.start_date,
        goal.target_date,
        today,
        goal.completion_percentage,
        policy.on_track_tolerance,
    );
    goal.is_on_track = p.is_on_track;
    goal.days_behind = p.days_behind;
}

/// Vocabulary and topic-mastery progress recomputed from the card replica.
/// Returns `None` for goal types fed by other activity.
pub fn progress_from_flashcards(
    metrics: &TargetMetrics,
    cards: &[Flashcard],
    policy: &GoalPolicy,
) -> Option<GoalProgress> {
    let mastered =
        |c: &&Flashcard| c.is_mastered(policy.mastery_min_repetitions, policy.mastery_min_ease);
    match metrics {
        TargetMetrics::VocabularyCount { .. } => Some(GoalProgress::VocabularyCount {
            words_mastered: cards.iter().filter(mastered).count() as u32,
        }),
        TargetMetrics::TopicMastery { topic, .. } => {
            let on_topic: Vec<&Flashcard> = cards.iter().filter(|c| c.has_tag(topic)).collect();
            let mastered_cards = on_topic.iter().filter(|c| mastered(*c)).count() as u32;
            let total_cards = on_topic.len() as u32;
            let mastery = if total_cards == 0 {
                0.0
            } else {
                mastered_cards as f64 / total_cards as f64 * 100.0
            };
            Some(GoalProgress::TopicMastery {
                mastery,
                mastered_cards,
                total_cards,
            })
        }
        _ => None,
    }
}

/// Fold one quiz result into quiz-fed progress. Results for an unrelated
/// topic leave the goal untouched (`None`).
pub fn progress_from_quiz(
    metrics: &TargetMetrics,
    current: &GoalProgress,
    score: f64,
    topic: Option<&str>,
) -> Option<GoalProgress> {
    let same_topic = |wanted: &str| topic.is_some_and(|t| t.eq_ignore_ascii_case(wanted));
    match (metrics, current) {
        (
            TargetMetrics::QuizScore { topic: goal_topic, .. },
            GoalProgress::QuizScore {
                best_score,
                attempts,
                ..
            },
        ) => {
            if goal_topic.as_deref().is_some_and(|t| !same_topic(t)) {
                return None;
            }
            Some(GoalProgress::QuizScore {
                latest_score: score,
                best_score: best_score.max(score),
                attempts: attempts + 1,
            })
        }
        (
            TargetMetrics::ExamPreparation { topics, .. },
            GoalProgress::ExamPreparation {
                average_score,
                attempts,
            },
        ) => {
            if !topics.is_empty() && !topics.iter().any(|t| same_topic(t)) {
                return None;
            }
            let n = *attempts as f64;
            Some(GoalProgress::ExamPreparation {
                average_score: (average_score * n + score) / (n + 1.0),
                attempts: attempts + 1,
            })
        }
        _ => None,
    }
}

pub fn progress_from_study_time(current: &GoalProgress, minutes: u32) -> Option<GoalProgress> {
    match current {
        GoalProgress::TimeBased { minutes_studied } if minutes > 0 => Some(GoalProgress::TimeBased {
            minutes_studied: minutes_studied.saturating_add(minutes),
        }),
        _ => None,
    }
}

/// 2 for a week or less, 4 up to a month, 6 up to a quarter, else 8.
pub fn milestone_count(total_days: i64) -> u32 {
    match total_days {
        d if d <= 7 => 2,
        d if d <= 30 => 4,
        d if d <= 90 => 6,
        _ => 8,
    }
}

fn milestone_title(metrics: &TargetMetrics, value: f64) -> String {
    match metrics {
        TargetMetrics::VocabularyCount { .. } => format!("Master {} words", value as u32),
        TargetMetrics::QuizScore { topic: Some(topic), .. } => {
            format!("Score {value:.0}% on {topic} quizzes")
        }
        TargetMetrics::QuizScore { topic: None, .. } => format!("Score {value:.0}% on quizzes"),
        TargetMetrics::ExamPreparation { .. } => format!("Average {value:.0}% across exam topics"),
        TargetMetrics::TimeBased { .. } => format!("Study for {} minutes", value as u32),
        TargetMetrics::TopicMastery { topic, .. } => format!("Reach {value:.0}% mastery of {topic}"),
    }
}

fn milestone_value(metrics: &TargetMetrics, fraction: f64) -> f64 {
    match metrics {
        TargetMetrics::VocabularyCount { target_words } => (*target_words as f64 * fraction).ceil(),
        TargetMetrics::QuizScore { target_score, .. }
        | TargetMetrics::ExamPreparation { target_score, .. } => {
            (target_score * fraction * 10.0).round() / 10.0
        }
        TargetMetrics::TimeBased { target_minutes } => (*target_minutes as f64 * fraction).ceil(),
        TargetMetrics::TopicMastery { target_mastery, .. } => {
            (target_mastery * fraction * 10.0).round() / 10.0
        }
    }
}

/// Evenly spaced checkpoints; the last one lands on the target date with the
/// full target.
pub fn generate_milestones(
    metrics: &TargetMetrics,
    start: NaiveDate,
    target: NaiveDate,
) -> Vec<Milestone> {
    let total_days = (target - start).num_days().max(1);
    let count = milestone_count(total_days);
    (1..=count)
        .map(|index| {
            let fraction = index as f64 / count as f64;
            let offset = (total_days as f64 * fraction).round() as i64;
            let value = milestone_value(metrics, fraction);
            Milestone {
                index,
                title: milestone_title(metrics, value),
                target_date: (start + Duration::days(offset)).min(target.max(start)),
                target_percentage: fraction * 100.0,
                target_value: value,
                achieved: false,
                achieved_at: None,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGoal {
    pub title: String,
    pub description: Option<String>,
    pub target_metrics: TargetMetrics,
    pub start_date: Option<NaiveDate>,
    pub target_date: NaiveDate,
    #[serde(default = "default_priority")]
    pub priority: GoalPriority,
    /// Create as draft instead of active.
    #[serde(default)]
    pub draft: bool,
    pub milestones: Option<Vec<Milestone>>,
}

fn default_priority() -> GoalPriority {
    GoalPriority::Medium
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<GoalPriority>,
    pub target_date: Option<NaiveDate>,
    pub target_metrics: Option<TargetMetrics>,
}

/// Validate input and build a fresh goal with zero progress.
pub fn build_goal(
    user_id: &str,
    input: NewGoal,
    today: NaiveDate,
    now: DateTime<Utc>,
    policy: &GoalPolicy,
) -> Result<LearningGoal, SchedulerError> {
    let start_date = input.start_date.unwrap_or(today);
    validation::validate_goal_title(&input.title).map_err(SchedulerError::Validation)?;
    validation::validate_goal_dates(start_date, input.target_date)
        .map_err(SchedulerError::Validation)?;
    validation::validate_target_metrics(&input.target_metrics)
        .map_err(SchedulerError::Validation)?;

    let milestones = match input.milestones {
        Some(given) if !given.is_empty() => given,
        _ => generate_milestones(&input.target_metrics, start_date, input.target_date),
    };

    let mut goal = LearningGoal {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        title: input.title.trim().to_string(),
        description: input.description,
        goal_type: input.target_metrics.goal_type(),
        current_progress: GoalProgress::initial(&input.target_metrics),
        target_metrics: input.target_metrics,
        start_date,
        target_date: input.target_date,
        status: if input.draft {
            GoalStatus::Draft
        } else {
            GoalStatus::Active
        },
        priority: input.priority,
        completion_percentage: 0.0,
        is_on_track: true,
        days_behind: 0,
        milestones,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    refresh_projection(&mut goal, today, policy);
    Ok(goal)
}

/// Apply an update; a metrics change of a different goal type is rejected and
/// a same-type change re-evaluates completion.
pub fn apply_update(
    goal: &mut LearningGoal,
    update: GoalUpdate,
    today: NaiveDate,
    now: DateTime<Utc>,
    policy: &GoalPolicy,
) -> Result<(), SchedulerError> {
    if goal.status.is_terminal() {
        return Err(SchedulerError::Conflict(format!(
            "goal {} is {} and can no longer be edited",
            goal.id,
            goal.status.as_str()
        )));
    }

    let title = match update.title {
        Some(title) => {
            validation::validate_goal_title(&title).map_err(SchedulerError::Validation)?;
            title.trim().to_string()
        }
        None => goal.title.clone(),
    };
    let target_date = update.target_date.unwrap_or(goal.target_date);
    validation::validate_goal_dates(goal.start_date, target_date)
        .map_err(SchedulerError::Validation)?;

    let metrics = match update.target_metrics {
        Some(metrics) => {
            if metrics.goal_type() != goal.goal_type {
                return Err(SchedulerError::validation(format!(
                    "cannot change goal type from {} to {}",
                    goal.goal_type.as_str(),
                    metrics.goal_type().as_str()
                )));
            }
            validation::validate_target_metrics(&metrics).map_err(SchedulerError::Validation)?;
            Some(metrics)
        }
        None => None,
    };

    let reshaped = metrics.is_some() || target_date != goal.target_date;
    goal.title = title;
    if let Some(description) = update.description {
        goal.description = description;
    }
    if let Some(priority) = update.priority {
        goal.priority = priority;
    }
    goal.target_date = target_date;
    if let Some(metrics) = metrics {
        goal.target_metrics = metrics;
    }

    if reshaped {
        if goal.milestones.iter().all(|m| !m.achieved) {
            goal.milestones = generate_milestones(&goal.target_metrics, goal.start_date, goal.target_date);
        }
        let progress = goal.current_progress.clone();
        return apply_progress(goal, progress, today, now, policy);
    }

    goal.updated_at = now;
    Ok(())
}

pub fn transition(
    goal: &mut LearningGoal,
    next: GoalStatus,
    now: DateTime<Utc>,
) -> Result<(), SchedulerError> {
    if !goal.status.can_transition_to(next) {
        return Err(SchedulerError::InvalidTransition {
            entity: "goal",
            from: goal.status.as_str().to_string(),
            to: next.as_str().to_string(),
        });
    }
    goal.status = next;
    goal.updated_at = now;
    if next == GoalStatus::Completed {
        goal.completed_at = Some(now);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgressReport {
    pub goal_id: String,
    pub status: GoalStatus,
    pub completion_percentage: f64,
    pub expected_progress: f64,
    pub is_on_track: bool,
    pub days_behind: u32,
    pub days_remaining: i64,
    pub milestones_achieved: usize,
    pub milestones_total: usize,
    pub next_milestone: Option<Milestone>,
}

pub fn progress_report(goal: &LearningGoal, today: NaiveDate, policy: &GoalPolicy) -> GoalProgressReport {
    let p = project(
        goal.start_date,
        goal.target_date,
        today,
        goal.completion_percentage,
        policy.on_track_tolerance,
    );
    GoalProgressReport {
        goal_id: goal.id.clone(),
        status: goal.status,
        completion_percentage: goal.completion_percentage,
        expected_progress: p.expected_progress,
        is_on_track: p.is_on_track,
        days_behind: p.days_behind,
        days_remaining: (goal.target_date - today).num_days().max(0),
        milestones_achieved: goal.milestones.iter().filter(|m| m.achieved).count(),
        milestones_total: goal.milestones.len(),
        next_milestone: goal.milestones.iter().find(|m| !m.achieved).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn vocab_goal(target: u32) -> LearningGoal {
        build_goal(
            "u1",
            NewGoal {
                title: "Learn 500 words".to_string(),
                description: None,
                target_metrics: TargetMetrics::VocabularyCount { target_words: target },
                start_date: Some(d(2026, 1, 1)),
                target_date: d(2026, 1, 31),
                priority: GoalPriority::High,
                draft: false,
                milestones: None,
            },
            d(2026, 1, 1),
            Utc::now(),
            &GoalPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn halfway_with_half_the_words_is_on_track() {
        let mut goal = vocab_goal(500);
        apply_progress(
            &mut goal,
            GoalProgress::VocabularyCount { words_mastered: 250 },
            d(2026, 1, 16),
            Utc::now(),
            &GoalPolicy::default(),
        )
        .unwrap();
        assert_eq!(goal.completion_percentage, 50.0);
        assert!(goal.is_on_track);
        assert_eq!(goal.days_behind, 0);
    }

    #[test]
    fn falling_behind_counts_days() {
        // 30-day goal, 20 days in, 10% done: expected 66.7, behind by 17 days
        let p = project(d(2026, 1, 1), d(2026, 1, 31), d(2026, 1, 21), 10.0, 10.0);
        assert!(!p.is_on_track);
        assert_eq!(p.days_behind, 17);
    }

    #[test]
    fn projection_clamps_outside_timeline() {
        let before = project(d(2026, 1, 10), d(2026, 1, 20), d(2026, 1, 1), 0.0, 10.0);
        assert_eq!(before.expected_progress, 0.0);
        assert!(before.is_on_track);

        let after = project(d(2026, 1, 10), d(2026, 1, 20), d(2026, 3, 1), 100.0, 10.0);
        assert_eq!(after.expected_progress, 100.0);
        assert_eq!(after.days_behind, 0);

        let same_day = project(d(2026, 1, 10), d(2026, 1, 10), d(2026, 1, 10), 0.0, 10.0);
        assert_eq!(same_day.total_days, 1);
    }

    #[test]
    fn reaching_target_completes_goal_and_milestones() {
        let mut goal = vocab_goal(100);
        apply_progress(
            &mut goal,
            GoalProgress::VocabularyCount { words_mastered: 140 },
            d(2026, 1, 10),
            Utc::now(),
            &GoalPolicy::default(),
        )
        .unwrap();
        assert_eq!(goal.completion_percentage, 100.0);
        assert_eq!(goal.status, GoalStatus::Completed);
        assert!(goal.completed_at.is_some());
        assert!(goal.milestones.iter().all(|m| m.achieved));
    }

    #[test]
    fn mismatched_progress_is_permanent_error() {
        let mut goal = vocab_goal(100);
        let err = apply_progress(
            &mut goal,
            GoalProgress::TimeBased { minutes_studied: 5 },
            d(2026, 1, 10),
            Utc::now(),
            &GoalPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::Permanent(_)));
    }

    #[test]
    fn milestone_count_scales_with_duration() {
        assert_eq!(milestone_count(7), 2);
        assert_eq!(milestone_count(8), 4);
        assert_eq!(milestone_count(30), 4);
        assert_eq!(milestone_count(90), 6);
        assert_eq!(milestone_count(91), 8);

        let ms = generate_milestones(
            &TargetMetrics::VocabularyCount { target_words: 500 },
            d(2026, 1, 1),
            d(2026, 1, 31),
        );
        assert_eq!(ms.len(), 4);
        assert_eq!(ms.last().unwrap().target_value, 500.0);
        assert_eq!(ms.last().unwrap().target_date, d(2026, 1, 31));
        assert_eq!(ms[0].target_value, 125.0);
    }

    #[test]
    fn quiz_progress_ignores_other_topics() {
        let metrics = TargetMetrics::QuizScore {
            target_score: 90.0,
            topic: Some("Grammar".to_string()),
        };
        let current = GoalProgress::initial(&metrics);
        assert!(progress_from_quiz(&metrics, &current, 80.0, Some("History")).is_none());

        let next = progress_from_quiz(&metrics, &current, 80.0, Some("grammar")).unwrap();
        assert_eq!(
            next,
            GoalProgress::QuizScore {
                latest_score: 80.0,
                best_score: 80.0,
                attempts: 1
            }
        );
    }

    #[test]
    fn exam_progress_keeps_running_average() {
        let metrics = TargetMetrics::ExamPreparation {
            target_score: 80.0,
            topics: vec![],
        };
        let first = progress_from_quiz(&metrics, &GoalProgress::initial(&metrics), 60.0, None).unwrap();
        let second = progress_from_quiz(&metrics, &first, 80.0, None).unwrap();
        assert_eq!(
            second,
            GoalProgress::ExamPreparation {
                average_score: 70.0,
                attempts: 2
            }
        );
    }

    #[test]
    fn goal_type_cannot_change_on_update() {
        let mut goal = vocab_goal(100);
        let err = apply_update(
            &mut goal,
            GoalUpdate {
                target_metrics: Some(TargetMetrics::TimeBased { target_minutes: 60 }),
                ..Default::default()
            },
            d(2026, 1, 5),
            Utc::now(),
            &GoalPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[test]
    fn paused_goal_cannot_complete_directly() {
        let mut goal = vocab_goal(100);
        transition(&mut goal, GoalStatus::Paused, Utc::now()).unwrap();
        assert!(matches!(
            transition(&mut goal, GoalStatus::Completed, Utc::now()),
            Err(SchedulerError::InvalidTransition { .. })
        ));
        transition(&mut goal, GoalStatus::Active, Utc::now()).unwrap();
    }
}
