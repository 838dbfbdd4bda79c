use chrono::{DateTime, NaiveDate, Timelike, Utc};

use crate::policy::PlanPolicy;
use crate::scheduler::signals::{self, DueItems, TopicScore};
use crate::store::operations::daily_plans::{
    DailyStudyPlan, PlanDifficulty, PlanPriority, PlanStatus, RecommendedTask, TaskPriority,
    TaskType,
};
use crate::store::operations::goals::{GoalType, LearningGoal, TargetMetrics};

/// Everything the generator looks at. Collected by the caller so that
/// generation itself has no side effects.
#[derive(Debug, Clone)]
pub struct PlanInputs<'a> {
    pub user_id: &'a str,
    pub plan_date: NaiveDate,
    pub now: DateTime<Utc>,
    pub schedule_id: Option<&'a str>,
    pub time_budget: u32,
    pub due: &'a DueItems,
    pub weak_topics: &'a [TopicScore],
    pub goals: &'a [LearningGoal],
    pub focus_areas: &'a [String],
}

fn task(
    task_type: TaskType,
    title: String,
    minutes: u32,
    priority: TaskPriority,
    reason: String,
    topic: Option<String>,
    target_ids: Vec<String>,
) -> RecommendedTask {
    RecommendedTask {
        task_type,
        title,
        target_ids,
        estimated_minutes: minutes,
        priority,
        reason,
        topic,
        completed: false,
        actual_minutes: None,
        accuracy: None,
    }
}

fn review_task(inputs: &PlanInputs<'_>, policy: &PlanPolicy) -> Option<RecommendedTask> {
    let budget = inputs.time_budget as f64;
    let cap_minutes = budget * policy.review_budget_share;
    let max_by_budget = (cap_minutes / policy.minutes_per_card).floor() as usize;
    let take = inputs
        .due
        .cards
        .len()
        .min(policy.review_max_cards)
        .min(max_by_budget);
    let minutes = (take as f64 * policy.minutes_per_card).min(cap_minutes).floor() as u32;
    if take == 0 || minutes < policy.min_review_minutes {
        return None;
    }

    let cards = &inputs.due.cards[..take];
    let topic = signals::dominant_tag(cards);
    let priority = if inputs.due.total_due > policy.high_due_count {
        TaskPriority::High
    } else {
        TaskPriority::Medium
    };
    let title = match &topic {
        Some(t) => format!("Review {take} {t} flashcards"),
        None => format!("Review {take} flashcards"),
    };
    Some(task(
        TaskType::FlashcardReview,
        title,
        minutes,
        priority,
        format!("{} cards are due for review", inputs.due.total_due),
        topic,
        cards.iter().map(|c| c.id.clone()).collect(),
    ))
}

fn goal_task_type(goal_type: GoalType) -> TaskType {
    match goal_type {
        GoalType::VocabularyCount => TaskType::FlashcardReview,
        GoalType::QuizScore | GoalType::ExamPreparation => TaskType::Quiz,
        GoalType::TopicMastery => TaskType::Reading,
        GoalType::TimeBased => TaskType::FreePractice,
    }
}

fn goal_topic(metrics: &TargetMetrics) -> Option<String> {
    match metrics {
        TargetMetrics::QuizScore { topic, .. } => topic.clone(),
        TargetMetrics::ExamPreparation { topics, .. } => topics.first().cloned(),
        TargetMetrics::TopicMastery { topic, .. } => Some(topic.clone()),
        TargetMetrics::VocabularyCount { .. } | TargetMetrics::TimeBased { .. } => None,
    }
}

fn days_until(goal: &LearningGoal, date: NaiveDate) -> i64 {
    (goal.target_date - date).num_days()
}

/// Highest priority first, then nearest deadline, then furthest behind.
fn pick_goal<'a>(goals: &'a [LearningGoal]) -> Option<&'a LearningGoal> {
    goals.iter().min_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.target_date.cmp(&b.target_date))
            .then_with(|| b.days_behind.cmp(&a.days_behind))
    })
}

fn goal_or_general_task(
    inputs: &PlanInputs<'_>,
    remaining: u32,
    policy: &PlanPolicy,
) -> RecommendedTask {
    if let Some(goal) = pick_goal(inputs.goals) {
        let urgent = !goal.is_on_track
            || (0..=policy.goal_deadline_days).contains(&days_until(goal, inputs.plan_date));
        let reason = if goal.is_on_track {
            format!("{:.0}% complete", goal.completion_percentage)
        } else {
            format!(
                "{:.0}% complete, {} days behind schedule",
                goal.completion_percentage, goal.days_behind
            )
        };
        return task(
            goal_task_type(goal.goal_type),
            format!("Work towards: {}", goal.title),
            remaining,
            if urgent {
                TaskPriority::High
            } else {
                TaskPriority::Medium
            },
            reason,
            goal_topic(&goal.target_metrics),
            vec![goal.id.clone()],
        );
    }

    let topic = inputs.focus_areas.first().cloned();
    let title = match &topic {
        Some(t) => format!("Study session: {t}"),
        None => "General study session".to_string(),
    };
    task(
        TaskType::Reading,
        title,
        remaining,
        TaskPriority::Medium,
        "Keep momentum with open study time".to_string(),
        topic,
        Vec::new(),
    )
}

fn plan_priority(inputs: &PlanInputs<'_>, policy: &PlanPolicy) -> PlanPriority {
    let deadline_close = inputs
        .goals
        .iter()
        .any(|g| (0..=policy.goal_deadline_days).contains(&days_until(g, inputs.plan_date)));
    if inputs.due.total_due > policy.critical_due_count {
        PlanPriority::Critical
    } else if inputs.due.total_due > policy.high_due_count || deadline_close {
        PlanPriority::High
    } else {
        PlanPriority::Normal
    }
}

fn plan_difficulty(tasks: &[RecommendedTask], policy: &PlanPolicy) -> PlanDifficulty {
    let high = tasks
        .iter()
        .filter(|t| t.priority == TaskPriority::High)
        .count();
    if high >= policy.hard_high_priority_tasks {
        PlanDifficulty::Hard
    } else if high >= 1 {
        PlanDifficulty::Medium
    } else {
        PlanDifficulty::Easy
    }
}

fn greeting(now: DateTime<Utc>) -> &'static str {
    match now.hour() {
        0..=11 => "Good morning!",
        12..=17 => "Good afternoon!",
        _ => "Good evening!",
    }
}

fn summary(
    now: DateTime<Utc>,
    tasks: &[RecommendedTask],
    total_minutes: u32,
    weak_topics: &[TopicScore],
    priority: PlanPriority,
) -> String {
    let mut lines = vec![format!(
        "{} Today's plan has {} task(s), about {} minutes:",
        greeting(now),
        tasks.len(),
        total_minutes
    )];
    for (i, t) in tasks.iter().enumerate() {
        lines.push(format!("{}. {} ({} min)", i + 1, t.title, t.estimated_minutes));
    }
    if !weak_topics.is_empty() {
        let names: Vec<&str> = weak_topics.iter().map(|w| w.topic.as_str()).collect();
        lines.push(format!("Extra attention today: {}.", names.join(", ")));
    }
    lines.push(
        match priority {
            PlanPriority::Critical => "There is a backlog to clear, one card at a time.",
            PlanPriority::High => "A focused session today keeps you on schedule.",
            PlanPriority::Normal => "Steady practice adds up. Have a good session!",
        }
        .to_string(),
    );
    lines.join("\n")
}

/// Compose a day's task list against the time budget.
///
/// Order of allocation: one review task, up to the configured number of
/// weak-topic quizzes while under the weak-topic share of the budget, then a
/// goal or general task for whatever remains. An otherwise empty plan gets a
/// single free-practice task.
pub fn generate(inputs: &PlanInputs<'_>, policy: &PlanPolicy) -> DailyStudyPlan {
    let budget = inputs.time_budget;
    let mut tasks: Vec<RecommendedTask> = Vec::new();
    let mut used: u32 = 0;

    if let Some(review) = review_task(inputs, policy) {
        used += review.estimated_minutes;
        tasks.push(review);
    }

    let weak_stop = budget as f64 * policy.weak_topic_budget_share;
    let mut weak_used: Vec<TopicScore> = Vec::new();
    for weak in inputs.weak_topics.iter().take(policy.weak_topic_task_count) {
        if used as f64 >= weak_stop {
            break;
        }
        let minutes = policy.weak_topic_task_minutes.min(budget.saturating_sub(used));
        if minutes == 0 {
            break;
        }
        used += minutes;
        weak_used.push(weak.clone());
        tasks.push(task(
            TaskType::Quiz,
            format!("Strengthen {}", weak.topic),
            minutes,
            TaskPriority::High,
            format!(
                "Average score {:.0}% over {} attempt(s)",
                weak.average_score, weak.attempts
            ),
            Some(weak.topic.clone()),
            Vec::new(),
        ));
    }

    let remaining = budget.saturating_sub(used);
    if remaining >= policy.min_goal_task_minutes {
        let t = goal_or_general_task(inputs, remaining, policy);
        used += t.estimated_minutes;
        tasks.push(t);
    }

    if tasks.is_empty() {
        let minutes = policy.fallback_task_minutes;
        used = minutes;
        tasks.push(task(
            TaskType::FreePractice,
            "Free practice".to_string(),
            minutes,
            TaskPriority::Low,
            "Nothing pressing today, explore at your own pace".to_string(),
            inputs.focus_areas.first().cloned(),
            Vec::new(),
        ));
    }

    let priority = plan_priority(inputs, policy);
    let difficulty = plan_difficulty(&tasks, policy);
    let summary = summary(inputs.now, &tasks, used, &weak_used, priority);
    let total_tasks_count = tasks.len() as u32;

    DailyStudyPlan {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: inputs.user_id.to_string(),
        plan_date: inputs.plan_date,
        schedule_id: inputs.schedule_id.map(str::to_string),
        recommended_tasks: tasks,
        total_estimated_minutes: used,
        priority,
        difficulty,
        summary,
        status: PlanStatus::Pending,
        completed_tasks_count: 0,
        total_tasks_count,
        completion_percentage: 0.0,
        actual_minutes_spent: 0,
        accuracy: None,
        started_at: None,
        completed_at: None,
        created_at: inputs.now,
        updated_at: inputs.now,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::store::operations::flashcards::Flashcard;
    use crate::store::operations::goals::{GoalPriority, GoalProgress, GoalStatus};

    fn due(n: usize, tag: &str) -> DueItems {
        let now = Utc::now();
        let cards = (0..n)
            .map(|i| Flashcard {
                id: format!("c{i}"),
                user_id: "u1".to_string(),
                front: format!("card {i}"),
                tags: vec![tag.to_string()],
                ease_factor: 2.5,
                repetitions: 1,
                interval_days: 1,
                next_review_date: Some(now - Duration::minutes(i as i64 + 1)),
                last_reviewed_at: None,
                created_at: now,
            })
            .collect();
        DueItems {
            cards,
            total_due: n,
        }
    }

    fn goal(goal_type_metrics: TargetMetrics, target_in_days: i64, on_track: bool) -> LearningGoal {
        let today = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        LearningGoal {
            id: "g1".to_string(),
            user_id: "u1".to_string(),
            title: "Pass the exam".to_string(),
            description: None,
            goal_type: goal_type_metrics.goal_type(),
            current_progress: GoalProgress::initial(&goal_type_metrics),
            target_metrics: goal_type_metrics,
            start_date: today - Duration::days(10),
            target_date: today + Duration::days(target_in_days),
            status: GoalStatus::Active,
            priority: GoalPriority::High,
            completion_percentage: 20.0,
            is_on_track: on_track,
            days_behind: if on_track { 0 } else { 4 },
            milestones: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    fn inputs<'a>(
        due: &'a DueItems,
        weak: &'a [TopicScore],
        goals: &'a [LearningGoal],
        focus: &'a [String],
        budget: u32,
    ) -> PlanInputs<'a> {
        PlanInputs {
            user_id: "u1",
            plan_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            now: Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap(),
            schedule_id: None,
            time_budget: budget,
            due,
            weak_topics: weak,
            goals,
            focus_areas: focus,
        }
    }

    #[test]
    fn backlog_without_goals_gets_one_capped_review_task() {
        let due = due(45, "Grammar");
        let plan = generate(&inputs(&due, &[], &[], &[], 30), &PlanPolicy::default());

        let reviews: Vec<_> = plan
            .recommended_tasks
            .iter()
            .filter(|t| t.task_type == TaskType::FlashcardReview)
            .collect();
        assert_eq!(reviews.len(), 1);
        assert!(reviews[0].target_ids.len() <= 20);
        assert!(reviews[0].estimated_minutes <= 12);
        assert_eq!(reviews[0].topic.as_deref(), Some("Grammar"));
        assert_eq!(plan.priority, PlanPriority::Critical);
        assert_eq!(plan.total_tasks_count as usize, plan.recommended_tasks.len());
        assert!(plan.summary.starts_with("Good morning!"));
    }

    #[test]
    fn tiny_review_is_omitted() {
        // 6 cards = 3 minutes, below the 5-minute floor
        let due = due(6, "Verbs");
        let plan = generate(&inputs(&due, &[], &[], &[], 30), &PlanPolicy::default());
        assert!(plan
            .recommended_tasks
            .iter()
            .all(|t| t.task_type != TaskType::FlashcardReview));
    }

    #[test]
    fn review_respects_budget_share() {
        let due = due(45, "Grammar");
        let plan = generate(&inputs(&due, &[], &[], &[], 20), &PlanPolicy::default());
        let review = &plan.recommended_tasks[0];
        assert_eq!(review.estimated_minutes, 8);
        assert_eq!(review.target_ids.len(), 16);
    }

    #[test]
    fn weak_topics_stop_at_seventy_percent() {
        let due = due(20, "Grammar");
        let weak = vec![
            TopicScore { topic: "Tenses".into(), average_score: 40.0, attempts: 2 },
            TopicScore { topic: "Verbs".into(), average_score: 55.0, attempts: 3 },
            TopicScore { topic: "Nouns".into(), average_score: 65.0, attempts: 1 },
        ];
        let plan = generate(&inputs(&due, &weak, &[], &[], 30), &PlanPolicy::default());
        let quizzes: Vec<_> = plan
            .recommended_tasks
            .iter()
            .filter(|t| t.task_type == TaskType::Quiz)
            .collect();
        // review 10 + first weak 15 = 25 >= 21, so only one weak task
        assert_eq!(quizzes.len(), 1);
        assert_eq!(quizzes[0].topic.as_deref(), Some("Tenses"));
        assert!(plan.summary.contains("Tenses"));

        let big = generate(&inputs(&due, &weak, &[], &[], 60), &PlanPolicy::default());
        let weak_tasks = big
            .recommended_tasks
            .iter()
            .filter(|t| t.task_type == TaskType::Quiz)
            .count();
        assert_eq!(weak_tasks, 2);
        assert_eq!(big.difficulty, PlanDifficulty::Hard);
    }

    #[test]
    fn goal_task_uses_goal_type_and_remaining_time() {
        let goals = vec![goal(
            TargetMetrics::QuizScore { target_score: 90.0, topic: Some("History".into()) },
            30,
            true,
        )];
        let empty = DueItems::default();
        let plan = generate(&inputs(&empty, &[], &goals, &[], 30), &PlanPolicy::default());
        assert_eq!(plan.recommended_tasks.len(), 1);
        let t = &plan.recommended_tasks[0];
        assert_eq!(t.task_type, TaskType::Quiz);
        assert_eq!(t.estimated_minutes, 30);
        assert_eq!(t.topic.as_deref(), Some("History"));
        assert_eq!(t.target_ids, vec!["g1".to_string()]);
        assert_eq!(plan.priority, PlanPriority::Normal);
    }

    #[test]
    fn near_deadline_raises_plan_priority() {
        let goals = vec![goal(TargetMetrics::TimeBased { target_minutes: 600 }, 5, false)];
        let empty = DueItems::default();
        let plan = generate(&inputs(&empty, &[], &goals, &[], 30), &PlanPolicy::default());
        assert_eq!(plan.priority, PlanPriority::High);
        assert_eq!(plan.recommended_tasks[0].task_type, TaskType::FreePractice);
        assert_eq!(plan.recommended_tasks[0].priority, TaskPriority::High);
    }

    #[test]
    fn empty_inputs_with_small_budget_get_fallback() {
        let empty = DueItems::default();
        let plan = generate(&inputs(&empty, &[], &[], &[], 5), &PlanPolicy::default());
        assert_eq!(plan.recommended_tasks.len(), 1);
        assert_eq!(plan.recommended_tasks[0].task_type, TaskType::FreePractice);
        assert_eq!(plan.total_tasks_count, 1);
        assert_eq!(plan.difficulty, PlanDifficulty::Easy);
    }

    #[test]
    fn general_task_uses_focus_area() {
        let empty = DueItems::default();
        let focus = vec!["Listening".to_string()];
        let plan = generate(&inputs(&empty, &[], &[], &focus, 25), &PlanPolicy::default());
        assert_eq!(plan.recommended_tasks[0].task_type, TaskType::Reading);
        assert_eq!(plan.recommended_tasks[0].topic.as_deref(), Some("Listening"));
    }
}
