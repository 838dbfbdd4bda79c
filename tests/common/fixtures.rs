use chrono::{DateTime, Duration, NaiveDate, Utc};

use study_scheduler::scheduler::goals::NewGoal;
use study_scheduler::scheduler::service::NewSchedule;
use study_scheduler::store::operations::daily_plans::{
    DailyStudyPlan, PlanDifficulty, PlanPriority, PlanStatus, RecommendedTask, TaskPriority,
    TaskType,
};
use study_scheduler::store::operations::flashcards::Flashcard;
use study_scheduler::store::operations::goals::{GoalPriority, TargetMetrics};
use study_scheduler::store::operations::quiz_attempts::QuizAttempt;
use study_scheduler::store::operations::schedules::{
    ActivityDistribution, AdaptationMode, CatchUpStrategy, ScheduleConfig, ScheduleType,
};
use study_scheduler::store::Store;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn card(user_id: &str, id: &str, tag: &str, due: Option<DateTime<Utc>>) -> Flashcard {
    Flashcard {
        id: id.to_string(),
        user_id: user_id.to_string(),
        front: format!("front-{id}"),
        tags: vec![tag.to_string()],
        ease_factor: 2.5,
        repetitions: 0,
        interval_days: 0,
        next_review_date: due,
        last_reviewed_at: None,
        created_at: Utc::now() - Duration::days(10),
    }
}

pub fn mastered_card(user_id: &str, id: &str, tag: &str) -> Flashcard {
    Flashcard {
        repetitions: 4,
        ease_factor: 2.6,
        interval_days: 12,
        next_review_date: Some(Utc::now() + Duration::days(12)),
        last_reviewed_at: Some(Utc::now()),
        ..card(user_id, id, tag, None)
    }
}

pub fn seed_due_cards(store: &Store, user_id: &str, count: usize, tag: &str) -> Vec<Flashcard> {
    (0..count)
        .map(|i| {
            let c = card(
                user_id,
                &format!("{tag}-{i}"),
                tag,
                Some(Utc::now() - Duration::hours(i as i64 + 1)),
            );
            store.upsert_flashcard(&c).expect("upsert card");
            c
        })
        .collect()
}

pub fn attempt(user_id: &str, topic: Option<&str>, score: f64, at: DateTime<Utc>) -> QuizAttempt {
    QuizAttempt {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        quiz_id: "quiz-1".to_string(),
        topic: topic.map(str::to_string),
        score_percentage: score,
        time_spent_minutes: 10,
        completed_at: at,
    }
}

pub fn vocabulary_goal(target_words: u32, start: NaiveDate, target: NaiveDate) -> NewGoal {
    NewGoal {
        title: format!("Learn {target_words} words"),
        description: None,
        target_metrics: TargetMetrics::VocabularyCount { target_words },
        start_date: Some(start),
        target_date: target,
        priority: GoalPriority::High,
        draft: false,
        milestones: None,
    }
}

pub fn quiz_goal(target_score: f64, topic: Option<&str>, target: NaiveDate) -> NewGoal {
    NewGoal {
        title: "Ace the quizzes".to_string(),
        description: Some("quiz practice".to_string()),
        target_metrics: TargetMetrics::QuizScore {
            target_score,
            topic: topic.map(str::to_string),
        },
        start_date: None,
        target_date: target,
        priority: GoalPriority::Medium,
        draft: false,
        milestones: None,
    }
}

pub fn schedule_input(daily_minutes: u32, mode: AdaptationMode, activate: bool) -> NewSchedule {
    NewSchedule {
        name: "Evening routine".to_string(),
        schedule_type: ScheduleType::Daily,
        schedule_config: ScheduleConfig {
            daily_minutes,
            days_per_week: 7,
            activity_distribution: ActivityDistribution::default(),
            focus_areas: vec!["Grammar".to_string()],
        },
        adaptation_mode: mode,
        min_daily_load: Some(15),
        max_daily_load: Some(60),
        catch_up_strategy: CatchUpStrategy::Gradual,
        activate,
    }
}

/// A persisted plan in a given final state, for adjuster and stats history.
pub fn history_plan(
    user_id: &str,
    schedule_id: &str,
    plan_date: NaiveDate,
    status: PlanStatus,
    accuracy: Option<f64>,
) -> DailyStudyPlan {
    let now = Utc::now();
    let done = status == PlanStatus::Completed;
    DailyStudyPlan {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        plan_date,
        schedule_id: Some(schedule_id.to_string()),
        recommended_tasks: vec![RecommendedTask {
            task_type: TaskType::FreePractice,
            title: "Practice".to_string(),
            target_ids: vec![],
            estimated_minutes: 30,
            priority: TaskPriority::Medium,
            reason: "history".to_string(),
            topic: None,
            completed: done,
            actual_minutes: done.then_some(30),
            accuracy: if done { accuracy } else { None },
        }],
        total_estimated_minutes: 30,
        priority: PlanPriority::Normal,
        difficulty: PlanDifficulty::Medium,
        summary: "history".to_string(),
        status,
        completed_tasks_count: u32::from(done),
        total_tasks_count: 1,
        completion_percentage: if done { 100.0 } else { 0.0 },
        actual_minutes_spent: if done { 30 } else { 0 },
        accuracy: if done { accuracy } else { None },
        started_at: done.then_some(now),
        completed_at: done.then_some(now),
        created_at: now,
        updated_at: now,
    }
}
