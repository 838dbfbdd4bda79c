mod common;

use chrono::{Datelike, Duration, Utc};

use study_scheduler::scheduler::service::NewSchedule;
use study_scheduler::store::operations::daily_plans::PlanStatus;
use study_scheduler::store::operations::recommendations::{
    Recommendation, RecommendationPriority, RecommendationType,
};
use study_scheduler::store::operations::schedules::{AdaptationMode, ScheduleType};
use study_scheduler::workers::{daily_plan_generation, plan_rollover, recommendation_cleanup};

use common::fixtures::{history_plan, schedule_input};
use common::setup;

fn recommendation(user_id: &str, subject: &str, expires_in: Duration) -> Recommendation {
    let now = Utc::now();
    Recommendation {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        recommendation_type: RecommendationType::WeakTopicFocus,
        subject: subject.to_string(),
        title: format!("Focus on {subject}"),
        reason: "low scores".to_string(),
        priority: RecommendationPriority::High,
        relevance_score: 0.8,
        confidence_score: 0.7,
        expected_impact: 0.6,
        target_ids: Vec::new(),
        is_viewed: false,
        is_accepted: false,
        is_dismissed: false,
        viewed_at: None,
        acted_at: None,
        created_at: now - Duration::days(4),
        expires_at: now + expires_in,
    }
}

#[tokio::test]
async fn daily_generation_covers_active_schedules_once() {
    let env = setup();
    let now = Utc::now();
    let today = now.date_naive();

    env.service
        .create_schedule("u1", schedule_input(30, AdaptationMode::Moderate, true))
        .await
        .unwrap();

    env.service
        .create_schedule("u2", schedule_input(30, AdaptationMode::Moderate, true))
        .await
        .unwrap();
    env.service.generate_plan_at("u2", today, now).await.unwrap();

    let mut rest_day: NewSchedule = schedule_input(30, AdaptationMode::Flexible, true);
    rest_day.schedule_type = ScheduleType::Custom {
        study_days: vec![today.weekday().succ()],
    };
    rest_day.schedule_config.days_per_week = 1;
    env.service.create_schedule("u3", rest_day).await.unwrap();

    // 未激活的计划表不参与
    env.service
        .create_schedule("u4", schedule_input(30, AdaptationMode::Moderate, false))
        .await
        .unwrap();

    let stats = daily_plan_generation::generate_for_day(&env.service, now)
        .await
        .unwrap();
    assert_eq!(stats.generated, 1);
    assert_eq!(stats.already_planned, 1);
    assert_eq!(stats.rest_days, 1);
    assert_eq!(stats.failed, 0);

    let plan = env.service.get_plan("u1", today).await.unwrap();
    assert!(plan.schedule_id.is_some());
    assert!(env.store.get_daily_plan("u3", today).unwrap().is_none());
    assert!(env.store.get_daily_plan("u4", today).unwrap().is_none());

    let again = daily_plan_generation::generate_for_day(&env.service, now)
        .await
        .unwrap();
    assert_eq!(again.generated, 0);
    assert_eq!(again.already_planned, 2);
}

#[tokio::test]
async fn rollover_closes_stale_plans_and_refreshes_stats() {
    let env = setup();
    let now = Utc::now();
    let today = now.date_naive();
    let schedule = env
        .service
        .create_schedule("u1", schedule_input(30, AdaptationMode::Moderate, true))
        .await
        .unwrap();

    let seed = [
        (1, PlanStatus::Pending),
        (2, PlanStatus::InProgress),
        (3, PlanStatus::Completed),
        (0, PlanStatus::Pending),
    ];
    for (days_ago, status) in seed {
        env.store
            .create_daily_plan(&history_plan(
                "u1",
                &schedule.id,
                today - Duration::days(days_ago),
                status,
                Some(80.0),
            ))
            .unwrap();
    }
    // 所属计划表已删除的旧计划也要收尾
    env.store
        .create_daily_plan(&history_plan(
            "u2",
            "deleted-schedule",
            today - Duration::days(1),
            PlanStatus::Pending,
            None,
        ))
        .unwrap();

    let stats = plan_rollover::rollover(&env.service, now).await.unwrap();
    assert_eq!(stats.closed, 3);
    assert_eq!(stats.schedules_refreshed, 1);

    let yesterday = env
        .service
        .get_plan("u1", today - Duration::days(1))
        .await
        .unwrap();
    assert_eq!(yesterday.status, PlanStatus::Skipped);
    let started = env
        .service
        .get_plan("u1", today - Duration::days(2))
        .await
        .unwrap();
    assert_eq!(started.status, PlanStatus::PartiallyCompleted);
    let current = env.service.get_plan("u1", today).await.unwrap();
    assert_eq!(current.status, PlanStatus::Pending);

    let refreshed = env.service.get_schedule("u1", &schedule.id).await.unwrap();
    assert_eq!(refreshed.stats.total_days_scheduled, 3);
    assert_eq!(refreshed.stats.days_completed, 1);
    assert_eq!(refreshed.stats.days_missed, 1);
    assert_eq!(refreshed.stats.days_partial, 1);

    let second = plan_rollover::rollover(&env.service, now).await.unwrap();
    assert_eq!(second.closed, 0);
}

#[tokio::test]
async fn cleanup_purges_only_expired_recommendations() {
    let env = setup();
    env.store
        .insert_recommendations(&[
            recommendation("u1", "Verbs", Duration::hours(-1)),
            recommendation("u1", "Food", Duration::hours(12)),
            recommendation("u2", "Travel", Duration::minutes(-5)),
        ])
        .unwrap();

    recommendation_cleanup::run(&env.store).await;

    let left = env.store.list_recommendations("u1").unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].subject, "Food");
    assert!(env.store.list_recommendations("u2").unwrap().is_empty());
}

#[tokio::test]
async fn job_entry_points_tolerate_an_empty_store() {
    let env = setup();
    daily_plan_generation::run(&env.service).await;
    plan_rollover::run(&env.service).await;
    recommendation_cleanup::run(&env.store).await;
    assert!(env.store.list_active_schedule_owners().unwrap().is_empty());
}
