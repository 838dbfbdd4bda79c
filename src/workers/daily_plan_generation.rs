use chrono::{DateTime, Utc};

use crate::error::SchedulerError;
use crate::scheduler::SchedulerService;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub generated: usize,
    pub already_planned: usize,
    pub rest_days: usize,
    pub failed: usize,
}

pub async fn run(service: &SchedulerService) {
    tracing::debug!("daily_plan_generation: start");
    match generate_for_day(service, Utc::now()).await {
        Ok(stats) => tracing::info!(
            generated = stats.generated,
            already_planned = stats.already_planned,
            rest_days = stats.rest_days,
            failed = stats.failed,
            "daily_plan_generation: done"
        ),
        Err(e) => tracing::error!(error = %e, "daily_plan_generation failed"),
    }
}

/// Generate today's plan for every user whose active schedule covers the
/// day. Users that already have a plan are left alone.
pub async fn generate_for_day(
    service: &SchedulerService,
    now: DateTime<Utc>,
) -> Result<GenerationStats, SchedulerError> {
    let today = now.date_naive();
    let mut stats = GenerationStats::default();

    for (user_id, schedule_id) in service.store().list_active_schedule_owners()? {
        let schedule = match service.store().get_schedule(&user_id, &schedule_id) {
            Ok(Some(s)) if s.is_active => s,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(user_id, schedule_id, error = %e, "Failed to load active schedule");
                stats.failed += 1;
                continue;
            }
        };
        if !schedule.schedule_type.covers(today) {
            stats.rest_days += 1;
            continue;
        }
        if service.store().get_daily_plan(&user_id, today)?.is_some() {
            stats.already_planned += 1;
            continue;
        }

        match service.generate_plan_at(&user_id, today, now).await {
            Ok(_) => stats.generated += 1,
            // 并发请求已抢先生成
            Err(SchedulerError::Conflict(_)) => stats.already_planned += 1,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to generate daily plan");
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}
