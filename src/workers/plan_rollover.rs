use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::SchedulerError;
use crate::scheduler::SchedulerService;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolloverStats {
    pub closed: usize,
    pub schedules_refreshed: usize,
}

pub async fn run(service: &SchedulerService) {
    tracing::debug!("plan_rollover: start");
    match rollover(service, Utc::now()).await {
        Ok(stats) => tracing::info!(
            closed = stats.closed,
            schedules_refreshed = stats.schedules_refreshed,
            "plan_rollover: done"
        ),
        Err(e) => tracing::error!(error = %e, "plan_rollover failed"),
    }
}

/// Close every open plan dated before today, then refresh the stats of the
/// schedules those plans belong to.
pub async fn rollover(
    service: &SchedulerService,
    now: DateTime<Utc>,
) -> Result<RolloverStats, SchedulerError> {
    let mut stats = RolloverStats::default();
    let mut touched: BTreeSet<(String, String)> = BTreeSet::new();

    for mut plan in service.store().list_open_plans_before(now.date_naive())? {
        if plan.close(now) {
            service.store().put_daily_plan(&plan)?;
            stats.closed += 1;
            tracing::debug!(
                user_id = %plan.user_id,
                plan_date = %plan.plan_date,
                status = plan.status.as_str(),
                "Closed stale plan"
            );
        }
        if let Some(schedule_id) = plan.schedule_id.take() {
            touched.insert((plan.user_id, schedule_id));
        }
    }

    for (user_id, schedule_id) in service.store().list_active_schedule_owners()? {
        touched.insert((user_id, schedule_id));
    }

    for (user_id, schedule_id) in touched {
        match service.refresh_schedule_stats(&user_id, &schedule_id).await {
            Ok(_) => stats.schedules_refreshed += 1,
            Err(SchedulerError::NotFound { .. }) => {}
            Err(e) => tracing::warn!(user_id, schedule_id, error = %e, "Failed to refresh schedule stats"),
        }
    }
    Ok(stats)
}
