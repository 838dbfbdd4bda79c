pub mod daily_plan_generation;
pub mod plan_rollover;
pub mod recommendation_cleanup;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::config::WorkerConfig;
use crate::scheduler::SchedulerService;

/// Upper bound for a single job run.
const WORKER_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period for in-flight runs after shutdown is requested.
#[cfg(test)]
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 所有 worker 的枚举，编译期保证完整性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerName {
    DailyPlanGeneration,
    PlanRollover,
    RecommendationCleanup,
}

impl WorkerName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DailyPlanGeneration => "daily_plan_generation",
            Self::PlanRollover => "plan_rollover",
            Self::RecommendationCleanup => "recommendation_cleanup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: WorkerName,
    pub cron: &'static str,
    pub enabled: bool,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("job scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

pub struct WorkerManager {
    service: Arc<SchedulerService>,
    shutdown_rx: broadcast::Receiver<()>,
    config: WorkerConfig,
}

impl WorkerManager {
    pub fn new(
        service: Arc<SchedulerService>,
        shutdown_rx: broadcast::Receiver<()>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            service,
            shutdown_rx,
            config: config.clone(),
        }
    }

    /// Every cron job this node would run, enabled or not.
    pub fn planned_jobs(&self) -> Vec<JobSpec> {
        if !self.config.is_leader {
            return Vec::new();
        }

        vec![
            // 先收尾昨天的计划，再生成今天的
            JobSpec {
                name: WorkerName::PlanRollover,
                cron: "0 5 0 * * *",
                enabled: true,
            },
            JobSpec {
                name: WorkerName::DailyPlanGeneration,
                cron: "0 0 4 * * *",
                enabled: self.config.enable_daily_plans,
            },
            JobSpec {
                name: WorkerName::RecommendationCleanup,
                cron: "0 */30 * * * *",
                enabled: self.config.enable_recommendation_cleanup,
            },
        ]
    }

    /// Runs until the shutdown broadcast fires. Followers return immediately.
    pub async fn start(mut self) -> Result<(), WorkerError> {
        if !self.config.is_leader {
            tracing::info!("Not the worker leader; cron jobs stay off on this node");
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await?;
        let registered = self.register_jobs(&scheduler).await;
        scheduler.start().await?;
        tracing::info!(jobs = registered, "Worker manager started");

        let _ = self.shutdown_rx.recv().await;
        tracing::info!(
            drain_secs = DRAIN_TIMEOUT.as_secs(),
            "Worker manager stopping"
        );
        tokio::time::sleep(DRAIN_TIMEOUT).await;
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "Job scheduler did not shut down cleanly");
        }
        Ok(())
    }

    async fn register_jobs(&self, scheduler: &JobScheduler) -> usize {
        let mut registered = 0;
        for spec in self.planned_jobs() {
            if !spec.enabled {
                tracing::info!(worker = spec.name.as_str(), "Worker disabled by config");
                continue;
            }
            let service = self.service.clone();
            let added = match spec.name {
                WorkerName::DailyPlanGeneration => {
                    add_job(scheduler, &spec, move || {
                        let service = service.clone();
                        async move { daily_plan_generation::run(&service).await }
                    })
                    .await
                }
                WorkerName::PlanRollover => {
                    add_job(scheduler, &spec, move || {
                        let service = service.clone();
                        async move { plan_rollover::run(&service).await }
                    })
                    .await
                }
                WorkerName::RecommendationCleanup => {
                    add_job(scheduler, &spec, move || {
                        let store = service.store().clone();
                        async move { recommendation_cleanup::run(&store).await }
                    })
                    .await
                }
            };
            if added {
                registered += 1;
            }
        }
        registered
    }
}

/// Cleared on drop, so a panicking job does not block later runs.
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Wrap `run` with the overlap guard and [`WORKER_TIMEOUT`], then add it.
async fn add_job<Fut, F>(scheduler: &JobScheduler, spec: &JobSpec, mut run: F) -> bool
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let worker = spec.name.as_str();
    let running = Arc::new(AtomicBool::new(false));

    let job = Job::new_async(spec.cron, move |_uuid, _lock| {
        let Some(guard) = RunGuard::acquire(&running) else {
            tracing::warn!(worker, "Previous run still in progress; skipping this tick");
            return Box::pin(async {});
        };
        let fut = run();
        Box::pin(async move {
            let _guard = guard;
            let started = Instant::now();
            match tokio::time::timeout(WORKER_TIMEOUT, fut).await {
                Ok(()) => tracing::debug!(
                    worker,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Worker run finished"
                ),
                Err(_) => tracing::error!(
                    worker,
                    timeout_secs = WORKER_TIMEOUT.as_secs(),
                    "Worker run timed out"
                ),
            }
        })
    });

    let result = match job {
        Ok(job) => scheduler.add(job).await.map(|_| ()),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            tracing::info!(worker, cron = spec.cron, "Registered worker");
            true
        }
        Err(e) => {
            tracing::error!(worker, cron = spec.cron, error = %e, "Failed to register worker");
            false
        }
    }
}
