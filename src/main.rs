use std::sync::Arc;

use study_scheduler::config::Config;
use study_scheduler::events::{EventQueue, RecomputeWorker};
use study_scheduler::logging::{init_tracing, LogConfig};
use study_scheduler::policy::SchedulerPolicy;
use study_scheduler::scheduler::SchedulerService;
use study_scheduler::state::AppState;
use study_scheduler::store::Store;
use study_scheduler::workers::WorkerManager;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    init_tracing(&LogConfig::from(&config)).expect("Failed to initialise tracing");
    tracing::info!("Starting study-scheduler");

    let policy = SchedulerPolicy::from_env(&config.scheduler);
    if let Err(e) = policy.validate() {
        panic!("FATAL: invalid scheduler policy: {e}");
    }

    let store = Arc::new(Store::open(&config.sled_path).expect("Failed to open sled database"));
    store.run_migrations().expect("Failed to run migrations");

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    let service = Arc::new(SchedulerService::new(store.clone(), policy));
    let (events, event_rx) = EventQueue::new(config.recompute.queue_capacity);

    let state = AppState::new(
        store.clone(),
        service.clone(),
        events,
        &config,
        shutdown_tx.clone(),
    );

    let recompute = Arc::new(RecomputeWorker::new(service.clone(), &config.recompute));
    let recompute_handle = tokio::spawn(recompute.run(event_rx, state.shutdown_rx()));

    let worker_handle = if config.worker.is_leader {
        let worker_manager =
            WorkerManager::new(service.clone(), state.shutdown_rx(), &config.worker);
        Some(tokio::spawn(async move {
            if let Err(e) = worker_manager.start().await {
                tracing::error!(error = %e, "Worker manager failed");
            }
        }))
    } else {
        None
    };

    shutdown_signal(state.shutdown_tx().clone()).await;

    if let Err(e) = recompute_handle.await {
        tracing::error!(error = %e, "Recompute worker panicked");
    }
    if let Some(handle) = worker_handle {
        match handle.await {
            Err(e) => tracing::error!(error = %e, "Worker task panicked"),
            Ok(()) => tracing::info!("Worker manager exited normally"),
        }
    }

    tracing::info!(uptime_secs = state.uptime_secs(), "Flushing store before exit");
    if let Err(e) = store.flush() {
        tracing::error!(error = %e, "Failed to flush store before exit");
    }
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
