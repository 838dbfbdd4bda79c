use chrono::Utc;

use crate::store::Store;

pub async fn run(store: &Store) {
    tracing::debug!("recommendation_cleanup: start");
    match store.purge_all_expired_recommendations(Utc::now()) {
        Ok(count) => tracing::info!(purged = count, "recommendation_cleanup: done"),
        Err(e) => tracing::error!(error = %e, "recommendation_cleanup failed"),
    }
}
