#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use tempfile::TempDir;

use study_scheduler::policy::SchedulerPolicy;
use study_scheduler::scheduler::SchedulerService;
use study_scheduler::store::Store;

pub struct TestEnv {
    pub store: Arc<Store>,
    pub service: Arc<SchedulerService>,
    _temp_dir: TempDir,
}

pub fn setup() -> TestEnv {
    setup_with_policy(SchedulerPolicy::default())
}

pub fn setup_with_policy(policy: SchedulerPolicy) -> TestEnv {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let sled_path = temp_dir.path().join("scheduler-test.sled");
    let store = Arc::new(Store::open(sled_path.to_str().expect("db path")).expect("open store"));
    store.run_migrations().expect("migrations");
    let service = Arc::new(SchedulerService::new(store.clone(), policy));
    TestEnv {
        store,
        service,
        _temp_dir: temp_dir,
    }
}
