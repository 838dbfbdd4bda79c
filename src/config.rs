use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKOFF_BASE_SECS, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_DAILY_LOAD_MINUTES,
    DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_RECOMMENDATION_CAP, DEFAULT_RECOMPUTE_MAX_RETRIES,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
    pub sled_path: String,
    pub worker: WorkerConfig,
    pub recompute: RecomputeConfig,
    pub scheduler: SchedulerEnvConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub is_leader: bool,
    pub enable_daily_plans: bool,
    pub enable_recommendation_cleanup: bool,
}

#[derive(Debug, Clone)]
pub struct RecomputeConfig {
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub recommendation_cap: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerEnvConfig {
    pub default_daily_load: u32,
    pub recommendation_lookback_days: i64,
}

impl RecomputeConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_secs(self.base_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

impl Default for RecomputeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            max_retries: DEFAULT_RECOMPUTE_MAX_RETRIES,
            base_backoff_secs: DEFAULT_BACKOFF_BASE_SECS,
            max_backoff_secs: DEFAULT_BACKOFF_MAX_SECS,
            recommendation_cap: DEFAULT_RECOMMENDATION_CAP,
        }
    }
}

impl Default for SchedulerEnvConfig {
    fn default() -> Self {
        Self {
            default_daily_load: DEFAULT_DAILY_LOAD_MINUTES,
            recommendation_lookback_days: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            log_level: env_or("RUST_LOG", "info"),
            enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
            log_dir: env_or("LOG_DIR", "./logs"),
            sled_path: env_or("SLED_PATH", "./data/scheduler.sled"),
            worker: WorkerConfig {
                is_leader: env_or_bool("WORKER_LEADER", true),
                enable_daily_plans: env_or_bool("ENABLE_DAILY_PLAN_WORKER", true),
                enable_recommendation_cleanup: env_or_bool(
                    "ENABLE_RECOMMENDATION_CLEANUP_WORKER",
                    true,
                ),
            },
            recompute: RecomputeConfig {
                queue_capacity: env_or_parse("RECOMPUTE_QUEUE_CAPACITY", DEFAULT_EVENT_QUEUE_CAPACITY),
                max_retries: env_or_parse("RECOMPUTE_MAX_RETRIES", DEFAULT_RECOMPUTE_MAX_RETRIES),
                base_backoff_secs: env_or_parse(
                    "RECOMPUTE_BASE_BACKOFF_SECS",
                    DEFAULT_BACKOFF_BASE_SECS,
                ),
                max_backoff_secs: env_or_parse("RECOMPUTE_MAX_BACKOFF_SECS", DEFAULT_BACKOFF_MAX_SECS),
                recommendation_cap: env_or_parse(
                    "RECOMPUTE_RECOMMENDATION_CAP",
                    DEFAULT_RECOMMENDATION_CAP,
                ),
            },
            scheduler: SchedulerEnvConfig {
                default_daily_load: env_or_parse(
                    "DEFAULT_DAILY_LOAD_MINUTES",
                    DEFAULT_DAILY_LOAD_MINUTES,
                ),
                recommendation_lookback_days: env_or_parse("RECOMMENDATION_LOOKBACK_DAYS", 30_i64),
            },
        }
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
