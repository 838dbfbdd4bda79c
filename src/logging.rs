use thiserror::Error;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_file_logs: false,
            log_dir: "./logs".to_string(),
        }
    }
}

impl From<&Config> for LogConfig {
    fn from(config: &Config) -> Self {
        Self {
            log_level: config.log_level.clone(),
            enable_file_logs: config.enable_file_logs,
            log_dir: config.log_dir.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log directory {dir}: {source}")]
    Appender {
        dir: String,
        #[source]
        source: InitError,
    },
}

fn file_appender(dir: &str) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("study-scheduler")
        .filename_suffix("log")
        .max_log_files(30)
        .build(dir)
        .map_err(|source| LoggingError::Appender {
            dir: dir.to_string(),
            source,
        })
}

/// Stdout always; daily-rotated JSON files when enabled.
///
/// Calling it again once a global subscriber exists leaves that subscriber
/// in place.
pub fn init_tracing(config: &LogConfig) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let file_layer = if config.enable_file_logs {
        let writer = file_appender(&config.log_dir)?;
        Some(fmt::layer().with_writer(writer).with_ansi(false).json())
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(file_layer);

    if subscriber.try_init().is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
    Ok(())
}
