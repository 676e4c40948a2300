//! Configuration validation utilities.

use tokio::sync::Semaphore;

use super::error::{ConfigError, ConfigResult};
use super::schema::{ConsumerSettings, EvbusConfig, ExecutorSettings, LogOutput, LoggingConfig};

/// Upper bound for `consumers.workers`.
pub const MAX_WORKERS: usize = 1024;

/// Validates the entire configuration.
pub fn validate_config(config: &EvbusConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_executor_settings(&config.executor)?;
    validate_consumer_settings(&config.consumers)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }

    if let Some(target) = logging.filters.keys().find(|t| t.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid log filter target: {target:?}"
        )));
    }

    Ok(())
}

fn validate_executor_settings(executor: &ExecutorSettings) -> ConfigResult<()> {
    if executor.max_concurrent_jobs > Semaphore::MAX_PERMITS {
        return Err(ConfigError::validation(format!(
            "executor.max_concurrent_jobs must be at most {}",
            Semaphore::MAX_PERMITS
        )));
    }
    Ok(())
}

fn validate_consumer_settings(consumers: &ConsumerSettings) -> ConfigResult<()> {
    if consumers.workers == 0 {
        return Err(ConfigError::validation(
            "consumers.workers must be greater than 0",
        ));
    }

    if consumers.workers > MAX_WORKERS {
        return Err(ConfigError::validation(format!(
            "consumers.workers must be at most {MAX_WORKERS}, got {}",
            consumers.workers
        )));
    }

    Ok(())
}
