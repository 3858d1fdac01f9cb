//! Configuration types for the Packlink core.
//!
//! This module holds the static, process-level configuration: task runner
//! limits, queue retry policy, scheduler settings and logging. Per-shop values
//! that change at runtime (API key, default warehouse, runner status) live in
//! [`Settings`](crate::settings::Settings) instead.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for the Packlink core.
///
/// # Examples
///
/// ```rust
/// use packlink_core::config::{CoreConfig, RunnerConfig};
///
/// // Use default configuration
/// let config = CoreConfig::default();
///
/// // Custom configuration
/// let config = CoreConfig {
///     runner: RunnerConfig {
///         max_started_tasks: 4,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Task runner configuration
    pub runner: RunnerConfig,

    /// Queue configuration
    pub queue: QueueConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Task runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of queue items that may be in progress at once
    pub max_started_tasks: usize,

    /// Delay between two runner ticks when nothing wakes it up (in milliseconds)
    pub wakeup_delay_ms: u64,

    /// How long a runner status stays valid without being refreshed (in seconds)
    pub max_alive_time_secs: u64,

    /// Inactivity period after which a running item counts as expired,
    /// unless the task defines its own (in seconds)
    pub max_task_inactivity_secs: u64,

    /// Time to wait for in-flight executions on shutdown (in seconds)
    pub shutdown_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_started_tasks: num_cpus::get().max(1) * 2,
            wakeup_delay_ms: 5000,
            max_alive_time_secs: 60,
            max_task_inactivity_secs: 300,
            shutdown_timeout_secs: 30,
        }
    }
}

impl RunnerConfig {
    /// Create a runner configuration with a specific concurrency limit.
    pub fn with_max_started_tasks(max_started_tasks: usize) -> Self {
        Self {
            max_started_tasks,
            ..Default::default()
        }
    }

    /// Set the wakeup delay.
    pub fn with_wakeup_delay(mut self, delay_ms: u64) -> Self {
        self.wakeup_delay_ms = delay_ms;
        self
    }

    /// Set the default task inactivity period.
    pub fn with_max_task_inactivity(mut self, secs: u64) -> Self {
        self.max_task_inactivity_secs = secs;
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }

    /// Idle time between ticks.
    pub fn wakeup_delay(&self) -> Duration {
        Duration::from_millis(self.wakeup_delay_ms)
    }

    /// Runner status lifetime, on the clock used for stored timestamps.
    pub fn max_alive_time(&self) -> chrono::Duration {
        i64::try_from(self.max_alive_time_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Default inactivity period of a running item.
    pub fn max_task_inactivity(&self) -> Duration {
        Duration::from_secs(self.max_task_inactivity_secs)
    }

    /// How long shutdown waits for in-flight executions.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How many times a failed item is put back in the queue
    pub max_retries: u32,

    /// Queue used by domain services when they enqueue work
    pub default_queue_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            default_queue_name: "packlink".to_string(),
        }
    }
}

impl QueueConfig {
    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the runner drives the scheduler on every tick
    pub enabled: bool,

    /// Queue that receives schedule check tasks
    pub queue_name: String,

    /// Minimum time between two schedule checks (in seconds)
    pub check_threshold_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_name: "packlink-scheduler".to_string(),
            check_threshold_secs: 60,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, overridden by `RUST_LOG`
    pub level: LogLevel,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            include_targets: false,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl CoreConfig {
    /// Create a new configuration optimized for development.
    pub fn development() -> Self {
        Self {
            runner: RunnerConfig {
                max_started_tasks: 2,
                wakeup_delay_ms: 1000,
                ..Default::default()
            },
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig {
                check_threshold_secs: 10,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Create a new configuration optimized for production.
    pub fn production() -> Self {
        Self {
            runner: RunnerConfig {
                max_started_tasks: num_cpus::get().max(1) * 4,
                shutdown_timeout_secs: 60,
                ..Default::default()
            },
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig {
                level: LogLevel::Info,
                json_format: true,
                include_targets: false,
            },
        }
    }

    /// Create a configuration for testing.
    pub fn testing() -> Self {
        Self {
            runner: RunnerConfig {
                max_started_tasks: 4,
                wakeup_delay_ms: 20,
                max_alive_time_secs: 5,
                max_task_inactivity_secs: 30,
                shutdown_timeout_secs: 5,
            },
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig {
                check_threshold_secs: 1,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.runner.max_started_tasks == 0 {
            errors.push("Max started tasks must be greater than 0".to_string());
        }

        if self.runner.wakeup_delay_ms == 0 {
            errors.push("Runner wakeup delay must be greater than 0".to_string());
        }

        if self.runner.max_alive_time_secs == 0 {
            errors.push("Runner max alive time must be greater than 0".to_string());
        }

        if self.runner.max_task_inactivity_secs == 0 {
            errors.push("Task inactivity period must be greater than 0".to_string());
        }

        if self.queue.default_queue_name.trim().is_empty() {
            errors.push("Default queue name must not be empty".to_string());
        }

        if self.scheduler.queue_name.trim().is_empty() {
            errors.push("Scheduler queue name must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert!(config.runner.max_started_tasks > 0);
        assert_eq!(config.queue.max_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        let development = CoreConfig::development();
        assert_eq!(development.runner.max_started_tasks, 2);
        assert_eq!(development.logging.level, LogLevel::Debug);
        assert!(development.validate().is_ok());

        let production = CoreConfig::production();
        assert!(production.logging.json_format);
        assert!(production.validate().is_ok());

        let testing = CoreConfig::testing();
        assert_eq!(testing.runner.wakeup_delay_ms, 20);
        assert!(testing.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = CoreConfig::default();
        config.runner.max_started_tasks = 0;
        config.scheduler.queue_name = " ".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("Max started tasks")));
        assert!(errors.iter().any(|e| e.contains("Scheduler queue name")));
    }

    #[test]
    fn test_runner_config_builders() {
        let config = RunnerConfig::with_max_started_tasks(8)
            .with_wakeup_delay(250)
            .with_max_task_inactivity(60)
            .with_shutdown_timeout(3);

        assert_eq!(config.max_started_tasks, 8);
        assert_eq!(config.wakeup_delay_ms, 250);
        assert_eq!(config.max_task_inactivity_secs, 60);
        assert_eq!(config.shutdown_timeout_secs, 3);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = CoreConfig::production();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.runner.max_started_tasks, config.runner.max_started_tasks);
        assert_eq!(parsed.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_runner_durations() {
        let runner = CoreConfig::testing().runner;
        assert_eq!(runner.wakeup_delay(), Duration::from_millis(20));
        assert_eq!(runner.max_alive_time(), chrono::Duration::seconds(5));
        assert_eq!(runner.max_task_inactivity(), Duration::from_secs(30));
        assert_eq!(runner.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_queue_retries_builder() {
        let queue = QueueConfig::default().with_max_retries(0);
        assert_eq!(queue.max_retries, 0);
        assert_eq!(queue.default_queue_name, "packlink");
    }
}
