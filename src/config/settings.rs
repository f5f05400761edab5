use std::time::Duration;

use serde::Deserialize;

use crate::broker::{BrokerConfig, WorkerConfig};

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker, its workers and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub worker: WorkerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the broker.
///
/// Queue defaults and the idempotency window used by guarded consumers.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub visibility_timeout_ms: u64,
    pub max_retries: u32,
    pub idempotency_ttl_secs: u64,
}

/// Configuration settings for workers.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WorkerSettings {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub worker: Option<PartialWorkerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub visibility_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub idempotency_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialWorkerSettings {
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                visibility_timeout_ms: 30_000,
                max_retries: 3,
                idempotency_ttl_secs: 3600,
            },
            worker: WorkerSettings {
                poll_interval_ms: 100,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fill every value missing from `partial` with the default.
    pub fn merged(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let broker = partial.broker.unwrap_or_default();
        let worker = partial.worker.unwrap_or_default();
        let logging = partial.logging.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                visibility_timeout_ms: broker
                    .visibility_timeout_ms
                    .unwrap_or(default.broker.visibility_timeout_ms),
                max_retries: broker.max_retries.unwrap_or(default.broker.max_retries),
                idempotency_ttl_secs: broker
                    .idempotency_ttl_secs
                    .unwrap_or(default.broker.idempotency_ttl_secs),
            },
            worker: WorkerSettings {
                poll_interval_ms: worker
                    .poll_interval_ms
                    .unwrap_or(default.worker.poll_interval_ms),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}

impl BrokerSettings {
    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }
}

impl From<&BrokerSettings> for BrokerConfig {
    fn from(settings: &BrokerSettings) -> Self {
        BrokerConfig {
            default_visibility_timeout: Duration::from_millis(settings.visibility_timeout_ms),
            default_max_retries: settings.max_retries,
        }
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        WorkerConfig {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }
}
