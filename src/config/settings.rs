use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

use crate::broker::RetryPolicy;
use crate::queue::{QueueConfig, QueueEngine};

/// Top-level configuration settings for the application.
///
/// One section per component: the store, the work queue, the notification
/// topic and its email sender, the worker loop, and logging.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub store: StoreSettings,
    pub queue: QueueSettings,
    pub topic: TopicSettings,
    pub notify: NotifySettings,
    pub worker: WorkerSettings,
    pub logging: LoggingSettings,
}

/// Location of the sled database directory.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub path: String,
}

/// Configuration settings for the work queue.
///
/// Controls lease length, how long messages are kept, how many failed
/// receives a message survives, and the default batch size.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub name: String,
    pub visibility_timeout_secs: u64,
    pub retention_period_days: u64,
    pub max_receive_count: u32,
    pub batch_size: usize,
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

impl QueueSettings {
    pub fn queue_config(&self) -> Result<QueueConfig, ConfigError> {
        let retention_secs = self
            .retention_period_days
            .checked_mul(SECS_PER_DAY)
            .ok_or_else(|| {
                ConfigError::Message(format!(
                    "queue.retention_period_days is too large: {}",
                    self.retention_period_days
                ))
            })?;

        Ok(QueueConfig {
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            retention_period: Duration::from_secs(retention_secs),
            max_receive_count: self.max_receive_count,
            batch_size: self.batch_size,
        })
    }
}

/// Configuration settings for the notification topic and its retry policy.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TopicSettings {
    pub name: String,
    pub max_delivery_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl TopicSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_delivery_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NotifySettings {
    /// Verified sender address used as the source of every email.
    pub source_address: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub poll_interval_ms: u64,
    pub maintenance_interval_secs: u64,
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub store: Option<PartialStoreSettings>,
    pub queue: Option<PartialQueueSettings>,
    pub topic: Option<PartialTopicSettings>,
    pub notify: Option<PartialNotifySettings>,
    pub worker: Option<PartialWorkerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialStoreSettings {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialQueueSettings {
    pub name: Option<String>,
    pub visibility_timeout_secs: Option<u64>,
    pub retention_period_days: Option<u64>,
    pub max_receive_count: Option<u32>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTopicSettings {
    pub name: Option<String>,
    pub max_delivery_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialNotifySettings {
    pub source_address: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialWorkerSettings {
    pub poll_interval_ms: Option<u64>,
    pub maintenance_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fill every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let store = self.store.unwrap_or_default();
        let queue = self.queue.unwrap_or_default();
        let topic = self.topic.unwrap_or_default();
        let notify = self.notify.unwrap_or_default();
        let worker = self.worker.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            store: StoreSettings {
                path: store.path.unwrap_or(default.store.path),
            },
            queue: QueueSettings {
                name: queue.name.unwrap_or(default.queue.name),
                visibility_timeout_secs: queue
                    .visibility_timeout_secs
                    .unwrap_or(default.queue.visibility_timeout_secs),
                retention_period_days: queue
                    .retention_period_days
                    .unwrap_or(default.queue.retention_period_days),
                max_receive_count: queue
                    .max_receive_count
                    .unwrap_or(default.queue.max_receive_count),
                batch_size: queue.batch_size.unwrap_or(default.queue.batch_size),
            },
            topic: TopicSettings {
                name: topic.name.unwrap_or(default.topic.name),
                max_delivery_attempts: topic
                    .max_delivery_attempts
                    .unwrap_or(default.topic.max_delivery_attempts),
                initial_backoff_ms: topic
                    .initial_backoff_ms
                    .unwrap_or(default.topic.initial_backoff_ms),
                max_backoff_ms: topic.max_backoff_ms.unwrap_or(default.topic.max_backoff_ms),
            },
            notify: NotifySettings {
                source_address: notify
                    .source_address
                    .unwrap_or(default.notify.source_address),
            },
            worker: WorkerSettings {
                poll_interval_ms: worker
                    .poll_interval_ms
                    .unwrap_or(default.worker.poll_interval_ms),
                maintenance_interval_secs: worker
                    .maintenance_interval_secs
                    .unwrap_or(default.worker.maintenance_interval_secs),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}

impl Settings {
    /// Reject values the queue and topic would refuse at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = QueueEngine::MAX_BATCH_SIZE;
        if !(1..=max).contains(&self.queue.batch_size) {
            return Err(ConfigError::Message(format!(
                "queue.batch_size must be between 1 and {max}, got {}",
                self.queue.batch_size
            )));
        }
        if self.queue.visibility_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "queue.visibility_timeout_secs must be at least 1".into(),
            ));
        }
        self.queue.queue_config()?;
        if self.queue.max_receive_count == 0 {
            return Err(ConfigError::Message(
                "queue.max_receive_count must be at least 1".into(),
            ));
        }
        if self.topic.max_delivery_attempts == 0 {
            return Err(ConfigError::Message(
                "topic.max_delivery_attempts must be at least 1".into(),
            ));
        }
        if self.worker.maintenance_interval_secs == 0 {
            return Err(ConfigError::Message(
                "worker.maintenance_interval_secs must be at least 1".into(),
            ));
        }
        if self.notify.source_address.trim().is_empty() {
            return Err(ConfigError::Message(
                "notify.source_address must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings {
                path: "popq_db".to_string(),
            },
            queue: QueueSettings {
                name: "work".to_string(),
                visibility_timeout_secs: 30,
                retention_period_days: 14,
                max_receive_count: 3,
                batch_size: 10,
            },
            topic: TopicSettings {
                name: "notifications".to_string(),
                max_delivery_attempts: 3,
                initial_backoff_ms: 100,
                max_backoff_ms: 2000,
            },
            notify: NotifySettings {
                source_address: "noreply@example.com".to_string(),
            },
            worker: WorkerSettings {
                poll_interval_ms: 1000,
                maintenance_interval_secs: 30,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
