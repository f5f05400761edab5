//! Broker engine
//!
//! This module contains the registry that ties topics and queues together:
//! - creating topics and queues by name (idempotently)
//! - wiring queue subscriptions into topics
//! - routing publish calls to the right topic
//! - aggregating queue statistics
//!
//! Concurrency and usage notes:
//! - The registry maps are only locked long enough to look up or insert a
//!   handle. Publish and the queue operations run on the topic's and queue's
//!   own locks, so unrelated topics and queues never contend.
//! - `Broker` is meant to be shared as `Arc<Broker>`; every method takes `&self`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::broker::message::Message;
use crate::broker::queue::{Queue, QueueOptions, QueueStats};
use crate::broker::topic::Topic;
use crate::utils::error::{BrokerError, Result};

/// Defaults applied to queues created without explicit options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    pub default_visibility_timeout: Duration,
    pub default_max_retries: u32,
}

impl BrokerConfig {
    pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_visibility_timeout: Self::DEFAULT_VISIBILITY_TIMEOUT,
            default_max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Point-in-time view of the registry: how many topics and queues exist and
/// the counters of every queue, keyed by queue name in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub topic_count: usize,
    pub queue_count: usize,
    pub queues: BTreeMap<String, QueueStats>,
}

#[derive(Debug, Default)]
struct Registry {
    topics: HashMap<String, Arc<Topic>>,
    queues: HashMap<String, Arc<Queue>>,
}

/// Registry of named topics and queues
/// Owns the name-to-handle maps and routes publish calls to the right topic.
/// Topics and queues are created once and live as long as the broker; the
/// handles it returns are shared, so work done through a handle is visible
/// through every other handle to the same topic or queue.
#[derive(Debug, Default)]
pub struct Broker {
    registry: RwLock<Registry>,
    config: BrokerConfig,
}

impl Broker {
    /// Creates an empty broker
    /// `config` supplies the visibility timeout and retry budget for queues
    /// created without explicit options.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            config,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a topic, or return the existing one with the same name.
    pub fn create_topic(&self, name: &str) -> Arc<Topic> {
        let mut registry = self.write();
        if let Some(existing) = registry.topics.get(name) {
            return existing.clone();
        }

        let topic = Arc::new(Topic::new(name));
        registry.topics.insert(name.to_string(), topic.clone());
        info!(topic = %name, "created topic");
        topic
    }

    /// Looks up a topic by name
    /// Returns `None` if no topic with that name has been created.
    pub fn get_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.read().topics.get(name).cloned()
    }

    /// Create a queue, or return the existing one with the same name.
    ///
    /// Options only apply when the queue is first created.
    pub fn create_queue(&self, name: &str, options: QueueOptions) -> Arc<Queue> {
        let mut registry = self.write();
        if let Some(existing) = registry.queues.get(name) {
            return existing.clone();
        }

        let queue = Arc::new(Queue::new(
            name,
            options
                .visibility_timeout
                .unwrap_or(self.config.default_visibility_timeout),
            options.max_retries.unwrap_or(self.config.default_max_retries),
            options.dead_letter_queue,
        ));
        registry.queues.insert(name.to_string(), queue.clone());
        info!(
            queue = %name,
            visibility_timeout_ms = queue.visibility_timeout().as_millis() as u64,
            max_retries = queue.max_retries(),
            dlq = queue.dead_letter_queue().map(|q| q.name()).unwrap_or(""),
            "created queue"
        );
        queue
    }

    /// Looks up a queue by name
    /// Returns `None` if no queue with that name has been created.
    pub fn get_queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.read().queues.get(name).cloned()
    }

    /// Subscribe a registered queue to a registered topic.
    pub fn subscribe(&self, topic_name: &str, queue_name: &str) -> Result<()> {
        let registry = self.read();
        let topic = registry
            .topics
            .get(topic_name)
            .ok_or_else(|| BrokerError::TopicNotFound {
                topic: topic_name.to_string(),
            })?;
        let queue = registry
            .queues
            .get(queue_name)
            .ok_or_else(|| BrokerError::QueueNotFound {
                queue: queue_name.to_string(),
            })?;

        topic.subscribe(queue.clone());
        info!(topic = %topic_name, queue = %queue_name, "subscribed queue to topic");
        Ok(())
    }

    /// Publish to a topic by name. Returns the number of copies delivered.
    pub fn publish(&self, topic_name: &str, message: &Message) -> Result<usize> {
        self.topic(topic_name)?.publish(message)
    }

    /// Publish, abandoning subscribers not yet reached when `deadline` passes.
    pub fn publish_with_deadline(
        &self,
        topic_name: &str,
        message: &Message,
        deadline: Instant,
    ) -> Result<usize> {
        self.topic(topic_name)?.publish_until(message, deadline)
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        self.get_topic(name).ok_or_else(|| BrokerError::TopicNotFound {
            topic: name.to_string(),
        })
    }

    /// Collects statistics for every registered queue
    /// Each queue is sampled under its own lock, so the snapshot is consistent
    /// per queue but not across queues.
    pub fn stats(&self) -> BrokerStats {
        let registry = self.read();
        BrokerStats {
            topic_count: registry.topics.len(),
            queue_count: registry.queues.len(),
            queues: registry
                .queues
                .iter()
                .map(|(name, queue)| (name.clone(), queue.stats()))
                .collect(),
        }
    }
}
