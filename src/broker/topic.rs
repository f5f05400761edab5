//! Topic management
//!
//! A `Topic` holds the ordered list of queues subscribed to a topic name and
//! fans every published message out to each of them.
//!
//! Notes:
//! - Subscriptions are not deduplicated; a queue subscribed twice receives two
//!   copies of every message.
//! - Publish works on a snapshot of the subscriber list taken under the read
//!   lock, so subscriptions made mid-publish do not see that message.
//! - Fan-out is best-effort: a subscriber whose enqueue fails is logged and
//!   skipped, and the remaining subscribers are still served.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use tracing::{error, warn};
use uuid::Uuid;

use crate::broker::message::Message;
use crate::broker::queue::Queue;
use crate::utils::error::{BrokerError, Result};

pub const METADATA_SOURCE_TOPIC: &str = "source_topic";
pub const METADATA_DELIVERY_ID: &str = "delivery_id";

/// A named fan-out point
/// Every message published to the topic is copied once per subscription, and
/// each copy gets its own id so subscriber queues never share state.
#[derive(Debug)]
pub struct Topic {
    name: String,
    subscribers: RwLock<Vec<Arc<Queue>>>,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a subscriber queue to the topic.
    pub fn subscribe(&self, queue: Arc<Queue>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(queue);
    }

    /// Number of subscriptions, counting a queue once per `subscribe` call.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver an independent copy of `message` to every subscriber.
    ///
    /// Returns the number of copies enqueued.
    pub fn publish(&self, message: &Message) -> Result<usize> {
        self.fan_out(message, None)
    }

    /// Like [`Topic::publish`], but stops before any subscriber reached after
    /// `deadline`. Copies already enqueued stay where they are.
    pub fn publish_until(&self, message: &Message, deadline: Instant) -> Result<usize> {
        self.fan_out(message, Some(deadline))
    }

    fn fan_out(&self, message: &Message, deadline: Option<Instant>) -> Result<usize> {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for (index, queue) in subscribers.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let remaining = subscribers.len() - index;
                warn!(
                    topic = %self.name,
                    delivered,
                    remaining,
                    "publish deadline exceeded, aborting fan-out"
                );
                return Err(BrokerError::DeadlineExceeded {
                    topic: self.name.clone(),
                    delivered,
                    remaining,
                });
            }

            let mut copy = message.fork();
            copy.set_metadata(METADATA_SOURCE_TOPIC, self.name.as_str());
            copy.set_metadata(METADATA_DELIVERY_ID, Uuid::new_v4().to_string());

            match queue.enqueue(copy) {
                Ok(()) => delivered += 1,
                Err(e) => error!(
                    topic = %self.name,
                    queue = %queue.name(),
                    "failed to deliver message to queue: {e}"
                ),
            }
        }

        Ok(delivered)
    }
}
