//! broker
//!
//! The in-process message broker: topics fan messages out to subscribed
//! queues, queues lease messages to consumers with visibility timeouts and
//! bounded retries, and workers drive the consume loop.
//!
//! Public types:
//! - `Broker`: registry of topics and queues, routes publish calls.
//! - `Topic`, `Queue`, `Message`: the delivery primitives.
//! - `Worker`, `MessageHandler`: the consumer side.
//! - `InMemoryIdempotencyStore`: dedup guard for redelivered messages.

pub mod engine;
pub mod idempotency;
pub mod message;
pub mod queue;
pub mod topic;
pub mod worker;

pub use engine::{Broker, BrokerConfig, BrokerStats};
pub use idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
pub use message::Message;
pub use queue::{Queue, QueueOptions, QueueStats};
pub use topic::Topic;
pub use worker::{IdempotentHandler, MessageHandler, Worker, WorkerConfig, WorkerStats};
