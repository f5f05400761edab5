//! # Fanout
//!
//! `fanout` is an in-process message broker that emulates cloud notification
//! topics fanning out to work queues. A producer publishes an event once and
//! every subscribed queue receives its own copy; consumers lease, acknowledge
//! or retry individual messages, with bounded retries and dead-letter fallback.
//!
//! ## Core Modules
//!
//! - `broker`: messages, topics, queues, workers and the idempotency guard.
//! - `config`: loads broker and worker settings from files and environment.
//! - `utils`: shared error taxonomy and logging setup.
//!
//! State is memory-resident and lives for the life of the process.

pub mod broker;
pub mod config;
pub mod utils;

pub use broker::{Broker, Message, Queue, QueueOptions, Topic, Worker};
pub use utils::error::{BrokerError, Result};

#[cfg(test)]
mod tests;
