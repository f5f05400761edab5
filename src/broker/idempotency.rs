//! Idempotency guard
//!
//! Consumers consult the guard by message id before running side effects, so a
//! redelivered message (after a nack or an expired lease) can be collapsed into
//! a no-op. Entries expire lazily: an entry older than the TTL reads as absent,
//! and expired entries are dropped whenever a new id is marked.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::utils::error::Result;

/// Record of message ids whose side effects already ran
pub trait IdempotencyStore: Send + Sync {
    /// True if `message_id` was marked within the store's retention window.
    fn is_processed(&self, message_id: &str) -> bool;

    /// Record `message_id` as processed as of now.
    fn mark_processed(&self, message_id: &str) -> Result<()>;
}

/// Process-local store that keeps each id for `ttl` after it was marked
#[derive(Debug)]
pub struct InMemoryIdempotencyStore {
    processed: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
}

impl InMemoryIdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            processed: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of ids currently held, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.processed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn is_processed(&self, message_id: &str) -> bool {
        let processed = self.processed.read().unwrap_or_else(PoisonError::into_inner);
        processed
            .get(message_id)
            .is_some_and(|marked_at| marked_at.elapsed() <= self.ttl)
    }

    fn mark_processed(&self, message_id: &str) -> Result<()> {
        let mut processed = self.processed.write().unwrap_or_else(PoisonError::into_inner);
        processed.retain(|_, marked_at| marked_at.elapsed() <= self.ttl);
        processed.insert(message_id.to_string(), Instant::now());
        Ok(())
    }
}
