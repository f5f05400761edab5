//! Queue: the delivery state machine
//!
//! A message moves `PENDING -> LEASED` on receive, then either leaves the queue
//! on acknowledge, returns to `PENDING` on nack, or is dead-lettered on nack once
//! its retry budget is spent. A lease that is neither acked nor nacked simply
//! lapses: the message becomes visible again after the visibility timeout.
//!
//! Concurrency notes:
//! - The message sequence and the counters live behind a single mutex, held for
//!   the whole scan-and-mutate of every operation.
//! - The dead-letter deposit happens after that lock is released, so a queue and
//!   its DLQ never hold their locks at the same time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::broker::message::Message;
use crate::utils::error::{BrokerError, Result};

pub const METADATA_ORIGINAL_QUEUE: &str = "original_queue";
pub const METADATA_FAILURE_REASON: &str = "failure_reason";
pub const FAILURE_MAX_RETRIES_EXCEEDED: &str = "max_retries_exceeded";

/// Running counters of a queue, plus its size at snapshot time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_received: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub current_size: usize,
}

/// Construction-time queue options. Unset fields take the broker defaults.
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    pub visibility_timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub dead_letter_queue: Option<Arc<Queue>>,
}

impl QueueOptions {
    /// Options with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn dead_letter_queue(mut self, dlq: Arc<Queue>) -> Self {
        self.dead_letter_queue = Some(dlq);
        self
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: Vec<Message>,
    stats: QueueStats,
}

/// A work queue with leases, retries and an optional dead-letter queue
/// Messages are kept in insertion order. `receive` leases the first visible
/// message for the visibility timeout and hands out a receipt handle; the
/// holder then settles it with `acknowledge` (removed for good) or `nack`
/// (made visible again, or dead-lettered once `max_retries` leases are spent).
/// A lease that is never settled simply lapses and the message is redelivered.
#[derive(Debug)]
pub struct Queue {
    name: String,
    visibility_timeout: Duration,
    max_retries: u32,
    dead_letter_queue: Option<Arc<Queue>>,
    state: Mutex<QueueState>,
}

impl Queue {
    /// Creates an empty queue
    /// Without a `dead_letter_queue`, messages that exhaust their retries are
    /// discarded and only counted in `total_failed`.
    pub fn new(
        name: &str,
        visibility_timeout: Duration,
        max_retries: u32,
        dead_letter_queue: Option<Arc<Queue>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            visibility_timeout,
            max_retries,
            dead_letter_queue,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn dead_letter_queue(&self) -> Option<&Arc<Queue>> {
        self.dead_letter_queue.as_ref()
    }

    // Every critical section leaves the state consistent, so a poisoned lock is safe to reuse.
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message to the tail of the queue.
    pub fn enqueue(&self, mut message: Message) -> Result<()> {
        if message.id.is_empty() {
            message.id = Uuid::new_v4().to_string();
        }

        let mut state = self.state();
        debug!(queue = %self.name, message_id = %message.id, "enqueued message");
        state.messages.push(message);
        state.stats.total_received += 1;
        state.stats.current_size = state.messages.len();
        Ok(())
    }

    /// Lease the first visible message in insertion order.
    ///
    /// An invisible (leased) message never blocks visible ones behind it.
    /// Returns a snapshot of the leased message; `Ok(None)` when nothing is
    /// currently visible.
    pub fn receive(&self) -> Result<Option<Message>> {
        let now = Utc::now();
        let deadline = lease_deadline(now, self.visibility_timeout);

        let mut state = self.state();
        let Some(message) = state.messages.iter_mut().find(|m| m.is_visible_at(now)) else {
            return Ok(None);
        };

        message.visible_at = Some(deadline);
        message.receipt_handle = Some(Uuid::new_v4().to_string());
        message.retry_count += 1;

        debug!(
            queue = %self.name,
            message_id = %message.id,
            retry_count = message.retry_count,
            "leased message"
        );

        Ok(Some(message.clone()))
    }

    /// Permanently remove the message holding `receipt_handle`.
    ///
    /// Fails with `InvalidReceipt` if no message currently carries that handle,
    /// which is the case after a settle or once the lease lapsed and the message
    /// was leased again. A failed call changes nothing.
    pub fn acknowledge(&self, receipt_handle: &str) -> Result<()> {
        let mut state = self.state();
        let index = position_of(&state.messages, receipt_handle)
            .ok_or_else(|| invalid_receipt(receipt_handle))?;

        let message = state.messages.remove(index);
        state.stats.total_processed += 1;
        state.stats.current_size = state.messages.len();

        debug!(queue = %self.name, message_id = %message.id, "acknowledged message");
        Ok(())
    }

    /// Return the leased message for redelivery, or dead-letter it once the
    /// retry budget is spent.
    pub fn nack(&self, receipt_handle: &str) -> Result<()> {
        let dead = {
            let mut state = self.state();
            let index = position_of(&state.messages, receipt_handle)
                .ok_or_else(|| invalid_receipt(receipt_handle))?;

            if state.messages[index].retry_count < self.max_retries {
                let message = &mut state.messages[index];
                message.visible_at = None;
                message.receipt_handle = None;
                debug!(queue = %self.name, message_id = %message.id, "nacked message, will retry");
                return Ok(());
            }

            let message = state.messages.remove(index);
            state.stats.total_failed += 1;
            state.stats.current_size = state.messages.len();
            message
        };

        self.dead_letter(dead);
        Ok(())
    }

    fn dead_letter(&self, message: Message) {
        let Some(dlq) = &self.dead_letter_queue else {
            error!(
                queue = %self.name,
                message_id = %message.id,
                "message exceeded max retries, no DLQ configured, discarding"
            );
            return;
        };

        let mut copy = message.fork();
        copy.set_metadata(METADATA_ORIGINAL_QUEUE, self.name.as_str());
        copy.set_metadata(METADATA_FAILURE_REASON, FAILURE_MAX_RETRIES_EXCEEDED);

        if let Err(e) = dlq.enqueue(copy) {
            error!(queue = %self.name, dlq = %dlq.name, "failed to dead-letter message: {e}");
            return;
        }

        info!(
            queue = %self.name,
            dlq = %dlq.name,
            message_id = %message.id,
            retries = message.retry_count,
            "message moved to DLQ after max retries"
        );
    }

    /// Snapshot of the queue's counters
    /// `current_size` counts leased and visible messages alike.
    pub fn stats(&self) -> QueueStats {
        let state = self.state();
        QueueStats {
            current_size: state.messages.len(),
            ..state.stats
        }
    }

    /// Number of messages held, leased or not.
    pub fn size(&self) -> usize {
        self.state().messages.len()
    }
}

fn position_of(messages: &[Message], receipt_handle: &str) -> Option<usize> {
    messages
        .iter()
        .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
}

fn invalid_receipt(receipt_handle: &str) -> BrokerError {
    BrokerError::InvalidReceipt {
        receipt: receipt_handle.to_string(),
    }
}

fn lease_deadline(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|timeout| now.checked_add_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
