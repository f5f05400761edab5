//! Worker: the poll-process-ack loop for one queue
//!
//! A worker leases one message at a time from its queue, runs the bound
//! handler, then acknowledges on success or nacks on failure. Empty polls and
//! receive errors put the loop to sleep for the poll interval; neither ends the
//! loop. Only `stop()` or the cancellation signal does, and both are checked
//! between messages, never during a handler call.
//!
//! If an acknowledgement fails the message stays leased until its visibility
//! timeout lapses and is then redelivered. Handlers that must not repeat side
//! effects can be wrapped with [`IdempotentHandler`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::broker::idempotency::IdempotencyStore;
use crate::broker::message::Message;
use crate::broker::queue::Queue;
use crate::utils::error::{BrokerError, Result};

/// Consumer callback. Any error is treated as "retry via nack".
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        self(message)
    }
}

/// Skips messages the store already saw within its TTL and marks a message
/// processed only after the inner handler succeeds.
pub struct IdempotentHandler {
    inner: Arc<dyn MessageHandler>,
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotentHandler {
    pub fn new(inner: Arc<dyn MessageHandler>, store: Arc<dyn IdempotencyStore>) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl MessageHandler for IdempotentHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        if self.store.is_processed(&message.id) {
            info!(message_id = %message.id, "message already processed, skipping");
            return Ok(());
        }

        self.inner.handle(message).await?;
        self.store.mark_processed(&message.id)?;
        Ok(())
    }
}

/// Tuning for the worker loop
/// `poll_interval` is how long the loop sleeps after an empty or failed receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Counters kept by a worker
/// `messages_processed` and `total_process_time` only advance when the ack
/// lands; `messages_failed` counts handler errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub total_process_time: Duration,
}

/// Consumes one queue with one handler
/// A worker is shared as `Arc<Worker>`: one task drives `start` while others
/// may call `stop`, `stats` or `is_running`. Messages are handled one at a
/// time, in the order the queue leases them.
pub struct Worker {
    name: String,
    queue: Arc<Queue>,
    handler: Arc<dyn MessageHandler>,
    config: WorkerConfig,
    stats: Mutex<WorkerStats>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl Worker {
    /// Creates a worker with the default poll interval.
    pub fn new(name: &str, queue: Arc<Queue>, handler: impl MessageHandler + 'static) -> Self {
        Self::with_config(name, queue, handler, WorkerConfig::default())
    }

    pub fn with_config(
        name: &str,
        queue: Arc<Queue>,
        handler: impl MessageHandler + 'static,
        config: WorkerConfig,
    ) -> Self {
        Self::from_parts(name, queue, Arc::new(handler), config)
    }

    /// A worker whose handler is guarded by `store`.
    pub fn idempotent(
        name: &str,
        queue: Arc<Queue>,
        handler: impl MessageHandler + 'static,
        store: Arc<dyn IdempotencyStore>,
        config: WorkerConfig,
    ) -> Self {
        let guarded = IdempotentHandler::new(Arc::new(handler), store);
        Self::from_parts(name, queue, Arc::new(guarded), config)
    }

    fn from_parts(
        name: &str,
        queue: Arc<Queue>,
        handler: Arc<dyn MessageHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            queue,
            handler,
            config,
            stats: Mutex::new(WorkerStats::default()),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the poll loop until `stop()` is called or `cancel` turns `true`.
    ///
    /// Returns immediately if the loop is already running. Returns
    /// `BrokerError::Cancelled` when the cancellation signal ended the loop.
    pub async fn start(&self, cancel: watch::Receiver<bool>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(worker = %self.name, queue = %self.queue.name(), "worker started");
        let result = self.run(cancel).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run(&self, cancel: watch::Receiver<bool>) -> Result<()> {
        loop {
            let cancelled = *cancel.borrow();
            if cancelled {
                info!(worker = %self.name, "worker cancelled");
                return Err(BrokerError::Cancelled);
            }
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(());
            }

            match self.queue.receive() {
                Ok(Some(message)) => self.process(message).await,
                Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    error!(worker = %self.name, "failed to receive message: {e}");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    async fn process(&self, message: Message) {
        let receipt = message.receipt_handle.clone().unwrap_or_default();
        let started = Instant::now();
        let outcome = self.handler.handle(&message).await;
        let elapsed = started.elapsed();

        if let Err(e) = outcome {
            self.stats_mut().messages_failed += 1;
            warn!(worker = %self.name, message_id = %message.id, "failed to process message: {e:#}");

            if let Err(nack_err) = self.queue.nack(&receipt) {
                error!(worker = %self.name, message_id = %message.id, "failed to nack message: {nack_err}");
            }
            return;
        }

        if let Err(ack_err) = self.queue.acknowledge(&receipt) {
            error!(worker = %self.name, message_id = %message.id, "failed to ack message: {ack_err}");
            return;
        }

        let mut stats = self.stats_mut();
        stats.messages_processed += 1;
        stats.total_process_time += elapsed;
    }

    /// Ask the loop to exit before its next iteration. Safe to call repeatedly;
    /// a stopped worker does not start again.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!(worker = %self.name, "worker stopped");
        }
    }

    /// Copy of the current counters.
    pub fn stats(&self) -> WorkerStats {
        *self.stats_mut()
    }

    fn stats_mut(&self) -> MutexGuard<'_, WorkerStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
