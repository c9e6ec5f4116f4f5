//! Batch processor
//!
//! Pulls bounded batches from a [`QueueEngine`] and hands each record to a
//! [`RecordHandler`]. What happens when a handler fails is decided by the
//! [`BatchPolicy`]:
//!
//! - `FailWholeBatch`: processing stops at the first error and nothing in the
//!   batch is acked, not even records the handler already finished. Every
//!   record stays leased until its visibility timeout, after which it is
//!   counted as a failure and redelivered. Consumers must therefore be
//!   idempotent.
//! - `PartialAck`: every record is handled; successes are acked and failures
//!   are nacked straight away.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::queue::engine::QueueEngine;
use crate::queue::message::{MessageId, ReceivedMessage};
use crate::utils::error::{Error, Result};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn handle(&self, record: &ReceivedMessage) -> std::result::Result<(), HandlerError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchPolicy {
    #[default]
    FailWholeBatch,
    PartialAck,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub received: usize,
    pub acked: Vec<MessageId>,
    pub failed: Vec<MessageId>,
}

#[derive(Debug, Clone)]
pub struct BatchProcessor {
    queue: QueueEngine,
    batch_size: usize,
    policy: BatchPolicy,
}

impl BatchProcessor {
    /// Processor using the queue's configured batch size.
    pub fn new(queue: QueueEngine) -> Self {
        let batch_size = queue.config().batch_size;
        Self {
            queue,
            batch_size,
            policy: BatchPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 || batch_size > QueueEngine::MAX_BATCH_SIZE {
            return Err(Error::InvalidBatchSize {
                size: batch_size,
                max: QueueEngine::MAX_BATCH_SIZE,
            });
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn queue(&self) -> &QueueEngine {
        &self.queue
    }

    /// Dequeue one batch and process it. Under `FailWholeBatch` a handler
    /// error is returned as `Error::BatchFailed`.
    pub async fn run_once<H>(&self, handler: &H) -> Result<BatchOutcome>
    where
        H: RecordHandler + ?Sized,
    {
        let batch = self.queue.dequeue(self.batch_size)?;
        let mut outcome = BatchOutcome {
            received: batch.len(),
            ..BatchOutcome::default()
        };
        if batch.is_empty() {
            return Ok(outcome);
        }

        match self.policy {
            BatchPolicy::FailWholeBatch => {
                for record in &batch {
                    if let Err(e) = handler.handle(record).await {
                        warn!(
                            queue = %self.queue.name(),
                            id = %record.id,
                            batch = batch.len(),
                            "handler failed, leaving batch unacked: {e}"
                        );
                        return Err(Error::BatchFailed {
                            message_id: record.id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
                for record in &batch {
                    if self.ack(&record.id)? {
                        outcome.acked.push(record.id.clone());
                    }
                }
            }
            BatchPolicy::PartialAck => {
                for record in &batch {
                    match handler.handle(record).await {
                        Ok(()) => {
                            if self.ack(&record.id)? {
                                outcome.acked.push(record.id.clone());
                            }
                        }
                        Err(e) => {
                            warn!(queue = %self.queue.name(), id = %record.id, "handler failed: {e}");
                            match self.queue.nack(&record.id, &record.receipt) {
                                Ok(_) | Err(Error::NotFound { .. }) => {}
                                Err(e) => return Err(e),
                            }
                            outcome.failed.push(record.id.clone());
                        }
                    }
                }
            }
        }

        debug!(
            queue = %self.queue.name(),
            received = outcome.received,
            acked = outcome.acked.len(),
            failed = outcome.failed.len(),
            "processed batch"
        );
        Ok(outcome)
    }

    /// Poll until `shutdown` flips to `true`. Sleeps `poll_interval` after an
    /// empty batch or a transient error; other errors end the loop.
    pub async fn run<H>(
        &self,
        handler: &H,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        H: RecordHandler + ?Sized,
    {
        info!(queue = %self.queue.name(), batch_size = self.batch_size, "batch processor started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_once(handler).await {
                Ok(outcome) => outcome.received == 0,
                Err(e) if e.is_transient() => {
                    debug!(queue = %self.queue.name(), "batch not completed: {e}");
                    true
                }
                Err(e) => return Err(e),
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!(queue = %self.queue.name(), "batch processor stopped");
        Ok(())
    }

    /// Ack, tolerating a message that already left the queue.
    fn ack(&self, id: &str) -> Result<bool> {
        match self.queue.ack(id) {
            Ok(()) => Ok(true),
            Err(Error::NotFound { .. }) => {
                debug!(queue = %self.queue.name(), %id, "message gone before ack");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
