//! Queue engine
//!
//! This module owns every state transition of a queued message:
//! - `enqueue` creates a visible message
//! - `dequeue` claims up to ten visible messages by leasing them for the
//!   visibility timeout
//! - `ack` deletes a message, `nack` counts a failed lease and either makes
//!   the message visible again or parks it in the dead-letter queue
//! - expired leases are counted as failures lazily, either by the next
//!   `dequeue` that scans past them or by the maintenance loop
//! - retention purges messages older than the retention period regardless
//!   of state
//!
//! Concurrency notes:
//! - There is no engine-wide lock. Every transition is a compare-and-swap on
//!   the stored record, so concurrent consumers can share one engine (it is
//!   cheap to clone) and a message is only ever claimed by one of them while
//!   its lease is live.
//! - Leases are advisory. A consumer that outlives the visibility timeout may
//!   see its message redelivered to someone else; consumers must be
//!   idempotent.

use std::sync::Arc;
use std::time::Duration;

use sled::IVec;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::persistence::sled_store::timestamped_key;
use crate::persistence::{DeadLetter, Location, MessageStore, QueueStore, StoredMessage, StoredState};
use crate::queue::message::{MessageId, MessageState, NackOutcome, ReapReport, ReceivedMessage};
use crate::utils::clock::{Clock, SystemClock, duration_millis};
use crate::utils::error::{Error, Result};

/// Per-queue policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub visibility_timeout: Duration,
    pub retention_period: Duration,
    /// A message whose receive count reaches this value is dead-lettered.
    pub max_receive_count: u32,
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            retention_period: Duration::from_secs(14 * 24 * 60 * 60),
            max_receive_count: 3,
            batch_size: QueueEngine::MAX_BATCH_SIZE,
        }
    }
}

#[derive(Clone)]
pub struct QueueEngine {
    name: String,
    store: QueueStore,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl QueueEngine {
    /// Largest batch a single `dequeue` may return.
    pub const MAX_BATCH_SIZE: usize = 10;

    pub fn new(name: &str, store: &MessageStore, config: QueueConfig) -> Result<Self> {
        Self::with_clock(name, store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: &str,
        store: &MessageStore,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        check_batch_size(config.batch_size)?;
        if duration_millis(config.visibility_timeout) < 1 {
            return Err(Error::Config(::config::ConfigError::Message(
                "visibility timeout must be at least one millisecond".into(),
            )));
        }
        Ok(Self {
            name: name.to_string(),
            store: store.queue(name)?,
            config,
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append a new visible message. Fails only when the store is
    /// unavailable, which callers should treat as retryable.
    pub fn enqueue(&self, body: impl Into<Vec<u8>>) -> Result<MessageId> {
        let now = self.clock.now_millis();
        let msg = StoredMessage {
            id: timestamped_key(now),
            body: body.into(),
            enqueued_at: now,
            receive_count: 0,
            state: StoredState::Visible,
        };
        self.store.insert(&msg)?;
        debug!(queue = %self.name, id = %msg.id, "enqueued message");
        Ok(msg.id)
    }

    /// Lease up to `batch_size` visible messages. Returns immediately with
    /// whatever is available, possibly nothing.
    pub fn dequeue(&self, batch_size: usize) -> Result<Vec<ReceivedMessage>> {
        check_batch_size(batch_size)?;

        let now = self.clock.now_millis();
        let lease_until = now.saturating_add(duration_millis(self.config.visibility_timeout));
        let cutoff = self.retention_cutoff(now);
        let mut leased = Vec::with_capacity(batch_size);

        for entry in self.store.scan() {
            if leased.len() >= batch_size {
                break;
            }
            let (raw, msg) = entry?;

            if msg.enqueued_at < cutoff {
                if self.store.remove_if_unchanged(&msg.id, &raw)? {
                    debug!(queue = %self.name, id = %msg.id, "dropped message past retention");
                }
                continue;
            }

            let mut next = msg.clone();
            match msg.state {
                StoredState::Visible => {}
                StoredState::Leased { until, .. } if until > now => continue,
                StoredState::Leased { .. } => {
                    // lease ran out without an ack: count it before re-leasing
                    next.receive_count += 1;
                    if self.is_exhausted(next.receive_count) {
                        self.dead_letter(&raw, next, "lease expired", now)?;
                        continue;
                    }
                }
            }

            let receipt = Uuid::new_v4().to_string();
            next.state = StoredState::Leased {
                until: lease_until,
                receipt: receipt.clone(),
            };
            if self.store.compare_and_swap(&raw, &next)? {
                debug!(
                    queue = %self.name,
                    id = %next.id,
                    receive_count = next.receive_count,
                    "leased message"
                );
                leased.push(ReceivedMessage::leased(next, lease_until, receipt));
            }
        }

        Ok(leased)
    }

    /// Delete a message. `NotFound` means it was already acked,
    /// dead-lettered or purged; callers should treat that as benign.
    pub fn ack(&self, id: &str) -> Result<()> {
        if self.store.remove(id)? {
            debug!(queue = %self.name, %id, "acked message");
            Ok(())
        } else {
            debug!(queue = %self.name, %id, "ack for unknown message");
            Err(Error::not_found(id))
        }
    }

    /// Count a failed lease. The message is visible again immediately unless
    /// its receive budget is spent, in which case it is dead-lettered.
    ///
    /// `receipt` identifies the lease being given up. A receipt for a lease
    /// that already expired and was counted, or that another consumer has
    /// since replaced, changes nothing and yields `StaleLease`.
    pub fn nack(&self, id: &str, receipt: &str) -> Result<NackOutcome> {
        loop {
            let Some((raw, msg)) = self.store.get(id)? else {
                return Err(Error::not_found(id));
            };
            if let StoredState::Leased { receipt: current, .. } = &msg.state {
                if current != receipt {
                    debug!(queue = %self.name, %id, "nack for a lease no longer held");
                    return Ok(NackOutcome::StaleLease);
                }
            }
            let now = self.clock.now_millis();
            if let Some(outcome) = self.fail_lease(&raw, msg, "nack", now)? {
                return Ok(outcome);
            }
            // a concurrent transition won, look again
        }
    }

    /// Apply the implicit-timeout transition to every elapsed lease.
    pub fn reap_expired_leases(&self) -> Result<ReapReport> {
        let now = self.clock.now_millis();
        let mut report = ReapReport::default();

        for entry in self.store.scan() {
            let (raw, msg) = entry?;
            match msg.state {
                StoredState::Leased { until, .. } if until <= now => {}
                _ => continue,
            }
            match self.fail_lease(&raw, msg, "lease expired", now)? {
                Some(NackOutcome::Requeued { .. }) => report.requeued += 1,
                Some(NackOutcome::DeadLettered { .. }) => report.dead_lettered += 1,
                _ => {}
            }
        }

        Ok(report)
    }

    /// Drop messages, pending or dead-lettered, older than the retention
    /// period. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let cutoff = self.retention_cutoff(self.clock.now_millis());
        let (main, dead) = self.store.purge_older_than(cutoff)?;
        if main + dead > 0 {
            info!(
                queue = %self.name,
                pending = main,
                dead_lettered = dead,
                "purged messages past retention"
            );
        }
        Ok(main + dead)
    }

    pub fn state(&self, id: &str) -> Result<MessageState> {
        let now = self.clock.now_millis();
        Ok(match self.store.locate(id)? {
            Location::Main(msg) => match msg.state {
                StoredState::Leased { until, .. } if until > now => MessageState::Leased {
                    until,
                    receive_count: msg.receive_count,
                },
                _ => MessageState::Visible {
                    receive_count: msg.receive_count,
                },
            },
            Location::DeadLetter(letter) => MessageState::DeadLettered {
                receive_count: letter.message.receive_count,
            },
            Location::Absent => MessageState::Deleted,
        })
    }

    /// Messages in the main queue, leased or not.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        self.store.dead_letters(limit)
    }

    /// Operator action: return a dead letter to the main queue with a fresh
    /// receive budget.
    pub fn redrive(&self, id: &str) -> Result<()> {
        match self.store.redrive(id)? {
            Some(_) => {
                info!(queue = %self.name, %id, "redrove dead letter");
                Ok(())
            }
            None => Err(Error::not_found(id)),
        }
    }

    /// Periodically reap expired leases and purge retention. Runs until the
    /// task is dropped or aborted.
    pub async fn start_maintenance_loop(engine: QueueEngine, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;

            match engine.reap_expired_leases() {
                Ok(report) if report != ReapReport::default() => {
                    debug!(
                        queue = %engine.name,
                        requeued = report.requeued,
                        dead_lettered = report.dead_lettered,
                        "reaped expired leases"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(queue = %engine.name, "lease reaper failed: {e}"),
            }

            if let Err(e) = engine.purge_expired() {
                warn!(queue = %engine.name, "retention purge failed: {e}");
            }
        }
    }

    /// Count a failed lease on the record read as `raw`. `None` means the
    /// record changed underneath us.
    fn fail_lease(
        &self,
        raw: &IVec,
        msg: StoredMessage,
        reason: &str,
        now: i64,
    ) -> Result<Option<NackOutcome>> {
        if msg.state == StoredState::Visible {
            return Ok(Some(NackOutcome::AlreadyVisible));
        }

        let receive_count = msg.receive_count + 1;
        let next = StoredMessage {
            receive_count,
            state: StoredState::Visible,
            ..msg
        };

        if self.is_exhausted(receive_count) {
            let moved = self.dead_letter(raw, next, reason, now)?;
            return Ok(moved.then_some(NackOutcome::DeadLettered { receive_count }));
        }

        let swapped = self.store.compare_and_swap(raw, &next)?;
        if swapped {
            debug!(queue = %self.name, id = %next.id, receive_count, reason, "requeued message");
        }
        Ok(swapped.then_some(NackOutcome::Requeued { receive_count }))
    }

    fn dead_letter(&self, raw: &IVec, msg: StoredMessage, reason: &str, now: i64) -> Result<bool> {
        let id = msg.id.clone();
        let receive_count = msg.receive_count;
        let letter = DeadLetter {
            message: StoredMessage {
                state: StoredState::Visible,
                ..msg
            },
            reason: reason.to_string(),
            dead_lettered_at: now,
        };

        let moved = self.store.move_to_dead_letter(raw, &letter)?;
        if moved {
            info!(
                queue = %self.name,
                %id,
                receive_count,
                reason,
                "moved message to dead-letter queue"
            );
        }
        Ok(moved)
    }

    fn is_exhausted(&self, receive_count: u32) -> bool {
        receive_count >= self.config.max_receive_count
    }

    fn retention_cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(duration_millis(self.config.retention_period))
    }
}

impl std::fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEngine")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("store", &self.store)
            .finish()
    }
}

fn check_batch_size(size: usize) -> Result<()> {
    if size == 0 || size > QueueEngine::MAX_BATCH_SIZE {
        return Err(Error::InvalidBatchSize {
            size,
            max: QueueEngine::MAX_BATCH_SIZE,
        });
    }
    Ok(())
}
