//! Subscriber runner
//!
//! Drives one subscriber's delivery of one envelope to a terminal outcome:
//! up to `max_attempts` calls to `Subscriber::deliver` with doubling backoff
//! in between, then a durable subscriber-level dead letter if every attempt
//! failed. Runners for different subscribers never wait on each other.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::broker::message::{NotificationEnvelope, SubscriberDeadLetter};
use crate::persistence::TopicStore;
use crate::subscriber::Subscriber;
use crate::utils::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Retries exhausted; the envelope is in the subscriber's dead-letter store.
    DeadLettered { attempts: u32, error: String },
    /// Retries exhausted and the dead letter could not be written; the
    /// fan-out stays pending and is picked up again by `Topic::recover`.
    Undelivered { attempts: u32, error: String },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts }
            | Self::DeadLettered { attempts, .. }
            | Self::Undelivered { attempts, .. } => *attempts,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Undelivered { .. })
    }
}

pub struct SubscriberRunner {
    subscriber: Arc<dyn Subscriber>,
    policy: RetryPolicy,
    store: TopicStore,
    clock: Arc<dyn Clock>,
}

impl SubscriberRunner {
    pub fn new(
        subscriber: Arc<dyn Subscriber>,
        policy: RetryPolicy,
        store: TopicStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriber,
            policy,
            store,
            clock,
        }
    }

    pub fn id(&self) -> &str {
        self.subscriber.id()
    }

    pub async fn deliver(&self, envelope_id: &str, envelope: &NotificationEnvelope) -> DeliveryOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.subscriber.deliver(envelope).await {
                Ok(()) => {
                    debug!(subscriber = %self.id(), %envelope_id, attempt, "delivered envelope");
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    warn!(
                        subscriber = %self.id(),
                        %envelope_id,
                        attempt,
                        max_attempts,
                        "delivery failed: {e}"
                    );
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        let letter = SubscriberDeadLetter {
            envelope_id: envelope_id.to_string(),
            envelope: envelope.clone(),
            subscriber: self.id().to_string(),
            attempts: max_attempts,
            last_error: last_error.clone(),
            failed_at: self.clock.now_millis(),
        };

        match self.store.dead_letter(&letter) {
            Ok(()) => {
                info!(
                    subscriber = %self.id(),
                    %envelope_id,
                    attempts = max_attempts,
                    "envelope moved to subscriber dead-letter store"
                );
                DeliveryOutcome::DeadLettered {
                    attempts: max_attempts,
                    error: last_error,
                }
            }
            Err(e) => {
                error!(subscriber = %self.id(), %envelope_id, "failed to dead-letter envelope: {e}");
                DeliveryOutcome::Undelivered {
                    attempts: max_attempts,
                    error: last_error,
                }
            }
        }
    }
}

impl std::fmt::Debug for SubscriberRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRunner")
            .field("subscriber", &self.id())
            .field("policy", &self.policy)
            .finish()
    }
}
