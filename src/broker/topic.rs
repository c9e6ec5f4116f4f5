//! Notification topic
//!
//! A `Topic` owns a fixed list of subscribers, given at construction, and
//! fans every published envelope out to all of them.
//!
//! Delivery protocol:
//! - the envelope is validated, then durably recorded together with the list
//!   of subscribers still owed a delivery
//! - every subscriber's runner is driven concurrently; a failing subscriber
//!   never delays or prevents delivery to the others
//! - as each runner reaches a terminal outcome (delivered or dead-lettered)
//!   the subscriber is struck from the record; the record is deleted when
//!   none remain
//! - `recover` finishes any fan-out left pending, e.g. by a crash, delivering
//!   only to subscribers that had not yet finished. Delivery is therefore
//!   at-least-once per subscriber.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::broker::message::{NotificationEnvelope, PublishedEnvelope, SubscriberDeadLetter};
use crate::broker::runner::{DeliveryOutcome, RetryPolicy, SubscriberRunner};
use crate::persistence::sled_store::timestamped_key;
use crate::persistence::{MessageStore, TopicStore};
use crate::subscriber::{Subscriber, SubscriberId};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub envelope_id: String,
    pub outcomes: Vec<(SubscriberId, DeliveryOutcome)>,
}

impl PublishReport {
    pub fn outcome(&self, subscriber: &str) -> Option<&DeliveryOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == subscriber)
            .map(|(_, outcome)| outcome)
    }

    pub fn delivered(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Delivered { .. }))
    }

    pub fn dead_lettered(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::DeadLettered { .. }))
    }

    fn count(&self, pred: impl Fn(&DeliveryOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

#[derive(Debug)]
pub struct Topic {
    name: String,
    store: TopicStore,
    runners: Vec<SubscriberRunner>,
    clock: Arc<dyn Clock>,
}

impl Topic {
    pub fn new(
        name: &str,
        store: &MessageStore,
        subscribers: Vec<Arc<dyn Subscriber>>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        Self::with_clock(name, store, subscribers, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: &str,
        store: &MessageStore,
        subscribers: Vec<Arc<dyn Subscriber>>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store = store.topic(name)?;
        let mut seen = HashSet::new();
        let mut runners = Vec::with_capacity(subscribers.len());
        for subscriber in subscribers {
            if !seen.insert(subscriber.id().to_string()) {
                warn!(topic = %name, subscriber = %subscriber.id(), "ignoring duplicate subscriber id");
                continue;
            }
            runners.push(SubscriberRunner::new(
                subscriber,
                policy,
                store.clone(),
                clock.clone(),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            store,
            runners,
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.runners.iter().map(|r| r.id().to_string()).collect()
    }

    /// Record `envelope` and deliver it to every subscriber. Only rejection
    /// (invalid envelope, store down) is an error; per-subscriber failures
    /// are reported in the returned [`PublishReport`].
    pub async fn publish(&self, envelope: NotificationEnvelope) -> Result<PublishReport> {
        envelope.validate()?;

        let now = self.clock.now_millis();
        let published = PublishedEnvelope {
            id: timestamped_key(now),
            envelope,
            published_at: now,
            pending: self.subscriber_ids(),
        };

        if !published.pending.is_empty() {
            self.store
                .record(&published)
                .map_err(|e| self.unavailable(e))?;
        }
        info!(
            topic = %self.name,
            envelope_id = %published.id,
            subscribers = published.pending.len(),
            "published envelope"
        );

        Ok(self.fan_out(&published).await)
    }

    /// Finish every recorded fan-out that still has pending subscribers.
    pub async fn recover(&self) -> Result<Vec<PublishReport>> {
        let pending = self.store.pending().map_err(|e| self.unavailable(e))?;
        let mut reports = Vec::with_capacity(pending.len());

        for published in pending {
            for orphan in published
                .pending
                .iter()
                .filter(|id| !self.runners.iter().any(|r| r.id() == id.as_str()))
            {
                warn!(
                    topic = %self.name,
                    envelope_id = %published.id,
                    subscriber = %orphan,
                    "dropping pending delivery for unknown subscriber"
                );
                self.store.complete(&published.id, orphan)?;
            }

            info!(topic = %self.name, envelope_id = %published.id, "resuming fan-out");
            reports.push(self.fan_out(&published).await);
        }

        Ok(reports)
    }

    pub fn dead_letters(&self, subscriber: &str) -> Result<Vec<SubscriberDeadLetter>> {
        self.store.dead_letters(subscriber)
    }

    async fn fan_out(&self, published: &PublishedEnvelope) -> PublishReport {
        let deliveries = self
            .runners
            .iter()
            .filter(|runner| published.pending.iter().any(|id| id == runner.id()))
            .map(|runner| async move {
                let outcome = runner.deliver(&published.id, &published.envelope).await;
                if outcome.is_terminal() {
                    if let Err(e) = self.store.complete(&published.id, runner.id()) {
                        warn!(
                            topic = %self.name,
                            envelope_id = %published.id,
                            subscriber = %runner.id(),
                            "failed to record delivery outcome: {e}"
                        );
                    }
                }
                (runner.id().to_string(), outcome)
            });

        PublishReport {
            envelope_id: published.id.clone(),
            outcomes: join_all(deliveries).await,
        }
    }

    fn unavailable(&self, e: Error) -> Error {
        match e {
            Error::StoreUnavailable(reason) => Error::TopicUnavailable {
                topic: self.name.clone(),
                reason,
            },
            other => other,
        }
    }
}
