use super::*;
use crate::persistence::MessageStore;
use crate::persistence::sled_store::timestamped_key;
use crate::subscriber::{ChannelSubscriber, Subscriber};
use crate::utils::error::{Error, Result};

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Fails the first `failures` calls, then succeeds.
struct Scripted {
    id: String,
    failures: u32,
    calls: AtomicU32,
}

impl Scripted {
    fn new(id: &str, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            failures,
            calls: AtomicU32::new(0),
        })
    }

    fn always_failing(id: &str) -> Arc<Self> {
        Self::new(id, u32::MAX)
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subscriber for Scripted {
    fn id(&self) -> &str {
        &self.id
    }

    async fn deliver(&self, _envelope: &NotificationEnvelope) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(Error::DeliveryFailed {
                subscriber: self.id.clone(),
                reason: format!("attempt {} refused", call + 1),
            });
        }
        Ok(())
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

fn welcome() -> NotificationEnvelope {
    NotificationEnvelope::new("Hi", "Welcome", "a@x.com")
}

fn erased(subs: &[&Arc<Scripted>]) -> Vec<Arc<dyn Subscriber>> {
    subs.iter().map(|s| Arc::clone(s) as Arc<dyn Subscriber>).collect()
}

fn topic_with(store: &MessageStore, subscribers: Vec<Arc<dyn Subscriber>>) -> Topic {
    Topic::new("notifications", store, subscribers, fast_policy()).unwrap()
}

#[test]
fn test_envelope_validation() {
    assert!(welcome().validate().is_ok());
    assert!(matches!(
        NotificationEnvelope::new("Hi", "Welcome", " ").validate(),
        Err(Error::InvalidEnvelope(_))
    ));
    assert!(matches!(
        NotificationEnvelope::new("", "Welcome", "a@x.com").validate(),
        Err(Error::InvalidEnvelope(_))
    ));
}

#[test]
fn test_retry_policy_backoff_doubles_and_caps() {
    let policy = RetryPolicy {
        max_attempts: 10,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(350),
    };
    assert_eq!(policy.backoff(1), Duration::from_millis(100));
    assert_eq!(policy.backoff(2), Duration::from_millis(200));
    assert_eq!(policy.backoff(3), Duration::from_millis(350));
    assert_eq!(policy.backoff(40), Duration::from_millis(350));
}

#[tokio::test]
async fn test_fan_out_delivers_once_to_every_subscriber() {
    let store = MessageStore::temporary().unwrap();
    let subs = [Scripted::new("s1", 0), Scripted::new("s2", 0), Scripted::new("s3", 0)];
    let topic = topic_with(&store, erased(&[&subs[0], &subs[1], &subs[2]]));

    let report = topic.publish(welcome()).await.unwrap();

    assert_eq!(report.delivered(), 3);
    for sub in &subs {
        assert_eq!(sub.calls(), 1);
        assert_eq!(
            report.outcome(&sub.id),
            Some(&DeliveryOutcome::Delivered { attempts: 1 })
        );
    }
    assert!(store.topic("notifications").unwrap().pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_subscriber_does_not_block_others() {
    let store = MessageStore::temporary().unwrap();
    let s1 = Scripted::new("s1", 0);
    let s2 = Scripted::always_failing("s2");
    let s3 = Scripted::new("s3", 0);
    let topic = topic_with(&store, erased(&[&s1, &s2, &s3]));

    let report = topic.publish(welcome()).await.unwrap();

    assert_eq!(s1.calls(), 1);
    assert_eq!(s3.calls(), 1);
    assert_eq!(s2.calls(), 3);
    assert_eq!(report.delivered(), 2);
    assert_eq!(report.dead_lettered(), 1);
}

#[tokio::test]
async fn test_always_failing_subscriber_ends_in_dead_letter() {
    let store = MessageStore::temporary().unwrap();
    let email = Scripted::always_failing("email");
    let topic = topic_with(&store, erased(&[&email]));

    let report = topic.publish(welcome()).await.unwrap();

    assert_eq!(email.calls(), 3);
    match report.outcome("email") {
        Some(DeliveryOutcome::DeadLettered { attempts, error }) => {
            assert_eq!(*attempts, 3);
            assert!(error.contains("attempt 3 refused"));
        }
        other => panic!("expected dead letter, got {other:?}"),
    }

    let letters = topic.dead_letters("email").unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].envelope, welcome());
    assert_eq!(letters[0].envelope_id, report.envelope_id);
    assert_eq!(letters[0].attempts, 3);
    // the fan-out is finished, nothing left to recover
    assert!(topic.recover().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_flaky_subscriber_recovers_within_budget() {
    let store = MessageStore::temporary().unwrap();
    let flaky = Scripted::new("flaky", 2);
    let topic = topic_with(&store, erased(&[&flaky]));

    let report = topic.publish(welcome()).await.unwrap();
    assert_eq!(
        report.outcome("flaky"),
        Some(&DeliveryOutcome::Delivered { attempts: 3 })
    );
    assert!(topic.dead_letters("flaky").unwrap().is_empty());
}

#[tokio::test]
async fn test_publish_rejects_invalid_envelope() {
    let store = MessageStore::temporary().unwrap();
    let sub = Scripted::new("s1", 0);
    let topic = topic_with(&store, erased(&[&sub]));

    let err = topic
        .publish(NotificationEnvelope::new("Hi", "Welcome", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidEnvelope(_)));
    assert_eq!(sub.calls(), 0);
}

#[tokio::test]
async fn test_recover_resumes_only_pending_subscribers() {
    let store = MessageStore::temporary().unwrap();
    let done = Scripted::new("done", 0);
    let owed = Scripted::new("owed", 0);
    let topic = topic_with(&store, erased(&[&done, &owed]));

    // a fan-out interrupted after "done" finished
    let published = PublishedEnvelope {
        id: timestamped_key(1_000),
        envelope: welcome(),
        published_at: 1_000,
        pending: vec!["owed".into(), "ghost".into()],
    };
    store.topic("notifications").unwrap().record(&published).unwrap();

    let reports = topic.recover().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcomes.len(), 1);
    assert_eq!(owed.calls(), 1);
    assert_eq!(done.calls(), 0);
    assert!(store.topic("notifications").unwrap().pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_channel_subscribers_receive_envelope_verbatim() {
    let store = MessageStore::temporary().unwrap();
    let (a, mut rx_a) = ChannelSubscriber::pair();
    let (b, mut rx_b) = ChannelSubscriber::pair();
    let subscribers: Vec<Arc<dyn Subscriber>> = vec![Arc::new(a), Arc::new(b)];
    let topic = topic_with(&store, subscribers);

    topic.publish(welcome()).await.unwrap();
    assert_eq!(rx_a.try_recv().unwrap(), welcome());
    assert_eq!(rx_b.try_recv().unwrap(), welcome());
}

#[tokio::test]
async fn test_duplicate_subscriber_ids_are_ignored() {
    let store = MessageStore::temporary().unwrap();
    let first = Scripted::new("same", 0);
    let second = Scripted::new("same", 0);
    let topic = topic_with(&store, erased(&[&first, &second]));

    assert_eq!(topic.subscriber_ids(), vec!["same".to_string()]);
    topic.publish(welcome()).await.unwrap();
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);
}

#[tokio::test]
async fn test_topic_without_subscribers_records_nothing() {
    let store = MessageStore::temporary().unwrap();
    let topic = topic_with(&store, Vec::new());

    let report = topic.publish(welcome()).await.unwrap();
    assert!(report.outcomes.is_empty());
    assert!(topic.recover().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_publish_and_dead_letter_times_come_from_the_clock() {
    use crate::persistence::sled_store::key_timestamp;
    use crate::utils::clock::ManualClock;

    let store = MessageStore::temporary().unwrap();
    let clock = ManualClock::new(1_700_000_000_000);
    let email = Scripted::always_failing("email");
    let topic = Topic::with_clock(
        "notifications",
        &store,
        erased(&[&email]),
        fast_policy(),
        Arc::new(clock.clone()),
    )
    .unwrap();

    let report = topic.publish(welcome()).await.unwrap();
    assert_eq!(
        key_timestamp(report.envelope_id.as_bytes()),
        Some(1_700_000_000_000)
    );

    let letters = topic.dead_letters("email").unwrap();
    assert_eq!(letters[0].failed_at, 1_700_000_000_000);
}
