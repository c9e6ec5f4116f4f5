use super::*;
use crate::broker::message::NotificationEnvelope;
use crate::utils::error::Error;

use std::sync::Mutex;

#[derive(Default)]
struct RecordingMailer {
    fail: bool,
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> std::result::Result<String, MailerError> {
        if self.fail {
            return Err("ses throttled".into());
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok("msg-1".to_string())
    }
}

fn welcome() -> NotificationEnvelope {
    NotificationEnvelope::new("Hi", "Welcome", "a@x.com")
}

#[tokio::test]
async fn test_channel_subscriber_forwards_envelope() {
    let (subscriber, mut rx) = ChannelSubscriber::pair();
    assert!(!subscriber.id().is_empty());

    subscriber.deliver(&welcome()).await.unwrap();
    assert_eq!(rx.try_recv().unwrap(), welcome());
}

#[tokio::test]
async fn test_channel_subscriber_fails_when_receiver_dropped() {
    let (subscriber, rx) = ChannelSubscriber::pair();
    drop(rx);

    let err = subscriber.deliver(&welcome()).await.unwrap_err();
    assert!(matches!(err, Error::DeliveryFailed { .. }));
}

#[tokio::test]
async fn test_email_dispatcher_sends_one_email_per_envelope() {
    let dispatcher = EmailDispatcher::new("email", "noreply@example.com", RecordingMailer::default());
    dispatcher.deliver(&welcome()).await.unwrap();

    let sent = dispatcher.mailer().sent.lock().unwrap().clone();
    assert_eq!(
        sent,
        vec![OutgoingEmail {
            source: "noreply@example.com".into(),
            to: vec!["a@x.com".into()],
            subject: "Hi".into(),
            text_body: "Welcome".into(),
        }]
    );
}

#[tokio::test]
async fn test_email_dispatcher_reports_mailer_failure() {
    let mailer = RecordingMailer {
        fail: true,
        ..RecordingMailer::default()
    };
    let dispatcher = EmailDispatcher::new("email", "noreply@example.com", mailer);

    match dispatcher.deliver(&welcome()).await {
        Err(Error::DeliveryFailed { subscriber, reason }) => {
            assert_eq!(subscriber, "email");
            assert!(reason.contains("a@x.com"));
        }
        other => panic!("expected delivery failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_log_mailer_always_succeeds() {
    let dispatcher = EmailDispatcher::new("email", "noreply@example.com", LogMailer);
    assert!(dispatcher.deliver(&welcome()).await.is_ok());
}
