use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::broker::message::NotificationEnvelope;
use crate::subscriber::{Subscriber, SubscriberId};
use crate::utils::error::{Error, Result};

/// Subscriber backed by an unbounded channel. Delivery fails once the
/// receiving side has been dropped.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    pub id: SubscriberId,
    pub sender: UnboundedSender<NotificationEnvelope>,
}

impl ChannelSubscriber {
    pub fn new(id: &str, sender: UnboundedSender<NotificationEnvelope>) -> Self {
        Self {
            id: id.to_string(),
            sender,
        }
    }

    /// A subscriber with a generated id, and the receiver it feeds.
    pub fn pair() -> (Self, UnboundedReceiver<NotificationEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(&Uuid::new_v4().to_string(), tx), rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    fn id(&self) -> &str {
        &self.id
    }

    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<()> {
        self.sender
            .send(envelope.clone())
            .map_err(|_| Error::DeliveryFailed {
                subscriber: self.id.clone(),
                reason: "receiver dropped".to_string(),
            })
    }
}
