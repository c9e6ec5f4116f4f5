//! Email dispatcher
//!
//! Turns each envelope into exactly one outgoing email: the envelope's
//! recipient becomes the single `To` address, its subject and body are sent
//! as plain text, and the configured verified sender is the source. The
//! actual transport sits behind the [`Mailer`] trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::broker::message::NotificationEnvelope;
use crate::subscriber::{Subscriber, SubscriberId};
use crate::utils::error::{Error, Result};

pub type MailerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub source: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one email, returning the transport's message id.
    async fn send(&self, email: &OutgoingEmail) -> std::result::Result<String, MailerError>;
}

/// Mailer that only logs what it would send.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> std::result::Result<String, MailerError> {
        let message_id = Uuid::new_v4().to_string();
        info!(
            source = %email.source,
            to = ?email.to,
            subject = %email.subject,
            %message_id,
            "email sent"
        );
        Ok(message_id)
    }
}

#[derive(Debug, Clone)]
pub struct EmailDispatcher<M> {
    id: SubscriberId,
    source_address: String,
    mailer: M,
}

impl<M: Mailer> EmailDispatcher<M> {
    pub fn new(id: &str, source_address: &str, mailer: M) -> Self {
        Self {
            id: id.to_string(),
            source_address: source_address.to_string(),
            mailer,
        }
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    pub fn compose(&self, envelope: &NotificationEnvelope) -> OutgoingEmail {
        OutgoingEmail {
            source: self.source_address.clone(),
            to: vec![envelope.recipient.clone()],
            subject: envelope.subject.clone(),
            text_body: envelope.body.clone(),
        }
    }
}

#[async_trait]
impl<M: Mailer> Subscriber for EmailDispatcher<M> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<()> {
        let email = self.compose(envelope);
        match self.mailer.send(&email).await {
            Ok(message_id) => {
                info!(recipient = %envelope.recipient, %message_id, "email dispatched");
                Ok(())
            }
            Err(e) => {
                error!(recipient = %envelope.recipient, "error sending email: {e}");
                Err(Error::DeliveryFailed {
                    subscriber: self.id.clone(),
                    reason: format!("failed to send email to {}: {e}", envelope.recipient),
                })
            }
        }
    }
}
