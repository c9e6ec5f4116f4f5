//! Message definitions for the notification broker
//!
//! `NotificationEnvelope` is what producers publish and what every subscriber
//! receives verbatim. The other two types are the durable records the topic
//! keeps while a fan-out is in progress and after a subscriber gives up.

use serde::{Deserialize, Serialize};

use crate::subscriber::SubscriberId;
use crate::utils::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub subject: String,
    pub body: String,
    pub recipient: String,
}

impl NotificationEnvelope {
    pub fn new(subject: &str, body: &str, recipient: &str) -> Self {
        Self {
            subject: subject.to_string(),
            body: body.to_string(),
            recipient: recipient.to_string(),
        }
    }

    /// Reject envelopes no subscriber could act on.
    pub fn validate(&self) -> Result<()> {
        if self.recipient.trim().is_empty() {
            return Err(Error::InvalidEnvelope("recipient is empty".to_string()));
        }
        if self.subject.trim().is_empty() {
            return Err(Error::InvalidEnvelope("subject is empty".to_string()));
        }
        Ok(())
    }
}

/// A published envelope whose fan-out has not finished for every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedEnvelope {
    pub id: String,
    pub envelope: NotificationEnvelope,
    pub published_at: i64,
    pub pending: Vec<SubscriberId>,
}

/// An envelope a subscriber failed to deliver within its retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberDeadLetter {
    pub envelope_id: String,
    pub envelope: NotificationEnvelope,
    pub subscriber: SubscriberId,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: i64,
}
