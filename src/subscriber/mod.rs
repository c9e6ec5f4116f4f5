//! The `subscriber` module defines the delivery endpoints a notification
//! topic fans out to.
//!
//! A [`Subscriber`] performs one side-effecting delivery per call and reports
//! failure with `Error::DeliveryFailed`; retrying is the runner's job, not the
//! subscriber's. Subscribers share no mutable state with each other.
//!
//! Implementations:
//! - [`ChannelSubscriber`]: forwards envelopes into an in-process channel.
//! - [`EmailDispatcher`]: sends one email per envelope through a [`Mailer`].

pub mod channel;
pub mod email;

use async_trait::async_trait;

use crate::broker::message::NotificationEnvelope;
use crate::utils::error::Result;

pub use channel::ChannelSubscriber;
pub use email::{EmailDispatcher, LogMailer, Mailer, MailerError, OutgoingEmail};

pub type SubscriberId = String;

#[async_trait]
pub trait Subscriber: Send + Sync {
    fn id(&self) -> &str;

    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<()>;
}

#[cfg(test)]
mod tests;
