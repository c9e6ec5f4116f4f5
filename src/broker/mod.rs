//! popq notification broker
//!
//! The broker crate-module contains the publish/subscribe side of popq:
//! topics with a static subscriber list, per-subscriber runners with bounded
//! retry, and the durable records that make fan-out at-least-once.
//!
//! Public types:
//! - `Topic`: records and fans out published envelopes.
//! - `SubscriberRunner` / `RetryPolicy`: one subscriber's delivery loop.
//! - `NotificationEnvelope`: the immutable published payload.

pub mod message;
pub mod runner;
pub mod topic;

pub use message::{NotificationEnvelope, PublishedEnvelope, SubscriberDeadLetter};
pub use runner::{DeliveryOutcome, RetryPolicy, SubscriberRunner};
pub use topic::{PublishReport, Topic};

#[cfg(test)]
mod tests;
