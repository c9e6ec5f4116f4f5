//! Message definitions for the queue engine
//!
//! `ReceivedMessage` is what a consumer gets back from a dequeue: the payload
//! plus enough lifecycle metadata to act idempotently.
//!
//! Notes on fields:
//! - `id`: opaque identifier, `{enqueued_at:020}_{uuid}`; pass it back to
//!   `ack`/`nack`
//! - `receipt`: identifies this particular lease; `nack` needs it
//! - `receive_count`: number of earlier leases that ended without an ack
//! - `lease_expires_at`: milliseconds since UNIX epoch after which the message
//!   becomes visible to other consumers again

use serde::{Deserialize, Serialize};

use crate::persistence::StoredMessage;

pub type MessageId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub body: Vec<u8>,
    pub receive_count: u32,
    pub enqueued_at: i64,
    pub lease_expires_at: i64,
    pub receipt: String,
}

impl ReceivedMessage {
    pub(crate) fn leased(msg: StoredMessage, lease_expires_at: i64, receipt: String) -> Self {
        Self {
            id: msg.id,
            body: msg.body,
            receive_count: msg.receive_count,
            enqueued_at: msg.enqueued_at,
            lease_expires_at,
            receipt,
        }
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Observable lifecycle state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageState {
    /// Eligible for dequeue.
    Visible { receive_count: u32 },
    /// Held by a consumer until `until`.
    Leased { until: i64, receive_count: u32 },
    /// Acked, or purged by retention.
    Deleted,
    /// Parked in the dead-letter queue.
    DeadLettered { receive_count: u32 },
}

/// Result of a negative acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Visible again immediately.
    Requeued { receive_count: u32 },
    /// Receive budget exhausted; moved to the dead-letter queue.
    DeadLettered { receive_count: u32 },
    /// The message was not leased (its failure was already counted).
    AlreadyVisible,
    /// The receipt belongs to an earlier lease; nothing changed.
    StaleLease,
}

/// Summary of one pass of the lease reaper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub requeued: usize,
    pub dead_lettered: usize,
}
