//! popq work queue
//!
//! A durable, at-least-once work queue with visibility-timeout leases and
//! dead-letter parking, plus a batch processor that drives a handler over it.
//!
//! Message lifecycle:
//!
//! ```text
//! enqueue ──> Visible ──dequeue──> Leased ──ack──> Deleted
//!               ^                    │
//!               └──nack / timeout────┤ (receive_count < max)
//!                                    └──────────────> DeadLettered
//! ```

pub mod batch;
pub mod engine;
pub mod message;

pub use batch::{BatchOutcome, BatchPolicy, BatchProcessor, HandlerError, RecordHandler};
pub use engine::{QueueConfig, QueueEngine};
pub use message::{MessageId, MessageState, NackOutcome, ReapReport, ReceivedMessage};
