//! The `transport` module defines the messages exchanged with producers and
//! the gateway that turns them into queue and topic operations.
//!
//! Requests and responses are JSON objects tagged by a `type` field, e.g.
//! `{"type":"enqueue","body":"order-42"}` answered by
//! `{"type":"enqueued","message_id":"..."}`.

pub mod gateway;
pub mod message;

pub use gateway::Gateway;
pub use message::{Request, Response};
