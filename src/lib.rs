//! # popq
//!
//! `popq` is a durable work queue and notification fan-out built on an
//! embedded `sled` store.
//!
//! Producers enqueue messages; consumers lease them for a visibility timeout,
//! then ack them or let them return. A message that keeps failing is parked
//! in a dead-letter queue. Separately, envelopes published to a topic are
//! delivered to every subscriber with bounded retry.
//!
//! ## Core Modules
//!
//! - `queue`: the queue engine (leases, receive counting, dead-lettering,
//!   retention) and the batch processor that drives a handler over it.
//! - `broker`: notification topics and per-subscriber delivery runners.
//! - `subscriber`: delivery endpoints (email dispatcher, in-process channel).
//! - `persistence`: the sled-backed message store.
//! - `transport`: JSON request/response types and the request gateway.
//! - `config`: layered settings from defaults, file and environment.
//! - `utils`: errors, logging and the injectable clock.

pub mod broker;
pub mod config;
pub mod persistence;
pub mod queue;
pub mod subscriber;
pub mod transport;
pub mod utils;

pub use utils::error::{Error, ErrorKind, Result};
