//! The `persistence` module provides the durable message store.
//!
//! Everything lives in one embedded `sled` database opened once per process
//! ([`MessageStore::open`]) and shared by cloning. Each queue gets a main tree
//! and a dead-letter tree ([`QueueStore`]); each notification topic gets an
//! envelope tree plus one dead-letter tree per subscriber ([`TopicStore`]).
//!
//! Keys are prefixed with a zero-padded millisecond timestamp so scans yield
//! records in roughly chronological order and retention can read a record's
//! age straight from its key.

pub mod queue_store;
pub mod sled_store;
pub mod topic_store;

pub use queue_store::{DeadLetter, Location, QueueStore, StoredMessage, StoredState};
pub use sled_store::MessageStore;
pub use topic_store::TopicStore;
