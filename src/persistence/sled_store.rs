use std::path::Path;

use sled::Db;
use sled::transaction::TransactionError;
use uuid::Uuid;

use crate::persistence::queue_store::QueueStore;
use crate::persistence::topic_store::TopicStore;
use crate::utils::error::{Error, Result};

/// Handle to the embedded database. Cloning is cheap and every clone refers
/// to the same underlying `sled::Db`.
#[derive(Clone)]
pub struct MessageStore {
    db: Db,
}

impl MessageStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// A throwaway database that is deleted when the last handle drops.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Main and dead-letter trees for the queue called `name`.
    pub fn queue(&self, name: &str) -> Result<QueueStore> {
        QueueStore::open(&self.db, name)
    }

    /// Envelope and subscriber dead-letter trees for the topic called `name`.
    pub fn topic(&self, name: &str) -> Result<TopicStore> {
        TopicStore::open(&self.db, name)
    }

    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("db", &"sled::Db")
            .finish()
    }
}

/// New record key: `{timestamp_ms:020}_{uuid}`.
pub fn timestamped_key(timestamp_ms: i64) -> String {
    format!("{timestamp_ms:020}_{}", Uuid::new_v4())
}

/// Timestamp prefix of a key produced by [`timestamped_key`].
pub fn key_timestamp(key: &[u8]) -> Option<i64> {
    let key_str = std::str::from_utf8(key).ok()?;
    let (ts_str, _) = key_str.split_once('_')?;
    ts_str.parse::<i64>().ok()
}

pub(crate) fn from_tx_error(e: TransactionError<Error>) -> Error {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    }
}
