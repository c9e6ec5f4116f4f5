//! Storage for one queue: the main tree of pending/in-flight messages and the
//! dead-letter tree.
//!
//! Every state transition on a stored message is a compare-and-swap against
//! the exact bytes the caller last read, so two concurrent operations can
//! never both transition the same message. Moving a message to the
//! dead-letter tree is a two-tree transaction that re-checks those bytes: a
//! message is never in both trees, nor in neither.

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionResult};
use sled::{Db, IVec, Transactional, Tree};
use tracing::warn;

use crate::persistence::sled_store::{from_tx_error, key_timestamp};
use crate::utils::error::{Error, Result};

/// Persisted lease state. `Deleted` and `DeadLettered` are represented by
/// absence from the main tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StoredState {
    Visible,
    /// `receipt` is unique per lease; only its holder may nack.
    Leased { until: i64, receipt: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: String,
    pub body: Vec<u8>,
    pub enqueued_at: i64,
    pub receive_count: u32,
    pub state: StoredState,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message: StoredMessage,
    pub reason: String,
    pub dead_lettered_at: i64,
}

/// Where a message currently lives, read consistently across both trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Main(StoredMessage),
    DeadLetter(DeadLetter),
    Absent,
}

#[derive(Clone)]
pub struct QueueStore {
    main: Tree,
    dead: Tree,
}

impl QueueStore {
    pub(crate) fn open(db: &Db, name: &str) -> Result<Self> {
        Ok(Self {
            main: db.open_tree(format!("queue/{name}"))?,
            dead: db.open_tree(format!("queue/{name}/dlq"))?,
        })
    }

    pub fn insert(&self, msg: &StoredMessage) -> Result<()> {
        let bytes = serde_json::to_vec(msg)?;
        self.main.insert(msg.id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Current raw bytes and decoded record for `id`.
    pub fn get(&self, id: &str) -> Result<Option<(IVec, StoredMessage)>> {
        match self.main.get(id.as_bytes())? {
            Some(raw) => {
                let msg = serde_json::from_slice(&raw)?;
                Ok(Some((raw, msg)))
            }
            None => Ok(None),
        }
    }

    /// Iterate the main tree in key order. Undecodable records are skipped.
    pub fn scan(&self) -> impl Iterator<Item = Result<(IVec, StoredMessage)>> + '_ {
        self.main.iter().filter_map(|entry| match entry {
            Ok((key, raw)) => match serde_json::from_slice::<StoredMessage>(&raw) {
                Ok(msg) => Some(Ok((raw, msg))),
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), "skipping undecodable message: {e}");
                    None
                }
            },
            Err(e) => Some(Err(e.into())),
        })
    }

    /// Replace the record for `next.id` only if it still equals `expected`.
    /// Returns `false` when another writer got there first.
    pub fn compare_and_swap(&self, expected: &IVec, next: &StoredMessage) -> Result<bool> {
        let bytes = serde_json::to_vec(next)?;
        let swapped = self
            .main
            .compare_and_swap(next.id.as_bytes(), Some(expected), Some(bytes))?;
        Ok(swapped.is_ok())
    }

    /// Unconditional delete. Returns whether a record was present.
    pub fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.main.remove(id.as_bytes())?.is_some())
    }

    /// Delete `id` only if it still equals `expected`.
    pub fn remove_if_unchanged(&self, id: &str, expected: &IVec) -> Result<bool> {
        let swapped = self
            .main
            .compare_and_swap(id.as_bytes(), Some(expected), None::<Vec<u8>>)?;
        Ok(swapped.is_ok())
    }

    /// Atomically remove the message from the main tree and park it in the
    /// dead-letter tree, provided the main record still equals `expected`.
    pub fn move_to_dead_letter(&self, expected: &IVec, letter: &DeadLetter) -> Result<bool> {
        let key = letter.message.id.as_bytes();
        let value = serde_json::to_vec(letter)?;

        let result: TransactionResult<bool, Error> =
            (&self.main, &self.dead).transaction(|(main, dead)| match main.get(key)? {
                Some(current) if current == *expected => {
                    main.remove(key)?;
                    dead.insert(key, value.clone())?;
                    Ok(true)
                }
                _ => Ok(false),
            });

        result.map_err(from_tx_error)
    }

    /// Look `id` up in both trees within one transaction.
    pub fn locate(&self, id: &str) -> Result<Location> {
        let key = id.as_bytes();
        let result: TransactionResult<Location, Error> =
            (&self.main, &self.dead).transaction(|(main, dead)| {
                if let Some(raw) = main.get(key)? {
                    let msg = serde_json::from_slice(&raw)
                        .map_err(|e| ConflictableTransactionError::Abort(Error::from(e)))?;
                    return Ok(Location::Main(msg));
                }
                if let Some(raw) = dead.get(key)? {
                    let letter = serde_json::from_slice(&raw)
                        .map_err(|e| ConflictableTransactionError::Abort(Error::from(e)))?;
                    return Ok(Location::DeadLetter(letter));
                }
                Ok(Location::Absent)
            });

        result.map_err(from_tx_error)
    }

    /// Move a dead letter back into the main tree as a fresh, visible message
    /// with its receive count reset. Returns the restored message, or `None`
    /// if no dead letter with that id exists.
    pub fn redrive(&self, id: &str) -> Result<Option<StoredMessage>> {
        let key = id.as_bytes();
        let result: TransactionResult<Option<StoredMessage>, Error> =
            (&self.main, &self.dead).transaction(|(main, dead)| {
                let Some(raw) = dead.get(key)? else {
                    return Ok(None);
                };
                let letter: DeadLetter = serde_json::from_slice(&raw)
                    .map_err(|e| ConflictableTransactionError::Abort(Error::from(e)))?;
                let restored = StoredMessage {
                    receive_count: 0,
                    state: StoredState::Visible,
                    ..letter.message
                };
                let bytes = serde_json::to_vec(&restored)
                    .map_err(|e| ConflictableTransactionError::Abort(Error::from(e)))?;
                dead.remove(key)?;
                main.insert(key, bytes)?;
                Ok(Some(restored))
            });

        result.map_err(from_tx_error)
    }

    /// Up to `limit` dead letters, oldest enqueue first.
    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let mut out = Vec::new();
        for entry in self.dead.iter().take(limit) {
            let (_, raw) = entry?;
            out.push(serde_json::from_slice(&raw)?);
        }
        Ok(out)
    }

    /// Drop every message, pending or dead-lettered, whose key timestamp is
    /// older than `cutoff`. Returns `(main_removed, dead_removed)`.
    pub fn purge_older_than(&self, cutoff: i64) -> Result<(usize, usize)> {
        Ok((
            purge_tree(&self.main, cutoff)?,
            purge_tree(&self.dead, cutoff)?,
        ))
    }

    pub fn len(&self) -> usize {
        self.main.len()
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty()
    }

    pub fn dead_letter_len(&self) -> usize {
        self.dead.len()
    }
}

fn purge_tree(tree: &Tree, cutoff: i64) -> Result<usize> {
    let mut old_keys = Vec::new();
    for entry in tree.iter().keys() {
        let key = entry?;
        match key_timestamp(&key) {
            Some(ts) if ts < cutoff => old_keys.push(key),
            // keys are timestamp-ordered, nothing younger can follow
            Some(_) => break,
            None => {}
        }
    }

    let mut removed = 0;
    for key in old_keys {
        if tree.remove(key)?.is_some() {
            removed += 1;
        }
    }
    Ok(removed)
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("main", &self.main.len())
            .field("dead", &self.dead.len())
            .finish()
    }
}
