//! Storage for one notification topic.
//!
//! The envelope tree holds a [`PublishedEnvelope`] for every fan-out that has
//! not yet reached a terminal outcome for all subscribers. Each subscriber
//! that exhausts its retries gets the envelope parked in its own dead-letter
//! tree.

use sled::{Db, Tree};

use crate::broker::message::{PublishedEnvelope, SubscriberDeadLetter};
use crate::utils::error::Result;

#[derive(Clone)]
pub struct TopicStore {
    name: String,
    db: Db,
    envelopes: Tree,
}

impl TopicStore {
    pub(crate) fn open(db: &Db, name: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            db: db.clone(),
            envelopes: db.open_tree(format!("topic/{name}/envelopes"))?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Durably record a fan-out before any delivery is attempted.
    pub fn record(&self, published: &PublishedEnvelope) -> Result<()> {
        let bytes = serde_json::to_vec(published)?;
        self.envelopes.insert(published.id.as_bytes(), bytes)?;
        self.envelopes.flush()?;
        Ok(())
    }

    pub fn get(&self, envelope_id: &str) -> Result<Option<PublishedEnvelope>> {
        match self.envelopes.get(envelope_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Mark `subscriber` as done with `envelope_id`. The record is removed
    /// once no subscriber is pending.
    pub fn complete(&self, envelope_id: &str, subscriber: &str) -> Result<()> {
        let key = envelope_id.as_bytes();
        loop {
            let Some(raw) = self.envelopes.get(key)? else {
                return Ok(());
            };
            let mut published: PublishedEnvelope = serde_json::from_slice(&raw)?;
            published.pending.retain(|s| s != subscriber);

            let next = if published.pending.is_empty() {
                None
            } else {
                Some(serde_json::to_vec(&published)?)
            };

            if self.envelopes.compare_and_swap(key, Some(&raw), next)?.is_ok() {
                return Ok(());
            }
        }
    }

    /// Fan-outs with at least one subscriber still pending, oldest first.
    pub fn pending(&self) -> Result<Vec<PublishedEnvelope>> {
        let mut out = Vec::new();
        for entry in self.envelopes.iter() {
            let (_, raw) = entry?;
            out.push(serde_json::from_slice(&raw)?);
        }
        Ok(out)
    }

    pub fn dead_letter(&self, letter: &SubscriberDeadLetter) -> Result<()> {
        let tree = self.dead_letter_tree(&letter.subscriber)?;
        let bytes = serde_json::to_vec(letter)?;
        tree.insert(letter.envelope_id.as_bytes(), bytes)?;
        tree.flush()?;
        Ok(())
    }

    pub fn dead_letters(&self, subscriber: &str) -> Result<Vec<SubscriberDeadLetter>> {
        let tree = self.dead_letter_tree(subscriber)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (_, raw) = entry?;
            out.push(serde_json::from_slice(&raw)?);
        }
        Ok(out)
    }

    fn dead_letter_tree(&self, subscriber: &str) -> Result<Tree> {
        Ok(self
            .db
            .open_tree(format!("topic/{}/dlq/{subscriber}", self.name))?)
    }
}

impl std::fmt::Debug for TopicStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicStore")
            .field("name", &self.name)
            .field("pending", &self.envelopes.len())
            .finish()
    }
}
