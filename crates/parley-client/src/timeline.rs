use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::models::{Message, MessageReceipt, ReactionMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Sent optimistically, not yet echoed by the server.
    Pending,
    Sent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub message: Message,
    pub status: DeliveryStatus,
    pub client_id: Option<Uuid>,
    pub reactions: ReactionMap,
    pub receipt: Option<MessageReceipt>,
}

impl Entry {
    pub fn sent(message: Message) -> Self {
        Self {
            message,
            status: DeliveryStatus::Sent,
            client_id: None,
            reactions: ReactionMap::new(),
            receipt: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }
}

type Key = (DateTime<Utc>, Uuid);

/// One chat's messages ordered by (created_at, id).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    entries: BTreeMap<Key, Entry>,
    index: HashMap<Uuid, Key>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by message id.
    pub fn upsert(&mut self, entry: Entry) {
        let key = (entry.message.created_at, entry.message.id);
        if let Some(old) = self.index.insert(entry.message.id, key) {
            if old != key {
                self.entries.remove(&old);
            }
        }
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Entry> {
        let key = self.index.remove(&id)?;
        self.entries.remove(&key)
    }

    pub fn get(&self, id: Uuid) -> Option<&Entry> {
        self.index.get(&id).and_then(|key| self.entries.get(key))
    }

    /// Mutable access for fields that do not affect ordering.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Entry> {
        let key = self.index.get(&id)?;
        self.entries.get_mut(key)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.index.contains_key(&id)
    }

    /// Id of the pending entry created for `client_id`, if still pending.
    pub fn find_pending(&self, client_id: Uuid) -> Option<Uuid> {
        self.entries
            .values()
            .find(|e| e.is_pending() && e.client_id == Some(client_id))
            .map(|e| e.message.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
