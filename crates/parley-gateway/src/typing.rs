use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Ephemeral per-(chat, user) typing state. Never persisted.
///
/// Each key is either absent (idle) or present with an expiry (typing).
/// Only the idle -> typing and typing -> idle transitions are reported to the
/// caller, which is what bounds the broadcast volume.
pub struct TypingTracker {
    ttl: Duration,
    entries: Mutex<HashMap<(Uuid, Uuid), Instant>>,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns true on idle -> typing. Later starts only push the expiry out.
    pub fn start(&self, chat_id: Uuid, user_id: Uuid, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert((chat_id, user_id), now + self.ttl).is_none()
    }

    /// Returns true on typing -> idle.
    pub fn stop(&self, chat_id: Uuid, user_id: Uuid) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&(chat_id, user_id)).is_some()
    }

    /// Drop every entry whose expiry has passed and return their keys as
    /// (chat_id, user_id).
    pub fn expire(&self, now: Instant) -> Vec<(Uuid, Uuid)> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<(Uuid, Uuid)> = entries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        expired
    }

    pub fn is_typing(&self, chat_id: Uuid, user_id: Uuid) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&(chat_id, user_id))
    }

    pub fn typing_in(&self, chat_id: Uuid) -> Vec<Uuid> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .keys()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, user)| *user)
            .collect()
    }
}
