use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_types::models::{PresenceState, PresenceStatus};

/// Online/offline state derived from live connection counts.
///
/// A user is online exactly while at least one of their connections is
/// live, so a second device closing never flips them offline. Only online
/// users have an entry; `last_seen` for offline users lives in the store.
#[derive(Default)]
pub struct PresenceTracker {
    connections: Mutex<HashMap<Uuid, usize>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. Returns true if the user just came online.
    pub fn on_connect(&self, user_id: Uuid) -> bool {
        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        let count = connections.entry(user_id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Record a closed connection. Returns the new `last_seen` if this was
    /// the user's last live connection; the entry is dropped at that point.
    pub fn on_disconnect(&self, user_id: Uuid, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(count) = connections.get_mut(&user_id) else {
            warn!("disconnect for offline user {}", user_id);
            return None;
        };

        *count -= 1;
        if *count > 0 {
            return None;
        }
        connections.remove(&user_id);
        Some(now)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.connection_count(user_id) > 0
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        let connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        connections.get(&user_id).copied().unwrap_or(0)
    }

    /// Tracked users, all of them online.
    pub fn tracked(&self) -> usize {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// In-memory view only; `last_seen` is left for callers to fill from
    /// the store.
    pub fn state(&self, user_id: Uuid) -> PresenceState {
        let status = if self.is_online(user_id) {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        };
        PresenceState {
            status,
            last_seen: None,
        }
    }

    /// The subset of `user_ids` currently online, in input order.
    pub fn online_among(&self, user_ids: &[Uuid]) -> Vec<Uuid> {
        let connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        user_ids
            .iter()
            .copied()
            .filter(|id| connections.contains_key(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_connection_does_not_flicker() {
        let tracker = PresenceTracker::new();
        let user = Uuid::new_v4();
        let t = Utc::now();

        assert!(tracker.on_connect(user));
        assert!(!tracker.on_connect(user));
        assert_eq!(tracker.connection_count(user), 2);

        assert_eq!(tracker.on_disconnect(user, t), None);
        assert!(tracker.is_online(user));

        assert_eq!(tracker.on_disconnect(user, t), Some(t));
        assert!(!tracker.is_online(user));
        assert_eq!(tracker.state(user).status, PresenceStatus::Offline);
    }

    #[test]
    fn offline_transition_happens_once() {
        let tracker = PresenceTracker::new();
        let user = Uuid::new_v4();
        let t = Utc::now();

        tracker.on_connect(user);
        assert!(tracker.on_disconnect(user, t).is_some());
        assert!(tracker.on_disconnect(user, t).is_none());
        assert!(tracker.on_disconnect(Uuid::new_v4(), t).is_none());
    }

    #[test]
    fn offline_users_are_not_retained() {
        let tracker = PresenceTracker::new();
        let t = Utc::now();
        for _ in 0..50 {
            let user = Uuid::new_v4();
            tracker.on_connect(user);
            tracker.on_disconnect(user, t);
        }
        let stays = Uuid::new_v4();
        tracker.on_connect(stays);
        assert_eq!(tracker.tracked(), 1);
        assert_eq!(tracker.state(stays).status, PresenceStatus::Online);
    }

    #[test]
    fn online_among_filters() {
        let tracker = PresenceTracker::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        tracker.on_connect(b);
        assert_eq!(tracker.online_among(&[a, b]), vec![b]);
    }
}
