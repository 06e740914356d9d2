use std::sync::Arc;

use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{parse_id, to_millis};
use parley_types::SyncError;
use parley_types::models::ReactionMap;

use crate::membership::{Membership, require_member};

pub struct ToggleOutcome {
    pub added: bool,
    pub chat_id: Uuid,
    /// Full map after the toggle, as broadcast to the chat.
    pub snapshot: ReactionMap,
}

/// Per-user reaction toggles and the derived emoji -> count map.
pub struct Reactions {
    db: Arc<Database>,
    membership: Arc<dyn Membership>,
}

impl Reactions {
    pub fn new(db: Arc<Database>, membership: Arc<dyn Membership>) -> Self {
        Self { db, membership }
    }

    /// The only mutation path: flip existence of (user, message, emoji).
    pub fn toggle(&self, user_id: Uuid, message_id: Uuid, emoji: &str) -> Result<ToggleOutcome, SyncError> {
        let message = message_id.to_string();
        let row = self
            .db
            .get_message(&message)?
            .ok_or_else(|| SyncError::not_found(format!("message {}", message_id)))?;
        let chat_id = parse_id(&row.chat_id)?;
        require_member(self.membership.as_ref(), chat_id, user_id)?;

        let flipped = self
            .db
            .toggle_reaction(&message, &user_id.to_string(), emoji, to_millis(crate::now()))?;

        Ok(ToggleOutcome {
            added: flipped.added,
            chat_id,
            snapshot: self.snapshot(message_id)?,
        })
    }

    pub fn snapshot(&self, message_id: Uuid) -> Result<ReactionMap, SyncError> {
        let counts = self.db.reaction_counts(&message_id.to_string())?;
        Ok(counts.into_iter().filter(|(_, n)| *n > 0).collect())
    }
}
