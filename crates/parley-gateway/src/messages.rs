use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{MessageRow, to_millis};
use parley_types::SyncError;
use parley_types::models::{Message, MessageKind};

use crate::membership::{Membership, require_member};

/// Default and maximum page size for history reads.
pub const DEFAULT_PAGE: u32 = 50;
pub const MAX_PAGE: u32 = 200;

/// Message lifecycle: send, edit, delete, pin, forward, and reads.
pub struct Messages {
    db: Arc<Database>,
    membership: Arc<dyn Membership>,
}

impl Messages {
    pub fn new(db: Arc<Database>, membership: Arc<dyn Membership>) -> Self {
        Self { db, membership }
    }

    /// Persist a new message. The author's watermark advances to the new
    /// message in the same transaction.
    pub fn send(
        &self,
        author_id: Uuid,
        chat_id: Uuid,
        kind: MessageKind,
        content: String,
        reply_to_id: Option<Uuid>,
    ) -> Result<Message, SyncError> {
        require_member(self.membership.as_ref(), chat_id, author_id)?;

        if let Some(reply_to) = reply_to_id {
            let target = self.get(reply_to)?;
            if target.chat_id != chat_id {
                return Err(SyncError::validation("replyToId belongs to another chat"));
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            chat_id,
            author_id,
            kind,
            content,
            created_at: crate::now(),
            edited_at: None,
            reply_to_id,
            forwarded_from: None,
            pin: None,
        };
        self.db.insert_message(&MessageRow::from_message(&message))?;
        debug!("stored message {} in chat {}", message.id, chat_id);
        Ok(message)
    }

    pub fn edit(&self, author_id: Uuid, id: Uuid, content: String) -> Result<Message, SyncError> {
        let existing = self.get(id)?;
        if existing.author_id != author_id {
            return Err(SyncError::forbidden("only the author may edit a message"));
        }
        let row = self
            .db
            .update_message_content(&id.to_string(), &content, to_millis(crate::now()))?;
        Ok(row.into_message()?)
    }

    /// Hard delete. Returns the removed message.
    pub fn delete(&self, author_id: Uuid, id: Uuid) -> Result<Message, SyncError> {
        let existing = self.get(id)?;
        if existing.author_id != author_id {
            return Err(SyncError::forbidden("only the author may delete a message"));
        }
        Ok(self.db.delete_message(&id.to_string())?.into_message()?)
    }

    /// Flip the pinned flag; any member may pin.
    pub fn toggle_pin(&self, user_id: Uuid, id: Uuid) -> Result<Message, SyncError> {
        let existing = self.get(id)?;
        require_member(self.membership.as_ref(), existing.chat_id, user_id)?;
        let row = self
            .db
            .toggle_pin(&id.to_string(), &user_id.to_string(), to_millis(crate::now()))?;
        Ok(row.into_message()?)
    }

    /// Copy a message into other chats as the forwarding user. Either every
    /// copy is stored or none is.
    pub fn forward(&self, user_id: Uuid, id: Uuid, target_chat_ids: &[Uuid]) -> Result<Vec<Message>, SyncError> {
        let source = self.get(id)?;
        require_member(self.membership.as_ref(), source.chat_id, user_id)?;
        for chat_id in target_chat_ids {
            require_member(self.membership.as_ref(), *chat_id, user_id)?;
        }

        let created_at = crate::now();
        let copies: Vec<Message> = target_chat_ids
            .iter()
            .map(|chat_id| Message {
                id: Uuid::new_v4(),
                chat_id: *chat_id,
                author_id: user_id,
                kind: source.kind,
                content: source.content.clone(),
                created_at,
                edited_at: None,
                reply_to_id: None,
                forwarded_from: Some(source.forwarded_from.unwrap_or(source.id)),
                pin: None,
            })
            .collect();

        let rows: Vec<MessageRow> = copies.iter().map(MessageRow::from_message).collect();
        self.db.insert_messages(&rows)?;
        Ok(copies)
    }

    pub fn get(&self, id: Uuid) -> Result<Message, SyncError> {
        match self.db.get_message(&id.to_string())? {
            Some(row) => Ok(row.into_message()?),
            None => Err(SyncError::not_found(format!("message {}", id))),
        }
    }

    /// The chat a message lives in, checked against the caller's membership.
    pub fn chat_of(&self, user_id: Uuid, id: Uuid) -> Result<Uuid, SyncError> {
        let message = self.get(id)?;
        require_member(self.membership.as_ref(), message.chat_id, user_id)?;
        Ok(message.chat_id)
    }

    /// Newest-first page of history for a member.
    pub fn history(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        limit: u32,
        before: Option<chrono::DateTime<chrono::Utc>>,
        before_id: Option<Uuid>,
    ) -> Result<Vec<Message>, SyncError> {
        require_member(self.membership.as_ref(), chat_id, user_id)?;
        let before_id = before_id.map(|id| id.to_string());
        let rows = self.db.get_messages(
            &chat_id.to_string(),
            limit.clamp(1, MAX_PAGE),
            before.map(to_millis),
            before_id.as_deref(),
        )?;
        Ok(rows
            .into_iter()
            .map(MessageRow::into_message)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
