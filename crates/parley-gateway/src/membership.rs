use uuid::Uuid;

use parley_db::Database;
use parley_db::models::parse_id;
use parley_types::SyncError;
use parley_types::models::Member;

/// Read side of the (external) membership subsystem: who may see a chat and
/// who counts toward its read receipts.
pub trait Membership: Send + Sync + 'static {
    fn is_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool, SyncError>;

    fn chats_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>, SyncError>;

    fn members(&self, chat_id: Uuid) -> Result<Vec<Member>, SyncError>;
}

impl Membership for Database {
    fn is_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool, SyncError> {
        Ok(Database::is_member(self, &chat_id.to_string(), &user_id.to_string())?)
    }

    fn chats_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>, SyncError> {
        let ids = Database::chats_for_user(self, &user_id.to_string())?;
        Ok(ids
            .iter()
            .map(|id| parse_id(id))
            .collect::<Result<Vec<_>, _>>()?)
    }

    fn members(&self, chat_id: Uuid) -> Result<Vec<Member>, SyncError> {
        let rows = self.get_members(&chat_id.to_string())?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_member())
            .collect::<Result<Vec<_>, _>>()?)
    }
}

pub fn require_member(membership: &dyn Membership, chat_id: Uuid, user_id: Uuid) -> Result<(), SyncError> {
    if membership.is_member(chat_id, user_id)? {
        Ok(())
    } else {
        Err(SyncError::forbidden(format!("not a member of chat {}", chat_id)))
    }
}
