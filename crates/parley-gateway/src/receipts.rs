use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{from_millis, parse_id, to_millis};
use parley_types::SyncError;
use parley_types::models::{Message, MessageReceipt, ReadStatus};

use crate::membership::{Membership, require_member};

/// Upper bound on receipts carried by one `read:updated` event. Older
/// covered messages are left for clients to refetch.
pub const MAX_RECEIPTS_PER_UPDATE: usize = 200;

/// Upper bound on ids per read-status query.
pub const MAX_STATUS_QUERY: usize = 500;

pub struct MarkReadOutcome {
    /// The watermark after the call; never earlier than before it.
    pub upto: DateTime<Utc>,
    /// How many previously unread messages the advance covered.
    pub newly_read: usize,
    /// Fresh aggregates for (the newest of) those messages.
    pub receipts: Vec<MessageReceipt>,
}

/// Read-receipt aggregation over per-member watermarks.
///
/// Per-message counts are always derived: a member has read a message iff
/// their watermark in its chat is at or past the message's timestamp.
pub struct ReadReceipts {
    db: Arc<Database>,
    membership: Arc<dyn Membership>,
}

impl ReadReceipts {
    pub fn new(db: Arc<Database>, membership: Arc<dyn Membership>) -> Self {
        Self { db, membership }
    }

    /// Advance the watermark to `max(current, upto)`. A future `upto` is
    /// clamped to the present.
    pub fn mark_read(&self, user_id: Uuid, chat_id: Uuid, upto: DateTime<Utc>) -> Result<MarkReadOutcome, SyncError> {
        require_member(self.membership.as_ref(), chat_id, user_id)?;
        let upto = upto.min(crate::now());

        let chat = chat_id.to_string();
        let row = self.db.mark_read(&chat, &user_id.to_string(), to_millis(upto))?;

        let covered: Vec<&(String, i64)> = row.newly_read.iter().take(MAX_RECEIPTS_PER_UPDATE).collect();
        let timestamps: Vec<i64> = covered.iter().map(|(_, ts)| *ts).collect();
        let counts = self.db.receipt_counts_many(&chat, &timestamps)?;

        let receipts = covered
            .iter()
            .zip(counts)
            .map(|((id, _), c)| {
                Ok(MessageReceipt {
                    message_id: parse_id(id)?,
                    read_count: c.read_count,
                    total_members: c.total_members,
                })
            })
            .collect::<Result<Vec<_>, SyncError>>()?;

        Ok(MarkReadOutcome {
            upto: from_millis(row.current)?,
            newly_read: row.newly_read.len(),
            receipts,
        })
    }

    /// Read status of `message_ids` as seen by `requester`. Every id must be
    /// a live message of `chat_id`.
    pub fn compute_read_status(
        &self,
        requester: Uuid,
        chat_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<Vec<ReadStatus>, SyncError> {
        if message_ids.len() > MAX_STATUS_QUERY {
            return Err(SyncError::validation(format!(
                "at most {} message ids per query",
                MAX_STATUS_QUERY
            )));
        }
        require_member(self.membership.as_ref(), chat_id, requester)?;

        let chat = chat_id.to_string();
        let mut timestamps = Vec::with_capacity(message_ids.len());
        for id in message_ids {
            let row = self
                .db
                .get_message(&id.to_string())?
                .filter(|row| row.chat_id == chat)
                .ok_or_else(|| SyncError::not_found(format!("message {} in chat {}", id, chat_id)))?;
            timestamps.push(row.created_at);
        }

        let watermark = self.db.watermark(&chat, &requester.to_string())?;
        let counts = self.db.receipt_counts_many(&chat, &timestamps)?;

        Ok(message_ids
            .iter()
            .zip(timestamps)
            .zip(counts)
            .map(|((id, ts), c)| ReadStatus {
                message_id: *id,
                is_read_by_requester: watermark.is_some_and(|w| w >= ts),
                read_count: c.read_count,
                total_members: c.total_members,
            })
            .collect())
    }

    /// Current aggregate for one stored message.
    pub fn receipt_of(&self, message: &Message) -> Result<MessageReceipt, SyncError> {
        let counts = self
            .db
            .receipt_counts(&message.chat_id.to_string(), to_millis(message.created_at))?;
        Ok(MessageReceipt {
            message_id: message.id,
            read_count: counts.read_count,
            total_members: counts.total_members,
        })
    }

    pub fn watermark(&self, user_id: Uuid, chat_id: Uuid) -> Result<Option<DateTime<Utc>>, SyncError> {
        let raw = self.db.watermark(&chat_id.to_string(), &user_id.to_string())?;
        Ok(raw.map(from_millis).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Messages;
    use chrono::Duration;
    use parley_types::models::MessageKind;

    struct Fixture {
        db: Arc<Database>,
        receipts: ReadReceipts,
        messages: Messages,
        chat: Uuid,
        users: [Uuid; 3],
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let chat = Uuid::new_v4();
        let users = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        db.create_chat(&chat.to_string(), "trio", 0).unwrap();
        for (i, u) in users.iter().enumerate() {
            db.upsert_user(&u.to_string(), &format!("user{}", i)).unwrap();
            db.add_member(&chat.to_string(), &u.to_string(), "member", 0).unwrap();
        }
        let membership: Arc<dyn Membership> = db.clone();
        Fixture {
            receipts: ReadReceipts::new(db.clone(), membership.clone()),
            messages: Messages::new(db.clone(), membership),
            db,
            chat,
            users,
        }
    }

    #[test]
    fn sender_counts_as_reader() {
        let f = fixture();
        let [u1, u2, _] = f.users;
        let m = f
            .messages
            .send(u1, f.chat, MessageKind::Text, "hello".into(), None)
            .unwrap();

        let at_send = f.receipts.receipt_of(&m).unwrap();
        assert_eq!((at_send.read_count, at_send.total_members), (1, 3));

        let status = f.receipts.compute_read_status(u2, f.chat, &[m.id]).unwrap();
        assert_eq!(status[0].read_count, 1);
        assert_eq!(status[0].total_members, 3);
        assert!(!status[0].is_read_by_requester);

        let outcome = f.receipts.mark_read(u2, f.chat, m.created_at).unwrap();
        assert_eq!(outcome.newly_read, 1);
        assert_eq!(outcome.receipts[0].read_count, 2);

        let status = f.receipts.compute_read_status(u2, f.chat, &[m.id]).unwrap();
        assert_eq!(status[0].read_count, 2);
        assert!(status[0].is_read_by_requester);
    }

    #[test]
    fn stale_mark_keeps_watermark() {
        let f = fixture();
        let u2 = f.users[1];
        let t2 = Utc::now();
        let t1 = t2 - Duration::seconds(30);

        let later = f.receipts.mark_read(u2, f.chat, t2).unwrap();
        let earlier = f.receipts.mark_read(u2, f.chat, t1).unwrap();
        assert_eq!(earlier.upto, later.upto);
        assert_eq!(earlier.newly_read, 0);
        assert_eq!(f.receipts.watermark(u2, f.chat).unwrap(), Some(later.upto));
    }

    #[test]
    fn future_mark_does_not_cover_later_messages() {
        let f = fixture();
        let [u1, u2, _] = f.users;

        // Empty chat: clamped to now
        let outcome = f
            .receipts
            .mark_read(u2, f.chat, Utc::now() + Duration::days(365))
            .unwrap();
        assert!(outcome.upto <= Utc::now());

        std::thread::sleep(std::time::Duration::from_millis(3));
        let first = f
            .messages
            .send(u1, f.chat, MessageKind::Text, "first".into(), None)
            .unwrap();
        let outcome = f
            .receipts
            .mark_read(u2, f.chat, Utc::now() + Duration::days(365))
            .unwrap();
        assert_eq!(outcome.upto, first.created_at);

        std::thread::sleep(std::time::Duration::from_millis(3));
        let later = f
            .messages
            .send(u1, f.chat, MessageKind::Text, "later".into(), None)
            .unwrap();
        let status = f.receipts.compute_read_status(u2, f.chat, &[later.id]).unwrap();
        assert!(!status[0].is_read_by_requester);
        assert_eq!((status[0].read_count, status[0].total_members), (1, 3));
    }

    #[test]
    fn read_count_never_exceeds_members() {
        let f = fixture();
        let [u1, u2, u3] = f.users;
        let m = f
            .messages
            .send(u1, f.chat, MessageKind::Text, "hi".into(), None)
            .unwrap();
        f.receipts.mark_read(u2, f.chat, m.created_at).unwrap();
        f.receipts.mark_read(u3, f.chat, m.created_at).unwrap();
        f.db.remove_member(&f.chat.to_string(), &u3.to_string()).unwrap();

        let status = f.receipts.compute_read_status(u1, f.chat, &[m.id]).unwrap();
        assert_eq!((status[0].read_count, status[0].total_members), (2, 2));
    }

    #[test]
    fn rejoined_member_starts_unread() {
        let f = fixture();
        let [u1, u2, _] = f.users;
        let m = f
            .messages
            .send(u1, f.chat, MessageKind::Text, "hi".into(), None)
            .unwrap();
        f.receipts.mark_read(u2, f.chat, m.created_at).unwrap();

        let chat = f.chat.to_string();
        f.db.remove_member(&chat, &u2.to_string()).unwrap();
        f.db.add_member(&chat, &u2.to_string(), "member", 1).unwrap();

        let status = f.receipts.compute_read_status(u2, f.chat, &[m.id]).unwrap();
        assert!(!status[0].is_read_by_requester);
        assert_eq!(status[0].read_count, 1);
    }

    #[test]
    fn unknown_or_foreign_message_is_not_found() {
        let f = fixture();
        let err = f
            .receipts
            .compute_read_status(f.users[0], f.chat, &[Uuid::new_v4()])
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[test]
    fn outsiders_are_forbidden() {
        let f = fixture();
        let outsider = Uuid::new_v4();
        assert!(matches!(
            f.receipts.mark_read(outsider, f.chat, Utc::now()),
            Err(SyncError::Forbidden(_))
        ));
    }
}
