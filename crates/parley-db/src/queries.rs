use crate::models::{MemberRow, MessageRow, UserRow};
use crate::{Database, Result, StoreError};
use rusqlite::{Connection, Row};

pub(crate) const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, kind, content, reply_to_id, \
     forwarded_from, created_at, edited_at, pinned_by, pinned_at";

impl Database {
    // -- Users --

    /// Mirror a user issued by the external auth service.
    pub fn upsert_user(&self, id: &str, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username",
                (id, username),
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, last_seen FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        last_seen: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn set_last_seen(&self, user_id: &str, at: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_seen = ?2 WHERE id = ?1",
                rusqlite::params![user_id, at],
            )?;
            Ok(())
        })
    }

    // -- Chats & membership --
    //
    // Owned by the membership subsystem; the core only reads them, apart from
    // the watermark reset on join/leave.

    pub fn create_chat(&self, id: &str, name: &str, created_at: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (id, name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, name, created_at],
            )?;
            Ok(())
        })
    }

    /// Add a member. Returns false if they already were one. A (re-)joining
    /// member never inherits an old watermark.
    pub fn add_member(&self, chat_id: &str, user_id: &str, role: &str, joined_at: i64) -> Result<bool> {
        self.with_tx(|tx| {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![chat_id, user_id, role, joined_at],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            tx.execute(
                "DELETE FROM read_watermarks WHERE chat_id = ?1 AND user_id = ?2",
                [chat_id, user_id],
            )?;
            Ok(true)
        })
    }

    /// Remove a member together with their watermark.
    pub fn remove_member(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        self.with_tx(|tx| {
            let removed = tx.execute(
                "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                [chat_id, user_id],
            )?;
            tx.execute(
                "DELETE FROM read_watermarks WHERE chat_id = ?1 AND user_id = ?2",
                [chat_id, user_id],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn is_member(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| query_is_member(conn, chat_id, user_id))
    }

    pub fn get_members(&self, chat_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.chat_id, m.user_id, u.username, m.role, m.joined_at, u.last_seen
                 FROM chat_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.chat_id = ?1
                 ORDER BY m.joined_at, m.user_id",
            )?;
            let rows = stmt
                .query_map([chat_id], |row| {
                    Ok(MemberRow {
                        chat_id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                        role: row.get(3)?,
                        joined_at: row.get(4)?,
                        last_seen: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn chats_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT chat_id FROM chat_members WHERE user_id = ?1 ORDER BY chat_id")?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Messages --

    /// Insert a message and advance the author's watermark to its timestamp
    /// in the same transaction.
    pub fn insert_message(&self, message: &MessageRow) -> Result<()> {
        self.with_tx(|tx| insert_message_row(tx, message))
    }

    /// Insert several messages atomically (forwarding to many chats).
    pub fn insert_messages(&self, messages: &[MessageRow]) -> Result<()> {
        self.with_tx(|tx| {
            for message in messages {
                insert_message_row(tx, message)?;
            }
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Newest-first page of a chat's history, strictly before the
    /// `(created_at, id)` cursor. Without `before_id` every message at
    /// `before` is excluded.
    pub fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        before: Option<i64>,
        before_id: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1
                   AND (created_at < ?2 OR (created_at = ?2 AND ?3 IS NOT NULL AND id < ?3))
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![chat_id, before.unwrap_or(i64::MAX), before_id, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_message_content(&self, id: &str, content: &str, edited_at: i64) -> Result<MessageRow> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE messages SET content = ?2, edited_at = ?3 WHERE id = ?1",
                rusqlite::params![id, content, edited_at],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("message {}", id)));
            }
            query_message(tx, id)?.ok_or_else(|| StoreError::NotFound(format!("message {}", id)))
        })
    }

    /// Hard-delete a message; its reactions go with it. Returns the removed row.
    pub fn delete_message(&self, id: &str) -> Result<MessageRow> {
        self.with_tx(|tx| {
            let row = query_message(tx, id)?
                .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
            tx.execute("DELETE FROM reactions WHERE message_id = ?1", [id])?;
            tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(row)
        })
    }

    /// Flip the pin flag. Returns the row as it is after the flip.
    pub fn toggle_pin(&self, id: &str, user_id: &str, at: i64) -> Result<MessageRow> {
        self.with_tx(|tx| {
            let row = query_message(tx, id)?
                .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
            if row.pinned_at.is_some() {
                tx.execute(
                    "UPDATE messages SET pinned_by = NULL, pinned_at = NULL WHERE id = ?1",
                    [id],
                )?;
            } else {
                tx.execute(
                    "UPDATE messages SET pinned_by = ?2, pinned_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, user_id, at],
                )?;
            }
            query_message(tx, id)?.ok_or_else(|| StoreError::NotFound(format!("message {}", id)))
        })
    }
}

fn insert_message_row(conn: &Connection, m: &MessageRow) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, chat_id, sender_id, kind, content, reply_to_id,
                               forwarded_from, created_at, edited_at, pinned_by, pinned_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            m.id,
            m.chat_id,
            m.sender_id,
            m.kind,
            m.content,
            m.reply_to_id,
            m.forwarded_from,
            m.created_at,
            m.edited_at,
            m.pinned_by,
            m.pinned_at
        ],
    )?;
    crate::watermarks::advance(conn, &m.chat_id, &m.sender_id, m.created_at)?;
    Ok(())
}

pub(crate) fn query_is_member(conn: &Connection, chat_id: &str, user_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            [chat_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    conn.query_row(&sql, [id], message_from_row).optional()
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        kind: row.get(3)?,
        content: row.get(4)?,
        reply_to_id: row.get(5)?,
        forwarded_from: row.get(6)?,
        created_at: row.get(7)?,
        edited_at: row.get(8)?,
        pinned_by: row.get(9)?,
        pinned_at: row.get(10)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn message(id: &str, chat: &str, sender: &str, at: i64) -> MessageRow {
        MessageRow {
            id: id.into(),
            chat_id: chat.into(),
            sender_id: sender.into(),
            kind: "text".into(),
            content: format!("message {}", id),
            reply_to_id: None,
            forwarded_from: None,
            created_at: at,
            edited_at: None,
            pinned_by: None,
            pinned_at: None,
        }
    }

    pub(crate) fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user("u1", "alice").unwrap();
        db.upsert_user("u2", "bob").unwrap();
        db.create_chat("c1", "general", 0).unwrap();
        db.add_member("c1", "u1", "owner", 0).unwrap();
        db.add_member("c1", "u2", "member", 0).unwrap();
        db
    }

    #[test]
    fn history_pages_newest_first() {
        let db = seeded();
        for (i, at) in [10, 20, 30].iter().enumerate() {
            db.insert_message(&message(&format!("m{}", i), "c1", "u1", *at)).unwrap();
        }

        let page = db.get_messages("c1", 2, None, None).unwrap();
        let ids: Vec<_> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);

        let older = db.get_messages("c1", 2, Some(20), None).unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, "m0");
    }

    #[test]
    fn cursor_pages_through_tied_timestamps() {
        let db = seeded();
        for id in ["ma", "mb", "mc"] {
            db.insert_message(&message(id, "c1", "u1", 10)).unwrap();
        }
        db.insert_message(&message("m0", "c1", "u1", 5)).unwrap();

        let mut seen = Vec::new();
        let mut cursor: Option<(i64, String)> = None;
        loop {
            let page = db
                .get_messages("c1", 1, cursor.as_ref().map(|c| c.0), cursor.as_ref().map(|c| c.1.as_str()))
                .unwrap();
            let Some(last) = page.last() else { break };
            cursor = Some((last.created_at, last.id.clone()));
            seen.extend(page.into_iter().map(|m| m.id));
        }
        assert_eq!(seen, vec!["mc", "mb", "ma", "m0"]);
    }

    #[test]
    fn insert_advances_author_watermark() {
        let db = seeded();
        db.insert_message(&message("m1", "c1", "u1", 42)).unwrap();
        assert_eq!(db.watermark("c1", "u1").unwrap(), Some(42));
        assert_eq!(db.watermark("c1", "u2").unwrap(), None);
    }

    #[test]
    fn delete_removes_message_and_reactions() {
        let db = seeded();
        db.insert_message(&message("m1", "c1", "u1", 1)).unwrap();
        db.toggle_reaction("m1", "u2", "👍", 2).unwrap();

        let removed = db.delete_message("m1").unwrap();
        assert_eq!(removed.chat_id, "c1");
        assert!(db.get_message("m1").unwrap().is_none());
        assert!(matches!(db.reaction_counts("m1"), Err(StoreError::NotFound(_))));
        assert!(matches!(db.delete_message("m1"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn pin_toggles() {
        let db = seeded();
        db.insert_message(&message("m1", "c1", "u1", 1)).unwrap();

        let pinned = db.toggle_pin("m1", "u2", 5).unwrap();
        assert_eq!(pinned.pinned_by.as_deref(), Some("u2"));
        assert_eq!(pinned.pinned_at, Some(5));

        let unpinned = db.toggle_pin("m1", "u2", 6).unwrap();
        assert!(unpinned.pinned_at.is_none());
    }

    #[test]
    fn rejoin_starts_without_watermark() {
        let db = seeded();
        db.insert_message(&message("m1", "c1", "u2", 7)).unwrap();
        assert_eq!(db.watermark("c1", "u2").unwrap(), Some(7));

        assert!(db.remove_member("c1", "u2").unwrap());
        assert!(!db.is_member("c1", "u2").unwrap());
        assert!(db.add_member("c1", "u2", "member", 8).unwrap());
        assert_eq!(db.watermark("c1", "u2").unwrap(), None);
    }

    #[test]
    fn duplicate_message_id_is_a_conflict() {
        let db = seeded();
        db.insert_message(&message("m1", "c1", "u1", 1)).unwrap();
        let err = db.insert_message(&message("m1", "c1", "u1", 2)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
