use rusqlite::Connection;

use crate::queries::{OptionalExt, query_is_member};
use crate::{Database, Result, StoreError};

/// Result of a watermark advance.
pub struct MarkReadRow {
    pub previous: Option<i64>,
    pub current: i64,
    /// (message id, created_at) of messages by other members that the
    /// advance covered, newest first.
    pub newly_read: Vec<(String, i64)>,
}

/// Aggregate counts behind one message's receipt.
pub struct ReceiptCounts {
    pub read_count: u32,
    pub total_members: u32,
}

impl Database {
    /// Advance `user_id`'s watermark in `chat_id` to `max(current, upto)`.
    /// `upto` never reaches past the newest message in the chat, so a later
    /// message always starts unread.
    pub fn mark_read(&self, chat_id: &str, user_id: &str, upto: i64) -> Result<MarkReadRow> {
        self.with_tx(|tx| {
            if !query_is_member(tx, chat_id, user_id)? {
                return Err(StoreError::NotFound(format!(
                    "membership of {} in chat {}",
                    user_id, chat_id
                )));
            }

            let latest: Option<i64> = tx.query_row(
                "SELECT MAX(created_at) FROM messages WHERE chat_id = ?1",
                [chat_id],
                |row| row.get(0),
            )?;
            let upto = latest.map_or(upto, |latest| upto.min(latest));

            let previous = query_watermark(tx, chat_id, user_id)?;
            let current = advance(tx, chat_id, user_id, upto)?;

            let newly_read = if previous.is_some_and(|p| p >= current) {
                Vec::new()
            } else {
                let mut stmt = tx.prepare(
                    "SELECT id, created_at FROM messages
                     WHERE chat_id = ?1 AND created_at > ?2 AND created_at <= ?3
                       AND sender_id != ?4
                     ORDER BY created_at DESC, id DESC",
                )?;
                stmt.query_map(
                    rusqlite::params![chat_id, previous.unwrap_or(i64::MIN), current, user_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?
            };

            Ok(MarkReadRow {
                previous,
                current,
                newly_read,
            })
        })
    }

    pub fn watermark(&self, chat_id: &str, user_id: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| query_watermark(conn, chat_id, user_id))
    }

    /// Counts for a message created at `created_at`: current members whose
    /// watermark covers it, and the current member count.
    pub fn receipt_counts(&self, chat_id: &str, created_at: i64) -> Result<ReceiptCounts> {
        self.with_conn(|conn| query_receipt_counts(conn, chat_id, created_at))
    }

    /// Same as [`receipt_counts`](Self::receipt_counts) for many timestamps
    /// under one lock acquisition.
    pub fn receipt_counts_many(&self, chat_id: &str, timestamps: &[i64]) -> Result<Vec<ReceiptCounts>> {
        self.with_conn(|conn| {
            timestamps
                .iter()
                .map(|ts| query_receipt_counts(conn, chat_id, *ts))
                .collect()
        })
    }
}

/// Upsert keeping the maximum. Returns the watermark after the write.
pub(crate) fn advance(conn: &Connection, chat_id: &str, user_id: &str, upto: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO read_watermarks (chat_id, user_id, upto) VALUES (?1, ?2, ?3)
         ON CONFLICT(chat_id, user_id) DO UPDATE SET upto = MAX(upto, excluded.upto)",
        rusqlite::params![chat_id, user_id, upto],
    )?;
    query_watermark(conn, chat_id, user_id)?
        .ok_or_else(|| StoreError::NotFound(format!("watermark {}/{}", chat_id, user_id)))
}

fn query_watermark(conn: &Connection, chat_id: &str, user_id: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT upto FROM read_watermarks WHERE chat_id = ?1 AND user_id = ?2",
        [chat_id, user_id],
        |row| row.get(0),
    )
    .optional()
}

fn query_receipt_counts(conn: &Connection, chat_id: &str, created_at: i64) -> Result<ReceiptCounts> {
    // Only current members count, so read_count <= total_members always holds.
    let (read_count, total_members): (u32, u32) = conn.query_row(
        "SELECT
             COALESCE(SUM(CASE WHEN w.upto >= ?2 THEN 1 ELSE 0 END), 0),
             COUNT(*)
         FROM chat_members m
         LEFT JOIN read_watermarks w
           ON w.chat_id = m.chat_id AND w.user_id = m.user_id
         WHERE m.chat_id = ?1",
        rusqlite::params![chat_id, created_at],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(ReceiptCounts {
        read_count,
        total_members,
    })
}

#[cfg(test)]
mod tests {
    use crate::StoreError;
    use crate::queries::tests::{message, seeded};

    #[test]
    fn watermark_never_regresses() {
        let db = seeded();
        let first = db.mark_read("c1", "u2", 100).unwrap();
        assert_eq!(first.previous, None);
        assert_eq!(first.current, 100);

        let stale = db.mark_read("c1", "u2", 50).unwrap();
        assert_eq!(stale.previous, Some(100));
        assert_eq!(stale.current, 100);
        assert!(stale.newly_read.is_empty());
        assert_eq!(db.watermark("c1", "u2").unwrap(), Some(100));
    }

    #[test]
    fn newly_read_covers_only_the_advanced_range() {
        let db = seeded();
        for (id, at) in [("m1", 10), ("m2", 20), ("m3", 30)] {
            db.insert_message(&message(id, "c1", "u1", at)).unwrap();
        }

        let first = db.mark_read("c1", "u2", 20).unwrap();
        let ids: Vec<_> = first.newly_read.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);

        let second = db.mark_read("c1", "u2", 30).unwrap();
        assert_eq!(second.newly_read.len(), 1);
        assert_eq!(second.newly_read[0].0, "m3");

        // Idempotent
        assert!(db.mark_read("c1", "u2", 30).unwrap().newly_read.is_empty());
    }

    #[test]
    fn watermark_stops_at_newest_message() {
        let db = seeded();
        db.insert_message(&message("m1", "c1", "u1", 10)).unwrap();

        let row = db.mark_read("c1", "u2", 1_000_000).unwrap();
        assert_eq!(row.current, 10);

        db.insert_message(&message("m2", "c1", "u1", 20)).unwrap();
        let counts = db.receipt_counts("c1", 20).unwrap();
        assert_eq!((counts.read_count, counts.total_members), (1, 2));
    }

    #[test]
    fn non_member_cannot_mark_read() {
        let db = seeded();
        db.upsert_user("u3", "carol").unwrap();
        assert!(matches!(db.mark_read("c1", "u3", 1), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn receipt_counts_track_watermarks_and_membership() {
        let db = seeded();
        db.insert_message(&message("m1", "c1", "u1", 10)).unwrap();

        let counts = db.receipt_counts("c1", 10).unwrap();
        assert_eq!((counts.read_count, counts.total_members), (1, 2));

        db.mark_read("c1", "u2", 10).unwrap();
        let counts = db.receipt_counts("c1", 10).unwrap();
        assert_eq!((counts.read_count, counts.total_members), (2, 2));

        db.remove_member("c1", "u2").unwrap();
        let counts = db.receipt_counts("c1", 10).unwrap();
        assert_eq!((counts.read_count, counts.total_members), (1, 1));
    }
}
