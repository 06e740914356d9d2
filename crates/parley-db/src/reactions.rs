use rusqlite::Connection;

use crate::models::ReactionCountRow;
use crate::queries::OptionalExt;
use crate::{Database, Result, StoreError};

pub struct ToggleRow {
    /// true = the reaction now exists, false = it was removed
    pub added: bool,
    pub chat_id: String,
}

impl Database {
    /// Toggle a reaction: removes if exists, inserts if not. The existence
    /// check and the flip run in one IMMEDIATE transaction, so two racing
    /// toggles of the same triple always serialize.
    pub fn toggle_reaction(&self, message_id: &str, user_id: &str, emoji: &str, at: i64) -> Result<ToggleRow> {
        self.with_tx(|tx| {
            let chat_id = query_message_chat(tx, message_id)?
                .ok_or_else(|| StoreError::NotFound(format!("message {}", message_id)))?;

            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id, user_id, emoji],
            )?;

            if removed == 0 {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![message_id, user_id, emoji, at],
                )?;
            }

            Ok(ToggleRow {
                added: removed == 0,
                chat_id,
            })
        })
    }

    /// Emoji counts for one message, sorted by emoji.
    pub fn reaction_counts(&self, message_id: &str) -> Result<Vec<(String, u32)>> {
        self.with_conn(|conn| {
            if query_message_chat(conn, message_id)?.is_none() {
                return Err(StoreError::NotFound(format!("message {}", message_id)));
            }
            let mut stmt = conn.prepare(
                "SELECT emoji, COUNT(*) FROM reactions
                 WHERE message_id = ?1
                 GROUP BY emoji
                 ORDER BY emoji",
            )?;
            let rows = stmt
                .query_map([message_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch reaction counts for a set of message IDs.
    pub fn reaction_counts_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionCountRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, emoji, COUNT(*) FROM reactions
                 WHERE message_id IN ({})
                 GROUP BY message_id, emoji",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
                    Ok(ReactionCountRow {
                        message_id: row.get(0)?,
                        emoji: row.get(1)?,
                        count: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_message_chat(conn: &Connection, message_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT chat_id FROM messages WHERE id = ?1",
        [message_id],
        |row| row.get(0),
    )
    .optional()
}
