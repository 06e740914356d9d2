use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Timestamps are integer milliseconds since the epoch so watermark
/// comparisons are exact.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL,
            last_seen   INTEGER
        );

        CREATE TABLE IF NOT EXISTS chats (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_members (
            chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            role        TEXT NOT NULL DEFAULT 'member',
            joined_at   INTEGER NOT NULL,
            PRIMARY KEY (chat_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_members_user
            ON chat_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            chat_id         TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            kind            TEXT NOT NULL,
            content         TEXT NOT NULL,
            reply_to_id     TEXT,
            forwarded_from  TEXT,
            created_at      INTEGER NOT NULL,
            edited_at       INTEGER,
            pinned_by       TEXT,
            pinned_at       INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at, id);

        CREATE TABLE IF NOT EXISTS read_watermarks (
            chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            upto        INTEGER NOT NULL,
            PRIMARY KEY (chat_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            PRIMARY KEY (message_id, user_id, emoji)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
