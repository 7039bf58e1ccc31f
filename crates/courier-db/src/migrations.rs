use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Written by the identity service; messaging only reads it.
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per unordered pair, stored with participant_lo < participant_hi.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            participant_lo  TEXT NOT NULL REFERENCES users(id),
            participant_hi  TEXT NOT NULL REFERENCES users(id),
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE(participant_lo, participant_hi),
            CHECK(participant_lo < participant_hi)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_hi
            ON conversations(participant_hi);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            seq             INTEGER NOT NULL,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            receiver_id     TEXT NOT NULL REFERENCES users(id),
            text            TEXT,
            image           TEXT,
            created_at      TEXT NOT NULL,
            UNIQUE(conversation_id, seq),
            CHECK(text IS NOT NULL OR image IS NOT NULL),
            CHECK(sender_id <> receiver_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, seq);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
