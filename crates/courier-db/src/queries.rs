use crate::Database;
use crate::models::{ConversationRow, MessageRow, NewMessage, UserRow, format_timestamp};
use anyhow::{Result, bail};
use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

impl Database {
    // -- Users --

    pub fn insert_user(&self, id: Uuid, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)",
                (id.to_string(), username),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn user_exists(&self, id: Uuid) -> Result<bool> {
        Ok(self.get_user_by_id(id)?.is_some())
    }

    // -- Conversations --

    /// Returns the conversation for the unordered pair {a, b}, creating it
    /// on first use. `(a, b)` and `(b, a)` always yield the same row.
    pub fn find_or_create_conversation(&self, a: Uuid, b: Uuid) -> Result<ConversationRow> {
        self.with_conn(|conn| find_or_create_conversation(conn, a, b))
    }

    pub fn find_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, a, b))
    }

    /// Conversations `user_id` takes part in, most recently active first.
    pub fn conversations_for(&self, user_id: Uuid) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, participant_lo, participant_hi, created_at, updated_at
                 FROM conversations
                 WHERE participant_lo = ?1 OR participant_hi = ?1
                 ORDER BY updated_at DESC, id ASC",
            )?;

            let rows = stmt
                .query_map([user_id.to_string()], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Persists a message and links it into its conversation in a single
    /// transaction. Returns the stored row, whose `created_at` is never
    /// earlier than the previous message in the same conversation.
    pub fn append_message(&self, msg: &NewMessage) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let conversation = find_or_create_conversation(&tx, msg.sender_id, msg.receiver_id)?;

            let (last_seq, last_created_at): (i64, Option<String>) = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0), MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [&conversation.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let mut created_at = format_timestamp(msg.created_at);
            if let Some(last) = last_created_at {
                if last > created_at {
                    created_at = last;
                }
            }

            let row = MessageRow {
                id: msg.id.to_string(),
                conversation_id: conversation.id,
                seq: last_seq + 1,
                sender_id: msg.sender_id.to_string(),
                receiver_id: msg.receiver_id.to_string(),
                text: msg.text.clone(),
                image: msg.image.clone(),
                created_at,
            };

            tx.execute(
                "INSERT INTO messages (id, conversation_id, seq, sender_id, receiver_id, text, image, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    row.id,
                    row.conversation_id,
                    row.seq,
                    row.sender_id,
                    row.receiver_id,
                    row.text,
                    row.image,
                    row.created_at,
                ],
            )?;

            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                (&row.conversation_id, &row.created_at),
            )?;

            tx.commit()?;
            Ok(row)
        })
    }

    /// Every message exchanged between `a` and `b`, either direction, oldest first.
    pub fn history_for(&self, a: Uuid, b: Uuid) -> Result<Vec<MessageRow>> {
        let (lo, hi) = ordered_pair(a, b)?;

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.seq, m.sender_id, m.receiver_id, m.text, m.image, m.created_at
                 FROM messages m
                 JOIN conversations c ON m.conversation_id = c.id
                 WHERE c.participant_lo = ?1 AND c.participant_hi = ?2
                 ORDER BY m.created_at ASC, m.seq ASC",
            )?;

            let rows = stmt
                .query_map((lo, hi), |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        seq: row.get(2)?,
                        sender_id: row.get(3)?,
                        receiver_id: row.get(4)?,
                        text: row.get(5)?,
                        image: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn count_conversations(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?)
        })
    }
}

/// Canonical (lo, hi) ordering of a participant pair.
fn ordered_pair(a: Uuid, b: Uuid) -> Result<(String, String)> {
    if a == b {
        bail!("a conversation needs two distinct participants");
    }
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    Ok((lo.to_string(), hi.to_string()))
}

fn find_or_create_conversation(conn: &Connection, a: Uuid, b: Uuid) -> Result<ConversationRow> {
    let (lo, hi) = ordered_pair(a, b)?;
    let now = format_timestamp(Utc::now());

    conn.execute(
        "INSERT OR IGNORE INTO conversations (id, participant_lo, participant_hi, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        rusqlite::params![Uuid::new_v4().to_string(), lo, hi, now],
    )?;

    let row = conn.query_row(
        "SELECT id, participant_lo, participant_hi, created_at, updated_at
         FROM conversations WHERE participant_lo = ?1 AND participant_hi = ?2",
        (&lo, &hi),
        map_conversation,
    )?;

    Ok(row)
}

fn query_conversation(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<ConversationRow>> {
    let (lo, hi) = ordered_pair(a, b)?;

    conn.query_row(
        "SELECT id, participant_lo, participant_hi, created_at, updated_at
         FROM conversations WHERE participant_lo = ?1 AND participant_hi = ?2",
        (lo, hi),
        map_conversation,
    )
    .optional()
}

fn query_user_by_id(conn: &Connection, id: Uuid) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare("SELECT id, username, created_at FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id.to_string()], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                created_at: row.get(2)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_lo: row.get(1)?,
        participant_hi: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
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
