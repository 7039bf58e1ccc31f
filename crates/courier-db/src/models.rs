//! Database row types. These map directly to SQLite rows; conversion into
//! the wire models in `courier-types` is fallible because ids and timestamps
//! are stored as text.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use courier_types::models::{ConversationSummary, Message};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub participant_lo: String,
    pub participant_hi: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub seq: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub created_at: String,
}

/// A message about to be appended. `created_at` is a lower bound: the store
/// may move it forward so history never goes backwards in time.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub text: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id, "message id")?,
            conversation_id: parse_id(&self.conversation_id, "conversation_id")?,
            sender_id: parse_id(&self.sender_id, "sender_id")?,
            receiver_id: parse_id(&self.receiver_id, "receiver_id")?,
            text: self.text,
            image: self.image,
            created_at: parse_timestamp(&self.created_at)
                .with_context(|| format!("message {}", self.id))?,
        })
    }
}

impl ConversationRow {
    /// Summary as seen from `user_id`'s side of the pair.
    pub fn into_summary(self, user_id: Uuid) -> Result<ConversationSummary> {
        let lo = parse_id(&self.participant_lo, "participant_lo")?;
        let hi = parse_id(&self.participant_hi, "participant_hi")?;
        let peer_id = if lo == user_id { hi } else { lo };

        Ok(ConversationSummary {
            id: parse_id(&self.id, "conversation id")?,
            peer_id,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Fixed-width RFC 3339 so that text comparison in SQL matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') default has no timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("corrupt timestamp '{}'", raw))
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("corrupt {} '{}'", what, raw))
}
