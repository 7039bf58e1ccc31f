//! Seams between the dispatcher and its collaborators. `Database` is the
//! production implementation of both.

use anyhow::Result;
use uuid::Uuid;

use courier_db::Database;
use courier_db::models::NewMessage;
use courier_types::models::{ConversationSummary, Message};

/// Identity lookups owned by the user subsystem.
pub trait UserDirectory: Send + Sync {
    fn user_exists(&self, id: Uuid) -> Result<bool>;
}

/// Durable message history grouped by participant pair.
pub trait ConversationStore: Send + Sync {
    /// Persist a message atomically and return it as stored.
    fn append_message(&self, msg: &NewMessage) -> Result<Message>;

    /// Messages between `a` and `b`, either direction, oldest first.
    fn history_for(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>>;

    fn conversations_for(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>>;
}

impl UserDirectory for Database {
    fn user_exists(&self, id: Uuid) -> Result<bool> {
        Database::user_exists(self, id)
    }
}

impl ConversationStore for Database {
    fn append_message(&self, msg: &NewMessage) -> Result<Message> {
        Database::append_message(self, msg)?.into_message()
    }

    fn history_for(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        Database::history_for(self, a, b)?
            .into_iter()
            .map(|row| row.into_message())
            .collect()
    }

    fn conversations_for(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        Database::conversations_for(self, user_id)?
            .into_iter()
            .map(|row| row.into_summary(user_id))
            .collect()
    }
}
