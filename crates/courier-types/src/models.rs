use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on message text, counted in chars.
pub const MAX_TEXT_LEN: usize = 2000;

/// Upper bound on an image URL, counted in bytes.
pub const MAX_IMAGE_URL_LEN: usize = 2048;

/// A persisted direct message. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// URL of an image already hosted elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// True if `a` and `b` are this message's two participants, in either order.
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

/// Body of a message as submitted by a sender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            text: None,
            image: Some(url.into()),
        }
    }

    /// Trims both fields and turns blank ones into `None`.
    pub fn normalized(self) -> Self {
        fn clean(field: Option<String>) -> Option<String> {
            field
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        }

        Self {
            text: clean(self.text),
            image: clean(self.image),
        }
    }

    pub fn is_empty(&self) -> bool {
        let blank = |f: &Option<String>| f.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.text) && blank(&self.image)
    }
}

/// One entry of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub peer_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Time of the most recent message.
    pub updated_at: DateTime<Utc>,
}
