use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageContent;

// -- JWT Claims --

/// Claims issued by the identity service. Shared by the REST middleware and
/// the gateway upgrade handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl From<SendMessageRequest> for MessageContent {
    fn from(req: SendMessageRequest) -> Self {
        Self {
            text: req.text,
            image: req.image,
        }
    }
}

impl From<&MessageContent> for SendMessageRequest {
    fn from(content: &MessageContent) -> Self {
        Self {
            text: content.text.clone(),
            image: content.image.clone(),
        }
    }
}

// -- Presence --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUsersResponse {
    pub user_ids: Vec<Uuid>,
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
