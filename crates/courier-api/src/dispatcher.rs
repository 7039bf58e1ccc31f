use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use courier_db::models::NewMessage;
use courier_gateway::registry::{ConnectionRegistry, Delivery};
use courier_types::events::GatewayEvent;
use courier_types::models::{
    ConversationSummary, MAX_IMAGE_URL_LEN, MAX_TEXT_LEN, Message, MessageContent,
};

use crate::store::{ConversationStore, UserDirectory};

/// A send request that can never succeed as submitted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message must have text or an image")]
    EmptyContent,

    #[error("message text exceeds {} characters", MAX_TEXT_LEN)]
    TextTooLong,

    #[error("image URL exceeds {} bytes", MAX_IMAGE_URL_LEN)]
    ImageTooLong,

    #[error("cannot send a message to yourself")]
    SelfMessage,

    #[error("receiver does not exist")]
    UnknownReceiver,

    #[error("sender is not a known user")]
    UnknownSender,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("message store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
}

/// Persists direct messages and pushes each one to its receiver if the
/// receiver is connected.
#[derive(Clone)]
pub struct MessageDispatcher {
    store: Arc<dyn ConversationStore>,
    users: Arc<dyn UserDirectory>,
    registry: ConnectionRegistry,
    /// Held from append through push, so pushes leave in commit order.
    commit_order: Arc<Mutex<()>>,
}

impl MessageDispatcher {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        users: Arc<dyn UserDirectory>,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            store,
            users,
            registry,
            commit_order: Arc::new(Mutex::new(())),
        }
    }

    /// Validate, persist, then push to the receiver's live connection.
    ///
    /// The returned message carries the server-assigned id and timestamp.
    /// Whether the push landed is not part of the result: a receiver that is
    /// offline finds the message in its next history fetch.
    pub async fn send(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: MessageContent,
    ) -> Result<Message, DispatchError> {
        let content = validate_content(content)?;
        if sender_id == receiver_id {
            return Err(ValidationError::SelfMessage.into());
        }

        let users = self.users.clone();
        let (sender_known, receiver_known) = run_blocking(move || {
            Ok((users.user_exists(sender_id)?, users.user_exists(receiver_id)?))
        })
        .await?;
        if !sender_known {
            return Err(ValidationError::UnknownSender.into());
        }
        if !receiver_known {
            return Err(ValidationError::UnknownReceiver.into());
        }

        let new_message = NewMessage {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            text: content.text,
            image: content.image,
            created_at: Utc::now(),
        };

        let store = self.store.clone();
        let order_guard = self.commit_order.lock().await;
        let message = run_blocking(move || store.append_message(&new_message)).await?;

        // Committed. Nothing below may fail the send.
        let delivery = match self.registry.lookup(receiver_id).await {
            Some(handle) => handle.push(GatewayEvent::NewMessage(message.clone())),
            None => Delivery::Missed,
        };
        drop(order_guard);
        debug!(
            "message {} from {} to {}: {:?}",
            message.id, sender_id, receiver_id, delivery
        );

        Ok(message)
    }

    /// Full history between `user_id` and `peer_id`, oldest first.
    pub async fn history(&self, user_id: Uuid, peer_id: Uuid) -> Result<Vec<Message>, DispatchError> {
        if user_id == peer_id {
            return Err(ValidationError::SelfMessage.into());
        }

        let store = self.store.clone();
        run_blocking(move || store.history_for(user_id, peer_id)).await
    }

    pub async fn conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>, DispatchError> {
        let store = self.store.clone();
        run_blocking(move || store.conversations_for(user_id)).await
    }
}

/// Normalize content and enforce the per-field bounds.
pub fn validate_content(content: MessageContent) -> Result<MessageContent, ValidationError> {
    let content = content.normalized();

    if content.text.is_none() && content.image.is_none() {
        return Err(ValidationError::EmptyContent);
    }
    if content.text.as_ref().is_some_and(|t| t.chars().count() > MAX_TEXT_LEN) {
        return Err(ValidationError::TextTooLong);
    }
    if content.image.as_ref().is_some_and(|i| i.len() > MAX_IMAGE_URL_LEN) {
        return Err(ValidationError::ImageTooLong);
    }

    Ok(content)
}

/// Run blocking store work off the async runtime.
async fn run_blocking<T, F>(f: F) -> Result<T, DispatchError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            DispatchError::StoreUnavailable(e.into())
        })?
        .map_err(|e| {
            error!("store failure: {:#}", e);
            DispatchError::StoreUnavailable(e)
        })
}
