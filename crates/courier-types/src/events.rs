use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events pushed from the server over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is registered
    Ready { user_id: Uuid },

    /// Full set of currently connected user ids, sorted, no duplicates
    OnlineUsers { user_ids: Vec<Uuid> },

    /// A message addressed to this connection's user was persisted
    NewMessage(Message),
}
