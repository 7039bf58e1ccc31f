use axum::{Extension, Json, extract::State};

use courier_types::api::{Claims, OnlineUsersResponse};
use courier_types::models::ConversationSummary;

use crate::dispatcher::DispatchError;
use crate::state::AppState;

/// GET /conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationSummary>>, DispatchError> {
    let conversations = state.dispatcher.conversations(claims.sub).await?;
    Ok(Json(conversations))
}

/// GET /users/online -- snapshot for clients that are not connected to the gateway.
pub async fn online_users(State(state): State<AppState>) -> Json<OnlineUsersResponse> {
    Json(OnlineUsersResponse {
        user_ids: state.registry.online_user_ids().await,
    })
}
