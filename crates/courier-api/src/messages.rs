use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use courier_types::api::{Claims, SendMessageRequest};
use courier_types::models::Message;

use crate::dispatcher::DispatchError;
use crate::error::ApiError;
use crate::state::AppState;

/// POST /messages/send/{peer_id}
pub async fn send_message(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let message = state
        .dispatcher
        .send(claims.sub, peer_id, req.into())
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /messages/{peer_id}
pub async fn get_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, DispatchError> {
    let messages = state.dispatcher.history(claims.sub, peer_id).await?;
    Ok(Json(messages))
}
