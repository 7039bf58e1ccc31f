pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use courier_api::conversations;
use courier_api::dispatcher::MessageDispatcher;
use courier_api::messages;
use courier_api::middleware::require_auth;
use courier_api::state::{AppState, AppStateInner};
use courier_db::Database;
use courier_gateway::auth::verify_token;
use courier_gateway::connection;
use courier_gateway::registry::ConnectionRegistry;

/// Wire the store, the registry and the dispatcher together.
pub fn app_state(db: Arc<Database>, jwt_secret: String) -> AppState {
    let registry = ConnectionRegistry::new();
    let dispatcher = MessageDispatcher::new(db.clone(), db, registry.clone());

    Arc::new(AppStateInner {
        dispatcher,
        registry,
        jwt_secret,
    })
}

pub fn build_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/messages/{peer_id}", get(messages::get_messages))
        .route("/messages/send/{peer_id}", post(messages::send_message))
        .route("/conversations", get(conversations::list_conversations))
        .route("/users/online", get(conversations::online_users))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// The identity check happens here, before the upgrade: a rejected
/// handshake never reaches the registry.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or(query.token.as_deref())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = verify_token(token, &state.jwt_secret).ok_or_else(|| {
        warn!("Rejected gateway handshake with invalid token");
        StatusCode::UNAUTHORIZED
    })?;

    let registry = state.registry.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, registry, claims.sub, claims.username)
    }))
}
