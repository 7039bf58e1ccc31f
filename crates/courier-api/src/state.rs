use std::sync::Arc;

use courier_gateway::registry::ConnectionRegistry;

use crate::dispatcher::MessageDispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub dispatcher: MessageDispatcher,
    pub registry: ConnectionRegistry,
    pub jwt_secret: String,
}
