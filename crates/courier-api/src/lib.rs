pub mod conversations;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod state;
pub mod store;
