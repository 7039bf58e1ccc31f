pub mod auth;
pub mod connection;
pub mod registry;
