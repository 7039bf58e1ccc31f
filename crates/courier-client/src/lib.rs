//! Client side of direct messaging: a per-conversation view that stays
//! consistent with the server across pushes, history fetches and
//! optimistic sends.

pub mod error;
pub mod feed;
pub mod session;
pub mod transport;
pub mod view;

pub use error::ClientError;
pub use feed::PushFeed;
pub use session::ChatSession;
pub use transport::{ChatTransport, HttpTransport};
pub use view::{ChatEntry, ChatView, DeliveryState, PendingSend, ViewState};
