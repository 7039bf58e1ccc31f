use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("gateway error: {0}")]
    Gateway(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("message must have text or an image")]
    EmptyMessage,

    #[error("no conversation is ready")]
    NotReady,

    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),
}
