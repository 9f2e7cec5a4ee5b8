use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("stream setup failed: {0}")]
    Stream(String),

    #[error("consumer setup failed: {0}")]
    Consumer(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("status encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("not connected")]
    NotConnected,
}
