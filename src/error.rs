use thiserror::Error;

/// Errors raised by the conversation client.
///
/// None of them is fatal: the client loop turns each one into a log line, the
/// message view's error slot, or a user notice.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("server rejected message: {0}")]
    Rejected(String),

    #[error("push channel is not open")]
    ChannelNotOpen,

    #[error("invalid configuration: {0}")]
    Config(String),
}
