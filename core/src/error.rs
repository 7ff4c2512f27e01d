use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParleyErr>;

/// Errors surfaced by the chat transport and session.
///
/// Values are cloned into listener events and kept as the session's
/// `current_error`, so sources are flattened to text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParleyErr {
    /// No bearer token could be obtained for the connect attempt.
    #[error("authentication required: {0}")]
    MissingCredential(String),

    /// `send` was called while the channel was not open.
    #[error("chat stream is not open")]
    NotOpen,

    #[error("chat stream transport error: {0}")]
    Transport(String),

    /// The channel closed with a code other than a normal closure.
    #[error("chat stream closed unexpectedly (code {code}){}", fmt_reason(.reason))]
    AbnormalClose { code: u16, reason: String },

    /// `error` frame pushed by the server.
    #[error("server error: {0}")]
    Server(String),

    #[error("failed to encode outbound frame: {0}")]
    Encode(String),

    #[error("invalid chat endpoint: {0}")]
    InvalidEndpoint(String),
}

fn fmt_reason(reason: &str) -> String {
    if reason.is_empty() {
        String::new()
    } else {
        format!(": {reason}")
    }
}

impl From<serde_json::Error> for ParleyErr {
    fn from(err: serde_json::Error) -> Self {
        ParleyErr::Encode(err.to_string())
    }
}

impl From<url::ParseError> for ParleyErr {
    fn from(err: url::ParseError) -> Self {
        ParleyErr::InvalidEndpoint(err.to_string())
    }
}
