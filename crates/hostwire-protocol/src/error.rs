/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope itself is malformed (not an object, no message type, ...).
    #[error("malformed message envelope: {0}")]
    MalformedEnvelope(String),

    /// A message that requires a payload arrived without one.
    #[error("message '{0}' requires a payload")]
    MissingPayload(String),

    /// Path converter construction was given an empty prefix.
    #[error("path converter requires a non-empty {0} path")]
    EmptyPathPrefix(&'static str),

    /// Path prefix could not be made absolute.
    #[error("cannot normalize path prefix '{path}': {source}")]
    InvalidPathPrefix {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
