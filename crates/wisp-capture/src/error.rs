//! Error types for wisp-capture

use thiserror::Error;

/// Result type alias using wisp-capture CaptureError
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors surfaced by the capture layer.
///
/// Chunk-level decode failures are counted in `ParseOutcome` and never raised;
/// these variants cover whole-operation failures only.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Lookup miss: the conversation id is unknown
    #[error("no conversation data available")]
    NoConversationData,

    /// The conversation is known but its raw log is empty
    #[error("no responses captured for this conversation")]
    NoResponsesCaptured,

    /// Neither decode path could make sense of a body
    #[error("could not decode response body: {0}")]
    DecodeFailed(String),

    /// No entry in the raw log decoded successfully
    #[error("no valid response data available")]
    NoValidResponseData,

    /// Polling for completion exhausted its budget
    #[error("response did not complete within {waited_secs:.1}s")]
    ResponseTimeout { waited_secs: f64 },

    /// Debug export write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Export serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CaptureError {
    /// Whether the caller should give up on this exchange entirely
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureError::ResponseTimeout { .. }
                | CaptureError::NoConversationData
                | CaptureError::NoResponsesCaptured
        )
    }
}
