//! Error types for wisp-client

use thiserror::Error;

/// Result type alias using wisp-client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the chat client
#[derive(Error, Debug)]
pub enum Error {
    /// Capture or decode failure
    #[error(transparent)]
    Capture(#[from] wisp_capture::CaptureError),

    /// Browser automation failure
    #[error(transparent)]
    Browser(#[from] wisp_browser::Error),
}
