//! Error types for wisp-browser

use thiserror::Error;

/// Result type alias using wisp-browser Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the browser
#[derive(Error, Debug)]
pub enum Error {
    /// DevTools protocol failure
    #[error("CDP error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    /// Failed to resolve the debugger websocket endpoint
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A required page element never appeared
    #[error("element not found: {0}")]
    MissingElement(String),

    /// A UI wait exceeded its deadline
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// A UI interaction failed for a non-protocol reason
    #[error("automation error: {0}")]
    Automation(String),

    /// Debug artifact write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
