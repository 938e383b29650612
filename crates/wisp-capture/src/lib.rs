//! wisp-capture: response decoding and completion tracking
//!
//! The reusable core of wisp. Raw response bodies intercepted from the chat
//! page are decoded incrementally into a canonical token stream, completion
//! is inferred from several independent signals, and callers query the
//! reconstructed reply without caring about transport details.

pub mod config;
pub mod decode;
pub mod endpoint;
pub mod error;
pub mod tracker;
pub mod types;

pub use config::CaptureConfig;
pub use decode::{ResponseDecoder, decode_stateless, split_chunks};
pub use endpoint::{Endpoint, PLACEHOLDER_CONVERSATION_ID, classify, extract_conversation_id};
pub use error::{CaptureError, Result};
pub use tracker::ResponseTracker;
pub use types::*;
