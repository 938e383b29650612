//! High-level client for chatting through a browser-driven assistant.
//!
//! Wraps `wisp-browser` and `wisp-capture` behind a small API:
//!
//! ```no_run
//! # async fn run() -> wisp_client::Result<()> {
//! use wisp_client::{ChatClient, ChatRequest};
//!
//! let client = ChatClient::connect(9222, Default::default()).await?;
//! let reply = client.chat(&ChatRequest::new("hello")).await?;
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;

pub use client::{ChatClient, ChatReply, ChatRequest, StreamDelta};
pub use error::{Error, Result};
