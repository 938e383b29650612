//! Browser glue for driving a hosted chat frontend over the Chrome DevTools
//! Protocol.
//!
//! Attaches to a user-owned Chrome started with `--remote-debugging-port`,
//! sends messages through the real page UI, and captures the chat API
//! responses off the wire for the decoder in `wisp-capture`.

pub mod capture;
pub mod chat;
pub mod connect;
pub mod debug;
pub mod error;

pub use capture::spawn_response_capture;
pub use chat::{SendOptions, send_message, wait_for_element};
pub use connect::{BASE_URL, BrowserSession};
pub use debug::{save_html, save_screenshot};
pub use error::{Error, Result};
