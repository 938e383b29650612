//! The high-level chat client.
//!
//! Ties a browser session, the capture task, and the response tracker
//! together behind two entry points: `chat` (send, wait, return the full
//! reply) and `chat_stream` (send, yield text deltas as they accumulate).

use crate::error::Result;
use async_stream::try_stream;
use futures::Stream;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use wisp_browser::{BrowserSession, SendOptions};
use wisp_capture::{CaptureConfig, CaptureError, ResponseFields, ResponseTracker};

/// How often the streaming view samples the accumulated text.
const STREAM_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// A message to send, plus UI options for sending it.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub message: String,
    pub new_chat: bool,
    pub think_mode: bool,
    pub deep_search: bool,
    pub files: Vec<PathBuf>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    fn send_options(&self) -> SendOptions {
        SendOptions {
            message: self.message.clone(),
            new_chat: self.new_chat,
            think_mode: self.think_mode,
            deep_search: self.deep_search,
            files: self.files.clone(),
        }
    }
}

/// The assistant's reply to one message.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub conversation_id: Option<String>,
    pub response_id: Option<String>,
    pub content: String,
    pub token_count: Option<usize>,
    pub is_thinking: Option<bool>,
    pub is_soft_stop: Option<bool>,
    pub is_complete: bool,
}

/// One increment of reply text.
#[derive(Debug, Clone)]
pub struct StreamDelta {
    /// New text since the previous delta
    pub delta: String,
    /// Everything accumulated so far
    pub text: String,
    pub is_complete: bool,
}

/// A connected chat session.
pub struct ChatClient {
    session: BrowserSession,
    tracker: Arc<Mutex<ResponseTracker>>,
    capture_task: JoinHandle<()>,
}

impl ChatClient {
    /// Attach to Chrome on `port` and start capturing chat API traffic.
    pub async fn connect(port: u16, config: CaptureConfig) -> Result<Self> {
        let session = BrowserSession::connect(port).await?;
        session.ensure_on_chat().await?;

        let tracker = Arc::new(Mutex::new(ResponseTracker::new(config)));
        let capture_task =
            wisp_browser::spawn_response_capture(session.page(), Arc::clone(&tracker)).await?;

        Ok(Self {
            session,
            tracker,
            capture_task,
        })
    }

    pub fn tracker(&self) -> &Arc<Mutex<ResponseTracker>> {
        &self.tracker
    }

    pub fn session(&self) -> &BrowserSession {
        &self.session
    }

    /// Send a message and wait for the complete reply.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        self.send(request).await?;
        self.wait_for_completion().await?;

        let fields = self.tracker.lock().get_response_fields()?;
        Ok(reply_from_fields(fields))
    }

    /// Send a message and stream reply text as it accumulates.
    ///
    /// The final delta carries `is_complete: true`; a wait-budget overrun
    /// ends the stream with `CaptureError::ResponseTimeout`.
    pub fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> impl Stream<Item = Result<StreamDelta>> + '_ {
        try_stream! {
            self.send(&request).await?;

            let budget = self.tracker.lock().config().wait_budget();
            let started = tokio::time::Instant::now();
            let mut emitted = String::new();

            loop {
                tokio::time::sleep(STREAM_SAMPLE_INTERVAL).await;

                let (text, complete) = {
                    let tracker = self.tracker.lock();
                    (tracker.accumulated_text(), tracker.is_response_complete())
                };

                if let Some(delta) = split_delta(&emitted, &text) {
                    emitted = text.clone();
                    yield StreamDelta {
                        delta,
                        text,
                        is_complete: false,
                    };
                }

                if complete {
                    yield StreamDelta {
                        delta: String::new(),
                        text: emitted.clone(),
                        is_complete: true,
                    };
                    break;
                }

                if started.elapsed() > budget {
                    Err(CaptureError::ResponseTimeout {
                        waited_secs: started.elapsed().as_secs_f64(),
                    })?;
                }
            }
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<()> {
        self.session.ensure_on_chat().await?;
        wisp_browser::send_message(self.session.page(), &request.send_options()).await?;
        Ok(())
    }

    /// Poll the tracker until the reply completes or the wait budget runs out.
    async fn wait_for_completion(&self) -> Result<()> {
        let (poll_interval, max_polls) = {
            let tracker = self.tracker.lock();
            let config = tracker.config();
            (config.poll_interval, config.max_polls)
        };

        let started = tokio::time::Instant::now();
        for _ in 0..max_polls {
            tokio::time::sleep(poll_interval).await;
            let tracker = self.tracker.lock();
            tracing::debug!(
                tokens = tracker.token_count(),
                conversation = ?tracker.current_conversation_id(),
                "polling for completion"
            );
            if tracker.is_response_complete() {
                return Ok(());
            }
        }

        Err(CaptureError::ResponseTimeout {
            waited_secs: started.elapsed().as_secs_f64(),
        }
        .into())
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.capture_task.abort();
    }
}

fn reply_from_fields(fields: ResponseFields) -> ChatReply {
    ChatReply {
        conversation_id: fields.conversation_id,
        response_id: fields.response_id,
        content: fields.content,
        token_count: fields.token_count,
        is_thinking: fields.is_thinking,
        is_soft_stop: fields.is_soft_stop,
        is_complete: fields.is_complete.unwrap_or(true),
    }
}

/// New suffix of `text` relative to what was already emitted.
///
/// `None` when nothing new arrived, or when the accumulated text diverged
/// from the emitted prefix (tokens are append-only, so divergence means the
/// tracker switched conversations mid-stream; suppress rather than re-emit).
fn split_delta(emitted: &str, text: &str) -> Option<String> {
    if text.len() > emitted.len() && text.starts_with(emitted) {
        return Some(text[emitted.len()..].to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_from_fields() {
        let fields = ResponseFields {
            conversation_id: Some("conv-1".to_string()),
            response_id: Some("resp-1".to_string()),
            content: "Hello there".to_string(),
            token_count: Some(3),
            is_complete: Some(true),
            ..Default::default()
        };
        let reply = reply_from_fields(fields);
        assert_eq!(reply.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(reply.content, "Hello there");
        assert_eq!(reply.token_count, Some(3));
        assert!(reply.is_complete);
    }

    #[test]
    fn test_reply_complete_defaults_true_for_reparsed_fields() {
        // Fields reparsed from a standard body carry no is_complete flag
        let fields = ResponseFields {
            content: "done".to_string(),
            ..Default::default()
        };
        assert!(reply_from_fields(fields).is_complete);
    }

    #[test]
    fn test_split_delta_yields_new_suffix_only() {
        assert_eq!(split_delta("", "Hello"), Some("Hello".to_string()));
        assert_eq!(split_delta("Hello", "Hello world"), Some(" world".to_string()));
    }

    #[test]
    fn test_split_delta_suppresses_no_growth_and_divergence() {
        assert_eq!(split_delta("Hello", "Hello"), None);
        assert_eq!(split_delta("Hello", "Hel"), None);
        assert_eq!(split_delta("Hello", "Goodbye all"), None);
    }
}
