//! Core types for intercepted response capture

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire format a response body was decoded as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// One well-formed JSON document
    Standard,
    /// Concatenated JSON documents, typically one token fragment each
    Streaming,
    /// Neither decode path found anything
    Unknown,
}

/// One intercepted network response, immutable once captured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
    /// Arrival time as unix millis
    pub arrival_time_ms: i64,
    /// Whether this response answered a conversation-creation request
    #[serde(default)]
    pub from_new_conversation: bool,
}

impl RawResponse {
    pub fn new(
        url: impl Into<String>,
        status: u16,
        body: impl Into<String>,
        from_new_conversation: bool,
    ) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
            arrival_time_ms: chrono::Utc::now().timestamp_millis(),
            from_new_conversation,
        }
    }
}

/// One self-contained structured unit decoded from a response body.
///
/// Shape matching is deterministic: inside a `result` object a `token` field
/// wins, then a `message` object, then a bare `responseId`; a top-level
/// `response` object is always a final message. Everything else is
/// `Unrecognized`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodedObject {
    /// A single streamed token
    TokenFragment {
        token: String,
        response_id: Option<String>,
        is_thinking: bool,
        is_soft_stop: bool,
    },
    /// A complete assistant message.
    ///
    /// Presence of this shape is treated as conclusive proof of completion.
    /// If the upstream ever emits intermediate message snapshots this would
    /// complete early; no such snapshot has been observed.
    FinalMessage {
        response_id: Option<String>,
        content: String,
        is_thinking: bool,
        is_soft_stop: bool,
        web_search_results: Vec<Value>,
        file_attachments: Vec<Value>,
        steps: Vec<Value>,
    },
    /// Decoded structurally but matched no known shape
    Unrecognized,
}

impl DecodedObject {
    /// Get the token if this is a token fragment
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::TokenFragment { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Check if this is a complete assistant message
    pub fn is_final_message(&self) -> bool {
        matches!(self, Self::FinalMessage { .. })
    }
}

/// Result of decoding one raw response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub format: ResponseFormat,
    /// Decoded objects in the order they appeared in the body
    pub objects: Vec<DecodedObject>,
    /// Chunks discovered by the scanner (or 1 for standard format)
    pub chunks_total: usize,
    /// Chunks that decoded successfully
    pub chunks_valid: usize,
    /// Concatenation of all tokens accumulated so far, not just this body's
    pub text: String,
    pub response_id: Option<String>,
    pub is_complete: bool,
}

impl ParseOutcome {
    /// Whether this body contributed anything decodable
    pub fn succeeded(&self) -> bool {
        match self.format {
            ResponseFormat::Standard => true,
            ResponseFormat::Streaming => self.chunks_valid > 0,
            ResponseFormat::Unknown => false,
        }
    }

    pub(crate) fn unknown() -> Self {
        Self {
            format: ResponseFormat::Unknown,
            objects: Vec::new(),
            chunks_total: 0,
            chunks_valid: 0,
            text: String::new(),
            response_id: None,
            is_complete: false,
        }
    }
}

/// Normalized view over either response representation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseFields {
    pub conversation_id: Option<String>,
    pub response_id: Option<String>,
    pub content: String,
    pub is_thinking: Option<bool>,
    pub is_soft_stop: Option<bool>,
    /// Set for token-accumulation responses
    pub token_count: Option<usize>,
    /// Set for token-accumulation responses
    pub is_complete: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub web_search_results: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_attachments: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Value>,
}

/// Capture diagnostics attached to aggregate retrievals
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub conversation_id: String,
    pub response_id: Option<String>,
    pub total_responses: usize,
    pub pending_requests: usize,
    pub completed_requests: usize,
    pub from_new_conversation: bool,
    pub is_complete: bool,
    pub last_token_at_ms: Option<i64>,
}

/// Where the aggregate content came from
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ResponseContent {
    /// Reconstructed from the accumulated token stream
    TokenStream {
        accumulated_text: String,
        tokens_count: usize,
        is_complete: bool,
    },
    /// Fallback reparse of the last raw response; used only when the
    /// conversation never entered streaming mode
    Reparsed { outcome: ParseOutcome },
}

/// Complete aggregate view of one conversation's captured exchange
#[derive(Debug, Clone, Serialize)]
pub struct FullResponse {
    pub conversation_id: String,
    pub response_id: Option<String>,
    pub content: ResponseContent,
    /// Body of the most recent raw response
    pub raw: String,
    pub status: u16,
    pub arrival_time_ms: i64,
    pub diagnostics: Diagnostics,
}

impl FullResponse {
    /// Best-effort reply text from either content source
    pub fn text(&self) -> &str {
        match &self.content {
            ResponseContent::TokenStream {
                accumulated_text, ..
            } => accumulated_text,
            ResponseContent::Reparsed { outcome } => &outcome.text,
        }
    }
}

/// Persisted debug export: the raw per-conversation log plus derived aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub conversation_id: String,
    pub response_id: Option<String>,
    pub responses: Vec<RawResponse>,
    pub accumulated_text: Option<String>,
    pub tokens_count: usize,
    pub is_complete: bool,
}
