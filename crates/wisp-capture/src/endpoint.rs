//! URL classification for the two tracked API endpoints.
//!
//! Only conversation-creation and ongoing-exchange responses are fed to the
//! tracker; everything else is ignored at the boundary.

use regex::Regex;
use std::sync::LazyLock;

/// Placeholder conversation id used until the server assigns one
pub const PLACEHOLDER_CONVERSATION_ID: &str = "new";

static NEW_CONVERSATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://grok\.com/rest/app-chat/conversations/new").expect("valid pattern")
});

static RESPONSES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://grok\.com/rest/app-chat/conversations/([^/]+)/responses")
        .expect("valid pattern")
});

static CONVERSATION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"conversations/([^/]+)/responses").expect("valid pattern"));

/// A tracked API endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Response to a conversation-creation request
    NewConversation,
    /// Response within an ongoing exchange
    ConversationResponses { conversation_id: String },
}

impl Endpoint {
    /// The conversation id this endpoint's responses are keyed under
    pub fn conversation_id(&self) -> &str {
        match self {
            Endpoint::NewConversation => PLACEHOLDER_CONVERSATION_ID,
            Endpoint::ConversationResponses { conversation_id } => conversation_id,
        }
    }
}

/// Classify a response URL, or `None` if it is not a tracked endpoint.
pub fn classify(url: &str) -> Option<Endpoint> {
    if NEW_CONVERSATION_RE.is_match(url) {
        return Some(Endpoint::NewConversation);
    }
    RESPONSES_RE.captures(url).map(|caps| Endpoint::ConversationResponses {
        conversation_id: caps[1].to_string(),
    })
}

/// Extract a conversation id from any URL shape that carries one.
pub fn extract_conversation_id(url: &str) -> Option<String> {
    if let Some(caps) = CONVERSATION_ID_RE.captures(url) {
        return Some(caps[1].to_string());
    }
    if url.contains("conversations/new") {
        return Some(PLACEHOLDER_CONVERSATION_ID.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_new_conversation() {
        let url = "https://grok.com/rest/app-chat/conversations/new";
        assert_eq!(classify(url), Some(Endpoint::NewConversation));
    }

    #[test]
    fn test_classify_ongoing_exchange() {
        let url =
            "https://grok.com/rest/app-chat/conversations/67b1a0f4-ddab-4c83-a66b-0cb29f8566ae/responses";
        assert_eq!(
            classify(url),
            Some(Endpoint::ConversationResponses {
                conversation_id: "67b1a0f4-ddab-4c83-a66b-0cb29f8566ae".to_string()
            })
        );
    }

    #[test]
    fn test_classify_rejects_other_urls() {
        assert_eq!(classify("https://grok.com/chat"), None);
        assert_eq!(classify("https://example.com/rest/app-chat/conversations/new"), None);
        assert_eq!(
            classify("https://grok.com/rest/app-chat/conversations/abc/attachments"),
            None
        );
    }

    #[test]
    fn test_extract_conversation_id() {
        assert_eq!(
            extract_conversation_id(
                "https://grok.com/rest/app-chat/conversations/67b1a0f4/responses"
            )
            .as_deref(),
            Some("67b1a0f4")
        );
        assert_eq!(
            extract_conversation_id("https://grok.com/rest/app-chat/conversations/new").as_deref(),
            Some(PLACEHOLDER_CONVERSATION_ID)
        );
        assert_eq!(extract_conversation_id("https://grok.com/chat"), None);
    }
}
