//! Per-conversation response tracking and completion detection.
//!
//! The tracker wraps the incremental decoder: every intercepted response is
//! fed in arrival order, raw bodies are kept in an append-only log, and
//! completion is inferred by corroborating several independent signals. The
//! upstream gives no single authoritative "done" event across the one-shot
//! and streamed response shapes, so false negatives (never declaring
//! complete) are treated as worse than rare false positives.

use crate::config::CaptureConfig;
use crate::decode::{self, ResponseDecoder};
use crate::endpoint::{self, Endpoint, PLACEHOLDER_CONVERSATION_ID};
use crate::error::{CaptureError, Result};
use crate::types::{
    DecodedObject, Diagnostics, ExportDocument, FullResponse, ParseOutcome, RawResponse,
    ResponseContent, ResponseFields,
};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

/// State for one conversation, created on first observed response.
#[derive(Debug)]
struct ConversationState {
    conversation_id: String,
    decoder: ResponseDecoder,
    raw_log: Vec<RawResponse>,
    last_token_at: Option<Instant>,
    last_token_at_ms: Option<i64>,
    from_new_conversation: bool,
}

impl ConversationState {
    fn new(conversation_id: String, from_new_conversation: bool) -> Self {
        Self {
            conversation_id,
            decoder: ResponseDecoder::new(),
            raw_log: Vec::new(),
            last_token_at: None,
            last_token_at_ms: None,
            from_new_conversation,
        }
    }
}

/// Tracks captured responses across conversations and answers completion and
/// aggregation queries.
///
/// Single-writer: all feeds for a conversation must arrive in order from one
/// logical task. Wrap in a mutex when shared across tasks.
pub struct ResponseTracker {
    config: CaptureConfig,
    conversations: HashMap<String, ConversationState>,
    /// Placeholder → resolved id mapping; both keys stay queryable
    aliases: HashMap<String, String>,
    /// Request URL → still pending
    pending_requests: HashMap<String, bool>,
    current: Option<String>,
}

impl Default for ResponseTracker {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

impl ResponseTracker {
    pub fn new(config: CaptureConfig) -> Self {
        tracing::debug!(
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            "initializing response tracker"
        );
        Self {
            config,
            conversations: HashMap::new(),
            aliases: HashMap::new(),
            pending_requests: HashMap::new(),
            current: None,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Follow the alias table to the canonical conversation key.
    ///
    /// If the upstream ever reused a conversation id, a later exchange would
    /// land on the earlier (already complete) state; the alias table keeps one
    /// state per resolved id so the attribution is at least deterministic.
    fn resolve_alias<'a>(&'a self, id: &'a str) -> &'a str {
        self.aliases.get(id).map(String::as_str).unwrap_or(id)
    }

    /// Feed one intercepted network response.
    ///
    /// Returns the parse outcome for ongoing-exchange responses, or `None`
    /// when the URL is untracked, the body is empty, or the response answered
    /// a conversation-creation request.
    pub fn feed(
        &mut self,
        url: &str,
        status: u16,
        body: &str,
        is_request_pending: bool,
    ) -> Option<ParseOutcome> {
        let endpoint = endpoint::classify(url)?;
        self.pending_requests
            .insert(url.to_string(), is_request_pending);

        let from_new = matches!(endpoint, Endpoint::NewConversation);
        let key = self
            .resolve_alias(endpoint.conversation_id())
            .to_string();
        self.current = Some(key.clone());

        let state = self
            .conversations
            .entry(key.clone())
            .or_insert_with(|| ConversationState::new(key.clone(), from_new));

        if body.is_empty() {
            tracing::debug!(url, "empty response body");
            return None;
        }

        state
            .raw_log
            .push(RawResponse::new(url, status, body, from_new));

        match endpoint {
            Endpoint::NewConversation => {
                self.register_new_conversation(body);
                None
            }
            Endpoint::ConversationResponses { .. } => Some(self.ingest_exchange_body(&key, body)),
        }
    }

    /// Pull the server-assigned id out of a conversation-creation body and
    /// re-key the placeholder state under it.
    fn register_new_conversation(&mut self, body: &str) {
        let resolved = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("conversationId").and_then(|id| id.as_str().map(String::from)));

        match resolved {
            Some(resolved) if resolved != PLACEHOLDER_CONVERSATION_ID => {
                tracing::info!(conversation_id = %resolved, "resolved new conversation id");
                if let Some(mut state) = self.conversations.remove(PLACEHOLDER_CONVERSATION_ID) {
                    state.conversation_id = resolved.clone();
                    match self.conversations.entry(resolved.clone()) {
                        std::collections::hash_map::Entry::Occupied(mut existing) => {
                            // Keep the existing decoder; the placeholder only
                            // ever saw creation responses, which carry no tokens.
                            let mut merged = state.raw_log;
                            merged.append(&mut existing.get_mut().raw_log);
                            existing.get_mut().raw_log = merged;
                            existing.get_mut().from_new_conversation = true;
                        }
                        std::collections::hash_map::Entry::Vacant(slot) => {
                            slot.insert(state);
                        }
                    }
                }
                self.aliases
                    .insert(PLACEHOLDER_CONVERSATION_ID.to_string(), resolved.clone());
                self.current = Some(resolved);
            }
            _ => {
                tracing::warn!("no conversationId found in new conversation response");
            }
        }
    }

    fn ingest_exchange_body(&mut self, key: &str, body: &str) -> ParseOutcome {
        let state = self
            .conversations
            .get_mut(key)
            .expect("state created by feed");

        let tokens_before = state.decoder.token_count();
        let mut outcome = state.decoder.decode(body);

        // An empty-string token is a heuristic completion signal of its own.
        if outcome
            .objects
            .iter()
            .any(|o| o.token().is_some_and(str::is_empty))
        {
            state.decoder.mark_complete();
            outcome.is_complete = true;
        }

        let tokens_added = state.decoder.token_count() - tokens_before;
        if tokens_added > 0 {
            state.last_token_at = Some(Instant::now());
            state.last_token_at_ms = Some(chrono::Utc::now().timestamp_millis());
            tracing::debug!(tokens_added, total = state.decoder.token_count(), "tokens received");
        }

        outcome
    }

    pub fn current_conversation_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn response_id(&self) -> Option<String> {
        self.current_state()
            .and_then(|s| s.decoder.response_id().map(String::from))
    }

    /// Concatenated token text for the active conversation
    pub fn accumulated_text(&self) -> String {
        self.current_state()
            .map(|s| s.decoder.accumulated_text())
            .unwrap_or_default()
    }

    pub fn token_count(&self) -> usize {
        self.current_state()
            .map(|s| s.decoder.token_count())
            .unwrap_or(0)
    }

    fn current_state(&self) -> Option<&ConversationState> {
        self.current
            .as_deref()
            .and_then(|id| self.conversations.get(id))
    }

    fn lookup(&self, conversation_id: Option<&str>) -> Result<&ConversationState> {
        let key = conversation_id
            .map(|id| self.resolve_alias(id).to_string())
            .or_else(|| self.current.clone())
            .ok_or(CaptureError::NoConversationData)?;
        self.conversations
            .get(&key)
            .ok_or(CaptureError::NoConversationData)
    }

    fn pending_counts(&self) -> (usize, usize) {
        let pending = self.pending_requests.values().filter(|p| **p).count();
        (pending, self.pending_requests.len() - pending)
    }

    /// Conversation-level completion predicate.
    ///
    /// True when any signal fires: every tracked request has resolved, the
    /// decoder's sticky flag is set, the idle timeout elapsed after at least
    /// one token, or (last resort) the final token looks like terminal
    /// punctuation.
    pub fn is_response_complete(&self) -> bool {
        if !self.pending_requests.is_empty() {
            let (pending, total_completed) = self.pending_counts();
            tracing::debug!(pending, completed = total_completed, "request status");
            if pending == 0 {
                return true;
            }
        }

        let Some(state) = self.current_state() else {
            return false;
        };

        if state.decoder.is_complete() {
            return true;
        }

        if state.decoder.token_count() > 0 {
            if let Some(last) = state.last_token_at {
                if last.elapsed() > self.config.idle_timeout {
                    tracing::debug!(
                        idle_ms = last.elapsed().as_millis() as u64,
                        "no tokens within idle timeout"
                    );
                    return true;
                }
            }
        }

        state.decoder.completion_likely()
    }

    fn diagnostics(&self, state: &ConversationState) -> Diagnostics {
        let (pending, completed) = self.pending_counts();
        Diagnostics {
            conversation_id: state.conversation_id.clone(),
            response_id: state.decoder.response_id().map(String::from),
            total_responses: state.raw_log.len(),
            pending_requests: pending,
            completed_requests: completed,
            from_new_conversation: state.from_new_conversation,
            is_complete: self.is_response_complete(),
            last_token_at_ms: state.last_token_at_ms,
        }
    }

    /// Aggregate view of one conversation's captured exchange.
    ///
    /// Prefers the token-accumulation view; reparsing the last raw body is a
    /// fallback for conversations that never entered streaming mode.
    pub fn get_full_response(&self, conversation_id: Option<&str>) -> Result<FullResponse> {
        let state = self.lookup(conversation_id)?;
        let last = state
            .raw_log
            .last()
            .ok_or(CaptureError::NoResponsesCaptured)?;

        let diagnostics = self.diagnostics(state);
        let content = if state.decoder.token_count() > 0 {
            ResponseContent::TokenStream {
                accumulated_text: state.decoder.accumulated_text(),
                tokens_count: state.decoder.token_count(),
                is_complete: diagnostics.is_complete,
            }
        } else {
            let outcome = decode::decode_stateless(&last.body);
            if !outcome.succeeded() {
                return Err(CaptureError::DecodeFailed(format!(
                    "response body is not decodable ({} bytes)",
                    last.body.len()
                )));
            }
            ResponseContent::Reparsed { outcome }
        };

        Ok(FullResponse {
            conversation_id: state.conversation_id.clone(),
            response_id: state.decoder.response_id().map(String::from),
            content,
            raw: last.body.clone(),
            status: last.status,
            arrival_time_ms: last.arrival_time_ms,
            diagnostics,
        })
    }

    /// Normalize either representation into one field set.
    ///
    /// Falls back to reparsing the raw log newest-first when no tokens were
    /// ever accumulated.
    pub fn get_response_fields(&self) -> Result<ResponseFields> {
        let state = self.lookup(None)?;

        if state.decoder.token_count() > 0 {
            return Ok(ResponseFields {
                conversation_id: Some(state.conversation_id.clone()),
                response_id: state.decoder.response_id().map(String::from),
                content: state.decoder.accumulated_text(),
                token_count: Some(state.decoder.token_count()),
                is_complete: Some(self.is_response_complete()),
                ..Default::default()
            });
        }

        for raw in state.raw_log.iter().rev() {
            let outcome = decode::decode_stateless(&raw.body);
            if !outcome.succeeded() {
                continue;
            }

            if let Some(DecodedObject::FinalMessage {
                response_id,
                content,
                is_thinking,
                is_soft_stop,
                web_search_results,
                file_attachments,
                steps,
            }) = outcome.objects.iter().find(|o| o.is_final_message())
            {
                return Ok(ResponseFields {
                    conversation_id: Some(state.conversation_id.clone()),
                    response_id: response_id.clone(),
                    content: content.clone(),
                    is_thinking: Some(*is_thinking),
                    is_soft_stop: Some(*is_soft_stop),
                    web_search_results: web_search_results.clone(),
                    file_attachments: file_attachments.clone(),
                    steps: steps.clone(),
                    ..Default::default()
                });
            }

            if !outcome.text.is_empty() {
                return Ok(ResponseFields {
                    conversation_id: Some(state.conversation_id.clone()),
                    response_id: outcome.response_id.clone(),
                    content: outcome.text,
                    token_count: Some(outcome.chunks_valid),
                    is_complete: Some(outcome.is_complete),
                    ..Default::default()
                });
            }
        }

        Err(CaptureError::NoValidResponseData)
    }

    /// Just the reply text; empty string when nothing is available.
    pub fn extract_content_text(&self) -> String {
        if self.token_count() > 0 {
            return self.accumulated_text();
        }
        self.get_response_fields()
            .map(|fields| fields.content)
            .unwrap_or_default()
    }

    /// Write the reply text to a file under the debug directory.
    ///
    /// Returns `Ok(None)` when there is nothing to export.
    pub fn export_response_content(&self, filename: Option<&str>) -> Result<Option<PathBuf>> {
        let Some(conversation_id) = self.current.as_deref() else {
            tracing::warn!("no conversation data available to export");
            return Ok(None);
        };

        let content = self.extract_content_text();
        if content.is_empty() {
            tracing::warn!("no content available to export");
            return Ok(None);
        }

        let filename = filename.map(String::from).unwrap_or_else(|| {
            format!(
                "wisp_reply_{}_{}.txt",
                conversation_id,
                chrono::Utc::now().timestamp()
            )
        });
        let path = self.config.debug_dir.join(filename);
        fs::create_dir_all(&self.config.debug_dir)?;
        fs::write(&path, content)?;
        tracing::info!(path = %path.display(), "response content saved");
        Ok(Some(path))
    }

    /// Persist the raw per-conversation log plus the derived aggregate.
    ///
    /// Returns `Ok(None)` when there is nothing to save.
    pub fn save_responses(&self, conversation_id: Option<&str>) -> Result<Option<PathBuf>> {
        let Ok(state) = self.lookup(conversation_id) else {
            tracing::warn!("no captured responses to save");
            return Ok(None);
        };

        let document = ExportDocument {
            conversation_id: state.conversation_id.clone(),
            response_id: state.decoder.response_id().map(String::from),
            responses: state.raw_log.clone(),
            accumulated_text: (state.decoder.token_count() > 0)
                .then(|| state.decoder.accumulated_text()),
            tokens_count: state.decoder.token_count(),
            is_complete: state.decoder.is_complete(),
        };

        let filename = format!(
            "wisp_responses_{}_{}.json",
            state.conversation_id,
            chrono::Utc::now().timestamp()
        );
        let path = self.config.debug_dir.join(filename);
        fs::create_dir_all(&self.config.debug_dir)?;
        fs::write(&path, serde_json::to_string_pretty(&document)?)?;
        tracing::info!(path = %path.display(), "captured responses saved");
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseFormat;
    use std::time::Duration;

    const EXCHANGE_URL: &str = "https://grok.com/rest/app-chat/conversations/conv-1/responses";
    const NEW_URL: &str = "https://grok.com/rest/app-chat/conversations/new";

    fn token_body(token: &str, soft_stop: bool) -> String {
        format!(
            r#"{{"result": {{"token": {}, "isSoftStop": {}, "responseId": "resp-1"}}}}"#,
            serde_json::to_string(token).unwrap(),
            soft_stop
        )
    }

    fn tracker() -> ResponseTracker {
        ResponseTracker::new(CaptureConfig::default().with_debug_dir("unused"))
    }

    #[test]
    fn test_feed_ignores_untracked_urls() {
        let mut t = tracker();
        assert!(t.feed("https://grok.com/chat", 200, "{}", true).is_none());
        assert!(t.current_conversation_id().is_none());
    }

    #[test]
    fn test_feed_accumulates_tokens_in_order() {
        let mut t = tracker();
        for token in ["Hello", ",", " world"] {
            t.feed(EXCHANGE_URL, 200, &token_body(token, false), true);
        }
        assert_eq!(t.accumulated_text(), "Hello, world");
        assert_eq!(t.token_count(), 3);
        assert_eq!(t.response_id().as_deref(), Some("resp-1"));
    }

    #[test]
    fn test_five_chunks_with_trailing_soft_stop() {
        let mut t = tracker();
        let body: String = ["one ", "two ", "three ", "four "]
            .iter()
            .map(|tok| token_body(tok, false))
            .chain(std::iter::once(token_body("five", true)))
            .collect();
        let outcome = t.feed(EXCHANGE_URL, 200, &body, true).unwrap();

        assert_eq!(outcome.chunks_valid, 5);
        assert!(outcome.is_complete);
        assert_eq!(t.accumulated_text(), "one two three four five");
        assert!(t.is_response_complete());
    }

    #[test]
    fn test_completion_sticky_across_feeds() {
        let mut t = tracker();
        t.feed(EXCHANGE_URL, 200, &token_body("done", true), true);
        assert!(t.is_response_complete());

        t.feed(EXCHANGE_URL, 200, &token_body(" extra", false), true);
        assert!(t.is_response_complete());
    }

    #[test]
    fn test_empty_token_completes_at_tracker_level() {
        let mut t = tracker();
        t.feed(EXCHANGE_URL, 200, &token_body("text", false), true);
        let outcome = t.feed(EXCHANGE_URL, 200, &token_body("", false), true).unwrap();

        assert!(outcome.is_complete);
        assert!(t.is_response_complete());
        // Appending the empty token did not disturb the text
        assert_eq!(t.accumulated_text(), "text");
    }

    #[test]
    fn test_all_requests_resolved_means_complete() {
        let mut t = tracker();
        t.feed(EXCHANGE_URL, 200, &token_body("hi", false), true);
        assert!(!t.is_response_complete());

        t.feed(EXCHANGE_URL, 200, &token_body(" there", false), false);
        assert!(t.is_response_complete());
    }

    #[test]
    fn test_idle_timeout_after_first_token() {
        let mut t = ResponseTracker::new(
            CaptureConfig::default().with_idle_timeout(Duration::from_millis(5)),
        );
        t.feed(EXCHANGE_URL, 200, &token_body("hi", false), true);
        assert!(!t.is_response_complete());

        std::thread::sleep(Duration::from_millis(15));
        assert!(t.is_response_complete());
    }

    #[test]
    fn test_no_timeout_without_tokens() {
        let mut t = ResponseTracker::new(
            CaptureConfig::default().with_idle_timeout(Duration::from_millis(1)),
        );
        t.feed(EXCHANGE_URL, 200, r#"{"result": {"responseId": "r"}}"#, true);
        std::thread::sleep(Duration::from_millis(10));
        assert!(!t.is_response_complete());
    }

    #[test]
    fn test_terminal_punctuation_heuristic() {
        let mut t = tracker();
        t.feed(EXCHANGE_URL, 200, &token_body("The end", false), true);
        assert!(!t.is_response_complete());
        t.feed(EXCHANGE_URL, 200, &token_body(".", false), true);
        assert!(t.is_response_complete());
    }

    #[test]
    fn test_conversation_id_migration_keeps_both_keys() {
        let mut t = tracker();
        t.feed(NEW_URL, 200, r#"{"conversationId": "conv-9"}"#, true);
        let url = "https://grok.com/rest/app-chat/conversations/conv-9/responses";
        t.feed(url, 200, &token_body("hello", true), false);

        let by_resolved = t.get_full_response(Some("conv-9")).unwrap();
        let by_placeholder = t.get_full_response(Some("new")).unwrap();
        assert_eq!(by_resolved.conversation_id, "conv-9");
        assert_eq!(by_placeholder.conversation_id, "conv-9");
        assert_eq!(by_resolved.text(), by_placeholder.text());
        assert_eq!(by_resolved.diagnostics.total_responses, 2);
        assert!(by_resolved.diagnostics.from_new_conversation);
    }

    #[test]
    fn test_unknown_conversation_is_tagged_failure() {
        let t = tracker();
        assert!(matches!(
            t.get_full_response(Some("missing")),
            Err(CaptureError::NoConversationData)
        ));
    }

    #[test]
    fn test_empty_capture_is_tagged_failure() {
        let mut t = tracker();
        // Known conversation, empty body: the log stays empty
        t.feed(EXCHANGE_URL, 200, "", true);
        assert!(matches!(
            t.get_full_response(None),
            Err(CaptureError::NoResponsesCaptured)
        ));
    }

    #[test]
    fn test_full_response_prefers_token_view() {
        let mut t = tracker();
        t.feed(EXCHANGE_URL, 200, &token_body("streamed", true), false);
        let full = t.get_full_response(None).unwrap();
        assert!(matches!(
            full.content,
            ResponseContent::TokenStream { ref accumulated_text, .. }
                if accumulated_text == "streamed"
        ));
    }

    #[test]
    fn test_full_response_reparse_fallback() {
        let mut t = tracker();
        let body = r#"{"response": {"responseId": "r2", "message": {"content": "one-shot"}}}"#;
        t.feed(EXCHANGE_URL, 200, body, false);

        let full = t.get_full_response(None).unwrap();
        match full.content {
            ResponseContent::Reparsed { outcome } => {
                assert_eq!(outcome.format, ResponseFormat::Standard);
            }
            other => panic!("expected reparsed content, got {:?}", other),
        }
    }

    #[test]
    fn test_fields_from_final_message_fallback() {
        let mut t = tracker();
        let body = r#"{"response": {
            "responseId": "r3",
            "isThinking": false,
            "isSoftStop": true,
            "message": {
                "content": "structured reply",
                "webSearchResults": [{"url": "https://example.com"}],
                "fileAttachments": [],
                "steps": []
            }
        }}"#;
        t.feed(EXCHANGE_URL, 200, body, false);

        let fields = t.get_response_fields().unwrap();
        assert_eq!(fields.content, "structured reply");
        assert_eq!(fields.response_id.as_deref(), Some("r3"));
        assert_eq!(fields.is_soft_stop, Some(true));
        assert_eq!(fields.web_search_results.len(), 1);
        assert!(fields.token_count.is_none());
    }

    #[test]
    fn test_fields_prefer_token_view() {
        let mut t = tracker();
        t.feed(EXCHANGE_URL, 200, &token_body("tok", false), true);
        let fields = t.get_response_fields().unwrap();
        assert_eq!(fields.content, "tok");
        assert_eq!(fields.token_count, Some(1));
    }

    #[test]
    fn test_fields_with_nothing_decodable() {
        let mut t = tracker();
        t.feed(EXCHANGE_URL, 200, "garbage body", true);
        assert!(matches!(
            t.get_response_fields(),
            Err(CaptureError::NoValidResponseData)
        ));
        assert_eq!(t.extract_content_text(), "");
    }

    #[test]
    fn test_refeeding_same_body_duplicates() {
        // The tracker does not mask caller-side duplication.
        let mut t = tracker();
        let body = token_body("dup", false);
        t.feed(EXCHANGE_URL, 200, &body, true);
        t.feed(EXCHANGE_URL, 200, &body, true);
        assert_eq!(t.accumulated_text(), "dupdup");
    }

    #[test]
    fn test_save_responses_writes_export_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = ResponseTracker::new(CaptureConfig::default().with_debug_dir(dir.path()));
        t.feed(EXCHANGE_URL, 200, &token_body("persisted", true), false);

        let path = t.save_responses(None).unwrap().unwrap();
        let doc: ExportDocument =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc.conversation_id, "conv-1");
        assert_eq!(doc.accumulated_text.as_deref(), Some("persisted"));
        assert_eq!(doc.tokens_count, 1);
        assert!(doc.is_complete);
        assert_eq!(doc.responses.len(), 1);
    }

    #[test]
    fn test_save_responses_without_data_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let t = ResponseTracker::new(CaptureConfig::default().with_debug_dir(dir.path()));
        assert!(t.save_responses(None).unwrap().is_none());
    }

    #[test]
    fn test_export_response_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = ResponseTracker::new(CaptureConfig::default().with_debug_dir(dir.path()));
        t.feed(EXCHANGE_URL, 200, &token_body("exported text", true), false);

        let path = t.export_response_content(None).unwrap().unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "exported text");
    }
}
