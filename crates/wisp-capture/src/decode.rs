//! Incremental decoding of intercepted response bodies.
//!
//! Bodies arrive in two shapes: a single JSON document ("standard") or a run
//! of concatenated JSON documents with no separator ("streaming"). The
//! streaming shape is split by lexical brace balance before any JSON parsing
//! happens, so one malformed chunk never hides its siblings.

use crate::types::{DecodedObject, ParseOutcome, ResponseFormat};
use serde::Deserialize;
use serde_json::Value;

/// Split concatenated JSON documents by brace depth.
///
/// Purely lexical: depth goes up on `{` and down on `}`, and a chunk spans a
/// 0→1 transition to the matching 1→0 transition. Braces inside string
/// literals are counted too; a fragment mis-split that way simply fails the
/// per-chunk decode and is skipped.
pub fn split_chunks(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, ch) in text.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(s) = start.take() {
                        chunks.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    chunks
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultChunk {
    token: Option<String>,
    response_id: Option<String>,
    is_thinking: Option<bool>,
    is_soft_stop: Option<bool>,
    is_complete: Option<bool>,
    message: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseEnvelope {
    response_id: Option<String>,
    is_thinking: Option<bool>,
    is_soft_stop: Option<bool>,
    message: Option<MessagePayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    content: Option<String>,
    #[serde(default)]
    web_search_results: Vec<Value>,
    #[serde(default)]
    file_attachments: Vec<Value>,
    #[serde(default)]
    steps: Vec<Value>,
}

/// Incremental decoder for one conversation's response bodies.
///
/// Owns no I/O. Feed bodies in arrival order; the accumulated token sequence
/// is append-only and the completion flag is sticky.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    accumulated_tokens: Vec<String>,
    response_id: Option<String>,
    is_complete: bool,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all state
    pub fn reset(&mut self) {
        self.accumulated_tokens.clear();
        self.response_id = None;
        self.is_complete = false;
    }

    /// Decode one raw response body and fold it into the running state.
    pub fn decode(&mut self, body: &str) -> ParseOutcome {
        // Standard format: the whole body is one JSON mapping.
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if value.is_object() {
                let object = self.decode_object(&value);
                return self.outcome(ResponseFormat::Standard, vec![object], 1, 1);
            }
        }

        let chunks = split_chunks(body);
        if chunks.is_empty() {
            return ParseOutcome::unknown();
        }

        let chunks_total = chunks.len();
        let mut chunks_valid = 0;
        let mut objects = Vec::with_capacity(chunks_total);
        for chunk in chunks {
            match serde_json::from_str::<Value>(chunk) {
                Ok(value) => {
                    chunks_valid += 1;
                    objects.push(self.decode_object(&value));
                }
                Err(err) => {
                    tracing::debug!(error = %err, "skipping malformed chunk");
                }
            }
        }

        self.outcome(ResponseFormat::Streaming, objects, chunks_total, chunks_valid)
    }

    fn outcome(
        &self,
        format: ResponseFormat,
        objects: Vec<DecodedObject>,
        chunks_total: usize,
        chunks_valid: usize,
    ) -> ParseOutcome {
        ParseOutcome {
            format,
            objects,
            chunks_total,
            chunks_valid,
            text: self.accumulated_text(),
            response_id: self.response_id.clone(),
            is_complete: self.is_complete,
        }
    }

    fn decode_object(&mut self, value: &Value) -> DecodedObject {
        if let Some(result) = value.get("result") {
            return self.decode_result(result);
        }
        if let Some(response) = value.get("response").filter(|v| v.is_object()) {
            return self.decode_envelope(response);
        }
        DecodedObject::Unrecognized
    }

    /// Streaming chunk: `{"result": {...}}`.
    fn decode_result(&mut self, result: &Value) -> DecodedObject {
        let Ok(chunk) = serde_json::from_value::<ResultChunk>(result.clone()) else {
            return DecodedObject::Unrecognized;
        };

        if let Some(id) = &chunk.response_id {
            self.response_id = Some(id.clone());
        }

        let is_soft_stop = chunk.is_soft_stop.unwrap_or(false);
        let is_thinking = chunk.is_thinking.unwrap_or(false);
        let final_message = chunk.message.filter(Value::is_object);

        if is_soft_stop || chunk.is_complete.unwrap_or(false) || final_message.is_some() {
            self.is_complete = true;
        }

        if let Some(token) = chunk.token {
            // Empty tokens still append; concatenation is unaffected.
            self.accumulated_tokens.push(token.clone());
            return DecodedObject::TokenFragment {
                token,
                response_id: chunk.response_id,
                is_thinking,
                is_soft_stop,
            };
        }

        if let Some(message) = final_message {
            let payload: MessagePayload = serde_json::from_value(message).unwrap_or_default();
            return DecodedObject::FinalMessage {
                response_id: chunk.response_id,
                content: payload.content.unwrap_or_default(),
                is_thinking,
                is_soft_stop,
                web_search_results: payload.web_search_results,
                file_attachments: payload.file_attachments,
                steps: payload.steps,
            };
        }

        // A bare responseId (e.g. the userResponse echo) only updates the id.
        DecodedObject::Unrecognized
    }

    /// Standard format: `{"response": {...}}` wrapping a complete message.
    fn decode_envelope(&mut self, response: &Value) -> DecodedObject {
        let Ok(envelope) = serde_json::from_value::<ResponseEnvelope>(response.clone()) else {
            return DecodedObject::Unrecognized;
        };

        if let Some(id) = &envelope.response_id {
            self.response_id = Some(id.clone());
        }
        self.is_complete = true;

        let payload = envelope.message.unwrap_or_default();
        DecodedObject::FinalMessage {
            response_id: envelope.response_id,
            content: payload.content.unwrap_or_default(),
            is_thinking: envelope.is_thinking.unwrap_or(false),
            is_soft_stop: envelope.is_soft_stop.unwrap_or(false),
            web_search_results: payload.web_search_results,
            file_attachments: payload.file_attachments,
            steps: payload.steps,
        }
    }

    /// Concatenation of all tokens seen so far
    pub fn accumulated_text(&self) -> String {
        self.accumulated_tokens.concat()
    }

    pub fn tokens(&self) -> &[String] {
        &self.accumulated_tokens
    }

    pub fn token_count(&self) -> usize {
        self.accumulated_tokens.len()
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    /// Sticky completion flag
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Force the sticky completion flag (used for tracker-level signals)
    pub fn mark_complete(&mut self) {
        self.is_complete = true;
    }

    /// Low-confidence heuristic: the last token looks like the end of a
    /// sentence. Only consulted when no stronger signal has fired.
    pub fn completion_likely(&self) -> bool {
        let Some(last) = self.accumulated_tokens.last() else {
            return false;
        };
        last == "\n" || matches!(last.trim(), "." | "!" | "?")
    }
}

/// Decode a single body without keeping state between calls.
pub fn decode_stateless(body: &str) -> ParseOutcome {
    ResponseDecoder::new().decode(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_chunk(token: &str, soft_stop: bool) -> String {
        format!(
            r#"{{"result": {{"token": {}, "isThinking": false, "isSoftStop": {}, "responseId": "beb2b7f8-8ae4-44ae-8613-1b0865b98513"}}}}"#,
            serde_json::to_string(token).unwrap(),
            soft_stop
        )
    }

    fn streaming_sample() -> String {
        [" Python", " is", " a", " great"]
            .iter()
            .map(|t| token_chunk(t, false))
            .chain(std::iter::once(token_chunk(" language", true)))
            .collect()
    }

    const STANDARD_SAMPLE: &str = r#"{
        "response": {
            "responseId": "abc123",
            "message": { "content": "This is a sample response" },
            "isThinking": false,
            "isSoftStop": true
        }
    }"#;

    #[test]
    fn test_streaming_sample_decodes_all_chunks() {
        let mut decoder = ResponseDecoder::new();
        let outcome = decoder.decode(&streaming_sample());

        assert!(outcome.succeeded());
        assert_eq!(outcome.format, ResponseFormat::Streaming);
        assert_eq!(outcome.chunks_total, 5);
        assert_eq!(outcome.chunks_valid, 5);
        assert_eq!(outcome.text, " Python is a great language");
        assert_eq!(
            outcome.response_id.as_deref(),
            Some("beb2b7f8-8ae4-44ae-8613-1b0865b98513")
        );
        // Last chunk carried isSoftStop
        assert!(outcome.is_complete);
    }

    #[test]
    fn test_standard_sample_is_one_final_message() {
        let mut decoder = ResponseDecoder::new();
        let outcome = decoder.decode(STANDARD_SAMPLE);

        assert_eq!(outcome.format, ResponseFormat::Standard);
        assert_eq!(outcome.objects.len(), 1);
        match &outcome.objects[0] {
            DecodedObject::FinalMessage {
                response_id,
                content,
                is_soft_stop,
                ..
            } => {
                assert_eq!(response_id.as_deref(), Some("abc123"));
                assert_eq!(content, "This is a sample response");
                assert!(is_soft_stop);
            }
            other => panic!("expected final message, got {:?}", other),
        }
        assert!(outcome.is_complete);
    }

    #[test]
    fn test_unparseable_body_is_unknown() {
        let mut decoder = ResponseDecoder::new();
        let outcome = decoder.decode("This is not a JSON object");

        assert!(!outcome.succeeded());
        assert_eq!(outcome.format, ResponseFormat::Unknown);
        assert_eq!(outcome.chunks_total, 0);
    }

    #[test]
    fn test_malformed_chunk_is_skipped_not_fatal() {
        // Second chunk has an unterminated string
        let body = format!(
            "{}{}{}",
            token_chunk(" Python", false),
            r#"{"result": {"token": " is"#.to_owned() + "\n\"isSoftStop\": false}}",
            token_chunk(" fun", false),
        );
        let mut decoder = ResponseDecoder::new();
        let outcome = decoder.decode(&body);

        assert_eq!(outcome.chunks_total, 3);
        assert_eq!(outcome.chunks_valid, 2);
        assert_eq!(outcome.text, " Python fun");
    }

    #[test]
    fn test_user_response_echo_updates_id_only() {
        let body = r#"{
            "result": {
                "userResponse": {
                    "responseId": "2517e0bf",
                    "message": "What are some real-world applications built with Python?",
                    "sender": "human"
                },
                "isThinking": false,
                "isSoftStop": false,
                "responseId": "2517e0bf"
            }
        }"#;
        let mut decoder = ResponseDecoder::new();
        let outcome = decoder.decode(body);

        assert_eq!(outcome.format, ResponseFormat::Standard);
        assert!(matches!(outcome.objects[0], DecodedObject::Unrecognized));
        assert_eq!(outcome.response_id.as_deref(), Some("2517e0bf"));
        assert_eq!(decoder.token_count(), 0);
        assert!(!outcome.is_complete);
    }

    #[test]
    fn test_echo_then_tokens_last_id_wins() {
        let body = format!(
            r#"{{"result": {{"responseId": "2517e0bf", "isSoftStop": false}}}}{}"#,
            token_chunk("Python", false)
        );
        let mut decoder = ResponseDecoder::new();
        let outcome = decoder.decode(&body);

        assert_eq!(outcome.chunks_valid, 2);
        assert_eq!(decoder.token_count(), 1);
        assert_eq!(
            outcome.response_id.as_deref(),
            Some("beb2b7f8-8ae4-44ae-8613-1b0865b98513")
        );
    }

    #[test]
    fn test_result_message_object_is_conclusive() {
        let body = r#"{"result": {"message": {"content": "done"}, "responseId": "r1"}}"#;
        let mut decoder = ResponseDecoder::new();
        let outcome = decoder.decode(body);

        assert!(outcome.is_complete);
        assert!(outcome.objects[0].is_final_message());
    }

    #[test]
    fn test_explicit_is_complete_flag() {
        let body = r#"{"result": {"isComplete": true, "token": "end"}}"#;
        let mut decoder = ResponseDecoder::new();
        let outcome = decoder.decode(body);

        assert!(outcome.is_complete);
        assert_eq!(outcome.text, "end");
    }

    #[test]
    fn test_empty_token_appends_without_changing_text() {
        let mut decoder = ResponseDecoder::new();
        decoder.decode(&token_chunk("abc", false));
        let outcome = decoder.decode(&token_chunk("", false));

        assert_eq!(decoder.token_count(), 2);
        assert_eq!(outcome.text, "abc");
    }

    #[test]
    fn test_state_accumulates_across_bodies() {
        let mut decoder = ResponseDecoder::new();
        decoder.decode(&token_chunk("Hello", false));
        let outcome = decoder.decode(&token_chunk(" world", false));

        assert_eq!(outcome.text, "Hello world");
        assert_eq!(decoder.token_count(), 2);
    }

    #[test]
    fn test_refeeding_duplicates_tokens() {
        // No deduplication: serializing feeds is the caller's job.
        let body = token_chunk("x", false);
        let mut decoder = ResponseDecoder::new();
        decoder.decode(&body);
        decoder.decode(&body);

        assert_eq!(decoder.accumulated_text(), "xx");
    }

    #[test]
    fn test_completion_is_sticky() {
        let mut decoder = ResponseDecoder::new();
        decoder.decode(&token_chunk("done", true));
        assert!(decoder.is_complete());

        decoder.decode(&token_chunk(" more", false));
        assert!(decoder.is_complete());
    }

    #[test]
    fn test_completion_likely_heuristic() {
        let mut decoder = ResponseDecoder::new();
        assert!(!decoder.completion_likely());

        decoder.decode(&token_chunk(" middle", false));
        assert!(!decoder.completion_likely());

        decoder.decode(&token_chunk(".", false));
        assert!(decoder.completion_likely());

        decoder.decode(&token_chunk("\n", false));
        assert!(decoder.completion_likely());

        decoder.decode(&token_chunk("", false));
        assert!(!decoder.completion_likely());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut decoder = ResponseDecoder::new();
        decoder.decode(&streaming_sample());
        assert_eq!(decoder.token_count(), 5);

        decoder.reset();
        assert_eq!(decoder.token_count(), 0);
        assert!(decoder.response_id().is_none());
        assert!(!decoder.is_complete());
    }

    #[test]
    fn test_non_object_json_falls_through_to_unknown() {
        let mut decoder = ResponseDecoder::new();
        let outcome = decoder.decode("[1, 2, 3]");
        assert_eq!(outcome.format, ResponseFormat::Unknown);
    }

    #[test]
    fn test_split_chunks_balances_nesting() {
        let chunks = split_chunks(r#"{"a": {"b": 1}}{"c": 2} trailing {"d": {"e": {}}}"#);
        assert_eq!(
            chunks,
            vec![r#"{"a": {"b": 1}}"#, r#"{"c": 2}"#, r#"{"d": {"e": {}}}"#]
        );
    }

    #[test]
    fn test_split_chunks_ignores_unclosed_tail() {
        let chunks = split_chunks(r#"{"a": 1}{"b": "#);
        assert_eq!(chunks, vec![r#"{"a": 1}"#]);
    }

    #[test]
    fn test_decode_stateless_is_self_contained() {
        let outcome = decode_stateless(&streaming_sample());
        assert_eq!(outcome.text, " Python is a great language");

        // A fresh call starts from nothing
        let outcome = decode_stateless(&token_chunk("solo", false));
        assert_eq!(outcome.text, "solo");
    }
}
