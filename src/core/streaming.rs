//! Streaming Response Parser
//!
//! Turns the raw server-sent-event body of a Gemini `streamGenerateContent`
//! call into typed events. Bytes are buffered until a full line is available,
//! so multi-byte characters split across network chunks decode correctly.

use crate::core::llm::TokenUsage;

// ============================================================================
// Types
// ============================================================================

/// One parsed item from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text fragment (never empty)
    Text(String),
    /// Usage metadata, typically repeated with growing counts
    Usage(TokenUsage),
    /// The candidate finished with the given reason
    Finish(String),
    /// The server reported an error inside the stream
    Error { code: u16, message: String },
}

// ============================================================================
// Stream Parser
// ============================================================================

/// Incremental parser for SSE `data:` lines carrying Gemini JSON payloads
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return the events from every completed line
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&line);
            Self::parse_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    /// Parse whatever is left once the body has ended
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        let line = String::from_utf8_lossy(&rest);
        let line = line.trim();
        if !line.is_empty() {
            Self::parse_line(line, &mut events);
        }
        events
    }

    fn parse_line(line: &str, events: &mut Vec<StreamEvent>) {
        // "event:", "id:" and comment lines carry nothing we use
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data.is_empty() {
            return;
        }

        match serde_json::from_str::<serde_json::Value>(data) {
            Ok(json) => Self::parse_payload(&json, events),
            Err(e) => log::debug!("Skipping unparseable stream payload: {e}"),
        }
    }

    fn parse_payload(json: &serde_json::Value, events: &mut Vec<StreamEvent>) {
        if let Some(error) = json.get("error") {
            events.push(StreamEvent::Error {
                // Codes outside the HTTP range are as good as missing
                code: error["code"]
                    .as_u64()
                    .and_then(|c| u16::try_from(c).ok())
                    .unwrap_or(0),
                message: error["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string(),
            });
            return;
        }

        let candidate = &json["candidates"][0];

        if let Some(parts) = candidate["content"]["parts"].as_array() {
            let text: String = parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect();
            if !text.is_empty() {
                events.push(StreamEvent::Text(text));
            }
        }

        if let Some(usage) = json["usageMetadata"].as_object() {
            events.push(StreamEvent::Usage(TokenUsage {
                input_tokens: token_field(usage, "promptTokenCount"),
                output_tokens: token_field(usage, "candidatesTokenCount"),
            }));
        }

        if let Some(reason) = candidate["finishReason"].as_str() {
            events.push(StreamEvent::Finish(reason.to_string()));
        }
    }
}

fn token_field(usage: &serde_json::Map<String, serde_json::Value>, key: &str) -> u32 {
    usage
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0)
}
