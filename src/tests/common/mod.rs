//! Common Test Utilities
//!
//! Shared helpers used across test modules:
//! - `ScriptedProvider`: an in-process `LLMProvider` that replays per-format
//!   scripts and records every request it receives

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::core::llm::{ChatChunk, ChatRequest, LLMError, LLMProvider, Result};

// ============================================================================
// Format Scripts
// ============================================================================

/// How a scripted stream ends after its fragments
#[derive(Debug)]
pub enum Ending {
    Finish,
    Fail(LLMError),
    /// Keep the stream open until the consumer drops it
    Hang,
}

#[derive(Debug)]
pub struct FormatScript {
    open_error: Option<LLMError>,
    fragments: Vec<String>,
    ending: Ending,
}

impl FormatScript {
    pub fn reply<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            open_error: None,
            fragments: fragments.into_iter().map(Into::into).collect(),
            ending: Ending::Finish,
        }
    }

    pub fn fail_after<I, S>(fragments: I, error: LLMError) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ending: Ending::Fail(error),
            ..Self::reply(fragments)
        }
    }

    pub fn hang<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ending: Ending::Hang,
            ..Self::reply(fragments)
        }
    }

    pub fn fail_on_open(error: LLMError) -> Self {
        Self {
            open_error: Some(error),
            fragments: Vec::new(),
            ending: Ending::Finish,
        }
    }
}

/// Rebuild an error so a script can be replayed more than once
fn replay(err: &LLMError) -> LLMError {
    match err {
        LLMError::ApiError { status, message } => LLMError::ApiError {
            status: *status,
            message: message.clone(),
        },
        LLMError::AuthError(m) => LLMError::AuthError(m.clone()),
        LLMError::InvalidResponse(m) => LLMError::InvalidResponse(m.clone()),
        LLMError::NotConfigured(m) => LLMError::NotConfigured(m.clone()),
        LLMError::Timeout => LLMError::Timeout,
        LLMError::StreamCanceled => LLMError::StreamCanceled,
        other => LLMError::InvalidResponse(other.to_string()),
    }
}

/// Format id named in a user prompt built by `build_user_prompt`
fn format_of(user_text: &str) -> String {
    user_text
        .split_once("in the \"")
        .and_then(|(_, rest)| rest.split_once("\" format"))
        .map(|(format, _)| format.to_string())
        .unwrap_or_default()
}

// ============================================================================
// Scripted Provider
// ============================================================================

/// Provider replaying scripts keyed by format id.
///
/// Formats without a script reply with `"Generated <ID> response"`.
pub struct ScriptedProvider {
    scripts: HashMap<String, FormatScript>,
    token_count: std::result::Result<u32, ()>,
    requests: Mutex<Vec<ChatRequest>>,
    opened: Mutex<Vec<String>>,
    open_count: watch::Sender<usize>,
    counted: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        let (open_count, _) = watch::channel(0);
        Self {
            scripts: HashMap::new(),
            token_count: Ok(0),
            requests: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            open_count,
            counted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_format(mut self, format: &str, script: FormatScript) -> Self {
        self.scripts.insert(format.to_string(), script);
        self
    }

    pub fn with_token_count(mut self, count: std::result::Result<u32, ()>) -> Self {
        self.token_count = count;
        self
    }

    /// Formats in the order their streams were opened
    pub fn opened_formats(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        *self.open_count.borrow()
    }

    /// Resolve once at least `n` streams have been opened
    pub async fn wait_for_opens(&self, n: usize) {
        let mut rx = self.open_count.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn system_prompts(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| r.system_prompt.unwrap_or_default())
            .collect()
    }

    pub fn count_calls(&self) -> usize {
        self.counted.lock().unwrap().len()
    }

    pub fn counted_texts(&self) -> Vec<String> {
        self.counted.lock().unwrap().clone()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<mpsc::Receiver<Result<ChatChunk>>> {
        let format = format_of(&request.user_text());
        self.requests.lock().unwrap().push(request);
        self.opened.lock().unwrap().push(format.clone());
        self.open_count.send_modify(|count| *count += 1);

        let script = self.scripts.get(&format);
        if let Some(err) = script.and_then(|s| s.open_error.as_ref()) {
            return Err(replay(err));
        }

        let (fragments, ending) = match script {
            Some(script) => (
                script.fragments.clone(),
                match &script.ending {
                    Ending::Finish => Ending::Finish,
                    Ending::Fail(err) => Ending::Fail(replay(err)),
                    Ending::Hang => Ending::Hang,
                },
            ),
            None => (vec![format!("Generated {format} response")], Ending::Finish),
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let stream_id = uuid::Uuid::new_v4().to_string();
            let mut index = 0u32;
            for fragment in fragments {
                let chunk = ChatChunk::text(&stream_id, "scripted", "scripted-model", index, fragment);
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
                index += 1;
            }

            match ending {
                Ending::Finish => {
                    let done = ChatChunk::finished(&stream_id, "scripted", "scripted-model", index, "stop", None);
                    let _ = tx.send(Ok(done)).await;
                }
                Ending::Fail(err) => {
                    let _ = tx.send(Err(err)).await;
                }
                Ending::Hang => tx.closed().await,
            }
        });

        Ok(rx)
    }

    async fn count_tokens(&self, text: &str) -> Result<u32> {
        self.counted.lock().unwrap().push(text.to_string());
        self.token_count.map_err(|_| LLMError::ApiError {
            status: 503,
            message: "countTokens unavailable".to_string(),
        })
    }
}

#[test]
fn test_format_of_reads_prompt() {
    let prompt = crate::core::generation::build_user_prompt("ctx", "QS");
    assert_eq!(format_of(&prompt), "QS");
    assert_eq!(format_of("no format here"), "");
}
