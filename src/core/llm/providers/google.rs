//! Google Provider Implementation (API Key-based)
//!
//! Streams Gemini completions over SSE and exposes the `countTokens` endpoint.

use crate::core::llm::error::{is_invalid_key_message, LLMError, Result};
use crate::core::llm::provider::LLMProvider;
use crate::core::llm::types::{ChatChunk, ChatRequest, MessageRole, TokenUsage};
use crate::core::streaming::{StreamEvent, StreamParser};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const PROVIDER_ID: &str = "google";

/// Google provider (API key-based)
pub struct GoogleProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl std::fmt::Debug for GoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GoogleProvider {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Self::with_options(api_key, model, DEFAULT_BASE_URL, Duration::from_secs(300))
    }

    pub fn flash(api_key: String) -> Result<Self> {
        Self::new(api_key, DEFAULT_MODEL.to_string())
    }

    /// Build a provider against an explicit endpoint.
    ///
    /// `request_timeout` bounds a whole call, including the streamed body.
    pub fn with_options(
        api_key: String,
        model: String,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(LLMError::NotConfigured("Google API key is empty".to_string()));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            api_key,
            model,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn build_contents(request: &ChatRequest) -> Vec<serde_json::Value> {
        request
            .messages
            .iter()
            .filter_map(|msg| {
                let role = match msg.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "model",
                    MessageRole::System => return None,
                };
                Some(serde_json::json!({
                    "role": role,
                    "parts": [{ "text": msg.content }]
                }))
            })
            .collect()
    }

    fn build_body(request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({ "contents": Self::build_contents(request) });

        if let Some(system) = &request.system_prompt {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": system }]
            });
        }

        if request.temperature.is_some() || request.max_tokens.is_some() {
            let mut gen_config = serde_json::Map::new();
            if let Some(temp) = request.temperature {
                gen_config.insert("temperature".to_string(), serde_json::json!(temp));
            }
            if let Some(max) = request.max_tokens {
                gen_config.insert("maxOutputTokens".to_string(), serde_json::json!(max));
            }
            body["generationConfig"] = serde_json::Value::Object(gen_config);
        }

        body
    }

    /// Map a non-success HTTP response to an error, preferring the JSON
    /// `error.message` when the body carries one.
    async fn error_from_response(response: reqwest::Response) -> LLMError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|json| json["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(text);

        if status == 401 || status == 403 || is_invalid_key_message(&message) {
            LLMError::AuthError(message)
        } else {
            LLMError::ApiError { status, message }
        }
    }
}

#[async_trait]
impl LLMProvider for GoogleProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<ChatChunk>>> {
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let body = Self::build_body(&request);
        let stream_id = uuid::Uuid::new_v4().to_string();
        let model = self.model.clone();

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        log::debug!("Gemini stream {stream_id} opened for model {model}");

        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = StreamParser::new();
            let mut chunk_index = 0u32;
            let mut final_usage: Option<TokenUsage> = None;

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(LLMError::HttpError(e))).await;
                        return;
                    }
                };

                let events = parser.push_bytes(&bytes);
                let chunks =
                    events_to_chunks(events, &stream_id, &model, &mut chunk_index, &mut final_usage);
                if !deliver(&tx, chunks).await {
                    return;
                }
            }

            let chunks = events_to_chunks(
                parser.finish(),
                &stream_id,
                &model,
                &mut chunk_index,
                &mut final_usage,
            );
            if !deliver(&tx, chunks).await {
                return;
            }

            // Body ended without an explicit finish reason
            let _ = tx
                .send(Ok(ChatChunk::finished(
                    &stream_id,
                    PROVIDER_ID,
                    &model,
                    chunk_index + 1,
                    "stop",
                    final_usage,
                )))
                .await;
        });

        Ok(rx)
    }

    async fn count_tokens(&self, text: &str) -> Result<u32> {
        let body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": text }]
            }]
        });

        let response = self
            .client
            .post(self.endpoint("countTokens"))
            .header("content-type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(format!("countTokens body: {e}")))?;
        json["totalTokens"]
            .as_u64()
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .ok_or_else(|| LLMError::InvalidResponse("Missing totalTokens".to_string()))
    }
}

fn events_to_chunks(
    events: Vec<StreamEvent>,
    stream_id: &str,
    model: &str,
    chunk_index: &mut u32,
    final_usage: &mut Option<TokenUsage>,
) -> Vec<Result<ChatChunk>> {
    let mut out = Vec::new();
    for event in events {
        match event {
            StreamEvent::Text(text) => {
                *chunk_index += 1;
                out.push(Ok(ChatChunk::text(
                    stream_id,
                    PROVIDER_ID,
                    model,
                    *chunk_index,
                    text,
                )));
            }
            StreamEvent::Usage(usage) => *final_usage = Some(usage),
            StreamEvent::Finish(reason) => out.push(Ok(ChatChunk::finished(
                stream_id,
                PROVIDER_ID,
                model,
                *chunk_index + 1,
                reason,
                *final_usage,
            ))),
            StreamEvent::Error { code, message } => out.push(Err(LLMError::ApiError {
                status: code,
                message,
            })),
        }
    }
    out
}

/// Send chunks in order. Returns false once the stream is over: a final
/// chunk or error went out, or the receiver was dropped.
async fn deliver(tx: &mpsc::Sender<Result<ChatChunk>>, chunks: Vec<Result<ChatChunk>>) -> bool {
    for chunk in chunks {
        let terminal = match &chunk {
            Ok(chunk) => chunk.is_final,
            Err(_) => true,
        };
        if tx.send(chunk).await.is_err() || terminal {
            return false;
        }
    }
    true
}
