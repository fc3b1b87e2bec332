//! Google Provider Unit Tests (API Key-based)
//!
//! Tests for the Gemini provider against a wiremock server:
//! - Provider identity
//! - SSE streaming and request formatting
//! - Error classification
//! - Token counting

use std::time::Duration;

use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::core::llm::providers::google::DEFAULT_MODEL;
use crate::core::llm::{
    ChatMessage, ChatRequest, GoogleProvider, LLMError, LLMProvider, ProviderErrorKind,
};

const MODEL: &str = "gemini-2.5-flash";

fn provider_for(server: &MockServer) -> GoogleProvider {
    GoogleProvider::with_options(
        "AIzaTestApiKey".to_string(),
        MODEL.to_string(),
        server.uri(),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn sse_body(payloads: &[serde_json::Value]) -> String {
    payloads
        .iter()
        .map(|p| format!("data: {p}\r\n\r\n"))
        .collect()
}

async fn collect(provider: &GoogleProvider, request: ChatRequest) -> Vec<Result<String, LLMError>> {
    let mut rx = provider.stream_chat(request).await.unwrap();
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        match item {
            Ok(chunk) if chunk.is_final => {
                out.push(Ok(format!("<final:{}>", chunk.finish_reason.unwrap_or_default())));
                break;
            }
            Ok(chunk) => out.push(Ok(chunk.content)),
            Err(e) => {
                out.push(Err(e));
                break;
            }
        }
    }
    out
}

// =============================================================================
// Provider Identity Tests
// =============================================================================

#[test]
fn test_provider_identity() {
    let provider = GoogleProvider::flash("AIzaTestApiKey".to_string()).unwrap();
    assert_eq!(provider.id(), "google");
    assert_eq!(provider.model(), DEFAULT_MODEL);
}

#[test]
fn test_blank_key_rejected() {
    let err = GoogleProvider::flash("   ".to_string()).unwrap_err();
    assert!(matches!(err, LLMError::NotConfigured(_)));
}

// =============================================================================
// Streaming Tests
// =============================================================================

#[tokio::test]
async fn test_stream_chat_yields_fragments_in_order() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        serde_json::json!({"candidates": [{"content": {"parts": [{"text": "Hello"}]}}]}),
        serde_json::json!({"candidates": [{"content": {"parts": [{"text": ", world"}]}}]}),
        serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "!"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3}
        }),
    ]);

    Mock::given(method("POST"))
        .and(path(format!("/models/{MODEL}:streamGenerateContent")))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "AIzaTestApiKey"))
        .and(body_partial_json(serde_json::json!({
            "systemInstruction": {"parts": [{"text": "Be brief"}]},
            "contents": [{"role": "user", "parts": [{"text": "Hi"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let request = ChatRequest::new(vec![ChatMessage::user("Hi")]).with_system("Be brief");
    let items: Vec<String> = collect(&provider, request)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(items, vec!["Hello", ", world", "!", "<final:STOP>"]);
}

#[tokio::test]
async fn test_stream_without_finish_reason_still_terminates() {
    let server = MockServer::start().await;
    let body = sse_body(&[serde_json::json!({
        "candidates": [{"content": {"parts": [{"text": "partial"}]}}]
    })]);

    Mock::given(method("POST"))
        .and(path(format!("/models/{MODEL}:streamGenerateContent")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let items = collect(&provider, ChatRequest::new(vec![ChatMessage::user("Hi")])).await;
    let items: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(items, vec!["partial", "<final:stop>"]);
}

#[tokio::test]
async fn test_error_payload_mid_stream() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        serde_json::json!({"candidates": [{"content": {"parts": [{"text": "Start"}]}}]}),
        serde_json::json!({"error": {"code": 503, "message": "The model is overloaded."}}),
    ]);

    Mock::given(method("POST"))
        .and(path(format!("/models/{MODEL}:streamGenerateContent")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut items = collect(&provider, ChatRequest::new(vec![ChatMessage::user("Hi")])).await;

    let err = items.pop().unwrap().unwrap_err();
    assert_eq!(err.kind(), ProviderErrorKind::Network);
    assert_eq!(items.pop().unwrap().unwrap(), "Start");
}

// =============================================================================
// Error Classification Tests
// =============================================================================

#[tokio::test]
async fn test_invalid_api_key_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {
                "code": 400,
                "message": "API key not valid. Please pass a valid API key.",
                "status": "INVALID_ARGUMENT"
            }
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider
        .stream_chat(ChatRequest::new(vec![ChatMessage::user("Hi")]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ProviderErrorKind::Auth);
    match err {
        LLMError::AuthError(message) => {
            assert_eq!(message, "API key not valid. Please pass a valid API key.")
        }
        other => panic!("expected auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_forbidden_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let err = provider_for(&server)
        .stream_chat(ChatRequest::new(vec![ChatMessage::user("Hi")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ProviderErrorKind::Auth);
}

#[tokio::test]
async fn test_service_unavailable_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "error": {"code": 503, "message": "Service Unavailable"}
        })))
        .mount(&server)
        .await;

    let err = provider_for(&server)
        .stream_chat(ChatRequest::new(vec![ChatMessage::user("Hi")]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ProviderErrorKind::Network);
    assert!(matches!(err, LLMError::ApiError { status: 503, .. }));
}

#[tokio::test]
async fn test_bad_request_is_unknown_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {"code": 400, "message": "Invalid JSON payload received."}
        })))
        .mount(&server)
        .await;

    let err = provider_for(&server)
        .stream_chat(ChatRequest::new(vec![ChatMessage::user("Hi")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ProviderErrorKind::Unknown);
}

#[tokio::test]
async fn test_request_timeout_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let provider = GoogleProvider::with_options(
        "AIzaTestApiKey".to_string(),
        MODEL.to_string(),
        server.uri(),
        Duration::from_millis(200),
    )
    .unwrap();

    let err = provider
        .stream_chat(ChatRequest::new(vec![ChatMessage::user("Hi")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ProviderErrorKind::Network);
}

// =============================================================================
// Token Counting Tests
// =============================================================================

#[tokio::test]
async fn test_count_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/models/{MODEL}:countTokens")))
        .and(body_partial_json(serde_json::json!({
            "contents": [{"parts": [{"text": "how many tokens"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "totalTokens": 4
        })))
        .mount(&server)
        .await;

    let count = provider_for(&server).count_tokens("how many tokens").await.unwrap();
    assert_eq!(count, 4);
}

#[tokio::test]
async fn test_count_tokens_missing_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/models/{MODEL}:countTokens")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let err = provider_for(&server).count_tokens("x").await.unwrap_err();
    assert!(matches!(err, LLMError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_count_tokens_garbled_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/models/{MODEL}:countTokens")))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = provider_for(&server).count_tokens("x").await.unwrap_err();
    assert!(matches!(err, LLMError::InvalidResponse(_)));
    assert_eq!(err.kind(), ProviderErrorKind::Unknown);
}
