//! LLM Provider Unit Tests
//!
//! Uses wiremock to exercise the Gemini provider over HTTP:
//! - Request formatting
//! - SSE stream parsing
//! - Error classification (invalid key, throttling, server errors)
//! - Token counting

mod google_tests;
