pub mod logging;
pub mod llm;

// Persisted state: key-value backends, link feedback and its expiry
pub mod storage;
pub mod feedback;
pub mod retention;

// Gemini SSE parsing
pub mod streaming;

// Multi-format generation and feedback-driven reruns
pub mod generation;
pub mod regeneration;

// UI-facing session
pub mod support;
