//! Support-reply generation: inputs, prompt assembly, streaming runs and
//! the helpers around them.

pub mod error;
pub mod formats;
pub mod input;
pub mod links;
pub mod orchestrator;
pub mod output;
pub mod prompt;
pub mod tokens;

pub use error::{GenerationError, GenerationResult, ValidationError};
pub use formats::{default_format_ids, find_format, ResponseFormat, RESPONSE_FORMATS};
pub use input::{GenerationRequest, InputAggregator};
pub use links::extract_links;
pub use orchestrator::{
    EventSink, GenerationEvent, GenerationOrchestrator, OrchestratorConfig, RunReport, RunState,
};
pub use output::{OutputBuffer, OutputSegment, SECTION_SEPARATOR};
pub use prompt::{
    build_user_prompt, resolve_instruction, TemplateStore, BLOCKED_LINKS_PLACEHOLDER,
    DEFAULT_SYSTEM_PROMPT, NO_BLOCKED_LINKS,
};
pub use tokens::{TokenCount, TokenEstimator};
