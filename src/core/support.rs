//! Support session: the front door for a UI.
//!
//! Owns the input state and wires the feedback store, orchestrator, token
//! estimator and regeneration trigger together. Each UI event maps onto one
//! method.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::core::feedback::{FeedbackStore, LinkPolarity};
use crate::core::generation::{
    extract_links, GenerationError, GenerationEvent, GenerationOrchestrator, GenerationResult,
    InputAggregator, OrchestratorConfig, RunReport, RunState, TemplateStore, TokenCount,
    TokenEstimator,
};
use crate::core::llm::LLMProvider;
use crate::core::regeneration::{RegenerationTrigger, DEFAULT_COALESCE_WINDOW};
use crate::core::retention;
use crate::core::storage::KeyValueStore;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub token_debounce: Duration,
    pub coalesce_window: Duration,
    pub stream_idle_timeout: Option<Duration>,
    /// Empty means the catalog default
    pub default_formats: Vec<String>,
    /// Zero disables startup expiry
    pub retention_hours: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            token_debounce: Duration::from_millis(500),
            coalesce_window: DEFAULT_COALESCE_WINDOW,
            stream_idle_timeout: None,
            default_formats: Vec::new(),
            retention_hours: 24,
        }
    }
}

pub struct SupportSession {
    input: Mutex<InputAggregator>,
    templates: TemplateStore,
    feedback: Arc<FeedbackStore>,
    orchestrator: Arc<GenerationOrchestrator>,
    tokens: TokenEstimator,
    trigger: RegenerationTrigger,
    events: mpsc::UnboundedSender<GenerationEvent>,
}

impl SupportSession {
    /// Expire stale data, load persisted state and start background tasks.
    ///
    /// Returns the session and the receiving end of its event stream. Must be
    /// called inside a tokio runtime.
    pub async fn start(
        provider: Arc<dyn LLMProvider>,
        backend: Arc<dyn KeyValueStore>,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<GenerationEvent>) {
        if retention::expire_stale_data(backend.as_ref(), options.retention_hours, Utc::now()).await {
            log::info!("Cleared stored feedback older than {}h", options.retention_hours);
        }

        let feedback = Arc::new(FeedbackStore::load(Arc::clone(&backend)).await);
        let templates = TemplateStore::new(backend);
        let input = InputAggregator::new(templates.current().await, options.default_formats);

        let orchestrator = Arc::new(GenerationOrchestrator::new(
            Arc::clone(&provider),
            Arc::clone(&feedback),
            OrchestratorConfig {
                stream_idle_timeout: options.stream_idle_timeout,
            },
        ));

        let (events, rx) = mpsc::unbounded_channel();
        let trigger = RegenerationTrigger::spawn(
            &feedback,
            Arc::clone(&orchestrator),
            events.clone(),
            options.coalesce_window,
        );

        log::info!(
            "Support session started: provider={} model={} feedback_entries={}",
            provider.id(),
            provider.model(),
            feedback.len()
        );

        let session = Self {
            input: Mutex::new(input),
            templates,
            feedback,
            orchestrator,
            tokens: TokenEstimator::new(provider, options.token_debounce),
            trigger,
            events,
        };
        (session, rx)
    }

    fn input(&self) -> MutexGuard<'_, InputAggregator> {
        self.input.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ========================================================================
    // UI events
    // ========================================================================

    /// Generate from the current input. Fails if a run is in progress.
    pub async fn on_generate(&self) -> GenerationResult<RunReport> {
        let request = self.input().request();
        self.orchestrator.execute(request, &self.events).await
    }

    /// Cancel any run and generate again from the current input.
    pub async fn on_regenerate(&self) -> GenerationResult<RunReport> {
        let request = self.input().request();
        self.orchestrator.restart(request, &self.events).await
    }

    /// Record feedback. A bad mark reruns the last generation.
    pub async fn on_link_feedback(&self, link: &str, polarity: LinkPolarity) -> bool {
        self.feedback.set(link, polarity).await
    }

    pub async fn on_clear_all(&self) {
        self.input().clear();
        self.tokens.on_edit("");
        self.orchestrator.clear().await;
    }

    pub fn on_context_edit(&self, text: &str) {
        self.input().set_context(text);
        self.tokens.on_edit(text);
    }

    pub fn toggle_format(&self, id: &str) -> bool {
        self.input().toggle_format(id)
    }

    pub fn set_formats(&self, formats: Vec<String>) {
        self.input().set_formats(formats);
    }

    /// Persist a template override and use it from the next run on.
    pub async fn save_template(&self, text: &str) -> bool {
        let saved = self.templates.save(text).await;
        if saved {
            self.input().set_instruction_template(text);
        }
        saved
    }

    pub async fn reset_template(&self) {
        let default = self.templates.reset().await;
        self.input().set_instruction_template(default);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn context_text(&self) -> String {
        self.input().context_text().to_string()
    }

    pub fn formats(&self) -> Vec<String> {
        self.input().formats().to_vec()
    }

    pub fn instruction_template(&self) -> String {
        self.input().instruction_template().to_string()
    }

    pub fn output_text(&self) -> String {
        self.orchestrator.output_text()
    }

    /// Links in the current output, for per-link feedback
    pub fn output_links(&self) -> Vec<String> {
        extract_links(&self.output_text())
    }

    pub fn run_state(&self) -> RunState {
        self.orchestrator.state()
    }

    pub fn subscribe_run_state(&self) -> watch::Receiver<RunState> {
        self.orchestrator.subscribe_state()
    }

    pub fn last_error(&self) -> Option<GenerationError> {
        self.orchestrator.last_error()
    }

    pub fn token_count(&self) -> TokenCount {
        self.tokens.current()
    }

    pub fn subscribe_token_count(&self) -> watch::Receiver<TokenCount> {
        self.tokens.subscribe()
    }

    pub fn link_feedback(&self, link: &str) -> Option<LinkPolarity> {
        self.feedback.get(link)
    }

    pub fn feedback_list(&self, polarity: LinkPolarity) -> Vec<String> {
        self.feedback.list(polarity)
    }

    pub fn regenerations_scheduled(&self) -> usize {
        self.trigger.scheduled_count()
    }

    /// Stop background work. In-flight runs are cancelled.
    pub fn shutdown(&self) {
        self.trigger.shutdown();
        self.orchestrator.cancel();
    }
}
