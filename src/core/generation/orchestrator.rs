//! Multi-format streaming generation.
//!
//! A run walks the requested formats in order, opening one provider stream
//! per format and forwarding fragments to an event sink as they arrive.
//! At most one run executes at a time; a restart cancels the run in flight
//! and waits for it to stand down before starting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::error::{GenerationError, GenerationResult};
use super::input::GenerationRequest;
use super::output::{OutputBuffer, SECTION_SEPARATOR};
use super::prompt::{build_user_prompt, resolve_instruction};
use crate::core::feedback::FeedbackStore;
use crate::core::llm::{ChatChunk, ChatMessage, ChatRequest, LLMError, LLMProvider, ProviderErrorKind};

/// Observable lifecycle of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    /// Streaming the format at this position of the request
    RunningFormat(usize),
    Succeeded,
    Failed(ProviderErrorKind),
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::RunningFormat(_))
    }
}

/// Progress notifications, tagged with the run that produced them
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Started { run_id: u64, formats: Vec<String> },
    Delta { run_id: u64, text: String },
    Completed { run_id: u64 },
    Failed { run_id: u64, error: GenerationError },
    Cancelled { run_id: u64 },
}

impl GenerationEvent {
    pub fn run_id(&self) -> u64 {
        match self {
            GenerationEvent::Started { run_id, .. }
            | GenerationEvent::Delta { run_id, .. }
            | GenerationEvent::Completed { run_id }
            | GenerationEvent::Failed { run_id, .. }
            | GenerationEvent::Cancelled { run_id } => *run_id,
        }
    }
}

pub type EventSink = mpsc::UnboundedSender<GenerationEvent>;

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: u64,
    pub sections: usize,
    pub output: String,
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Fail the run when a stream goes quiet for longer than this
    pub stream_idle_timeout: Option<Duration>,
}

struct ActiveRun {
    id: u64,
    token: CancellationToken,
}

pub struct GenerationOrchestrator {
    provider: Arc<dyn LLMProvider>,
    feedback: Arc<FeedbackStore>,
    config: OrchestratorConfig,
    output: RwLock<OutputBuffer>,
    state: watch::Sender<RunState>,
    /// Held for the whole of a run
    run_gate: tokio::sync::Mutex<()>,
    /// Most recently registered run; cancelled when a newer one registers
    current: Mutex<Option<ActiveRun>>,
    last_request: Mutex<Option<GenerationRequest>>,
    last_error: Mutex<Option<GenerationError>>,
    next_run_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

fn emit(sink: &EventSink, event: GenerationEvent) {
    if sink.send(event).is_err() {
        log::trace!("Generation event dropped, no listener");
    }
}

impl GenerationOrchestrator {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        feedback: Arc<FeedbackStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            provider,
            feedback,
            config,
            output: RwLock::new(OutputBuffer::new()),
            state,
            run_gate: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
            last_request: Mutex::new(None),
            last_error: Mutex::new(None),
            next_run_id: AtomicU64::new(0),
        }
    }

    /// Run `request` to completion.
    ///
    /// Fails with [`GenerationError::AlreadyRunning`] instead of waiting when
    /// another run holds the gate. Validation problems are reported before
    /// any state changes.
    pub async fn execute(
        &self,
        request: GenerationRequest,
        sink: &EventSink,
    ) -> GenerationResult<RunReport> {
        self.validate(&request)?;

        let Ok(_gate) = self.run_gate.try_lock() else {
            log::debug!("Generation requested while a run is active");
            return Err(GenerationError::AlreadyRunning);
        };

        let (run_id, token) = self.register_run();
        self.run_locked(run_id, token, request, sink)
            .instrument(tracing::info_span!("generation_run", run_id))
            .await
    }

    /// Cancel whatever is running, then run `request`.
    pub async fn restart(
        &self,
        request: GenerationRequest,
        sink: &EventSink,
    ) -> GenerationResult<RunReport> {
        self.validate(&request)?;
        let (run_id, token) = self.register_run();
        self.run_when_free(run_id, token, request, sink).await
    }

    /// [`restart`](Self::restart) on a background task.
    ///
    /// The run is registered before this returns, so a later restart always
    /// supersedes it.
    pub fn spawn_restart(
        self: &Arc<Self>,
        request: GenerationRequest,
        sink: EventSink,
    ) -> GenerationResult<JoinHandle<GenerationResult<RunReport>>> {
        self.validate(&request)?;
        let (run_id, token) = self.register_run();
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.run_when_free(run_id, token, request, &sink).await
        }))
    }

    /// Signal the active run, if any, to stop.
    pub fn cancel(&self) {
        if let Some(active) = lock(&self.current).as_ref() {
            log::info!("Cancelling generation run {}", active.id);
            active.token.cancel();
        }
    }

    /// Cancel, wait for the run to stand down, then forget all output.
    pub async fn clear(&self) {
        self.cancel();
        let _gate = self.run_gate.lock().await;
        self.write_output().reset();
        *lock(&self.last_request) = None;
        *lock(&self.last_error) = None;
        self.state.send_replace(RunState::Idle);
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn output(&self) -> OutputBuffer {
        self.read_output().clone()
    }

    pub fn output_text(&self) -> String {
        self.read_output().text()
    }

    /// Request of the most recent run, for feedback-driven reruns
    pub fn last_request(&self) -> Option<GenerationRequest> {
        lock(&self.last_request).clone()
    }

    pub fn last_error(&self) -> Option<GenerationError> {
        lock(&self.last_error).clone()
    }

    fn validate(&self, request: &GenerationRequest) -> GenerationResult<()> {
        request.validate().map_err(|e| {
            let err = GenerationError::from(e);
            *lock(&self.last_error) = Some(err.clone());
            err
        })
    }

    fn register_run(&self) -> (u64, CancellationToken) {
        let id = self.next_run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        let previous = lock(&self.current).replace(ActiveRun {
            id,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            log::debug!("Run {id} supersedes run {}", previous.id);
            previous.token.cancel();
        }

        (id, token)
    }

    fn finish_run(&self, id: u64) {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(|r| r.id == id) {
            *current = None;
        }
    }

    async fn run_when_free(
        &self,
        run_id: u64,
        token: CancellationToken,
        request: GenerationRequest,
        sink: &EventSink,
    ) -> GenerationResult<RunReport> {
        let _gate = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.finish_run(run_id);
                log::debug!("Run {run_id} superseded before it started");
                return Err(GenerationError::Cancelled);
            }
            gate = self.run_gate.lock() => gate,
        };

        self.run_locked(run_id, token, request, sink)
            .instrument(tracing::info_span!("generation_run", run_id))
            .await
    }

    /// Body of a run; the caller holds the run gate.
    async fn run_locked(
        &self,
        run_id: u64,
        token: CancellationToken,
        request: GenerationRequest,
        sink: &EventSink,
    ) -> GenerationResult<RunReport> {
        *lock(&self.last_request) = Some(request.clone());
        *lock(&self.last_error) = None;

        // Resolved once so every format of a run sees the same blocked list
        let blocked = self.feedback.blocked_links();
        let instruction = resolve_instruction(&request.instruction_template, &blocked);

        self.write_output().reset();
        emit(
            sink,
            GenerationEvent::Started {
                run_id,
                formats: request.formats.clone(),
            },
        );
        log::info!(
            "Generation run {run_id} started: formats={:?} blocked_links={}",
            request.formats,
            blocked.len()
        );

        let mut outcome = Ok(());
        for (index, format) in request.formats.iter().enumerate() {
            if token.is_cancelled() {
                outcome = Err(GenerationError::Cancelled);
                break;
            }

            self.state.send_replace(RunState::RunningFormat(index));
            self.write_output().begin_segment(format.as_str());
            if index > 0 {
                emit(
                    sink,
                    GenerationEvent::Delta {
                        run_id,
                        text: SECTION_SEPARATOR.to_string(),
                    },
                );
            }

            let result = self
                .stream_format(run_id, &token, &request.context_text, format, &instruction, sink)
                .await;
            if let Err(e) = result {
                outcome = Err(e);
                break;
            }
        }

        self.finish_run(run_id);

        match outcome {
            Ok(()) => {
                self.state.send_replace(RunState::Succeeded);
                emit(sink, GenerationEvent::Completed { run_id });
                log::info!("Generation run {run_id} completed");
                Ok(RunReport {
                    run_id,
                    sections: request.formats.len(),
                    output: self.output_text(),
                })
            }
            Err(GenerationError::Cancelled) => {
                self.write_output().reset();
                self.state.send_replace(RunState::Idle);
                emit(sink, GenerationEvent::Cancelled { run_id });
                log::info!("Generation run {run_id} cancelled");
                Err(GenerationError::Cancelled)
            }
            Err(err) => {
                let kind = err.provider_kind().unwrap_or(ProviderErrorKind::Unknown);
                self.state.send_replace(RunState::Failed(kind));
                *lock(&self.last_error) = Some(err.clone());
                emit(
                    sink,
                    GenerationEvent::Failed {
                        run_id,
                        error: err.clone(),
                    },
                );
                log::warn!("Generation run {run_id} failed ({kind:?}): {err}");
                Err(err)
            }
        }
    }

    async fn stream_format(
        &self,
        run_id: u64,
        token: &CancellationToken,
        context: &str,
        format: &str,
        instruction: &str,
        sink: &EventSink,
    ) -> GenerationResult<()> {
        let request = ChatRequest::new(vec![ChatMessage::user(build_user_prompt(context, format))])
            .with_system(instruction);

        let mut rx = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(GenerationError::Cancelled),
            opened = self.provider.stream_chat(request) => opened?,
        };

        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(GenerationError::Cancelled),
                next = self.next_chunk(&mut rx) => next?,
            };

            let Some(chunk) = chunk else {
                log::debug!("Stream for {format} closed without a finish marker");
                return Ok(());
            };

            if !chunk.content.is_empty() {
                self.write_output().append(&chunk.content);
                emit(
                    sink,
                    GenerationEvent::Delta {
                        run_id,
                        text: chunk.content,
                    },
                );
            }

            if chunk.is_final {
                log::debug!(
                    "Format {format} finished: reason={:?}",
                    chunk.finish_reason
                );
                return Ok(());
            }
        }
    }

    async fn next_chunk(
        &self,
        rx: &mut mpsc::Receiver<crate::core::llm::Result<ChatChunk>>,
    ) -> GenerationResult<Option<ChatChunk>> {
        let item = match self.config.stream_idle_timeout {
            Some(limit) => tokio::time::timeout(limit, rx.recv())
                .await
                .map_err(|_| GenerationError::from(LLMError::Timeout))?,
            None => rx.recv().await,
        };

        match item {
            None => Ok(None),
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e.into()),
        }
    }

    fn read_output(&self) -> std::sync::RwLockReadGuard<'_, OutputBuffer> {
        self.output.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_output(&self) -> std::sync::RwLockWriteGuard<'_, OutputBuffer> {
        self.output.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::feedback::LinkPolarity;
    use crate::core::storage::MemoryStore;
    use crate::tests::common::{FormatScript, ScriptedProvider};

    async fn orchestrator_with(
        provider: Arc<ScriptedProvider>,
        config: OrchestratorConfig,
    ) -> (Arc<GenerationOrchestrator>, Arc<FeedbackStore>) {
        let feedback = Arc::new(FeedbackStore::load(Arc::new(MemoryStore::new())).await);
        let orchestrator = Arc::new(GenerationOrchestrator::new(
            provider,
            Arc::clone(&feedback),
            config,
        ));
        (orchestrator, feedback)
    }

    fn request(formats: &[&str]) -> GenerationRequest {
        GenerationRequest::new(
            "Customer cannot log in",
            formats.iter().map(|f| f.to_string()).collect(),
            "Rules.\nBlocked: {blocked_links_list}",
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<GenerationEvent>) -> Vec<GenerationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn deltas(events: &[GenerationEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                GenerationEvent::Delta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sections_stream_in_order_with_separators() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_format("EO", FormatScript::reply(["Hi ", "there"]))
                .with_format("QS", FormatScript::reply(["Summary"]))
                .with_format("ACK", FormatScript::reply(["Got it"])),
        );
        let (orchestrator, _) = orchestrator_with(provider.clone(), Default::default()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = orchestrator
            .execute(request(&["EO", "QS", "ACK"]), &tx)
            .await
            .unwrap();

        let expected = format!("Hi there{SECTION_SEPARATOR}Summary{SECTION_SEPARATOR}Got it");
        assert_eq!(report.output, expected);
        assert_eq!(report.sections, 3);
        assert_eq!(orchestrator.output_text(), expected);
        assert_eq!(orchestrator.state(), RunState::Succeeded);
        assert_eq!(provider.opened_formats(), vec!["EO", "QS", "ACK"]);

        let events = drain(&mut rx);
        assert_eq!(deltas(&events), expected);
        assert!(matches!(events.first(), Some(GenerationEvent::Started { .. })));
        assert!(matches!(events.last(), Some(GenerationEvent::Completed { .. })));
        let separators = events
            .iter()
            .filter(|e| matches!(e, GenerationEvent::Delta { text, .. } if text == SECTION_SEPARATOR))
            .count();
        assert_eq!(separators, 2);
    }

    #[tokio::test]
    async fn test_failure_mid_run_keeps_partial_output() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_format("EO", FormatScript::reply(["First"]))
                .with_format("QS", FormatScript::fail_after(["Part"], LLMError::Timeout))
                .with_format("ACK", FormatScript::reply(["never"])),
        );
        let (orchestrator, _) = orchestrator_with(provider.clone(), Default::default()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = orchestrator
            .execute(request(&["EO", "QS", "ACK"]), &tx)
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::ProviderNetwork(_)));
        assert_eq!(orchestrator.output_text(), format!("First{SECTION_SEPARATOR}Part"));
        assert_eq!(orchestrator.state(), RunState::Failed(ProviderErrorKind::Network));
        assert_eq!(orchestrator.last_error(), Some(err));
        assert_eq!(provider.opened_formats(), vec!["EO", "QS"]);
        assert!(matches!(
            drain(&mut rx).last(),
            Some(GenerationEvent::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_auth_failure_on_open() {
        let provider = Arc::new(ScriptedProvider::new().with_format(
            "EO",
            FormatScript::fail_on_open(LLMError::AuthError("API key not valid".into())),
        ));
        let (orchestrator, _) = orchestrator_with(provider, Default::default()).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = orchestrator.execute(request(&["EO"]), &tx).await.unwrap_err();
        assert_eq!(err, GenerationError::ProviderAuth("API key not valid".into()));
        assert_eq!(orchestrator.state(), RunState::Failed(ProviderErrorKind::Auth));
    }

    #[tokio::test]
    async fn test_blocked_links_resolved_into_instruction() {
        let provider = Arc::new(ScriptedProvider::new());
        let (orchestrator, feedback) = orchestrator_with(provider.clone(), Default::default()).await;
        feedback.set("https://u1.example", LinkPolarity::Bad).await;
        feedback.set("https://u2.example", LinkPolarity::Good).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        orchestrator.execute(request(&["EO", "CL"]), &tx).await.unwrap();

        let systems = provider.system_prompts();
        assert_eq!(systems.len(), 2);
        for system in systems {
            assert_eq!(system, "Rules.\nBlocked: https://u1.example");
        }
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_provider_call() {
        let provider = Arc::new(ScriptedProvider::new());
        let (orchestrator, _) = orchestrator_with(provider.clone(), Default::default()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let blank = GenerationRequest::new("   ", vec!["EO".into()], "t");
        let err = orchestrator.execute(blank, &tx).await.unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));

        let err = orchestrator.execute(request(&[]), &tx).await.unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));

        assert!(provider.opened_formats().is_empty());
        assert_eq!(orchestrator.state(), RunState::Idle);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(orchestrator.last_request(), None);
    }

    #[tokio::test]
    async fn test_execute_rejects_concurrent_run() {
        let provider = Arc::new(ScriptedProvider::new().with_format("EO", FormatScript::hang(["partial"])));
        let (orchestrator, _) = orchestrator_with(provider.clone(), Default::default()).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            let tx = tx.clone();
            tokio::spawn(async move { orchestrator.execute(request(&["EO"]), &tx).await })
        };
        provider.wait_for_opens(1).await;

        let err = orchestrator.execute(request(&["EO"]), &tx).await.unwrap_err();
        assert_eq!(err, GenerationError::AlreadyRunning);

        orchestrator.cancel();
        assert_eq!(first.await.unwrap(), Err(GenerationError::Cancelled));
        assert_eq!(orchestrator.state(), RunState::Idle);
        assert_eq!(orchestrator.output_text(), "");
    }

    #[tokio::test]
    async fn test_restart_supersedes_active_run() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_format("EO", FormatScript::hang(["stale"]))
                .with_format("QS", FormatScript::reply(["fresh"])),
        );
        let (orchestrator, _) = orchestrator_with(provider.clone(), Default::default()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = orchestrator
            .spawn_restart(request(&["EO"]), tx.clone())
            .unwrap();
        provider.wait_for_opens(1).await;

        let report = orchestrator.restart(request(&["QS"]), &tx).await.unwrap();
        assert_eq!(report.output, "fresh");
        assert_eq!(first.await.unwrap(), Err(GenerationError::Cancelled));
        assert_eq!(orchestrator.state(), RunState::Succeeded);

        let events = drain(&mut rx);
        let cancelled_at = events
            .iter()
            .position(|e| matches!(e, GenerationEvent::Cancelled { run_id } if *run_id == 1))
            .unwrap();
        let started_at = events
            .iter()
            .position(|e| matches!(e, GenerationEvent::Started { run_id, .. } if *run_id == 2))
            .unwrap();
        assert!(cancelled_at < started_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_fails_as_network_error() {
        let provider = Arc::new(ScriptedProvider::new().with_format("EO", FormatScript::hang(["slow"])));
        let config = OrchestratorConfig {
            stream_idle_timeout: Some(Duration::from_secs(5)),
        };
        let (orchestrator, _) = orchestrator_with(provider, config).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = orchestrator.execute(request(&["EO"]), &tx).await.unwrap_err();
        assert!(matches!(err, GenerationError::ProviderNetwork(_)));
        assert_eq!(orchestrator.output_text(), "slow");
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let provider = Arc::new(ScriptedProvider::new());
        let (orchestrator, _) = orchestrator_with(provider, Default::default()).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        orchestrator.execute(request(&["EO"]), &tx).await.unwrap();
        assert!(!orchestrator.output_text().is_empty());

        orchestrator.clear().await;
        assert_eq!(orchestrator.output_text(), "");
        assert_eq!(orchestrator.state(), RunState::Idle);
        assert_eq!(orchestrator.last_request(), None);
    }
}
