//! Feedback-driven regeneration.
//!
//! Marking a link bad changes the instruction every later run receives, so
//! the last request is rerun. Bursts of bad marks inside the coalesce
//! window produce a single rerun that sees all of them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::core::feedback::{FeedbackChange, FeedbackStore, LinkPolarity};
use crate::core::generation::{EventSink, GenerationOrchestrator};

pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(50);

/// Background listener on the feedback store
pub struct RegenerationTrigger {
    scheduled: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl RegenerationTrigger {
    /// Start listening. Must be called inside a tokio runtime.
    pub fn spawn(
        feedback: &FeedbackStore,
        orchestrator: Arc<GenerationOrchestrator>,
        sink: EventSink,
        coalesce_window: Duration,
    ) -> Self {
        let scheduled = Arc::new(AtomicUsize::new(0));
        let listener = Listener {
            changes: feedback.subscribe(),
            orchestrator,
            sink,
            coalesce_window,
            scheduled: Arc::clone(&scheduled),
        };

        Self {
            scheduled,
            task: tokio::spawn(listener.run()),
        }
    }

    /// Number of reruns scheduled so far
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for RegenerationTrigger {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Listener {
    changes: broadcast::Receiver<FeedbackChange>,
    orchestrator: Arc<GenerationOrchestrator>,
    sink: EventSink,
    coalesce_window: Duration,
    scheduled: Arc<AtomicUsize>,
}

impl Listener {
    async fn run(mut self) {
        loop {
            match self.changes.recv().await {
                Ok(change) if change.polarity == LinkPolarity::Bad => {
                    log::debug!("Link marked bad: {}", change.link);
                }
                Ok(_) => continue,
                // Missed changes may have included bad marks
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Feedback listener lagged by {skipped} changes");
                }
                Err(RecvError::Closed) => break,
            }

            let store_open = self.absorb_burst().await;
            self.schedule();
            if !store_open {
                break;
            }
        }
        log::debug!("Feedback store closed, regeneration listener exiting");
    }

    /// Swallow changes until the window elapses. Returns false if the
    /// store went away meanwhile.
    async fn absorb_burst(&mut self) -> bool {
        let window = tokio::time::sleep(self.coalesce_window);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => return true,
                next = self.changes.recv() => {
                    if let Err(RecvError::Closed) = next {
                        return false;
                    }
                }
            }
        }
    }

    fn schedule(&self) {
        let Some(request) = self.orchestrator.last_request() else {
            log::debug!("No previous generation to rerun");
            return;
        };

        match self.orchestrator.spawn_restart(request, self.sink.clone()) {
            Ok(_) => {
                let total = self.scheduled.fetch_add(1, Ordering::SeqCst) + 1;
                log::info!("Regeneration scheduled after link feedback (total {total})");
            }
            Err(e) => log::warn!("Regeneration skipped: {e}"),
        }
    }
}
