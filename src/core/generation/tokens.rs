//! Debounced, advisory token counting for the context text.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::llm::LLMProvider;

/// Display state of the token counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCount {
    Known(u32),
    Counting,
    /// The provider could not count; shown instead of an error
    Unavailable,
}

pub struct TokenEstimator {
    provider: Arc<dyn LLMProvider>,
    debounce: Duration,
    state: Arc<watch::Sender<TokenCount>>,
    /// Bumped on every edit; a count is published only if still current
    edit_seq: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TokenEstimator {
    pub fn new(provider: Arc<dyn LLMProvider>, debounce: Duration) -> Self {
        let (state, _) = watch::channel(TokenCount::Known(0));
        Self {
            provider,
            debounce,
            state: Arc::new(state),
            edit_seq: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
        }
    }

    /// Record an edit. Counting starts once no edit has arrived for the
    /// debounce delay. Must be called inside a tokio runtime.
    pub fn on_edit(&self, text: &str) {
        let seq = self.edit_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = pending.take() {
            handle.abort();
        }

        if text.trim().is_empty() {
            self.state.send_replace(TokenCount::Known(0));
            return;
        }

        self.state.send_replace(TokenCount::Counting);

        let provider = Arc::clone(&self.provider);
        let state = Arc::clone(&self.state);
        let edit_seq = Arc::clone(&self.edit_seq);
        let debounce = self.debounce;
        let text = text.to_string();

        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            let count = match provider.count_tokens(&text).await {
                Ok(n) => TokenCount::Known(n),
                Err(e) => {
                    log::debug!("Token counting unavailable: {e}");
                    TokenCount::Unavailable
                }
            };

            if edit_seq.load(Ordering::SeqCst) == seq {
                state.send_replace(count);
            }
        }));
    }

    pub fn current(&self) -> TokenCount {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TokenCount> {
        self.state.subscribe()
    }
}

impl Drop for TokenEstimator {
    fn drop(&mut self) {
        if let Some(handle) = self
            .pending
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}
