//! Link Feedback Store
//!
//! Persistent link → polarity map. Links marked bad become the blocked-link
//! list injected into generation instructions. Every effective mutation is
//! written through to the key-value backend and published to subscribers.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::core::storage::{keys, KeyValueStore};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// User verdict on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPolarity {
    Good,
    Bad,
}

impl fmt::Display for LinkPolarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkPolarity::Good => write!(f, "good"),
            LinkPolarity::Bad => write!(f, "bad"),
        }
    }
}

impl FromStr for LinkPolarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" => Ok(LinkPolarity::Good),
            "bad" => Ok(LinkPolarity::Bad),
            other => Err(format!("unknown link polarity: {other}")),
        }
    }
}

/// Published after every mutation that changed the stored polarity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackChange {
    pub link: String,
    pub polarity: LinkPolarity,
    pub previous: Option<LinkPolarity>,
}

/// Links in first-insertion order
pub type FeedbackMap = IndexMap<String, LinkPolarity>;

pub struct FeedbackStore {
    entries: RwLock<FeedbackMap>,
    /// Serializes mutate-then-persist so writes reach the backend in order
    write_gate: Mutex<()>,
    backend: Arc<dyn KeyValueStore>,
    changes: broadcast::Sender<FeedbackChange>,
}

impl fmt::Debug for FeedbackStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackStore")
            .field("entries", &*self.read_entries())
            .finish_non_exhaustive()
    }
}

impl FeedbackStore {
    /// Load persisted feedback.
    ///
    /// Missing, unreadable or corrupt state yields an empty store.
    pub async fn load(backend: Arc<dyn KeyValueStore>) -> Self {
        let entries = match backend.get(keys::LINK_FEEDBACK).await {
            Ok(Some(raw)) => match serde_json::from_str::<FeedbackMap>(&raw) {
                Ok(map) => {
                    log::info!("Loaded {} link feedback entries", map.len());
                    map
                }
                Err(e) => {
                    log::warn!("Stored link feedback is corrupt ({e}), starting empty");
                    FeedbackMap::new()
                }
            },
            Ok(None) => FeedbackMap::new(),
            Err(e) => {
                log::warn!("Could not read link feedback ({e}), starting empty");
                FeedbackMap::new()
            }
        };

        Self::with_entries(backend, entries)
    }

    fn with_entries(backend: Arc<dyn KeyValueStore>, entries: FeedbackMap) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(entries),
            write_gate: Mutex::new(()),
            backend,
            changes,
        }
    }

    pub fn get(&self, link: &str) -> Option<LinkPolarity> {
        self.read_entries().get(link.trim()).copied()
    }

    /// Record a verdict for `link`.
    ///
    /// Returns whether the stored polarity changed. Re-setting the current
    /// polarity writes nothing and publishes nothing. A failed write is
    /// logged; the in-memory value still takes effect.
    pub async fn set(&self, link: &str, polarity: LinkPolarity) -> bool {
        let link = link.trim();
        if link.is_empty() {
            log::warn!("Ignoring feedback for an empty link");
            return false;
        }

        let _gate = self.write_gate.lock().await;

        let (previous, serialized) = {
            let mut entries = self.write_entries();
            let previous = entries.get(link).copied();
            if previous == Some(polarity) {
                return false;
            }
            entries.insert(link.to_string(), polarity);
            (previous, serde_json::to_string(&*entries))
        };

        match serialized {
            Ok(json) => {
                if let Err(e) = self.backend.set(keys::LINK_FEEDBACK, &json).await {
                    log::error!("Could not save link feedback: {e}");
                }
            }
            Err(e) => log::error!("Could not serialize link feedback: {e}"),
        }

        log::info!("Link marked {polarity}: {link}");

        // No subscribers is fine
        let _ = self.changes.send(FeedbackChange {
            link: link.to_string(),
            polarity,
            previous,
        });

        true
    }

    /// Links with the given polarity, in first-insertion order
    pub fn list(&self, polarity: LinkPolarity) -> Vec<String> {
        self.read_entries()
            .iter()
            .filter(|(_, p)| **p == polarity)
            .map(|(link, _)| link.clone())
            .collect()
    }

    pub fn blocked_links(&self) -> Vec<String> {
        self.list(LinkPolarity::Bad)
    }

    pub fn snapshot(&self) -> FeedbackMap {
        self.read_entries().clone()
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedbackChange> {
        self.changes.subscribe()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, FeedbackMap> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, FeedbackMap> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
