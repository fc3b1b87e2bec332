//! Durable key-value storage.
//!
//! Persisted state (link feedback, the instruction-template override and the
//! retention stamp) lives behind the injected [`KeyValueStore`] trait, so the
//! same components run on a local directory, in memory, or on a remote store.
//!
//! # Modules
//!
//! - `file` - one-file-per-key store with atomic replace
//! - `memory` - in-process map
//! - `error` - Error types for storage operations

pub mod error;
pub mod file;
pub mod memory;

use async_trait::async_trait;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;

/// Keys used by the persisted components.
pub mod keys {
    pub const LINK_FEEDBACK: &str = "linkFeedback";
    pub const CUSTOM_SYSTEM_PROMPT: &str = "customSystemPrompt";
    pub const LAST_DATA_CLEAR: &str = "lastDataClearTimestamp";
}

/// Minimal durable key-value collaborator.
///
/// A missing key is `Ok(None)`; removing a missing key succeeds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    async fn remove(&self, key: &str) -> StorageResult<()>;
}
