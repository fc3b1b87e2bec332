//! Instruction templates and prompt assembly.

use std::sync::Arc;

use crate::core::storage::{keys, KeyValueStore};

/// Built-in ruleset used when no override is stored
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("default_rules.md");

pub const BLOCKED_LINKS_PLACEHOLDER: &str = "{blocked_links_list}";
pub const NO_BLOCKED_LINKS: &str = "No blocked links.";

/// Substitute the blocked-link placeholder (first occurrence only).
pub fn resolve_instruction(template: &str, blocked_links: &[String]) -> String {
    let replacement = if blocked_links.is_empty() {
        NO_BLOCKED_LINKS.to_string()
    } else {
        blocked_links.join("\n")
    };
    template.replacen(BLOCKED_LINKS_PLACEHOLDER, &replacement, 1)
}

/// User turn for one format.
pub fn build_user_prompt(context: &str, format: &str) -> String {
    format!(
        "Please generate a response in the \"{format}\" format using the following context.\n\
         Ensure your output is only the generated text in the requested format, \
         without any extra commentary or explanation.\n\n\
         --- START OF USER CONTEXT ---\n\
         {context}\n\
         --- END OF USER CONTEXT ---\n"
    )
}

/// Persisted instruction-template override with a built-in fallback.
///
/// Storage faults never surface: reads fall back to the default and failed
/// writes are logged.
#[derive(Clone)]
pub struct TemplateStore {
    backend: Arc<dyn KeyValueStore>,
}

impl TemplateStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// The override if one is stored, else [`DEFAULT_SYSTEM_PROMPT`].
    pub async fn current(&self) -> String {
        match self.backend.get(keys::CUSTOM_SYSTEM_PROMPT).await {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
            Err(e) => {
                log::warn!("Could not read template override, using default: {e}");
                DEFAULT_SYSTEM_PROMPT.to_string()
            }
        }
    }

    /// Persist `text` as the override. Returns whether the write succeeded.
    pub async fn save(&self, text: &str) -> bool {
        match self.backend.set(keys::CUSTOM_SYSTEM_PROMPT, text).await {
            Ok(()) => {
                log::info!("Saved instruction template override ({} bytes)", text.len());
                true
            }
            Err(e) => {
                log::error!("Could not save template override: {e}");
                false
            }
        }
    }

    /// Drop the override and return the default.
    pub async fn reset(&self) -> String {
        if let Err(e) = self.backend.remove(keys::CUSTOM_SYSTEM_PROMPT).await {
            log::error!("Could not remove template override: {e}");
        }
        DEFAULT_SYSTEM_PROMPT.to_string()
    }
}
