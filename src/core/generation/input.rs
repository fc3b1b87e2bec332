//! Generation inputs: the request type and the editable input state behind it.

use serde::{Deserialize, Serialize};

use super::error::ValidationError;
use super::formats::{default_format_ids, find_format};

/// Everything one run needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub context_text: String,
    /// Order fixes the order of output sections
    pub formats: Vec<String>,
    pub instruction_template: String,
}

impl GenerationRequest {
    pub fn new(
        context_text: impl Into<String>,
        formats: Vec<String>,
        instruction_template: impl Into<String>,
    ) -> Self {
        Self {
            context_text: context_text.into(),
            formats,
            instruction_template: instruction_template.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.context_text.trim().is_empty() {
            return Err(ValidationError::EmptyContext);
        }
        if self.formats.is_empty() {
            return Err(ValidationError::NoFormats);
        }
        Ok(())
    }
}

/// Current context text, selected formats and instruction template
#[derive(Debug, Clone)]
pub struct InputAggregator {
    context_text: String,
    formats: Vec<String>,
    default_formats: Vec<String>,
    instruction_template: String,
}

impl InputAggregator {
    /// `default_formats` falls back to the catalog default when empty.
    pub fn new(instruction_template: impl Into<String>, default_formats: Vec<String>) -> Self {
        let default_formats = if default_formats.is_empty() {
            default_format_ids()
        } else {
            default_formats
        };
        Self {
            context_text: String::new(),
            formats: default_formats.clone(),
            default_formats,
            instruction_template: instruction_template.into(),
        }
    }

    pub fn context_text(&self) -> &str {
        &self.context_text
    }

    pub fn set_context(&mut self, text: impl Into<String>) {
        self.context_text = text.into();
    }

    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    /// Select a catalog format (appended last) or deselect it.
    ///
    /// Returns whether the format is selected afterwards; unknown ids are
    /// ignored and return `false`.
    pub fn toggle_format(&mut self, id: &str) -> bool {
        let Some(format) = find_format(id) else {
            log::warn!("Ignoring unknown response format {id:?}");
            return false;
        };

        if let Some(pos) = self.formats.iter().position(|f| f == format.id) {
            self.formats.remove(pos);
            false
        } else {
            self.formats.push(format.id.to_string());
            true
        }
    }

    /// Replace the selection wholesale, keeping the given order.
    pub fn set_formats(&mut self, formats: Vec<String>) {
        self.formats = formats;
    }

    pub fn instruction_template(&self) -> &str {
        &self.instruction_template
    }

    pub fn set_instruction_template(&mut self, template: impl Into<String>) {
        self.instruction_template = template.into();
    }

    pub fn request(&self) -> GenerationRequest {
        GenerationRequest::new(
            self.context_text.clone(),
            self.formats.clone(),
            self.instruction_template.clone(),
        )
    }

    /// Empty the context and restore the default selection. The template is kept.
    pub fn clear(&mut self) {
        self.context_text.clear();
        self.formats = self.default_formats.clone();
    }
}
