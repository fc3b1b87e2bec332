//! Output buffer: one text segment per requested format.

use serde::Serialize;

/// Fixed separator between consecutive format sections
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSegment {
    pub format: String,
    pub text: String,
}

/// Ordered per-format segments.
///
/// Append-only while a run is active; replaced wholesale by [`reset`](Self::reset)
/// at the start of each run and on clear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutputBuffer {
    segments: Vec<OutputSegment>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.segments.clear();
    }

    /// Open the segment for the next format
    pub fn begin_segment(&mut self, format: impl Into<String>) {
        self.segments.push(OutputSegment {
            format: format.into(),
            text: String::new(),
        });
    }

    /// Append to the open segment; opens an unnamed one if none exists.
    pub fn append(&mut self, fragment: &str) {
        if self.segments.is_empty() {
            self.begin_segment("");
        }
        if let Some(last) = self.segments.last_mut() {
            last.text.push_str(fragment);
        }
    }

    pub fn segments(&self) -> &[OutputSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.is_empty()) && self.segments.len() <= 1
    }

    /// Full text, segments joined by [`SECTION_SEPARATOR`]
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR)
    }
}
