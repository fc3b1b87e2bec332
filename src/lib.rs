/// Support Scribe - streaming support-reply generator
///
/// Core library: multi-format generation against a streaming model provider,
/// persistent per-link feedback, and feedback-driven regeneration.

pub mod config;
pub mod core;

#[cfg(test)]
mod tests;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
