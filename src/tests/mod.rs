//! Crate-internal test suites and shared fixtures.

pub mod common;
mod unit;
