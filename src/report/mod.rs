//! Session report generation.
//!
//! This module exports a finished session as Markdown or JSON.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report};
