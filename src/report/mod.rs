//! Rendering of analysis results: pure annotation plus report output.

pub mod annotator;
pub mod generator;

pub use annotator::annotate;
pub use generator::{generate_json_report, generate_markdown_report};
