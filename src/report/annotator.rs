//! Merging source text with grouped analysis results.

use std::collections::BTreeMap;

use crate::models::{AnnotatedLine, KeyGroup};

/// Merge `source_text` with per-line result groups into a renderable
/// sequence, one element per physical line (1-indexed).
///
/// Lines without a group carry only their text; lines with one carry the
/// groups that should render directly beneath them. Pure function of its
/// inputs, so a view can be rebuilt at any time (for instance after
/// late-arriving results) and always comes out the same. Groups pointing
/// past the last line are dropped.
pub fn annotate(source_text: &str, groups: &BTreeMap<u32, Vec<KeyGroup>>) -> Vec<AnnotatedLine> {
    source_text
        .lines()
        .enumerate()
        .map(|(index, text)| {
            let line_number = index as u32 + 1;
            AnnotatedLine {
                line_number,
                source_text: text.to_string(),
                result_groups: groups.get(&line_number).cloned().unwrap_or_default(),
            }
        })
        .collect()
}
