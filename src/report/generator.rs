//! Markdown and JSON report generation.
//!
//! Renders the annotated per-line view of a script. In the Markdown
//! output, contiguous source lines share one fenced block; a line that
//! carries results closes the block so its annotations land directly
//! beneath it, then the source resumes in a fresh block.

use anyhow::{Context, Result};

use crate::models::{AnnotatedLine, KeyGroup, ProbeReport, ReportMetadata};

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &ProbeReport) -> String {
    let mut output = String::new();

    output.push_str("# Typeprobe Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_source_section(&report.lines));
    output.push_str(&generate_footer());

    output
}

/// Generate a JSON report.
pub fn generate_json_report(report: &ProbeReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Recording:** `{}`\n", metadata.recording_id));
    section.push_str(&format!("- **Script:** {}\n", metadata.script_url));
    section.push_str(&format!("- **Script ID:** `{}`\n", metadata.script_id));
    section.push_str(&format!("- **Analysis ID:** `{}`\n", metadata.analysis_id));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Result Entries:** {}\n", metadata.entry_count));
    section.push_str(&format!(
        "- **Annotated Lines:** {}\n",
        metadata.annotated_lines
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the annotated source section.
fn generate_source_section(lines: &[AnnotatedLine]) -> String {
    let mut section = String::new();

    section.push_str("## Annotated Source\n\n");

    if lines.is_empty() {
        section.push_str("*The script has no source text.*\n\n");
        return section;
    }

    let mut in_fence = false;
    for line in lines {
        if !in_fence {
            section.push_str("```\n");
            in_fence = true;
        }
        section.push_str(&format!("{:>5} | {}\n", line.line_number, line.source_text));

        if !line.result_groups.is_empty() {
            section.push_str("```\n\n");
            in_fence = false;
            for group in &line.result_groups {
                section.push_str(&format!("- {}\n", format_group(group)));
            }
            section.push('\n');
        }
    }
    if in_fence {
        section.push_str("```\n");
    }
    section.push('\n');

    section
}

/// One parameter slot rendered as a single annotation line.
fn format_group(group: &KeyGroup) -> String {
    let name = if group.key.function_name.is_empty() {
        "<anonymous>"
    } else {
        group.key.function_name.as_str()
    };
    let param = match &group.key.parameter_name {
        Some(parameter) => format!(" `{}`", parameter),
        None => String::new(),
    };
    let values = group
        .values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" | ");
    format!("**{}** arg {}{}: {}", name, group.key.index, param, values)
}

/// Generate the report footer.
fn generate_footer() -> String {
    format!(
        "---\n\n*Generated by Typeprobe v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultKey, ResultValue, SourceLocation};
    use chrono::Utc;

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            recording_id: "rec1".to_string(),
            session_id: "s1".to_string(),
            script_id: "sc1".to_string(),
            script_url: "http://a/app.js".to_string(),
            analysis_id: "a1".to_string(),
            analysis_date: Utc::now(),
            entry_count: 2,
            annotated_lines: 1,
            duration_seconds: 1.5,
        }
    }

    fn annotated_lines() -> Vec<AnnotatedLine> {
        let key = ResultKey {
            function_name: "f".to_string(),
            location: SourceLocation {
                script_id: "sc1".to_string(),
                line: 2,
                column: 0,
            },
            index: 0,
            parameter_name: Some("x".to_string()),
        };
        vec![
            AnnotatedLine {
                line_number: 1,
                source_text: "const a = 1;".to_string(),
                result_groups: vec![],
            },
            AnnotatedLine {
                line_number: 2,
                source_text: "function f(x) {}".to_string(),
                result_groups: vec![KeyGroup {
                    key,
                    values: vec![
                        ResultValue::Type("number".to_string()),
                        ResultValue::Type("string".to_string()),
                    ],
                }],
            },
            AnnotatedLine {
                line_number: 3,
                source_text: "f(1);".to_string(),
                result_groups: vec![],
            },
        ]
    }

    #[test]
    fn test_markdown_breaks_the_source_block_after_an_annotated_line() {
        let report = ProbeReport {
            metadata: metadata(),
            lines: annotated_lines(),
        };
        let output = generate_markdown_report(&report);

        let function_at = output.find("function f(x) {}").unwrap();
        let annotation_at = output.find("**f** arg 0 `x`: number | string").unwrap();
        let resume_at = output.find("f(1);").unwrap();
        assert!(function_at < annotation_at);
        assert!(annotation_at < resume_at);

        // The annotated line ends its fence before the annotation.
        let between = &output[function_at..annotation_at];
        assert!(between.contains("```"));
    }

    #[test]
    fn test_markdown_contains_metadata() {
        let report = ProbeReport {
            metadata: metadata(),
            lines: annotated_lines(),
        };
        let output = generate_markdown_report(&report);
        assert!(output.contains("`rec1`"));
        assert!(output.contains("http://a/app.js"));
        assert!(output.contains("**Result Entries:** 2"));
    }

    #[test]
    fn test_json_report_round_trips() {
        let report = ProbeReport {
            metadata: metadata(),
            lines: annotated_lines(),
        };
        let output = generate_json_report(&report).unwrap();
        let parsed: ProbeReport = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed.lines, report.lines);
        assert_eq!(parsed.metadata.analysis_id, "a1");
    }

    #[test]
    fn test_anonymous_functions_render_with_a_placeholder() {
        let mut lines = annotated_lines();
        lines[1].result_groups[0].key.function_name = String::new();
        lines[1].result_groups[0].key.parameter_name = None;
        let report = ProbeReport {
            metadata: metadata(),
            lines,
        };
        let output = generate_markdown_report(&report);
        assert!(output.contains("**<anonymous>** arg 0: number | string"));
    }

    #[test]
    fn test_empty_source_is_called_out() {
        let report = ProbeReport {
            metadata: metadata(),
            lines: vec![],
        };
        let output = generate_markdown_report(&report);
        assert!(output.contains("no source text"));
    }
}
