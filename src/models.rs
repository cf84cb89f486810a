//! Data models for recordings, scripts, and analysis results.
//!
//! Wire-facing structs serialize with the service's camelCase JSON dialect.
//! Key and value equality is structural on every field; the grouping and
//! deduplication steps depend on that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a discovered script, issued by the service.
pub type ScriptId = String;
/// Server-side handle binding requests to one recording.
pub type SessionId = String;
/// Identifier of one submitted analysis.
pub type AnalysisId = String;

/// One source unit discovered in a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub script_id: ScriptId,
    /// Empty for scripts without a resolvable url (eval'd code and the
    /// like). Such scripts stay addressable by id but are hidden from
    /// user-facing listings.
    #[serde(default)]
    pub url: String,
}

impl Script {
    /// Whether the script belongs in a user-facing listing.
    pub fn has_url(&self) -> bool {
        !self.url.is_empty()
    }
}

/// A position in a script's source text (1-indexed line).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub script_id: ScriptId,
    pub line: u32,
    pub column: u32,
}

/// Identity of one function parameter slot, independent of call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultKey {
    pub function_name: String,
    pub location: SourceLocation,
    /// Zero-based position of the parameter in the function signature.
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_name: Option<String>,
}

/// Analysis-defined value attached to a key.
///
/// The parameter-type analysis emits either a bare type tag or a type tag
/// paired with the call site that produced it; both shapes are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    /// A bare type tag, e.g. `"number"`.
    Type(String),
    /// A type tag plus the call site it was observed at.
    TypeAt {
        #[serde(rename = "type")]
        type_tag: String,
        caller: SourceLocation,
    },
}

impl ResultValue {
    pub fn type_tag(&self) -> &str {
        match self {
            ResultValue::Type(tag) => tag,
            ResultValue::TypeAt { type_tag, .. } => type_tag,
        }
    }
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultValue::Type(tag) => write!(f, "{}", tag),
            ResultValue::TypeAt { type_tag, caller } => {
                write!(f, "{} (caller {}:{})", type_tag, caller.line, caller.column)
            }
        }
    }
}

/// One key/value record from a pushed result batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub key: ResultKey,
    pub value: ResultValue,
}

/// One parameter slot's deduplicated values, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyGroup {
    pub key: ResultKey,
    pub values: Vec<ResultValue>,
}

/// The renderable unit: one physical source line plus its result groups.
///
/// Lines without results carry an empty `result_groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedLine {
    pub line_number: u32,
    pub source_text: String,
    pub result_groups: Vec<KeyGroup>,
}

/// Opaque analysis program submitted to the service.
///
/// The mapper and reducer are program text executed remotely; the client
/// never inspects them beyond passing them along.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub mapper: String,
    pub reducer: String,
    pub effectful: bool,
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        Self {
            mapper: TYPE_MAPPER.to_string(),
            reducer: TYPE_REDUCER.to_string(),
            effectful: false,
        }
    }
}

/// Mapper program run at every registered function entry point. Produces
/// key/value pairs where keys have the form
/// `{ functionName, location, index, parameterName }` and values are the
/// observed type of that parameter.
pub const TYPE_MAPPER: &str = r#"
  const { point, time } = input;
  const { frame: { frameId, functionName, location } } = sendMessage("Pause.getTopFrame");
  const { parameters } = sendMessage("Pause.getFrameParameters", { frameId });

  const entries = [];
  parameters.forEach((param, index) => {
    const key = { functionName, location, index, parameterName: param.name };
    const value = valueType(param);
    entries.push({ key, value });
  });
  return entries;

  function valueType(v) {
    if ("value" in v) {
      if (v.value === null) {
        return "null";
      }
      return typeof v.value;
    }
    if ("unserializable" in v) {
      // Unserializable values are either numbers or BigInts, which end with "n".
      if (v.unserializable.endsWith("n")) {
        return "bigint";
      }
      return "number";
    }
    if ("object" in v) {
      return "object";
    }
    return "undefined";
  }
"#;

/// Reducer program combining the values seen for one key. Removes
/// duplicates from the parameter types encountered.
pub const TYPE_REDUCER: &str = r#"
  return [...new Set(values)];
"#;

/// Metadata about one probe report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    /// Recording the session was bound to.
    pub recording_id: String,
    /// Session issued by the service.
    pub session_id: String,
    /// Script the analysis was scoped to.
    pub script_id: String,
    pub script_url: String,
    /// Identifier the service assigned to the analysis run.
    pub analysis_id: String,
    /// Date and time the view was produced.
    pub analysis_date: DateTime<Utc>,
    /// Result entries accumulated for the analysis.
    pub entry_count: usize,
    /// Source lines that carry at least one result group.
    pub annotated_lines: usize,
    /// Wall-clock duration of the whole run in seconds.
    pub duration_seconds: f64,
}

/// The complete annotated-source report for one script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub metadata: ReportMetadata,
    pub lines: Vec<AnnotatedLine>,
}
