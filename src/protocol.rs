//! Wire vocabulary of the recording analysis service.
//!
//! Command names, event names, and the response/event payload shapes the
//! client relies on. Everything crosses the wire as camelCase JSON.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ProbeError;

/// Bind subsequent requests to one recording.
pub const CREATE_SESSION: &str = "Recording.createSession";
/// Enumerate the scripts captured in the session's recording.
pub const FIND_SCRIPTS: &str = "Debugger.findScripts";
/// Fetch one script's source text.
pub const GET_SCRIPT_SOURCE: &str = "Debugger.getScriptSource";
/// Submit mapper/reducer program text; the service returns an analysis id.
pub const CREATE_ANALYSIS: &str = "Analysis.createAnalysis";
/// Scope an analysis to every function entry of one script.
pub const ADD_FUNCTION_ENTRY_POINTS: &str = "Analysis.addFunctionEntryPoints";
/// Start the analysis. All result events for it are sent before the
/// response to this command.
pub const RUN_ANALYSIS: &str = "Analysis.runAnalysis";

/// Push event: one script discovered.
pub const SCRIPT_PARSED: &str = "Debugger.scriptParsed";
/// Push event: one batch of analysis results.
pub const ANALYSIS_RESULT: &str = "Analysis.analysisResult";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResult {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnalysisResult {
    pub analysis_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetScriptSourceResult {
    pub source: String,
}

/// Payload of [`ANALYSIS_RESULT`]. Entries stay raw `Value`s so a
/// malformed one can be dropped without losing the rest of the batch.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResultEvent {
    pub analysis_id: String,
    #[serde(default)]
    pub results: Vec<Value>,
}

/// Decode a response payload, tagging failures with the command name.
pub fn parse_response<T: DeserializeOwned>(
    command: &'static str,
    response: Value,
) -> Result<T, ProbeError> {
    serde_json::from_value(response)
        .map_err(|source| ProbeError::UnexpectedResponse { command, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_response_decodes_session() {
        let result: CreateSessionResult =
            parse_response(CREATE_SESSION, json!({"sessionId": "s1"})).unwrap();
        assert_eq!(result.session_id, "s1");
    }

    #[test]
    fn test_parse_response_tags_command_on_failure() {
        let outcome: Result<CreateSessionResult, _> =
            parse_response(CREATE_SESSION, json!({"bogus": true}));
        match outcome {
            Err(ProbeError::UnexpectedResponse { command, .. }) => {
                assert_eq!(command, CREATE_SESSION);
            }
            other => panic!("expected unexpected-response error, got {other:?}"),
        }
    }

    #[test]
    fn test_analysis_result_event_defaults_results() {
        let event: AnalysisResultEvent =
            serde_json::from_value(json!({"analysisId": "a1"})).unwrap();
        assert_eq!(event.analysis_id, "a1");
        assert!(event.results.is_empty());
    }
}
