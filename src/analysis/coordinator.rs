//! Lifecycle of a single remote analysis run.
//!
//! One coordinator drives one analysis: submit the program, register entry
//! points, run, and collect every result event the service pushes for the
//! analysis id. Coordinators for different analyses run independently;
//! each ignores result traffic that is not addressed to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::aggregator::ResultAccumulator;
use crate::channel::Channel;
use crate::error::ProbeError;
use crate::models::{AnalysisId, AnalysisRequest, KeyGroup, SessionId};
use crate::protocol::{self, AnalysisResultEvent, CreateAnalysisResult};

/// Progress of one analysis instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Created,
    EntryPointsRegistered,
    Running,
    Complete,
}

/// Drives one analysis through its lifecycle.
pub struct AnalysisCoordinator {
    channel: Arc<dyn Channel>,
    session_id: SessionId,
    analysis_id: AnalysisId,
    state: AnalysisState,
    results: broadcast::Receiver<Value>,
    accumulator: ResultAccumulator,
}

/// A finished analysis and everything it accumulated.
#[derive(Debug, Clone)]
pub struct CompletedAnalysis {
    analysis_id: AnalysisId,
    accumulator: ResultAccumulator,
}

impl CompletedAnalysis {
    pub fn analysis_id(&self) -> &str {
        &self.analysis_id
    }

    pub fn accumulator(&self) -> &ResultAccumulator {
        &self.accumulator
    }

    /// Per-line grouping of the accumulated results.
    pub fn group_by_line(&self) -> BTreeMap<u32, Vec<KeyGroup>> {
        self.accumulator.group_by_line()
    }
}

impl AnalysisCoordinator {
    /// Submit the analysis program and obtain its id.
    pub async fn create(
        channel: Arc<dyn Channel>,
        session_id: &str,
        request: &AnalysisRequest,
    ) -> Result<Self, ProbeError> {
        // Subscribe before the analysis exists so no result event can be
        // missed, whatever the service's timing.
        let results = channel.subscribe(protocol::ANALYSIS_RESULT);

        let response = channel
            .send(
                protocol::CREATE_ANALYSIS,
                json!({
                    "mapper": request.mapper,
                    "reducer": request.reducer,
                    "effectful": request.effectful,
                }),
                None,
            )
            .await?;
        let CreateAnalysisResult { analysis_id } =
            protocol::parse_response(protocol::CREATE_ANALYSIS, response)?;
        info!("analysis {analysis_id} created");

        Ok(Self {
            channel,
            session_id: session_id.to_string(),
            analysis_id,
            state: AnalysisState::Created,
            results,
            accumulator: ResultAccumulator::new(),
        })
    }

    pub fn analysis_id(&self) -> &str {
        &self.analysis_id
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    /// Register every function entry point of `script_id` for this
    /// analysis. Valid exactly once, directly after creation.
    pub async fn add_entry_points(&mut self, script_id: &str) -> Result<(), ProbeError> {
        self.ensure_state(AnalysisState::Created, "register entry points")?;
        self.channel
            .send(
                protocol::ADD_FUNCTION_ENTRY_POINTS,
                json!({
                    "analysisId": self.analysis_id,
                    "sessionId": self.session_id,
                    "scriptId": script_id,
                }),
                None,
            )
            .await?;
        self.state = AnalysisState::EntryPointsRegistered;
        debug!(
            "analysis {} scoped to entry points of script {script_id}",
            self.analysis_id
        );
        Ok(())
    }

    /// Run the analysis to completion.
    ///
    /// The service sends every result event for an analysis before it
    /// answers `runAnalysis`, but those events can still sit unprocessed
    /// in the subscription buffer when the answer lands. Ingest
    /// concurrently while waiting, then drain whatever remains before
    /// declaring the run complete.
    pub async fn run(mut self) -> Result<CompletedAnalysis, ProbeError> {
        self.ensure_state(AnalysisState::EntryPointsRegistered, "run")?;
        self.state = AnalysisState::Running;

        let channel = Arc::clone(&self.channel);
        let request = channel.send(
            protocol::RUN_ANALYSIS,
            json!({ "analysisId": self.analysis_id }),
            None,
        );
        tokio::pin!(request);

        let mut events_open = true;
        loop {
            tokio::select! {
                response = &mut request => {
                    response?;
                    break;
                }
                event = self.results.recv(), if events_open => match event {
                    Ok(payload) => {
                        absorb_results(&mut self.accumulator, &self.analysis_id, payload);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(
                            "result events lagged for analysis {}, {missed} missed",
                            self.analysis_id
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },
            }
        }

        loop {
            match self.results.try_recv() {
                Ok(payload) => {
                    absorb_results(&mut self.accumulator, &self.analysis_id, payload);
                }
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(
                        "result events lagged for analysis {}, {missed} missed",
                        self.analysis_id
                    );
                }
                Err(_) => break,
            }
        }

        self.state = AnalysisState::Complete;
        info!(
            "analysis {} complete with {} result entries",
            self.analysis_id,
            self.accumulator.len()
        );
        Ok(CompletedAnalysis {
            analysis_id: self.analysis_id,
            accumulator: self.accumulator,
        })
    }

    fn ensure_state(
        &self,
        expected: AnalysisState,
        operation: &'static str,
    ) -> Result<(), ProbeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProbeError::InvalidState {
                analysis_id: self.analysis_id.clone(),
                operation,
                state: format!("{:?}", self.state),
            })
        }
    }
}

/// Fold one result event into the accumulator, if it is addressed to this
/// analysis. Traffic for other analyses (concurrent or discarded) is an
/// expected race and is dropped without comment.
fn absorb_results(accumulator: &mut ResultAccumulator, analysis_id: &str, payload: Value) {
    let event: AnalysisResultEvent = match serde_json::from_value(payload) {
        Ok(event) => event,
        Err(err) => {
            warn!("discarding malformed result event: {err}");
            return;
        }
    };
    if event.analysis_id != analysis_id {
        debug!("ignoring results addressed to analysis {}", event.analysis_id);
        return;
    }
    let accepted = accumulator.ingest_raw(event.results);
    debug!("ingested {accepted} result entries for analysis {analysis_id}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::ScriptedChannel;
    use crate::models::ResultValue;

    fn result_entry(line: u32, index: u32, value: &str) -> Value {
        json!({
            "key": {
                "functionName": "f",
                "location": {"scriptId": "sc1", "line": line, "column": 0},
                "index": index,
                "parameterName": "x"
            },
            "value": value
        })
    }

    fn result_event(analysis_id: &str, entries: Vec<Value>) -> Value {
        json!({ "analysisId": analysis_id, "results": entries })
    }

    async fn created_coordinator(
        channel: &Arc<ScriptedChannel>,
        analysis_id: &str,
    ) -> AnalysisCoordinator {
        channel.respond(
            protocol::CREATE_ANALYSIS,
            json!({"analysisId": analysis_id}),
        );
        AnalysisCoordinator::create(
            Arc::clone(channel) as Arc<dyn crate::channel::Channel>,
            "s1",
            &AnalysisRequest::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_lifecycle_collects_results() {
        let channel = Arc::new(ScriptedChannel::new());
        let mut coordinator = created_coordinator(&channel, "a1").await;
        assert_eq!(coordinator.state(), AnalysisState::Created);

        channel.respond(protocol::ADD_FUNCTION_ENTRY_POINTS, json!({}));
        coordinator.add_entry_points("sc1").await.unwrap();
        assert_eq!(coordinator.state(), AnalysisState::EntryPointsRegistered);

        // Results are pushed before the run response resolves; the drain
        // pass must pick them up.
        channel.push_event(
            protocol::ANALYSIS_RESULT,
            result_event("a1", vec![result_entry(3, 0, "number")]),
        );
        channel.push_event(
            protocol::ANALYSIS_RESULT,
            result_event(
                "a1",
                vec![result_entry(3, 0, "number"), result_entry(3, 0, "string")],
            ),
        );

        channel.respond(protocol::RUN_ANALYSIS, json!({}));
        let completed = coordinator.run().await.unwrap();

        assert_eq!(completed.analysis_id(), "a1");
        assert_eq!(completed.accumulator().len(), 3);

        let grouped = completed.group_by_line();
        let groups = &grouped[&3];
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].values,
            vec![
                ResultValue::Type("number".to_string()),
                ResultValue::Type("string".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_results_for_other_analyses_are_ignored() {
        let channel = Arc::new(ScriptedChannel::new());
        let mut coordinator = created_coordinator(&channel, "a2").await;

        channel.respond(protocol::ADD_FUNCTION_ENTRY_POINTS, json!({}));
        coordinator.add_entry_points("sc1").await.unwrap();

        channel.push_event(
            protocol::ANALYSIS_RESULT,
            result_event("a1", vec![result_entry(5, 0, "object")]),
        );
        channel.push_event(
            protocol::ANALYSIS_RESULT,
            result_event("a2", vec![result_entry(3, 0, "number")]),
        );
        channel.push_event(
            protocol::ANALYSIS_RESULT,
            result_event("never-submitted", vec![result_entry(9, 0, "string")]),
        );

        channel.respond(protocol::RUN_ANALYSIS, json!({}));
        let completed = coordinator.run().await.unwrap();

        assert_eq!(completed.accumulator().len(), 1);
        let grouped = completed.group_by_line();
        assert!(grouped.contains_key(&3));
        assert!(!grouped.contains_key(&5));
        assert!(!grouped.contains_key(&9));
    }

    #[tokio::test]
    async fn test_two_analyses_accumulate_independently() {
        let channel = Arc::new(ScriptedChannel::new());
        let mut first = created_coordinator(&channel, "a1").await;
        let mut second = created_coordinator(&channel, "a2").await;

        channel.respond(protocol::ADD_FUNCTION_ENTRY_POINTS, json!({}));
        channel.respond(protocol::ADD_FUNCTION_ENTRY_POINTS, json!({}));
        first.add_entry_points("sc1").await.unwrap();
        second.add_entry_points("sc2").await.unwrap();

        channel.push_event(
            protocol::ANALYSIS_RESULT,
            result_event("a1", vec![result_entry(1, 0, "number")]),
        );
        channel.push_event(
            protocol::ANALYSIS_RESULT,
            result_event("a2", vec![result_entry(2, 0, "string")]),
        );

        channel.respond(protocol::RUN_ANALYSIS, json!({}));
        channel.respond(protocol::RUN_ANALYSIS, json!({}));
        let first = first.run().await.unwrap();
        let second = second.run().await.unwrap();

        assert!(first.group_by_line().contains_key(&1));
        assert!(!first.group_by_line().contains_key(&2));
        assert!(second.group_by_line().contains_key(&2));
        assert!(!second.group_by_line().contains_key(&1));
    }

    #[tokio::test]
    async fn test_run_requires_registered_entry_points() {
        let channel = Arc::new(ScriptedChannel::new());
        let coordinator = created_coordinator(&channel, "a1").await;

        match coordinator.run().await {
            Err(ProbeError::InvalidState { operation, .. }) => {
                assert_eq!(operation, "run");
            }
            other => panic!("expected invalid-state error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_entry_points_cannot_be_registered_twice() {
        let channel = Arc::new(ScriptedChannel::new());
        let mut coordinator = created_coordinator(&channel, "a1").await;

        channel.respond(protocol::ADD_FUNCTION_ENTRY_POINTS, json!({}));
        coordinator.add_entry_points("sc1").await.unwrap();

        match coordinator.add_entry_points("sc1").await {
            Err(ProbeError::InvalidState { state, .. }) => {
                assert_eq!(state, "EntryPointsRegistered");
            }
            other => panic!("expected invalid-state error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_advance_the_state_machine() {
        let channel = Arc::new(ScriptedChannel::new());
        let mut coordinator = created_coordinator(&channel, "a1").await;

        channel.respond_err(protocol::ADD_FUNCTION_ENTRY_POINTS, "session expired");
        assert!(coordinator.add_entry_points("sc1").await.is_err());
        assert_eq!(coordinator.state(), AnalysisState::Created);
    }

    #[tokio::test]
    async fn test_malformed_result_events_do_not_poison_the_run() {
        let channel = Arc::new(ScriptedChannel::new());
        let mut coordinator = created_coordinator(&channel, "a1").await;

        channel.respond(protocol::ADD_FUNCTION_ENTRY_POINTS, json!({}));
        coordinator.add_entry_points("sc1").await.unwrap();

        channel.push_event(protocol::ANALYSIS_RESULT, json!("not an event"));
        channel.push_event(
            protocol::ANALYSIS_RESULT,
            result_event(
                "a1",
                vec![json!({"bogus": true}), result_entry(3, 0, "number")],
            ),
        );

        channel.respond(protocol::RUN_ANALYSIS, json!({}));
        let completed = coordinator.run().await.unwrap();
        assert_eq!(completed.accumulator().len(), 1);
    }
}
