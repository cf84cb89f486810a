//! Composition root tying the session, analyses, and annotation together.
//!
//! `ProbeClient` owns the session manager, runs one coordinator per
//! analyzed script, and keeps completed analyses around so re-querying a
//! script reuses its accumulator instead of resubmitting the analysis.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info};

use crate::analysis::{AnalysisCoordinator, CompletedAnalysis};
use crate::channel::Channel;
use crate::error::ProbeError;
use crate::models::{AnalysisRequest, AnnotatedLine, Script, ScriptId};
use crate::protocol::{self, GetScriptSourceResult};
use crate::report::annotate;
use crate::session::SessionManager;

/// Client-visible lifecycle phase, for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Analyzing,
    Ready,
}

/// One analyzed script: the completed run plus its fetched source.
#[derive(Debug, Clone)]
pub struct ScriptAnalysis {
    pub script: Script,
    pub source: String,
    pub completed: CompletedAnalysis,
}

impl ScriptAnalysis {
    /// Render the per-line view. Pure; may be called repeatedly.
    pub fn annotated_view(&self) -> Vec<AnnotatedLine> {
        annotate(&self.source, &self.completed.group_by_line())
    }
}

/// Drives a whole probe run against one recording.
pub struct ProbeClient {
    channel: Arc<dyn Channel>,
    session: Mutex<SessionManager>,
    request: AnalysisRequest,
    analyses: Mutex<HashMap<ScriptId, Arc<ScriptAnalysis>>>,
    phase: watch::Sender<Phase>,
}

impl ProbeClient {
    /// Open a session for `recording_id` and prepare for analysis.
    pub async fn connect(
        channel: Arc<dyn Channel>,
        recording_id: Option<&str>,
        request: AnalysisRequest,
    ) -> Result<Self, ProbeError> {
        let (phase, _) = watch::channel(Phase::Initializing);
        let session = SessionManager::create(Arc::clone(&channel), recording_id).await?;
        Ok(Self {
            channel,
            session: Mutex::new(session),
            request,
            analyses: Mutex::new(HashMap::new()),
            phase,
        })
    }

    pub async fn session_id(&self) -> String {
        self.session.lock().await.session_id().to_string()
    }

    /// Lifecycle phase updates, for progress display.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Each discovered script, once, in arrival order.
    pub async fn script_events(&self) -> broadcast::Receiver<Script> {
        self.session.lock().await.script_events()
    }

    /// Discover scripts; resolves once the initial enumeration is
    /// complete. Returns how many scripts the catalog holds.
    pub async fn find_scripts(&self) -> Result<usize, ProbeError> {
        let count = self.session.lock().await.find_scripts().await?;
        self.phase.send_replace(Phase::Ready);
        Ok(count)
    }

    /// Scripts in discovery order, skipping those without a url.
    pub async fn list_scripts(&self) -> Vec<Script> {
        let catalog = self.session.lock().await.catalog();
        let catalog = catalog.read().await;
        catalog.listed()
    }

    /// Look up any script by id, listed or not.
    pub async fn script(&self, script_id: &str) -> Option<Script> {
        let catalog = self.session.lock().await.catalog();
        let catalog = catalog.read().await;
        catalog.get(script_id).cloned()
    }

    /// Run the analysis for one script, or reuse a completed run.
    pub async fn analyze_script(
        &self,
        script_id: &str,
    ) -> Result<Arc<ScriptAnalysis>, ProbeError> {
        if let Some(existing) = self.analyses.lock().await.get(script_id).cloned() {
            debug!(
                "reusing completed analysis {} for script {script_id}",
                existing.completed.analysis_id()
            );
            return Ok(existing);
        }

        let (script, session_id) = {
            let session = self.session.lock().await;
            let catalog = session.catalog();
            let script = catalog
                .read()
                .await
                .get(script_id)
                .cloned()
                .ok_or_else(|| ProbeError::UnknownScript(script_id.to_string()))?;
            (script, session.session_id().to_string())
        };

        self.phase.send_replace(Phase::Analyzing);
        let outcome = self.run_analysis(&session_id, script).await;
        self.phase.send_replace(Phase::Ready);
        outcome
    }

    async fn run_analysis(
        &self,
        session_id: &str,
        script: Script,
    ) -> Result<Arc<ScriptAnalysis>, ProbeError> {
        let mut coordinator =
            AnalysisCoordinator::create(Arc::clone(&self.channel), session_id, &self.request)
                .await?;
        coordinator.add_entry_points(&script.script_id).await?;
        let completed = coordinator.run().await?;
        let source = self.fetch_source(session_id, &script.script_id).await?;

        info!(
            "script {} analyzed: {} result entries",
            script.script_id,
            completed.accumulator().len()
        );
        let analysis = Arc::new(ScriptAnalysis {
            script,
            source,
            completed,
        });
        self.analyses
            .lock()
            .await
            .insert(analysis.script.script_id.clone(), Arc::clone(&analysis));
        Ok(analysis)
    }

    async fn fetch_source(
        &self,
        session_id: &str,
        script_id: &str,
    ) -> Result<String, ProbeError> {
        let response = self
            .channel
            .send(
                protocol::GET_SCRIPT_SOURCE,
                json!({ "scriptId": script_id }),
                Some(session_id),
            )
            .await?;
        let GetScriptSourceResult { source } =
            protocol::parse_response(protocol::GET_SCRIPT_SOURCE, response)?;
        Ok(source)
    }

    /// The annotated per-line view, once the backing analysis is complete.
    pub async fn annotated_view(&self, script_id: &str) -> Option<Vec<AnnotatedLine>> {
        self.analyses
            .lock()
            .await
            .get(script_id)
            .map(|analysis| analysis.annotated_view())
    }
}
