//! Session lifecycle and the catalog of discovered scripts.
//!
//! One session is created per client run and bound to a single recording.
//! Scripts arrive as push events in arbitrary order, both during the
//! initial enumeration and afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::channel::{Channel, EVENT_BUFFER};
use crate::error::ProbeError;
use crate::models::{Script, ScriptId, SessionId};
use crate::protocol::{self, CreateSessionResult};

/// Insertion-ordered catalog of the scripts discovered in a recording.
#[derive(Debug, Default)]
pub struct ScriptCatalog {
    scripts: HashMap<ScriptId, Script>,
    order: Vec<ScriptId>,
}

impl ScriptCatalog {
    /// Insert a discovered script. A duplicate id keeps the first entry.
    /// Returns whether the script was new.
    pub fn insert(&mut self, script: Script) -> bool {
        if self.scripts.contains_key(&script.script_id) {
            return false;
        }
        self.order.push(script.script_id.clone());
        self.scripts.insert(script.script_id.clone(), script);
        true
    }

    /// Look up any script by id, listed or not.
    pub fn get(&self, script_id: &str) -> Option<&Script> {
        self.scripts.get(script_id)
    }

    /// Scripts in discovery order, skipping those without a url.
    pub fn listed(&self) -> Vec<Script> {
        self.order
            .iter()
            .filter_map(|id| self.scripts.get(id))
            .filter(|script| script.has_url())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Owns the active session and the script catalog.
pub struct SessionManager {
    channel: Arc<dyn Channel>,
    session_id: SessionId,
    catalog: Arc<RwLock<ScriptCatalog>>,
    discovered: broadcast::Sender<Script>,
    /// Discovery subscription captured before the session exists so no
    /// event can slip past; handed to the long-lived listener once the
    /// initial enumeration has been drained.
    discovery: Option<broadcast::Receiver<Value>>,
}

impl SessionManager {
    /// Create the session for `recording_id`. Fails with
    /// [`ProbeError::MissingRecordingId`] when the caller had none to give.
    pub async fn create(
        channel: Arc<dyn Channel>,
        recording_id: Option<&str>,
    ) -> Result<Self, ProbeError> {
        let recording_id = match recording_id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(ProbeError::MissingRecordingId),
        };

        let discovery = channel.subscribe(protocol::SCRIPT_PARSED);
        let response = channel
            .send(
                protocol::CREATE_SESSION,
                json!({ "recordingId": recording_id }),
                None,
            )
            .await?;
        let CreateSessionResult { session_id } =
            protocol::parse_response(protocol::CREATE_SESSION, response)?;
        info!("session {session_id} created for recording {recording_id}");

        let (discovered, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            channel,
            session_id,
            catalog: Arc::new(RwLock::new(ScriptCatalog::default())),
            discovered,
            discovery: Some(discovery),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Shared handle to the catalog. Read-only for everyone but the
    /// discovery path.
    pub fn catalog(&self) -> Arc<RwLock<ScriptCatalog>> {
        Arc::clone(&self.catalog)
    }

    /// Each discovered script, once, in arrival order.
    pub fn script_events(&self) -> broadcast::Receiver<Script> {
        self.discovered.subscribe()
    }

    /// Trigger discovery and wait for the initial enumeration to finish.
    ///
    /// Resolves once the service has answered `findScripts` and every
    /// script event delivered before that answer is in the catalog. Late
    /// arrivals keep flowing into the catalog afterwards. Returns the
    /// catalog size at resolution time.
    pub async fn find_scripts(&mut self) -> Result<usize, ProbeError> {
        let mut discovery = match self.discovery.take() {
            Some(discovery) => discovery,
            None => {
                // Enumeration already ran; re-issue the request only.
                self.channel
                    .send(protocol::FIND_SCRIPTS, json!({}), Some(&self.session_id))
                    .await?;
                return Ok(self.catalog.read().await.len());
            }
        };

        let channel = Arc::clone(&self.channel);
        let request = channel.send(protocol::FIND_SCRIPTS, json!({}), Some(&self.session_id));
        tokio::pin!(request);

        let mut events_open = true;
        loop {
            tokio::select! {
                response = &mut request => {
                    response?;
                    break;
                }
                event = discovery.recv(), if events_open => match event {
                    Ok(payload) => absorb_script(&self.catalog, &self.discovered, payload).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("script discovery lagged, {missed} events missed");
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },
            }
        }

        // Scripts announced before the response may still sit in the buffer.
        loop {
            match discovery.try_recv() {
                Ok(payload) => absorb_script(&self.catalog, &self.discovered, payload).await,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!("script discovery lagged, {missed} events missed");
                }
                Err(_) => break,
            }
        }

        // Keep accepting out-of-band late arrivals.
        let catalog = Arc::clone(&self.catalog);
        let discovered = self.discovered.clone();
        tokio::spawn(async move {
            loop {
                match discovery.recv().await {
                    Ok(payload) => absorb_script(&catalog, &discovered, payload).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("script discovery lagged, {missed} events missed");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(self.catalog.read().await.len())
    }
}

/// Fold one discovery event into the catalog and notify subscribers.
async fn absorb_script(
    catalog: &RwLock<ScriptCatalog>,
    discovered: &broadcast::Sender<Script>,
    payload: Value,
) {
    let script: Script = match serde_json::from_value(payload) {
        Ok(script) => script,
        Err(err) => {
            warn!("discarding malformed script event: {err}");
            return;
        }
    };
    debug!(
        "script {} ({})",
        script.script_id,
        if script.has_url() { script.url.as_str() } else { "<no url>" }
    );
    let fresh = catalog.write().await.insert(script.clone());
    if fresh {
        let _ = discovered.send(script);
    }
}
