//! Abstract message bus between the client and the analysis service.
//!
//! The orchestration pipeline only depends on this contract: a
//! request/response call plus named push-event subscriptions. Production
//! traffic goes through [`SocketChannel`]; tests drive the same components
//! with a scripted in-memory double.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub mod socket;
#[cfg(test)]
pub mod testing;

pub use socket::SocketChannel;

/// Buffer size for per-event broadcast channels. Result batches can burst;
/// a subscriber that falls further behind than this loses events and is
/// told so via `Lagged`.
pub(crate) const EVENT_BUFFER: usize = 256;

/// Failures surfaced by a channel adapter.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("{command} rejected by the service: {message}")]
    Rejected { command: String, message: String },

    #[error("{command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("connection closed before a response to {command} arrived")]
    Closed { command: String },
}

/// Bidirectional message bus to the analysis service.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send a request and await its correlated response. `session_id`
    /// targets commands that are scoped to one session.
    async fn send(
        &self,
        command: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, ChannelError>;

    /// Subscribe to a named push event. Fires zero or more times; only
    /// events arriving after the subscription are delivered.
    fn subscribe(&self, event: &str) -> broadcast::Receiver<Value>;
}
