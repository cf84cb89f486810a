//! Error types for the probe client.
//!
//! Transport-level failures are wrapped in [`ChannelError`] by the channel
//! adapter; everything the orchestration pipeline can surface to a caller
//! lives in [`ProbeError`].

use thiserror::Error;

use crate::channel::ChannelError;

/// Failures surfaced by the orchestration pipeline.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// No recording identifier was supplied. Fatal; there is nothing to open.
    #[error("no recording id was provided")]
    MissingRecordingId,

    /// A channel request was rejected, timed out, or lost its connection.
    /// Propagated to whichever operation awaited the request; never retried.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A response arrived but did not match the documented shape for its
    /// command.
    #[error("unexpected {command} response shape: {source}")]
    UnexpectedResponse {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// An analysis lifecycle operation was invoked out of order.
    #[error("analysis {analysis_id} cannot {operation} while {state}")]
    InvalidState {
        analysis_id: String,
        operation: &'static str,
        state: String,
    },

    /// The requested script id is not in the catalog.
    #[error("script {0} is not in the catalog")]
    UnknownScript(String),
}
