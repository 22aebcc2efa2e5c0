//! Typed error taxonomy for the observation-and-analysis pipeline.
//!
//! Each owning component gets its own small enum (matching the rest of this
//! codebase's preference for focused error types over one monolithic enum).
//! `main` and other orchestration-level glue convert these with `anyhow`'s
//! blanket `From` impl; library code keeps propagating the typed form.

use thiserror::Error;

/// Failures raised by [`crate::pty_host::PtyHost`].
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    OpenFailed(std::io::Error),

    #[error("failed to spawn shell {shell:?}: {source}")]
    SpawnFailed {
        shell: String,
        source: std::io::Error,
    },

    #[error("pty master closed")]
    Closed,

    #[error("pty write failed: {0}")]
    WriteFailed(std::io::Error),

    #[error("pty resize failed: {0}")]
    ResizeFailed(std::io::Error),
}

/// Failures raised by [`crate::sanitizer::Sanitizer`] and
/// [`crate::trigger::TriggerEngine`] when registering a pattern.
#[derive(Debug, Error)]
#[error("invalid pattern {pattern:?}: {source}")]
pub struct BadPatternError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Raised when [`crate::orchestrator::Orchestrator`]'s bounded queue is full.
///
/// Not a hard failure: callers drop the offending request, bump the
/// `queue_full` metric, and move on.
#[derive(Debug, Error)]
#[error("analysis queue is full")]
pub struct QueueFullError;

/// Failures raised by a [`crate::gateway::ModelGateway`] implementation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("model gateway request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("model gateway request failed: {0}")]
    Request(String),

    #[error("model gateway returned an unparsable response: {0}")]
    InvalidResponse(String),
}
