//! Engine error types

use thiserror::Error;

/// Errors surfaced by control-path operations.
///
/// Render-path faults never appear here; they degrade to silence and are
/// reported asynchronously as [`crate::engine::EngineEvent::Diagnostic`].
#[derive(Error, Debug)]
pub enum AudioError {
    /// Unknown sample, voice, or bus
    #[error("not found: {0}")]
    NotFound(String),

    /// A sample with this id is already registered
    #[error("duplicate sample id: {0}")]
    DuplicateId(String),

    /// Malformed argument (vector length, out-of-range index, bad rate)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Routing change would strand a bus or create a cycle
    #[error("invalid routing: {0}")]
    InvalidRouting(String),

    /// A bounded queue rejected data; the newest data was dropped
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Host audio device missing, failed, or closed (fatal to the session)
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Result type for engine operations
pub type AudioResult<T> = Result<T, AudioError>;
