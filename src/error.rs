use thiserror::Error;

/// Engine error taxonomy.
///
/// Per-sample conditions that the pipeline recovers from (rejected fixes,
/// clamped segments, dropped windows) are reported as events, not errors;
/// only structural misuse of the session lifecycle surfaces here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("malformed sample: {0}")]
    MalformedSample(String),

    #[error("session already finalized")]
    SessionFinalized,

    #[error("session already tracking")]
    AlreadyTracking,

    #[error("no active session")]
    NotTracking,

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Inference failures. Never fatal: the engine maps these to an `Unknown`
/// label and keeps the session alive.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
}
