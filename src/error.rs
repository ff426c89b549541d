//! Error taxonomy for the runtime
//!
//! Every public operation returns `anyhow::Result`. The variants below are
//! what ends up inside those errors, so callers can tell a usage mistake
//! from a broken configuration or a dead worker with `downcast_ref`.

use thiserror::Error;

/// Fatal runtime errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VecEnvError {
    /// `step` was called on an instance that was never reset
    #[error("cannot call step() before calling reset()")]
    StepBeforeReset,

    /// `step` was called on an instance whose episode already ended
    #[error("episode has ended; reset() must be called before stepping again")]
    StepAfterEpisodeEnd,

    /// `step_async` was called while a previous batch is still outstanding
    #[error("a step is already in flight; call step_wait() first")]
    StepInFlight,

    /// `step_wait` was called with nothing outstanding
    #[error("no step in flight; call step_async() first")]
    NoStepInFlight,

    /// `reset_all` was called while a batch is outstanding
    #[error("cannot reset while a step is in flight")]
    ResetWhileStepping,

    /// Wrong number of action tuples for the batch
    #[error("expected {expected} action tuples (one per instance), got {actual}")]
    ActionCountMismatch {
        /// Number of instances
        expected: usize,
        /// Number of tuples received
        actual: usize,
    },

    /// A per-agent sequence had the wrong length
    #[error("expected {expected} agents, got {actual} ({what})")]
    AgentCountMismatch {
        /// Fixed agent count
        expected: usize,
        /// Observed length
        actual: usize,
        /// Which sequence was wrong
        what: String,
    },

    /// Observation does not fit its declared space
    #[error("malformed observation: {0}")]
    MalformedObservation(String),

    /// Invalid configuration value or environment setup
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The environment id is not registered
    #[error("unknown environment id '{0}'")]
    UnknownEnv(String),

    /// A worker failed or produced an unusable result
    #[error("worker {worker} failed: {reason}")]
    WorkerFailed {
        /// Instance index of the worker
        worker: usize,
        /// Failure description
        reason: String,
    },

    /// The adapter was poisoned by an earlier fatal error or was closed
    #[error("vectorized environment is no longer usable: {0}")]
    Closed(String),
}
