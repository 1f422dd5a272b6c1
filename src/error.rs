//! Error types for service supervision.

use thiserror::Error;

/// Errors returned by [`crate::process::ServiceSpec`] and
/// [`crate::runner::ServiceSupervisor`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The command sequence was empty.
    #[error("service '{name}' has no command")]
    InvalidSpec { name: String },
    /// `start()` was called while a process is tracked.
    #[error("service '{name}' is already running")]
    AlreadyRunning { name: String },
    /// `stop()` was called while nothing is tracked.
    #[error("service '{name}' is not running")]
    NotRunning { name: String },
    /// `start()` was called outside a Tokio runtime, so no waiter can run.
    #[error("service '{name}' must be started from within a Tokio runtime")]
    NoRuntime { name: String },
    /// The OS refused to spawn the process.
    #[error("failed to spawn {program} for service '{name}': {source}")]
    Spawn {
        name: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    /// True for misuse of the start/stop preconditions.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. } | Self::NotRunning { .. })
    }
}
