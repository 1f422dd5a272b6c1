//! Event definitions.
//!
//! `ServiceState` is what supervisors hand to their observers. `Event` drives
//! the console's main loop: observer notifications, finished commits, input
//! lines and shutdown signals all arrive through it.

use serde::Serialize;

use crate::services::ServiceKind;

/// A supervisor state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// A process was spawned and is now tracked.
    Started,
    /// The tracked process exited and is no longer tracked.
    Stopped,
}

/// Signal that asked the launcher to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    SigInt,
    SigTerm,
}

/// Represents an event in the console's main loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A long-running service changed state.
    Service { kind: ServiceKind, state: ServiceState },
    /// The one-shot git sequence finished with an optional exit code.
    CommitFinished { code: Option<i32> },
    /// A line typed by the user.
    Input(String),
    /// Standard input reached end of file.
    InputClosed,
    /// Ctrl-C or SIGTERM.
    Shutdown { signal: ShutdownSignal },
}
