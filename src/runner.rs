//! Service supervision.
//!
//! A `ServiceSupervisor` owns the lifecycle of one external process. It
//! spawns the process described by its `ServiceSpec`, tracks it until it
//! exits, and reports `Started`/`Stopped` transitions to an optional
//! observer. The process handle and the observer share one mutex, so a
//! transition and its notification are never observed torn.
//!
//! The child itself belongs to a waiter task. `stop()` only queues a request
//! for that task, which signals the process tree while the child is still
//! unreaped. A pid or process group is therefore never signalled after it
//! could have been recycled.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

use crate::error::SupervisorError;
use crate::events::ServiceState;
use crate::process::ServiceSpec;
use crate::tree;

/// Callback invoked on every state transition.
///
/// Observers run while the supervisor's lock is held, possibly on a
/// background task. They must not block and must not call back into the
/// supervisor that invoked them.
pub type Observer = Arc<dyn Fn(ServiceState) + Send + Sync>;

/// `None` while the run is live, then `Some(exit_code)`.
type ExitSlot = Option<Option<i32>>;

/// Supervises one external process at a time.
#[derive(Clone)]
pub struct ServiceSupervisor {
    spec: Arc<ServiceSpec>,
    shared: Arc<Mutex<Shared>>,
}

#[derive(Default)]
struct Shared {
    running: Option<RunningProcess>,
    /// Exit slot of the most recent run. Outlives the run itself.
    last_exit: Option<watch::Receiver<ExitSlot>>,
    observer: Option<Observer>,
}

struct RunningProcess {
    pid: Option<u32>,
    stop: mpsc::UnboundedSender<()>,
}

impl ServiceSupervisor {
    pub fn new(spec: ServiceSpec) -> Self {
        Self {
            spec: Arc::new(spec),
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// True while a process is tracked. After `stop()` this stays true until
    /// the exit has actually been observed.
    pub fn is_running(&self) -> bool {
        self.lock().running.is_some()
    }

    /// OS process id of the current run.
    pub fn pid(&self) -> Option<u32> {
        self.lock().running.as_ref().and_then(|run| run.pid)
    }

    /// Replaces the observer. Takes effect for the next transition.
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(ServiceState) + Send + Sync + 'static,
    {
        self.lock().observer = Some(Arc::new(observer));
    }

    pub fn clear_observer(&self) {
        self.lock().observer = None;
    }

    /// Spawns the service and a background waiter for it.
    ///
    /// The observer, if any, receives `Started` before this returns. The
    /// waiter clears the run and emits `Stopped` once the process exits for
    /// any reason.
    pub fn start(&self) -> Result<(), SupervisorError> {
        let mut shared = self.lock();
        if shared.running.is_some() {
            return Err(SupervisorError::AlreadyRunning {
                name: self.name().to_string(),
            });
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SupervisorError::NoRuntime {
                name: self.name().to_string(),
            })?;

        let invocation = self.spec.invocation();
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = self.spec.working_dir() {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command.kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(
                    service = self.name(),
                    program = %invocation.program,
                    error = %source,
                    "failed to spawn service"
                );
                return Err(SupervisorError::Spawn {
                    name: self.name().to_string(),
                    program: invocation.program,
                    source,
                });
            }
        };
        let pid = child.id();
        tracing::info!(service = self.name(), pid = ?pid, "service started");

        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        shared.running = Some(RunningProcess { pid, stop: stop_tx });
        shared.last_exit = Some(exit_rx);

        let waiter_shared = Arc::clone(&self.shared);
        let name = self.name().to_string();
        runtime.spawn(async move {
            let code = match supervise(child, stop_rx, tree::terminate_tree).await {
                Ok(status) => status.code(),
                Err(err) => {
                    tracing::warn!(service = %name, error = %err, "failed to wait for service");
                    None
                }
            };
            {
                let mut shared = lock(&waiter_shared);
                shared.running = None;
                tracing::info!(service = %name, code = ?code, "service stopped");
                if let Some(observer) = shared.observer.as_ref() {
                    observer(ServiceState::Stopped);
                }
            }
            let _ = exit_tx.send(Some(code));
        });

        if let Some(observer) = shared.observer.as_ref() {
            observer(ServiceState::Started);
        }
        Ok(())
    }

    /// Requests termination of the process tree. Returns without waiting;
    /// the run is cleared by the waiter once the exit is observed.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let shared = self.lock();
        let Some(running) = shared.running.as_ref() else {
            return Err(SupervisorError::NotRunning {
                name: self.name().to_string(),
            });
        };
        tracing::info!(service = self.name(), pid = ?running.pid, "stopping service");
        if running.stop.send(()).is_err() {
            tracing::debug!(service = self.name(), "process already reaped");
        }
        Ok(())
    }

    /// Waits until the most recent run has ended and its `Stopped`
    /// transition is complete. Returns the exit code, or `None` when nothing
    /// was ever started or the process was killed by a signal.
    pub async fn wait_stopped(&self) -> Option<i32> {
        let mut exit = self.lock().last_exit.clone()?;
        let code = match exit.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).flatten(),
            Err(_) => None,
        };
        code
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }
}

/// Waits for `child` to exit, serving stop requests until then. `kill` only
/// ever sees the pid of a child that has not been reaped yet.
async fn supervise<K>(
    mut child: Child,
    mut stop_rx: mpsc::UnboundedReceiver<()>,
    kill: K,
) -> std::io::Result<ExitStatus>
where
    K: Fn(u32),
{
    loop {
        tokio::select! {
            biased;
            Some(()) = stop_rx.recv() => {
                if let Some(pid) = child.id() {
                    kill(pid);
                }
            }
            status = child.wait() => return status,
        }
    }
}

// The guarded fields are always written together, so a poisoned lock still
// holds a consistent state.
fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}
