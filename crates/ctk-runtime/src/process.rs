//! Process abstraction shared by tasks and exec'd processes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctk_common::constants::UNKNOWN_EXIT_STATUS;
use ctk_common::error::{CtkError, Result};
use ctk_common::types::ProcessStatus;
use nix::sys::signal::Signal;
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::client::Client;
use crate::services::{ProcessRequest, ProcessState};

/// Observed status of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Lifecycle status.
    pub status: ProcessStatus,
    /// Exit status, meaningful once stopped.
    pub exit_status: u32,
    /// Exit time, absent until exited.
    pub exited_at: Option<DateTime<Utc>>,
}

impl Status {
    /// Maps the remote view of a process onto a status.
    ///
    /// Status names are matched case-insensitively. An empty name is read
    /// as `Stopped`; names this client does not know become `Unknown`.
    #[must_use]
    pub fn from_state(state: &ProcessState) -> Self {
        let status = if state.status.is_empty() {
            ProcessStatus::Stopped
        } else {
            state.status.parse().unwrap_or_else(|_| {
                tracing::warn!(status = %state.status, id = %state.id, "unrecognized process status");
                ProcessStatus::Unknown
            })
        };
        Self {
            status,
            exit_status: state.exit_status,
            exited_at: state.exited_at,
        }
    }
}

/// Outcome of waiting on a process.
///
/// When the wait itself failed, the code is [`UNKNOWN_EXIT_STATUS`] and
/// the error is set.
#[derive(Debug)]
pub struct ExitStatus {
    code: u32,
    exited_at: Option<DateTime<Utc>>,
    error: Option<CtkError>,
}

impl ExitStatus {
    /// A process exit.
    #[must_use]
    pub const fn new(code: u32, exited_at: Option<DateTime<Utc>>) -> Self {
        Self {
            code,
            exited_at,
            error: None,
        }
    }

    /// A wait that failed with `error`.
    #[must_use]
    pub const fn failed(error: CtkError) -> Self {
        Self {
            code: UNKNOWN_EXIT_STATUS,
            exited_at: None,
            error: Some(error),
        }
    }

    /// Exit code.
    #[must_use]
    pub const fn code(&self) -> u32 {
        self.code
    }

    /// Exit time.
    #[must_use]
    pub const fn exited_at(&self) -> Option<DateTime<Utc>> {
        self.exited_at
    }

    /// Error of a failed wait.
    #[must_use]
    pub const fn error(&self) -> Option<&CtkError> {
        self.error.as_ref()
    }

    /// Splits the status into its exit code and time, or the wait error.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed wait.
    pub fn into_result(self) -> Result<(u32, Option<DateTime<Utc>>)> {
        match self.error {
            Some(e) => Err(e),
            None => Ok((self.code, self.exited_at)),
        }
    }
}

/// Receives the exit status of a process exactly once.
pub type ExitReceiver = oneshot::Receiver<ExitStatus>;

/// Signal delivery options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillOpts {
    /// Signal an exec'd process of the task instead of its main process.
    pub exec_id: Option<String>,
    /// Signal every process of the task.
    pub all: bool,
}

impl KillOpts {
    /// Signals every process.
    #[must_use]
    pub fn all() -> Self {
        Self {
            exec_id: None,
            all: true,
        }
    }

    /// Targets the exec'd process `exec_id`.
    #[must_use]
    pub fn exec(exec_id: impl Into<String>) -> Self {
        Self {
            exec_id: Some(exec_id.into()),
            all: false,
        }
    }
}

/// Stream close options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseIoOpts {
    /// Close stdin.
    pub stdin: bool,
}

/// Hook run before a process is deleted.
#[async_trait]
pub trait DeleteHook: Send + Sync {
    /// Runs against the process about to be deleted.
    ///
    /// # Errors
    ///
    /// Any error aborts the deletion.
    async fn before_delete(&self, process: &dyn Process) -> Result<()>;
}

/// Deletion options.
#[derive(Clone, Default)]
pub struct DeleteOpts {
    hooks: Vec<Arc<dyn DeleteHook>>,
}

impl DeleteOpts {
    /// Adds a hook run before deletion, in insertion order.
    #[must_use]
    pub fn hook(mut self, hook: impl DeleteHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Kills the process with `SIGKILL` and waits for it before deletion.
    #[must_use]
    pub fn kill_first(self) -> Self {
        self.hook(KillBeforeDelete)
    }

    pub(crate) async fn run_hooks(&self, process: &dyn Process) -> Result<()> {
        for hook in &self.hooks {
            hook.before_delete(process).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeleteOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteOpts")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Sends `SIGKILL` to every process and waits for the exit.
///
/// Processes that never started are skipped. When the kill reports the
/// process as gone or refuses it in its current state, the hook returns
/// without waiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct KillBeforeDelete;

#[async_trait]
impl DeleteHook for KillBeforeDelete {
    async fn before_delete(&self, process: &dyn Process) -> Result<()> {
        if process.pid() == 0 {
            return Ok(());
        }
        let exited = process.wait().await?;
        match process.kill(Signal::SIGKILL, KillOpts::all()).await {
            Ok(()) => {}
            Err(e) if e.is_failed_precondition() || e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }
        let _ = exited.await;
        Ok(())
    }
}

/// A process known to the runtime: a task's main process or an exec'd one.
#[async_trait]
pub trait Process: Send + Sync {
    /// Process id: the task id or the exec id.
    fn id(&self) -> &str;

    /// Host pid, 0 until started.
    fn pid(&self) -> u32;

    /// Starts the process.
    async fn start(&self) -> Result<()>;

    /// Deletes the process and returns its exit status.
    async fn delete(&self, opts: DeleteOpts) -> Result<ExitStatus>;

    /// Delivers a signal.
    async fn kill(&self, signal: Signal, opts: KillOpts) -> Result<()>;

    /// Registers for the exit status; the returned receiver resolves once.
    async fn wait(&self) -> Result<ExitReceiver>;

    /// Closes the process's streams on the runtime side.
    async fn close_io(&self, opts: CloseIoOpts) -> Result<()>;

    /// Resizes the process's terminal.
    async fn resize(&self, width: u32, height: u32) -> Result<()>;

    /// Queries the status.
    async fn status(&self) -> Result<Status>;
}

/// Signal number on the wire.
pub(crate) const fn signal_number(signal: Signal) -> u32 {
    (signal as i32).unsigned_abs()
}

/// Starts a background wait on the remote process and returns its receiver
/// immediately.
pub(crate) fn spawn_wait(client: &Client, container_id: String, exec_id: String) -> ExitReceiver {
    let (tx, rx) = oneshot::channel();
    let tasks = client.task_service().clone();
    let span = tracing::debug_span!("wait", container = %container_id, exec = %exec_id);
    let _ = tokio::spawn(
        async move {
            let request = ProcessRequest {
                container_id,
                exec_id,
            };
            let exit = match tasks.wait(request).await {
                Ok(resp) => ExitStatus::new(resp.exit_status, resp.exited_at),
                Err(e) => {
                    let e = e.into_native();
                    tracing::warn!(error = %e, "wait failed");
                    ExitStatus::failed(e)
                }
            };
            if tx.send(exit).is_err() {
                tracing::debug!("exit status dropped, receiver gone");
            }
        }
        .instrument(span),
    );
    rx
}
