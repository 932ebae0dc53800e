//! Task handle: the runtime instance of a container's main process.
//!
//! Handles are cheap to clone; clones share the pid and the local streams.
//! All state lives in the remote task service, so every operation is a
//! remote call whose transport error is normalized before it is returned.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use ctk_common::constants::RUNTIME_WINDOWS;
use ctk_common::error::{CtkError, Result};
use ctk_common::types::ProcessStatus;
use nix::sys::signal::Signal;
use tokio::sync::Mutex;

use crate::client::Client;
use crate::io::{Io, IoConfig};
use crate::process::{
    CloseIoOpts, DeleteOpts, ExitReceiver, ExitStatus, KillOpts, Process, Status, signal_number,
    spawn_wait,
};
use crate::services::{
    CloseIoRequest, KillRequest, ProcessRequest, ResizePtyRequest, RpcError, StartRequest,
    TaskRequest,
};

/// Handle on a task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    client: Client,
    id: String,
    pid: AtomicU32,
    io: Mutex<Option<Box<dyn Io>>>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl Task {
    pub(crate) fn new(client: Client, id: String, pid: u32, io: Option<Box<dyn Io>>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                client,
                id,
                pid: AtomicU32::new(pid),
                io: Mutex::new(io),
            }),
        }
    }

    /// Task id, equal to the owning container's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Host pid of the main process, 0 until started.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.inner.pid.load(Ordering::SeqCst)
    }

    pub(crate) fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Stream endpoints of the main process, if streams are attached.
    pub async fn io_config(&self) -> Option<IoConfig> {
        self.inner.io.lock().await.as_ref().map(|io| io.config())
    }

    fn task_request(&self) -> TaskRequest {
        TaskRequest {
            container_id: self.inner.id.clone(),
        }
    }

    fn process_request(&self) -> ProcessRequest {
        ProcessRequest {
            container_id: self.inner.id.clone(),
            exec_id: String::new(),
        }
    }

    /// Starts the main process and records its pid.
    ///
    /// On failure the local streams are cancelled and released.
    ///
    /// # Errors
    ///
    /// Returns the normalized remote error.
    #[tracing::instrument(skip_all, fields(task = %self.id()))]
    pub async fn start(&self) -> Result<()> {
        let request = StartRequest {
            container_id: self.inner.id.clone(),
            exec_id: String::new(),
        };
        match self.client().task_service().start(request).await {
            Ok(resp) => {
                self.inner.pid.store(resp.pid, Ordering::SeqCst);
                tracing::info!(pid = resp.pid, "task started");
                Ok(())
            }
            Err(e) => {
                if let Some(io) = self.inner.io.lock().await.as_ref() {
                    io.cancel();
                    close_logged(io.as_ref());
                }
                Err(e.into_native())
            }
        }
    }

    /// Delivers `signal` to the main process, an exec'd process or every
    /// process of the task.
    ///
    /// # Errors
    ///
    /// Returns the normalized remote error.
    #[tracing::instrument(skip_all, fields(task = %self.id(), signal = %signal))]
    pub async fn kill(&self, signal: Signal, opts: KillOpts) -> Result<()> {
        let request = KillRequest {
            container_id: self.inner.id.clone(),
            exec_id: opts.exec_id.unwrap_or_default(),
            signal: signal_number(signal),
            all: opts.all,
        };
        self.client()
            .task_service()
            .kill(request)
            .await
            .map_err(RpcError::into_native)
    }

    /// Suspends every process of the task.
    ///
    /// # Errors
    ///
    /// Returns the normalized remote error.
    #[tracing::instrument(skip_all, fields(task = %self.id()))]
    pub async fn pause(&self) -> Result<()> {
        self.client()
            .task_service()
            .pause(self.task_request())
            .await
            .map_err(RpcError::into_native)?;
        tracing::debug!("task paused");
        Ok(())
    }

    /// Resumes a paused task.
    ///
    /// # Errors
    ///
    /// Returns the normalized remote error.
    #[tracing::instrument(skip_all, fields(task = %self.id()))]
    pub async fn resume(&self) -> Result<()> {
        self.client()
            .task_service()
            .resume(self.task_request())
            .await
            .map_err(RpcError::into_native)?;
        tracing::debug!("task resumed");
        Ok(())
    }

    /// Queries the status of the main process.
    ///
    /// # Errors
    ///
    /// Returns the normalized remote error.
    pub async fn status(&self) -> Result<Status> {
        let resp = self
            .client()
            .task_service()
            .get(self.process_request())
            .await
            .map_err(RpcError::into_native)?;
        Ok(Status::from_state(&resp.process))
    }

    /// Registers for the exit of the main process.
    ///
    /// Returns at once; the receiver resolves when the process exits. A
    /// failed remote wait resolves with the unknown exit code and the error.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible to match [`Process::wait`].
    pub async fn wait(&self) -> Result<ExitReceiver> {
        Ok(spawn_wait(self.client(), self.inner.id.clone(), String::new()))
    }

    /// Deletes the task from the runtime.
    ///
    /// Hooks run first. The task must be stopped (or of unknown status);
    /// a created task is also accepted when its runtime is the Windows
    /// runtime or it never got a pid. Local streams are drained before the
    /// remote delete and closed once it succeeded.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::FailedPrecondition` if the task is still live,
    /// `CtkError::NotFound` if the runtime no longer knows it, or any
    /// hook or remote error.
    #[tracing::instrument(skip_all, fields(task = %self.id()))]
    pub async fn delete(&self, opts: DeleteOpts) -> Result<ExitStatus> {
        opts.run_hooks(self).await?;

        let status = match self.status().await {
            Ok(status) => Some(status.status),
            Err(e) if e.is_not_found() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "status lookup failed, deleting anyway");
                None
            }
        };
        let runtime = self.runtime().await?;

        match status {
            None | Some(ProcessStatus::Stopped | ProcessStatus::Unknown) => {}
            Some(ProcessStatus::Created) if runtime == RUNTIME_WINDOWS || self.pid() == 0 => {}
            Some(other) => {
                return Err(CtkError::failed_precondition(format!(
                    "task must be stopped before deletion: {other}"
                )));
            }
        }

        let mut io = self.inner.io.lock().await;
        if let Some(io) = io.as_ref() {
            if runtime == RUNTIME_WINDOWS {
                close_logged(io.as_ref());
            }
            io.cancel();
            io.wait().await;
        }

        let resp = self
            .client()
            .task_service()
            .delete(self.task_request())
            .await
            .map_err(RpcError::into_native)?;

        if let Some(io) = io.take() {
            close_logged(io.as_ref());
        }
        tracing::info!(exit_status = resp.exit_status, "task deleted");
        Ok(ExitStatus::new(resp.exit_status, resp.exited_at))
    }

    /// Closes the streams of the main process on the runtime side.
    ///
    /// # Errors
    ///
    /// Returns the normalized remote error.
    pub async fn close_io(&self, opts: CloseIoOpts) -> Result<()> {
        let request = CloseIoRequest {
            container_id: self.inner.id.clone(),
            exec_id: String::new(),
            stdin: opts.stdin,
        };
        self.client()
            .task_service()
            .close_io(request)
            .await
            .map_err(RpcError::into_native)
    }

    /// Resizes the terminal of the main process.
    ///
    /// # Errors
    ///
    /// Returns the normalized remote error.
    pub async fn resize(&self, width: u32, height: u32) -> Result<()> {
        let request = ResizePtyRequest {
            container_id: self.inner.id.clone(),
            exec_id: String::new(),
            width,
            height,
        };
        self.client()
            .task_service()
            .resize_pty(request)
            .await
            .map_err(RpcError::into_native)
    }

    /// OCI runtime spec of the owning container.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if the container or its spec is missing.
    pub async fn spec(&self) -> Result<serde_json::Value> {
        let record = self.client().container_store().get(self.id()).await?;
        record
            .spec
            .ok_or_else(|| CtkError::not_found(format!("spec of container {}", self.id())))
    }

    /// Runtime of the owning container, or the session default when the
    /// container does not name one.
    pub(crate) async fn runtime(&self) -> Result<String> {
        let record = self
            .client()
            .container_store()
            .get(self.id())
            .await
            .map_err(|e| e.context("failed to resolve runtime"))?;
        if record.runtime.name.is_empty() {
            return Ok(self.client().default_runtime().to_string());
        }
        Ok(record.runtime.name)
    }
}

#[async_trait]
impl Process for Task {
    fn id(&self) -> &str {
        Self::id(self)
    }

    fn pid(&self) -> u32 {
        Self::pid(self)
    }

    async fn start(&self) -> Result<()> {
        Self::start(self).await
    }

    async fn delete(&self, opts: DeleteOpts) -> Result<ExitStatus> {
        Self::delete(self, opts).await
    }

    async fn kill(&self, signal: Signal, opts: KillOpts) -> Result<()> {
        Self::kill(self, signal, opts).await
    }

    async fn wait(&self) -> Result<ExitReceiver> {
        Self::wait(self).await
    }

    async fn close_io(&self, opts: CloseIoOpts) -> Result<()> {
        Self::close_io(self, opts).await
    }

    async fn resize(&self, width: u32, height: u32) -> Result<()> {
        Self::resize(self, width, height).await
    }

    async fn status(&self) -> Result<Status> {
        Self::status(self).await
    }
}

/// Closes local streams, logging a failure instead of returning it.
pub(crate) fn close_logged(io: &dyn Io) {
    if let Err(e) = io.close() {
        tracing::warn!(error = %e, "failed to close streams");
    }
}
