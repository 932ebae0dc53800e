//! Additional processes executed inside a running task.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use ctk_common::error::{CtkError, Result};
use ctk_common::types::ProcessStatus;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::io::{Attach, Creator, Io, IoConfig};
use crate::process::{
    CloseIoOpts, DeleteOpts, ExitReceiver, ExitStatus, KillOpts, Process, Status, signal_number,
    spawn_wait,
};
use crate::services::{
    Any, CloseIoRequest, ExecProcessRequest, KillRequest, ProcessRequest, ResizePtyRequest,
    RpcError, StartRequest,
};
use crate::task::{Task, close_logged};

/// Type identifier of serialized [`ProcessSpec`] payloads.
pub const PROCESS_SPEC_TYPE: &str = "types.containerd.io/opencontainers/runtime-spec/1/Process";

/// User a process runs as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
    /// Supplementary group ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

/// OCI process description of an exec'd process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Allocate a terminal.
    #[serde(default)]
    pub terminal: bool,
    /// User to run as.
    pub user: User,
    /// Command line.
    pub args: Vec<String>,
    /// Environment in `KEY=value` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Working directory.
    pub cwd: String,
    /// Prevent privilege escalation.
    #[serde(default)]
    pub no_new_privileges: bool,
}

impl ProcessSpec {
    /// Runs `args` as root in `/`.
    #[must_use]
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            cwd: "/".into(),
            ..Self::default()
        }
    }
}

/// Handle on an exec'd process of a task.
pub struct ExecProcess {
    id: String,
    task: Task,
    pid: AtomicU32,
    io: Mutex<Option<Box<dyn Io>>>,
}

impl std::fmt::Debug for ExecProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecProcess")
            .field("id", &self.id)
            .field("task", &self.task.id())
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl ExecProcess {
    fn new(id: String, task: Task, pid: u32, io: Option<Box<dyn Io>>) -> Self {
        Self {
            id,
            task,
            pid: AtomicU32::new(pid),
            io: Mutex::new(io),
        }
    }

    /// Task the process runs in.
    #[must_use]
    pub const fn task(&self) -> &Task {
        &self.task
    }

    fn request(&self) -> ProcessRequest {
        ProcessRequest {
            container_id: self.task.id().to_string(),
            exec_id: self.id.clone(),
        }
    }

    async fn release_io(&self) {
        if let Some(io) = self.io.lock().await.as_ref() {
            io.cancel();
            io.wait().await;
            close_logged(io.as_ref());
        }
    }
}

#[async_trait]
impl Process for ExecProcess {
    fn id(&self) -> &str {
        &self.id
    }

    fn pid(&self) -> u32 {
        self.pid.load(Ordering::SeqCst)
    }

    #[tracing::instrument(skip_all, fields(task = %self.task.id(), exec = %self.id))]
    async fn start(&self) -> Result<()> {
        let request = StartRequest {
            container_id: self.task.id().to_string(),
            exec_id: self.id.clone(),
        };
        match self.task.client().task_service().start(request).await {
            Ok(resp) => {
                self.pid.store(resp.pid, Ordering::SeqCst);
                tracing::info!(pid = resp.pid, "exec process started");
                Ok(())
            }
            Err(e) => {
                self.release_io().await;
                Err(e.into_native())
            }
        }
    }

    #[tracing::instrument(skip_all, fields(task = %self.task.id(), exec = %self.id))]
    async fn delete(&self, opts: DeleteOpts) -> Result<ExitStatus> {
        opts.run_hooks(self).await?;
        let status = self.status().await?;
        if matches!(
            status.status,
            ProcessStatus::Running | ProcessStatus::Paused | ProcessStatus::Pausing
        ) {
            return Err(CtkError::failed_precondition(format!(
                "current process state: {}, process must be stopped before deletion",
                status.status
            )));
        }

        let mut io = self.io.lock().await;
        if let Some(io) = io.as_ref() {
            io.cancel();
            io.wait().await;
        }
        let resp = self
            .task
            .client()
            .task_service()
            .delete_process(self.request())
            .await
            .map_err(RpcError::into_native)?;
        if let Some(io) = io.take() {
            close_logged(io.as_ref());
        }
        tracing::info!(exit_status = resp.exit_status, "exec process deleted");
        Ok(ExitStatus::new(resp.exit_status, resp.exited_at))
    }

    async fn kill(&self, signal: Signal, opts: KillOpts) -> Result<()> {
        let request = KillRequest {
            container_id: self.task.id().to_string(),
            exec_id: self.id.clone(),
            signal: signal_number(signal),
            all: opts.all,
        };
        self.task
            .client()
            .task_service()
            .kill(request)
            .await
            .map_err(RpcError::into_native)
    }

    async fn wait(&self) -> Result<ExitReceiver> {
        Ok(spawn_wait(
            self.task.client(),
            self.task.id().to_string(),
            self.id.clone(),
        ))
    }

    async fn close_io(&self, opts: CloseIoOpts) -> Result<()> {
        let request = CloseIoRequest {
            container_id: self.task.id().to_string(),
            exec_id: self.id.clone(),
            stdin: opts.stdin,
        };
        self.task
            .client()
            .task_service()
            .close_io(request)
            .await
            .map_err(RpcError::into_native)
    }

    async fn resize(&self, width: u32, height: u32) -> Result<()> {
        let request = ResizePtyRequest {
            container_id: self.task.id().to_string(),
            exec_id: self.id.clone(),
            width,
            height,
        };
        self.task
            .client()
            .task_service()
            .resize_pty(request)
            .await
            .map_err(RpcError::into_native)
    }

    async fn status(&self) -> Result<Status> {
        let resp = self
            .task
            .client()
            .task_service()
            .get(self.request())
            .await
            .map_err(RpcError::into_native)?;
        Ok(Status::from_state(&resp.process))
    }
}

impl Task {
    /// Adds the process `id` described by `spec` to the running task.
    ///
    /// The process is created but not started. On any failure after
    /// `creator` ran, its streams are cancelled, drained and released.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::InvalidArgument` for an empty id, before any
    /// streams are created, or the creator's or remote error.
    #[tracing::instrument(skip_all, fields(task = %self.id(), exec = %id))]
    pub async fn exec(
        &self,
        id: &str,
        spec: &ProcessSpec,
        creator: &dyn Creator,
    ) -> Result<ExecProcess> {
        if id.is_empty() {
            return Err(CtkError::invalid_argument("exec id must not be empty"));
        }
        let io = creator.create(id)?;
        if let Err(e) = self.send_exec(id, spec, io.config()).await {
            io.cancel();
            io.wait().await;
            close_logged(io.as_ref());
            return Err(e);
        }
        tracing::info!("exec process created");
        Ok(ExecProcess::new(id.to_string(), self.clone(), 0, Some(io)))
    }

    async fn send_exec(&self, id: &str, spec: &ProcessSpec, config: IoConfig) -> Result<()> {
        let request = ExecProcessRequest {
            container_id: self.id().to_string(),
            exec_id: id.to_string(),
            terminal: config.terminal,
            stdin: config.stdin,
            stdout: config.stdout,
            stderr: config.stderr,
            spec: Any::from_json(PROCESS_SPEC_TYPE, spec)?,
        };
        self.client()
            .task_service()
            .exec(request)
            .await
            .map_err(RpcError::into_native)
    }

    /// Returns a handle on an existing process of the task.
    ///
    /// Asking for the task's own id without re-attaching streams yields the
    /// task itself. Otherwise the process is looked up remotely and, when
    /// `attach` is given, its streams are re-attached.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if the runtime does not know the
    /// process, or the attach error.
    pub async fn load_process(
        &self,
        id: &str,
        attach: Option<&dyn Attach>,
    ) -> Result<Box<dyn Process>> {
        if id == self.id() && attach.is_none() {
            return Ok(Box::new(self.clone()));
        }
        let request = ProcessRequest {
            container_id: self.id().to_string(),
            exec_id: id.to_string(),
        };
        let resp = self
            .client()
            .task_service()
            .get(request)
            .await
            .map_err(|e| {
                let e = e.into_native();
                if e.is_not_found() {
                    e.context("no running process found")
                } else {
                    e
                }
            })?;
        let io = attach
            .map(|attach| attach.attach(&IoConfig::from(&resp.process)))
            .transpose()?;
        Ok(Box::new(ExecProcess::new(
            id.to_string(),
            self.clone(),
            resp.process.pid,
            io,
        )))
    }
}
