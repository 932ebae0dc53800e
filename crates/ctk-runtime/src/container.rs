//! Container handle: creates new tasks and loads existing ones.

use ctk_common::error::{CtkError, Result};
use ctk_image::oci::Descriptor;

use crate::client::Client;
use crate::io::{Attach, Creator, IoConfig};
use crate::options::{RUNC_OPTIONS_TYPE, RuncOptions, TaskOptions, is_runc_runtime};
use crate::services::{Any, ContainerRecord, CreateTaskRequest, Mount, ProcessRequest};
use crate::task::{Task, close_logged};

/// Caller choices for a new task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTaskOpts {
    /// Root filesystem mounts.
    pub rootfs: Vec<Mount>,
    /// Checkpoint to restore the task from.
    pub checkpoint: Option<Descriptor>,
    /// Runtime options replacing the container's defaults.
    pub options: Option<TaskOptions>,
    /// Override of the shim binary path.
    pub runtime_path: String,
    /// Owner `(uid, gid)` of the io pipes; runc runtimes only.
    pub io_owner: Option<(u32, u32)>,
    /// Skip creating a session keyring; runc runtimes only.
    pub no_new_keyring: bool,
}

/// Resolved description of a task about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Root filesystem mounts.
    pub rootfs: Vec<Mount>,
    /// Checkpoint to restore from.
    pub checkpoint: Option<Descriptor>,
    /// Options forwarded to the runtime.
    pub options: Option<TaskOptions>,
    /// Override of the shim binary path.
    pub runtime_path: String,
    runtime: String,
    runtime_options: Option<Any>,
}

impl TaskInfo {
    fn resolve(record: &ContainerRecord, default_runtime: &str, opts: NewTaskOpts) -> Result<Self> {
        let runtime = if record.runtime.name.is_empty() {
            default_runtime.to_string()
        } else {
            record.runtime.name.clone()
        };
        let mut info = Self {
            rootfs: opts.rootfs,
            checkpoint: opts.checkpoint,
            options: opts.options,
            runtime_path: opts.runtime_path,
            runtime,
            runtime_options: record.runtime.options.clone(),
        };
        if let Some((uid, gid)) = opts.io_owner {
            let runc = info.runc_options()?;
            runc.io_uid = uid;
            runc.io_gid = gid;
        }
        if opts.no_new_keyring {
            info.runc_options()?.no_new_keyring = true;
        }
        if let Some(options) = &info.options {
            options.check_runtime(&info.runtime)?;
        }
        Ok(info)
    }

    /// Runtime the task is created on, inherited from the container.
    #[must_use]
    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    /// Runc options of the task, seeded from the container's runtime
    /// defaults on first access.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::InvalidArgument` if the runtime is not a runc
    /// runtime or the options already hold another variant.
    pub fn runc_options(&mut self) -> Result<&mut RuncOptions> {
        if !is_runc_runtime(&self.runtime) {
            return Err(CtkError::invalid_argument(format!(
                "runc options are not supported by runtime {}",
                self.runtime
            )));
        }
        if self.options.is_none() {
            let defaults = match &self.runtime_options {
                Some(any) if any.type_url == RUNC_OPTIONS_TYPE => any.decode_json()?,
                _ => RuncOptions::default(),
            };
            self.options = Some(TaskOptions::Runc(defaults));
        }
        match &mut self.options {
            Some(TaskOptions::Runc(options)) => Ok(options),
            _ => Err(CtkError::invalid_argument("invalid runtime v2 options format")),
        }
    }
}

/// Handle on a container record.
#[derive(Debug, Clone)]
pub struct Container {
    client: Client,
    id: String,
}

impl Container {
    pub(crate) const fn new(client: Client, id: String) -> Self {
        Self { client, id }
    }

    /// Container id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Container metadata.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if the container does not exist.
    pub async fn info(&self) -> Result<ContainerRecord> {
        self.client.container_store().get(&self.id).await
    }

    /// Creates the container's task with streams made by `creator`.
    ///
    /// Options are validated against the container's runtime before any
    /// streams or remote calls are made. If creation fails, the streams are
    /// cancelled and released.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::InvalidArgument` for options the runtime cannot
    /// accept, or the creator's or remote error.
    #[tracing::instrument(skip_all, fields(container = %self.id))]
    pub async fn new_task(&self, creator: &dyn Creator, opts: NewTaskOpts) -> Result<Task> {
        let record = self.info().await?;
        let info = TaskInfo::resolve(&record, self.client.default_runtime(), opts)?;
        let options = info.options.as_ref().map(TaskOptions::to_any).transpose()?;

        let io = creator.create(&self.id)?;
        let config = io.config();
        let request = CreateTaskRequest {
            container_id: self.id.clone(),
            rootfs: info.rootfs,
            stdin: config.stdin,
            stdout: config.stdout,
            stderr: config.stderr,
            terminal: config.terminal,
            checkpoint: info.checkpoint,
            options,
            runtime_path: info.runtime_path,
        };
        match self.client.task_service().create(request).await {
            Ok(resp) => {
                tracing::info!(pid = resp.pid, runtime = %info.runtime, "task created");
                Ok(Task::new(
                    self.client.clone(),
                    self.id.clone(),
                    resp.pid,
                    Some(io),
                ))
            }
            Err(e) => {
                io.cancel();
                close_logged(io.as_ref());
                Err(e.into_native())
            }
        }
    }

    /// Loads the container's existing task, re-attaching its streams when
    /// `attach` is given.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if the container has no task.
    pub async fn task(&self, attach: Option<&dyn Attach>) -> Result<Task> {
        let request = ProcessRequest {
            container_id: self.id.clone(),
            exec_id: String::new(),
        };
        let resp = self
            .client
            .task_service()
            .get(request)
            .await
            .map_err(|e| {
                let e = e.into_native();
                if e.is_not_found() {
                    e.context("no running task found")
                } else {
                    e
                }
            })?;
        let io = attach
            .map(|attach| attach.attach(&IoConfig::from(&resp.process)))
            .transpose()?;
        Ok(Task::new(
            self.client.clone(),
            self.id.clone(),
            resp.process.pid,
            io,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctk_common::constants::RUNTIME_RUNC_V2;
    use ctk_common::types::ContainerId;

    fn record(runtime: &str, defaults: Option<RuncOptions>) -> ContainerRecord {
        let mut record = ContainerRecord::new(ContainerId::new("c1"), runtime);
        record.runtime.options =
            defaults.map(|o| TaskOptions::Runc(o).to_any().unwrap());
        record
    }

    #[test]
    fn runc_overrides_layer_over_container_defaults() {
        let defaults = RuncOptions {
            binary_name: "crun".into(),
            ..RuncOptions::default()
        };
        let opts = NewTaskOpts {
            io_owner: Some((1000, 1000)),
            no_new_keyring: true,
            ..NewTaskOpts::default()
        };
        let info = TaskInfo::resolve(&record(RUNTIME_RUNC_V2, Some(defaults)), "", opts).unwrap();
        let Some(TaskOptions::Runc(options)) = info.options else {
            panic!("expected runc options");
        };
        assert_eq!(options.binary_name, "crun");
        assert_eq!((options.io_uid, options.io_gid), (1000, 1000));
        assert!(options.no_new_keyring);
    }

    #[test]
    fn empty_runtime_falls_back_to_the_default() {
        let info = TaskInfo::resolve(&record("", None), RUNTIME_RUNC_V2, NewTaskOpts::default())
            .unwrap();
        assert_eq!(info.runtime(), RUNTIME_RUNC_V2);
        assert!(info.options.is_none());
    }

    #[test]
    fn runc_overrides_are_rejected_on_other_runtimes() {
        let opts = NewTaskOpts {
            no_new_keyring: true,
            ..NewTaskOpts::default()
        };
        let err = TaskInfo::resolve(&record("io.containerd.kata.v2", None), "", opts).unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
