//! Contracts of the remote collaborators driven by the task controller.
//!
//! The task service is the runtime's request/response surface. Its methods
//! return [`RpcError`], the transport-native error, which must go through
//! [`RpcError::into_native`] before reaching a caller.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctk_common::error::{CtkError, Result};
use ctk_common::types::{ContainerId, Digest};
use ctk_image::oci::Descriptor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status code of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// The entity does not exist.
    NotFound,
    /// The entity already exists.
    AlreadyExists,
    /// The request was malformed.
    InvalidArgument,
    /// The entity is not in a state that allows the operation.
    FailedPrecondition,
    /// The remote side cannot be reached.
    Unavailable,
    /// The call was cancelled.
    Canceled,
    /// The call ran out of time.
    DeadlineExceeded,
    /// The remote side does not implement the call.
    Unimplemented,
    /// The remote side failed.
    Internal,
    /// Unclassified failure.
    Unknown,
}

/// Transport-native error returned by [`TaskService`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rpc error: code = {code:?} desc = {message}")]
pub struct RpcError {
    /// Status code.
    pub code: Code,
    /// Human-readable description.
    pub message: String,
}

impl RpcError {
    /// Creates a transport error.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Translates the transport error into its domain kind.
    #[must_use]
    pub fn into_native(self) -> CtkError {
        let message = self.message;
        match self.code {
            Code::NotFound => CtkError::NotFound { message },
            Code::AlreadyExists => CtkError::AlreadyExists { message },
            Code::InvalidArgument => CtkError::InvalidArgument { message },
            Code::FailedPrecondition => CtkError::FailedPrecondition { message },
            Code::Unavailable | Code::Canceled | Code::DeadlineExceeded => {
                CtkError::Unavailable { message }
            }
            Code::Unimplemented | Code::Internal | Code::Unknown => CtkError::Internal { message },
        }
    }
}

/// Result of a remote call.
pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Opaque typed payload forwarded verbatim to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Any {
    /// Identifies the schema of `value`.
    pub type_url: String,
    /// Encoded payload.
    pub value: Vec<u8>,
}

impl Any {
    /// Encodes `value` as JSON under `type_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn from_json<T: Serialize>(type_url: &str, value: &T) -> Result<Self> {
        Ok(Self {
            type_url: type_url.to_string(),
            value: serde_json::to_vec(value)?,
        })
    }

    /// Decodes a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not decode into `T`.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.value)?)
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// A filesystem mount of a task's root filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Filesystem type, e.g. `overlay`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Mount source.
    pub source: String,
    /// Mount target, relative to the rootfs.
    #[serde(default)]
    pub target: String,
    /// Mount options.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Remote view of a task or exec'd process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessState {
    /// Task or exec id.
    pub id: String,
    /// Host pid, 0 until started.
    pub pid: u32,
    /// Runtime status name as sent by the remote side, e.g. `RUNNING`.
    pub status: String,
    /// Exit status, meaningful once stopped.
    pub exit_status: u32,
    /// Exit time, absent until exited.
    pub exited_at: Option<DateTime<Utc>>,
    /// Stdin stream path.
    pub stdin: String,
    /// Stdout stream path.
    pub stdout: String,
    /// Stderr stream path.
    pub stderr: String,
    /// Whether the process has a terminal.
    pub terminal: bool,
}

/// Platform specific information about one process of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Host pid.
    pub pid: u32,
    /// Runtime specific details.
    pub info: Option<Any>,
}

/// Runtime specific metrics of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    /// Collection time.
    pub timestamp: DateTime<Utc>,
    /// Task the metrics belong to.
    pub id: String,
    /// Encoded metrics payload.
    pub data: Option<Any>,
}

/// Task creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateTaskRequest {
    /// Owning container.
    pub container_id: String,
    /// Root filesystem mounts.
    pub rootfs: Vec<Mount>,
    /// Stdin stream path.
    pub stdin: String,
    /// Stdout stream path.
    pub stdout: String,
    /// Stderr stream path.
    pub stderr: String,
    /// Whether a terminal is attached.
    pub terminal: bool,
    /// Checkpoint to restore from.
    pub checkpoint: Option<Descriptor>,
    /// Runtime specific options.
    pub options: Option<Any>,
    /// Override of the shim binary path.
    pub runtime_path: String,
}

/// Task creation response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateTaskResponse {
    /// Pid of the created init process.
    pub pid: u32,
}

/// Start request for a task (empty `exec_id`) or exec'd process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    /// Owning container.
    pub container_id: String,
    /// Exec id, empty for the task itself.
    pub exec_id: String,
}

/// Start response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartResponse {
    /// Host pid of the started process.
    pub pid: u32,
}

/// Signal delivery request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillRequest {
    /// Owning container.
    pub container_id: String,
    /// Target exec id, empty for the task's main process.
    pub exec_id: String,
    /// Signal number.
    pub signal: u32,
    /// Signal every process of the task.
    pub all: bool,
}

/// Request naming a task only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRequest {
    /// Owning container.
    pub container_id: String,
}

/// Request naming a task or one of its exec'd processes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessRequest {
    /// Owning container.
    pub container_id: String,
    /// Exec id, empty for the task itself.
    pub exec_id: String,
}

/// Status query response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetResponse {
    /// Remote process state.
    pub process: ProcessState,
}

/// Blocking wait response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitResponse {
    /// Exit status of the process.
    pub exit_status: u32,
    /// Exit time.
    pub exited_at: Option<DateTime<Utc>>,
}

/// Delete response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteResponse {
    /// Deleted task or exec id.
    pub id: String,
    /// Pid of the deleted process.
    pub pid: u32,
    /// Exit status of the deleted process.
    pub exit_status: u32,
    /// Exit time of the deleted process.
    pub exited_at: Option<DateTime<Utc>>,
}

/// Exec request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecProcessRequest {
    /// Owning container.
    pub container_id: String,
    /// New exec id.
    pub exec_id: String,
    /// Whether a terminal is attached.
    pub terminal: bool,
    /// Stdin stream path.
    pub stdin: String,
    /// Stdout stream path.
    pub stdout: String,
    /// Stderr stream path.
    pub stderr: String,
    /// Serialized process spec.
    pub spec: Any,
}

/// Process listing response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPidsResponse {
    /// Processes of the task.
    pub processes: Vec<ProcessInfo>,
}

/// Stream close request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseIoRequest {
    /// Owning container.
    pub container_id: String,
    /// Exec id, empty for the task itself.
    pub exec_id: String,
    /// Close the stdin stream.
    pub stdin: bool,
}

/// Terminal resize request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResizePtyRequest {
    /// Owning container.
    pub container_id: String,
    /// Exec id, empty for the task itself.
    pub exec_id: String,
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
}

/// Checkpoint request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointTaskRequest {
    /// Owning container.
    pub container_id: String,
    /// Parent checkpoint, empty for none.
    pub parent_checkpoint: Digest,
    /// Runtime specific checkpoint options.
    pub options: Option<Any>,
}

/// Checkpoint response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointTaskResponse {
    /// Runtime state written to the content store. Empty when the runtime
    /// checkpointed to an external path.
    pub descriptors: Vec<Descriptor>,
}

/// Resource update request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateTaskRequest {
    /// Owning container.
    pub container_id: String,
    /// Encoded resource limits.
    pub resources: Option<Any>,
    /// Free-form overrides.
    pub annotations: BTreeMap<String, String>,
}

/// Metrics query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsRequest {
    /// Filters such as `id==<task>`.
    pub filters: Vec<String>,
}

/// Metrics response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsResponse {
    /// Matching metrics.
    pub metrics: Vec<Metric>,
}

/// Remote task manager.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Creates a task for a container.
    async fn create(&self, req: CreateTaskRequest) -> RpcResult<CreateTaskResponse>;
    /// Starts a created task or exec'd process.
    async fn start(&self, req: StartRequest) -> RpcResult<StartResponse>;
    /// Deletes a task.
    async fn delete(&self, req: TaskRequest) -> RpcResult<DeleteResponse>;
    /// Deletes an exec'd process.
    async fn delete_process(&self, req: ProcessRequest) -> RpcResult<DeleteResponse>;
    /// Queries the state of a task or exec'd process.
    async fn get(&self, req: ProcessRequest) -> RpcResult<GetResponse>;
    /// Blocks until a task or exec'd process exits.
    async fn wait(&self, req: ProcessRequest) -> RpcResult<WaitResponse>;
    /// Delivers a signal.
    async fn kill(&self, req: KillRequest) -> RpcResult<()>;
    /// Pauses every process of a task.
    async fn pause(&self, req: TaskRequest) -> RpcResult<()>;
    /// Resumes a paused task.
    async fn resume(&self, req: TaskRequest) -> RpcResult<()>;
    /// Adds a process to a running task.
    async fn exec(&self, req: ExecProcessRequest) -> RpcResult<()>;
    /// Lists the processes of a task.
    async fn list_pids(&self, req: TaskRequest) -> RpcResult<ListPidsResponse>;
    /// Closes streams of a task or exec'd process.
    async fn close_io(&self, req: CloseIoRequest) -> RpcResult<()>;
    /// Resizes the terminal of a task or exec'd process.
    async fn resize_pty(&self, req: ResizePtyRequest) -> RpcResult<()>;
    /// Checkpoints the runtime state of a task.
    async fn checkpoint(&self, req: CheckpointTaskRequest) -> RpcResult<CheckpointTaskResponse>;
    /// Updates the resources of a running task.
    async fn update(&self, req: UpdateTaskRequest) -> RpcResult<()>;
    /// Collects metrics.
    async fn metrics(&self, req: MetricsRequest) -> RpcResult<MetricsResponse>;
}

/// Runtime a container was created for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// Runtime name, e.g. `io.containerd.runc.v2`.
    pub name: String,
    /// Default runtime options of the container.
    #[serde(default)]
    pub options: Option<Any>,
}

/// Metadata of a container, the owner of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container identifier, shared by its task.
    pub id: ContainerId,
    /// Runtime of the container.
    pub runtime: RuntimeInfo,
    /// Name of the image the container was created from, empty for none.
    #[serde(default)]
    pub image: String,
    /// Snapshotter holding the container's root filesystem.
    #[serde(default)]
    pub snapshotter: String,
    /// Key of the active read-write snapshot, empty for none.
    #[serde(default)]
    pub snapshot_key: String,
    /// OCI runtime spec of the container.
    #[serde(default)]
    pub spec: Option<serde_json::Value>,
    /// Arbitrary labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// ISO-8601 creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ContainerRecord {
    /// Creates a record for `id` on `runtime` with no image or snapshot.
    #[must_use]
    pub fn new(id: ContainerId, runtime: impl Into<String>) -> Self {
        Self {
            id,
            runtime: RuntimeInfo {
                name: runtime.into(),
                options: None,
            },
            image: String::new(),
            snapshotter: String::new(),
            snapshot_key: String::new(),
            spec: None,
            labels: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }
}

/// Container metadata catalog.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Looks a container up.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if no such container exists.
    async fn get(&self, id: &str) -> Result<ContainerRecord>;

    /// Lists all containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn list(&self) -> Result<Vec<ContainerRecord>>;

    /// Stores a new container.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::AlreadyExists` if the id is taken.
    async fn create(&self, record: ContainerRecord) -> Result<ContainerRecord>;

    /// Removes a container.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if no such container exists.
    async fn delete(&self, id: &str) -> Result<()>;
}
