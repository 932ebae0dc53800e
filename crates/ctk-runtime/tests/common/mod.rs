//! Shared fixtures: an in-memory task service, recording stream handles and
//! a client session over local stores in a temp directory.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use ctk_common::config::CtkConfig;
use ctk_common::error::Result;
use ctk_common::types::ContainerId;
use ctk_image::layer::LocalDiffer;
use ctk_image::lease::LocalLeaseManager;
use ctk_image::oci::Descriptor;
use ctk_image::registry::LocalImageCatalog;
use ctk_image::storage::{ContentStore, LocalContentStore};
use ctk_runtime::client::{Client, Services};
use ctk_runtime::io::{Creator, Io, IoConfig};
use ctk_runtime::services::{
    CheckpointTaskRequest, CheckpointTaskResponse, CloseIoRequest, Code, ContainerRecord,
    ContainerStore, CreateTaskRequest, CreateTaskResponse, DeleteResponse, ExecProcessRequest,
    GetResponse, KillRequest, ListPidsResponse, Metric, MetricsRequest, MetricsResponse,
    ProcessRequest, ProcessState, ResizePtyRequest, RpcError, RpcResult, StartRequest,
    StartResponse, TaskRequest, TaskService, UpdateTaskRequest, WaitResponse,
};
use ctk_runtime::state::LocalContainerStore;

/// Ordered record of remote calls (`rpc:<op>`) and stream phases
/// (`io:<phase>`).
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }

    /// Events logged after the first occurrence of `marker`.
    pub fn after(&self, marker: &str) -> Vec<String> {
        let events = self.events();
        match events.iter().position(|e| e == marker) {
            Some(i) => events[i + 1..].to_vec(),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    status: String,
    create_pid: u32,
    start_pid: u32,
    exit_status: u32,
    failures: HashMap<&'static str, RpcError>,
    execs: HashMap<String, ProcessState>,
    checkpoint_descriptors: Vec<Descriptor>,
    metrics: Vec<Metric>,
    kills: Vec<KillRequest>,
    checkpoints: Vec<CheckpointTaskRequest>,
    creates: Vec<CreateTaskRequest>,
    updates: Vec<UpdateTaskRequest>,
}

/// Task service answering from in-memory state.
#[derive(Debug)]
pub struct FakeTaskService {
    log: EventLog,
    state: Mutex<FakeState>,
}

impl FakeTaskService {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            state: Mutex::new(FakeState {
                status: "CREATED".into(),
                create_pid: 42,
                start_pid: 42,
                ..FakeState::default()
            }),
        }
    }

    pub fn set_status(&self, status: &str) {
        self.state.lock().unwrap().status = status.into();
    }

    pub fn set_create_pid(&self, pid: u32) {
        self.state.lock().unwrap().create_pid = pid;
    }

    pub fn set_exit_status(&self, code: u32) {
        self.state.lock().unwrap().exit_status = code;
    }

    pub fn set_exec_status(&self, exec_id: &str, status: &str) {
        if let Some(process) = self.state.lock().unwrap().execs.get_mut(exec_id) {
            process.status = status.into();
        }
    }

    pub fn set_checkpoint_descriptors(&self, descriptors: Vec<Descriptor>) {
        self.state.lock().unwrap().checkpoint_descriptors = descriptors;
    }

    pub fn set_metrics(&self, metrics: Vec<Metric>) {
        self.state.lock().unwrap().metrics = metrics;
    }

    /// Makes every call of `op` fail with `code`.
    pub fn fail(&self, op: &'static str, code: Code) {
        let _ = self
            .state
            .lock()
            .unwrap()
            .failures
            .insert(op, RpcError::new(code, format!("injected {op} failure")));
    }

    pub fn kills(&self) -> Vec<KillRequest> {
        self.state.lock().unwrap().kills.clone()
    }

    pub fn checkpoints(&self) -> Vec<CheckpointTaskRequest> {
        self.state.lock().unwrap().checkpoints.clone()
    }

    pub fn creates(&self) -> Vec<CreateTaskRequest> {
        self.state.lock().unwrap().creates.clone()
    }

    pub fn updates(&self) -> Vec<UpdateTaskRequest> {
        self.state.lock().unwrap().updates.clone()
    }

    fn call(&self, op: &'static str) -> RpcResult<()> {
        self.log.push(format!("rpc:{op}"));
        match self.state.lock().unwrap().failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn task_state(&self, container_id: &str) -> ProcessState {
        let state = self.state.lock().unwrap();
        ProcessState {
            id: container_id.into(),
            pid: state.create_pid,
            status: state.status.clone(),
            exit_status: state.exit_status,
            ..ProcessState::default()
        }
    }
}

#[async_trait]
impl TaskService for FakeTaskService {
    async fn create(&self, req: CreateTaskRequest) -> RpcResult<CreateTaskResponse> {
        self.call("create")?;
        let mut state = self.state.lock().unwrap();
        state.creates.push(req);
        Ok(CreateTaskResponse {
            pid: state.create_pid,
        })
    }

    async fn start(&self, _req: StartRequest) -> RpcResult<StartResponse> {
        self.call("start")?;
        Ok(StartResponse {
            pid: self.state.lock().unwrap().start_pid,
        })
    }

    async fn delete(&self, req: TaskRequest) -> RpcResult<DeleteResponse> {
        self.call("delete")?;
        let state = self.state.lock().unwrap();
        Ok(DeleteResponse {
            id: req.container_id,
            pid: state.create_pid,
            exit_status: state.exit_status,
            exited_at: Some(Utc::now()),
        })
    }

    async fn delete_process(&self, req: ProcessRequest) -> RpcResult<DeleteResponse> {
        self.call("delete_process")?;
        let mut state = self.state.lock().unwrap();
        let process = state
            .execs
            .remove(&req.exec_id)
            .ok_or_else(|| RpcError::new(Code::NotFound, format!("process {}", req.exec_id)))?;
        Ok(DeleteResponse {
            id: req.exec_id,
            pid: process.pid,
            exit_status: process.exit_status,
            exited_at: Some(Utc::now()),
        })
    }

    async fn get(&self, req: ProcessRequest) -> RpcResult<GetResponse> {
        self.call("get")?;
        if req.exec_id.is_empty() || req.exec_id == req.container_id {
            return Ok(GetResponse {
                process: self.task_state(&req.container_id),
            });
        }
        let state = self.state.lock().unwrap();
        state
            .execs
            .get(&req.exec_id)
            .cloned()
            .map(|process| GetResponse { process })
            .ok_or_else(|| RpcError::new(Code::NotFound, format!("process {}", req.exec_id)))
    }

    async fn wait(&self, _req: ProcessRequest) -> RpcResult<WaitResponse> {
        self.call("wait")?;
        Ok(WaitResponse {
            exit_status: self.state.lock().unwrap().exit_status,
            exited_at: Some(Utc::now()),
        })
    }

    async fn kill(&self, req: KillRequest) -> RpcResult<()> {
        self.call("kill")?;
        self.state.lock().unwrap().kills.push(req);
        Ok(())
    }

    async fn pause(&self, _req: TaskRequest) -> RpcResult<()> {
        self.call("pause")?;
        self.state.lock().unwrap().status = "PAUSED".into();
        Ok(())
    }

    async fn resume(&self, _req: TaskRequest) -> RpcResult<()> {
        self.call("resume")?;
        self.state.lock().unwrap().status = "RUNNING".into();
        Ok(())
    }

    async fn exec(&self, req: ExecProcessRequest) -> RpcResult<()> {
        self.call("exec")?;
        let process = ProcessState {
            id: req.exec_id.clone(),
            status: "CREATED".into(),
            stdin: req.stdin,
            stdout: req.stdout,
            stderr: req.stderr,
            terminal: req.terminal,
            ..ProcessState::default()
        };
        let _ = self
            .state
            .lock()
            .unwrap()
            .execs
            .insert(req.exec_id, process);
        Ok(())
    }

    async fn list_pids(&self, _req: TaskRequest) -> RpcResult<ListPidsResponse> {
        self.call("list_pids")?;
        Ok(ListPidsResponse::default())
    }

    async fn close_io(&self, _req: CloseIoRequest) -> RpcResult<()> {
        self.call("close_io")
    }

    async fn resize_pty(&self, _req: ResizePtyRequest) -> RpcResult<()> {
        self.call("resize_pty")
    }

    async fn checkpoint(&self, req: CheckpointTaskRequest) -> RpcResult<CheckpointTaskResponse> {
        self.call("checkpoint")?;
        let mut state = self.state.lock().unwrap();
        state.checkpoints.push(req);
        Ok(CheckpointTaskResponse {
            descriptors: state.checkpoint_descriptors.clone(),
        })
    }

    async fn update(&self, req: UpdateTaskRequest) -> RpcResult<()> {
        self.call("update")?;
        self.state.lock().unwrap().updates.push(req);
        Ok(())
    }

    async fn metrics(&self, _req: MetricsRequest) -> RpcResult<MetricsResponse> {
        self.call("metrics")?;
        Ok(MetricsResponse {
            metrics: self.state.lock().unwrap().metrics.clone(),
        })
    }
}

/// Stream handle logging its phases.
#[derive(Debug)]
pub struct RecordingIo {
    log: EventLog,
    config: IoConfig,
}

#[async_trait]
impl Io for RecordingIo {
    fn config(&self) -> IoConfig {
        self.config.clone()
    }

    fn cancel(&self) {
        self.log.push("io:cancel");
    }

    async fn wait(&self) {
        self.log.push("io:wait");
    }

    fn close(&self) -> Result<()> {
        self.log.push("io:close");
        Ok(())
    }
}

/// Creator of [`RecordingIo`] handles; logs `io:create:<id>` per call.
pub fn recording_io(log: &EventLog) -> impl Creator + use<> {
    let log = log.clone();
    move |id: &str| -> Result<Box<dyn Io>> {
        log.push(format!("io:create:{id}"));
        Ok(Box::new(RecordingIo {
            log: log.clone(),
            config: IoConfig {
                terminal: false,
                stdin: String::new(),
                stdout: format!("/run/ctk/{id}/stdout"),
                stderr: format!("/run/ctk/{id}/stderr"),
            },
        }))
    }
}

/// Client session over a fake task service and local stores.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub log: EventLog,
    pub service: Arc<FakeTaskService>,
    pub containers: Arc<LocalContainerStore>,
    pub content: Arc<LocalContentStore>,
    pub images: Arc<LocalImageCatalog>,
    pub leases: Arc<LocalLeaseManager>,
    pub client: Client,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let config = CtkConfig {
            data_dir: dir.path().to_path_buf(),
            snapshot_root: dir.path().join("snapshots"),
            ..CtkConfig::default()
        };
        let log = EventLog::default();
        let service = Arc::new(FakeTaskService::new(log.clone()));
        let containers = Arc::new(LocalContainerStore::open(&config.data_dir).unwrap());
        let content = Arc::new(LocalContentStore::open(config.content_dir()).unwrap());
        let images = Arc::new(LocalImageCatalog::open(&config.data_dir).unwrap());
        let leases = Arc::new(LocalLeaseManager::new());
        let differ = Arc::new(LocalDiffer::new(
            config.snapshot_root.clone(),
            Arc::clone(&content) as Arc<dyn ContentStore>,
        ));
        let client = Client::new(
            Services {
                tasks: Arc::clone(&service) as _,
                containers: Arc::clone(&containers) as _,
                content: Arc::clone(&content) as _,
                images: Arc::clone(&images) as _,
                differ,
                leases: Arc::clone(&leases) as _,
            },
            config,
        );
        Self {
            dir,
            log,
            service,
            containers,
            content,
            images,
            leases,
            client,
        }
    }

    /// Records container `id` on `runtime`.
    pub async fn add_container(&self, id: &str, runtime: &str) -> ContainerRecord {
        self.containers
            .create(ContainerRecord::new(ContainerId::new(id), runtime))
            .await
            .unwrap()
    }

    /// Records container `id` on `runtime` and creates its task with
    /// recording streams.
    pub async fn new_task(&self, id: &str, runtime: &str) -> ctk_runtime::task::Task {
        let _ = self.add_container(id, runtime).await;
        self.client
            .container(id)
            .new_task(&recording_io(&self.log), Default::default())
            .await
            .unwrap()
    }
}
