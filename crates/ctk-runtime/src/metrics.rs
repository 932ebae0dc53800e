//! Resource accessors of a running task: process listing, live resource
//! updates and runtime metrics.

use std::collections::BTreeMap;

use ctk_common::error::{CtkError, Result};
use ctk_common::types::ResourceLimits;

use crate::services::{
    Any, Metric, MetricsRequest, ProcessInfo, RpcError, TaskRequest, UpdateTaskRequest,
};
use crate::task::Task;

/// Type identifier of serialized [`ResourceLimits`] payloads.
pub const RESOURCES_TYPE: &str = "types.containerd.io/opencontainers/runtime-spec/1/LinuxResources";

/// Changes pushed to a running task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateTaskInfo {
    /// New resource limits.
    pub resources: Option<ResourceLimits>,
    /// Free-form overrides.
    pub annotations: BTreeMap<String, String>,
}

impl Task {
    /// Lists the processes of the task.
    ///
    /// # Errors
    ///
    /// Returns the normalized remote error.
    pub async fn pids(&self) -> Result<Vec<ProcessInfo>> {
        let request = TaskRequest {
            container_id: self.id().to_string(),
        };
        let resp = self
            .client()
            .task_service()
            .list_pids(request)
            .await
            .map_err(RpcError::into_native)?;
        Ok(resp.processes)
    }

    /// Pushes new resource limits or annotations to the task.
    ///
    /// # Errors
    ///
    /// Returns the normalized remote error.
    #[tracing::instrument(skip_all, fields(task = %self.id()))]
    pub async fn update(&self, info: UpdateTaskInfo) -> Result<()> {
        let resources = info
            .resources
            .as_ref()
            .map(|limits| Any::from_json(RESOURCES_TYPE, limits))
            .transpose()?;
        let request = UpdateTaskRequest {
            container_id: self.id().to_string(),
            resources,
            annotations: info.annotations,
        };
        self.client()
            .task_service()
            .update(request)
            .await
            .map_err(RpcError::into_native)?;
        tracing::debug!("task updated");
        Ok(())
    }

    /// Fetches the runtime metrics of the task.
    ///
    /// An empty answer is disambiguated with a status query: a task that
    /// no longer exists yields its not-found error.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NoMetrics` when the runtime has no data for a
    /// live task, or the normalized remote error.
    pub async fn metrics(&self) -> Result<Metric> {
        let request = MetricsRequest {
            filters: vec![format!("id=={}", self.id())],
        };
        let resp = self
            .client()
            .task_service()
            .metrics(request)
            .await
            .map_err(RpcError::into_native)?;
        if let Some(metric) = resp.metrics.into_iter().next() {
            return Ok(metric);
        }
        match self.status().await {
            Err(e) if e.is_not_found() => Err(e),
            _ => Err(CtkError::NoMetrics {
                id: self.id().to_string(),
            }),
        }
    }
}
