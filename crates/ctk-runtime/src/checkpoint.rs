//! Checkpointing a task into a content-addressed image, and the helpers
//! restoring from one.
//!
//! A checkpoint is an image labelled `containerd.io/checkpoint=true` whose
//! target is an index referencing:
//!
//! - the runtime state descriptors returned by the task service,
//! - the target of the container's source image, if it has one,
//! - a diff of the container's read-write snapshot, if it has one.
//!
//! The task is paused while this content is captured and resumed
//! afterwards, whatever the outcome. Everything is written under a lease
//! that is released before returning.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Local;
use ctk_common::constants::{
    CHECKPOINT_DATE_FORMAT, CHECKPOINT_LABEL, CHECKPOINT_NAME_PREFIX, GC_REF_CONTENT_PREFIX,
    IMAGE_NAME_ANNOTATION,
};
use ctk_common::error::{CtkError, Result};
use ctk_common::types::{Digest, ProcessStatus};
use ctk_image::layer::Differ;
use ctk_image::lease::{Lease, LeaseResource};
use ctk_image::oci::{
    Descriptor, Index, MEDIA_TYPE_CHECKPOINT_CRIU, MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_LAYER,
    MEDIA_TYPE_LAYER_GZIP, Platform,
};
use ctk_image::registry::{Image, ImageStore};
use ctk_image::storage::{ContentStore, Labels, write_content};

use crate::client::Client;
use crate::container::NewTaskOpts;
use crate::options::CheckpointOptions;
use crate::services::{CheckpointTaskRequest, ContainerRecord, RpcError};
use crate::task::Task;

/// Caller choices for a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointTaskOpts {
    /// Image name; generated from the task id and time when absent.
    pub name: Option<String>,
    /// Previous checkpoint this one is incremental to.
    pub parent_checkpoint: Option<Digest>,
    /// Runtime specific checkpoint options.
    pub options: Option<CheckpointOptions>,
}

impl CheckpointTaskOpts {
    /// Names the checkpoint image.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Makes the checkpoint incremental to `parent`.
    #[must_use]
    pub fn parent(mut self, parent: Digest) -> Self {
        self.parent_checkpoint = Some(parent);
        self
    }

    /// Sets runtime specific options.
    #[must_use]
    pub fn options(mut self, options: CheckpointOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Resolved description of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTaskInfo {
    /// Image name.
    pub name: String,
    /// Parent checkpoint, empty for none.
    pub parent_checkpoint: Digest,
    /// Runtime specific options.
    pub options: Option<CheckpointOptions>,
    runtime: String,
}

impl CheckpointTaskInfo {
    fn resolve(task_id: &str, runtime: String, opts: CheckpointTaskOpts) -> Result<Self> {
        if let Some(options) = &opts.options {
            options.check_runtime(&runtime)?;
        }
        let name = opts
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| default_checkpoint_name(task_id));
        Ok(Self {
            name,
            parent_checkpoint: opts.parent_checkpoint.unwrap_or_default(),
            options: opts.options,
            runtime,
        })
    }

    /// Runtime of the checkpointed task.
    #[must_use]
    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    fn writes_external_image(&self) -> bool {
        self.options
            .as_ref()
            .is_some_and(|options| options.writes_external_image(&self.runtime))
    }
}

/// `containerd.io/checkpoint/<id>:<mm-dd-yyyy-HH:MM:SS>` in local time.
fn default_checkpoint_name(task_id: &str) -> String {
    format!(
        "{CHECKPOINT_NAME_PREFIX}/{task_id}:{}",
        Local::now().format(CHECKPOINT_DATE_FORMAT)
    )
}

/// Resumes a task paused for a checkpoint.
///
/// Consumed by [`ResumeGuard::resume`] on the normal path. If the guard is
/// dropped instead, because the checkpoint future was dropped or panicked,
/// the resume is spawned on the current runtime.
struct ResumeGuard {
    task: Option<Task>,
}

impl ResumeGuard {
    const fn new(task: Task) -> Self {
        Self { task: Some(task) }
    }

    async fn resume(mut self) {
        if let Some(task) = self.task.take() {
            resume_logged(&task).await;
        }
    }
}

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let _ = handle.spawn(async move { resume_logged(&task).await });
            }
            Err(_) => tracing::error!(task = %task.id(), "no runtime to resume paused task"),
        }
    }
}

async fn resume_logged(task: &Task) {
    if let Err(e) = task.resume().await {
        tracing::warn!(task = %task.id(), error = %e, "failed to resume task after checkpoint");
    }
}

impl Task {
    /// Checkpoints the task into an image.
    ///
    /// Returns an empty image when the runtime wrote its state to an
    /// external path and nothing was captured in the content store.
    ///
    /// # Errors
    ///
    /// Returns the first error of any step. The task is resumed and the
    /// lease released in every case.
    #[tracing::instrument(skip_all, fields(task = %self.id()))]
    pub async fn checkpoint(&self, opts: CheckpointTaskOpts) -> Result<Image> {
        let lease = self.client().with_lease().await?;
        let result = self.checkpoint_with_lease(&lease, opts).await;
        if let Err(e) = self.client().release_lease(&lease).await {
            tracing::warn!(lease = %lease.id, error = %e, "failed to release checkpoint lease");
        }
        match &result {
            Ok(image) if image.is_empty() => tracing::info!("checkpoint written externally"),
            Ok(image) => {
                tracing::info!(image = %image.name, digest = %image.target.digest, "checkpoint created");
            }
            Err(e) => tracing::warn!(error = %e, "checkpoint failed"),
        }
        result
    }

    async fn checkpoint_with_lease(&self, lease: &Lease, opts: CheckpointTaskOpts) -> Result<Image> {
        let record = self.client().container_store().get(self.id()).await?;
        let runtime = if record.runtime.name.is_empty() {
            self.client().default_runtime().to_string()
        } else {
            record.runtime.name.clone()
        };
        let info = CheckpointTaskInfo::resolve(self.id(), runtime, opts)?;
        let request = CheckpointTaskRequest {
            container_id: self.id().to_string(),
            parent_checkpoint: info.parent_checkpoint.clone(),
            options: info
                .options
                .as_ref()
                .map(CheckpointOptions::to_any)
                .transpose()?,
        };

        let status = self.status().await?;
        let guard = if status.status == ProcessStatus::Paused {
            None
        } else {
            self.pause().await?;
            Some(ResumeGuard::new(self.clone()))
        };

        let captured = self.capture(&record, &info, request, lease).await;
        if let Some(guard) = guard {
            guard.resume().await;
        }
        let Some(index) = captured? else {
            return Ok(Image::default());
        };

        let target = self.write_index(&index, lease).await?;
        let image = Image {
            name: info.name,
            target,
            labels: BTreeMap::from([(CHECKPOINT_LABEL.to_string(), "true".to_string())]),
            created_at: None,
        };
        self.client().image_store().create(image).await
    }

    /// Captures the runtime state, source image and read-write layer.
    /// `None` means the runtime checkpointed to an external path.
    async fn capture(
        &self,
        record: &ContainerRecord,
        info: &CheckpointTaskInfo,
        request: CheckpointTaskRequest,
        lease: &Lease,
    ) -> Result<Option<Index>> {
        let mut index = Index::default();

        let resp = self
            .client()
            .task_service()
            .checkpoint(request)
            .await
            .map_err(RpcError::into_native)?;
        for desc in resp.descriptors {
            self.client()
                .hold(lease, LeaseResource::content(&desc.digest))
                .await?;
            index.push(desc.with_platform(Platform::host()));
        }

        if info.writes_external_image() {
            return Ok(None);
        }

        if !record.image.is_empty() {
            let source = self.client().image_store().get(&record.image).await?;
            index.push(source.target);
            let _ = index
                .annotations
                .insert(IMAGE_NAME_ANNOTATION.to_string(), record.image.clone());
        }

        if !record.snapshot_key.is_empty() {
            let reference = format!("checkpoint-rw-{}", record.snapshot_key);
            let rw = self
                .client()
                .differ()
                .create_diff(&record.snapshot_key, &reference)
                .await?;
            self.client()
                .hold(lease, LeaseResource::content(&rw.digest))
                .await?;
            index.push(rw.with_platform(Platform::host()));
        }

        Ok(Some(index))
    }

    async fn write_index(&self, index: &Index, lease: &Lease) -> Result<Descriptor> {
        let labels: Labels = index
            .manifests
            .iter()
            .enumerate()
            .map(|(i, m)| (format!("{GC_REF_CONTENT_PREFIX}.{i}"), m.digest.to_string()))
            .collect();
        let data = index.to_json()?;
        let desc = write_content(
            self.client().content_store(),
            MEDIA_TYPE_IMAGE_INDEX,
            self.id(),
            &data,
            labels,
        )
        .await?;
        self.client()
            .hold(lease, LeaseResource::content(&desc.digest))
            .await?;
        Ok(desc)
    }
}

/// A checkpoint image and its index, as needed to restore a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointImage {
    image: Image,
    index: Index,
}

impl CheckpointImage {
    /// Loads the checkpoint image `name` and its index.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if the image or its index is missing,
    /// or `CtkError::InvalidArgument` if the image is not a checkpoint.
    pub async fn load(
        images: &dyn ImageStore,
        content: &dyn ContentStore,
        name: &str,
    ) -> Result<Self> {
        let image = images.get(name).await?;
        if !image.is_checkpoint() {
            return Err(CtkError::invalid_argument(format!(
                "image {name} is not a checkpoint"
            )));
        }
        let data = content.read(&image.target.digest).await?;
        let index = Index::from_json(&data)?;
        Ok(Self { image, index })
    }

    /// The checkpoint image.
    #[must_use]
    pub const fn image(&self) -> &Image {
        &self.image
    }

    /// The checkpoint index.
    #[must_use]
    pub const fn index(&self) -> &Index {
        &self.index
    }

    /// Name of the image the checkpointed container was created from.
    #[must_use]
    pub fn source_image(&self) -> Option<&str> {
        self.index
            .annotations
            .get(IMAGE_NAME_ANNOTATION)
            .map(String::as_str)
    }

    /// Runtime state to restore the task from.
    #[must_use]
    pub fn runtime_state(&self) -> Option<&Descriptor> {
        self.index.find(MEDIA_TYPE_CHECKPOINT_CRIU)
    }

    /// Diff of the read-write snapshot.
    #[must_use]
    pub fn rw_layer(&self) -> Option<&Descriptor> {
        self.index
            .find(MEDIA_TYPE_LAYER_GZIP)
            .or_else(|| self.index.find(MEDIA_TYPE_LAYER))
    }

    /// Task options restoring from this checkpoint's runtime state.
    #[must_use]
    pub fn task_opts(&self) -> NewTaskOpts {
        NewTaskOpts {
            checkpoint: self.runtime_state().cloned(),
            ..NewTaskOpts::default()
        }
    }

    /// Applies the read-write layer onto `target`.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if the checkpoint has no read-write
    /// layer, or the differ's error.
    pub async fn restore_rw(&self, differ: &dyn Differ, target: &Path) -> Result<()> {
        let layer = self.rw_layer().ok_or_else(|| {
            CtkError::not_found(format!("read-write layer of checkpoint {}", self.image.name))
        })?;
        differ.apply(layer, target).await
    }
}

impl Client {
    /// Loads the checkpoint image `name` from the session's stores.
    ///
    /// # Errors
    ///
    /// See [`CheckpointImage::load`].
    pub async fn checkpoint_image(&self, name: &str) -> Result<CheckpointImage> {
        CheckpointImage::load(self.image_store(), self.content_store(), name).await
    }
}
