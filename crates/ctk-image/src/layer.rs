//! Filesystem diff layers.
//!
//! The differ turns the read-write state of an active snapshot into a
//! content-addressed layer, and applies such a layer back onto a directory
//! on restore.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ctk_common::error::{CtkError, Result};

use crate::oci::{Descriptor, MEDIA_TYPE_LAYER, MEDIA_TYPE_LAYER_GZIP};
use crate::storage::{ContentStore, Labels};

/// Computes and applies filesystem diffs.
#[async_trait]
pub trait Differ: Send + Sync {
    /// Captures the state of the snapshot `snapshot_key` as a layer written
    /// under the ingest `reference`. The returned descriptor has no platform.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if the snapshot does not exist.
    async fn create_diff(&self, snapshot_key: &str, reference: &str) -> Result<Descriptor>;

    /// Applies a layer onto `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer cannot be read or extracted.
    async fn apply(&self, layer: &Descriptor, target: &Path) -> Result<()>;
}

/// Differ over plain directories: each snapshot key is a directory under
/// `snapshot_root`, captured as a gzip tarball.
pub struct LocalDiffer {
    snapshot_root: PathBuf,
    content: Arc<dyn ContentStore>,
}

impl LocalDiffer {
    /// Creates a differ reading snapshots from `snapshot_root` and writing
    /// layers to `content`.
    #[must_use]
    pub fn new(snapshot_root: impl Into<PathBuf>, content: Arc<dyn ContentStore>) -> Self {
        Self {
            snapshot_root: snapshot_root.into(),
            content,
        }
    }

    fn snapshot_dir(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(CtkError::invalid_argument(format!(
                "invalid snapshot key: {key}"
            )));
        }
        Ok(self.snapshot_root.join(relative))
    }
}

#[async_trait]
impl Differ for LocalDiffer {
    async fn create_diff(&self, snapshot_key: &str, reference: &str) -> Result<Descriptor> {
        let dir = self.snapshot_dir(snapshot_key)?;
        if !dir.is_dir() {
            return Err(CtkError::not_found(format!("snapshot {snapshot_key}")));
        }
        tracing::info!(snapshot = snapshot_key, reference, "creating diff");

        let data = tokio::task::spawn_blocking(move || pack_directory(&dir))
            .await
            .map_err(|e| CtkError::internal(format!("diff worker failed: {e}")))??;

        crate::storage::write_content(
            self.content.as_ref(),
            MEDIA_TYPE_LAYER_GZIP,
            reference,
            &data,
            Labels::new(),
        )
        .await
    }

    async fn apply(&self, layer: &Descriptor, target: &Path) -> Result<()> {
        let gzip = match layer.media_type.as_str() {
            MEDIA_TYPE_LAYER_GZIP => true,
            MEDIA_TYPE_LAYER => false,
            other => {
                return Err(CtkError::invalid_argument(format!(
                    "unsupported layer media type: {other}"
                )));
            }
        };
        let data = self.content.read(&layer.digest).await?;
        let target = target.to_path_buf();
        tracing::info!(digest = %layer.digest, target = %target.display(), "applying layer");

        tokio::task::spawn_blocking(move || extract_layer(&data, gzip, &target))
            .await
            .map_err(|e| CtkError::internal(format!("apply worker failed: {e}")))?
    }
}

/// Archives the contents of `dir` into a gzip tarball.
fn pack_directory(dir: &Path) -> Result<Vec<u8>> {
    let io_err = |e| CtkError::Io {
        path: dir.to_path_buf(),
        source: e,
    };
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir).map_err(io_err)?;
    let encoder = builder.into_inner().map_err(io_err)?;
    encoder.finish().map_err(io_err)
}

/// Extracts a tar archive to the target directory.
fn extract_layer(data: &[u8], gzip: bool, target: &Path) -> Result<()> {
    let io_err = |e| CtkError::Io {
        path: target.to_path_buf(),
        source: e,
    };
    std::fs::create_dir_all(target).map_err(io_err)?;
    if gzip {
        let decoder = flate2::read::GzDecoder::new(data);
        tar::Archive::new(decoder).unpack(target).map_err(io_err)
    } else {
        tar::Archive::new(data).unpack(target).map_err(io_err)
    }
}
