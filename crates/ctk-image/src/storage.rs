//! Content-addressable blob storage.
//!
//! Blobs are immutable and keyed by their SHA-256 digest. The local backend
//! lays them out as `blobs/sha256/<hex>` under its root; a commit first
//! writes into `ingest/` and then renames into place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ctk_common::error::{CtkError, Result};
use ctk_common::types::Digest;
use serde::{Deserialize, Serialize};

use crate::oci::Descriptor;

/// Labels attached to committed content.
pub type Labels = BTreeMap<String, String>;

/// Metadata about a committed blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    /// Digest of the blob.
    pub digest: Digest,
    /// Size of the blob in bytes.
    pub size: u64,
    /// Labels set at commit time.
    pub labels: Labels,
}

/// Content-addressable blob store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Writes `data` under the ingest `reference` and commits it as
    /// `expected`.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::AlreadyExists` if a blob with that digest has
    /// already been committed, `CtkError::HashMismatch` if `data` does not
    /// hash to `expected`.
    async fn commit(
        &self,
        reference: &str,
        data: &[u8],
        expected: &Digest,
        labels: Labels,
    ) -> Result<()>;

    /// Reads a committed blob.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if no blob with that digest exists.
    async fn read(&self, digest: &Digest) -> Result<Vec<u8>>;

    /// Returns metadata of a committed blob.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if no blob with that digest exists.
    async fn info(&self, digest: &Digest) -> Result<ContentInfo>;
}

/// Writes a blob and returns a descriptor for it.
///
/// A blob that was already committed is not an error: the descriptor of the
/// existing content is returned.
///
/// # Errors
///
/// Returns an error if the store rejects the commit for any other reason.
pub async fn write_content(
    store: &dyn ContentStore,
    media_type: &str,
    reference: &str,
    data: &[u8],
    labels: Labels,
) -> Result<Descriptor> {
    let digest = crate::hash::digest_bytes(data);
    match store.commit(reference, data, &digest, labels).await {
        Ok(()) => {
            tracing::debug!(reference, digest = %digest, size = data.len(), "content committed");
        }
        Err(e) if e.is_already_exists() => {
            tracing::debug!(reference, digest = %digest, "content already present");
        }
        Err(e) => return Err(e),
    }
    Ok(Descriptor::new(media_type, digest, data.len() as u64))
}

/// Content store backed by a local directory.
#[derive(Debug)]
pub struct LocalContentStore {
    /// Root directory for all stored data.
    root: PathBuf,
}

impl LocalContentStore {
    /// Opens or initializes the store at the given root.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory layout cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tracing::info!(path = %root.display(), "opening content store");
        for dir in [root.join("blobs").join("sha256"), root.join("ingest")] {
            std::fs::create_dir_all(&dir).map_err(|e| CtkError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(Self { root })
    }

    /// Returns the path of a blob given its digest.
    #[must_use]
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join("blobs").join("sha256").join(digest.hex())
    }

    fn labels_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("blobs")
            .join("sha256")
            .join(format!("{}.labels.json", digest.hex()))
    }

    /// Checks whether a blob exists in the store.
    #[must_use]
    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.blob_path(digest).exists()
    }

    /// Returns the root storage path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ingest_path(&self, reference: &str) -> PathBuf {
        let safe: String = reference
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root
            .join("ingest")
            .join(format!("{safe}-{}", uuid::Uuid::new_v4()))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CtkError + '_ {
    move |e| CtkError::Io {
        path: path.to_path_buf(),
        source: e,
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn commit(
        &self,
        reference: &str,
        data: &[u8],
        expected: &Digest,
        labels: Labels,
    ) -> Result<()> {
        crate::hash::validate(reference, data, expected)?;
        let target = self.blob_path(expected);
        if target.exists() {
            return Err(CtkError::already_exists(format!("content {expected}")));
        }

        let ingest = self.ingest_path(reference);
        tokio::fs::write(&ingest, data).await.map_err(io_err(&ingest))?;
        if !labels.is_empty() {
            let labels_path = self.labels_path(expected);
            let json = serde_json::to_vec(&labels)?;
            tokio::fs::write(&labels_path, json)
                .await
                .map_err(io_err(&labels_path))?;
        }
        tokio::fs::rename(&ingest, &target)
            .await
            .map_err(io_err(&target))?;
        Ok(())
    }

    async fn read(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CtkError::not_found(format!("content {digest}")));
            }
            Err(e) => return Err(io_err(&path)(e)),
        };
        crate::hash::validate(&path.to_string_lossy(), &data, digest)?;
        Ok(data)
    }

    async fn info(&self, digest: &Digest) -> Result<ContentInfo> {
        let path = self.blob_path(digest);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CtkError::not_found(format!("content {digest}")));
            }
            Err(e) => return Err(io_err(&path)(e)),
        };
        let labels_path = self.labels_path(digest);
        let labels = match tokio::fs::read(&labels_path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Labels::new(),
            Err(e) => return Err(io_err(&labels_path)(e)),
        };
        Ok(ContentInfo {
            digest: digest.clone(),
            size: metadata.len(),
            labels,
        })
    }
}
