//! Image catalog.
//!
//! Maps image names to the descriptor of their root content. Checkpoints are
//! registered here as ordinary images labelled `containerd.io/checkpoint`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctk_common::error::{CtkError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::oci::Descriptor;

/// A named image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Human-readable name/reference.
    pub name: String,
    /// Root content of the image.
    pub target: Descriptor,
    /// Arbitrary labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Registration timestamp, set by the catalog.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Image {
    /// Whether this image has no target content.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.target.digest.is_empty()
    }

    /// Whether this image was produced by a checkpoint.
    #[must_use]
    pub fn is_checkpoint(&self) -> bool {
        self.labels
            .get(ctk_common::constants::CHECKPOINT_LABEL)
            .is_some_and(|v| v == "true")
    }
}

/// Catalog of named images.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Looks an image up by name.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if no image has that name.
    async fn get(&self, name: &str) -> Result<Image>;

    /// Registers a new image and returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::AlreadyExists` if the name is taken.
    async fn create(&self, image: Image) -> Result<Image>;

    /// Lists all images.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn list(&self) -> Result<Vec<Image>>;

    /// Removes an image by name.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if no image has that name.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Image catalog backed by a JSON file.
#[derive(Debug)]
pub struct LocalImageCatalog {
    catalog_path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalImageCatalog {
    /// Opens or creates an image catalog under the given data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog directory cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let catalog_path = data_dir.join("images").join("catalog.json");
        if let Some(parent) = catalog_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CtkError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Ok(Self {
            catalog_path,
            write_lock: Mutex::new(()),
        })
    }

    async fn read_entries(&self) -> Result<Vec<Image>> {
        let content = match tokio::fs::read(&self.catalog_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CtkError::Io {
                    path: self.catalog_path.clone(),
                    source: e,
                });
            }
        };
        Ok(serde_json::from_slice(&content)?)
    }

    async fn write_entries(&self, entries: &[Image]) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)?;
        let tmp = self.catalog_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| CtkError::Io {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &self.catalog_path)
            .await
            .map_err(|e| CtkError::Io {
                path: self.catalog_path.clone(),
                source: e,
            })
    }
}

#[async_trait]
impl ImageStore for LocalImageCatalog {
    async fn get(&self, name: &str) -> Result<Image> {
        self.read_entries()
            .await?
            .into_iter()
            .find(|image| image.name == name)
            .ok_or_else(|| CtkError::not_found(format!("image {name}")))
    }

    async fn create(&self, mut image: Image) -> Result<Image> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.iter().any(|e| e.name == image.name) {
            return Err(CtkError::already_exists(format!("image {}", image.name)));
        }
        image.created_at = Some(Utc::now());
        entries.push(image.clone());
        self.write_entries(&entries).await?;
        tracing::info!(name = %image.name, digest = %image.target.digest, "image registered");
        Ok(image)
    }

    async fn list(&self) -> Result<Vec<Image>> {
        self.read_entries().await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        let before = entries.len();
        entries.retain(|e| e.name != name);
        if entries.len() == before {
            return Err(CtkError::not_found(format!("image {name}")));
        }
        self.write_entries(&entries).await
    }
}
