//! Persistent container metadata.
//!
//! Maintains a local JSON index of container records, the owners of tasks,
//! so the controller can resolve a task's runtime, image and snapshot
//! without a metadata daemon.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use ctk_common::error::{CtkError, Result};
use tokio::sync::Mutex;

use crate::services::{ContainerRecord, ContainerStore};

/// Container store backed by `containers/state.json` under a data directory.
#[derive(Debug)]
pub struct LocalContainerStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalContainerStore {
    /// Opens or creates the store under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("containers");
        std::fs::create_dir_all(&dir).map_err(|e| CtkError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self {
            path: dir.join("state.json"),
            write_lock: Mutex::new(()),
        })
    }

    async fn load(&self) -> Result<Vec<ContainerRecord>> {
        tracing::trace!(path = %self.path.display(), "loading state index");
        match tokio::fs::read(&self.path).await {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CtkError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    async fn save(&self, records: &[ContainerRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| CtkError::Io {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CtkError::Io {
                path: self.path.clone(),
                source: e,
            })
    }
}

#[async_trait]
impl ContainerStore for LocalContainerStore {
    async fn get(&self, id: &str) -> Result<ContainerRecord> {
        self.load()
            .await?
            .into_iter()
            .find(|record| record.id.as_str() == id)
            .ok_or_else(|| CtkError::not_found(format!("container {id}")))
    }

    async fn list(&self) -> Result<Vec<ContainerRecord>> {
        self.load().await
    }

    async fn create(&self, mut record: ContainerRecord) -> Result<ContainerRecord> {
        if record.id.as_str().is_empty() {
            return Err(CtkError::invalid_argument("container id must not be empty"));
        }
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(CtkError::already_exists(format!("container {}", record.id)));
        }
        record.created_at = Utc::now();
        records.push(record.clone());
        self.save(&records).await?;
        tracing::info!(id = %record.id, runtime = %record.runtime.name, "container recorded");
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|r| r.id.as_str() != id);
        if records.len() == before {
            return Err(CtkError::not_found(format!("container {id}")));
        }
        self.save(&records).await
    }
}
