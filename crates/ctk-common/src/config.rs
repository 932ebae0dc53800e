//! Client configuration model.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CtkError, Result};

/// Root configuration of a ctk client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CtkConfig {
    /// Base directory for content, catalog and snapshot data.
    pub data_dir: PathBuf,
    /// Runtime used when a container does not name one.
    pub default_runtime: String,
    /// Lifetime of leases taken for multi-step content writes.
    pub lease_expiry_secs: u64,
    /// Directory holding one sub-directory per active snapshot key.
    pub snapshot_root: PathBuf,
}

impl Default for CtkConfig {
    fn default() -> Self {
        let data_dir = crate::constants::data_dir().clone();
        Self {
            snapshot_root: data_dir.join("snapshots"),
            data_dir,
            default_runtime: crate::constants::RUNTIME_RUNC_V2.to_string(),
            lease_expiry_secs: crate::constants::DEFAULT_LEASE_EXPIRY_SECS,
        }
    }
}

impl CtkConfig {
    /// Loads a configuration from a JSON file; missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path).map_err(|e| CtkError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays `CTK_DATA_DIR` and `CTK_DEFAULT_RUNTIME` from the environment.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if let Ok(dir) = std::env::var("CTK_DATA_DIR") {
            let dir = PathBuf::from(dir);
            self.snapshot_root = dir.join("snapshots");
            self.data_dir = dir;
        }
        if let Ok(runtime) = std::env::var("CTK_DEFAULT_RUNTIME") {
            self.default_runtime = runtime;
        }
        self
    }

    /// Directory of the content store.
    #[must_use]
    pub fn content_dir(&self) -> PathBuf {
        self.data_dir.join("content")
    }

    fn validate(&self) -> Result<()> {
        if self.default_runtime.is_empty() {
            return Err(CtkError::Config {
                message: "default_runtime must not be empty".into(),
            });
        }
        if self.lease_expiry_secs == 0 {
            return Err(CtkError::Config {
                message: "lease_expiry_secs must be positive".into(),
            });
        }
        Ok(())
    }
}
