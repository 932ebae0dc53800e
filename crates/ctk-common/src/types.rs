//! Domain primitive types used across the ctk workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CtkError, Result};

/// Identifier of a container, shared by its task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Algorithm prefix of every digest produced by this workspace.
pub const SHA256_PREFIX: &str = "sha256:";

/// Content digest in `algorithm:hex` form.
///
/// The empty digest is a valid value and means "no content", e.g. a
/// checkpoint without a parent or the target of an empty image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Creates a SHA-256 digest from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CtkError::invalid_argument(format!(
                "invalid SHA-256 hex string: {hex}"
            )));
        }
        Ok(Self(format!("{SHA256_PREFIX}{}", hex.to_ascii_lowercase())))
    }

    /// Returns the full `algorithm:hex` form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the hex-encoded part of the digest.
    #[must_use]
    pub fn hex(&self) -> &str {
        self.0.strip_prefix(SHA256_PREFIX).unwrap_or(&self.0)
    }

    /// Whether this is the empty digest.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for Digest {
    type Err = CtkError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let hex = s.strip_prefix(SHA256_PREFIX).ok_or_else(|| {
            CtkError::invalid_argument(format!("unsupported digest algorithm: {s}"))
        })?;
        Self::from_hex(hex)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource limits that can be pushed to a running task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU shares (relative weight).
    pub cpu_shares: Option<u64>,
    /// CPU quota in microseconds per period.
    pub cpu_quota: Option<i64>,
    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,
    /// Maximum number of processes.
    pub pids_limit: Option<i64>,
    /// I/O weight (1-10000).
    pub io_weight: Option<u16>,
}

/// Observed status of a task or exec'd process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// The process is currently executing.
    Running,
    /// The process exists in the runtime but the user process has not started.
    Created,
    /// The process has run and exited.
    Stopped,
    /// The process is paused.
    Paused,
    /// The process is switching from running to paused.
    Pausing,
    /// The runtime could not determine the status.
    Unknown,
}

impl ProcessStatus {
    /// Returns the lower-case name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Created => "created",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Pausing => "pausing",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for ProcessStatus {
    type Err = CtkError;

    /// Parses a status name case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "created" => Ok(Self::Created),
            "stopped" => Ok(Self::Stopped),
            "paused" => Ok(Self::Paused),
            "pausing" => Ok(Self::Pausing),
            "unknown" => Ok(Self::Unknown),
            other => Err(CtkError::invalid_argument(format!(
                "unrecognized process status: {other}"
            ))),
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
