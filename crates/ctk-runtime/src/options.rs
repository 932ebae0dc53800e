//! Runtime specific task and checkpoint options.
//!
//! Options are opaque to the controller except for the runc shim family,
//! whose typed variants are validated before any remote call. Every other
//! runtime receives its options verbatim.

use ctk_common::constants::RUNTIME_RUNC_V2;
use ctk_common::error::{CtkError, Result};
use serde::{Deserialize, Serialize};

use crate::services::Any;

/// Type identifier of [`RuncOptions`] payloads.
pub const RUNC_OPTIONS_TYPE: &str = "containerd.runc.v1.Options";
/// Type identifier of [`RuncCheckpointOptions`] payloads.
pub const RUNC_CHECKPOINT_OPTIONS_TYPE: &str = "containerd.runc.v1.CheckpointOptions";

const RUNC_FAMILY_PREFIX: &str = "io.containerd.runc.";

/// Whether `runtime` belongs to the runc shim family.
#[must_use]
pub fn is_runc_runtime(runtime: &str) -> bool {
    runtime.starts_with(RUNC_FAMILY_PREFIX)
}

/// Task options of the runc shim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuncOptions {
    /// Disable `pivot_root` when creating the container.
    pub no_pivot_root: bool,
    /// Do not create a new session keyring.
    pub no_new_keyring: bool,
    /// Cgroup the shim is placed in.
    pub shim_cgroup: String,
    /// Owner uid of the io pipes.
    pub io_uid: u32,
    /// Owner gid of the io pipes.
    pub io_gid: u32,
    /// Name of the runc binary.
    pub binary_name: String,
    /// Runc state root.
    pub root: String,
    /// Use the systemd cgroup driver.
    pub systemd_cgroup: bool,
    /// Criu image path used when restoring.
    pub criu_image_path: String,
    /// Criu work path used when restoring.
    pub criu_work_path: String,
}

/// Checkpoint options of the runc shim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuncCheckpointOptions {
    /// Stop the container after checkpointing.
    pub exit: bool,
    /// Checkpoint open TCP connections.
    pub open_tcp: bool,
    /// Checkpoint external unix sockets.
    pub external_unix_sockets: bool,
    /// Checkpoint terminals.
    pub terminal: bool,
    /// Allow checkpointing file locks.
    pub file_locks: bool,
    /// Namespaces that are re-created empty on restore.
    pub empty_namespaces: Vec<String>,
    /// Criu cgroup mode.
    pub cgroups_mode: String,
    /// Write the checkpoint image to this path instead of the content store.
    pub image_path: String,
    /// Criu work directory.
    pub work_path: String,
}

/// Options forwarded at task creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOptions {
    /// Typed options of the runc shim family.
    Runc(RuncOptions),
    /// Options of any other runtime, passed through unchanged.
    Generic(Any),
}

impl TaskOptions {
    /// Encodes the options for the task service.
    ///
    /// # Errors
    ///
    /// Returns an error if the options cannot be serialized.
    pub fn to_any(&self) -> Result<Any> {
        match self {
            Self::Runc(options) => Any::from_json(RUNC_OPTIONS_TYPE, options),
            Self::Generic(any) => Ok(any.clone()),
        }
    }

    /// Selects the variant for `runtime` from an encoded payload.
    ///
    /// # Errors
    ///
    /// Returns an error if a runc payload does not decode.
    pub fn for_runtime(runtime: &str, any: &Any) -> Result<Self> {
        if is_runc_runtime(runtime) && any.type_url == RUNC_OPTIONS_TYPE {
            return Ok(Self::Runc(any.decode_json()?));
        }
        Ok(Self::Generic(any.clone()))
    }

    /// Rejects option variants the runtime cannot accept.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::InvalidArgument` on a mismatch.
    pub fn check_runtime(&self, runtime: &str) -> Result<()> {
        match self {
            Self::Runc(_) if !is_runc_runtime(runtime) => Err(CtkError::invalid_argument(
                format!("runc options given for runtime {runtime}"),
            )),
            Self::Generic(any) if is_runc_runtime(runtime) && any.type_url != RUNC_OPTIONS_TYPE => {
                Err(CtkError::invalid_argument(format!(
                    "invalid runtime v2 options format for {runtime}: {}",
                    any.type_url
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Options forwarded with a checkpoint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOptions {
    /// Typed checkpoint options of the runc shim family.
    Runc(RuncCheckpointOptions),
    /// Options of any other runtime, passed through unchanged.
    Generic(Any),
}

impl CheckpointOptions {
    /// Encodes the options for the task service.
    ///
    /// # Errors
    ///
    /// Returns an error if the options cannot be serialized.
    pub fn to_any(&self) -> Result<Any> {
        match self {
            Self::Runc(options) => Any::from_json(RUNC_CHECKPOINT_OPTIONS_TYPE, options),
            Self::Generic(any) => Ok(any.clone()),
        }
    }

    /// Rejects option variants the runtime cannot accept.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::InvalidArgument` on a mismatch.
    pub fn check_runtime(&self, runtime: &str) -> Result<()> {
        match self {
            Self::Runc(_) if !is_runc_runtime(runtime) => Err(CtkError::invalid_argument(
                format!("runc checkpoint options given for runtime {runtime}"),
            )),
            Self::Generic(any)
                if is_runc_runtime(runtime) && any.type_url != RUNC_CHECKPOINT_OPTIONS_TYPE =>
            {
                Err(CtkError::invalid_argument(format!(
                    "invalid runtime v2 checkpoint options format: {}",
                    any.type_url
                )))
            }
            _ => Ok(()),
        }
    }

    /// Whether the runtime writes the checkpoint to an external path and
    /// nothing is left to capture in the content store.
    #[must_use]
    pub fn writes_external_image(&self, runtime: &str) -> bool {
        runtime == RUNTIME_RUNC_V2 && matches!(self, Self::Runc(o) if !o.image_path.is_empty())
    }
}
