//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for ctk data on Linux with root access.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/ctk";

/// Returns the data directory, preferring `$HOME/.ctk` for non-root
/// environments, falling back to `/var/lib/ctk`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".ctk");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Runtime name of the runc v2 shim.
pub const RUNTIME_RUNC_V2: &str = "io.containerd.runc.v2";

/// Runtime name of the windows runtime, on which `created` is akin to `stopped`.
pub const RUNTIME_WINDOWS: &str = "io.containerd.runtime.v1.windows";

/// Exit code reported when the exit status of a process cannot be determined.
pub const UNKNOWN_EXIT_STATUS: u32 = 255;

/// Prefix of the default checkpoint image name; the task id and a timestamp follow.
pub const CHECKPOINT_NAME_PREFIX: &str = "containerd.io/checkpoint";

/// `chrono` format of the timestamp in a default checkpoint name (`MM-DD-YYYY-HH:MM:SS`).
pub const CHECKPOINT_DATE_FORMAT: &str = "%m-%d-%Y-%H:%M:%S";

/// Label marking an image as a checkpoint.
pub const CHECKPOINT_LABEL: &str = "containerd.io/checkpoint";

/// Index annotation carrying the name of the captured source image.
pub const IMAGE_NAME_ANNOTATION: &str = "image.name";

/// Label prefix referencing content from a stored blob for garbage collection.
pub const GC_REF_CONTENT_PREFIX: &str = "containerd.io/gc.ref.content.m";

/// Default lease expiry (24 hours).
pub const DEFAULT_LEASE_EXPIRY_SECS: u64 = 24 * 60 * 60;

