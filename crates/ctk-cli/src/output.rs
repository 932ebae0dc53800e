//! Formatted output helpers for CLI commands.

use chrono::{DateTime, Utc};
use ctk_common::types::Digest;

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// First twelve hex characters of a digest, or `-` for an empty one.
#[must_use]
pub fn short_digest(digest: &Digest) -> &str {
    if digest.is_empty() {
        return "-";
    }
    let hex = digest.hex();
    hex.get(..12).unwrap_or(hex)
}

/// Renders a timestamp the way listings show it.
#[must_use]
pub fn format_time(time: Option<&DateTime<Utc>>) -> String {
    time.map_or_else(
        || "-".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_displays_bytes() {
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn format_bytes_displays_kib() {
        assert_eq!(format_bytes(2048), "2.0 KiB");
    }

    #[test]
    fn format_bytes_displays_gib() {
        assert_eq!(format_bytes(2_147_483_648), "2.0 GiB");
    }

    #[test]
    fn short_digest_truncates_hex() {
        let digest: Digest = format!("sha256:{}", "ab".repeat(32)).parse().unwrap();
        assert_eq!(short_digest(&digest), "abababababab");
        assert_eq!(short_digest(&Digest::default()), "-");
    }

    #[test]
    fn missing_time_renders_dash() {
        assert_eq!(format_time(None), "-");
        let t = DateTime::parse_from_rfc3339("2024-03-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_time(Some(&t)), "2024-03-01 10:20:30");
    }
}
