//! OCI content descriptors and image indexes.
//!
//! A checkpoint is published as an [`Index`] whose manifests reference the
//! runtime state, the source image and the read-write layer diff.

use std::collections::BTreeMap;

use ctk_common::error::Result;
use ctk_common::types::Digest;
use serde::{Deserialize, Serialize};

/// Media type of an OCI image index.
pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Media type of a gzip-compressed layer tarball.
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// Media type of an uncompressed layer tarball.
pub const MEDIA_TYPE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
/// Media type of a CRIU checkpoint tarball produced by the runtime.
pub const MEDIA_TYPE_CHECKPOINT_CRIU: &str =
    "application/vnd.containerd.container.criu.checkpoint.criu.tar";
/// Media type of the checkpoint config produced by the runtime.
pub const MEDIA_TYPE_CHECKPOINT_CONFIG: &str =
    "application/vnd.containerd.container.checkpoint.config.v1+proto";

/// Free-form string annotations.
pub type Annotations = BTreeMap<String, String>;

/// Platform a piece of content was produced on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU architecture in OCI naming, e.g. `amd64`.
    pub architecture: String,
}

impl Platform {
    /// Returns the platform of the running host.
    #[must_use]
    pub fn host() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "powerpc64" => "ppc64le",
            "loongarch64" => "loong64",
            other => other,
        };
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: architecture.to_string(),
        }
    }
}

/// Reference to a blob in a content store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Digest of the referenced content.
    pub digest: Digest,
    /// Size of the referenced content in bytes.
    pub size: u64,
    /// Platform the content targets, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Arbitrary metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl Descriptor {
    /// Creates a descriptor without platform or annotations.
    #[must_use]
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            platform: None,
            annotations: Annotations::new(),
        }
    }

    /// Returns the descriptor with the given platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }
}

/// An OCI image index (manifest list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    /// Image manifest schema version, always 2.
    pub schema_version: u32,
    /// Referenced manifests in insertion order.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    /// Index-level annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            schema_version: 2,
            manifests: Vec::new(),
            annotations: Annotations::new(),
        }
    }
}

impl Index {
    /// Appends a manifest descriptor.
    pub fn push(&mut self, descriptor: Descriptor) {
        self.manifests.push(descriptor);
    }

    /// Finds the first manifest with the given media type.
    #[must_use]
    pub fn find(&self, media_type: &str) -> Option<&Descriptor> {
        self.manifests.iter().find(|d| d.media_type == media_type)
    }

    /// Serializes the index to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an index from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid index.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::digest_bytes;

    fn desc(media_type: &str, body: &[u8]) -> Descriptor {
        Descriptor::new(media_type, digest_bytes(body), body.len() as u64)
            .with_platform(Platform::host())
    }

    #[test]
    fn index_round_trip_preserves_order_and_annotations() {
        let mut d1 = desc(MEDIA_TYPE_CHECKPOINT_CRIU, b"criu");
        let _ = d1.annotations.insert("io.ctk.part".into(), "memory".into());
        let d2 = desc(MEDIA_TYPE_CHECKPOINT_CONFIG, b"config");
        let d3 = Descriptor::new("application/vnd.oci.image.manifest.v1+json", digest_bytes(b"m"), 1);
        let d4 = desc(MEDIA_TYPE_LAYER_GZIP, b"rw");

        let mut index = Index::default();
        for d in [d1, d2, d3, d4] {
            index.push(d);
        }
        let _ = index
            .annotations
            .insert(ctk_common::constants::IMAGE_NAME_ANNOTATION.into(), "foo".into());

        let parsed = Index::from_json(&index.to_json().unwrap()).unwrap();
        assert_eq!(parsed, index);
        assert_eq!(parsed.manifests[2].media_type, "application/vnd.oci.image.manifest.v1+json");
        assert_eq!(parsed.annotations.get("image.name").map(String::as_str), Some("foo"));
    }

    #[test]
    fn index_json_uses_oci_field_names() {
        let mut index = Index::default();
        index.push(desc(MEDIA_TYPE_LAYER_GZIP, b"rw"));
        let json: serde_json::Value = serde_json::from_slice(&index.to_json().unwrap()).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["manifests"][0]["mediaType"], MEDIA_TYPE_LAYER_GZIP);
        assert!(json["manifests"][0]["platform"]["architecture"].is_string());
        assert!(json.get("annotations").is_none());
    }

    #[test]
    fn host_platform_uses_oci_arch_names() {
        let platform = Platform::host();
        assert_ne!(platform.architecture, "x86_64");
        assert_ne!(platform.architecture, "aarch64");
        assert!(!platform.os.is_empty());
    }

    #[test]
    fn find_returns_first_match() {
        let mut index = Index::default();
        index.push(desc(MEDIA_TYPE_LAYER_GZIP, b"a"));
        index.push(desc(MEDIA_TYPE_CHECKPOINT_CRIU, b"b"));
        assert_eq!(
            index.find(MEDIA_TYPE_CHECKPOINT_CRIU).map(|d| d.size),
            Some(1)
        );
        assert!(index.find("missing").is_none());
    }
}
