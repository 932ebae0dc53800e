//! # ctk-image
//!
//! Content and image management for the ctk task controller.
//!
//! Handles:
//! - **OCI model**: Descriptors, platforms and image indexes.
//! - **Hashing**: SHA-256 content digests.
//! - **Storage**: Content-addressable blob store.
//! - **Registry**: Named image catalog.
//! - **Layers**: Filesystem diffs of read-write snapshots.
//! - **Leases**: Garbage-collection protection for multi-step writes.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod layer;
pub mod lease;
pub mod oci;
pub mod registry;
pub mod storage;
