//! Leases protecting content from garbage collection.
//!
//! A lease is taken for the duration of a multi-step write (such as a
//! checkpoint) and every blob written under it is recorded as a resource,
//! so partially-written content stays reachable until the lease ends.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use ctk_common::error::{CtkError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// An active lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Lease identifier.
    pub id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time after which the lease no longer protects its resources.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Whether the lease has passed its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// A resource held by a lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseResource {
    /// Resource type, e.g. `content`.
    pub kind: String,
    /// Resource identifier, e.g. a digest.
    pub id: String,
}

impl LeaseResource {
    /// A content blob resource.
    #[must_use]
    pub fn content(digest: &ctk_common::types::Digest) -> Self {
        Self {
            kind: "content".into(),
            id: digest.to_string(),
        }
    }
}

/// Creates and releases leases.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Acquires a lease valid for `expiry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease cannot be created.
    async fn create(&self, expiry: Duration) -> Result<Lease>;

    /// Records `resource` as held by `lease`.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if the lease was already released.
    async fn add_resource(&self, lease: &Lease, resource: LeaseResource) -> Result<()>;

    /// Releases a lease and everything it holds.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if the lease does not exist.
    async fn delete(&self, lease: &Lease) -> Result<()>;
}

#[derive(Debug)]
struct LeaseEntry {
    lease: Lease,
    resources: Vec<LeaseResource>,
}

/// In-process lease manager.
#[derive(Debug, Default)]
pub struct LocalLeaseManager {
    leases: Mutex<HashMap<String, LeaseEntry>>,
}

impl LocalLeaseManager {
    /// Creates an empty lease manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the currently active leases.
    pub async fn list(&self) -> Vec<Lease> {
        self.leases
            .lock()
            .await
            .values()
            .map(|entry| entry.lease.clone())
            .collect()
    }

    /// Returns the resources held by a lease.
    ///
    /// # Errors
    ///
    /// Returns `CtkError::NotFound` if the lease does not exist.
    pub async fn resources(&self, lease: &Lease) -> Result<Vec<LeaseResource>> {
        self.leases
            .lock()
            .await
            .get(&lease.id)
            .map(|entry| entry.resources.clone())
            .ok_or_else(|| CtkError::not_found(format!("lease {}", lease.id)))
    }
}

#[async_trait]
impl LeaseManager for LocalLeaseManager {
    async fn create(&self, expiry: Duration) -> Result<Lease> {
        let expiry = TimeDelta::from_std(expiry)
            .map_err(|e| CtkError::invalid_argument(format!("lease expiry: {e}")))?;
        let now = Utc::now();
        let lease = Lease {
            id: format!("ctk-{}", uuid::Uuid::new_v4()),
            created_at: now,
            expires_at: now + expiry,
        };
        let _ = self.leases.lock().await.insert(
            lease.id.clone(),
            LeaseEntry {
                lease: lease.clone(),
                resources: Vec::new(),
            },
        );
        tracing::debug!(lease = %lease.id, "lease acquired");
        Ok(lease)
    }

    async fn add_resource(&self, lease: &Lease, resource: LeaseResource) -> Result<()> {
        let mut leases = self.leases.lock().await;
        let entry = leases
            .get_mut(&lease.id)
            .ok_or_else(|| CtkError::not_found(format!("lease {}", lease.id)))?;
        if !entry.resources.contains(&resource) {
            entry.resources.push(resource);
        }
        Ok(())
    }

    async fn delete(&self, lease: &Lease) -> Result<()> {
        let removed = self.leases.lock().await.remove(&lease.id);
        match removed {
            Some(entry) => {
                tracing::debug!(
                    lease = %lease.id,
                    resources = entry.resources.len(),
                    "lease released"
                );
                Ok(())
            }
            None => Err(CtkError::not_found(format!("lease {}", lease.id))),
        }
    }
}
