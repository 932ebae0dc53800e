//! Client session shared by every task handle.
//!
//! A [`Client`] bundles the remote task service with the content, image,
//! diff, lease and container collaborators. It is cheap to clone and is
//! passed explicitly; there is no process-wide instance.

use std::sync::Arc;
use std::time::Duration;

use ctk_common::config::CtkConfig;
use ctk_common::error::Result;
use ctk_image::layer::{Differ, LocalDiffer};
use ctk_image::lease::{Lease, LeaseManager, LeaseResource, LocalLeaseManager};
use ctk_image::registry::{ImageStore, LocalImageCatalog};
use ctk_image::storage::{ContentStore, LocalContentStore};

use crate::container::Container;
use crate::services::{ContainerStore, TaskService};

/// Collaborators a client session is built from.
pub struct Services {
    /// Remote task manager.
    pub tasks: Arc<dyn TaskService>,
    /// Container metadata.
    pub containers: Arc<dyn ContainerStore>,
    /// Content-addressable blob store.
    pub content: Arc<dyn ContentStore>,
    /// Named image catalog.
    pub images: Arc<dyn ImageStore>,
    /// Filesystem diff service.
    pub differ: Arc<dyn Differ>,
    /// Garbage-collection leases.
    pub leases: Arc<dyn LeaseManager>,
}

/// Handle to a client session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    services: Services,
    config: CtkConfig,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a session over the given collaborators.
    #[must_use]
    pub fn new(services: Services, config: CtkConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner { services, config }),
        }
    }

    /// Creates a session whose content, image, diff and lease services are
    /// the local implementations rooted at `config.data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the local stores cannot be opened.
    pub fn local(
        config: CtkConfig,
        tasks: Arc<dyn TaskService>,
        containers: Arc<dyn ContainerStore>,
    ) -> Result<Self> {
        let content: Arc<dyn ContentStore> =
            Arc::new(LocalContentStore::open(config.content_dir())?);
        let images = Arc::new(LocalImageCatalog::open(&config.data_dir)?);
        let differ = Arc::new(LocalDiffer::new(
            config.snapshot_root.clone(),
            Arc::clone(&content),
        ));
        tracing::debug!(data_dir = %config.data_dir.display(), "opened local stores");
        Ok(Self::new(
            Services {
                tasks,
                containers,
                content,
                images,
                differ,
                leases: Arc::new(LocalLeaseManager::new()),
            },
            config,
        ))
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &CtkConfig {
        &self.inner.config
    }

    /// Runtime used when a container does not name one.
    #[must_use]
    pub fn default_runtime(&self) -> &str {
        &self.inner.config.default_runtime
    }

    /// Remote task manager.
    #[must_use]
    pub fn task_service(&self) -> &Arc<dyn TaskService> {
        &self.inner.services.tasks
    }

    /// Container metadata.
    #[must_use]
    pub fn container_store(&self) -> &dyn ContainerStore {
        self.inner.services.containers.as_ref()
    }

    /// Content-addressable blob store.
    #[must_use]
    pub fn content_store(&self) -> &dyn ContentStore {
        self.inner.services.content.as_ref()
    }

    /// Named image catalog.
    #[must_use]
    pub fn image_store(&self) -> &dyn ImageStore {
        self.inner.services.images.as_ref()
    }

    /// Filesystem diff service.
    #[must_use]
    pub fn differ(&self) -> &dyn Differ {
        self.inner.services.differ.as_ref()
    }

    /// Returns a handle on the container `id`.
    #[must_use]
    pub fn container(&self, id: impl Into<String>) -> Container {
        Container::new(self.clone(), id.into())
    }

    /// Acquires a lease for a multi-step content write.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease manager refuses the lease.
    pub async fn with_lease(&self) -> Result<Lease> {
        let expiry = Duration::from_secs(self.inner.config.lease_expiry_secs);
        self.inner.services.leases.create(expiry).await
    }

    /// Records `resource` under `lease`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease is no longer active.
    pub async fn hold(&self, lease: &Lease, resource: LeaseResource) -> Result<()> {
        self.inner.services.leases.add_resource(lease, resource).await
    }

    /// Releases a lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease does not exist.
    pub async fn release_lease(&self, lease: &Lease) -> Result<()> {
        self.inner.services.leases.delete(lease).await
    }
}
