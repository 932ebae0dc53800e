//! CLI command definitions and dispatch.

pub mod checkpoint;
pub mod containers;
pub mod content;
pub mod images;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ctk_common::config::CtkConfig;
use ctk_image::layer::LocalDiffer;
use ctk_image::registry::LocalImageCatalog;
use ctk_image::storage::{ContentStore, LocalContentStore};
use ctk_runtime::state::LocalContainerStore;

/// ctk: inspect tasks, checkpoints and content of a local store.
#[derive(Parser, Debug)]
#[command(name = "ctk", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to a JSON configuration file.
    #[arg(long, global = true, env = "CTK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

impl Cli {
    /// Resolves the configuration: file (or defaults), then environment,
    /// then command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is invalid.
    pub fn resolve_config(&self) -> anyhow::Result<CtkConfig> {
        let config = match &self.config {
            Some(path) => CtkConfig::load(path)
                .with_context(|| format!("loading configuration {}", path.display()))?,
            None => CtkConfig::default(),
        };
        let mut config = config.from_env();
        if let Some(dir) = &self.data_dir {
            config.snapshot_root = dir.join("snapshots");
            config.data_dir.clone_from(dir);
        }
        Ok(config)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List or remove images of the local catalog.
    Images(images::ImagesArgs),
    /// List local container records.
    Containers(containers::ContainersArgs),
    /// Inspect or restore checkpoint images.
    Checkpoint(checkpoint::CheckpointArgs),
    /// Read blobs of the content store.
    Content(content::ContentArgs),
}

/// Local stores the commands operate on.
pub struct LocalStores {
    /// Content-addressable blob store.
    pub content: Arc<LocalContentStore>,
    /// Image catalog.
    pub images: LocalImageCatalog,
    /// Container records.
    pub containers: LocalContainerStore,
    /// Snapshot differ.
    pub differ: LocalDiffer,
}

impl LocalStores {
    /// Opens every store under the configured data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a store directory cannot be created.
    pub fn open(config: &CtkConfig) -> anyhow::Result<Self> {
        let content = Arc::new(LocalContentStore::open(config.content_dir())?);
        let differ = LocalDiffer::new(
            config.snapshot_root.clone(),
            Arc::clone(&content) as Arc<dyn ContentStore>,
        );
        Ok(Self {
            images: LocalImageCatalog::open(&config.data_dir)?,
            containers: LocalContainerStore::open(&config.data_dir)?,
            content,
            differ,
        })
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve_config()?;
    tracing::debug!(data_dir = %config.data_dir.display(), "resolved configuration");
    let stores = LocalStores::open(&config)?;
    match cli.command {
        Command::Images(args) => images::execute(args, &stores).await,
        Command::Containers(args) => containers::execute(args, &stores).await,
        Command::Checkpoint(args) => checkpoint::execute(args, &stores).await,
        Command::Content(args) => content::execute(args, &stores).await,
    }
}
