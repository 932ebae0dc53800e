//! `ctk checkpoint`: Inspect checkpoint images or restore their
//! read-write layer.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use ctk_runtime::checkpoint::CheckpointImage;

use super::LocalStores;

/// Arguments for the `checkpoint` command.
#[derive(Args, Debug)]
pub struct CheckpointArgs {
    /// Checkpoint operation.
    #[command(subcommand)]
    pub command: CheckpointCommand,
}

/// Checkpoint operations.
#[derive(Subcommand, Debug)]
pub enum CheckpointCommand {
    /// Print the checkpoint index as JSON.
    Inspect {
        /// Name of the checkpoint image.
        name: String,
    },
    /// Apply the checkpoint's read-write layer onto a directory.
    RestoreRw {
        /// Name of the checkpoint image.
        name: String,
        /// Directory to unpack into.
        target: PathBuf,
    },
}

/// Executes the `checkpoint` command.
///
/// # Errors
///
/// Returns an error if the image is missing, not a checkpoint, or the
/// layer cannot be applied.
pub async fn execute(args: CheckpointArgs, stores: &LocalStores) -> anyhow::Result<()> {
    match args.command {
        CheckpointCommand::Inspect { name } => {
            let checkpoint = load(stores, &name).await?;
            println!("{}", serde_json::to_string_pretty(checkpoint.index())?);
        }
        CheckpointCommand::RestoreRw { name, target } => {
            let checkpoint = load(stores, &name).await?;
            checkpoint.restore_rw(&stores.differ, &target).await?;
            tracing::info!(checkpoint = %name, target = %target.display(), "read-write layer restored");
            println!("{}", target.display());
        }
    }
    Ok(())
}

async fn load(stores: &LocalStores, name: &str) -> anyhow::Result<CheckpointImage> {
    Ok(CheckpointImage::load(&stores.images, stores.content.as_ref(), name).await?)
}
