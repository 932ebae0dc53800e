//! `ctk content`: Read blobs of the content store.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};
use ctk_common::types::Digest;
use ctk_image::storage::ContentStore;
use tokio::io::AsyncWriteExt;

use super::LocalStores;
use crate::output::format_bytes;

/// Arguments for the `content` command.
#[derive(Args, Debug)]
pub struct ContentArgs {
    /// Content operation.
    #[command(subcommand)]
    pub command: ContentCommand,
}

/// Content operations.
#[derive(Subcommand, Debug)]
pub enum ContentCommand {
    /// Write a blob to stdout or a file.
    Get {
        /// Digest of the blob (`sha256:<hex>`).
        digest: Digest,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show size and labels of a blob.
    Info {
        /// Digest of the blob (`sha256:<hex>`).
        digest: Digest,
    },
}

/// Executes the `content` command.
///
/// # Errors
///
/// Returns an error if the blob is missing or cannot be written out.
pub async fn execute(args: ContentArgs, stores: &LocalStores) -> anyhow::Result<()> {
    match args.command {
        ContentCommand::Get { digest, output } => {
            let data = stores.content.read(&digest).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &data)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    tracing::info!(%digest, path = %path.display(), "blob written");
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
        ContentCommand::Info { digest } => {
            let info = stores.content.info(&digest).await?;
            println!("DIGEST: {}", info.digest);
            println!("SIZE:   {} ({})", info.size, format_bytes(info.size));
            for (key, value) in &info.labels {
                println!("LABEL:  {key}={value}");
            }
        }
    }
    Ok(())
}
