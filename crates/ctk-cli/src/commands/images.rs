//! `ctk images`: List or remove images of the local catalog.

use clap::Args;
use ctk_image::registry::{Image, ImageStore};

use super::LocalStores;
use crate::output::{format_bytes, format_time, short_digest};

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Only list images produced by a checkpoint.
    #[arg(long)]
    pub checkpoints: bool,

    /// Remove an image by name.
    #[arg(long, value_name = "NAME")]
    pub remove: Option<String>,
}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if catalog operations fail.
pub async fn execute(args: ImagesArgs, stores: &LocalStores) -> anyhow::Result<()> {
    if let Some(name) = args.remove {
        stores.images.delete(&name).await?;
        tracing::info!(image = %name, "image removed");
        println!("{name}");
        return Ok(());
    }

    let images = select(stores.images.list().await?, args.checkpoints);
    if images.is_empty() {
        println!("No images found.");
        return Ok(());
    }

    println!(
        "{:<50} {:<14} {:<10} {:<11} CREATED",
        "NAME", "DIGEST", "SIZE", "CHECKPOINT"
    );
    for image in &images {
        println!(
            "{:<50} {:<14} {:<10} {:<11} {}",
            image.name,
            short_digest(&image.target.digest),
            format_bytes(image.target.size),
            if image.is_checkpoint() { "yes" } else { "no" },
            format_time(image.created_at.as_ref()),
        );
    }
    Ok(())
}

fn select(mut images: Vec<Image>, checkpoints_only: bool) -> Vec<Image> {
    if checkpoints_only {
        images.retain(Image::is_checkpoint);
    }
    images.sort_by(|a, b| a.name.cmp(&b.name));
    images
}
