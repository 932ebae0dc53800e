//! `ctk containers`: List local container records.

use clap::Args;
use ctk_runtime::services::ContainerStore;

use super::LocalStores;
use crate::output::format_time;

/// Arguments for the `containers` command.
#[derive(Args, Debug)]
pub struct ContainersArgs {
    /// Print records as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `containers` command.
///
/// # Errors
///
/// Returns an error if the container store cannot be read.
pub async fn execute(args: ContainersArgs, stores: &LocalStores) -> anyhow::Result<()> {
    let containers = stores.containers.list().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
        return Ok(());
    }
    if containers.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    println!(
        "{:<24} {:<24} {:<40} {:<20} CREATED",
        "ID", "RUNTIME", "IMAGE", "SNAPSHOT"
    );
    for record in &containers {
        println!(
            "{:<24} {:<24} {:<40} {:<20} {}",
            record.id.as_str(),
            or_dash(&record.runtime.name),
            or_dash(&record.image),
            or_dash(&record.snapshot_key),
            format_time(Some(&record.created_at)),
        );
    }
    Ok(())
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}
