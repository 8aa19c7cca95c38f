//! Plugin sync command handlers

use anyhow::{bail, Result};

use folio_core::{Engine, UpdateOutcome};

use crate::output::{Output, OutputFormat};
use crate::PluginCommands;

pub async fn run(command: PluginCommands, engine: &Engine, output: &Output) -> Result<()> {
    let plugins = engine.plugins();

    match command {
        PluginCommands::Sync { plugin: Some(plugin) } => {
            let record = plugins.sync_to_plugin(&plugin).await?;
            match output.format {
                OutputFormat::Json => output.print_json(&record)?,
                OutputFormat::Quiet => {}
                OutputFormat::Human => output.success(&format!(
                    "Synced {} module(s) to {} (core {})",
                    record.functions.len(),
                    record.plugin,
                    record.core_version
                )),
            }
        }
        PluginCommands::Sync { plugin: None } => {
            let summary = plugins.sync_functions_to_plugins().await?;
            match output.format {
                OutputFormat::Json => output.print_json(&summary)?,
                OutputFormat::Quiet => {
                    for failed in &summary.failed {
                        println!("{}", failed.plugin);
                    }
                }
                OutputFormat::Human => {
                    for record in &summary.synced {
                        println!("✓ {}", record.plugin);
                    }
                    for failed in &summary.failed {
                        println!("✗ {}: {}", failed.plugin, failed.reason);
                    }
                    println!(
                        "\n{} synced, {} failed",
                        summary.synced.len(),
                        summary.failed.len()
                    );
                }
            }
            if !summary.failed.is_empty() {
                bail!("{} package(s) failed to sync", summary.failed.len());
            }
        }
        PluginCommands::Update { plugin } => {
            let outcome = plugins.update_plugin_core(&plugin).await?;
            match output.format {
                OutputFormat::Json => output.print_json(&outcome)?,
                OutputFormat::Quiet => {}
                OutputFormat::Human => match outcome {
                    UpdateOutcome::AlreadyCurrent { version } => {
                        output.message(&format!("{} is already on core {}", plugin, version));
                    }
                    UpdateOutcome::Updated(record) => {
                        output.success(&format!(
                            "Updated {} to core {}",
                            plugin, record.core_version
                        ));
                    }
                },
            }
        }
        PluginCommands::Status => {
            let report = plugins.version_report().await?;
            output.print_plugin_statuses(&report)?;
        }
        PluginCommands::Register { plugin } => {
            plugins.register_plugin(&plugin).await?;
            output.success(&format!("Registered {}", plugin));
        }
    }

    Ok(())
}
