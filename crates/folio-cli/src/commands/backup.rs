//! Backup command handlers

use anyhow::{bail, Result};

use folio_core::Engine;

use crate::output::{Output, OutputFormat};
use crate::BackupCommands;

pub async fn run(command: BackupCommands, engine: &Engine, output: &Output) -> Result<()> {
    let backups = engine.backups();

    match command {
        BackupCommands::Create => {
            let info = backups.create_backup().await?;
            match output.format {
                OutputFormat::Json => output.print_json(&info)?,
                OutputFormat::Quiet => println!("{}", info.name),
                OutputFormat::Human => output.success(&format!("Created {}", info.name)),
            }
        }
        BackupCommands::List => {
            let list = backups.list_backups().await?;
            output.print_backups(&list)?;
        }
        BackupCommands::Verify { name } => {
            let report = backups.verify_backup(&name).await?;
            match output.format {
                OutputFormat::Json => output.print_json(&report)?,
                OutputFormat::Quiet => {}
                OutputFormat::Human => {
                    if report.valid {
                        output.success(&format!("{} is valid ({} entries)", name, report.entries));
                    } else {
                        println!(
                            "✗ {} is not restorable: {}",
                            name,
                            report.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
            }
            if !report.valid {
                bail!("backup {} failed verification", name);
            }
        }
        BackupCommands::Restore { name } => {
            let report = backups.restore_backup(&name).await?;
            match output.format {
                OutputFormat::Json => output.print_json(&report)?,
                OutputFormat::Quiet => {}
                OutputFormat::Human => {
                    for subtree in &report.restored {
                        println!("  {}: {} file(s)", subtree.subtree, subtree.files);
                    }
                    output.success(&format!(
                        "Restored {} (previous state saved as {})",
                        report.name, report.safety_backup
                    ));
                }
            }
        }
        BackupCommands::Clean => {
            let report = backups.clean_old_backups().await?;
            match output.format {
                OutputFormat::Json => output.print_json(&report)?,
                OutputFormat::Quiet => {
                    for name in &report.deleted {
                        println!("{}", name);
                    }
                }
                OutputFormat::Human => {
                    for failure in &report.failed {
                        println!("✗ {}: {}", failure.name, failure.reason);
                    }
                    output.success(&format!("Deleted {} old backup(s)", report.deleted_count()));
                }
            }
        }
        BackupCommands::Delete { name } => {
            backups.delete_backup(&name).await?;
            output.success(&format!("Deleted {}", name));
        }
    }

    Ok(())
}
