//! Status command handler

use anyhow::Result;

use folio_core::Engine;

use crate::output::{Output, OutputFormat};

/// Show engine layout and component state
pub async fn show(engine: &Engine, output: &Output) -> Result<()> {
    let config = engine.config();
    let collections = engine.store().list_collections().await?;
    let backups = engine.backups().list_backups().await?;
    let policy = engine.backups().policy().await?;
    let core_version = engine.plugins().core_version().await?;
    let packages = engine.plugins().discover_packages().await?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "version": folio_core::VERSION,
                    "core_version": core_version,
                    "root_dir": config.root_dir,
                    "collections": collections,
                    "backups": {
                        "count": backups.len(),
                        "latest": backups.first().map(|b| &b.name),
                        "retention_days": policy.retention_days,
                        "auto_backup": engine.backups().is_auto_backup_running().await
                    },
                    "plugins": {
                        "packages": packages,
                        "bus_url": config.plugins.bus_url,
                        "listening": engine.plugins().is_listening().await
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.root_dir.display());
        }
        OutputFormat::Human => {
            println!("Folio Status");
            println!("============");
            println!();
            println!("Engine:");
            println!("  Version: {}", folio_core::VERSION);
            println!("  Core:    {}", core_version);
            println!("  Root:    {}", config.root_dir.display());
            println!();
            println!("Collections: {}", collections.len());
            for name in &collections {
                println!("  {}", name);
            }
            println!();
            println!("Backups:");
            println!("  Count:     {}", backups.len());
            if let Some(latest) = backups.first() {
                println!("  Latest:    {}", latest.name);
            }
            println!("  Retention: {} days", policy.retention_days);
            println!();
            println!("Packages: {}", packages.len());
            for name in &packages {
                println!("  {}", name);
            }
            println!(
                "  Bus: {}",
                config.plugins.bus_url.as_deref().unwrap_or("(in-process)")
            );
        }
    }

    Ok(())
}
