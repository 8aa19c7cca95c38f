//! Serve command handler

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use folio_core::backup::{CycleReport, BACKUP_CONFIG};
use folio_core::{ConfigEvent, Engine};

use crate::output::Output;

/// Run the registration listener and backup schedule until Ctrl-C
pub async fn run(engine: &Engine, output: &Output) -> Result<()> {
    let plugins = engine.plugins();
    let backups = engine.backups();

    if !plugins.is_listening().await {
        plugins.init().await?;
    }
    if !backups.is_auto_backup_running().await {
        backups.setup_auto_backup().await;
    }

    let mut config_events = engine.configs().subscribe();
    // Pick up retention changes without a restart
    engine.configs().watch_config(BACKUP_CONFIG).await?;
    let mut cycle_reports = backups.cycle_reports().await;

    output.message(&format!(
        "Serving {} (Ctrl-C to stop)",
        engine.config().root_dir.display()
    ));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("interrupted, shutting down");
                break;
            }
            event = config_events.recv() => match event {
                Ok(ConfigEvent::ReloadFailed { name, error }) => {
                    warn!(%name, %error, "config reload failed");
                }
                Ok(event) => info!(?event, "config changed"),
                // Lagged receivers just skip ahead
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            update = next_report(&mut cycle_reports) => match update {
                Some(report) if report.errors.is_empty() => {
                    info!(created = ?report.created, "backup cycle finished");
                }
                Some(report) => {
                    warn!(errors = ?report.errors, "backup cycle finished with errors");
                }
                // Schedule stopped
                None => cycle_reports = None,
            },
        }
    }

    output.message("Stopped");
    Ok(())
}

/// Wait for the next finished backup cycle; pends forever without a schedule
async fn next_report(
    reports: &mut Option<watch::Receiver<Option<CycleReport>>>,
) -> Option<CycleReport> {
    let Some(rx) = reports.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        rx.changed().await.ok()?;
        if let Some(report) = rx.borrow_and_update().clone() {
            return Some(report);
        }
    }
}
