//! Core module propagation to dependent packages
//!
//! Dependent packages live side by side in one directory and are recognised
//! by a name prefix:
//!
//! ```text
//! <packages>/plugin-gallery/core/document-store.json
//! <packages>/plugin-gallery/core/version.json
//! ```
//!
//! `PluginSync` copies a fixed manifest of module files from the engine's
//! core directory into each package, records the engine version it copied,
//! and announces the update on the bus. Packages announce themselves on the
//! registration channel; [`PluginSync::init`] listens there and syncs every
//! package that registers.

mod bus;
mod nats;
mod records;

pub use bus::{BusHandles, LocalBus, MessageStream, Publisher, Subscriber};
pub use nats::{NatsPublisher, NatsSubscriber};
pub use records::{
    CoreUpdated, CoreVersion, PluginStatus, Registration, SyncRecord, CORE_UPDATED, VERSION_FILE,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, PluginSettings};
use crate::error::{EngineError, EngineResult, ResourceKind};
use crate::persistence::{self, json_path, validate_name};

/// One package that could not be synced
#[derive(Debug, Clone, Serialize)]
pub struct FailedSync {
    pub plugin: String,
    pub reason: String,
}

/// Outcome of syncing every discovered package
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub synced: Vec<SyncRecord>,
    pub failed: Vec<FailedSync>,
}

/// Outcome of [`PluginSync::update_plugin_core`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    AlreadyCurrent { version: String },
    Updated(SyncRecord),
}

/// Propagates core modules to dependent packages
pub struct PluginSync {
    packages_dir: PathBuf,
    core_dir: PathBuf,
    version_file: PathBuf,
    settings: PluginSettings,
    bus: BusHandles,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PluginSync {
    pub fn new(
        packages_dir: impl Into<PathBuf>,
        core_dir: impl Into<PathBuf>,
        version_file: impl Into<PathBuf>,
        settings: PluginSettings,
        bus: BusHandles,
    ) -> Self {
        Self {
            packages_dir: packages_dir.into(),
            core_dir: core_dir.into(),
            version_file: version_file.into(),
            settings,
            bus,
            listener: Mutex::new(None),
        }
    }

    pub fn from_config(config: &EngineConfig, bus: BusHandles) -> Self {
        Self::new(
            config.packages_path(),
            config.core_path(),
            config.version_path(),
            config.plugins.clone(),
            bus,
        )
    }

    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    /// Current engine version
    ///
    /// Read from the version record when present, otherwise the crate
    /// version.
    pub async fn core_version(&self) -> EngineResult<String> {
        match fs::read(&self.version_file).await {
            Ok(bytes) => {
                let record: CoreVersion =
                    serde_json::from_slice(&bytes).map_err(|source| EngineError::Parse {
                        path: self.version_file.clone(),
                        source,
                    })?;
                Ok(record.version)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(crate::VERSION.to_string()),
            Err(e) => Err(EngineError::io(&self.version_file, e)),
        }
    }

    fn package_path(&self, plugin_id: &str) -> EngineResult<PathBuf> {
        validate_name(plugin_id)?;
        Ok(self.packages_dir.join(plugin_id))
    }

    fn mirror_path(&self, package: &Path) -> PathBuf {
        package.join(&self.settings.mirror_dir)
    }

    // ==================== Sync ====================

    /// Copy every manifest module into one package and announce it
    ///
    /// Any failure is reported as [`EngineError::SyncFailure`] for this
    /// package only. A failed announcement is logged; the sync still counts.
    pub async fn sync_to_plugin(&self, plugin_id: &str) -> EngineResult<SyncRecord> {
        let record = match self.copy_modules(plugin_id).await {
            Ok(record) => record,
            Err(e) => {
                let failure = match e {
                    EngineError::SyncFailure { .. } | EngineError::InvalidName { .. } => e,
                    other => EngineError::SyncFailure {
                        plugin: plugin_id.to_string(),
                        reason: other.to_string(),
                    },
                };
                warn!(plugin = plugin_id, error = %failure, "core sync failed");
                return Err(failure);
            }
        };

        let event = CoreUpdated::from(&record);
        let announced = match serde_json::to_vec(&event) {
            Ok(payload) => {
                self.bus
                    .publisher
                    .publish(&self.settings.update_channel, payload)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = announced {
            warn!(plugin = plugin_id, error = %e, "failed to announce core update");
        }

        info!(
            plugin = plugin_id,
            version = %record.core_version,
            modules = record.functions.len(),
            "core synced to package"
        );
        Ok(record)
    }

    async fn copy_modules(&self, plugin_id: &str) -> EngineResult<SyncRecord> {
        let package = self.package_path(plugin_id)?;
        let is_dir = fs::metadata(&package)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(EngineError::SyncFailure {
                plugin: plugin_id.to_string(),
                reason: format!("package directory {:?} not found", package),
            });
        }

        let version = self.core_version().await?;
        let target = self.mirror_path(&package);

        for module in &self.settings.modules {
            let source = json_path(&self.core_dir, module);
            let bytes = fs::read(&source)
                .await
                .map_err(|e| EngineError::SyncFailure {
                    plugin: plugin_id.to_string(),
                    reason: format!("cannot read module '{module}': {e}"),
                })?;
            persistence::atomic_write(&json_path(&target, module), &bytes).await?;
            debug!(plugin = plugin_id, module = %module, "copied module");
        }

        let record = SyncRecord {
            synced_at: Utc::now(),
            core_version: version,
            functions: self.settings.modules.clone(),
            plugin: plugin_id.to_string(),
        };
        persistence::write_json(&json_path(&target, VERSION_FILE), &record).await?;
        Ok(record)
    }

    /// Sync every discovered package independently
    pub async fn sync_functions_to_plugins(&self) -> EngineResult<SyncSummary> {
        let mut summary = SyncSummary::default();

        for plugin in self.discover_packages().await? {
            match self.sync_to_plugin(&plugin).await {
                Ok(record) => summary.synced.push(record),
                Err(e) => summary.failed.push(FailedSync {
                    plugin,
                    reason: e.to_string(),
                }),
            }
        }

        info!(
            synced = summary.synced.len(),
            failed = summary.failed.len(),
            "package sync finished"
        );
        Ok(summary)
    }

    /// Re-sync a package only when its recorded version is behind
    pub async fn update_plugin_core(&self, plugin_id: &str) -> EngineResult<UpdateOutcome> {
        let latest = self.core_version().await?;
        let installed = self.read_record(plugin_id).await?;

        if installed.as_ref().map(|r| r.core_version.as_str()) == Some(latest.as_str()) {
            debug!(plugin = plugin_id, version = %latest, "package already current");
            return Ok(UpdateOutcome::AlreadyCurrent { version: latest });
        }

        self.sync_to_plugin(plugin_id).await.map(UpdateOutcome::Updated)
    }

    // ==================== Status ====================

    /// Package directory names matching the prefix, minus the engine's own
    pub async fn discover_packages(&self) -> EngineResult<Vec<String>> {
        let mut packages = Vec::new();
        let mut entries = match fs::read_dir(&self.packages_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(packages),
            Err(e) => return Err(EngineError::io(&self.packages_dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::io(&self.packages_dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            let own = self.settings.own_package.as_deref() == Some(name.as_str());
            if is_dir && !own && name.starts_with(&self.settings.package_prefix) {
                packages.push(name);
            }
        }

        packages.sort();
        Ok(packages)
    }

    /// Last sync record of a package, `None` if never synced
    pub async fn read_record(&self, plugin_id: &str) -> EngineResult<Option<SyncRecord>> {
        let package = self.package_path(plugin_id)?;
        let path = json_path(&self.mirror_path(&package), VERSION_FILE);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| EngineError::Parse { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(&path, e)),
        }
    }

    /// Version skew of one package
    pub async fn plugin_status(&self, plugin_id: &str) -> EngineResult<PluginStatus> {
        let package = self.package_path(plugin_id)?;
        if !fs::try_exists(&package)
            .await
            .map_err(|e| EngineError::io(&package, e))?
        {
            return Err(EngineError::not_found(ResourceKind::Package, plugin_id));
        }

        let latest = self.core_version().await?;
        let record = self.read_record(plugin_id).await?;
        let installed = record.as_ref().map(|r| r.core_version.clone());

        Ok(PluginStatus {
            plugin: plugin_id.to_string(),
            current: installed.as_deref() == Some(latest.as_str()),
            installed,
            latest,
            synced_at: record.map(|r| r.synced_at),
        })
    }

    /// Version skew of every discovered package
    pub async fn version_report(&self) -> EngineResult<Vec<PluginStatus>> {
        let mut report = Vec::new();
        for plugin in self.discover_packages().await? {
            report.push(self.plugin_status(&plugin).await?);
        }
        Ok(report)
    }

    // ==================== Registration ====================

    /// Announce a package on the registration channel
    pub async fn register_plugin(&self, plugin_id: &str) -> EngineResult<()> {
        validate_name(plugin_id)?;
        let payload = serde_json::to_vec(&Registration {
            key: plugin_id.to_string(),
        })?;
        self.bus
            .publisher
            .publish(&self.settings.register_channel, payload)
            .await
    }

    /// Start syncing packages as they register
    ///
    /// The subscription is in place when this returns, so registrations
    /// published afterwards are never missed. Failures inside the listener
    /// are logged and never stop it.
    pub async fn init(self: &Arc<Self>) -> EngineResult<()> {
        let mut listener = self.listener.lock().await;
        if listener.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }

        let channel = self.settings.register_channel.clone();
        let mut registrations = self.bus.subscriber.subscribe(&channel).await?;
        let sync = Arc::clone(self);

        *listener = Some(tokio::spawn(async move {
            while let Some(payload) = registrations.next().await {
                let registration: Registration = match serde_json::from_slice(&payload) {
                    Ok(registration) => registration,
                    Err(e) => {
                        warn!(error = %e, "ignoring malformed registration");
                        continue;
                    }
                };

                debug!(plugin = %registration.key, "package registered");
                // Failures are already logged by sync_to_plugin
                let _ = sync.sync_to_plugin(&registration.key).await;
            }
            debug!("registration stream ended");
        }));

        info!(%channel, "listening for package registrations");
        Ok(())
    }

    pub async fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the registration listener
    pub async fn close(&self) {
        if let Some(task) = self.listener.lock().await.take() {
            task.abort();
            let _ = task.await;
            info!("registration listener stopped");
        }
    }
}
