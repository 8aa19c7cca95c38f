//! Backups
//!
//! `BackupManager` snapshots the data, config and schema trees into
//! timestamped zip archives in one directory:
//!
//! ```text
//! <backups>/backup-2024-03-01T00-00-00-000Z.zip
//! ```
//!
//! Archives are never modified once written; cleanup deletes them by file
//! age. Capture is not isolated from concurrent writers, so an archive may
//! mix state from before and after a write that raced with it.
//!
//! Retention and compression come from the `backup` config document when
//! present, falling back to the engine settings.

mod archive;
mod metadata;
mod schedule;

pub use metadata::{BackupKind, BackupMetadata, Includes, Subtree, METADATA_ENTRY};
pub use schedule::{delay_until_next_run, next_monthly_run, next_run_at, ScheduleCommand};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{BackupSettings, EngineConfig};
use crate::error::{EngineError, EngineResult, FieldError, ResourceKind};
use crate::loader::{ConfigLoader, LoadOptions};
use crate::persistence::validate_name;
use crate::schema::SchemaValidator;

use archive::Source;

/// Config document consulted for retention and compression
pub const BACKUP_CONFIG: &str = "backup";

/// Highest accepted compression level; 0 stores entries uncompressed
pub const MAX_COMPRESSION_LEVEL: i64 = 9;

const NAME_PREFIX: &str = "backup-";
const NAME_EXT: &str = ".zip";
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Effective backup settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackupPolicy {
    pub retention_days: u32,
    pub compression_level: Option<i64>,
}

impl From<&BackupSettings> for BackupPolicy {
    fn from(settings: &BackupSettings) -> Self {
        Self {
            retention_days: settings.retention_days,
            compression_level: settings.compression_level,
        }
    }
}

impl BackupPolicy {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * SECS_PER_DAY)
    }

    /// Reject settings the archive writer cannot honour
    pub fn validate(&self) -> EngineResult<()> {
        match self.compression_level {
            Some(level) if !(0..=MAX_COMPRESSION_LEVEL).contains(&level) => {
                Err(EngineError::Validation {
                    entity: BACKUP_CONFIG.to_string(),
                    errors: vec![FieldError::new(
                        "compression_level",
                        format!("must be between 0 and {MAX_COMPRESSION_LEVEL}, got {level}"),
                    )],
                })
            }
            _ => Ok(()),
        }
    }
}

/// One archive on disk
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// `None` when the archive has no readable metadata
    pub metadata: Option<BackupMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoredSubtree {
    pub subtree: &'static str,
    pub files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub name: String,
    /// Snapshot of the state that was overwritten
    pub safety_backup: String,
    pub restored: Vec<RestoredSubtree>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub failed: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub name: String,
    pub valid: bool,
    pub entries: usize,
    pub metadata: Option<BackupMetadata>,
    pub error: Option<String>,
}

/// Outcome of one scheduled create-then-clean cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub created: Option<String>,
    pub cleanup: Option<CleanupReport>,
    pub errors: Vec<String>,
}

struct ScheduleHandle {
    command_tx: mpsc::Sender<ScheduleCommand>,
    reports: watch::Receiver<Option<CycleReport>>,
    task: JoinHandle<()>,
}

/// Creates, lists, restores, verifies and prunes backup archives
pub struct BackupManager {
    dir: PathBuf,
    sources: Vec<(Subtree, PathBuf)>,
    configs: ConfigLoader,
    schemas: Option<Arc<SchemaValidator>>,
    defaults: BackupSettings,
    schedule: Mutex<Option<ScheduleHandle>>,
}

impl BackupManager {
    /// Create a manager writing archives to `dir`
    pub fn new(
        dir: impl Into<PathBuf>,
        sources: Vec<(Subtree, PathBuf)>,
        configs: ConfigLoader,
        defaults: BackupSettings,
    ) -> Self {
        Self {
            dir: dir.into(),
            sources,
            configs,
            schemas: None,
            defaults,
            schedule: Mutex::new(None),
        }
    }

    /// Also drop `schemas`' caches after a restore
    pub fn with_schemas(mut self, schemas: Arc<SchemaValidator>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    /// Manager covering the data, config and schema trees of `config`
    pub fn from_config(config: &EngineConfig, configs: ConfigLoader) -> Self {
        Self::new(
            config.backups_path(),
            vec![
                (Subtree::Data, config.data_path()),
                (Subtree::Config, config.config_docs_path()),
                (Subtree::Schemas, config.schemas_path()),
            ],
            configs,
            config.backup.clone(),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Retention and compression currently in effect
    pub async fn policy(&self) -> EngineResult<BackupPolicy> {
        let mut policy = BackupPolicy::from(&self.defaults);

        let config = match self.configs.load(BACKUP_CONFIG, LoadOptions::default()).await {
            Ok(config) => Some(config),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(config) = config {
            if let Some(days) = config.get("retention_days") {
                policy.retention_days = serde_json::from_value(days.clone())?;
            }
            if let Some(level) = config.get("compression_level") {
                policy.compression_level = serde_json::from_value(level.clone())?;
            }
        }
        policy.validate()?;
        Ok(policy)
    }

    // ==================== Create ====================

    /// Take a manual backup
    pub async fn create_backup(&self) -> EngineResult<BackupInfo> {
        self.create(BackupKind::Manual).await
    }

    /// Take a backup of the given kind
    pub async fn create(&self, kind: BackupKind) -> EngineResult<BackupInfo> {
        let policy = self.policy().await?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| EngineError::io(&self.dir, e))?;

        let created_at = Utc::now();
        let name = self.unused_name(created_at).await?;
        let path = self.dir.join(&name);
        let metadata = BackupMetadata::new(kind, created_at, policy.retention_days);
        let sources: Vec<Source> = self
            .sources
            .iter()
            .map(|(subtree, dir)| Source {
                subtree: *subtree,
                dir: dir.clone(),
            })
            .collect();

        let dest = path.clone();
        let entries = tokio::task::spawn_blocking(move || {
            archive::write_archive(&dest, &sources, metadata, policy.compression_level)
        })
        .await??;

        info!(backup = %name, ?kind, entries, "backup created");
        self.info(&name).await
    }

    /// `backup-<timestamp>.zip`, suffixed when that name is taken
    async fn unused_name(&self, created_at: DateTime<Utc>) -> EngineResult<String> {
        let stamp = created_at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string();
        let mut name = format!("{NAME_PREFIX}{stamp}{NAME_EXT}");
        let mut suffix = 1;
        while fs::try_exists(self.dir.join(&name))
            .await
            .map_err(|e| EngineError::io(&self.dir, e))?
        {
            name = format!("{NAME_PREFIX}{stamp}-{suffix}{NAME_EXT}");
            suffix += 1;
        }
        Ok(name)
    }

    // ==================== Inspect ====================

    /// Path of an existing archive
    async fn existing(&self, name: &str) -> EngineResult<PathBuf> {
        validate_name(name)?;
        let path = self.dir.join(name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(EngineError::not_found(ResourceKind::Backup, name)),
            Err(e) => Err(EngineError::from_io(e, path, ResourceKind::Backup, name)),
        }
    }

    /// Describe one archive, reading its metadata opportunistically
    pub async fn info(&self, name: &str) -> EngineResult<BackupInfo> {
        let path = self.existing(name).await?;
        let stat = fs::metadata(&path)
            .await
            .map_err(|e| EngineError::io(&path, e))?;
        let modified = stat.modified().map_err(|e| EngineError::io(&path, e))?;

        let archive_path = path.clone();
        let archive_name = name.to_string();
        let metadata = match tokio::task::spawn_blocking(move || {
            archive::read_metadata(&archive_path, &archive_name)
        })
        .await?
        {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                debug!(backup = name, error = %e, "no readable backup metadata");
                None
            }
        };

        Ok(BackupInfo {
            name: name.to_string(),
            path,
            size: stat.len(),
            modified: DateTime::<Utc>::from(modified),
            metadata,
        })
    }

    /// Every archive, newest first by modification time
    pub async fn list_backups(&self) -> EngineResult<Vec<BackupInfo>> {
        let mut backups = Vec::new();
        for name in self.archive_names().await? {
            match self.info(&name).await {
                Ok(info) => backups.push(info),
                // Deleted between listing and stat
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        backups.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(backups)
    }

    async fn archive_names(&self) -> EngineResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(EngineError::io(&self.dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::io(&self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_archive_name(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Structural check of one archive
    ///
    /// Only a missing archive is an error. An unreadable archive or one
    /// without parseable metadata yields a report with `valid == false`.
    pub async fn verify_backup(&self, name: &str) -> EngineResult<VerifyReport> {
        let path = self.existing(name).await?;
        let archive_name = name.to_string();
        let inspection =
            tokio::task::spawn_blocking(move || archive::inspect(&path, &archive_name)).await?;

        let report = match inspection {
            Ok(inspection) => match inspection.metadata {
                Ok(metadata) => VerifyReport {
                    name: name.to_string(),
                    valid: true,
                    entries: inspection.entries,
                    metadata: Some(metadata),
                    error: None,
                },
                Err(reason) => VerifyReport {
                    name: name.to_string(),
                    valid: false,
                    entries: inspection.entries,
                    metadata: None,
                    error: Some(reason),
                },
            },
            Err(e) => VerifyReport {
                name: name.to_string(),
                valid: false,
                entries: 0,
                metadata: None,
                error: Some(e.to_string()),
            },
        };

        if !report.valid {
            warn!(backup = name, error = ?report.error, "backup failed verification");
        }
        Ok(report)
    }

    // ==================== Restore ====================

    /// Replace live trees with the contents of an archive
    ///
    /// A `pre-restore` backup of the current state is taken first. Each
    /// subtree is restored unless the archive's metadata explicitly marks it
    /// as not included.
    pub async fn restore_backup(&self, name: &str) -> EngineResult<RestoreReport> {
        let path = self.existing(name).await?;

        let safety = self.create(BackupKind::PreRestore).await?;
        info!(backup = name, safety = %safety.name, "restoring backup");

        let archive_path = path.clone();
        let archive_name = name.to_string();
        let metadata = tokio::task::spawn_blocking(move || {
            archive::read_metadata(&archive_path, &archive_name)
        })
        .await??;

        let mut restored = Vec::new();
        for (subtree, dir) in &self.sources {
            if !metadata.includes.includes(*subtree) {
                debug!(backup = name, subtree = subtree.prefix(), "subtree not in archive");
                continue;
            }

            let archive_path = path.clone();
            let archive_name = name.to_string();
            let subtree = *subtree;
            let dest = dir.clone();
            let files = tokio::task::spawn_blocking(move || {
                archive::restore_subtree(&archive_path, &archive_name, subtree, &dest)
            })
            .await??;

            debug!(backup = name, subtree = subtree.prefix(), files, "restored subtree");
            restored.push(RestoredSubtree {
                subtree: subtree.prefix(),
                files,
            });
        }

        self.configs.clear_cache().await;
        if let Some(schemas) = &self.schemas {
            schemas.clear_cache().await;
        }
        info!(backup = name, "backup restored");
        Ok(RestoreReport {
            name: name.to_string(),
            safety_backup: safety.name,
            restored,
        })
    }

    // ==================== Delete ====================

    /// Delete archives older than the retention window
    ///
    /// Per-archive failures are logged and reported; the remaining archives
    /// are still processed.
    pub async fn clean_old_backups(&self) -> EngineResult<CleanupReport> {
        let retention = self.policy().await?.retention();
        let now = SystemTime::now();
        let mut report = CleanupReport::default();

        for name in self.archive_names().await? {
            let path = self.dir.join(&name);
            let modified = match fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(backup = %name, error = %e, "cannot read backup age");
                    report.failed.push(CleanupFailure {
                        name,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            // mtime in the future counts as fresh
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= retention {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    info!(backup = %name, age_days = age.as_secs() / SECS_PER_DAY, "deleted old backup");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(backup = %name, error = %e, "failed to delete old backup");
                    report.failed.push(CleanupFailure {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Delete one archive
    pub async fn delete_backup(&self, name: &str) -> EngineResult<()> {
        let path = self.existing(name).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| EngineError::from_io(e, path.clone(), ResourceKind::Backup, name))?;
        info!(backup = name, "deleted backup");
        Ok(())
    }

    // ==================== Schedule ====================

    /// Run one create-then-clean cycle, logging instead of failing
    pub async fn run_backup_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.create(BackupKind::Auto).await {
            Ok(info) => report.created = Some(info.name),
            Err(e) => {
                error!(error = %e, "scheduled backup failed");
                report.errors.push(format!("create: {e}"));
            }
        }

        match self.clean_old_backups().await {
            Ok(cleanup) => report.cleanup = Some(cleanup),
            Err(e) => {
                error!(error = %e, "scheduled backup cleanup failed");
                report.errors.push(format!("cleanup: {e}"));
            }
        }

        report
    }

    /// Start the monthly backup task (first day of the month, local midnight)
    ///
    /// Calling this while the task is running is a no-op.
    pub async fn setup_auto_backup(self: &Arc<Self>) {
        let mut schedule = self.schedule.lock().await;
        if schedule.as_ref().is_some_and(|handle| !handle.task.is_finished()) {
            return;
        }

        let (command_tx, command_rx) = mpsc::channel(4);
        let (report_tx, reports) = watch::channel(None);
        let task = tokio::spawn(schedule_loop(Arc::clone(self), command_rx, report_tx));

        *schedule = Some(ScheduleHandle {
            command_tx,
            reports,
            task,
        });
        info!("auto backup scheduled");
    }

    /// Stop the monthly backup task and wait for it to finish
    pub async fn stop_auto_backup(&self) {
        let Some(handle) = self.schedule.lock().await.take() else {
            return;
        };

        let _ = handle.command_tx.send(ScheduleCommand::Shutdown).await;
        if let Err(e) = handle.task.await {
            warn!(error = %e, "auto backup task ended abnormally");
        }
        info!("auto backup stopped");
    }

    pub async fn is_auto_backup_running(&self) -> bool {
        self.schedule
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Ask the scheduled task to run a cycle now
    ///
    /// Returns false when no schedule is installed.
    pub async fn trigger_auto_backup(&self) -> bool {
        let schedule = self.schedule.lock().await;
        match schedule.as_ref() {
            Some(handle) => handle.command_tx.send(ScheduleCommand::RunNow).await.is_ok(),
            None => false,
        }
    }

    /// Watch the report of the most recent scheduled cycle
    pub async fn cycle_reports(&self) -> Option<watch::Receiver<Option<CycleReport>>> {
        self.schedule
            .lock()
            .await
            .as_ref()
            .map(|handle| handle.reports.clone())
    }
}

async fn schedule_loop(
    manager: Arc<BackupManager>,
    mut command_rx: mpsc::Receiver<ScheduleCommand>,
    report_tx: watch::Sender<Option<CycleReport>>,
) {
    loop {
        let (delay, scheduled) = match delay_until_next_run(Local::now()) {
            Some(delay) => {
                debug!(delay_secs = delay.as_secs(), "next auto backup scheduled");
                (delay, true)
            }
            None => {
                warn!("cannot place next auto backup in local time, retrying later");
                (schedule::RETRY_DELAY, false)
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                if !scheduled {
                    continue;
                }
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ScheduleCommand::RunNow) => {}
                    Some(ScheduleCommand::Shutdown) | None => break,
                }
            }
        }

        let report = manager.run_backup_cycle().await;
        let _ = report_tx.send(Some(report));
    }
}

fn is_archive_name(name: &str) -> bool {
    name.starts_with(NAME_PREFIX) && name.ends_with(NAME_EXT)
}
