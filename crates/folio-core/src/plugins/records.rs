use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value of the `event` field on update notifications
pub const CORE_UPDATED: &str = "CORE_UPDATED";

/// File name of version records, both at the engine root and in packages
pub const VERSION_FILE: &str = "version";

/// `<root>/version.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreVersion {
    pub version: String,
}

/// `<package>/<mirror_dir>/version.json`, written on every sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub synced_at: DateTime<Utc>,
    pub core_version: String,
    pub functions: Vec<String>,
    pub plugin: String,
}

/// Payload a package publishes to announce itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub key: String,
}

/// Payload published after a package has been synced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreUpdated {
    pub event: String,
    pub plugin: String,
    pub version: String,
    pub synced_at: DateTime<Utc>,
    pub functions: Vec<String>,
}

impl From<&SyncRecord> for CoreUpdated {
    fn from(record: &SyncRecord) -> Self {
        Self {
            event: CORE_UPDATED.to_string(),
            plugin: record.plugin.clone(),
            version: record.core_version.clone(),
            synced_at: record.synced_at,
            functions: record.functions.clone(),
        }
    }
}

/// Installed versus latest engine version for one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginStatus {
    pub plugin: String,
    /// `None` when the package has never been synced
    pub installed: Option<String>,
    pub latest: String,
    pub synced_at: Option<DateTime<Utc>>,
    pub current: bool,
}
