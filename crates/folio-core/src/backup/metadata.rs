use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Archive entry holding the [`BackupMetadata`] record
pub const METADATA_ENTRY: &str = "metadata.json";

/// Why a backup was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    Manual,
    Auto,
    /// Safety snapshot taken right before a restore
    PreRestore,
}

/// A source tree captured by a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subtree {
    Data,
    Config,
    Schemas,
}

impl Subtree {
    pub const ALL: [Subtree; 3] = [Subtree::Data, Subtree::Config, Subtree::Schemas];

    /// Top-level directory of this subtree inside an archive
    pub fn prefix(self) -> &'static str {
        match self {
            Subtree::Data => "data",
            Subtree::Config => "config",
            Subtree::Schemas => "schemas",
        }
    }
}

/// Which subtrees an archive carries
///
/// An absent flag means "included": archives written by other tools may
/// omit it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Includes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemas: Option<bool>,
}

impl Includes {
    pub fn flag(&self, subtree: Subtree) -> Option<bool> {
        match subtree {
            Subtree::Data => self.data,
            Subtree::Config => self.config,
            Subtree::Schemas => self.schemas,
        }
    }

    pub fn set(&mut self, subtree: Subtree, included: bool) {
        let slot = match subtree {
            Subtree::Data => &mut self.data,
            Subtree::Config => &mut self.config,
            Subtree::Schemas => &mut self.schemas,
        };
        *slot = Some(included);
    }

    /// True unless the flag is explicitly `false`
    pub fn includes(&self, subtree: Subtree) -> bool {
        self.flag(subtree) != Some(false)
    }
}

/// Record embedded in every archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: BackupKind,
    /// Engine version that wrote the archive
    pub version: String,
    pub retention_until: DateTime<Utc>,
    #[serde(default)]
    pub includes: Includes,
}

impl BackupMetadata {
    pub fn new(kind: BackupKind, created_at: DateTime<Utc>, retention_days: u32) -> Self {
        Self {
            created_at,
            kind,
            version: crate::VERSION.to_string(),
            retention_until: created_at + chrono::Duration::days(i64::from(retention_days)),
            includes: Includes::default(),
        }
    }
}
