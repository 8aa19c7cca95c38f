//! Engine configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/folio/config.toml)
//! 3. Environment variables (FOLIO_* prefix)
//!
//! Environment variables take precedence over config file values.
//!
//! This is the engine's own settings file. Application config documents
//! served by the [`ConfigLoader`](crate::loader::ConfigLoader) live under
//! [`EngineConfig::config_docs_path`] and are unrelated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable prefix
const ENV_PREFIX: &str = "FOLIO";

/// Core modules mirrored into dependent packages when none are configured
pub const DEFAULT_MODULES: &[&str] = &[
    "document-store",
    "query-engine",
    "schema-validator",
    "config-loader",
    "backup-manager",
];

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base directory; every unset path below defaults to a child of it
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Document collections (default `<root>/data`)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Application config documents (default `<root>/config`)
    #[serde(default)]
    pub config_dir: Option<PathBuf>,

    /// Entity schemas (default `<root>/schemas`)
    #[serde(default)]
    pub schemas_dir: Option<PathBuf>,

    /// Backup archives (default `<root>/backups`)
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub backup: BackupSettings,

    #[serde(default)]
    pub plugins: PluginSettings,
}

/// Config document cache behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// How long a loaded config document is served from cache
    #[serde(default = "default_config_ttl_secs")]
    pub config_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            config_ttl_secs: default_config_ttl_secs(),
        }
    }
}

impl CacheSettings {
    pub fn config_ttl(&self) -> Duration {
        Duration::from_secs(self.config_ttl_secs)
    }
}

/// Backup defaults, used when the `backup` config document is silent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Archives older than this many days are removed by cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// 0 stores entries uncompressed, 1-9 picks a deflate level; library
    /// default when unset
    #[serde(default)]
    pub compression_level: Option<i64>,

    /// Run the monthly backup schedule
    #[serde(default)]
    pub auto_backup: bool,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            compression_level: None,
            auto_backup: false,
        }
    }
}

/// Dependent package propagation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Directory holding dependent packages (default `<root>/packages`)
    #[serde(default)]
    pub packages_dir: Option<PathBuf>,

    /// Directory holding the core module files (default `<root>/core`)
    #[serde(default)]
    pub core_dir: Option<PathBuf>,

    /// Packages whose directory name starts with this are dependents
    #[serde(default = "default_package_prefix")]
    pub package_prefix: String,

    /// The engine's own package, never synced to itself
    #[serde(default)]
    pub own_package: Option<String>,

    /// Subdirectory of each package that receives the mirrored modules
    #[serde(default = "default_mirror_dir")]
    pub mirror_dir: String,

    /// Module file names to mirror (resolved with a `.json` extension)
    #[serde(default = "default_modules")]
    pub modules: Vec<String>,

    /// NATS server URL; the in-process bus is used when unset
    #[serde(default)]
    pub bus_url: Option<String>,

    #[serde(default = "default_register_channel")]
    pub register_channel: String,

    #[serde(default = "default_update_channel")]
    pub update_channel: String,

    /// Listen for package registrations on startup
    #[serde(default)]
    pub listen: bool,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            packages_dir: None,
            core_dir: None,
            package_prefix: default_package_prefix(),
            own_package: None,
            mirror_dir: default_mirror_dir(),
            modules: default_modules(),
            bus_url: None,
            register_channel: default_register_channel(),
            update_channel: default_update_channel(),
            listen: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_root(default_root_dir())
    }
}

impl EngineConfig {
    /// Default configuration rooted at `root_dir`
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            data_dir: None,
            config_dir: None,
            schemas_dir: None,
            backup_dir: None,
            cache: CacheSettings::default(),
            backup: BackupSettings::default(),
            plugins: PluginSettings::default(),
        }
    }

    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (FOLIO_ROOT_DIR, FOLIO_BACKUP_RETENTION_DAYS,
    ///    FOLIO_AUTO_BACKUP, FOLIO_BUS_URL)
    /// 2. Config file (~/.config/folio/config.toml or FOLIO_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: EngineConfig =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_ROOT_DIR", ENV_PREFIX)) {
            self.root_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_BACKUP_RETENTION_DAYS", ENV_PREFIX)) {
            match val.parse() {
                Ok(days) => self.backup.retention_days = days,
                Err(_) => warn!(value = %val, "ignoring invalid {}_BACKUP_RETENTION_DAYS", ENV_PREFIX),
            }
        }

        if let Ok(val) = std::env::var(format!("{}_AUTO_BACKUP", ENV_PREFIX)) {
            self.backup.auto_backup = val.eq_ignore_ascii_case("true") || val == "1";
        }

        // Empty string falls back to the in-process bus
        if let Ok(val) = std::env::var(format!("{}_BUS_URL", ENV_PREFIX)) {
            self.plugins.bus_url = if val.is_empty() { None } else { Some(val) };
        }
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with FOLIO_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("folio")
            .join("config.toml")
    }

    pub fn data_path(&self) -> PathBuf {
        self.resolve(&self.data_dir, "data")
    }

    pub fn config_docs_path(&self) -> PathBuf {
        self.resolve(&self.config_dir, "config")
    }

    pub fn schemas_path(&self) -> PathBuf {
        self.resolve(&self.schemas_dir, "schemas")
    }

    pub fn backups_path(&self) -> PathBuf {
        self.resolve(&self.backup_dir, "backups")
    }

    pub fn packages_path(&self) -> PathBuf {
        self.resolve(&self.plugins.packages_dir, "packages")
    }

    pub fn core_path(&self) -> PathBuf {
        self.resolve(&self.plugins.core_dir, "core")
    }

    /// Engine version record (`<root>/version.json`)
    pub fn version_path(&self) -> PathBuf {
        self.root_dir.join("version.json")
    }

    fn resolve(&self, explicit: &Option<PathBuf>, default: &str) -> PathBuf {
        explicit
            .clone()
            .unwrap_or_else(|| self.root_dir.join(default))
    }
}

/// Get the default root directory
fn default_root_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
}

fn default_config_ttl_secs() -> u64 {
    300
}

fn default_retention_days() -> u32 {
    90
}

fn default_package_prefix() -> String {
    "plugin-".to_string()
}

fn default_mirror_dir() -> String {
    "core".to_string()
}

fn default_modules() -> Vec<String> {
    DEFAULT_MODULES.iter().map(|m| m.to_string()).collect()
}

fn default_register_channel() -> String {
    "folio.plugins.register".to_string()
}

fn default_update_channel() -> String {
    "folio.plugins.core-updated".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "FOLIO_ROOT_DIR",
        "FOLIO_BACKUP_RETENTION_DAYS",
        "FOLIO_AUTO_BACKUP",
        "FOLIO_BUS_URL",
    ];

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.root_dir.ends_with("folio"));
        assert_eq!(config.cache.config_ttl(), Duration::from_secs(300));
        assert_eq!(config.backup.retention_days, 90);
        assert!(!config.backup.auto_backup);
        assert_eq!(config.plugins.package_prefix, "plugin-");
        assert_eq!(config.plugins.mirror_dir, "core");
        assert_eq!(config.plugins.modules.len(), DEFAULT_MODULES.len());
        assert!(config.plugins.bus_url.is_none());
    }

    #[test]
    fn test_paths_default_under_root() {
        let config = EngineConfig::with_root("/srv/folio");
        assert_eq!(config.data_path(), PathBuf::from("/srv/folio/data"));
        assert_eq!(config.config_docs_path(), PathBuf::from("/srv/folio/config"));
        assert_eq!(config.schemas_path(), PathBuf::from("/srv/folio/schemas"));
        assert_eq!(config.backups_path(), PathBuf::from("/srv/folio/backups"));
        assert_eq!(config.packages_path(), PathBuf::from("/srv/folio/packages"));
        assert_eq!(config.core_path(), PathBuf::from("/srv/folio/core"));
        assert_eq!(config.version_path(), PathBuf::from("/srv/folio/version.json"));
    }

    #[test]
    fn test_explicit_paths_win() {
        let mut config = EngineConfig::with_root("/srv/folio");
        config.backup_dir = Some(PathBuf::from("/mnt/backups"));
        assert_eq!(config.backups_path(), PathBuf::from("/mnt/backups"));
    }

    #[test]
    fn test_env_override_root_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = EngineConfig::default();

        env::set_var("FOLIO_ROOT_DIR", "/tmp/folio-test");
        config.apply_env_overrides();

        assert_eq!(config.root_dir, PathBuf::from("/tmp/folio-test"));
    }

    #[test]
    fn test_env_override_backup() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = EngineConfig::default();

        env::set_var("FOLIO_BACKUP_RETENTION_DAYS", "7");
        env::set_var("FOLIO_AUTO_BACKUP", "1");
        config.apply_env_overrides();
        assert_eq!(config.backup.retention_days, 7);
        assert!(config.backup.auto_backup);

        env::set_var("FOLIO_BACKUP_RETENTION_DAYS", "soon");
        env::set_var("FOLIO_AUTO_BACKUP", "false");
        config.apply_env_overrides();
        assert_eq!(config.backup.retention_days, 7);
        assert!(!config.backup.auto_backup);
    }

    #[test]
    fn test_env_override_bus_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = EngineConfig::default();

        env::set_var("FOLIO_BUS_URL", "nats://localhost:4222");
        config.apply_env_overrides();
        assert_eq!(
            config.plugins.bus_url,
            Some("nats://localhost:4222".to_string())
        );

        // Empty string clears it
        env::set_var("FOLIO_BUS_URL", "");
        config.apply_env_overrides();
        assert!(config.plugins.bus_url.is_none());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            root_dir = "/custom/folio"
            schemas_dir = "/shared/schemas"

            [backup]
            retention_days = 30
            compression_level = 9

            [plugins]
            package_prefix = "ext-"
            own_package = "ext-engine"
            modules = ["document-store"]
        "#;

        let config = EngineConfig::load_from_str(toml).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/custom/folio"));
        assert_eq!(config.schemas_path(), PathBuf::from("/shared/schemas"));
        assert_eq!(config.backup.retention_days, 30);
        assert_eq!(config.backup.compression_level, Some(9));
        assert_eq!(config.plugins.package_prefix, "ext-");
        assert_eq!(config.plugins.own_package.as_deref(), Some("ext-engine"));
        assert_eq!(config.plugins.modules, vec!["document-store".to_string()]);
        // Untouched sections keep their defaults
        assert_eq!(config.cache.config_ttl_secs, 300);
        assert_eq!(config.plugins.register_channel, "folio.plugins.register");
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = EngineConfig::with_root("/data/folio");
        config.plugins.bus_url = Some("nats://bus:4222".to_string());
        config.save_to(&path).unwrap();

        let parsed = EngineConfig::load_from_path(&path).unwrap();
        assert_eq!(parsed.root_dir, config.root_dir);
        assert_eq!(parsed.plugins.bus_url, config.plugins.bus_url);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = EngineConfig::load_from_path(&path).unwrap();
        assert!(!config.backup.auto_backup);
        assert!(config.plugins.bus_url.is_none());
    }
}
