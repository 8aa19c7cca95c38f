//! Named configuration documents
//!
//! `ConfigLoader` serves JSON documents from `<config>/<name>.json` through a
//! TTL cache. A cached value is at most `ttl` old when returned by `load`;
//! with a watch installed, a change on disk replaces the entry after the
//! watcher's notification latency plus one reload.
//!
//! Cache entries are only ever replaced wholesale. Every replacement and
//! invalidation is announced on a broadcast channel (see
//! [`ConfigLoader::subscribe`]).

mod merge;
mod watcher;

pub use merge::{deep_merge, merge_into};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::fs;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult, ResourceKind};
use crate::persistence::{self, json_path, validate_name};
use crate::query::lookup_path;

use watcher::FileWatch;

/// Directory under the config root holding per-plugin overrides
pub const PLUGIN_OVERRIDES_DIR: &str = "plugins";

const EVENT_CAPACITY: usize = 64;

/// Options for [`ConfigLoader::load`]
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Serve a fresh-enough cached value instead of reading the file
    pub use_cache: bool,
    /// Install a file watch after loading
    pub watch: bool,
    /// Maximum cache age; the loader default when `None`
    pub ttl: Option<Duration>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            watch: false,
            ttl: None,
        }
    }
}

impl LoadOptions {
    /// Always read from disk
    pub fn fresh() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn watched() -> Self {
        Self {
            watch: true,
            ..Self::default()
        }
    }
}

/// Cache change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    /// A watched document was reloaded after a change on disk
    Reloaded { name: String },
    /// A watched document changed but could not be reloaded; the previous
    /// value is still cached
    ReloadFailed { name: String, error: String },
    /// A cache entry was dropped (by `save`, `invalidate` or `clear_cache`)
    Invalidated { name: String },
}

struct CacheEntry {
    data: Arc<Value>,
    loaded_at: Instant,
    source: PathBuf,
}

struct WatchHandle {
    _watch: FileWatch,
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct LoaderInner {
    dir: PathBuf,
    default_ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
    watches: Mutex<HashMap<String, WatchHandle>>,
    events: broadcast::Sender<ConfigEvent>,
    disk_reads: AtomicU64,
}

impl LoaderInner {
    fn path(&self, name: &str) -> EngineResult<PathBuf> {
        validate_name(name)?;
        Ok(json_path(&self.dir, name))
    }

    async fn read_file(&self, path: &Path, name: &str) -> EngineResult<Value> {
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        let bytes = fs::read(path)
            .await
            .map_err(|e| EngineError::from_io(e, path.to_path_buf(), ResourceKind::Config, name))?;
        serde_json::from_slice(&bytes).map_err(|source| EngineError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read `name` from disk and replace its cache entry
    async fn refresh(&self, name: &str) -> EngineResult<Arc<Value>> {
        let path = self.path(name)?;
        let data = Arc::new(self.read_file(&path, name).await?);

        self.cache.write().await.insert(
            name.to_string(),
            CacheEntry {
                data: Arc::clone(&data),
                loaded_at: Instant::now(),
                source: path,
            },
        );
        debug!(config = name, "loaded config");
        Ok(data)
    }

    /// Reload after a change on disk, keeping the last good value on failure
    async fn reload(&self, name: &str) {
        match self.refresh(name).await {
            Ok(_) => {
                info!(config = name, "config reloaded");
                self.announce(ConfigEvent::Reloaded {
                    name: name.to_string(),
                });
            }
            Err(e) => {
                warn!(config = name, error = %e, "config reload failed, keeping previous value");
                self.announce(ConfigEvent::ReloadFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn announce(&self, event: ConfigEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Cached loader for named configuration documents
#[derive(Clone)]
pub struct ConfigLoader {
    inner: Arc<LoaderInner>,
}

impl ConfigLoader {
    /// Create a loader for documents in `dir`, cached for `default_ttl`
    pub fn new(dir: impl Into<PathBuf>, default_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(LoaderInner {
                dir: dir.into(),
                default_ttl,
                cache: RwLock::new(HashMap::new()),
                watches: Mutex::new(HashMap::new()),
                events,
                disk_reads: AtomicU64::new(0),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Receive cache change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.inner.events.subscribe()
    }

    /// File a cached document was loaded from
    pub async fn source_path(&self, name: &str) -> Option<PathBuf> {
        self.inner
            .cache
            .read()
            .await
            .get(name)
            .map(|entry| entry.source.clone())
    }

    /// Number of config files read from disk so far
    pub fn disk_reads(&self) -> u64 {
        self.inner.disk_reads.load(Ordering::Relaxed)
    }

    // ==================== Loading ====================

    /// Load a config document
    ///
    /// Returns the cached value when caching is enabled and the entry is
    /// younger than the TTL; otherwise reads the file and replaces the entry.
    pub async fn load(&self, name: &str, options: LoadOptions) -> EngineResult<Arc<Value>> {
        validate_name(name)?;
        let ttl = options.ttl.unwrap_or(self.inner.default_ttl);

        let cached = if options.use_cache {
            self.inner
                .cache
                .read()
                .await
                .get(name)
                .filter(|entry| entry.loaded_at.elapsed() < ttl)
                .map(|entry| Arc::clone(&entry.data))
        } else {
            None
        };

        let data = match cached {
            Some(data) => data,
            None => self.inner.refresh(name).await?,
        };

        if options.watch {
            self.watch_config(name).await?;
        }
        Ok(data)
    }

    /// Value at a dotted path, or `default` when any segment is absent
    pub async fn get(&self, name: &str, path: &str, default: Value) -> EngineResult<Value> {
        let config = self.load(name, LoadOptions::default()).await?;
        Ok(lookup_path(&config, path).cloned().unwrap_or(default))
    }

    /// Typed value at a dotted path; `None` when absent
    pub async fn get_as<T: DeserializeOwned>(&self, name: &str, path: &str) -> EngineResult<Option<T>> {
        let config = self.load(name, LoadOptions::default()).await?;
        match lookup_path(&config, path) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Loaded config with `overrides` deep-merged over it; nothing is saved
    pub async fn merge(&self, name: &str, overrides: &Value) -> EngineResult<Value> {
        let base = self.load(name, LoadOptions::default()).await?;
        Ok(deep_merge(&base, overrides))
    }

    /// Config as seen by one plugin
    ///
    /// The base document is deep-merged with
    /// `<config>/plugins/<plugin_id>/<name>.json` when that exists. Either
    /// side may be missing, not both.
    pub async fn load_for_plugin(&self, plugin_id: &str, name: &str) -> EngineResult<Value> {
        validate_name(plugin_id)?;
        let base = match self.load(name, LoadOptions::default()).await {
            Ok(base) => Some(base),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let overlay_path = json_path(
            &self.inner.dir.join(PLUGIN_OVERRIDES_DIR).join(plugin_id),
            name,
        );
        let overlay = match self.inner.read_file(&overlay_path, name).await {
            Ok(overlay) => Some(overlay),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        match (base, overlay) {
            (Some(base), Some(overlay)) => Ok(deep_merge(&base, &overlay)),
            (Some(base), None) => Ok((*base).clone()),
            (None, Some(overlay)) => Ok(overlay),
            (None, None) => Err(EngineError::not_found(ResourceKind::Config, name)),
        }
    }

    // ==================== Writing ====================

    /// Persist a config document and drop its cache entry
    pub async fn save(&self, name: &str, data: &Value) -> EngineResult<()> {
        let path = self.inner.path(name)?;
        persistence::write_json(&path, data).await?;
        debug!(config = name, "saved config");
        self.invalidate(name).await;
        Ok(())
    }

    /// Drop one cache entry; the next `load` reads from disk
    pub async fn invalidate(&self, name: &str) {
        self.inner.cache.write().await.remove(name);
        self.inner.announce(ConfigEvent::Invalidated {
            name: name.to_string(),
        });
    }

    /// Drop every cache entry
    pub async fn clear_cache(&self) {
        let names: Vec<String> = self.inner.cache.write().await.drain().map(|(k, _)| k).collect();
        for name in names {
            self.inner.announce(ConfigEvent::Invalidated { name });
        }
    }

    // ==================== Watching ====================

    /// Reload `name` whenever its file changes
    ///
    /// Installing a second watch for the same name is a no-op.
    pub async fn watch_config(&self, name: &str) -> EngineResult<()> {
        let path = self.inner.path(name)?;
        let mut watches = self.inner.watches.lock().await;
        if watches.contains_key(name) {
            return Ok(());
        }

        fs::create_dir_all(&self.inner.dir)
            .await
            .map_err(|e| EngineError::io(&self.inner.dir, e))?;
        let (watch, mut changes) = FileWatch::new(&path)?;

        let weak: Weak<LoaderInner> = Arc::downgrade(&self.inner);
        let watched = name.to_string();
        let task = tokio::spawn(async move {
            while changes.recv().await.is_some() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.reload(&watched).await;
            }
        });

        watches.insert(name.to_string(), WatchHandle { _watch: watch, task });
        info!(config = name, path = ?path, "watching config");
        Ok(())
    }

    /// Stop watching `name`; returns whether a watch was installed
    pub async fn unwatch(&self, name: &str) -> bool {
        self.inner.watches.lock().await.remove(name).is_some()
    }

    /// Names with an active watch
    pub async fn watched(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.watches.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every watch
    pub async fn close(&self) {
        let mut watches = self.inner.watches.lock().await;
        if !watches.is_empty() {
            debug!(count = watches.len(), "stopping config watches");
        }
        watches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, value: Value) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(json_path(dir, name), value.to_string()).unwrap();
    }

    fn loader(temp_dir: &TempDir) -> ConfigLoader {
        ConfigLoader::new(temp_dir.path(), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_load_within_ttl_hits_cache() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "site", json!({"title": "One"}));
        let loader = loader(&temp_dir);

        let options = LoadOptions::with_ttl(Duration::from_millis(200));
        let first = loader.load("site", options).await.unwrap();
        let second = loader.load("site", options).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.disk_reads(), 1);
        assert_eq!(
            loader.source_path("site").await,
            Some(temp_dir.path().join("site.json"))
        );

        write(temp_dir.path(), "site", json!({"title": "Two"}));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let third = loader.load("site", options).await.unwrap();
        assert_eq!(loader.disk_reads(), 2);
        assert_eq!(third["title"], json!("Two"));
    }

    #[tokio::test]
    async fn test_load_fresh_bypasses_cache() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "site", json!({}));
        let loader = loader(&temp_dir);

        loader.load("site", LoadOptions::default()).await.unwrap();
        loader.load("site", LoadOptions::fresh()).await.unwrap();
        assert_eq!(loader.disk_reads(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let loader = loader(&temp_dir);

        let err = loader.load("nope", LoadOptions::default()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: ResourceKind::Config,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_load_malformed_is_io_kind() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("bad.json"), "{ nope").unwrap();
        let loader = loader(&temp_dir);

        let err = loader.load("bad", LoadOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn test_get_dotted_path_and_default() {
        let temp_dir = TempDir::new().unwrap();
        write(
            temp_dir.path(),
            "site",
            json!({"theme": {"colors": {"primary": "#333"}}}),
        );
        let loader = loader(&temp_dir);

        assert_eq!(
            loader.get("site", "theme.colors.primary", json!(null)).await.unwrap(),
            json!("#333")
        );
        assert_eq!(
            loader.get("site", "theme.fonts.body", json!("serif")).await.unwrap(),
            json!("serif")
        );

        let primary: Option<String> = loader.get_as("site", "theme.colors.primary").await.unwrap();
        assert_eq!(primary.as_deref(), Some("#333"));
        let missing: Option<u32> = loader.get_as("site", "theme.size").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_merge_does_not_persist() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "site", json!({"a": {"b": 1, "c": 2}}));
        let loader = loader(&temp_dir);

        let merged = loader.merge("site", &json!({"a": {"c": 3}})).await.unwrap();
        assert_eq!(merged, json!({"a": {"b": 1, "c": 3}}));

        let stored = loader.load("site", LoadOptions::fresh()).await.unwrap();
        assert_eq!(*stored, json!({"a": {"b": 1, "c": 2}}));
    }

    #[tokio::test]
    async fn test_save_invalidates_instead_of_replacing() {
        let temp_dir = TempDir::new().unwrap();
        let loader = loader(&temp_dir);
        let mut events = loader.subscribe();

        loader.save("site", &json!({"v": 1})).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ConfigEvent::Invalidated {
                name: "site".to_string()
            }
        );
        assert_eq!(loader.disk_reads(), 0);

        let loaded = loader.load("site", LoadOptions::default()).await.unwrap();
        assert_eq!(*loaded, json!({"v": 1}));
        assert_eq!(loader.disk_reads(), 1);

        loader.save("site", &json!({"v": 2})).await.unwrap();
        let loaded = loader.load("site", LoadOptions::default()).await.unwrap();
        assert_eq!(*loaded, json!({"v": 2}));
        assert_eq!(loader.disk_reads(), 2);
    }

    #[tokio::test]
    async fn test_load_for_plugin_overlays_base() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "site", json!({"title": "Base", "limits": {"max": 1}}));
        write(
            &temp_dir.path().join("plugins").join("plugin-gallery"),
            "site",
            json!({"limits": {"max": 5}}),
        );
        let loader = loader(&temp_dir);

        let merged = loader.load_for_plugin("plugin-gallery", "site").await.unwrap();
        assert_eq!(merged, json!({"title": "Base", "limits": {"max": 5}}));

        let plain = loader.load_for_plugin("plugin-other", "site").await.unwrap();
        assert_eq!(plain, json!({"title": "Base", "limits": {"max": 1}}));

        assert!(loader
            .load_for_plugin("plugin-other", "missing")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_watch_reloads_and_keeps_last_good() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "site", json!({"v": 1}));
        let loader = loader(&temp_dir);
        let mut events = loader.subscribe();

        loader.load("site", LoadOptions::watched()).await.unwrap();
        assert_eq!(loader.watched().await, vec!["site".to_string()]);

        let path = json_path(temp_dir.path(), "site");
        persistence::write_json(&path, &json!({"v": 2})).await.unwrap();
        wait_for(&mut events, |e| matches!(e, ConfigEvent::Reloaded { .. })).await;

        let current = loader.load("site", LoadOptions::default()).await.unwrap();
        assert_eq!(*current, json!({"v": 2}));

        persistence::atomic_write(&path, b"{ broken").await.unwrap();
        wait_for(&mut events, |e| matches!(e, ConfigEvent::ReloadFailed { .. })).await;

        let current = loader.load("site", LoadOptions::default()).await.unwrap();
        assert_eq!(*current, json!({"v": 2}));

        assert!(loader.unwatch("site").await);
        assert!(!loader.unwatch("site").await);
        loader.close().await;
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<ConfigEvent>,
        want: impl Fn(&ConfigEvent) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match events.recv().await {
                    Ok(event) if want(&event) => break,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event channel closed: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for config event");
    }
}
