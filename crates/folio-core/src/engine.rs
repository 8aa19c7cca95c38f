//! Engine context
//!
//! `Engine` owns one instance of every component and their background
//! tasks. Build it once with [`Engine::init`], hand out references, and call
//! [`Engine::close`] before exiting.

use std::sync::Arc;

use tokio::fs;
use tracing::info;

use crate::backup::BackupManager;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::loader::ConfigLoader;
use crate::plugins::{BusHandles, PluginSync};
use crate::schema::SchemaValidator;
use crate::store::DocumentStore;

pub struct Engine {
    config: EngineConfig,
    store: DocumentStore,
    schemas: Arc<SchemaValidator>,
    configs: ConfigLoader,
    backups: Arc<BackupManager>,
    plugins: Arc<PluginSync>,
}

impl Engine {
    /// Create the directory layout, build every component and start the
    /// background tasks the configuration asks for
    pub async fn init(config: EngineConfig, bus: BusHandles) -> EngineResult<Self> {
        for dir in [
            config.root_dir.clone(),
            config.data_path(),
            config.config_docs_path(),
            config.schemas_path(),
            config.backups_path(),
        ] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| EngineError::io(&dir, e))?;
        }

        let store = DocumentStore::new(config.data_path());
        let schemas = Arc::new(SchemaValidator::new(config.schemas_path(), store.clone()));
        let configs = ConfigLoader::new(config.config_docs_path(), config.cache.config_ttl());
        let backups = Arc::new(
            BackupManager::from_config(&config, configs.clone()).with_schemas(Arc::clone(&schemas)),
        );
        let plugins = Arc::new(PluginSync::from_config(&config, bus));

        if config.plugins.listen {
            plugins.init().await?;
        }
        if config.backup.auto_backup {
            backups.setup_auto_backup().await;
        }

        info!(root = ?config.root_dir, "engine initialized");
        Ok(Self {
            config,
            store,
            schemas,
            configs,
            backups,
            plugins,
        })
    }

    /// Connect the bus named in the configuration, then [`Engine::init`]
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        let bus = BusHandles::connect(config.plugins.bus_url.as_deref()).await?;
        Self::init(config, bus).await
    }

    /// Stop background tasks and watches
    pub async fn close(&self) {
        self.plugins.close().await;
        self.backups.stop_auto_backup().await;
        self.configs.close().await;
        info!("engine closed");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn schemas(&self) -> &SchemaValidator {
        &self.schemas
    }

    pub fn configs(&self) -> &ConfigLoader {
        &self.configs
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    pub fn plugins(&self) -> &Arc<PluginSync> {
        &self.plugins
    }
}
