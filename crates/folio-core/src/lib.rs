//! Folio Core Library
//!
//! An embedded document engine that keeps everything as plain JSON files on
//! disk: documents, configuration, schemas, backups and the modules mirrored
//! into dependent packages.
//!
//! # Architecture
//!
//! - **DocumentStore**: one JSON file per document, one directory per collection
//! - **Query**: in-memory filter, sort, limit and projection over documents
//! - **SchemaValidator**: JSON schema checks before persisting entities
//! - **ConfigLoader**: cached named config documents with file watching
//! - **BackupManager**: zip snapshots with retention and a monthly schedule
//! - **PluginSync**: copies core modules into dependent packages over a pub/sub bus
//!
//! # Quick Start
//!
//! ```text
//! let engine = Engine::init(EngineConfig::load()?, BusHandles::local()).await?;
//!
//! // Store a document
//! let post = engine.store().create("posts", fields).await?;
//!
//! // Query a collection
//! let docs = engine.store().read_collection("posts").await?.into_documents();
//! let recent = Query::new()
//!     .filter(Filter::new().equals("status", json!("published")))
//!     .sort(SortSpec::desc("created_at"))
//!     .limit(10)
//!     .run(docs);
//!
//! engine.close().await;
//! ```
//!
//! # Modules
//!
//! - `store`: Document storage (main entry point)
//! - `document`: Document model and id generation
//! - `query`: Filtering and result shaping
//! - `schema`: Schema compilation, validation and entity persistence
//! - `loader`: Named config documents
//! - `backup`: Backup archives
//! - `plugins`: Package sync and the pub/sub bus
//! - `engine`: Component lifecycle
//! - `config`: Engine configuration

pub mod backup;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod loader;
pub mod persistence;
pub mod plugins;
pub mod query;
pub mod schema;
pub mod store;

/// Engine version recorded in backups and package sync records
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use backup::{BackupInfo, BackupKind, BackupManager, BackupMetadata, CleanupReport, VerifyReport};
pub use config::EngineConfig;
pub use document::Document;
pub use engine::Engine;
pub use error::{EngineError, EngineResult, ErrorKind, FieldError, ResourceKind};
pub use loader::{ConfigEvent, ConfigLoader, LoadOptions};
pub use plugins::{BusHandles, LocalBus, PluginSync, SyncRecord, SyncSummary, UpdateOutcome};
pub use query::{Filter, Op, Query, QueryOptions, SortOrder, SortSpec};
pub use schema::{EntityRegistry, SchemaValidator, ValidationOutcome};
pub use store::{CollectionScan, DocumentStore};
