//! Engine error handling
//!
//! Every fallible engine operation returns [`EngineError`]. The variants are
//! finer grained than the five error kinds callers usually care about;
//! [`EngineError::kind`] folds them onto that taxonomy.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// The kind of resource an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Collection,
    Config,
    Schema,
    Backup,
    Package,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Document => "Document",
            ResourceKind::Collection => "Collection",
            ResourceKind::Config => "Config",
            ResourceKind::Schema => "Schema",
            ResourceKind::Backup => "Backup",
            ResourceKind::Package => "Package",
        };
        f.write_str(name)
    }
}

/// Coarse error taxonomy shared by every component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Io,
    MalformedArchive,
    SyncFailure,
}

/// A single field-level schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Dotted path to the offending field (`""` for the document root)
    pub field: String,
    /// Human readable description of the violation
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Errors that can occur during engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// A document, config, schema, backup or package does not exist
    #[error("{kind} not found: '{name}'")]
    NotFound { kind: ResourceKind, name: String },

    /// Data failed schema validation; carries every violation found
    #[error("Validation failed for '{entity}': {}", join_errors(.errors))]
    Validation {
        entity: String,
        errors: Vec<FieldError>,
    },

    /// Document id collision on create
    #[error("Document '{id}' already exists in collection '{collection}'")]
    AlreadyExists { collection: String, id: String },

    /// A name that cannot be mapped safely onto a single path component
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Document payload has the wrong shape
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// A schema document could not be compiled
    #[error("Invalid schema for '{entity}': {details}")]
    InvalidSchema { entity: String, details: String },

    /// A file exists but its contents could not be parsed
    #[error("Invalid format in '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure other than a missing file
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Backup archive failed a structural integrity check
    #[error("Malformed archive '{name}': {details}")]
    MalformedArchive { name: String, details: String },

    /// Propagating engine modules to one dependent package failed
    #[error("Sync failed for package '{plugin}': {reason}")]
    SyncFailure { plugin: String, reason: String },

    /// Pub/sub bus failure
    #[error("Pub/sub error: {0}")]
    Bus(String),

    /// File watcher could not be installed
    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A blocking worker task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Serialization failure for in-memory data
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Create an error from an I/O error with path context
    ///
    /// `io::ErrorKind::NotFound` becomes [`EngineError::NotFound`] for the
    /// given resource; everything else is an [`EngineError::Io`].
    pub fn from_io(error: io::Error, path: PathBuf, kind: ResourceKind, name: &str) -> Self {
        if error.kind() == io::ErrorKind::NotFound {
            EngineError::not_found(kind, name)
        } else {
            EngineError::Io {
                path,
                source: error,
            }
        }
    }

    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Map onto the coarse error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Validation { .. }
            | EngineError::AlreadyExists { .. }
            | EngineError::InvalidName { .. }
            | EngineError::InvalidDocument(_)
            | EngineError::InvalidSchema { .. } => ErrorKind::Validation,
            EngineError::MalformedArchive { .. } => ErrorKind::MalformedArchive,
            EngineError::SyncFailure { .. } | EngineError::Bus(_) => ErrorKind::SyncFailure,
            EngineError::Parse { .. }
            | EngineError::Io { .. }
            | EngineError::Watch(_)
            | EngineError::Task(_)
            | EngineError::Json(_) => ErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }

    /// Field errors carried by a validation failure, empty otherwise
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            EngineError::Validation { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
