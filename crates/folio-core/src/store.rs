//! Document storage
//!
//! The `DocumentStore` keeps one JSON file per document and one directory
//! per collection:
//!
//! ```text
//! <root>/<collection>/<id>.json
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let store = DocumentStore::new(config.data_path());
//!
//! let post = store.create("posts", fields).await?;
//! let scan = store.read_collection("posts").await?;
//! let visible = query::filter(scan.documents, &Filter::parse(&where_clause)?);
//! ```
//!
//! There is no per-document lock: concurrent updates to the same id are
//! last-writer-wins. Concurrent creates of one id keep the first.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, warn};

use crate::document::{keys, Document};
use crate::error::{EngineError, EngineResult, ResourceKind};
use crate::persistence::{self, is_json_record, json_path, validate_name};

/// A file that could not be read as a document during a collection scan
#[derive(Debug, Clone)]
pub struct ReadDefect {
    /// Path of the offending file
    pub path: PathBuf,
    /// Why it was skipped
    pub reason: String,
}

/// Result of reading a whole collection
///
/// Malformed files do not abort the scan; they are reported here instead.
#[derive(Debug, Clone, Default)]
pub struct CollectionScan {
    /// Every document that parsed, ordered by file name
    pub documents: Vec<Document>,
    /// Files that were skipped
    pub defects: Vec<ReadDefect>,
}

impl CollectionScan {
    pub fn is_clean(&self) -> bool {
        self.defects.is_empty()
    }

    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }
}

/// Filesystem-backed document store
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Create a store rooted at `root`
    ///
    /// The directory is created lazily on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory holding every collection
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a collection
    pub fn collection_path(&self, collection: &str) -> EngineResult<PathBuf> {
        validate_name(collection)?;
        Ok(self.root.join(collection))
    }

    /// File path of a document
    pub fn document_path(&self, collection: &str, id: &str) -> EngineResult<PathBuf> {
        validate_name(id)?;
        Ok(json_path(&self.collection_path(collection)?, id))
    }

    /// Check whether a document exists
    pub async fn exists(&self, collection: &str, id: &str) -> EngineResult<bool> {
        let path = self.document_path(collection, id)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| EngineError::io(&path, e))
    }

    // ==================== Document Operations ====================

    /// Create a new document
    ///
    /// Uses `data.id` when present, otherwise generates one. Fails with
    /// `AlreadyExists` rather than overwriting an existing document, also
    /// when another writer creates the same id concurrently.
    pub async fn create(&self, collection: &str, data: Map<String, Value>) -> EngineResult<Document> {
        let doc = Document::from_data(data)?;
        let path = self.document_path(collection, &doc.id)?;

        let bytes = serde_json::to_vec_pretty(&doc)?;
        if !persistence::atomic_create(&path, &bytes).await? {
            return Err(EngineError::AlreadyExists {
                collection: collection.to_string(),
                id: doc.id,
            });
        }
        debug!(collection, id = %doc.id, "created document");
        Ok(doc)
    }

    /// Read a single document
    pub async fn read(&self, collection: &str, id: &str) -> EngineResult<Document> {
        let path = self.document_path(collection, id)?;
        let bytes = fs::read(&path).await.map_err(|e| {
            EngineError::from_io(e, path.clone(), ResourceKind::Document, &qualified(collection, id))
        })?;

        serde_json::from_slice(&bytes).map_err(|source| EngineError::Parse { path, source })
    }

    /// Shallow-merge `patch` into an existing document
    ///
    /// `created_at` is preserved and `updated_at` refreshed. A patch that
    /// tries to change the id is rejected.
    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        mut patch: Map<String, Value>,
    ) -> EngineResult<Document> {
        let mut doc = self.read(collection, id).await?;

        if let Some(new_id) = patch.remove(keys::ID) {
            if new_id.as_str() != Some(id) {
                return Err(EngineError::InvalidDocument(format!(
                    "document id '{id}' is immutable"
                )));
            }
        }
        patch.remove(keys::CREATED_AT);
        patch.remove(keys::UPDATED_AT);

        doc.fields.extend(patch);
        doc.touch();

        let path = self.document_path(collection, id)?;
        persistence::write_json(&path, &doc).await?;
        debug!(collection, id, "updated document");
        Ok(doc)
    }

    /// Write a whole document, replacing any existing file
    pub async fn put(&self, collection: &str, doc: &Document) -> EngineResult<()> {
        let path = self.document_path(collection, &doc.id)?;
        persistence::write_json(&path, doc).await?;
        debug!(collection, id = %doc.id, "wrote document");
        Ok(())
    }

    /// Delete a document
    pub async fn delete(&self, collection: &str, id: &str) -> EngineResult<()> {
        let path = self.document_path(collection, id)?;
        fs::remove_file(&path).await.map_err(|e| {
            EngineError::from_io(e, path.clone(), ResourceKind::Document, &qualified(collection, id))
        })?;
        debug!(collection, id, "deleted document");
        Ok(())
    }

    // ==================== Collection Operations ====================

    /// Read every document of a collection
    ///
    /// A missing collection directory reads as empty. Files that fail to
    /// parse are skipped, logged and reported in [`CollectionScan::defects`].
    pub async fn read_collection(&self, collection: &str) -> EngineResult<CollectionScan> {
        let dir = self.collection_path(collection)?;
        let mut scan = CollectionScan::default();

        let mut paths = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(scan),
            Err(e) => return Err(EngineError::io(&dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::io(&dir, e))?
        {
            let path = entry.path();
            if is_json_record(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            match read_document_file(&path).await {
                Ok(doc) => scan.documents.push(doc),
                Err(reason) => {
                    warn!(collection, path = ?path, %reason, "skipping unreadable document");
                    scan.defects.push(ReadDefect { path, reason });
                }
            }
        }

        Ok(scan)
    }

    /// Names of every collection directory
    pub async fn list_collections(&self) -> EngineResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(EngineError::io(&self.root, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::io(&self.root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_dir && validate_name(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    // ==================== Raw Records ====================

    /// Read a JSON file stored at a document path without document semantics
    ///
    /// Used for schema files and other records that carry no timestamps.
    pub async fn read_value(&self, collection: &str, id: &str, kind: ResourceKind) -> EngineResult<Value> {
        let path = self.document_path(collection, id)?;
        let bytes = fs::read(&path)
            .await
            .map_err(|e| EngineError::from_io(e, path.clone(), kind, id))?;
        serde_json::from_slice(&bytes).map_err(|source| EngineError::Parse { path, source })
    }

    /// Write a raw JSON value at a document path
    pub async fn write_value(&self, collection: &str, id: &str, value: &Value) -> EngineResult<()> {
        let path = self.document_path(collection, id)?;
        persistence::write_json(&path, value).await
    }
}

async fn read_document_file(path: &Path) -> Result<Document, String> {
    let bytes = fs::read(path).await.map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

fn qualified(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn test_store(temp_dir: &TempDir) -> DocumentStore {
        DocumentStore::new(temp_dir.path().join("data"))
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let created = store
            .create("posts", fields(json!({"title": "Hello", "views": 3})))
            .await
            .unwrap();

        assert!(!created.id.is_empty());
        assert!(store
            .root()
            .join("posts")
            .join(format!("{}.json", created.id))
            .exists());

        let read = store.read("posts", &created.id).await.unwrap();
        assert_eq!(read, created);
        assert_eq!(read.fields["title"], json!("Hello"));
    }

    #[tokio::test]
    async fn test_create_with_explicit_id_rejects_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store
            .create("posts", fields(json!({"id": "p1", "title": "a"})))
            .await
            .unwrap();
        let err = store
            .create("posts", fields(json!({"id": "p1", "title": "b"})))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::AlreadyExists { .. }));
        let kept = store.read("posts", "p1").await.unwrap();
        assert_eq!(kept.fields["title"], json!("a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_of_one_id_keep_first() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let tasks: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .create("posts", fields(json!({"id": "p1", "writer": n})))
                        .await
                })
            })
            .collect();

        let mut winners = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(doc) => winners.push(doc),
                Err(e) => assert!(matches!(e, EngineError::AlreadyExists { .. }), "{e:?}"),
            }
        }

        assert_eq!(winners.len(), 1);
        let stored = store.read("posts", "p1").await.unwrap();
        assert_eq!(stored.fields["writer"], winners[0].fields["writer"]);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let err = store.read("posts", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_merges_and_preserves_identity() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let created = store
            .create("posts", fields(json!({"id": "p1", "title": "a", "views": 1})))
            .await
            .unwrap();
        let updated = store
            .update("posts", "p1", fields(json!({"views": 2, "created_at": "1999-01-01T00:00:00Z"})))
            .await
            .unwrap();

        assert_eq!(updated.id, "p1");
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.fields["title"], json!("a"));
        assert_eq!(updated.fields["views"], json!(2));
    }

    #[tokio::test]
    async fn test_update_rejects_id_change() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store
            .create("posts", fields(json!({"id": "p1"})))
            .await
            .unwrap();
        let err = store
            .update("posts", "p1", fields(json!({"id": "p2"})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store
            .create("posts", fields(json!({"id": "p1"})))
            .await
            .unwrap();
        store.delete("posts", "p1").await.unwrap();

        assert!(!store.exists("posts", "p1").await.unwrap());
        assert!(store.delete("posts", "p1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_read_collection_skips_malformed_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store
            .create("posts", fields(json!({"id": "a"})))
            .await
            .unwrap();
        store
            .create("posts", fields(json!({"id": "c"})))
            .await
            .unwrap();
        std::fs::write(store.root().join("posts").join("b.json"), "{not json").unwrap();
        std::fs::write(store.root().join("posts").join("notes.txt"), "ignored").unwrap();

        let scan = store.read_collection("posts").await.unwrap();
        let ids: Vec<&str> = scan.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(scan.defects.len(), 1);
        assert!(scan.defects[0].path.ends_with("b.json"));
        assert!(!scan.is_clean());
    }

    #[tokio::test]
    async fn test_read_missing_collection_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let scan = store.read_collection("ghosts").await.unwrap();
        assert!(scan.documents.is_empty());
        assert!(scan.is_clean());
    }

    #[tokio::test]
    async fn test_list_collections() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        store.create("posts", Map::new()).await.unwrap();
        store.create("authors", Map::new()).await.unwrap();

        assert_eq!(store.list_collections().await.unwrap(), vec!["authors", "posts"]);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let err = store.read("../etc", "passwd").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidName { .. }));

        let err = store
            .create("posts", fields(json!({"id": "../escape"})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn test_raw_values() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let schema = json!({"type": "object"});
        store.write_value("core", "post", &schema).await.unwrap();
        let read = store
            .read_value("core", "post", ResourceKind::Schema)
            .await
            .unwrap();
        assert_eq!(read, schema);

        let err = store
            .read_value("core", "missing", ResourceKind::Schema)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: ResourceKind::Schema,
                ..
            }
        ));
    }
}
