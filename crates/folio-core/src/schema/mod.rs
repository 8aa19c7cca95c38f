//! Schema validation
//!
//! Entity types are described by JSON schema files kept in the `core`
//! collection of the schema directory:
//!
//! ```text
//! <schemas>/core/<type_lower>.json
//! ```
//!
//! Raw and compiled schemas are cached per schema key. The cache is shared
//! by every task holding the validator and is only dropped explicitly
//! (`clear_cache`) or when a schema is re-registered.

mod compiled;
mod registry;

pub use compiled::{CompiledSchema, JsonType};
pub use registry::{pluralize, EntityBinding, EntityRegistry};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{type_name, Document};
use crate::error::{EngineError, EngineResult, FieldError, ResourceKind};
use crate::store::{CollectionScan, DocumentStore};

/// Collection inside the schema directory that holds entity schemas
pub const SCHEMA_COLLECTION: &str = "core";

/// Result of validating data against an entity schema
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<FieldError>,
    /// The data that was validated, unchanged
    pub data: Value,
}

/// Validates entity data against stored schemas and persists valid data
pub struct SchemaValidator {
    schemas: DocumentStore,
    data: DocumentStore,
    registry: EntityRegistry,
    raw_cache: RwLock<HashMap<String, Arc<Value>>>,
    compiled_cache: RwLock<HashMap<String, Arc<CompiledSchema>>>,
}

impl SchemaValidator {
    /// Create a validator reading schemas from `schemas_dir` and writing
    /// documents through `data`
    pub fn new(schemas_dir: impl Into<PathBuf>, data: DocumentStore) -> Self {
        Self::with_registry(schemas_dir, data, EntityRegistry::new())
    }

    pub fn with_registry(
        schemas_dir: impl Into<PathBuf>,
        data: DocumentStore,
        registry: EntityRegistry,
    ) -> Self {
        Self {
            schemas: DocumentStore::new(schemas_dir),
            data,
            registry,
            raw_cache: RwLock::new(HashMap::new()),
            compiled_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Binding (schema key and collection) for an entity type
    pub fn binding(&self, entity_type: &str) -> EntityBinding {
        self.registry.resolve(entity_type)
    }

    // ==================== Schemas ====================

    /// Load the raw schema for an entity type, from cache when possible
    pub async fn load_schema(&self, entity_type: &str) -> EngineResult<Arc<Value>> {
        let key = self.binding(entity_type).schema_key;

        if let Some(schema) = self.raw_cache.read().await.get(&key) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(
            self.schemas
                .read_value(SCHEMA_COLLECTION, &key, ResourceKind::Schema)
                .await?,
        );
        debug!(entity_type, schema = %key, "loaded schema");

        self.raw_cache
            .write()
            .await
            .insert(key, Arc::clone(&schema));
        Ok(schema)
    }

    /// Store a schema for an entity type, replacing any cached copy
    ///
    /// The schema must compile; nothing is written otherwise.
    pub async fn register_schema(&self, entity_type: &str, schema: Value) -> EngineResult<()> {
        let compiled = CompiledSchema::compile(&schema).map_err(|details| {
            EngineError::InvalidSchema {
                entity: entity_type.to_string(),
                details,
            }
        })?;

        let key = self.binding(entity_type).schema_key;
        self.schemas
            .write_value(SCHEMA_COLLECTION, &key, &schema)
            .await?;

        self.raw_cache
            .write()
            .await
            .insert(key.clone(), Arc::new(schema));
        self.compiled_cache
            .write()
            .await
            .insert(key.clone(), Arc::new(compiled));
        debug!(entity_type, schema = %key, "registered schema");
        Ok(())
    }

    /// Drop every cached schema
    pub async fn clear_cache(&self) {
        self.raw_cache.write().await.clear();
        self.compiled_cache.write().await.clear();
    }

    async fn compiled(&self, entity_type: &str) -> EngineResult<Arc<CompiledSchema>> {
        let key = self.binding(entity_type).schema_key;

        if let Some(compiled) = self.compiled_cache.read().await.get(&key) {
            return Ok(Arc::clone(compiled));
        }

        let raw = self.load_schema(entity_type).await?;
        let compiled = CompiledSchema::compile(&raw).map_err(|details| {
            EngineError::InvalidSchema {
                entity: entity_type.to_string(),
                details,
            }
        })?;
        let compiled = Arc::new(compiled);

        self.compiled_cache
            .write()
            .await
            .insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    // ==================== Validation ====================

    /// Validate data against the schema for `entity_type`
    ///
    /// Returns every violation; an `Err` means the schema itself could not
    /// be loaded or compiled.
    pub async fn validate(&self, entity_type: &str, data: &Value) -> EngineResult<ValidationOutcome> {
        let schema = self.compiled(entity_type).await?;
        let errors = schema.validate(data);
        Ok(ValidationOutcome {
            valid: errors.is_empty(),
            errors,
            data: data.clone(),
        })
    }

    // ==================== Entities ====================

    /// Validate and persist an entity
    ///
    /// Validation runs on the data exactly as given. Only valid data is
    /// stamped (id, `created_at` when absent, `updated_at`) and written.
    pub async fn save(&self, entity_type: &str, data: Value) -> EngineResult<Document> {
        let outcome = self.validate(entity_type, &data).await?;
        if !outcome.valid {
            return Err(EngineError::Validation {
                entity: entity_type.to_string(),
                errors: outcome.errors,
            });
        }

        let fields = match data {
            Value::Object(map) => map,
            other => {
                return Err(EngineError::InvalidDocument(format!(
                    "entity data must be an object, found {}",
                    type_name(&other)
                )))
            }
        };

        let doc = Document::from_data(fields)?;
        let collection = self.binding(entity_type).collection;
        self.data.put(&collection, &doc).await?;
        debug!(entity_type, %collection, id = %doc.id, "saved entity");
        Ok(doc)
    }

    /// Read one entity by id
    pub async fn load(&self, entity_type: &str, id: &str) -> EngineResult<Document> {
        let collection = self.binding(entity_type).collection;
        self.data.read(&collection, id).await
    }

    /// Delete one entity by id
    pub async fn delete(&self, entity_type: &str, id: &str) -> EngineResult<()> {
        let collection = self.binding(entity_type).collection;
        self.data.delete(&collection, id).await
    }

    /// Read every stored entity of a type
    pub async fn list(&self, entity_type: &str) -> EngineResult<CollectionScan> {
        let collection = self.binding(entity_type).collection;
        self.data.read_collection(&collection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn post_schema() -> Value {
        json!({
            "type": "object",
            "required": ["title"],
            "properties": {
                "title": {"type": "string", "minLength": 1},
                "views": {"type": "integer", "minimum": 0}
            }
        })
    }

    fn validator(temp_dir: &TempDir) -> SchemaValidator {
        let data = DocumentStore::new(temp_dir.path().join("data"));
        SchemaValidator::new(temp_dir.path().join("schemas"), data)
    }

    #[tokio::test]
    async fn test_load_schema_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let validator = validator(&temp_dir);

        let err = validator.load_schema("Post").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: ResourceKind::Schema,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_load_schema_reads_lowercased_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("schemas").join("core").join("post.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, post_schema().to_string()).unwrap();

        let validator = validator(&temp_dir);
        let schema = validator.load_schema("Post").await.unwrap();
        assert_eq!(*schema, post_schema());

        // Cached: removing the file does not affect later loads
        std::fs::remove_file(&path).unwrap();
        assert!(validator.load_schema("Post").await.is_ok());

        validator.clear_cache().await;
        assert!(validator.load_schema("Post").await.is_err());
    }

    #[tokio::test]
    async fn test_validate_reports_missing_required_field() {
        let temp_dir = TempDir::new().unwrap();
        let validator = validator(&temp_dir);
        validator.register_schema("Post", post_schema()).await.unwrap();

        let outcome = validator.validate("Post", &json!({"views": 3})).await.unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].field, "title");
        assert_eq!(outcome.data, json!({"views": 3}));
    }

    #[tokio::test]
    async fn test_save_invalid_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let validator = validator(&temp_dir);
        validator.register_schema("Post", post_schema()).await.unwrap();

        let err = validator
            .save("Post", json!({"title": "", "views": -2}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.field_errors().len(), 2);

        assert!(!temp_dir.path().join("data").join("posts").exists());
    }

    #[tokio::test]
    async fn test_save_stamps_and_persists_valid_data() {
        let temp_dir = TempDir::new().unwrap();
        let validator = validator(&temp_dir);
        validator.register_schema("Post", post_schema()).await.unwrap();

        let doc = validator
            .save("Post", json!({"id": "p1", "title": "Hello"}))
            .await
            .unwrap();
        assert_eq!(doc.id, "p1");
        assert!(temp_dir
            .path()
            .join("data")
            .join("posts")
            .join("p1.json")
            .exists());

        let loaded = validator.load("Post", "p1").await.unwrap();
        assert_eq!(loaded, doc);

        validator.delete("Post", "p1").await.unwrap();
        assert!(validator.load("Post", "p1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_save_keeps_caller_created_at() {
        let temp_dir = TempDir::new().unwrap();
        let validator = validator(&temp_dir);
        validator.register_schema("Post", post_schema()).await.unwrap();

        let doc = validator
            .save(
                "Post",
                json!({"title": "Old", "created_at": "2020-01-01T00:00:00Z"}),
            )
            .await
            .unwrap();
        assert_eq!(doc.created_at.to_rfc3339(), "2020-01-01T00:00:00+00:00");
        assert!(doc.updated_at > doc.created_at);
    }

    #[tokio::test]
    async fn test_register_schema_rejects_uncompilable() {
        let temp_dir = TempDir::new().unwrap();
        let validator = validator(&temp_dir);

        let err = validator
            .register_schema("Post", json!({"type": "text"}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSchema { .. }));
        assert!(validator.load_schema("Post").await.is_err());
    }

    #[tokio::test]
    async fn test_registry_override_routes_collection() {
        let temp_dir = TempDir::new().unwrap();
        let data = DocumentStore::new(temp_dir.path().join("data"));
        let mut registry = EntityRegistry::new();
        registry.register("Person", "person", "people");
        let validator =
            SchemaValidator::with_registry(temp_dir.path().join("schemas"), data, registry);

        validator
            .register_schema("Person", json!({"type": "object"}))
            .await
            .unwrap();
        validator
            .save("Person", json!({"id": "ada", "name": "Ada"}))
            .await
            .unwrap();

        assert!(temp_dir
            .path()
            .join("data")
            .join("people")
            .join("ada.json")
            .exists());
    }
}
