//! Document model
//!
//! A document is a keyed field mapping plus an immutable `id` and
//! `created_at`/`updated_at` timestamps. On disk it is a single JSON object
//! with those three keys at the top level next to the user fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Keys the engine manages on every document
pub mod keys {
    pub const ID: &str = "id";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}

/// A persisted record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique within its collection; never changes after creation
    pub id: String,
    /// When this document was first written
    pub created_at: DateTime<Utc>,
    /// When this document was last written
    pub updated_at: DateTime<Utc>,
    /// User fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create a document with a freshly generated id
    pub fn new(fields: Map<String, Value>) -> Self {
        Self::with_id(generate_id(), fields)
    }

    /// Create a document with a specific id
    pub fn with_id(id: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        strip_managed_keys(&mut fields);
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            fields,
        }
    }

    /// Build a document from a JSON object
    ///
    /// `id` is taken from the data when present (it must be a string) and
    /// generated otherwise. `created_at` is kept when present and valid,
    /// `updated_at` is always set to now.
    pub fn from_data(mut data: Map<String, Value>) -> EngineResult<Self> {
        let id = match data.remove(keys::ID) {
            Some(Value::String(id)) => id,
            Some(other) => {
                return Err(EngineError::InvalidDocument(format!(
                    "'id' must be a string, found {}",
                    type_name(&other)
                )))
            }
            None => generate_id(),
        };

        let created_at = match data.remove(keys::CREATED_AT) {
            Some(Value::String(raw)) => Some(parse_timestamp(&raw)?),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(EngineError::InvalidDocument(format!(
                    "'created_at' must be an RFC 3339 string, found {}",
                    type_name(&other)
                )))
            }
        };
        data.remove(keys::UPDATED_AT);

        let mut doc = Self::with_id(id, data);
        if let Some(created_at) = created_at {
            doc.created_at = created_at;
        }
        Ok(doc)
    }

    /// Look up a field, including the managed keys
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            keys::ID => Some(Value::String(self.id.clone())),
            keys::CREATED_AT => Some(Value::String(format_timestamp(&self.created_at))),
            keys::UPDATED_AT => Some(Value::String(format_timestamp(&self.updated_at))),
            _ => self.fields.get(field).cloned(),
        }
    }

    /// Set a user field and bump `updated_at`
    ///
    /// Managed keys are ignored.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if is_managed_key(&field) {
            return;
        }
        self.fields.insert(field, value);
        self.touch();
    }

    /// Refresh `updated_at`, never moving it backwards
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Render the full document as a JSON object
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 3);
        map.insert(keys::ID.to_string(), Value::String(self.id.clone()));
        map.insert(
            keys::CREATED_AT.to_string(),
            Value::String(format_timestamp(&self.created_at)),
        );
        map.insert(
            keys::UPDATED_AT.to_string(),
            Value::String(format_timestamp(&self.updated_at)),
        );
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

/// Generate a document id
///
/// A base-36 millisecond timestamp plus 8 random hex characters. Collisions
/// are unlikely but possible; the store checks for an existing file on
/// create instead of trusting the generator.
pub fn generate_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    format!("{}-{}", to_base36(millis), suffix)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

pub fn is_managed_key(key: &str) -> bool {
    matches!(key, keys::ID | keys::CREATED_AT | keys::UPDATED_AT)
}

fn strip_managed_keys(fields: &mut Map<String, Value>) {
    fields.remove(keys::ID);
    fields.remove(keys::CREATED_AT);
    fields.remove(keys::UPDATED_AT);
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}

fn parse_timestamp(raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidDocument(format!("invalid timestamp '{raw}': {e}")))
}

/// Short JSON type name used in error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
