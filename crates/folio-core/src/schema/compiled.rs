//! Structural schema compilation and validation
//!
//! Schemas are a JSON Schema subset. Compiling turns the raw JSON into a
//! tree of [`CompiledSchema`] nodes once; validation then walks data against
//! that tree and collects every violation rather than stopping at the first.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::document::type_name;
use crate::error::FieldError;

/// JSON value kinds a schema can require
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl JsonType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "object" => JsonType::Object,
            "array" => JsonType::Array,
            "string" => JsonType::String,
            "number" => JsonType::Number,
            "integer" => JsonType::Integer,
            "boolean" => JsonType::Boolean,
            "null" => JsonType::Null,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::Boolean => "boolean",
            JsonType::Null => "null",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (JsonType::Object, Value::Object(_)) => true,
            (JsonType::Array, Value::Array(_)) => true,
            (JsonType::String, Value::String(_)) => true,
            (JsonType::Number, Value::Number(_)) => true,
            (JsonType::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            (JsonType::Boolean, Value::Bool(_)) => true,
            (JsonType::Null, Value::Null) => true,
            _ => false,
        }
    }
}

/// What to do with object keys not listed in `properties`
#[derive(Debug, Clone, Default)]
pub enum Additional {
    #[default]
    Allowed,
    Forbidden,
    Schema(Box<CompiledSchema>),
}

/// A compiled schema node
#[derive(Debug, Clone, Default)]
pub struct CompiledSchema {
    types: Option<Vec<JsonType>>,
    properties: BTreeMap<String, CompiledSchema>,
    required: Vec<String>,
    additional: Additional,
    items: Option<Box<CompiledSchema>>,
    enum_values: Option<Vec<Value>>,
    const_value: Option<Value>,
    min_length: Option<u64>,
    max_length: Option<u64>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    exclusive_minimum: Option<f64>,
    exclusive_maximum: Option<f64>,
    min_items: Option<u64>,
    max_items: Option<u64>,
    date_time: bool,
}

impl CompiledSchema {
    /// Compile a raw schema
    ///
    /// Unknown keywords are ignored; known keywords with the wrong shape
    /// are errors.
    pub fn compile(raw: &Value) -> Result<Self, String> {
        compile_at(raw, "#")
    }

    /// Validate `data`, returning every violation found
    pub fn validate(&self, data: &Value) -> Vec<FieldError> {
        let mut errors = Vec::new();
        self.check(data, "", &mut errors);
        errors
    }

    fn check(&self, value: &Value, path: &str, errors: &mut Vec<FieldError>) {
        if let Some(types) = &self.types {
            if !types.iter().any(|t| t.accepts(value)) {
                let expected: Vec<&str> = types.iter().map(|t| t.name()).collect();
                errors.push(FieldError::new(
                    path,
                    format!("expected {}, found {}", expected.join(" or "), type_name(value)),
                ));
                return;
            }
        }

        if let Some(expected) = &self.const_value {
            if value != expected {
                errors.push(FieldError::new(path, format!("must equal {expected}")));
            }
        }

        if let Some(options) = &self.enum_values {
            if !options.contains(value) {
                errors.push(FieldError::new(path, "is not one of the allowed values"));
            }
        }

        match value {
            Value::String(s) => self.check_string(s, path, errors),
            Value::Number(n) => {
                if let Some(n) = n.as_f64() {
                    self.check_number(n, path, errors);
                }
            }
            Value::Array(items) => self.check_array(items, path, errors),
            Value::Object(map) => self.check_object(map, path, errors),
            _ => {}
        }
    }

    fn check_string(&self, s: &str, path: &str, errors: &mut Vec<FieldError>) {
        let len = s.chars().count() as u64;
        if let Some(min) = self.min_length {
            if len < min {
                errors.push(FieldError::new(path, format!("must be at least {min} characters")));
            }
        }
        if let Some(max) = self.max_length {
            if len > max {
                errors.push(FieldError::new(path, format!("must be at most {max} characters")));
            }
        }
        if self.date_time && chrono::DateTime::parse_from_rfc3339(s).is_err() {
            errors.push(FieldError::new(path, "must be an RFC 3339 date-time"));
        }
    }

    fn check_number(&self, n: f64, path: &str, errors: &mut Vec<FieldError>) {
        if let Some(min) = self.minimum {
            if n < min {
                errors.push(FieldError::new(path, format!("must be >= {min}")));
            }
        }
        if let Some(max) = self.maximum {
            if n > max {
                errors.push(FieldError::new(path, format!("must be <= {max}")));
            }
        }
        if let Some(min) = self.exclusive_minimum {
            if n <= min {
                errors.push(FieldError::new(path, format!("must be > {min}")));
            }
        }
        if let Some(max) = self.exclusive_maximum {
            if n >= max {
                errors.push(FieldError::new(path, format!("must be < {max}")));
            }
        }
    }

    fn check_array(&self, items: &[Value], path: &str, errors: &mut Vec<FieldError>) {
        let len = items.len() as u64;
        if let Some(min) = self.min_items {
            if len < min {
                errors.push(FieldError::new(path, format!("must contain at least {min} items")));
            }
        }
        if let Some(max) = self.max_items {
            if len > max {
                errors.push(FieldError::new(path, format!("must contain at most {max} items")));
            }
        }
        if let Some(item_schema) = &self.items {
            for (i, item) in items.iter().enumerate() {
                item_schema.check(item, &format!("{path}[{i}]"), errors);
            }
        }
    }

    fn check_object(&self, map: &Map<String, Value>, path: &str, errors: &mut Vec<FieldError>) {
        for name in &self.required {
            if !map.contains_key(name) {
                errors.push(FieldError::new(join(path, name), "is required"));
            }
        }

        for (key, value) in map {
            let child_path = join(path, key);
            match self.properties.get(key) {
                Some(schema) => schema.check(value, &child_path, errors),
                None => match &self.additional {
                    Additional::Allowed => {}
                    Additional::Forbidden => {
                        errors.push(FieldError::new(child_path, "is not an allowed property"))
                    }
                    Additional::Schema(schema) => schema.check(value, &child_path, errors),
                },
            }
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn compile_at(raw: &Value, at: &str) -> Result<CompiledSchema, String> {
    let map = match raw {
        Value::Object(map) => map,
        Value::Bool(true) => return Ok(CompiledSchema::default()),
        other => {
            return Err(format!(
                "{at}: schema must be an object, found {}",
                type_name(other)
            ))
        }
    };

    let mut schema = CompiledSchema::default();

    if let Some(t) = map.get("type") {
        let names: Vec<&Value> = match t {
            Value::Array(names) => names.iter().collect(),
            single => vec![single],
        };
        let mut types = Vec::with_capacity(names.len());
        for name in names {
            let parsed = name
                .as_str()
                .and_then(JsonType::parse)
                .ok_or_else(|| format!("{at}/type: unknown type {name}"))?;
            types.push(parsed);
        }
        schema.types = Some(types);
    }

    if let Some(props) = map.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| format!("{at}/properties: must be an object"))?;
        for (name, sub) in props {
            let compiled = compile_at(sub, &format!("{at}/properties/{name}"))?;
            schema.properties.insert(name.clone(), compiled);
        }
    }

    if let Some(required) = map.get("required") {
        let list = required
            .as_array()
            .ok_or_else(|| format!("{at}/required: must be an array"))?;
        for name in list {
            let name = name
                .as_str()
                .ok_or_else(|| format!("{at}/required: entries must be strings"))?;
            schema.required.push(name.to_string());
        }
    }

    if let Some(additional) = map.get("additionalProperties") {
        schema.additional = match additional {
            Value::Bool(true) => Additional::Allowed,
            Value::Bool(false) => Additional::Forbidden,
            sub => Additional::Schema(Box::new(compile_at(
                sub,
                &format!("{at}/additionalProperties"),
            )?)),
        };
    }

    if let Some(items) = map.get("items") {
        schema.items = Some(Box::new(compile_at(items, &format!("{at}/items"))?));
    }

    if let Some(values) = map.get("enum") {
        let values = values
            .as_array()
            .ok_or_else(|| format!("{at}/enum: must be an array"))?;
        schema.enum_values = Some(values.clone());
    }

    schema.const_value = map.get("const").cloned();
    schema.min_length = unsigned(map, "minLength", at)?;
    schema.max_length = unsigned(map, "maxLength", at)?;
    schema.min_items = unsigned(map, "minItems", at)?;
    schema.max_items = unsigned(map, "maxItems", at)?;
    schema.minimum = number(map, "minimum", at)?;
    schema.maximum = number(map, "maximum", at)?;
    schema.exclusive_minimum = number(map, "exclusiveMinimum", at)?;
    schema.exclusive_maximum = number(map, "exclusiveMaximum", at)?;
    schema.date_time = map.get("format").and_then(Value::as_str) == Some("date-time");

    Ok(schema)
}

fn unsigned(map: &Map<String, Value>, key: &str, at: &str) -> Result<Option<u64>, String> {
    map.get(key)
        .map(|v| {
            v.as_u64()
                .ok_or_else(|| format!("{at}/{key}: must be a non-negative integer"))
        })
        .transpose()
}

fn number(map: &Map<String, Value>, key: &str, at: &str) -> Result<Option<f64>, String> {
    map.get(key)
        .map(|v| v.as_f64().ok_or_else(|| format!("{at}/{key}: must be a number")))
        .transpose()
}
