//! Command handlers

pub mod backup;
pub mod config;
pub mod docs;
pub mod entity;
pub mod plugins;
pub mod serve;
pub mod status;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

/// Parse a command-line argument as JSON
pub fn parse_json(raw: &str, what: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON for {}", what))
}

/// Parse a command-line argument as a JSON object
pub fn parse_object(raw: &str, what: &str) -> Result<Map<String, Value>> {
    match parse_json(raw, what)? {
        Value::Object(map) => Ok(map),
        other => bail!("{} must be a JSON object, got {}", what, other),
    }
}
