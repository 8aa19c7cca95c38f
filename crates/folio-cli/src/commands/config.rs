//! Config command handlers

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;

use folio_core::backup::MAX_COMPRESSION_LEVEL;
use folio_core::{Engine, EngineConfig, LoadOptions};

use super::parse_json;
use crate::output::{Output, OutputFormat};

/// Show current engine settings
pub fn show(config_path: &Path, output: &Output) -> Result<()> {
    let config =
        EngineConfig::load_from_path(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => output.print_json(&config)?,
        OutputFormat::Quiet => {
            println!("{}", config.root_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  root_dir:          {}", config.root_dir.display());
            println!("  data:              {}", config.data_path().display());
            println!("  config documents:  {}", config.config_docs_path().display());
            println!("  schemas:           {}", config.schemas_path().display());
            println!("  backups:           {}", config.backups_path().display());
            println!("  config_ttl_secs:   {}", config.cache.config_ttl_secs);
            println!("  retention_days:    {}", config.backup.retention_days);
            println!(
                "  compression_level: {}",
                config
                    .backup
                    .compression_level
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "(default)".to_string())
            );
            println!("  auto_backup:       {}", config.backup.auto_backup);
            println!(
                "  bus_url:           {}",
                config.plugins.bus_url.as_deref().unwrap_or("(in-process)")
            );
            println!("  listen:            {}", config.plugins.listen);
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}

/// Set an engine setting
pub fn set(key: &str, value: &str, config_path: &Path, output: &Output) -> Result<()> {
    let mut config =
        EngineConfig::load_from_path(config_path).context("Failed to load configuration")?;

    match key {
        "root_dir" => {
            config.root_dir = PathBuf::from(value);
        }
        "config_ttl_secs" => {
            config.cache.config_ttl_secs = value
                .parse()
                .context("Invalid value for config_ttl_secs. Use a number of seconds.")?;
        }
        "retention_days" => {
            config.backup.retention_days = value
                .parse()
                .context("Invalid value for retention_days. Use a number of days.")?;
        }
        "compression_level" => {
            config.backup.compression_level = if value.is_empty() || value == "none" {
                None
            } else {
                let level: i64 = value.parse().context(
                    "Invalid value for compression_level. Use 0 (store), 1-9 (deflate) or 'none'.",
                )?;
                if !(0..=MAX_COMPRESSION_LEVEL).contains(&level) {
                    bail!(
                        "compression_level must be between 0 and {}, got {}",
                        MAX_COMPRESSION_LEVEL,
                        level
                    );
                }
                Some(level)
            };
        }
        "auto_backup" => {
            config.backup.auto_backup = value
                .parse()
                .context("Invalid value for auto_backup. Use 'true' or 'false'.")?;
        }
        "bus_url" => {
            config.plugins.bus_url = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.to_string())
            };
        }
        "listen" => {
            config.plugins.listen = value
                .parse()
                .context("Invalid value for listen. Use 'true' or 'false'.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: root_dir, config_ttl_secs, retention_days, compression_level, \
                 auto_backup, bus_url, listen",
                key
            );
        }
    }

    config
        .save_to(config_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

/// Read a config document, or one value inside it
pub async fn get_document(
    name: &str,
    path: Option<&str>,
    engine: &Engine,
    output: &Output,
) -> Result<()> {
    let value = match path {
        Some(path) => engine.configs().get(name, path, Value::Null).await?,
        None => engine
            .configs()
            .load(name, LoadOptions::default())
            .await?
            .as_ref()
            .clone(),
    };

    match output.format {
        OutputFormat::Quiet => match &value {
            Value::String(s) => println!("{}", s),
            other => println!("{}", other),
        },
        OutputFormat::Json | OutputFormat::Human => output.print_json(&value)?,
    }
    Ok(())
}

/// Replace a config document
pub async fn put_document(name: &str, raw: &str, engine: &Engine, output: &Output) -> Result<()> {
    let value = parse_json(raw, "config document")?;
    engine.configs().save(name, &value).await?;
    output.success(&format!("Saved config document '{}'", name));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quiet() -> Output {
        Output::new(OutputFormat::Quiet)
    }

    #[test]
    fn test_set_persists_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        set("compression_level", "0", &path, &quiet()).unwrap();
        set("listen", "true", &path, &quiet()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let config = EngineConfig::load_from_str(&content).unwrap();
        assert_eq!(config.backup.compression_level, Some(0));
        assert!(config.plugins.listen);
    }

    #[test]
    fn test_set_rejects_unknown_key_and_bad_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        assert!(set("favorite_color", "blue", &path, &quiet()).is_err());
        assert!(set("retention_days", "forever", &path, &quiet()).is_err());
        assert!(set("compression_level", "10", &path, &quiet()).is_err());
        assert!(set("compression_level", "-1", &path, &quiet()).is_err());
        assert!(!path.exists());
    }
}
