//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use folio_core::backup::BackupInfo;
use folio_core::plugins::PluginStatus;
use folio_core::Document;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Print a single document
    pub fn print_document(&self, doc: &Document) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!("ID:      {}", doc.id);
                println!("Created: {}", doc.created_at.format("%Y-%m-%d %H:%M:%S"));
                println!("Updated: {}", doc.updated_at.format("%Y-%m-%d %H:%M:%S"));
                if !doc.fields.is_empty() {
                    println!();
                    for (key, value) in &doc.fields {
                        println!("  {}: {}", key, truncate(&value.to_string(), 60));
                    }
                }
            }
            OutputFormat::Json => self.print_json(doc)?,
            OutputFormat::Quiet => println!("{}", doc.id),
        }
        Ok(())
    }

    /// Print query results
    pub fn print_rows(&self, rows: &[Value]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if rows.is_empty() {
                    println!("No documents found.");
                    return Ok(());
                }
                for row in rows {
                    let id = row.get("id").and_then(Value::as_str).unwrap_or("-");
                    println!("{} | {}", id, truncate(&row.to_string(), 70));
                }
                println!("\n{} document(s)", rows.len());
            }
            OutputFormat::Json => self.print_json(rows)?,
            OutputFormat::Quiet => {
                for row in rows {
                    if let Some(id) = row.get("id").and_then(Value::as_str) {
                        println!("{}", id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Print a list of backups
    pub fn print_backups(&self, backups: &[BackupInfo]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if backups.is_empty() {
                    println!("No backups found.");
                    return Ok(());
                }
                for backup in backups {
                    let kind = backup
                        .metadata
                        .as_ref()
                        .map(|m| format!("{:?}", m.kind).to_lowercase())
                        .unwrap_or_else(|| "unknown".to_string());
                    println!(
                        "{} | {:>10} | {} | {}",
                        backup.name,
                        human_size(backup.size),
                        backup.modified.format("%Y-%m-%d %H:%M"),
                        kind
                    );
                }
                println!("\n{} backup(s)", backups.len());
            }
            OutputFormat::Json => self.print_json(backups)?,
            OutputFormat::Quiet => {
                for backup in backups {
                    println!("{}", backup.name);
                }
            }
        }
        Ok(())
    }

    /// Print package version skew
    pub fn print_plugin_statuses(&self, statuses: &[PluginStatus]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if statuses.is_empty() {
                    println!("No packages found.");
                    return Ok(());
                }
                for status in statuses {
                    println!(
                        "{} | installed {} | latest {} | {}",
                        status.plugin,
                        status.installed.as_deref().unwrap_or("(never synced)"),
                        status.latest,
                        if status.current { "current" } else { "outdated" }
                    );
                }
            }
            OutputFormat::Json => self.print_json(statuses)?,
            OutputFormat::Quiet => {
                for status in statuses.iter().filter(|s| !s.current) {
                    println!("{}", status.plugin);
                }
            }
        }
        Ok(())
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Format a byte count for humans
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }
}
