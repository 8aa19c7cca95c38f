//! Entity command handlers

use anyhow::{bail, Context, Result};
use serde_json::Value;

use folio_core::Engine;

use super::parse_json;
use crate::output::{Output, OutputFormat};
use crate::EntityCommands;

pub async fn run(command: EntityCommands, engine: &Engine, output: &Output) -> Result<()> {
    let schemas = engine.schemas();

    match command {
        EntityCommands::Validate { entity, data } => {
            let data = parse_json(&data, "entity data")?;
            let outcome = schemas.validate(&entity, &data).await?;
            match output.format {
                OutputFormat::Json => output.print_json(&outcome)?,
                OutputFormat::Quiet => {}
                OutputFormat::Human => {
                    if outcome.valid {
                        output.success(&format!("Valid {}", entity));
                    } else {
                        println!("Invalid {}:", entity);
                        for error in &outcome.errors {
                            println!("  {}: {}", error.field, error.message);
                        }
                    }
                }
            }
            if !outcome.valid {
                bail!("{} failed validation", entity);
            }
        }
        EntityCommands::Save { entity, data } => {
            let data = parse_json(&data, "entity data")?;
            let doc = schemas.save(&entity, data).await?;
            match output.format {
                OutputFormat::Human => {
                    let binding = schemas.binding(&entity);
                    output.success(&format!("Saved {}/{}", binding.collection, doc.id));
                }
                _ => output.print_document(&doc)?,
            }
        }
        EntityCommands::Get { entity, id } => {
            let doc = schemas.load(&entity, &id).await?;
            output.print_document(&doc)?;
        }
        EntityCommands::RegisterSchema { entity, file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read schema file {:?}", file))?;
            let schema: Value = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in schema file {:?}", file))?;
            schemas.register_schema(&entity, schema).await?;
            output.success(&format!("Registered schema for {}", entity));
        }
    }

    Ok(())
}
