//! Document command handlers

use anyhow::Result;
use tracing::warn;

use folio_core::{Engine, Filter, QueryOptions, SortSpec};

use super::{parse_json, parse_object};
use crate::output::{Output, OutputFormat};
use crate::DocCommands;

pub async fn run(command: DocCommands, engine: &Engine, output: &Output) -> Result<()> {
    let store = engine.store();

    match command {
        DocCommands::Create { collection, data } => {
            let fields = parse_object(&data, "document data")?;
            let doc = store.create(&collection, fields).await?;
            match output.format {
                OutputFormat::Human => output.success(&format!("Created {}/{}", collection, doc.id)),
                _ => output.print_document(&doc)?,
            }
        }
        DocCommands::Get { collection, id } => {
            let doc = store.read(&collection, &id).await?;
            output.print_document(&doc)?;
        }
        DocCommands::Update {
            collection,
            id,
            patch,
        } => {
            let patch = parse_object(&patch, "patch")?;
            let doc = store.update(&collection, &id, patch).await?;
            match output.format {
                OutputFormat::Human => output.success(&format!("Updated {}/{}", collection, doc.id)),
                _ => output.print_document(&doc)?,
            }
        }
        DocCommands::Delete { collection, id } => {
            store.delete(&collection, &id).await?;
            output.success(&format!("Deleted {}/{}", collection, id));
        }
        DocCommands::List {
            collection,
            filter,
            sort,
            desc,
            limit,
            select,
        } => {
            let filter = match filter {
                Some(raw) => Filter::parse(&parse_json(&raw, "--where")?)?,
                None => Filter::new(),
            };
            let options = QueryOptions {
                sort: sort.map(|field| {
                    if desc {
                        SortSpec::desc(field)
                    } else {
                        SortSpec::asc(field)
                    }
                }),
                limit,
                select: if select.is_empty() { None } else { Some(select) },
            };

            let scan = store.read_collection(&collection).await?;
            for defect in &scan.defects {
                warn!(path = ?defect.path, reason = %defect.reason, "skipped unreadable document");
            }
            let matched = folio_core::query::filter(scan.documents, &filter);
            let rows = folio_core::query::apply_options(matched, &options);
            output.print_rows(&rows)?;
        }
        DocCommands::Collections => {
            let collections = store.list_collections().await?;
            match output.format {
                OutputFormat::Json => output.print_json(&collections)?,
                OutputFormat::Human if collections.is_empty() => {
                    println!("No collections found.");
                }
                _ => {
                    for name in collections {
                        println!("{}", name);
                    }
                }
            }
        }
    }

    Ok(())
}
