//! Schema commands

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Subcommand};

use crate::output::{render_table, to_json, OutputFormat};
use graft_core::{EntityRegistry, FieldKind, SchemaDocument};

#[derive(Args)]
pub struct SchemaArgs {
    #[command(subcommand)]
    pub command: SchemaCommands,
}

#[derive(Subcommand)]
pub enum SchemaCommands {
    /// Validate a schema file
    Check {
        /// Schema file (defaults to --schema or the configured schema)
        file: Option<PathBuf>,
    },
    /// Print entities, fields and relationship mirrors
    Show {
        /// Schema file (defaults to --schema or the configured schema)
        file: Option<PathBuf>,
    },
}

/// Parse and validate a schema file; `.json` files are read as JSON, anything else as TOML
pub fn load_schema(path: &Path) -> anyhow::Result<EntityRegistry> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading schema {}", path.display()))?;

    let doc: SchemaDocument = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?,
        _ => toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?,
    };

    let registry = EntityRegistry::from_document(doc)?;
    tracing::debug!("Loaded schema from {}", path.display());
    Ok(registry)
}

pub fn run(
    args: &SchemaArgs,
    default_path: Option<PathBuf>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (SchemaCommands::Check { file } | SchemaCommands::Show { file }) = &args.command;
    let path = file
        .clone()
        .or(default_path)
        .ok_or_else(|| anyhow::anyhow!("No schema file given"))?;
    let registry = load_schema(&path)?;

    match &args.command {
        SchemaCommands::Check { .. } => {
            let count = registry.labels().count();
            println!("Schema OK: {} entities ({})", count, path.display());
        }
        SchemaCommands::Show { .. } => match format {
            OutputFormat::Json => println!("{}", to_json(&registry.to_document())?),
            OutputFormat::Table => print_schema(&registry),
        },
    }
    Ok(())
}

fn print_schema(registry: &EntityRegistry) {
    for label in registry.labels() {
        let Some(entity) = registry.entity(label) else {
            continue;
        };
        println!("{}", label);

        let rows: Vec<Vec<String>> = entity
            .fields
            .iter()
            .map(|field| match &field.kind {
                FieldKind::Scalar(kind) => vec![
                    field.name.clone(),
                    format!("{:?}", kind).to_lowercase(),
                    String::new(),
                ],
                FieldKind::Relationship(info) => {
                    let mut detail = format!(
                        "{} -> {} ({}, {})",
                        info.rel_type, info.target, info.cardinality, info.direction
                    );
                    if info.ordered {
                        detail.push_str(" ordered");
                    }
                    if let Some((other, mirror)) = registry.inverse_of(label, &field.name) {
                        detail.push_str(&format!(" mirror {}.{}", other, mirror.name));
                    }
                    vec![field.name.clone(), "relationship".to_string(), detail]
                }
            })
            .collect();

        if rows.is_empty() {
            println!("  (no fields)");
        } else {
            for line in render_table(&["field", "kind", "detail"], &rows).lines() {
                println!("  {}", line);
            }
        }
        println!();
    }
}
