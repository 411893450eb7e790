//! CLI tool for collection declarations.
//!
//! Provides commands for:
//! - Validating a collections file
//! - Printing the derived tables of every collection
//! - Printing record shapes and resolved relations

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use content_repo_core::store::TableSchema;
use content_repo_core::{CollectionsFile, Repository};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the repository and report what it contains
    Validate {
        /// Collections file (JSON)
        file: PathBuf,
    },

    /// Print the derived tables
    Schema {
        /// Collections file (JSON)
        file: PathBuf,

        /// Only this collection or global
        #[arg(short, long)]
        collection: Option<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print select, insert and update shapes as JSON
    Shapes {
        /// Collections file (JSON)
        file: PathBuf,

        /// Collection or global name
        #[arg(short, long)]
        collection: String,
    },

    /// Print the resolved relations as JSON
    Relations {
        /// Collections file (JSON)
        file: PathBuf,

        /// Only this collection or global
        #[arg(short, long)]
        collection: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = run(cli.command)?;
    print!("{output}");
    Ok(())
}

fn run(command: Commands) -> Result<String> {
    match command {
        Commands::Validate { file } => {
            let repo = load(&file)?;
            Ok(summary(&repo))
        }
        Commands::Schema {
            file,
            collection,
            json,
        } => {
            let repo = load(&file)?;
            let tables = selected_tables(&repo, collection.as_deref())?;
            if json {
                Ok(serde_json::to_string_pretty(&tables)? + "\n")
            } else {
                Ok(tables.iter().map(|t| describe_table(t)).collect())
            }
        }
        Commands::Shapes { file, collection } => {
            let repo = load(&file)?;
            let runtime = repo.runtime(&collection)?;
            Ok(serde_json::to_string_pretty(&runtime.shapes)? + "\n")
        }
        Commands::Relations { file, collection } => {
            let repo = load(&file)?;
            let mut relations = serde_json::Map::new();
            for runtime in repo.runtimes() {
                if collection.as_deref().is_some_and(|name| name != runtime.name()) {
                    continue;
                }
                if runtime.relations.is_empty() {
                    continue;
                }
                relations.insert(
                    runtime.name().to_string(),
                    serde_json::to_value(&runtime.relations)?,
                );
            }
            Ok(serde_json::to_string_pretty(&relations)? + "\n")
        }
    }
}

/// Reads a collections file and builds the repository it declares.
fn load(file: &PathBuf) -> Result<Repository> {
    let declarations = CollectionsFile::from_json_file(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let repo = declarations
        .build()
        .with_context(|| format!("Invalid declarations in {}", file.display()))?;
    tracing::debug!(
        file = %file.display(),
        collections = repo.collection_names().len(),
        globals = repo.global_names().len(),
        "loaded declarations"
    );
    Ok(repo)
}

fn selected_tables<'a>(repo: &'a Repository, only: Option<&str>) -> Result<Vec<&'a TableSchema>> {
    if let Some(name) = only {
        repo.runtime(name)?;
    }
    Ok(repo
        .runtimes()
        .filter(|runtime| only.map_or(true, |name| name == runtime.name()))
        .flat_map(|runtime| runtime.schema.tables.iter())
        .collect())
}

fn summary(repo: &Repository) -> String {
    let mut out = String::new();
    for runtime in repo.runtimes() {
        let kind = if repo.global_names().contains(&runtime.name()) {
            "global"
        } else {
            "collection"
        };
        let tables: Vec<&str> = runtime
            .schema
            .tables
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        let _ = writeln!(
            out,
            "{kind} {}: {} fields, {} relations, tables [{}]",
            runtime.name(),
            runtime.definition.fields.len(),
            runtime.relations.len(),
            tables.join(", ")
        );
    }
    let _ = writeln!(
        out,
        "OK: {} collections, {} globals, {} tables",
        repo.collection_names().len(),
        repo.global_names().len(),
        repo.store().table_names().len()
    );
    out
}

/// One table as indented text.
fn describe_table(table: &TableSchema) -> String {
    let mut out = format!("table {}\n", table.name);
    for column in &table.columns {
        let mut flags = Vec::new();
        if column.primary_key {
            flags.push("primary key".to_string());
        }
        if !column.nullable {
            flags.push("not null".to_string());
        }
        if let Some(default) = &column.default {
            flags.push(format!("default {default}"));
        }
        let _ = writeln!(
            out,
            "  {} {}{}",
            column.name,
            column.column_type.as_str(),
            if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            }
        );
    }
    for index in &table.indexes {
        let kind = if index.unique { "unique" } else { "index" };
        let _ = writeln!(out, "  {kind} {} ({})", index.name, index.columns.join(", "));
    }
    for foreign_key in &table.foreign_keys {
        let _ = writeln!(
            out,
            "  foreign key ({}) references {} ({})",
            foreign_key.columns.join(", "),
            foreign_key.references_table,
            foreign_key.references_columns.join(", ")
        );
    }
    out
}
