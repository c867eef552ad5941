use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use docdelta::core::{DataType, DocumentSubtype, Value};
use docdelta::diff::{ChangeSet, FieldChange};
use docdelta::patch::{ColumnTypeResolver, PatchCompiler, PatchDialect, PostgresDialect, SchemaSource};
use serde_json::{Value as JsonValue, json};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docdelta")]
#[command(about = "Diff JSON documents and render leaf-level column patches")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the dotted-key changes that turn OLD into NEW
    Diff { old: PathBuf, new: PathBuf },
    /// Print the SQL that patches a document column from OLD to NEW
    Patch {
        old: PathBuf,
        new: PathBuf,
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        #[arg(long, default_value_t = DocumentSubtype::Jsonb)]
        subtype: DocumentSubtype,
        /// Render a full UPDATE addressed by this id instead of the bare assignment
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "id")]
        key_column: String,
    },
}

/// Answers every lookup with the subtype given on the command line.
struct FixedSubtype(DocumentSubtype);

#[async_trait]
impl SchemaSource for FixedSubtype {
    async fn column_type(&self, _table: &str, _column: &str) -> docdelta::Result<Option<DataType>> {
        Ok(Some(DataType::Document(self.0)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Diff { old, new } => run_diff(&old, &new),
        Command::Patch {
            old,
            new,
            table,
            column,
            subtype,
            id,
            key_column,
        } => run_patch(&old, &new, &table, &column, subtype, id, &key_column).await,
    }
}

fn read_document(path: &Path) -> Result<Option<JsonValue>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let json: JsonValue =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(match json {
        JsonValue::Null => None,
        other => Some(other),
    })
}

fn document_changes(field: &str, old: &Path, new: &Path) -> Result<ChangeSet> {
    let old = read_document(old)?;
    let new = read_document(new)?;
    let mut changes = ChangeSet::new();
    changes.record_document(field, FieldChange::between(&new, &old));
    Ok(changes)
}

fn run_diff(old: &Path, new: &Path) -> Result<()> {
    let changes = document_changes("$", old, new)?;
    let flat: serde_json::Map<String, JsonValue> = changes
        .flatten()
        .into_iter()
        .map(|(key, value)| {
            let key = match key.strip_prefix("$.") {
                Some(path) => path.to_string(),
                None => key,
            };
            (key, value)
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&JsonValue::Object(flat))?);
    Ok(())
}

async fn run_patch(
    old: &Path,
    new: &Path,
    table: &str,
    column: &str,
    subtype: DocumentSubtype,
    id: Option<String>,
    key_column: &str,
) -> Result<()> {
    let changes = document_changes(column, old, new)?;
    if changes.is_empty() {
        println!("{}", json!({ "sql": null, "args": [] }));
        return Ok(());
    }

    let resolver = ColumnTypeResolver::new(Arc::new(FixedSubtype(subtype)));
    let patches = PatchCompiler::new(resolver)
        .compile(table, &[], &changes)
        .await?;
    debug!("Compiled {} patch(es)", patches.len());

    let dialect = PostgresDialect;
    let (sql, args) = match id {
        Some(id) => {
            let fragment = dialect.render_update(table, key_column, &Value::Text(id), &patches);
            (fragment.sql, fragment.args)
        }
        None => {
            let mut args = Vec::new();
            let assignments: Vec<String> = patches
                .iter()
                .map(|patch| dialect.render_assignment(patch, &mut args))
                .collect();
            (assignments.join(", "), args)
        }
    };

    let args: Vec<JsonValue> = args.iter().map(Value::to_json).collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "sql": sql, "args": args }))?
    );
    Ok(())
}
