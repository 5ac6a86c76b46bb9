// src/main.rs

//! The `driftdb` CLI: a thin external collaborator (spec.md §6) over the
//! library's [`Store`]. It opens a file, makes exactly one core call, and
//! formats the result — every CRDT decision lives in the library, not here.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use driftdb::{ApplicationId, Store, Value, Version};
use std::cmp::max;
use std::path::PathBuf;
use unicode_width::UnicodeWidthStr;

/// The application identifier the CLI stamps into files it creates. A file
/// stamped by some other embedding application fails the open-time gate
/// with `IncompatibleApplications` (spec.md §4.4) rather than opening here.
fn expected_app() -> ApplicationId {
    ApplicationId::new("org.driftdb.cli", 1, 0).with_description("driftdb command-line interface")
}

#[derive(Parser)]
#[command(name = "driftdb")]
#[command(author, version, about = "Offline-mergeable CRDT key-value store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print entry/author/tombstone counts and the consistency flag
    Stats {
        /// Path to the driftdb file
        path: PathBuf,
    },
    /// List keys, optionally filtered by scope and/or key
    List {
        /// Path to the driftdb file
        path: PathBuf,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        key: Option<String>,
    },
    /// Read every version at a (scope, key)
    Get {
        /// Path to the driftdb file
        path: PathBuf,
        #[arg(long)]
        key: String,
        #[arg(long, default_value = "")]
        scope: String,
    },
    /// Full-text search over entry text
    Search {
        /// Path to the driftdb file
        path: PathBuf,
        #[arg(long = "search-text")]
        search_text: String,
    },
    /// Collapse a replica to a single-author database with no history
    EraseVersionHistory {
        /// Path to the driftdb file
        path: PathBuf,
    },
    /// Merge one replica into another
    Merge {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        dest: PathBuf,
        /// Compute the change set without applying it
        #[arg(long)]
        dry_run: bool,
    },
}

fn open(path: &PathBuf) -> Result<Store> {
    Store::open(path, expected_app(), "driftdb-cli", |_, _| Ok(()))
        .with_context(|| format!("opening {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stats { path } => cmd_stats(&path),
        Commands::List { path, scope, key } => cmd_list(&path, scope, key),
        Commands::Get { path, key, scope } => cmd_get(&path, &scope, &key),
        Commands::Search { path, search_text } => cmd_search(&path, &search_text),
        Commands::EraseVersionHistory { path } => cmd_erase_version_history(&path),
        Commands::Merge {
            source,
            dest,
            dry_run,
        } => cmd_merge(&source, &dest, dry_run),
    }
}

fn cmd_stats(path: &PathBuf) -> Result<()> {
    let store = open(path)?;
    let stats = store.statistics()?;
    println!("entries:    {}", stats.entry_count);
    println!("authors:    {}", stats.author_count);
    println!("tombstones: {}", stats.tombstone_count);
    if !stats.consistent {
        eprintln!(
            "warning: author-table consistency invariant violated; recommend erase-version-history"
        );
    }
    Ok(())
}

fn cmd_list(path: &PathBuf, scope: Option<String>, key: Option<String>) -> Result<()> {
    let store = open(path)?;
    let keys = store.keys(scope.as_deref(), key.as_deref())?;
    if keys.is_empty() {
        println!("No keys found.");
        return Ok(());
    }
    print_two_column_table("scope", "key", &keys);
    Ok(())
}

fn cmd_get(path: &PathBuf, scope: &str, key: &str) -> Result<()> {
    let store = open(path)?;
    let result = store.read(scope, key)?;
    if result.is_empty() {
        println!("No such key.");
        return Ok(());
    }
    for (i, version) in result.iter().enumerate() {
        if i > 0 {
            println!("---");
        }
        print_version(version);
    }
    Ok(())
}

fn print_version(version: &Version) {
    println!("author:    {}", version.author_id);
    println!("timestamp: {}", version.timestamp.to_rfc3339());
    match &version.value {
        Value::Null => println!("value:     DELETED"),
        Value::Text(text) => println!("value:     {text}"),
        Value::Json(json) => match serde_json::from_str::<serde_json::Value>(json) {
            Ok(parsed) => {
                let pretty =
                    serde_json::to_string_pretty(&parsed).unwrap_or_else(|_| json.clone());
                println!("value:     {pretty}");
            }
            Err(_) => println!("value:     {json}"),
        },
        Value::Blob { mime_type, bytes } => {
            println!("value:     <{mime_type}, {} bytes>", bytes.len());
        }
    }
}

fn cmd_search(path: &PathBuf, query: &str) -> Result<()> {
    let store = open(path)?;
    let hits = store.search_text(query)?;
    if hits.is_empty() {
        println!("No matches.");
        return Ok(());
    }
    print_two_column_table("scope", "key", &hits);
    Ok(())
}

fn cmd_erase_version_history(path: &PathBuf) -> Result<()> {
    let mut store = open(path)?;
    store.erase_version_history()?;
    println!("Success");
    Ok(())
}

fn cmd_merge(source: &PathBuf, dest: &PathBuf, dry_run: bool) -> Result<()> {
    let source_store = open(source)?;
    let mut dest_store = open(dest)?;
    let report = if dry_run {
        dest_store.merge_dry_run(&source_store)?
    } else {
        dest_store.merge(&source_store)?
    };
    if report.changed.is_empty() {
        println!("No changes.");
        return Ok(());
    }
    print_two_column_table("scope", "key", &report.changed);
    if report.has_conflicts {
        println!("\nsome merged keys still carry multiple versions; caller must resolve");
    }
    Ok(())
}

/// A minimal two-column table, grounded on the corpus's own text-table
/// helper (`examples/mozilla-application-services/components/support/text-table`)
/// but sized down to what `list`/`search`/`merge` print.
fn print_two_column_table(header0: &str, header1: &str, rows: &[(String, String)]) {
    let mut width0 = UnicodeWidthStr::width(header0);
    let mut width1 = UnicodeWidthStr::width(header1);
    for (a, b) in rows {
        width0 = max(width0, UnicodeWidthStr::width(a.as_str()));
        width1 = max(width1, UnicodeWidthStr::width(b.as_str()));
    }
    println!("{header0:width0$}  {header1:width1$}");
    for (a, b) in rows {
        println!("{a:width0$}  {b:width1$}");
    }
}
