//! Binary entry point for the treestore administrative CLI.
#![forbid(unsafe_code)]

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use treestore::{
    primitives::pager::{FilePageStore, PageStore, PagerOptions},
    PageRecPos, RowId, StoreError, TreeStore, TreeStoreOptions, TreeStoreStats,
};

use config::{CliConfig, ConfigError};

#[derive(Parser, Debug)]
#[command(
    name = "treestore",
    version,
    about = "Administrative CLI for treestore path indexes",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "TREESTORE_CONFIG",
        help = "CLI config file (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Page size (bytes) used when creating a store"
    )]
    page_size: Option<u32>,

    #[arg(long, global = true, help = "Items carry a timestamp after the row id")]
    timestamps: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Create an empty store")]
    Init {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },

    #[command(about = "Insert a path, creating missing components")]
    Insert {
        #[arg(value_name = "DB")]
        db_path: PathBuf,

        #[arg(value_name = "PATH", help = "Slash-separated path components")]
        path: String,

        #[arg(
            long,
            allow_negative_numbers = true,
            help = "Row id stored on the last component"
        )]
        row_id: Option<RowId>,

        #[arg(
            long,
            allow_negative_numbers = true,
            help = "Timestamp stored on the last component"
        )]
        timestamp: Option<i64>,
    },

    #[command(about = "Look up a path")]
    Get {
        #[arg(value_name = "DB")]
        db_path: PathBuf,

        #[arg(value_name = "PATH")]
        path: String,
    },

    #[command(about = "Delete a path and everything below it")]
    Delete {
        #[arg(value_name = "DB")]
        db_path: PathBuf,

        #[arg(value_name = "PATH")]
        path: String,
    },

    #[command(about = "List every leaf path")]
    List {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },

    #[command(about = "Print every reachable page, record and item")]
    Dump {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },

    #[command(about = "Print tree and page store statistics")]
    Stats {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },

    #[command(about = "Run the consistency check over every reachable page")]
    Check {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to encode JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

#[derive(Debug)]
struct Settings {
    page_size: u32,
    timestamps: bool,
    fsync: bool,
}

#[derive(Serialize)]
struct InitReport {
    path: String,
    page_size: usize,
    root_page: u32,
}

#[derive(Serialize)]
struct EntryReport {
    path: String,
    row_id: RowId,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    page: u32,
    record: u16,
    index: u16,
}

#[derive(Serialize)]
struct DeleteReport {
    path: String,
    deleted: bool,
}

#[derive(Serialize)]
struct PagerReport {
    page_size: usize,
    data_pages: u32,
    reads: u64,
    writes: u64,
}

#[derive(Serialize)]
struct StatsReport {
    root_page: u32,
    tree: TreeStoreStats,
    pager: PagerReport,
}

#[derive(Serialize)]
struct CheckReport {
    pages_checked: usize,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli.open)?;
    let format = cli.format;

    match cli.command {
        Command::Init { db_path } => {
            let (store, mut tree) = open_tree(&db_path, &settings, true)?;
            tree.flush()?;
            let report = InitReport {
                path: db_path.display().to_string(),
                page_size: store.page_size(),
                root_page: tree.root_page().0,
            };
            emit(format, &report, || {
                println!(
                    "Initialized {} (page_size={} root_page={})",
                    report.path, report.page_size, report.root_page
                )
            })?;
        }
        Command::Insert {
            db_path,
            path,
            row_id,
            timestamp,
        } => {
            let components = split_path(&path)?;
            let (_, mut tree) = open_tree(&db_path, &settings, false)?;
            let pos = tree
                .lookup(&components, true)?
                .ok_or_else(|| CliError::Message(format!("could not insert {path}")))?;
            if let Some(row_id) = row_id {
                pos.set_row_id(&mut tree, row_id)?;
            }
            if let Some(timestamp) = timestamp {
                pos.set_timestamp(&mut tree, timestamp)?;
            }
            let report = entry_report(&mut tree, components.join("/"), pos)?;
            tree.flush()?;
            emit(format, &report, || {
                println!("Inserted {} row_id={}", report.path, report.row_id)
            })?;
        }
        Command::Get { db_path, path } => {
            let components = split_path(&path)?;
            let (_, mut tree) = open_tree(&db_path, &settings, false)?;
            let pos = tree
                .lookup(&components, false)?
                .ok_or_else(|| CliError::Message(format!("path not found: {path}")))?;
            let report = entry_report(&mut tree, components.join("/"), pos)?;
            emit(format, &report, || print_entry_text(&report))?;
        }
        Command::Delete { db_path, path } => {
            let components = split_path(&path)?;
            let (_, mut tree) = open_tree(&db_path, &settings, false)?;
            let pos = tree
                .lookup(&components, false)?
                .ok_or_else(|| CliError::Message(format!("path not found: {path}")))?;
            pos.delete(&mut tree)?;
            tree.flush()?;
            let report = DeleteReport {
                path: components.join("/"),
                deleted: true,
            };
            emit(format, &report, || println!("Deleted {}", report.path))?;
        }
        Command::List { db_path } => {
            let (_, mut tree) = open_tree(&db_path, &settings, false)?;
            let mut leaves = Vec::new();
            for leaf in tree.path_iter() {
                leaves.push(leaf?);
            }
            let mut entries = Vec::with_capacity(leaves.len());
            for leaf in leaves {
                entries.push(entry_report(&mut tree, leaf.path.join("/"), leaf.pos)?);
            }
            emit(format, &entries, || {
                for entry in &entries {
                    println!("{}\t{}", entry.path, entry.row_id);
                }
            })?;
        }
        Command::Dump { db_path } => {
            let (_, mut tree) = open_tree(&db_path, &settings, false)?;
            let dump = tree.dump(true)?;
            emit(format, &dump, || print!("{dump}"))?;
        }
        Command::Stats { db_path } => {
            let (store, mut tree) = open_tree(&db_path, &settings, false)?;
            let stats = tree.stats()?;
            stats.emit_tracing();
            let pager = store.stats();
            let report = StatsReport {
                root_page: tree.root_page().0,
                tree: stats,
                pager: PagerReport {
                    page_size: store.page_size(),
                    data_pages: store.meta().data_pages(),
                    reads: pager.reads,
                    writes: pager.writes,
                },
            };
            let meta = store.meta();
            emit(format, &report, || {
                print_stats_text(&report);
                println!();
                println!("{meta}");
            })?;
        }
        Command::Check { db_path } => {
            let (_, mut tree) = open_tree(&db_path, &settings, false)?;
            let report = CheckReport {
                pages_checked: tree.check()?,
            };
            emit(format, &report, || {
                println!("OK: {} pages checked", report.pages_checked)
            })?;
        }
    }

    Ok(())
}

fn resolve_settings(args: &OpenArgs) -> Result<Settings, CliError> {
    let config = CliConfig::load(args.config.clone())?;
    if let Some(path) = config.path() {
        tracing::debug!(target: "treestore::cli", config = %path.display(), "resolved config path");
    }
    Ok(Settings {
        page_size: args.page_size.unwrap_or_else(|| config.page_size()),
        timestamps: args.timestamps || config.timestamps(),
        fsync: config.fsync(),
    })
}

fn open_tree(
    path: &Path,
    settings: &Settings,
    create: bool,
) -> Result<(Arc<FilePageStore>, TreeStore), CliError> {
    if !create && !path.exists() {
        return Err(CliError::Message(format!(
            "{} does not exist; run `treestore init` first",
            path.display()
        )));
    }
    let pager = PagerOptions::default()
        .page_size(settings.page_size)
        .fsync(settings.fsync);
    let store = Arc::new(FilePageStore::open(path, pager)?);
    let options = TreeStoreOptions::default().timestamps(settings.timestamps);
    let tree = TreeStore::open(store.clone(), options)?;
    Ok((store, tree))
}

fn split_path(raw: &str) -> Result<Vec<&str>, CliError> {
    let components: Vec<&str> = raw.split('/').filter(|part| !part.is_empty()).collect();
    if components.is_empty() {
        return Err(CliError::Message(format!(
            "path '{raw}' has no components"
        )));
    }
    Ok(components)
}

fn entry_report(
    tree: &mut TreeStore,
    path: String,
    pos: PageRecPos,
) -> Result<EntryReport, CliError> {
    let timestamp = if tree.has_timestamps() {
        Some(pos.timestamp(tree)?)
    } else {
        None
    };
    Ok(EntryReport {
        path,
        row_id: pos.row_id(tree)?,
        timestamp,
        page: pos.page.0,
        record: pos.record,
        index: pos.index,
    })
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), CliError>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_entry_text(report: &EntryReport) {
    print!("{} row_id={}", report.path, report.row_id);
    if let Some(timestamp) = report.timestamp {
        print!(" timestamp={timestamp}");
    }
    println!(
        " (page={} record={} index={})",
        report.page, report.record, report.index
    );
}

fn print_stats_text(report: &StatsReport) {
    println!("Tree (root_page={}):", report.root_page);
    for line in report.tree.to_string().lines() {
        println!("  {line}");
    }
    println!();
    println!(
        "Pager: page_size={} data_pages={} reads={} writes={}",
        report.pager.page_size, report.pager.data_pages, report.pager.reads, report.pager.writes
    );
}
