// Record Store - Command line host
// Drives one StoreSession per invocation: open, act, report.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use record_store::{Filter, Record, StoreConfig, StoreSession};

#[derive(Parser, Debug)]
#[command(name = "record-store", version, about = "Flat-file key/value/tags record store")]
struct Cli {
    /// Record file (default: the configured default file)
    #[arg(long, short, global = true)]
    file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Errors only
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every record
    List {
        #[arg(long)]
        json: bool,
    },

    /// Print records matching a term (substring by default)
    Search {
        term: String,
        #[arg(long)]
        regex: bool,
        #[arg(long)]
        json: bool,
    },

    /// Append a record
    Add {
        key: String,
        #[arg(long, default_value = "")]
        value: String,
        #[arg(long, default_value = "")]
        tags: String,
    },

    /// Change a record; omitted fields keep their current content
    Update {
        key: String,
        /// Rename the record
        #[arg(long = "key")]
        new_key: Option<String>,
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        tags: Option<String>,
    },

    /// Remove a record
    Delete { key: String },

    /// Load the file and report skipped rows
    Check,

    /// Write the records to another file
    SaveAs { path: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };

    let path = cli.file.clone().unwrap_or_else(|| config.default_file.clone());
    let mut session = StoreSession::new(config);
    let loaded = session
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;

    if loaded.created {
        eprintln!("Created {}", path.display());
    }

    match cli.command {
        Commands::List { json } => print_records(session.view(), json)?,

        Commands::Search { term, regex, json } => {
            let filter = if regex {
                Filter::Regex(term)
            } else {
                Filter::Substring(term)
            };
            session.search(filter)?;
            print_records(session.view(), json)?;
        }

        Commands::Add { key, value, tags } => {
            session.create_record(Record::new(key, value, tags))?;
            save_if_needed(&mut session)?;
            println!("{}", session.status());
        }

        Commands::Update {
            key,
            new_key,
            value,
            tags,
        } => {
            let current = match session.records().iter().find(|r| r.key == key) {
                Some(record) => record.clone(),
                None => bail!("no record with key `{}`", key),
            };
            let updated = Record {
                key: new_key.unwrap_or(current.key),
                value: value.unwrap_or(current.value),
                tags: tags.unwrap_or(current.tags),
            };

            session.update_record(&key, updated)?;
            save_if_needed(&mut session)?;
            println!("{}", session.status());
        }

        Commands::Delete { key } => {
            session.delete_record(&key)?;
            save_if_needed(&mut session)?;
            println!("{}", session.status());
        }

        Commands::Check => {
            for warning in session.warnings() {
                println!("{}: {}", path.display(), warning);
            }
            println!(
                "{} records, {} rows skipped",
                session.records().len(),
                session.warnings().len()
            );
            if !session.warnings().is_empty() {
                std::process::exit(1);
            }
        }

        Commands::SaveAs { path: target } => {
            let written = session.save_as(&target)?;
            println!("Saved {} records to {}", session.records().len(), written.display());
        }
    }

    Ok(())
}

/// RUST_LOG wins; otherwise -v means debug, -q means error, default warn
fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Commits are only written automatically when autosave is on
fn save_if_needed(session: &mut StoreSession) -> Result<()> {
    if session.has_unsaved_changes() {
        let path: &Path = session.current_path();
        let display = path.display().to_string();
        session.save().with_context(|| format!("saving {}", display))?;
    }
    Ok(())
}

fn print_records(records: &[Record], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    for record in records {
        if record.tags.is_empty() {
            println!("{}\t{}", record.key, record.value);
        } else {
            println!("{}\t{}\t[{}]", record.key, record.value, record.tags);
        }
    }
    Ok(())
}
