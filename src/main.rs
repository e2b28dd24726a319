use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

use trademirror::coach::DEFAULT_RECENT_TRADES;
use trademirror::config::Config;
use trademirror::data::FileSource;
use trademirror::logging::{obj, v_str, Domain, Logger};
use trademirror::storage::report_fields;
use trademirror::Journal;

#[derive(Parser, Debug)]
#[command(name = "trademirror")]
#[command(about = "Import broker trade exports into a local journal and report performance")]
struct Args {
    /// SQLite journal path (overrides TRADEMIRROR_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Upload size limit in MiB (overrides MAX_FILE_MB)
    #[arg(long, global = true)]
    max_file_mb: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize a CSV/XLSX/XLS export and store its new trades
    Import {
        /// File to import; `-` reads stdin
        file: PathBuf,
        /// Source tag recorded with every inserted trade
        #[arg(long, default_value = "csv_upload")]
        source: String,
        /// File name to assume for stdin (its extension selects the reader)
        #[arg(long)]
        name: Option<String>,
    },
    /// Metrics for a file without storing anything
    Analyze {
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// Stored trades, newest first
    Trades {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Aggregate counts straight from the store
    Stats,
    /// Full metrics over stored trades
    Metrics {
        #[arg(long)]
        source: Option<String>,
    },
    /// Check the store for duplicate fingerprints and inconsistent rows
    Verify,
    /// Write a consistent copy of the journal
    Backup { dest: PathBuf },
    /// Validate and hash a file without parsing it
    Manifest {
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// Anonymized metrics and recent trades for the coaching service
    Coach {
        #[arg(long, default_value_t = DEFAULT_RECENT_TRADES)]
        recent: usize,
        #[arg(long)]
        source: Option<String>,
    },
}

fn file_source(file: &PathBuf, name: Option<&str>) -> Result<FileSource> {
    if file.as_os_str() == "-" {
        FileSource::from_reader(name, std::io::stdin().lock()).context("failed to read stdin")
    } else {
        Ok(FileSource::path(file))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(args: Args, config: &Config, logger: Logger) -> Result<()> {
    let mut journal = Journal::open(config, logger.clone())
        .with_context(|| format!("failed to open journal at {}", config.db_path.display()))?;

    match args.command {
        Command::Import { file, source, name } => {
            let src = file_source(&file, name.as_deref())?;
            let summary = journal
                .import(&src, &source)
                .with_context(|| format!("import of {} failed", src.display_name()))?;
            print_json(&summary)
        }
        Command::Analyze { file, name } => {
            let src = file_source(&file, name.as_deref())?;
            let (table, snapshot) = journal.analyze(&src)?;
            print_json(&json!({ "rows": table.len(), "metrics": snapshot }))
        }
        Command::Trades { limit, source } => {
            let trades = journal.store().retrieve_trades(limit, source.as_deref())?;
            print_json(&trades)
        }
        Command::Stats => {
            let report = journal.store().statistics()?;
            logger.info(Domain::Store, "statistics", report_fields(&report));
            print_json(&report)
        }
        Command::Metrics { source } => print_json(&journal.stored_metrics(source.as_deref())?),
        Command::Verify => {
            let report = journal.store().verify_integrity()?;
            print_json(&report)?;
            if !report.ok {
                anyhow::bail!("integrity check failed");
            }
            Ok(())
        }
        Command::Backup { dest } => {
            journal
                .store()
                .backup(&dest)
                .with_context(|| format!("backup to {} failed", dest.display()))?;
            print_json(&json!({ "backup": dest.display().to_string() }))
        }
        Command::Manifest { file, name } => {
            let src = file_source(&file, name.as_deref())?;
            print_json(&journal.manifest(&src)?)
        }
        Command::Coach { recent, source } => {
            print_json(&journal.coaching_payload(source.as_deref(), recent)?)
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(db) = &args.db {
        config.db_path = db.clone();
    }
    if let Some(mb) = args.max_file_mb {
        config.max_file_bytes = mb * 1024 * 1024;
    }
    let logger = config.build_logger().context("failed to open log file")?;
    logger.debug(
        Domain::System,
        "startup",
        obj(&[("db", v_str(&config.db_path.display().to_string()))]),
    );

    let result = run(args, &config, logger.clone());
    if let Err(err) = &result {
        let kind = err
            .downcast_ref::<trademirror::JournalError>()
            .map(|e| e.kind())
            .unwrap_or("cli");
        logger.error(
            Domain::System,
            "command_failed",
            obj(&[("kind", v_str(kind)), ("msg", v_str(&format!("{:#}", err)))]),
        );
    }
    result
}
