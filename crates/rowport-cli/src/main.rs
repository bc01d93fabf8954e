//! rowport CLI - load XML data files into PostgreSQL in foreign key order.

use clap::{Parser, Subcommand};
use rowport::{
    export_tables, Config, DataReader, DataWriter, LoadStats, Loader, LoaderOptions, MemoryStore,
    PgStore, RowportError, Schema, StoreAdapter,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

const DEFAULT_CONFIG: &str = "config.yaml";

#[derive(Parser)]
#[command(name = "rowport")]
#[command(about = "Load and export relational rows as XML data files")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Path to YAML or JSON schema file
    #[arg(short, long, default_value = "schema.yaml")]
    schema: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a data file into the target database
    Import {
        /// Data file to load
        file: PathBuf,

        /// Load into an in-memory store instead of the target database
        #[arg(long)]
        dry_run: bool,

        /// Override loader.batch_size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Log rejected rows and keep going
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Write target database tables to a data file
    Export {
        /// Data file to write
        file: PathBuf,

        /// Table to export (repeatable; default: all tables)
        #[arg(long = "table")]
        tables: Vec<String>,

        /// Write without indentation
        #[arg(long)]
        compact: bool,
    },

    /// Decode a data file and report row counts per table
    Check {
        /// Data file to check
        file: PathBuf,
    },
}

#[derive(Serialize)]
struct ImportResult {
    file: String,
    store: String,
    dry_run: bool,
    rows_read: u64,
    rows_skipped: u64,
    duration_seconds: f64,
    #[serde(flatten)]
    stats: LoadStats,
}

#[derive(Serialize)]
struct ExportResult {
    file: String,
    rows_written: u64,
    duration_seconds: f64,
}

#[derive(Serialize)]
struct CheckResult {
    file: String,
    rows_read: u64,
    rows_skipped: u64,
    tables: BTreeMap<String, u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), RowportError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = load_config(&cli.config)?;
    let schema = Arc::new(Schema::load(&cli.schema)?);
    info!(
        "Loaded schema with {} tables from {:?}",
        schema.tables.len(),
        cli.schema
    );

    match cli.command {
        Commands::Import {
            file,
            dry_run,
            batch_size,
            continue_on_error,
        } => {
            if let Some(size) = batch_size {
                config.loader.batch_size = size;
            }
            if continue_on_error {
                config.loader.error_policy = rowport::ErrorPolicy::Continue;
            }
            config.validate()?;

            let cancel_token = setup_signal_handler();
            let options = config.loader.options();
            let start = Instant::now();

            let (store_type, stats, reader_counts) = if dry_run {
                let store = MemoryStore::new(Arc::clone(&schema));
                let (stats, counts) =
                    import_file(store, &schema, options, &file, &cancel_token).await?;
                ("memory".to_string(), stats, counts)
            } else {
                let target = config.target.as_ref().ok_or_else(|| {
                    RowportError::Config(
                        "a target section is required unless --dry-run is given".into(),
                    )
                })?;
                let store = PgStore::connect(target, &config.loader).await?;
                let store_type = store.db_type().to_string();
                let (stats, counts) =
                    import_file(store, &schema, options, &file, &cancel_token).await?;
                (store_type, stats, counts)
            };

            let result = ImportResult {
                file: file.display().to_string(),
                store: store_type,
                dry_run,
                rows_read: reader_counts.0,
                rows_skipped: reader_counts.1,
                duration_seconds: start.elapsed().as_secs_f64(),
                stats,
            };

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let status_msg = if dry_run { "Dry run completed!" } else { "Import completed!" };
                println!("\n{}", status_msg);
                println!("  File: {}", result.file);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!("  Rows read: {}", result.rows_read);
                println!("  Rows inserted: {}", result.stats.rows_inserted);
                println!("  Rows deferred: {}", result.stats.rows_deferred);
                if result.rows_skipped > 0 {
                    println!("  Rows skipped (unknown table): {}", result.rows_skipped);
                }
                if result.stats.rows_failed > 0 {
                    println!("  Rows failed: {}", result.stats.rows_failed);
                }
            }
        }

        Commands::Export {
            file,
            tables,
            compact,
        } => {
            let target = config.target.as_ref().ok_or_else(|| {
                RowportError::Config("a target section is required for export".into())
            })?;
            let start = Instant::now();
            let mut store = PgStore::connect(target, &config.loader).await?;
            let pretty = config.codec.pretty_print && !compact;
            let mut writer = DataWriter::create(&file, Arc::clone(&schema), pretty)?;
            let rows_written = export_tables(&mut store, &schema, &mut writer, &tables).await?;

            let result = ExportResult {
                file: file.display().to_string(),
                rows_written,
                duration_seconds: start.elapsed().as_secs_f64(),
            };
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("\nExport completed!");
                println!("  File: {}", result.file);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!("  Rows written: {}", result.rows_written);
            }
        }

        Commands::Check { file } => {
            let mut reader = DataReader::open(&file, Arc::clone(&schema))?
                .case_sensitive(config.loader.case_sensitive);
            let mut tables: BTreeMap<String, u64> = BTreeMap::new();
            for row in reader.by_ref() {
                *tables.entry(row?.table).or_default() += 1;
            }

            let result = CheckResult {
                file: file.display().to_string(),
                rows_read: reader.rows_read(),
                rows_skipped: reader.rows_skipped(),
                tables,
            };
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}: {} rows", result.file, result.rows_read);
                for (table, count) in &result.tables {
                    println!("  {}: {}", table, count);
                }
                if result.rows_skipped > 0 {
                    println!("  skipped (unknown table): {}", result.rows_skipped);
                }
            }
        }
    }

    Ok(())
}

/// Load the configuration file. A missing file at the default path means defaults.
fn load_config(path: &Path) -> Result<Config, RowportError> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        info!("No {} found, using default configuration", DEFAULT_CONFIG);
        return Ok(Config::default());
    }
    let config = Config::load(path)?;
    info!("Loaded configuration from {:?}", path);
    Ok(config)
}

/// Feed a data file into a loader until the file ends or a shutdown signal arrives.
///
/// Returns the load statistics and the reader's (read, skipped) counts.
async fn import_file<S: StoreAdapter>(
    store: S,
    schema: &Arc<Schema>,
    options: LoaderOptions,
    file: &Path,
    cancel_token: &CancellationToken,
) -> Result<(LoadStats, (u64, u64)), RowportError> {
    let case_sensitive = options.case_sensitive;
    let mut loader = Loader::new(store, Arc::clone(schema), options);
    let mut reader = DataReader::open(file, Arc::clone(schema))?.case_sensitive(case_sensitive);

    loader.start()?;
    let mut cancelled = false;
    for row in reader.by_ref() {
        if cancel_token.is_cancelled() {
            warn!("Shutdown requested; no further rows will be submitted");
            cancelled = true;
            break;
        }
        loader.submit(row?).await?;
    }
    let stats = loader.end().await?;
    if cancelled {
        return Err(RowportError::Cancelled);
    }
    Ok((stats, (reader.rows_read(), reader.rows_skipped())))
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Finishing rows already submitted...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing rows already submitted...");
            token.cancel();
        }
    });

    cancel_token
}
