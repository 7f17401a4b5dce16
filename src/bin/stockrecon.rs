//! stockrecon CLI - reconcile snapshots and order feeds into the target store
//!
//! Reads `stockrecon.yaml` (paths, target connection, strategy), then runs,
//! plans or inspects a reconciliation. `DATABASE_URL` overrides the target.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use stockrecon::engine::TableStatus;
use stockrecon::sink::{report_destination, sink_for};
use stockrecon::source::{describe, CsvOrderFeed, CsvSnapshot, FeedReader, SnapshotReader};
use stockrecon::{Database, Engine, EngineConfig, IntegrityStrategy, ReconcileError, RunReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stockrecon")]
#[command(version, about = "Inventory and order reconciliation with anti-duplicate incremental loads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the sources into the target store and write the stock report
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "stockrecon.yaml")]
        config: PathBuf,

        /// Integrity strategy (topological, constraint_suspension) - overrides config file
        #[arg(short, long)]
        strategy: Option<String>,

        /// Skip writing the report file
        #[arg(long)]
        no_report: bool,
    },

    /// Show the load levels without touching the target
    Plan {
        #[arg(short, long, default_value = "stockrecon.yaml")]
        config: PathBuf,
    },

    /// Recompute the stock report from the target store
    Report {
        #[arg(short, long, default_value = "stockrecon.yaml")]
        config: PathBuf,

        /// Write the report here instead of the configured directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the source tables and the target table each one feeds
    Inspect {
        #[arg(short, long, default_value = "stockrecon.yaml")]
        config: PathBuf,
    },

    /// Validate the configuration file
    CheckConfig {
        #[arg(short, long, default_value = "stockrecon.yaml")]
        config: PathBuf,
    },
}

fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            strategy,
            no_report,
        } => run(&config, strategy.as_deref(), no_report),
        Commands::Plan { config } => plan(&config).map(|_| true),
        Commands::Report { config, output } => report(&config, output).map(|_| true),
        Commands::Inspect { config } => inspect(&config).map(|_| true),
        Commands::CheckConfig { config } => check_config(&config).map(|_| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn load_config(path: &Path) -> Result<EngineConfig, ReconcileError> {
    let mut config = EngineConfig::load_from_file(path)?;
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn parse_strategy(raw: &str) -> Result<IntegrityStrategy, ReconcileError> {
    match raw.trim().to_lowercase().replace('-', "_").as_str() {
        "topological" => Ok(IntegrityStrategy::Topological),
        "constraint_suspension" | "suspension" => Ok(IntegrityStrategy::ConstraintSuspension),
        other => Err(ReconcileError::Config(format!(
            "Unknown integrity strategy '{}'. Use topological or constraint_suspension",
            other
        ))),
    }
}

/// A `.sqlite`/`.db` file is read as a database, anything else as a
/// directory of CSV tables.
fn open_snapshot(config: &EngineConfig) -> Result<Box<dyn SnapshotReader>, ReconcileError> {
    let path = config
        .source_paths
        .snapshot
        .as_ref()
        .ok_or_else(|| ReconcileError::Config("source_paths.snapshot is not set".to_string()))?;

    let is_database = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| matches!(e.to_lowercase().as_str(), "sqlite" | "sqlite3" | "db"));

    if is_database {
        #[cfg(feature = "sqlite")]
        {
            return Ok(Box::new(stockrecon::source::SqliteSnapshot::open(path)?));
        }
        #[cfg(not(feature = "sqlite"))]
        {
            return Err(ReconcileError::Config(format!(
                "{} is a SQLite snapshot but the sqlite feature is disabled",
                path.display()
            )));
        }
    }

    if !path.is_dir() {
        return Err(ReconcileError::SourceNotFound(path.display().to_string()));
    }
    Ok(Box::new(CsvSnapshot::new(path)))
}

fn open_feed(config: &EngineConfig) -> Result<CsvOrderFeed, ReconcileError> {
    let path = config
        .source_paths
        .orders
        .as_ref()
        .ok_or_else(|| ReconcileError::Config("source_paths.orders is not set".to_string()))?;
    Ok(CsvOrderFeed::new(path))
}

fn open_engine(config: EngineConfig) -> Result<Engine<Database>, ReconcileError> {
    let database = Database::new_with_config(&config.target_connection.url, &config.target_connection.pool)?;
    database.test_connection()?;
    Ok(Engine::new(config, database))
}

fn run(config_path: &Path, strategy: Option<&str>, no_report: bool) -> Result<bool, ReconcileError> {
    let mut config = load_config(config_path)?;
    if let Some(raw) = strategy {
        config.integrity_strategy = parse_strategy(raw)?;
    }

    println!("🔄 Reconciling with {:?} strategy...", config.integrity_strategy);

    let snapshot = open_snapshot(&config)?;
    let feed = open_feed(&config)?;
    let sink = sink_for(&config.report);
    let engine = open_engine(config)?;

    let sink_ref = if no_report { None } else { Some(sink.as_ref()) };
    let report = engine.run(snapshot.as_ref(), &feed, sink_ref)?;

    print_run_report(&report);
    Ok(!report.has_failures())
}

fn print_run_report(report: &RunReport) {
    println!("\nRun {}", report.run_id);
    for outcome in &report.tables {
        let total = report.table_counts.get(&outcome.table).copied().unwrap_or(0);
        match &outcome.status {
            TableStatus::Loaded {
                incoming,
                already_present,
                inserted,
                duplicates_in_batch,
                rejected,
            } => {
                println!(
                    "  ✓ [{}] {:<18} {} incoming, {} inserted, {} already present, {} duplicates, {} rejected ({} total)",
                    outcome.level,
                    outcome.table,
                    incoming,
                    inserted,
                    already_present,
                    duplicates_in_batch,
                    rejected.len(),
                    total
                );
                for rejection in rejected {
                    println!("      - {}", rejection);
                }
            }
            TableStatus::Skipped { reason } => {
                println!("  ℹ [{}] {:<18} skipped: {}", outcome.level, outcome.table, reason)
            }
            TableStatus::Failed { kind, message } => {
                println!("  ✗ [{}] {:<18} {}: {}", outcome.level, outcome.table, kind, message)
            }
            TableStatus::Blocked { by } => {
                println!("  ✗ [{}] {:<18} blocked by {}", outcome.level, outcome.table, by)
            }
        }
    }

    for violation in &report.violations {
        println!("  ✗ {}", violation);
    }

    println!("\nStock:");
    for row in &report.stock {
        println!(
            "  {:>6} {:<30} in {:>7} out {:>7} stock {:>7} {}",
            row.product_id, row.name, row.total_inbound, row.total_outbound, row.current_stock, row.status
        );
    }

    if let Some(path) = &report.report_path {
        println!("\n  ✓ Report written to {}", path.display());
    }
    if let Some(error) = &report.report_error {
        println!("\n  ✗ Report not written: {}", error);
    }

    if report.has_failures() {
        println!("\n❌ Reconciliation finished with failures");
    } else {
        println!("\n✨ Reconciliation complete!");
    }
}

fn plan(config_path: &Path) -> Result<(), ReconcileError> {
    let config = load_config(config_path)?;
    let plan = stockrecon::LoadPlan::build(&stockrecon::TableName::ALL, config.integrity_strategy)?;

    println!("📋 Load plan ({:?}):", plan.strategy);
    for (level, tables) in plan.levels.iter().enumerate() {
        let names: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
        println!("  Level {}: {}", level, names.join(", "));
    }
    Ok(())
}

fn report(config_path: &Path, output: Option<PathBuf>) -> Result<(), ReconcileError> {
    let config = load_config(config_path)?;
    let sink = sink_for(&config.report);
    let destination = output
        .unwrap_or_else(|| report_destination(&config.report, chrono::Local::now().naive_local()));
    let engine = open_engine(config)?;

    let rows = engine.stock_report()?;
    let path = sink.write(&rows, &destination)?;
    println!("  ✓ {} products written to {}", rows.len(), path.display());
    Ok(())
}

fn inspect(config_path: &Path) -> Result<(), ReconcileError> {
    let config = load_config(config_path)?;
    let snapshot = open_snapshot(&config)?;
    let feed = open_feed(&config)?;

    let description = describe(snapshot.as_ref(), Some(&feed as &dyn FeedReader))?;
    println!("🔍 Snapshot tables:");
    for table in &description.tables {
        let target = table
            .feeds
            .map(|t| t.to_string())
            .unwrap_or_else(|| "(unused)".to_string());
        println!("  {:<24} {:>7} rows -> {}", table.name, table.rows, target);
        println!("      columns: {}", table.columns.join(", "));
    }
    match &description.feed {
        Some(feed) => {
            println!("🔍 Order feed: {} rows", feed.rows);
            println!("      columns: {}", feed.columns.join(", "));
        }
        None => println!("  ℹ Order feed not found"),
    }
    Ok(())
}

fn check_config(config_path: &Path) -> Result<(), ReconcileError> {
    println!("🔍 Validating {}...", config_path.display());
    let config = load_config(config_path)?;
    println!("  ✓ Target: {}", config.target_connection.url);
    println!("  ✓ Strategy: {:?}", config.integrity_strategy);
    println!("  ✓ Low stock threshold: {}", config.low_stock_threshold);
    println!("✨ Configuration is valid");
    Ok(())
}
