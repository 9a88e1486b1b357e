use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use statgrab::batch::{self, BatchOrchestrator, BatchReport};
use statgrab::config::AppConfig;
use statgrab::models::DatasetDescriptor;
use statgrab::navigator::chrome::ChromeLauncher;
use statgrab::navigator::ProtocolNavigator;
use statgrab::storage::StorageConfig;
use statgrab::{parse_duration, registry};

#[derive(Parser)]
#[command(name = "statgrab")]
#[command(about = "Download yearly tabular extracts from the statistics portal")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "./statgrab.toml")]
    config: PathBuf,

    /// Target directory for downloaded files (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every missing (dataset, year) file
    Run {
        /// Only process this dataset (repeatable)
        #[arg(long = "dataset")]
        datasets: Vec<String>,

        /// First year to process (inclusive)
        #[arg(long)]
        from: Option<i32>,

        /// Last year to process (inclusive)
        #[arg(long)]
        to: Option<i32>,

        /// Check which files are missing without opening a browser
        #[arg(long)]
        dry_run: bool,

        /// Show the browser window
        #[arg(long)]
        headed: bool,

        /// Disable the Chrome sandbox (e.g. running as root in a container)
        #[arg(long)]
        no_sandbox: bool,

        /// Per-element wait (e.g. "10s")
        #[arg(long)]
        element_timeout: Option<String>,

        /// Wait for each download to finish (e.g. "1m")
        #[arg(long)]
        download_timeout: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured datasets
    List,

    /// Show which years are already downloaded
    Status {
        /// Only show this dataset (repeatable)
        #[arg(long = "dataset")]
        datasets: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, source) = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    let log_level = cli.log_level.unwrap_or_else(|| config.log_level.clone());

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting statgrab v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("{}", source);

    let storage = StorageConfig::new(config.data_dir.clone());

    match cli.command {
        Commands::Run {
            datasets,
            from,
            to,
            dry_run,
            headed,
            no_sandbox,
            element_timeout,
            download_timeout,
            json,
        } => {
            let selected: Vec<DatasetDescriptor> = registry::select(&config.datasets, &datasets)?
                .iter()
                .map(|d| d.with_year_window(from, to))
                .collect();

            let mut session = config.session.clone();
            if headed {
                session.headless = false;
            }
            if no_sandbox {
                session.no_sandbox = true;
            }
            if let Some(timeout) = element_timeout {
                session.element_timeout_secs = parse_timeout(&timeout)?;
            }
            if let Some(timeout) = download_timeout {
                session.download_timeout_secs = parse_timeout(&timeout)?;
            }
            session.validate().map_err(anyhow::Error::msg)?;

            let navigator = ProtocolNavigator::new(ChromeLauncher, session);
            let orchestrator = BatchOrchestrator::new(navigator, storage).with_dry_run(dry_run);
            let report = orchestrator.run(&selected).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::List => {
            println!(
                "{:<24} {:<11} {:<26} {}",
                "ID", "YEARS", "VARIANT", "LOCATION"
            );
            for d in &config.datasets {
                println!(
                    "{:<24} {:<11} {:<26} {}",
                    d.id,
                    d.years.to_string(),
                    d.variant.to_string(),
                    d.base_location
                );
                if !d.title.is_empty() {
                    println!("  {}", d.title);
                }
            }
        }
        Commands::Status { datasets } => {
            let selected = registry::select(&config.datasets, &datasets)?;
            println!("Target directory: {:?}", storage.target_dir);
            for inv in batch::inventory(&selected, &storage) {
                println!(
                    "{:<24} {:>3} present, {:>3} missing",
                    inv.dataset_id,
                    inv.present.len(),
                    inv.missing.len()
                );
                if !inv.missing.is_empty() {
                    let years: Vec<String> = inv.missing.iter().map(|y| y.to_string()).collect();
                    println!("  missing: {}", years.join(", "));
                }
            }

            match storage.partial_downloads() {
                Ok(partial) if !partial.is_empty() => {
                    println!("\nPartial downloads (delete them before the next run):");
                    for path in partial {
                        println!("  {}", path.display());
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Could not scan for partial downloads: {}", e),
            }
        }
    }

    Ok(())
}

fn parse_timeout(s: &str) -> Result<u64> {
    let duration: Duration =
        parse_duration(s).with_context(|| format!("Invalid duration: {}", s))?;
    Ok(duration.as_secs().max(1))
}

fn print_report(report: &BatchReport) {
    println!("\n=== Batch Results ===");
    println!(
        "{:<24} {:>9} {:>9} {:>9} {:>9}",
        "DATASET", "SUCCEEDED", "SKIPPED", "FAILED", "PLANNED"
    );
    for s in report.summaries() {
        println!(
            "{:<24} {:>9} {:>9} {:>9} {:>9}",
            s.dataset_id, s.succeeded, s.skipped, s.failed, s.planned
        );
    }
    let totals = report.totals();
    println!(
        "{:<24} {:>9} {:>9} {:>9} {:>9}",
        "total", totals.succeeded, totals.skipped, totals.failed, totals.planned
    );
    println!("Duration: {:?}", report.duration());
    if report.dry_run {
        println!("\n(dry run - no browser sessions started)");
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!("\nFailures (run again to retry):");
        for record in failures {
            println!("  - {} {}: {}", record.dataset_id, record.year, record.outcome);
        }
    }
}
