use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use meterline_billing::aggregator::{BatchSummary, UsageProcessor};
use meterline_billing::config::BillingConfig;
use meterline_billing::domain::{Event, FlatFeeCurve, PeriodMeterTotal};
use meterline_billing::storage::{
    CatalogSnapshot, InMemoryCatalog, InMemoryUsageRepository, UsageRecordRepository,
};
use meterline_common::logging;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "meterline-billing")]
#[command(about = "Meterline billing core - usage rating, commitments and proration")]
struct Args {
    #[arg(short, long, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,

    #[arg(long, help = "Generate sample configuration file")]
    gen_config: bool,

    #[arg(long, help = "Dry run mode (validate config and exit)")]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rate a file of events against a catalog snapshot and print the results
    Rate {
        #[arg(long, help = "Catalog snapshot (JSON)")]
        catalog: PathBuf,

        #[arg(long, help = "Array of events (JSON)")]
        events: PathBuf,
    },
}

#[derive(Serialize)]
struct PeriodReport {
    subscription_id: String,
    period_id: u64,
    cost: Decimal,
    meters: Vec<PeriodMeterTotal>,
}

#[derive(Serialize)]
struct RateReport {
    summary: BatchSummary,
    periods: Vec<PeriodReport>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.gen_config {
        let config = BillingConfig::default();
        let toml = toml::to_string_pretty(&config)?;
        println!("{}", toml);
        return Ok(());
    }

    let config = BillingConfig::load(args.config)?;
    logging::init_logging(&args.verbosity, &config.logging.filter, config.logging.format)?;

    info!("Starting Meterline billing core");
    info!("Environment: {}", config.service.environment);
    info!("Service ID: {}", config.service.service_id);

    if args.dry_run {
        info!("Configuration validated successfully (dry-run mode)");
        return Ok(());
    }

    match args.command {
        Some(Command::Rate { catalog, events }) => rate(&config, &catalog, &events).await,
        None => {
            info!("No command given, nothing to do");
            Ok(())
        }
    }
}

async fn rate(config: &BillingConfig, catalog_path: &Path, events_path: &Path) -> Result<()> {
    let snapshot: CatalogSnapshot = read_json(catalog_path)?;
    let events: Vec<Event> = read_json(events_path)?;
    info!(
        "Rating {} events against {} subscriptions",
        events.len(),
        snapshot.subscriptions.len()
    );

    let usage = Arc::new(InMemoryUsageRepository::new());
    let processor = UsageProcessor::new(
        Arc::new(InMemoryCatalog::from_snapshot(snapshot)),
        usage.clone(),
        Arc::new(FlatFeeCurve),
        config.processing.max_concurrency,
    );

    let mut summary = BatchSummary::default();
    for chunk in events.chunks(config.processing.batch_size) {
        summary.merge(&processor.process_batch(chunk).await);
    }

    let mut periods = Vec::new();
    for key in usage.period_keys().await {
        periods.push(PeriodReport {
            subscription_id: key.subscription_id.clone(),
            period_id: key.period_id,
            cost: usage.period_cost(&key).await?,
            meters: usage.period_meter_totals(&key).await?,
        });
    }

    let report = RateReport { summary, periods };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
