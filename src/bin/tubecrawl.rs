#![forbid(unsafe_code)]

//! Bulk YouTube search crawler.
//!
//! `tubecrawl run` walks the crawl plan, enriches every new video and writes
//! one CSV per query/duration pair. `tubecrawl plan` prints the batches, key
//! groups and output files without touching the network.

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tubecrawl::{
    api::YoutubeClient,
    config::{CrawlSettings, PlanFile, SettingsOverrides, load_plan_file, resolve_settings},
    credentials::CredentialPool,
    orchestrator::{Orchestrator, RunReport},
    plan::{WorkPlan, build_plan},
    sink::{BatchSink, output_file_name},
};

const DEFAULT_LOG_FILTER: &str = "tubecrawl=info";

#[derive(Debug, Parser)]
#[command(name = "tubecrawl", version, about = "Bulk YouTube search crawler")]
struct Cli {
    /// Dotenv file with YT_API_KEYS and CRAWL_* settings.
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Crawl plan (TOML) listing queries and duration classes.
    #[arg(long, global = true, value_name = "PATH")]
    plan: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute the crawl plan.
    Run(RunArgs),
    /// Print the work plan without issuing any request.
    Plan,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Stop paginating a unit after this many new candidates.
    #[arg(long)]
    target: Option<usize>,

    /// Units processed concurrently.
    #[arg(long)]
    workers: Option<usize>,

    /// Retries per request on transient failures.
    #[arg(long)]
    max_retries: Option<u32>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match try_main(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn try_main(cli: Cli) -> Result<ExitCode> {
    let mut overrides = SettingsOverrides {
        env_path: cli.env_file,
        plan_path: cli.plan,
        ..SettingsOverrides::default()
    };
    if let Command::Run(args) = &cli.command {
        overrides.output_dir = args.output_dir.clone();
        overrides.target_per_query = args.target;
        overrides.workers = args.workers;
        overrides.max_retries = args.max_retries;
    }
    let settings = resolve_settings(overrides)?;
    let plan_file = load_plan_file(&settings.plan_path)?;
    let pool = CredentialPool::from_keys(
        settings.api_keys.as_slice(),
        settings.group_size,
        settings.per_key_concurrency,
    )
    .context("building credential pool")?;
    let plan = build_plan(
        &plan_file.queries,
        &plan_file.duration_classes,
        plan_file.queries_per_batch,
        pool.group_count(),
    )?;

    match cli.command {
        Command::Plan => {
            print_plan(&plan, &pool, &settings, &plan_file);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(_) => {
            let report = run_crawl(settings, pool, &plan).await;
            print_report(&report);
            Ok(if report.cancelled {
                ExitCode::from(130)
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

async fn run_crawl(settings: CrawlSettings, pool: CredentialPool, plan: &WorkPlan) -> RunReport {
    let client = YoutubeClient::new(settings.api_base.clone(), settings.request_timeout);
    let sink = BatchSink::new(settings.output_dir.clone());
    let orchestrator = Orchestrator::new(Arc::new(client), pool, sink, settings.crawl_options());

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if shutdown_signal().await {
            warn!("interrupt received; abandoning in-flight requests");
            watcher.cancel();
        }
    });

    info!(
        plan = %settings.plan_path.display(),
        output = %settings.output_dir.display(),
        keys = settings.api_keys.len(),
        "crawl configured"
    );
    orchestrator.run(plan, cancel).await
}

async fn shutdown_signal() -> bool {
    // A missing handler only costs graceful shutdown; the crawl keeps going.
    match signal::ctrl_c().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "failed to install Ctrl+C handler");
            false
        }
    }
}

fn print_plan(plan: &WorkPlan, pool: &CredentialPool, settings: &CrawlSettings, file: &PlanFile) {
    println!("===================================");
    println!("Crawl plan: {}", settings.plan_path.display());
    println!("===================================");
    println!(
        "{} queries, {} duration class(es), {} unit(s) in {} batch(es)",
        plan.batches().iter().map(|b| b.queries.len()).sum::<usize>(),
        file.duration_classes.len(),
        plan.unit_count(),
        plan.batches().len()
    );
    for group in pool.groups() {
        println!(
            "Key group {}: {}",
            group.index(),
            group.redacted_members().join(", ")
        );
    }
    for (first, later) in plan.file_name_collisions() {
        println!("Warning: {later} overwrites the output of {first}");
    }
    for batch in plan.batches() {
        println!();
        println!("Batch {} -> key group {}", batch.index, batch.group_index);
        for unit in batch.units() {
            println!(
                "  - {unit} -> {}",
                settings.output_dir.join(output_file_name(&unit)).display()
            );
        }
    }
}

fn print_report(report: &RunReport) {
    println!("===================================");
    println!("Crawl summary");
    println!("===================================");
    println!("Units planned:     {}", report.units_planned);
    println!("Completed:         {}", report.units_completed);
    println!("Degraded:          {}", report.units_degraded);
    println!("Persist failures:  {}", report.persist_failures);
    println!("Cancelled:         {}", report.units_cancelled);
    println!("Skipped:           {}", report.units_skipped);
    println!("Records written:   {}", report.records_written);
}
