use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use marketplace_stress::benchmark::{self, BenchmarkOptions};
use marketplace_stress::bulk::{self, BulkOptions};
use marketplace_stress::config::Config;
use marketplace_stress::context::RunContext;
use marketplace_stress::executor::HttpExecutor;
use marketplace_stress::types::{
    BenchmarkReport, BulkReport, ConcreteKind, DispatchMode, ErrorBreakdown, TestKind,
};
use marketplace_stress::{dataset, generator};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "marketplace-stress")]
#[command(about = "Bulk and load testing tool for the marketplace AI service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send every record of a .json or .csv dataset once and report pass/fail
    Bulk {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long)]
        dataset: PathBuf,

        #[arg(long, value_enum)]
        kind: ConcreteKind,

        #[arg(long, default_value = "5")]
        concurrency: usize,

        /// Send one record at a time in input order
        #[arg(long, conflicts_with = "batch")]
        sequential: bool,

        /// Send the whole dataset in one request to the batch endpoint
        #[arg(long)]
        batch: bool,

        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Generate synthetic traffic and measure latency and throughput
    Benchmark {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long, value_enum, default_value = "price")]
        kind: TestKind,

        #[arg(long, default_value = "10")]
        concurrency: usize,

        #[arg(long, default_value = "100")]
        requests: usize,

        /// Use the short inter-wave delay
        #[arg(long)]
        stress: bool,

        /// Random seed for reproducible case generation
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a generated dataset usable with `bulk`
    Sample {
        #[arg(long, value_enum, default_value = "price")]
        kind: TestKind,

        #[arg(long, default_value = "10")]
        count: usize,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct TargetArgs {
    #[arg(long, env = "MARKETPLACE_ENDPOINT", default_value = "http://localhost:5000")]
    endpoint: String,

    #[arg(long)]
    skip_health_check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to read MARKETPLACE_* configuration")?;

    match cli.command {
        Commands::Bulk {
            target,
            dataset: dataset_path,
            kind,
            concurrency,
            sequential,
            batch,
            output,
        } => {
            let cases = dataset::load_file(&dataset_path)
                .with_context(|| format!("Failed to load dataset {}", dataset_path.display()))?;
            let ctx = connect(&target, &config).await?;
            let mode = if sequential { DispatchMode::Sequential } else { DispatchMode::Parallel };

            println!("Starting bulk test:");
            println!("  Endpoint: {}", target.endpoint);
            println!("  Dataset: {} ({} records)", dataset_path.display(), cases.len());
            println!("  Kind: {:?}", kind);
            if batch {
                println!("  Mode: Batch ({})", kind.batch_endpoint());
            } else {
                println!("  Concurrency: {}", concurrency);
                println!("  Mode: {:?}", mode);
            }
            println!();

            let pb = progress_bar(cases.len());
            let on_progress = |done, total| update_progress(&pb, done, total);
            let report = if batch {
                bulk::run_batch(&ctx, cases, kind, on_progress).await
            } else {
                bulk::run(&ctx, cases, BulkOptions { kind, concurrency, mode }, on_progress).await
            };
            pb.finish_and_clear();

            let report = report.context("Bulk test failed")?;
            print_bulk_summary(&report);
            emit(&report, output.as_deref())?;
        }
        Commands::Benchmark {
            target,
            kind,
            concurrency,
            requests,
            stress,
            seed,
            output,
        } => {
            let ctx = connect(&target, &config).await?;

            println!("Starting benchmark:");
            println!("  Endpoint: {}", target.endpoint);
            println!("  Kind: {:?}", kind);
            println!("  Requests: {}", requests);
            println!("  Concurrency: {}", concurrency);
            println!("  Stress mode: {}", stress);
            println!();

            let options = BenchmarkOptions {
                kind,
                concurrency,
                total_requests: requests,
                stress_mode: stress,
                seed,
                pacing: config.pacing(),
            };
            let pb = progress_bar(requests);
            let report =
                benchmark::run(&ctx, &options, |done, total| update_progress(&pb, done, total))
                    .await;
            pb.finish_and_clear();

            let report = report.context("Benchmark failed")?;
            print_benchmark_summary(&report);
            emit(&report, output.as_deref())?;
        }
        Commands::Sample { kind, count, seed, output } => {
            let jobs = generator::generate(kind, count, &mut generator::rng(seed))?;
            let cases: Vec<_> = jobs.into_iter().map(|job| job.case).collect();
            emit(&cases, output.as_deref())?;
        }
    }

    Ok(())
}

async fn connect(target: &TargetArgs, config: &Config) -> Result<RunContext> {
    let executor = HttpExecutor::new(&target.endpoint, config)?;

    // Check if the marketplace service is available
    if !target.skip_health_check {
        if let Err(e) = executor.health().await {
            eprintln!("Marketplace service not available at {}: {}", target.endpoint, e);
            exit(1);
        }
    }

    Ok(RunContext::new(Arc::new(executor)))
}

fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} processed")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}

fn update_progress(pb: &ProgressBar, done: usize, total: usize) {
    pb.set_length(total as u64);
    pb.set_position(done as u64);
}

fn print_bulk_summary(report: &BulkReport) {
    println!("Bulk test results:");
    println!("  Total: {}", report.total_count);
    println!("  Passed: {}", report.success_count);
    println!("  Failed: {}", report.failure_count);
    println!("  Mean latency (ms): {:.2}", report.latency.mean_ms);
    println!("  P95 latency (ms): {:.2}", report.latency.p95_ms);
    print_error_breakdown(&report.error_breakdown);
    for entry in report.outcomes.iter().filter(|o| !o.outcome.is_success()) {
        println!("  #{} failed: {}", entry.index, entry.outcome.error().unwrap_or_default());
    }
    println!();
}

fn print_benchmark_summary(report: &BenchmarkReport) {
    println!("Benchmark results:");
    println!("  Requests: {}", report.total_requests);
    println!("  Successful: {}", report.success_count());
    println!("  Failed: {}", report.failure_count());
    println!("  Success rate: {:.1}%", report.summary.success_rate * 100.0);
    println!("  Elapsed (s): {:.2}", report.elapsed_secs());
    println!("  Throughput (req/s): {:.2}", report.summary.throughput_rps);
    println!("  Mean latency (ms): {:.2}", report.summary.mean_latency_ms);
    println!("  P95 latency (ms): {:.2}", report.summary.latency.p95_ms);
    println!("  P99 latency (ms): {:.2}", report.summary.latency.p99_ms);
    print_error_breakdown(&report.error_breakdown);
    if report.kind == TestKind::Mixed {
        println!(
            "  Mix: {} price / {} moderation",
            report.price_requests, report.moderation_requests
        );
    }
    println!();
}

fn print_error_breakdown(errors: &ErrorBreakdown) {
    if errors.total() == 0 {
        return;
    }
    println!(
        "  Errors: {} (network {}, server {}, parse {}, panicked {})",
        errors.total(),
        errors.network,
        errors.server,
        errors.parse,
        errors.panicked
    );
}

fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(output_path) = output {
        fs::write(output_path, json)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        println!("Results saved to: {}", output_path.display());
    } else {
        println!("{}", json);
    }
    Ok(())
}
