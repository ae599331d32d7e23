//! Synthetic load benchmark with paced waves.

use chrono::Utc;
use tokio::time::Instant;
use tracing::info;

use crate::config::Pacing;
use crate::context::RunContext;
use crate::dispatch::{dispatch, DispatchOptions};
use crate::error::{HarnessError, Result};
use crate::generator;
use crate::stats::{mean, LatencySummary};
use crate::types::{
    BenchmarkReport, BenchmarkSummary, ConcreteKind, DispatchMode, ErrorBreakdown, Outcome,
    TestKind,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BenchmarkOptions {
    pub kind: TestKind,
    pub concurrency: usize,
    pub total_requests: usize,
    pub stress_mode: bool,
    /// Seeds kind resolution and case synthesis. `None` draws from OS entropy.
    pub seed: Option<u64>,
    pub pacing: Pacing,
}

impl BenchmarkOptions {
    pub fn new(kind: TestKind, concurrency: usize, total_requests: usize) -> Self {
        Self {
            kind,
            concurrency,
            total_requests,
            stress_mode: false,
            seed: None,
            pacing: Pacing::default(),
        }
    }
}

/// Generates `total_requests` cases and drives them in waves of `concurrency`,
/// pausing between waves (never after the last one).
///
/// Elapsed time spans generation, execution and pacing, so the reported
/// throughput is the effective rate a client observes.
pub async fn run<F>(
    ctx: &RunContext,
    options: &BenchmarkOptions,
    on_progress: F,
) -> Result<BenchmarkReport>
where
    F: FnMut(usize, usize),
{
    let _permit = ctx.begin()?;

    if options.concurrency == 0 {
        return Err(HarnessError::Usage("concurrency must be at least 1".into()));
    }

    let started_at = Utc::now();
    let start = Instant::now();

    let mut rng = generator::rng(options.seed);
    let jobs = generator::generate(options.kind, options.total_requests, &mut rng)?;
    let price_requests = jobs.iter().filter(|job| job.kind == ConcreteKind::Price).count();

    let delay = options.pacing.delay(options.stress_mode);
    info!(
        kind = ?options.kind,
        requests = options.total_requests,
        concurrency = options.concurrency,
        stress = options.stress_mode,
        ?delay,
        "starting benchmark"
    );

    let dispatch_options =
        DispatchOptions::new(options.concurrency, DispatchMode::Parallel).with_wave_delay(delay);
    let outcomes = dispatch(ctx.executor(), &jobs, &dispatch_options, on_progress).await?;

    let elapsed = start.elapsed();
    let finished_at = Utc::now();

    let mut latencies_ms = Vec::with_capacity(outcomes.len());
    let mut payloads = Vec::new();
    let mut errors = Vec::new();
    let mut error_breakdown = ErrorBreakdown::default();
    for entry in outcomes {
        latencies_ms.push(entry.outcome.latency_ms());
        match entry.outcome {
            Outcome::Success { payload, .. } => payloads.push(payload),
            Outcome::Failure { kind, error, .. } => {
                error_breakdown.record(kind);
                errors.push(error);
            }
        }
    }

    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let summary = BenchmarkSummary {
        mean_latency_ms: mean(&latencies_ms),
        success_rate: payloads.len() as f64 / options.total_requests as f64,
        throughput_rps: throughput(options.total_requests, elapsed_ms),
        latency: LatencySummary::from_samples(&latencies_ms),
    };

    info!(
        elapsed_ms,
        throughput = summary.throughput_rps,
        success_rate = summary.success_rate,
        "benchmark finished"
    );

    Ok(BenchmarkReport {
        kind: options.kind,
        concurrency: options.concurrency,
        total_requests: options.total_requests,
        stress_mode: options.stress_mode,
        seed: options.seed,
        started_at,
        finished_at,
        elapsed_ms,
        price_requests,
        moderation_requests: jobs.len() - price_requests,
        summary,
        error_breakdown,
        latencies_ms,
        payloads,
        errors,
    })
}

/// Requests per second over the elapsed wall time; zero when nothing elapsed.
pub fn throughput(total_requests: usize, elapsed_ms: f64) -> f64 {
    if elapsed_ms <= 0.0 {
        return 0.0;
    }
    total_requests as f64 / (elapsed_ms / 1000.0)
}
