//! Runs a user-supplied dataset through the dispatcher and summarises pass/fail.

use tracing::info;

use crate::context::RunContext;
use crate::dispatch::{dispatch, DispatchOptions};
use crate::error::{HarnessError, Result};
use crate::stats::LatencySummary;
use crate::types::{
    BulkReport, ConcreteKind, DispatchMode, ErrorBreakdown, IndexedOutcome, Job, TestCase,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BulkOptions {
    pub kind: ConcreteKind,
    pub concurrency: usize,
    pub mode: DispatchMode,
}

/// Sends every case once. Failed cases are not retried.
pub async fn run<F>(
    ctx: &RunContext,
    dataset: Vec<TestCase>,
    options: BulkOptions,
    on_progress: F,
) -> Result<BulkReport>
where
    F: FnMut(usize, usize),
{
    let _permit = ctx.begin()?;

    if dataset.is_empty() {
        return Err(HarnessError::Usage("dataset contains no records".into()));
    }
    if options.concurrency == 0 {
        return Err(HarnessError::Usage("concurrency must be at least 1".into()));
    }

    info!(kind = ?options.kind, records = dataset.len(), concurrency = options.concurrency, mode = ?options.mode, "starting bulk test");

    let jobs: Vec<Job> = dataset.into_iter().map(|case| Job::new(options.kind, case)).collect();
    let dispatch_options = DispatchOptions::new(options.concurrency, options.mode);
    let outcomes = dispatch(ctx.executor(), &jobs, &dispatch_options, on_progress).await?;

    let report = summarize(options.kind, options.mode, options.concurrency, false, outcomes);
    info!(passed = report.success_count, failed = report.failure_count, "bulk test finished");
    Ok(report)
}

/// Sends the whole dataset in one request to the kind's batch endpoint.
/// Per-item failures are kept per case; a failed request fails every case.
pub async fn run_batch<F>(
    ctx: &RunContext,
    dataset: Vec<TestCase>,
    kind: ConcreteKind,
    mut on_progress: F,
) -> Result<BulkReport>
where
    F: FnMut(usize, usize),
{
    let _permit = ctx.begin()?;

    if dataset.is_empty() {
        return Err(HarnessError::Usage("dataset contains no records".into()));
    }

    info!(?kind, records = dataset.len(), "starting batch bulk test");

    let total = dataset.len();
    let results = ctx.executor().execute_batch(kind, &dataset).await;
    if results.len() != total {
        return Err(HarnessError::Parse(format!(
            "executor returned {} outcomes for {total} cases",
            results.len()
        )));
    }
    on_progress(total, total);

    let outcomes = dataset
        .into_iter()
        .zip(results)
        .enumerate()
        .map(|(index, (case, outcome))| IndexedOutcome { index, kind, case, outcome })
        .collect();

    let report = summarize(kind, DispatchMode::Sequential, 1, true, outcomes);
    info!(passed = report.success_count, failed = report.failure_count, "batch bulk test finished");
    Ok(report)
}

fn summarize(
    kind: ConcreteKind,
    mode: DispatchMode,
    concurrency: usize,
    batch: bool,
    outcomes: Vec<IndexedOutcome>,
) -> BulkReport {
    let success_count = outcomes.iter().filter(|o| o.outcome.is_success()).count();
    let latencies: Vec<f64> = outcomes.iter().map(|o| o.outcome.latency_ms()).collect();
    BulkReport {
        kind,
        mode,
        concurrency,
        batch,
        total_count: outcomes.len(),
        success_count,
        failure_count: outcomes.len() - success_count,
        latency: LatencySummary::from_samples(&latencies),
        error_breakdown: outcomes.iter().map(|o| &o.outcome).collect::<ErrorBreakdown>(),
        outcomes,
    }
}
