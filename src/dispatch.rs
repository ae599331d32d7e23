//! Wave-based dispatch of jobs against an [`Executor`].
//!
//! Jobs are split into consecutive waves of `concurrency` cases (one case per
//! wave in sequential mode). All cases of a wave are in flight together and the
//! next wave only starts once every case of the current one has settled, so the
//! concurrency bound is exact at wave boundaries rather than a sliding window.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};
use crate::executor::Executor;
use crate::types::{DispatchMode, FailureKind, IndexedOutcome, Job, Outcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchOptions {
    pub concurrency: usize,
    pub mode: DispatchMode,
    /// Pause between consecutive waves. Never applied after the last wave.
    pub wave_delay: Option<Duration>,
}

impl DispatchOptions {
    pub fn new(concurrency: usize, mode: DispatchMode) -> Self {
        Self { concurrency, mode, wave_delay: None }
    }

    pub fn with_wave_delay(mut self, delay: Duration) -> Self {
        self.wave_delay = Some(delay);
        self
    }

    pub fn wave_size(&self) -> usize {
        match self.mode {
            DispatchMode::Sequential => 1,
            DispatchMode::Parallel => self.concurrency,
        }
    }
}

/// Runs every job and returns one outcome per job, ordered by input index.
///
/// `on_progress(completed, total)` fires after each case settles. A case whose
/// task panics is recorded as a [`FailureKind::Panicked`] failure; siblings and
/// later waves still run.
pub async fn dispatch<F>(
    executor: Arc<dyn Executor>,
    jobs: &[Job],
    options: &DispatchOptions,
    mut on_progress: F,
) -> Result<Vec<IndexedOutcome>>
where
    F: FnMut(usize, usize),
{
    if options.concurrency == 0 {
        return Err(HarnessError::Usage("concurrency must be at least 1".into()));
    }

    let total = jobs.len();
    let wave_size = options.wave_size();
    let mut outcomes = Vec::with_capacity(total);
    let mut completed = 0;

    for (wave, chunk) in jobs.chunks(wave_size).enumerate() {
        if wave > 0 {
            if let Some(delay) = options.wave_delay {
                tokio::time::sleep(delay).await;
            }
        }

        let first = wave * wave_size;
        debug!(wave, first, size = chunk.len(), "dispatching wave");

        let mut task_set = JoinSet::new();
        for (offset, job) in chunk.iter().enumerate() {
            let index = first + offset;
            let executor = Arc::clone(&executor);
            let job = job.clone();
            // The inner task isolates panics from the executor; the outer one
            // keeps the index so the JoinError can be attributed.
            task_set.spawn(async move {
                let kind = job.kind;
                let inner =
                    tokio::spawn(async move { executor.execute(job.kind, &job.case).await });
                (index, kind, inner.await)
            });
        }

        let mut settled = vec![false; chunk.len()];
        while let Some(joined) = task_set.join_next().await {
            let (index, kind, result) = match joined {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "dispatch task failed to join");
                    continue;
                }
            };

            let outcome = result.unwrap_or_else(|err| {
                let error = join_error_message(err);
                warn!(index, %error, "case execution panicked");
                Outcome::Failure { kind: FailureKind::Panicked, error, latency_ms: 0.0 }
            });

            settled[index - first] = true;
            outcomes.push(IndexedOutcome { index, kind, case: jobs[index].case.clone(), outcome });
            completed += 1;
            on_progress(completed, total);
        }

        // Only reachable if the runtime cancelled an outer task.
        for (offset, _) in settled.iter().enumerate().filter(|(_, done)| !**done) {
            let index = first + offset;
            let job = &jobs[index];
            outcomes.push(IndexedOutcome {
                index,
                kind: job.kind,
                case: job.case.clone(),
                outcome: Outcome::Failure {
                    kind: FailureKind::Panicked,
                    error: "task cancelled before completion".into(),
                    latency_ms: 0.0,
                },
            });
            completed += 1;
            on_progress(completed, total);
        }
    }

    outcomes.sort_by_key(|entry| entry.index);
    Ok(outcomes)
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        err.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
