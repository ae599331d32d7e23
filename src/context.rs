use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{HarnessError, Result};
use crate::executor::Executor;

/// State shared by the runs started from one harness: the executor and the
/// run-in-progress flag. Only one run may hold the flag at a time.
#[derive(Clone)]
pub struct RunContext {
    executor: Arc<dyn Executor>,
    active: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor, active: Arc::new(AtomicBool::new(false)) }
    }

    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claims the context for a run. Fails if another run holds it.
    pub fn begin(&self) -> Result<RunPermit> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| HarnessError::Usage("a run is already in progress".into()))?;
        Ok(RunPermit { active: Arc::clone(&self.active) })
    }
}

/// Releases the run-in-progress flag when dropped.
#[derive(Debug)]
pub struct RunPermit {
    active: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}
