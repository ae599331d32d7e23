//! Stub executors for dispatcher and runner tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::executor::Executor;
use crate::types::{
    ConcreteKind, FailureKind, Job, ModerationVerdict, Outcome, Payload, PriceRange,
    PriceSuggestion, TestCase,
};

/// Cases carrying only an `id` field equal to their position.
pub fn numbered_jobs(kind: ConcreteKind, count: usize) -> Vec<Job> {
    (0..count).map(|id| Job::new(kind, numbered_case(id))).collect()
}

pub fn numbered_case(id: usize) -> TestCase {
    json!({ "id": id }).as_object().cloned().unwrap_or_default()
}

fn case_id(case: &TestCase) -> usize {
    case.get("id").and_then(|v| v.as_u64()).map(|id| id as usize).unwrap_or(usize::MAX)
}

pub fn stub_payload(kind: ConcreteKind) -> Payload {
    match kind {
        ConcreteKind::Price => Payload::Price(PriceSuggestion {
            suggested_price_range: PriceRange { min: 800.0, max: 1200.0 },
            confidence: 0.9,
            market_position: "fairly_priced".into(),
            reasoning: "stub".into(),
            recommendations: None,
            metadata: None,
        }),
        ConcreteKind::Moderation => Payload::Moderation(ModerationVerdict {
            status: "safe".into(),
            confidence: 0.9,
            severity: "low".into(),
            reason: "stub".into(),
            action_recommended: "none".into(),
            detected_elements: None,
            metadata: None,
        }),
    }
}

/// Succeeds after sleeping a fixed latency.
#[derive(Default)]
pub struct FixedLatency {
    latency: Duration,
}

impl FixedLatency {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Executor for FixedLatency {
    async fn execute(&self, kind: ConcreteKind, _case: &TestCase) -> Outcome {
        tokio::time::sleep(self.latency).await;
        Outcome::Success { payload: stub_payload(kind), latency_ms: self.latency.as_secs_f64() * 1000.0 }
    }
}

/// Fails the cases whose `id` is listed, succeeds the rest.
pub struct FailOn {
    ids: HashSet<usize>,
}

impl FailOn {
    pub fn new(ids: impl IntoIterator<Item = usize>) -> Self {
        Self { ids: ids.into_iter().collect() }
    }
}

#[async_trait]
impl Executor for FailOn {
    async fn execute(&self, kind: ConcreteKind, case: &TestCase) -> Outcome {
        tokio::task::yield_now().await;
        let latency_ms = 1.0;
        let id = case_id(case);
        if self.ids.contains(&id) {
            Outcome::Failure {
                kind: FailureKind::Server,
                error: format!("case {id} rejected"),
                latency_ms,
            }
        } else {
            Outcome::Success { payload: stub_payload(kind), latency_ms }
        }
    }
}

/// Panics on the case with the given `id`.
pub struct PanicOn {
    id: usize,
}

impl PanicOn {
    pub fn new(id: usize) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Executor for PanicOn {
    async fn execute(&self, kind: ConcreteKind, case: &TestCase) -> Outcome {
        tokio::task::yield_now().await;
        if case_id(case) == self.id {
            panic!("stub executor panicked on case {}", self.id);
        }
        Outcome::Success { payload: stub_payload(kind), latency_ms: 0.0 }
    }
}

/// Records the number of concurrent calls and the order calls started in.
pub struct InFlightTracker {
    latency: Duration,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    order: Mutex<Vec<usize>>,
}

impl InFlightTracker {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn call_order(&self) -> Vec<usize> {
        self.order.lock().map(|order| order.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Executor for InFlightTracker {
    async fn execute(&self, kind: ConcreteKind, case: &TestCase) -> Outcome {
        if let Ok(mut order) = self.order.lock() {
            order.push(case_id(case));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Outcome::Success { payload: stub_payload(kind), latency_ms: self.latency.as_secs_f64() * 1000.0 }
    }
}

/// Fails every case with a network error after a fixed latency.
pub struct AlwaysFail {
    latency: Duration,
}

impl AlwaysFail {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Executor for AlwaysFail {
    async fn execute(&self, _kind: ConcreteKind, _case: &TestCase) -> Outcome {
        tokio::time::sleep(self.latency).await;
        Outcome::Failure {
            kind: FailureKind::Network,
            error: "connection refused".into(),
            latency_ms: self.latency.as_secs_f64() * 1000.0,
        }
    }
}
