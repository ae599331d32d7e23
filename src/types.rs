use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::HarnessError;
use crate::stats::LatencySummary;

/// One input record: field name to value. Shape depends on the kind it is sent as.
pub type TestCase = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Price,
    Moderation,
    /// Each case is independently resolved to price or moderation at generation time.
    Mixed,
}

/// A kind that maps to exactly one endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConcreteKind {
    Price,
    Moderation,
}

impl ConcreteKind {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Price => "/negotiate",
            Self::Moderation => "/moderate",
        }
    }

    pub fn batch_endpoint(&self) -> &'static str {
        match self {
            Self::Price => "/batch/negotiate",
            Self::Moderation => "/batch/moderate",
        }
    }

    /// Name of the array field a batch request carries its cases in.
    pub fn batch_field(&self) -> &'static str {
        match self {
            Self::Price => "items",
            Self::Moderation => "messages",
        }
    }
}

/// A case paired with the endpoint it is sent to.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub kind: ConcreteKind,
    pub case: TestCase,
}

impl Job {
    pub fn new(kind: ConcreteKind, case: TestCase) -> Self {
        Self { kind, case }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Sequential,
    #[default]
    Parallel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Network,
    Server,
    Parse,
    /// The task executing the case panicked.
    Panicked,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success {
        payload: Payload,
        latency_ms: f64,
    },
    Failure {
        kind: FailureKind,
        error: String,
        latency_ms: f64,
    },
}

impl Outcome {
    pub fn from_error(err: &HarnessError, latency_ms: f64) -> Self {
        Self::Failure { kind: err.failure_kind(), error: err.detail(), latency_ms }
    }

    pub fn latency_ms(&self) -> f64 {
        match self {
            Self::Success { latency_ms, .. } | Self::Failure { latency_ms, .. } => *latency_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// An outcome tagged with the zero-based position of its case in the input.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IndexedOutcome {
    pub index: usize,
    #[serde(rename = "test_kind")]
    pub kind: ConcreteKind,
    pub case: TestCase,
    #[serde(flatten)]
    pub outcome: Outcome,
}

// Wire model of the remote service.

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRequest {
    pub title: String,
    pub category: String,
    pub brand: String,
    pub condition: String,
    #[serde(deserialize_with = "lenient_int")]
    pub age_months: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub asking_price: i64,
    pub location: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModerationRequest {
    pub message: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    Price(PriceRequest),
    Moderation(ModerationRequest),
}

impl RequestBody {
    /// Builds the typed body for `kind` out of a loosely-typed case.
    pub fn from_case(kind: ConcreteKind, case: &TestCase) -> Result<Self, HarnessError> {
        let value = Value::Object(case.clone());
        let body = match kind {
            ConcreteKind::Price => serde_json::from_value(value).map(Self::Price),
            ConcreteKind::Moderation => serde_json::from_value(value).map(Self::Moderation),
        };
        body.map_err(|e| HarnessError::Parse(format!("invalid {kind:?} case: {e}")))
    }
}

/// Accepts a JSON integer, a whole float or a numeric string. Tabular datasets
/// only carry strings. Fractional or out-of-range values are rejected.
fn lenient_int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Float(f) => whole_number(f)
            .ok_or_else(|| serde::de::Error::custom(format!("expected a whole number, got {f}"))),
        Raw::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_number))
                .ok_or_else(|| {
                    serde::de::Error::custom(format!("expected a whole number, got {s:?}"))
                })
        }
    }
}

fn whole_number(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it does not fit.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f.is_finite() && f.fract() == 0.0 && f >= -LIMIT && f < LIMIT).then_some(f as i64)
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub processing_time: Option<f64>,
    pub agent_type: Option<String>,
    pub execution_id: Option<ExecutionId>,
}

/// The agents number their executions; fallback paths send a uuid instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionId {
    Number(u64),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceSuggestion {
    pub suggested_price_range: PriceRange,
    pub confidence: f64,
    pub market_position: String,
    pub reasoning: String,
    pub recommendations: Option<Vec<String>>,
    pub metadata: Option<ResultMetadata>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub status: String,
    pub confidence: f64,
    pub severity: String,
    pub reason: String,
    pub action_recommended: String,
    pub detected_elements: Option<Vec<String>>,
    pub metadata: Option<ResultMetadata>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Price(PriceSuggestion),
    Moderation(ModerationVerdict),
}

/// Response of the batch endpoints. `index` is the position in the request array.
#[derive(Debug, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub results: Vec<BatchItem>,
    pub total_processed: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct BatchItem {
    pub index: usize,
    #[serde(default)]
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

// Reports.

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ErrorBreakdown {
    pub network: u32,
    pub server: u32,
    pub parse: u32,
    pub panicked: u32,
}

impl ErrorBreakdown {
    pub fn record(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::Network => self.network += 1,
            FailureKind::Server => self.server += 1,
            FailureKind::Parse => self.parse += 1,
            FailureKind::Panicked => self.panicked += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.network + self.server + self.parse + self.panicked
    }
}

impl<'a> FromIterator<&'a Outcome> for ErrorBreakdown {
    fn from_iter<I: IntoIterator<Item = &'a Outcome>>(iter: I) -> Self {
        let mut breakdown = Self::default();
        for kind in iter.into_iter().filter_map(Outcome::failure_kind) {
            breakdown.record(kind);
        }
        breakdown
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BulkReport {
    pub kind: ConcreteKind,
    pub mode: DispatchMode,
    /// All cases went out in a single request to the batch endpoint.
    pub batch: bool,
    pub concurrency: usize,
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub latency: LatencySummary,
    pub error_breakdown: ErrorBreakdown,
    pub outcomes: Vec<IndexedOutcome>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BenchmarkReport {
    pub kind: TestKind,
    pub concurrency: usize,
    pub total_requests: usize,
    pub stress_mode: bool,
    pub seed: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub price_requests: usize,
    pub moderation_requests: usize,
    pub summary: BenchmarkSummary,
    pub error_breakdown: ErrorBreakdown,
    pub latencies_ms: Vec<f64>,
    pub payloads: Vec<Payload>,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BenchmarkSummary {
    pub mean_latency_ms: f64,
    pub success_rate: f64,
    pub throughput_rps: f64,
    pub latency: LatencySummary,
}

impl BenchmarkReport {
    pub fn success_count(&self) -> usize {
        self.payloads.len()
    }

    pub fn failure_count(&self) -> usize {
        self.errors.len()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_ms / 1000.0
    }
}
