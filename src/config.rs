use std::time::Duration;

use serde::Deserialize;

use crate::error::{HarnessError, Result};

const ENV_PREFIX: &str = "MARKETPLACE_";

/// Tuning read from `MARKETPLACE_*` environment variables.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Inter-wave delay for a normal benchmark.
    #[serde(default = "default_pace_delay_ms")]
    pub pace_delay_ms: u64,

    /// Inter-wave delay under stress mode.
    #[serde(default = "default_stress_pace_delay_ms")]
    pub stress_pace_delay_ms: u64,

    /// Unset means the HTTP client's own behaviour (no timeout).
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_pace_delay_ms() -> u64 {
    100
}

fn default_stress_pace_delay_ms() -> u64 {
    20
}

fn default_user_agent() -> String {
    format!("marketplace-stress/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pace_delay_ms: default_pace_delay_ms(),
            stress_pace_delay_ms: default_stress_pace_delay_ms(),
            request_timeout_secs: None,
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env::<Self>()
            .map_err(|e| HarnessError::Usage(format!("invalid environment configuration: {e}")))
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter::<_, Self>(vars)
            .map_err(|e| HarnessError::Usage(format!("invalid environment configuration: {e}")))
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            normal: Duration::from_millis(self.pace_delay_ms),
            stress: Duration::from_millis(self.stress_pace_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Pause inserted between benchmark waves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    pub normal: Duration,
    pub stress: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Config::default().pacing()
    }
}

impl Pacing {
    pub fn delay(&self, stress_mode: bool) -> Duration {
        if stress_mode {
            self.stress
        } else {
            self.normal
        }
    }
}
