use thiserror::Error;

use crate::types::FailureKind;

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors raised by the harness.
///
/// `Network`, `Server` and `Parse` raised while executing a single case are
/// folded into a failed [`Outcome`](crate::types::Outcome) and never abort a run.
/// `Parse` while loading a dataset and `Usage` are terminal for the operation.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Transport or connection failure.
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx status or a response reporting `success: false`.
    #[error("server error: {0}")]
    Server(String),

    /// Malformed dataset file or undecodable response body.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid configuration or a run that cannot start.
    #[error("usage error: {0}")]
    Usage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Classification used when this error is recorded against a single case.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network(_) | Self::Io(_) => FailureKind::Network,
            Self::Server(_) => FailureKind::Server,
            Self::Parse(_) | Self::Usage(_) => FailureKind::Parse,
        }
    }

    /// The error detail without the category prefix.
    pub fn detail(&self) -> String {
        match self {
            Self::Network(msg) | Self::Server(msg) | Self::Parse(msg) | Self::Usage(msg) => {
                msg.clone()
            }
            Self::Io(err) => err.to_string(),
        }
    }
}
