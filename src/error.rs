use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Distance metric contract violations. These point at an encoder that
/// produced inconsistent embeddings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricError {
    #[error("embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("embedding has zero or non-finite norm")]
    DegenerateVector,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("tolerance must be between 0.0 and 1.0, got {0}")]
    ToleranceOutOfRange(f32),

    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("path not found: {}", .0.display())]
    MissingPath(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("cannot read {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },
}

/// Why one candidate could not be evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("encoder panicked: {0}")]
    Panicked(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// A recovered per-candidate failure. Recorded on the candidate's result,
/// never propagated past the scanner.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("candidate scan failed: {reason}")]
pub struct CandidateScanFailed {
    pub reason: FailureReason,
}

impl From<FailureReason> for CandidateScanFailed {
    fn from(reason: FailureReason) -> Self {
        Self { reason }
    }
}

/// Errors that abort a run before a report is produced.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to encode reference face from {}", path.display())]
    ReferenceEncodingFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("no candidate images to scan")]
    NoCandidates,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
