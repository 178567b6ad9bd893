pub mod config;
pub mod discover;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod matcher;
pub mod metric;
pub mod report;
pub mod scanner;

pub use config::RunConfiguration;
pub use error::{CandidateScanFailed, ConfigError, FailureReason, MetricError, ScanError};
pub use filter::{BoundingBox, DetectedFace};
pub use matcher::{ImageMatch, MatchStrategy};
pub use metric::{DistanceMetric, Embedding};
pub use report::{MatchResult, RunReport};
pub use scanner::{CancelToken, FaceEncoder, Scanner};
