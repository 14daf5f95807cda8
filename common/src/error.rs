use std::path::PathBuf;

use thiserror::Error;

use crate::metrics::MetricType;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Unknown association mode '{mode}' for tag '{tag}'")]
    UnknownAssociationMode { tag: String, mode: String },
    #[error("No extractor for benchmark category '{0}'")]
    NoExtractor(String),
    #[error("Unexpected metric '{0}' returned")]
    UnexpectedMetric(String),
    #[error("Unexpected type for metric '{name}', expected {expected}")]
    MetricType { name: String, expected: MetricType },
    #[error("Unexpected node result: {0}")]
    UnexpectedResult(String),
    #[error("Checkpoint not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Not a valid benchmark type: {0}")]
    UnknownBenchmark(String),
}
