use core::fmt::{self, Debug, Display};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    bench::Benchmark,
    checkpoint::{CheckpointStore, Report, Timer, checkpoint},
    error::CampaignError,
    execution::{STDERR_FILE, STDOUT_FILE},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Float,
    Integer,
    String,
    Boolean,
}

impl MetricType {
    /// Strict check, an integer value is not a float
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            MetricType::Float => value.is_f64(),
            MetricType::Integer => value.is_i64() || value.is_u64(),
            MetricType::String => value.is_string(),
            MetricType::Boolean => value.is_boolean(),
        }
    }
}

impl Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricType::Float => "float",
            MetricType::Integer => "integer",
            MetricType::String => "string",
            MetricType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Declared shape of a metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(rename = "type")]
    pub kind: MetricType,
    #[serde(default)]
    pub unit: String,
}

impl Metric {
    pub fn new(kind: MetricType, unit: impl Into<String>) -> Self {
        Self {
            kind,
            unit: unit.into(),
        }
    }

    pub fn seconds() -> Self {
        Self::new(MetricType::Float, "s")
    }

    pub fn milliseconds() -> Self {
        Self::new(MetricType::Float, "ms")
    }
}

/// Reads the output files of one run and reports metric values
#[async_trait::async_trait]
pub trait MetricsExtractor: Debug + Send + Sync {
    /// Metrics this extractor may return
    fn metrics(&self) -> BTreeMap<String, Metric>;
    /// Values of a run whose outputs are in `outdir`. Every returned metric
    /// must be declared in [`MetricsExtractor::metrics`] with a matching type.
    async fn extract(&self, outdir: &Path, metas: &Map<String, Value>) -> Result<Map<String, Value>>;

    fn stdout(&self, outdir: &Path) -> PathBuf {
        outdir.join(STDOUT_FILE)
    }

    fn stderr(&self, outdir: &Path) -> PathBuf {
        outdir.join(STDERR_FILE)
    }
}

/// Ensures returned metrics are the ones exposed by the extractor
pub fn check_metrics(
    extractor: &dyn MetricsExtractor,
    metrics: &Map<String, Value>,
) -> Result<(), CampaignError> {
    let exposed = extractor.metrics();
    for (name, value) in metrics {
        let metric = exposed
            .get(name)
            .ok_or_else(|| CampaignError::UnexpectedMetric(name.clone()))?;
        if !metric.kind.accepts(value) {
            return Err(CampaignError::MetricType {
                name: name.clone(),
                expected: metric.kind,
            });
        }
    }
    Ok(())
}

/// Runs the extractors of the run's category against `run_dir` and records
/// their metrics in the run report, one mapping per extractor.
///
/// `metrics[category]` is replaced as a whole, never appended to: after a
/// re-extraction it holds exactly one mapping per current extractor, and
/// mappings of extractors no longer declared are dropped.
pub async fn extract_metrics(
    store: &dyn CheckpointStore,
    benchmark: &dyn Benchmark,
    run_dir: &Path,
) -> Result<Report> {
    let timer = Timer::start();
    let report = store.read(run_dir).await?;
    let category = report.get_str("category").unwrap_or_default().to_owned();

    let all_extractors = benchmark.metrics_extractors();
    let extractors = all_extractors
        .get(&category)
        .ok_or_else(|| CampaignError::NoExtractor(category.clone()))?;
    let metas = report
        .payload
        .get("metas")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut collected = Vec::with_capacity(extractors.len());
    for extractor in extractors {
        let metrics = extractor
            .extract(run_dir, &metas)
            .await
            .wrap_err_with(|| format!("Extract metrics of {}", run_dir.display()))?;
        check_metrics(extractor.as_ref(), &metrics)?;
        collected.push(Value::Object(metrics));
    }
    debug!(
        "Extracted {} metrics mappings for {category} in {}",
        collected.len(),
        run_dir.display()
    );

    let mut payload = report.into_map();
    payload.remove("elapsed");
    payload.remove("date");
    let metrics = payload
        .entry("metrics")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metrics.is_object() {
        *metrics = Value::Object(Map::new());
    }
    if let Value::Object(categories) = metrics {
        categories.insert(category, Value::Array(collected));
    }
    checkpoint(store, run_dir, timer, Value::Object(payload), true).await
}
