use core::fmt::Debug;
use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
    time::Instant,
};

use chrono::{Local, NaiveDateTime};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs::{create_dir_all, read_to_string, try_exists, write};
use tracing::debug;

use crate::error::CampaignError;

/// Per-node report written in every node directory
pub const REPORT_FILE: &str = "report.yaml";
/// Copy of the campaign configuration, at the campaign root
pub const CAMPAIGN_FILE: &str = "campaign.yaml";
/// Aggregated metrics of a category
pub const METRICS_FILE: &str = "metrics.json";

/// Checkpoint document of one node.
///
/// `children` is only present for nodes that enumerate children; every
/// node-specific key (`command`, `exit_status`, `metrics`, ...) lives in
/// `payload`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
    #[serde(default)]
    pub elapsed: f64,
    #[serde(default)]
    pub date: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Report {
    /// Builds a report from what a node produced: a sequence becomes the
    /// `children` list, a mapping is used as-is.
    pub fn from_output(output: Value) -> Result<Self, CampaignError> {
        match output {
            Value::Array(items) => {
                let children = items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(child) => Ok(child),
                        other => Err(CampaignError::UnexpectedResult(format!(
                            "child identifier must be a string, got {other}"
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self {
                    children: Some(children),
                    ..Default::default()
                })
            }
            Value::Object(map) => serde_json::from_value(Value::Object(map))
                .map_err(|err| CampaignError::UnexpectedResult(err.to_string())),
            other => Err(CampaignError::UnexpectedResult(format!(
                "expected a sequence or a mapping, got {}",
                value_kind(&other)
            ))),
        }
    }

    pub fn children(&self) -> &[String] {
        self.children.as_deref().unwrap_or_default()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// The report as one flat mapping, including `elapsed` and `date`
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = self.payload;
        if let Some(children) = self.children {
            map.insert(
                "children".to_owned(),
                Value::Array(children.into_iter().map(Value::String).collect()),
            );
        }
        map.insert("elapsed".to_owned(), Value::from(self.elapsed));
        map.insert("date".to_owned(), Value::String(self.date));
        map
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// Wall-clock timer started when a node begins its own work
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
    date: NaiveDateTime,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            date: Local::now().naive_local(),
        }
    }

    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn date(&self) -> String {
        self.date.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

/// Wraps a node result into its report, stamps `elapsed` and `date` and
/// persists it unless `persist` is false.
pub async fn checkpoint(
    store: &dyn CheckpointStore,
    dir: &Path,
    timer: Timer,
    output: Value,
    persist: bool,
) -> Result<Report> {
    let mut report = Report::from_output(output)?;
    report.elapsed = timer.elapsed();
    report.date = timer.date();
    if persist {
        store.write(dir, &report).await?;
    } else {
        debug!("Not persisting report of {}", dir.display());
    }
    Ok(report)
}

/// Storage of node reports and aggregated metrics, keyed by node directory.
///
/// Nodes run one at a time, so implementations only need to support a
/// single writer.
#[async_trait::async_trait]
pub trait CheckpointStore: Debug + Send + Sync {
    /// Whether the node at `dir` has been checkpointed. Only a missing
    /// report means no checkpoint, other I/O failures are errors.
    async fn exists(&self, dir: &Path) -> Result<bool>;
    /// Fails with [`CampaignError::NotFound`] when there is no report
    async fn read(&self, dir: &Path) -> Result<Report>;
    async fn write(&self, dir: &Path, report: &Report) -> Result<()>;
    /// Fails with [`CampaignError::NotFound`] when metrics were never gathered
    async fn read_metrics(&self, dir: &Path) -> Result<Vec<Value>>;
    async fn write_metrics(&self, dir: &Path, metrics: &[Value]) -> Result<()>;
    /// Creates the node directory, succeeding if it already exists
    async fn ensure_dir(&self, dir: &Path) -> Result<()>;
}

/// Reports as `report.yaml` files and metrics as `metrics.json` files
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStore;

#[async_trait::async_trait]
impl CheckpointStore for FsStore {
    async fn exists(&self, dir: &Path) -> Result<bool> {
        let path = dir.join(REPORT_FILE);
        try_exists(&path)
            .await
            .wrap_err_with(|| format!("Check {}", path.display()))
    }

    async fn read(&self, dir: &Path) -> Result<Report> {
        let path = dir.join(REPORT_FILE);
        if !self.exists(dir).await? {
            return Err(CampaignError::NotFound(path).into());
        }
        let content = read_to_string(&path)
            .await
            .wrap_err_with(|| format!("Read {}", path.display()))?;
        serde_yml::from_str(&content).wrap_err_with(|| format!("Parse {}", path.display()))
    }

    async fn write(&self, dir: &Path, report: &Report) -> Result<()> {
        let path = dir.join(REPORT_FILE);
        write(&path, serde_yml::to_string(report)?)
            .await
            .wrap_err_with(|| format!("Write {}", path.display()))
    }

    async fn read_metrics(&self, dir: &Path) -> Result<Vec<Value>> {
        let path = dir.join(METRICS_FILE);
        let found = try_exists(&path)
            .await
            .wrap_err_with(|| format!("Check {}", path.display()))?;
        if !found {
            return Err(CampaignError::NotFound(path).into());
        }
        let content = read_to_string(&path)
            .await
            .wrap_err_with(|| format!("Read {}", path.display()))?;
        serde_json::from_str(&content).wrap_err_with(|| format!("Parse {}", path.display()))
    }

    async fn write_metrics(&self, dir: &Path, metrics: &[Value]) -> Result<()> {
        let path = dir.join(METRICS_FILE);
        let mut content = serde_json::to_string_pretty(metrics)?;
        content.push('\n');
        write(&path, content)
            .await
            .wrap_err_with(|| format!("Write {}", path.display()))
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        create_dir_all(dir)
            .await
            .wrap_err_with(|| format!("Create directory {}", dir.display()))
    }
}

/// Keeps everything in memory, for exercising traversal without report files
#[derive(Debug, Default)]
pub struct MemoryStore {
    reports: Mutex<HashMap<PathBuf, Report>>,
    metrics: Mutex<HashMap<PathBuf, Vec<Value>>>,
    dirs: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directories created through [`CheckpointStore::ensure_dir`]
    pub fn dirs(&self) -> Vec<PathBuf> {
        let dirs = self.dirs.lock().unwrap_or_else(PoisonError::into_inner);
        dirs.iter().cloned().collect()
    }

    pub fn report_count(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryStore {
    async fn exists(&self, dir: &Path) -> Result<bool> {
        let reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(reports.contains_key(dir))
    }

    async fn read(&self, dir: &Path) -> Result<Report> {
        let reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        reports
            .get(dir)
            .cloned()
            .ok_or_else(|| CampaignError::NotFound(dir.join(REPORT_FILE)).into())
    }

    async fn write(&self, dir: &Path, report: &Report) -> Result<()> {
        let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        reports.insert(dir.to_path_buf(), report.clone());
        Ok(())
    }

    async fn read_metrics(&self, dir: &Path) -> Result<Vec<Value>> {
        let metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        metrics
            .get(dir)
            .cloned()
            .ok_or_else(|| CampaignError::NotFound(dir.join(METRICS_FILE)).into())
    }

    async fn write_metrics(&self, dir: &Path, metrics: &[Value]) -> Result<()> {
        let mut stored = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        stored.insert(dir.to_path_buf(), metrics.to_vec());
        Ok(())
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        let mut dirs = self.dirs.lock().unwrap_or_else(PoisonError::into_inner);
        dirs.insert(dir.to_path_buf());
        Ok(())
    }
}
