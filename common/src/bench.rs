use core::fmt::Debug;
use std::{collections::BTreeMap, path::Path, sync::Arc};

use eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    config::BenchmarkConfig, error::CampaignError, metrics::MetricsExtractor,
    plot::PlotDescription,
};

/// Placeholder substituted with the absolute run directory in commands
pub const OUTDIR_PLACEHOLDER: &str = "{outdir}";

/// One command of a benchmark execution matrix
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEntry {
    pub command: Vec<String>,
    /// Grouping key sharing metrics extractors and plots
    pub category: String,
    /// Context of the command, typically its parameter values
    #[serde(default)]
    pub metas: Map<String, Value>,
    /// Kinds of raw data written by the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// Variables added to the inherited environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ExecutionEntry {
    pub fn new(category: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            command,
            category: category.into(),
            ..Default::default()
        }
    }

    /// Fresh run identity: `name/uuid`, or a bare uuid for unnamed entries
    pub fn run_id(&self) -> String {
        let uuid = Uuid::new_v4().to_string();
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => format!("{name}/{uuid}"),
            _ => uuid,
        }
    }

    pub fn resolve_command(&self, outdir: &Path) -> Vec<String> {
        let outdir = outdir.to_string_lossy();
        self.command
            .iter()
            .map(|arg| arg.replace(OUTDIR_PLACEHOLDER, &outdir))
            .collect()
    }
}

pub type Extractors = BTreeMap<String, Vec<Arc<dyn MetricsExtractor>>>;

/// A benchmark plugin, describing the commands to run and how to read
/// their results
pub trait Benchmark: Debug + Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Commands to perform. Every command runs in its own directory, with
    /// stdout and stderr captured in `stdout.txt` and `stderr.txt`.
    fn execution_matrix(&self) -> Result<Vec<ExecutionEntry>>;
    /// Called before each command, `run_dir` is the command's directory
    fn pre_execute(&self, _run_dir: &Path) -> Result<()> {
        Ok(())
    }
    /// Extractors of every category of the execution matrix
    fn metrics_extractors(&self) -> Extractors;
    /// Figures of every category
    fn plots(&self) -> BTreeMap<String, Vec<PlotDescription>> {
        BTreeMap::new()
    }
}

pub type BenchmarkConstructor =
    Box<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn Benchmark>> + Send + Sync>;

/// Benchmark constructors by their campaign `type` name
#[derive(Default)]
pub struct BenchmarkRegistry {
    constructors: BTreeMap<String, BenchmarkConstructor>,
}

impl Debug for BenchmarkRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

impl BenchmarkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&Map<String, Value>) -> Result<Arc<dyn Benchmark>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Box::new(constructor));
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn build(&self, config: &BenchmarkConfig) -> Result<Arc<dyn Benchmark>> {
        let constructor = self
            .constructors
            .get(&config.kind)
            .ok_or_else(|| CampaignError::UnknownBenchmark(config.kind.clone()))?;
        constructor(&config.attributes)
    }
}
