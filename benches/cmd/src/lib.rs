use std::{
    collections::BTreeMap,
    sync::Arc,
};

use common::{
    bench::{Benchmark, ExecutionEntry, Extractors},
    metrics::{MetricType, MetricsExtractor},
    plot::PlotDescription,
};
use eyre::Result;
use itertools::Itertools;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub use extractor::{MetricPattern, PatternExtractor, Stream};

pub mod extractor;

/// Campaign `type` of this benchmark
pub const KIND: &str = "cmd";

#[derive(Error, Debug)]
pub enum CmdError {
    #[error("Invalid cmd attributes: {0}")]
    Attributes(#[from] serde_json::Error),
    #[error("Empty command")]
    EmptyCommand,
    #[error("Invalid pattern for metric '{name}': {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("Pattern of metric '{0}' has no capture group")]
    NoCaptureGroup(String),
    #[error("Could not parse '{value}' as {kind} for metric '{name}'")]
    Parse {
        name: String,
        value: String,
        kind: MetricType,
    },
}

/// Runs an arbitrary command once per combination of its parameter matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Cmd {
    /// Arguments, `{param}` being replaced by the value of a matrix parameter
    pub command: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub matrix: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricPattern>,
    #[serde(default)]
    pub plots: Vec<PlotDescription>,
    #[serde(skip)]
    extractor: Arc<PatternExtractor>,
}

fn default_category() -> String {
    "main".to_owned()
}

impl Cmd {
    pub fn from_attributes(attributes: &Map<String, Value>) -> Result<Self, CmdError> {
        let mut cmd: Cmd = serde_json::from_value(Value::Object(attributes.clone()))?;
        if cmd.command.is_empty() {
            return Err(CmdError::EmptyCommand);
        }
        cmd.extractor = Arc::new(PatternExtractor::new(&cmd.metrics)?);
        Ok(cmd)
    }

    /// Constructor registered under [`KIND`]
    pub fn build(attributes: &Map<String, Value>) -> Result<Arc<dyn Benchmark>> {
        Ok(Arc::new(Self::from_attributes(attributes)?))
    }

    /// Every combination of the parameter matrix, in parameter name order
    fn combinations(&self) -> Vec<Map<String, Value>> {
        if self.matrix.is_empty() {
            return vec![Map::new()];
        }
        self.matrix
            .iter()
            .map(|(param, values)| values.iter().map(move |value| (param.clone(), value.clone())))
            .multi_cartesian_product()
            .map(|combination| combination.into_iter().collect())
            .collect()
    }
}

/// Replaces every `{param}` of `arg` in a single pass, so substituted
/// values are never expanded again. Unknown names are left as is.
fn substitute(placeholder: &Regex, arg: &str, params: &Map<String, Value>) -> String {
    placeholder
        .replace_all(arg, |caps: &Captures| match params.get(&caps[1]) {
            Some(Value::String(value)) => value.clone(),
            Some(other) => other.to_string(),
            None => caps[0].to_owned(),
        })
        .into_owned()
}

impl Benchmark for Cmd {
    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(KIND)
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn execution_matrix(&self) -> Result<Vec<ExecutionEntry>> {
        let placeholder = Regex::new(r"\{(\w+)\}")?;
        let entries = self
            .combinations()
            .into_iter()
            .map(|metas| {
                let command = self
                    .command
                    .iter()
                    .map(|arg| substitute(&placeholder, arg, &metas))
                    .collect();
                ExecutionEntry {
                    command,
                    category: self.category.clone(),
                    metas,
                    outputs: vec![],
                    environment: self.environment.clone(),
                    name: self.name.clone(),
                }
            })
            .collect::<Vec<_>>();
        debug!("{} expands to {} commands", self.name(), entries.len());
        Ok(entries)
    }

    fn metrics_extractors(&self) -> Extractors {
        let extractor: Arc<dyn MetricsExtractor> = self.extractor.clone();
        BTreeMap::from([(self.category.clone(), vec![extractor])])
    }

    fn plots(&self) -> BTreeMap<String, Vec<PlotDescription>> {
        if self.plots.is_empty() {
            return BTreeMap::new();
        }
        BTreeMap::from([(self.category.clone(), self.plots.clone())])
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn cmd(attributes: Value) -> Cmd {
        Cmd::from_attributes(attributes.as_object().unwrap()).unwrap()
    }

    #[test]
    fn expands_the_matrix() {
        let cmd = cmd(json!({
            "command": ["stress", "--cores={cores}", "--mode", "{mode}", "{outdir}/out"],
            "category": "cpu",
            "matrix": {"cores": [1, 4], "mode": ["fast", "slow"]},
        }));
        let entries = cmd.execution_matrix().unwrap();

        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|entry| entry.category == "cpu"));
        assert_eq!(entries[0].metas, *json!({"cores": 1, "mode": "fast"}).as_object().unwrap());
        assert_eq!(
            entries[3].command,
            ["stress", "--cores=4", "--mode", "slow", "{outdir}/out"]
        );
    }

    #[test]
    fn no_matrix_runs_once() {
        let cmd = cmd(json!({"command": ["echo", "hello"], "name": "greet"}));
        let entries = cmd.execution_matrix().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].category, "main");
        assert!(entries[0].metas.is_empty());
        assert!(entries[0].run_id().starts_with("greet/"));
        assert_eq!(cmd.name(), "greet");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let cmd = cmd(json!({
            "command": ["echo", "{a}-{b}", "{a}{a}"],
            "matrix": {"a": ["{b}"], "b": ["x"]},
        }));
        let entries = cmd.execution_matrix().unwrap();
        assert_eq!(entries[0].command, ["echo", "{b}-x", "{b}{b}"]);
    }

    #[test]
    fn empty_parameter_yields_nothing() {
        let cmd = cmd(json!({"command": ["echo", "{n}"], "matrix": {"n": []}}));
        assert!(cmd.execution_matrix().unwrap().is_empty());
    }

    #[test]
    fn extractors_and_plots_follow_the_category() {
        let cmd = cmd(json!({
            "command": ["echo", "1.5"],
            "category": "foo",
            "metrics": {"duration": {"type": "float", "unit": "s", "pattern": r"([\d.]+)"}},
            "plots": [{"name": "duration", "series": {"metas": [], "metrics": ["duration"]}}],
        }));
        let extractors = cmd.metrics_extractors();
        assert_eq!(extractors["foo"].len(), 1);
        assert!(extractors["foo"][0].metrics().contains_key("duration"));
        assert_eq!(cmd.plots()["foo"][0].name, "duration");
    }

    #[test]
    fn invalid_attributes_are_rejected() {
        let attributes = json!({"command": ["echo"], "commands": []});
        assert!(matches!(
            Cmd::from_attributes(attributes.as_object().unwrap()),
            Err(CmdError::Attributes(_))
        ));
        let attributes = json!({"command": []});
        assert!(matches!(
            Cmd::from_attributes(attributes.as_object().unwrap()),
            Err(CmdError::EmptyCommand)
        ));
        let attributes = json!({"command": ["echo"], "metrics": {"x": {"type": "float", "pattern": "("}}});
        assert!(matches!(
            Cmd::from_attributes(attributes.as_object().unwrap()),
            Err(CmdError::Pattern { .. })
        ));
    }
}
