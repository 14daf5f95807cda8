use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use common::metrics::{Metric, MetricType, MetricsExtractor};
use eyre::{Result, WrapErr};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs::read_to_string;
use tracing::warn;

use crate::CmdError;

/// Output file a metric is read from
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    #[default]
    Stdout,
    Stderr,
}

/// Metric declaration of the `cmd` benchmark attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricPattern {
    #[serde(rename = "type")]
    pub kind: MetricType,
    #[serde(default)]
    pub unit: String,
    /// The first capture group holds the value
    pub pattern: String,
    #[serde(default)]
    pub from: Stream,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    metric: Metric,
    regex: Regex,
    from: Stream,
}

/// Reads metrics out of the command outputs with regular expressions
#[derive(Debug, Clone, Default)]
pub struct PatternExtractor {
    patterns: BTreeMap<String, CompiledPattern>,
}

impl PatternExtractor {
    pub fn new(metrics: &BTreeMap<String, MetricPattern>) -> Result<Self, CmdError> {
        let mut patterns = BTreeMap::new();
        for (name, declared) in metrics {
            let regex = Regex::new(&declared.pattern).map_err(|source| CmdError::Pattern {
                name: name.clone(),
                source,
            })?;
            if regex.captures_len() < 2 {
                return Err(CmdError::NoCaptureGroup(name.clone()));
            }
            patterns.insert(
                name.clone(),
                CompiledPattern {
                    metric: Metric::new(declared.kind, declared.unit.clone()),
                    regex,
                    from: declared.from,
                },
            );
        }
        Ok(Self { patterns })
    }

    fn path(&self, outdir: &Path, from: Stream) -> PathBuf {
        match from {
            Stream::Stdout => self.stdout(outdir),
            Stream::Stderr => self.stderr(outdir),
        }
    }
}

#[async_trait::async_trait]
impl MetricsExtractor for PatternExtractor {
    fn metrics(&self) -> BTreeMap<String, Metric> {
        self.patterns
            .iter()
            .map(|(name, pattern)| (name.clone(), pattern.metric.clone()))
            .collect()
    }

    async fn extract(&self, outdir: &Path, _metas: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut outputs: BTreeMap<Stream, String> = BTreeMap::new();
        let mut values = Map::new();
        for (name, pattern) in &self.patterns {
            if !outputs.contains_key(&pattern.from) {
                let path = self.path(outdir, pattern.from);
                let content = read_to_string(&path)
                    .await
                    .wrap_err_with(|| format!("Read {}", path.display()))?;
                outputs.insert(pattern.from, content);
            }
            let output = outputs.get(&pattern.from).map(String::as_str).unwrap_or_default();

            let Some(raw) = pattern
                .regex
                .captures(output)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().trim())
            else {
                warn!("Metric {name} not found in {}", outdir.display());
                continue;
            };
            values.insert(name.clone(), parse_value(name, pattern.metric.kind, raw)?);
        }
        Ok(values)
    }
}

fn parse_value(name: &str, kind: MetricType, raw: &str) -> Result<Value, CmdError> {
    let invalid = || CmdError::Parse {
        name: name.to_owned(),
        value: raw.to_owned(),
        kind,
    };
    match kind {
        MetricType::Float => raw
            .parse::<f64>()
            .ok()
            .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number))
            .ok_or_else(invalid),
        MetricType::Integer => raw.parse::<i64>().map(Value::from).map_err(|_| invalid()),
        MetricType::Boolean => raw.parse::<bool>().map(Value::from).map_err(|_| invalid()),
        MetricType::String => Ok(Value::String(raw.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn extractor(metrics: Value) -> PatternExtractor {
        let metrics: BTreeMap<String, MetricPattern> = serde_json::from_value(metrics).unwrap();
        PatternExtractor::new(&metrics).unwrap()
    }

    #[tokio::test]
    async fn reads_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stdout.txt"), "time: 1.25 s\nops=42\n").unwrap();
        std::fs::write(dir.path().join("stderr.txt"), "status ok\n").unwrap();

        let extractor = extractor(json!({
            "duration": {"type": "float", "unit": "s", "pattern": r"time: ([\d.]+)"},
            "ops": {"type": "integer", "pattern": r"ops=(\d+)"},
            "status": {"type": "string", "pattern": r"status (\w+)", "from": "stderr"},
        }));
        let values = extractor.extract(dir.path(), &Map::new()).await.unwrap();

        assert_eq!(
            Value::Object(values),
            json!({"duration": 1.25, "ops": 42, "status": "ok"})
        );
        assert_eq!(extractor.metrics()["duration"], Metric::seconds());
    }

    #[tokio::test]
    async fn whole_float_stays_a_float() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stdout.txt"), "2\n").unwrap();
        let extractor = extractor(json!({"duration": {"type": "float", "pattern": r"(\d+)"}}));
        let values = extractor.extract(dir.path(), &Map::new()).await.unwrap();
        assert!(values["duration"].is_f64());
    }

    #[tokio::test]
    async fn unmatched_metric_is_omitted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stdout.txt"), "nothing here\n").unwrap();
        let extractor = extractor(json!({"duration": {"type": "float", "pattern": r"time: ([\d.]+)"}}));
        let values = extractor.extract(dir.path(), &Map::new()).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn unparsable_value_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stdout.txt"), "ops=many\n").unwrap();
        let extractor = extractor(json!({"ops": {"type": "integer", "pattern": r"ops=(\w+)"}}));
        let err = extractor.extract(dir.path(), &Map::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CmdError>(),
            Some(CmdError::Parse { name, .. }) if name == "ops"
        ));
    }

    #[tokio::test]
    async fn missing_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = extractor(json!({"ops": {"type": "integer", "pattern": r"(\d+)"}}));
        assert!(extractor.extract(dir.path(), &Map::new()).await.is_err());
    }

    #[test]
    fn pattern_needs_a_capture_group() {
        let metrics: BTreeMap<String, MetricPattern> =
            serde_json::from_value(json!({"ops": {"type": "integer", "pattern": r"\d+"}})).unwrap();
        assert!(matches!(
            PatternExtractor::new(&metrics),
            Err(CmdError::NoCaptureGroup(name)) if name == "ops"
        ));
    }
}
