use core::{cmp::Ordering, fmt::Debug};
use std::path::{Path, PathBuf};

use eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{bench::Benchmark, checkpoint::CheckpointStore};

/// Figure of one benchmark category
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotDescription {
    pub name: String,
    #[serde(default)]
    pub series: Series,
}

/// Data required to draw a figure
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Metas to retrieve, rows are sorted by them. A `-` prefix sorts
    /// that meta in descending order.
    #[serde(default)]
    pub metas: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
}

pub struct PlotContext<'a> {
    /// Aggregated metrics of the category
    pub metrics: &'a [Value],
    pub category: &'a str,
    pub hostname: &'a str,
    /// Category directory, where figures are written
    pub outdir: &'a Path,
}

#[async_trait::async_trait]
pub trait Plotter: Debug + Send + Sync {
    /// File name of the figure drawn for `desc`
    fn filename(&self, desc: &PlotDescription) -> String;
    /// Draws the figure described by `desc`
    ///
    /// Arguments:
    /// * `desc` - The figure to draw
    /// * `context` - Aggregated metrics and where they come from
    async fn plot(&self, desc: &PlotDescription, context: &PlotContext<'_>) -> Result<()>;
}

/// Plotter used when none is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlotter;

#[async_trait::async_trait]
impl Plotter for NoPlotter {
    fn filename(&self, desc: &PlotDescription) -> String {
        desc.name.clone()
    }

    async fn plot(&self, desc: &PlotDescription, context: &PlotContext<'_>) -> Result<()> {
        debug!(
            "No plotter for {} of category {}",
            desc.name, context.category
        );
        Ok(())
    }
}

/// Hands the aggregated metrics of a category to the plotter, once per
/// figure the benchmark declares for it. Returns the number of figures.
///
/// Metrics are only read when the category has figures to draw.
pub async fn trigger_plots(
    store: &dyn CheckpointStore,
    plotter: &dyn Plotter,
    benchmark: &dyn Benchmark,
    category: &str,
    category_dir: &Path,
    hostname: &str,
) -> Result<usize> {
    let plots = benchmark.plots();
    let descriptions = plots.get(category).map(Vec::as_slice).unwrap_or_default();
    if descriptions.is_empty() {
        debug!("No figure for {} {category}", benchmark.name());
        return Ok(0);
    }
    let metrics = store.read_metrics(category_dir).await?;
    let context = PlotContext {
        metrics: &metrics,
        category,
        hostname,
        outdir: category_dir,
    };
    for desc in descriptions {
        info!("Plotting {} of {} {category}", desc.name, benchmark.name());
        plotter.plot(desc, &context).await?;
    }
    Ok(descriptions.len())
}

/// Absolute paths of the figures drawn for a category
pub fn plot_files(
    plotter: &dyn Plotter,
    benchmark: &dyn Benchmark,
    category: &str,
    category_dir: &Path,
) -> Vec<PathBuf> {
    benchmark
        .plots()
        .get(category)
        .into_iter()
        .flatten()
        .map(|desc| category_dir.join(plotter.filename(desc)))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub metas: Vec<Value>,
    pub metrics: Vec<Value>,
}

/// Rows of a figure, one per run, sorted by the series metas.
/// Missing values are null.
pub fn collect_series(metrics: &[Value], category: &str, series: &Series) -> Vec<SeriesRow> {
    let metas = series
        .metas
        .iter()
        .map(|meta| match meta.strip_prefix('-') {
            Some(name) => (name, true),
            None => (meta.as_str(), false),
        })
        .collect::<Vec<_>>();

    let mut rows = metrics
        .iter()
        .map(|run| SeriesRow {
            metas: metas
                .iter()
                .map(|(name, _)| run["metas"][*name].clone())
                .collect(),
            metrics: series
                .metrics
                .iter()
                .map(|name| run["metrics"][category][name].clone())
                .collect(),
        })
        .collect::<Vec<_>>();

    rows.sort_by(|a, b| {
        metas
            .iter()
            .enumerate()
            .map(|(i, (_, descending))| {
                let order = compare_values(&a.metas[i], &b.metas[i]);
                if *descending { order.reverse() } else { order }
            })
            .find(|order| order.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    rows
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}
