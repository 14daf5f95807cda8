use std::path::Path;

use eyre::Result;
use serde_json::{Map, Value};
use tracing::debug;

use crate::checkpoint::{CheckpointStore, Report};

/// Builds the aggregated metrics of a category from its runs, in run
/// order, and stores them in the category directory.
pub async fn gather_metrics(
    store: &dyn CheckpointStore,
    category_dir: &Path,
    runs: &[String],
) -> Result<Vec<Value>> {
    let mut gathered = Vec::with_capacity(runs.len());
    for run in runs {
        let report = store.read(&category_dir.join(run)).await?;
        gathered.push(Value::Object(merge_run(report, run)));
    }
    store.write_metrics(category_dir, &gathered).await?;
    debug!(
        "Gathered metrics of {} runs in {}",
        gathered.len(),
        category_dir.display()
    );
    Ok(gathered)
}

/// Aggregated entry of one run.
///
/// The metric mappings of every category are merged into one; when several
/// extractors report the same metric, the last one wins.
pub fn merge_run(report: Report, id: &str) -> Map<String, Value> {
    let mut data = report.into_map();
    data.remove("category");
    data.remove("command");
    data.insert("id".to_owned(), Value::String(id.to_owned()));

    let merged = data
        .get("metrics")
        .and_then(Value::as_object)
        .map(|categories| {
            categories
                .iter()
                .map(|(category, metrics)| {
                    let mut gathered = Map::new();
                    for mapping in metrics.as_array().into_iter().flatten() {
                        if let Value::Object(mapping) = mapping {
                            gathered.extend(mapping.clone());
                        }
                    }
                    (category.clone(), Value::Object(gathered))
                })
                .collect::<Map<_, _>>()
        })
        .unwrap_or_default();
    data.insert("metrics".to_owned(), Value::Object(merged));
    data
}
