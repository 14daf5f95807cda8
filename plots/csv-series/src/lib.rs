use common::plot::{PlotContext, PlotDescription, Plotter, collect_series};
use eyre::{Context, Result};
use serde_json::Value;
use tokio::fs::write;
use tracing::debug;

/// Writes the data series of every figure as `<name>.csv` in the category
/// directory, one column per meta then one per metric
#[derive(Debug, Default, Clone, Copy)]
pub struct SeriesPlotter;

impl SeriesPlotter {
    fn render(desc: &PlotDescription, context: &PlotContext<'_>) -> Result<Vec<u8>> {
        let series = &desc.series;
        let mut writer = csv::Writer::from_writer(vec![]);
        let header = series
            .metas
            .iter()
            .map(|meta| meta.trim_start_matches('-'))
            .chain(series.metrics.iter().map(String::as_str));
        writer.write_record(header)?;

        for row in collect_series(context.metrics, context.category, series) {
            writer.write_record(row.metas.iter().chain(&row.metrics).map(cell))?;
        }
        writer.into_inner().wrap_err("Flush csv writer")
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl Plotter for SeriesPlotter {
    fn filename(&self, desc: &PlotDescription) -> String {
        format!("{}.csv", desc.name)
    }

    async fn plot(&self, desc: &PlotDescription, context: &PlotContext<'_>) -> Result<()> {
        let path = context.outdir.join(self.filename(desc));
        let content = Self::render(desc, context)?;
        write(&path, content)
            .await
            .wrap_err_with(|| format!("Write {}", path.display()))?;
        debug!(
            "Wrote {} rows of {} for {}",
            context.metrics.len(),
            desc.name,
            context.hostname
        );
        Ok(())
    }
}
