use std::{path::Path, sync::Arc};

use common::{campaign::CampaignDriver, node::Mode};
use csv_series::SeriesPlotter;
use eyre::Result;
use tracing::{debug, info};

/// Runs a new campaign from `config_file`, or resumes the one in `folder`
pub async fn run_campaign(
    results: &Path,
    config_file: Option<&Path>,
    folder: Option<&Path>,
    mode: Mode,
) -> Result<()> {
    let driver = CampaignDriver::new(
        config_file,
        folder,
        results,
        default_benches::default_registry(),
    )
    .await?
    .with_plotter(Arc::new(SeriesPlotter));

    println!(
        "Campaign results in folder: {}",
        driver.campaign_path().display()
    );
    let report = driver.run(mode).await?;
    debug!("Campaign report: {report:?}");
    info!(
        "Campaign done in {:.3}s on hosts {:?}",
        report.elapsed,
        report.children()
    );
    Ok(())
}
