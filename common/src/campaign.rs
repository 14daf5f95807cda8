use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Local;
use eyre::{Result, WrapErr};
use tokio::fs::{copy, create_dir_all, try_exists};
use tracing::info;

use crate::{
    bench::BenchmarkRegistry,
    checkpoint::{CAMPAIGN_FILE, CheckpointStore, FsStore, Report},
    config::CampaignConfig,
    error::CampaignError,
    host::current_hostname,
    node::{Mode, Node},
    plot::{NoPlotter, Plotter},
};

/// Everything shared by the nodes of a campaign tree. Never mutated once
/// the traversal starts.
#[derive(Debug)]
pub struct Campaign {
    pub config: CampaignConfig,
    pub registry: BenchmarkRegistry,
    pub store: Arc<dyn CheckpointStore>,
    pub plotter: Arc<dyn Plotter>,
    pub hostname: String,
}

impl Campaign {
    pub fn new(config: CampaignConfig, registry: BenchmarkRegistry) -> Result<Self> {
        Ok(Self {
            config,
            registry,
            store: Arc::new(FsStore),
            plotter: Arc::new(NoPlotter),
            hostname: current_hostname()?,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_plotter(mut self, plotter: Arc<dyn Plotter>) -> Self {
        self.plotter = plotter;
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }
}

/// Root of a campaign: either a fresh one created from a campaign file, or
/// an existing campaign directory resumed with its own configuration copy.
#[derive(Debug)]
pub struct CampaignDriver {
    campaign: Campaign,
    campaign_path: PathBuf,
    /// Configuration file to copy into a fresh campaign directory
    source: Option<PathBuf>,
}

impl CampaignDriver {
    pub async fn new(
        campaign_file: Option<&Path>,
        campaign_path: Option<&Path>,
        output_root: &Path,
        registry: BenchmarkRegistry,
    ) -> Result<Self> {
        let (config, campaign_path, source) = match (campaign_file, campaign_path) {
            (Some(_), Some(_)) => {
                return Err(CampaignError::Configuration(
                    "a campaign file and an existing campaign directory are mutually exclusive"
                        .to_owned(),
                )
                .into());
            }
            (None, None) => {
                return Err(CampaignError::Configuration(
                    "either a campaign file or an existing campaign directory is required"
                        .to_owned(),
                )
                .into());
            }
            (None, Some(path)) => {
                let config = CampaignConfig::from_file(&path.join(CAMPAIGN_FILE)).await?;
                (config, path.to_path_buf(), None)
            }
            (Some(file), None) => {
                let config = CampaignConfig::from_file(file).await?;
                let name = config.output_dir_name(&Local::now())?;
                (config, output_root.join(name), Some(file.to_path_buf()))
            }
        };
        let campaign_path = std::path::absolute(&campaign_path)
            .wrap_err_with(|| format!("Resolve {}", campaign_path.display()))?;
        Ok(Self {
            campaign: Campaign::new(config, registry)?,
            campaign_path,
            source,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.campaign = self.campaign.with_store(store);
        self
    }

    pub fn with_plotter(mut self, plotter: Arc<dyn Plotter>) -> Self {
        self.campaign = self.campaign.with_plotter(plotter);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.campaign = self.campaign.with_hostname(hostname);
        self
    }

    /// Absolute campaign directory
    pub fn campaign_path(&self) -> &Path {
        &self.campaign_path
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn root(&self) -> Node<'_> {
        Node::root(&self.campaign, &self.campaign_path)
    }

    /// Invokes the whole campaign tree
    pub async fn run(&self, mode: Mode) -> Result<Report> {
        if mode == Mode::Execute {
            create_dir_all(&self.campaign_path)
                .await
                .wrap_err_with(|| format!("Create {}", self.campaign_path.display()))?;
            if let Some(source) = &self.source {
                let target = self.campaign_path.join(CAMPAIGN_FILE);
                let copied = try_exists(&target)
                    .await
                    .wrap_err_with(|| format!("Check {}", target.display()))?;
                if !copied {
                    copy(source, &target)
                        .await
                        .wrap_err_with(|| format!("Copy {}", source.display()))?;
                }
            }
        }
        info!(
            "Campaign {} in {mode:?} mode",
            self.campaign_path.display()
        );
        self.root().invoke(mode).await
    }
}
