use std::{collections::BTreeMap, fmt::Write, path::Path};

use chrono::{DateTime, TimeZone};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs::read_to_string;

use crate::error::CampaignError;

/// One tag association rule, ie. `{match: "^web.*"}` or `{nodes: [db-01]}`
pub type TagRule = BTreeMap<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// strftime template of the campaign directory name
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub network: NetworkConfig,
    /// tag -> benchmark name -> benchmark definition
    #[serde(default)]
    pub benchmarks: BTreeMap<String, BTreeMap<String, BenchmarkConfig>>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<TagRule>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

fn default_output_dir() -> String {
    "campaign-%Y%m%d-%H%M%S".to_owned()
}

impl CampaignConfig {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yml::from_str(content)?)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = read_to_string(path)
            .await
            .wrap_err_with(|| format!("Read campaign file {}", path.display()))?;
        Self::parse(&content).wrap_err_with(|| format!("Parse campaign file {}", path.display()))
    }

    /// Name of the campaign directory for a campaign started at `now`
    pub fn output_dir_name<Tz>(&self, now: &DateTime<Tz>) -> Result<String, CampaignError>
    where
        Tz: TimeZone,
        Tz::Offset: core::fmt::Display,
    {
        let mut name = String::new();
        write!(name, "{}", now.format(&self.output_dir)).map_err(|_| {
            CampaignError::Configuration(format!("invalid output_dir '{}'", self.output_dir))
        })?;
        Ok(name)
    }
}
