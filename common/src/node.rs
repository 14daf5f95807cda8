use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use eyre::{ContextCompat, Result};
use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    aggregate::gather_metrics,
    bench::Benchmark,
    campaign::Campaign,
    checkpoint::{Report, Timer, checkpoint},
    error::CampaignError,
    execution::execute,
    host::select_tags,
    metrics::extract_metrics,
    plot::{plot_files, trigger_plots},
};

/// What an invocation of the campaign tree does
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run every command not run yet, extract and gather metrics
    #[default]
    Execute,
    /// Extract metrics again from the outputs of already executed runs
    ReExtract,
    /// Draw figures from already gathered metrics, writing no report
    Plot,
}

impl Mode {
    pub fn from_flags(no_exec: bool, plot: bool) -> Self {
        match (no_exec, plot) {
            (false, _) => Mode::Execute,
            (true, false) => Mode::ReExtract,
            (true, true) => Mode::Plot,
        }
    }

    /// Whether reports produced in this mode are persisted
    pub fn persists(self) -> bool {
        !matches!(self, Mode::Plot)
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Campaign,
    Host {
        name: String,
    },
    Tag {
        name: String,
    },
    Benchmark {
        name: String,
        benchmark: Arc<dyn Benchmark>,
    },
    Category {
        category: String,
        benchmark: Arc<dyn Benchmark>,
    },
    Run {
        id: String,
    },
    /// Identity-only placeholder returned by [`Node::traverse`]
    Leaf {
        name: String,
    },
}

/// A node of the campaign tree, living in its own directory.
///
/// Every level enumerates its children, builds them and invokes them in
/// their directory. The enumerated children are checkpointed in the node's
/// report, so later invocations reuse them instead of computing them again.
#[derive(Debug, Clone)]
pub struct Node<'c> {
    campaign: &'c Campaign,
    dir: PathBuf,
    kind: NodeKind,
}

impl<'c> Node<'c> {
    /// Root of the campaign tree, `dir` being the campaign directory
    pub fn root(campaign: &'c Campaign, dir: impl Into<PathBuf>) -> Self {
        Self {
            campaign,
            dir: dir.into(),
            kind: NodeKind::Campaign,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Children computed from the campaign, ignoring any checkpoint
    pub fn children(&self) -> Result<Vec<String>> {
        let campaign = self.campaign;
        match &self.kind {
            NodeKind::Campaign => Ok(vec![campaign.hostname.clone()]),
            NodeKind::Host { name } => {
                Ok(select_tags(name, &campaign.config.network.tags)?
                    .into_iter()
                    .collect())
            }
            NodeKind::Tag { name } => Ok(campaign
                .config
                .benchmarks
                .get(name)
                .map(|benchmarks| benchmarks.keys().cloned().collect())
                .unwrap_or_default()),
            NodeKind::Benchmark { benchmark, .. } => Ok(benchmark
                .execution_matrix()?
                .into_iter()
                .map(|entry| entry.category)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()),
            NodeKind::Category {
                category,
                benchmark,
            } => Ok(benchmark
                .execution_matrix()?
                .iter()
                .filter(|entry| entry.category == *category)
                .map(|entry| entry.run_id())
                .collect()),
            NodeKind::Run { .. } | NodeKind::Leaf { .. } => Ok(vec![]),
        }
    }

    /// Checkpointed children if the node has a report, computed ones otherwise
    pub async fn effective_children(&self) -> Result<Vec<String>> {
        let store = &*self.campaign.store;
        if store.exists(&self.dir).await? {
            return Ok(store.read(&self.dir).await?.children().to_vec());
        }
        self.children()
    }

    pub fn child_builder(&self, child: &str) -> Result<Node<'c>> {
        let campaign = self.campaign;
        let kind = match &self.kind {
            NodeKind::Campaign => NodeKind::Host {
                name: child.to_owned(),
            },
            NodeKind::Host { .. } => NodeKind::Tag {
                name: child.to_owned(),
            },
            NodeKind::Tag { name } => {
                let config = campaign
                    .config
                    .benchmarks
                    .get(name)
                    .and_then(|benchmarks| benchmarks.get(child))
                    .with_context(|| format!("No benchmark {child} in tag {name}"))?;
                NodeKind::Benchmark {
                    name: child.to_owned(),
                    benchmark: campaign.registry.build(config)?,
                }
            }
            NodeKind::Benchmark { benchmark, .. } => NodeKind::Category {
                category: child.to_owned(),
                benchmark: benchmark.clone(),
            },
            NodeKind::Category { .. } => NodeKind::Run {
                id: child.to_owned(),
            },
            NodeKind::Run { .. } | NodeKind::Leaf { .. } => {
                return Err(CampaignError::UnexpectedResult(format!(
                    "{} has no children",
                    self.dir.display()
                ))
                .into());
            }
        };
        Ok(Node {
            campaign,
            dir: self.dir.join(child),
            kind,
        })
    }

    /// Invokes the node and, recursively, its children
    pub fn invoke(&self, mode: Mode) -> LocalBoxFuture<'_, Result<Report>> {
        async move {
            match &self.kind {
                NodeKind::Category {
                    category,
                    benchmark,
                } => match mode {
                    Mode::Execute => self.execute_category(category, benchmark.as_ref()).await,
                    Mode::ReExtract => self.extract_category(benchmark.as_ref()).await,
                    Mode::Plot => self.plot_category(category, benchmark.as_ref()).await,
                },
                NodeKind::Run { id } | NodeKind::Leaf { name: id } => {
                    Err(CampaignError::UnexpectedResult(format!(
                        "{id} is invoked by its category"
                    ))
                    .into())
                }
                _ => self.invoke_children(mode).await,
            }
        }
        .boxed_local()
    }

    async fn invoke_children(&self, mode: Mode) -> Result<Report> {
        let timer = Timer::start();
        let store = &*self.campaign.store;
        let mut done = Vec::new();
        for child in self.effective_children().await? {
            let node = self.child_builder(&child)?;
            if mode == Mode::Execute {
                store.ensure_dir(node.dir()).await?;
            }
            debug!("Entering {}", node.dir().display());
            node.invoke(mode).await?;
            done.push(Value::String(child));
        }
        checkpoint(store, &self.dir, timer, Value::Array(done), mode.persists()).await
    }

    async fn execute_category(&self, category: &str, benchmark: &dyn Benchmark) -> Result<Report> {
        let store = &*self.campaign.store;
        if store.exists(&self.dir).await? {
            info!(
                "Category {category} of {} already executed, skipping",
                benchmark.name()
            );
            return store.read(&self.dir).await;
        }

        let timer = Timer::start();
        let mut runs = Vec::new();
        for entry in benchmark
            .execution_matrix()?
            .into_iter()
            .filter(|entry| entry.category == category)
        {
            let id = entry.run_id();
            let run_dir = self.dir.join(&id);
            info!("Running {} {category} in {}", benchmark.name(), run_dir.display());
            execute(store, benchmark, &entry, &run_dir).await?;
            extract_metrics(store, benchmark, &run_dir).await?;
            runs.push(id);
        }
        gather_metrics(store, &self.dir, &runs).await?;
        checkpoint(store, &self.dir, timer, Value::from(runs), true).await
    }

    async fn extract_category(&self, benchmark: &dyn Benchmark) -> Result<Report> {
        let store = &*self.campaign.store;
        let report = store.read(&self.dir).await?;
        let timer = Timer::start();
        let runs = report.children().to_vec();
        for run in &runs {
            extract_metrics(store, benchmark, &self.dir.join(run)).await?;
        }
        gather_metrics(store, &self.dir, &runs).await?;
        checkpoint(store, &self.dir, timer, Value::from(runs), true).await
    }

    async fn plot_category(&self, category: &str, benchmark: &dyn Benchmark) -> Result<Report> {
        let campaign = self.campaign;
        let report = campaign.store.read(&self.dir).await?;
        trigger_plots(
            &*campaign.store,
            &*campaign.plotter,
            benchmark,
            category,
            &self.dir,
            &campaign.hostname,
        )
        .await?;
        Ok(report)
    }

    /// Children of the node without invoking them. With `leaf`, children
    /// are identity-only placeholders.
    pub async fn traverse(&self, leaf: bool) -> Result<Vec<(String, Node<'c>)>> {
        let mut nodes = Vec::new();
        for child in self.effective_children().await? {
            let node = if leaf {
                Node {
                    campaign: self.campaign,
                    dir: self.dir.join(&child),
                    kind: NodeKind::Leaf {
                        name: child.clone(),
                    },
                }
            } else {
                self.child_builder(&child)?
            };
            nodes.push((child, node));
        }
        Ok(nodes)
    }

    /// Every category node below this one
    pub fn categories(&self) -> LocalBoxFuture<'_, Result<Vec<Node<'c>>>> {
        async move {
            match &self.kind {
                NodeKind::Category { .. } => Ok(vec![self.clone()]),
                NodeKind::Run { .. } | NodeKind::Leaf { .. } => Ok(vec![]),
                _ => {
                    let mut categories = Vec::new();
                    for (_, child) in self.traverse(false).await? {
                        categories.extend(child.categories().await?);
                    }
                    Ok(categories)
                }
            }
        }
        .boxed_local()
    }

    /// Shell command lines of the executed runs of a category node
    pub async fn commands(&self) -> Result<Vec<String>> {
        if !matches!(self.kind, NodeKind::Category { .. }) {
            return Ok(vec![]);
        }
        let store = &*self.campaign.store;
        if !store.exists(&self.dir).await? {
            return Ok(vec![]);
        }
        let mut commands = Vec::new();
        for run in store.read(&self.dir).await?.children() {
            let report = store.read(&self.dir.join(run)).await?;
            let command = report
                .payload
                .get("command")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(|arg| match arg {
                    Value::String(arg) => shell_quote(arg),
                    other => shell_quote(&other.to_string()),
                })
                .collect::<Vec<_>>();
            commands.push(command.join(" "));
        }
        Ok(commands)
    }

    /// Figures drawn for a category node
    pub fn plot_files(&self) -> Vec<PathBuf> {
        match &self.kind {
            NodeKind::Category {
                category,
                benchmark,
            } => plot_files(
                &*self.campaign.plotter,
                benchmark.as_ref(),
                category,
                &self.dir,
            ),
            _ => vec![],
        }
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
