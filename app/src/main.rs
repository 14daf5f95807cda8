use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use common::{
    campaign::CampaignDriver,
    checkpoint::{CAMPAIGN_FILE, CheckpointStore, FsStore},
    node::Mode,
};
use eyre::Result;
use tokio::fs::{create_dir_all, read_dir, try_exists};
use tracing::error;
use tracing_subscriber::{
    EnvFilter,
    fmt::{layer, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod bench;

const MODULES: &[&str] = &["common", "cmd", "default_benches", "csv_series"];

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Directory holding the campaign folders
    #[arg(long, default_value = "results")]
    results: PathBuf,
    #[arg(short, long)]
    log: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List campaigns
    Ls,
    /// Run a campaign, or resume an existing one
    Bench {
        /// Campaign file of a new campaign
        #[arg(short, long)]
        config_file: Option<PathBuf>,
        /// Existing campaign folder
        #[arg(short, long)]
        folder: Option<PathBuf>,
        /// Do not execute commands, extract metrics again
        #[arg(short, long, default_value_t = false)]
        no_exec: bool,
        /// With --no-exec, only draw the plots
        #[arg(long, default_value_t = false)]
        plot: bool,
    },
    /// Print executed commands of a campaign
    Print {
        /// Campaign folder
        #[arg(short, long)]
        folder: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or("warn".to_owned());
    let args = Cli::parse();
    let file_appender = tracing_appender::rolling::never(".", "log.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let mut env_filter = EnvFilter::new(format!("campaign={log_level}"));

    for log in &args.log {
        env_filter = env_filter.add_directive(log.parse()?);
    }

    for module in MODULES {
        if !args.log.iter().any(|x| x.starts_with(module)) {
            env_filter = env_filter.add_directive(format!("{module}={log_level}").parse()?);
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            layer()
                .with_timer(ChronoLocal::new("%v %k:%M:%S %z".to_owned()))
                .compact(),
        )
        .with(layer().with_writer(non_blocking))
        .init();

    match args.command {
        Commands::Ls => list_campaigns(&args.results).await?,
        Commands::Bench {
            config_file,
            folder,
            no_exec,
            plot,
        } => {
            create_dir_all(&args.results).await?;
            if let Err(err) = bench::run_campaign(
                &args.results,
                config_file.as_deref(),
                folder.as_deref(),
                Mode::from_flags(no_exec, plot),
            )
            .await
            {
                error!("{err:#?}");
                return Err(err);
            }
        }
        Commands::Print { folder } => print_commands(&args.results, &folder).await?,
    };

    Ok(())
}

async fn list_campaigns(results: &Path) -> Result<()> {
    if !try_exists(results).await? {
        return Ok(());
    }
    let mut items = read_dir(results).await?;
    let mut campaigns = Vec::new();
    while let Some(entry) = items.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() && try_exists(path.join(CAMPAIGN_FILE)).await? {
            let hosts = match FsStore.read(&path).await {
                Ok(report) => report.children().join(", "),
                Err(_) => "not executed".to_owned(),
            };
            campaigns.push((entry.file_name().to_string_lossy().into_owned(), hosts));
        }
    }
    campaigns.sort();
    for (name, hosts) in campaigns {
        println!("{name} -> {hosts}");
    }
    Ok(())
}

async fn print_commands(results: &Path, folder: &Path) -> Result<()> {
    let driver =
        CampaignDriver::new(None, Some(folder), results, default_benches::default_registry())
            .await?;
    for category in driver.root().categories().await? {
        println!("{}:", category.dir().display());
        for command in category.commands().await? {
            println!("  {command}");
        }
    }
    Ok(())
}
