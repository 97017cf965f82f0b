use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use landsat_pull::batch::BatchOrchestrator;
use landsat_pull::config::FetchConfig;
use landsat_pull::credentials::Credentials;
use landsat_pull::downloader::{format_size, ProgressEvent};
use landsat_pull::resolver::Resolver;
use landsat_pull::scene::Satellite;
use landsat_pull::scene_index::MetadataIndex;
use landsat_pull::scene_selection::{scene_selection_toml, SceneSelection};

#[derive(Parser, Debug)]
#[command(name = "landsat-pull")]
#[command(about = "Resolve and download Landsat scenes from the USGS archive")]
struct Cli {
    /// Fetch configuration (endpoints, timeouts, retries, proxy)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a scene selection template and the default fetch configuration
    Init {
        #[arg(default_value = "./inputs")]
        dir: PathBuf,
    },
    /// Print the scene identifiers of a path/row between two dates
    Series {
        #[arg(long)]
        satellite: Satellite,
        #[arg(long)]
        path: u16,
        #[arg(long)]
        row: u16,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Known overpass date, skips searching for the first acquisition
        #[arg(long)]
        reference_date: Option<NaiveDate>,
    },
    /// Download and unpack scenes
    Download {
        /// File holding `account password`
        #[arg(long)]
        credentials: PathBuf,
        #[arg(long, default_value = "./outputs")]
        output: PathBuf,
        /// Scene selection TOML whose scenes are added to the ids given
        #[arg(long)]
        selection: Option<PathBuf>,
        scene_ids: Vec<String>,
    },
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}

fn log_progress(event: &ProgressEvent) {
    debug!(
        "{:5.1}% of {} at {}/s",
        event.percent(),
        format_size(event.total),
        format_size(event.bytes_per_second as u64)
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = match &cli.config {
        Some(path) => FetchConfig::read(path)?,
        None => FetchConfig::default(),
    };

    match cli.command {
        Command::Init { dir } => {
            std::fs::create_dir_all(&dir)?;
            let selection = SceneSelection::from_template(&scene_selection_toml())?;
            selection.write(dir.join("scene_selection.toml"))?;
            config.write(dir.join("fetch.toml"))?;
            info!(dir = %dir.display(), "Wrote scene_selection.toml and fetch.toml");
        }
        Command::Series {
            satellite,
            path,
            row,
            start,
            end,
            reference_date,
        } => {
            let selection = SceneSelection {
                satellite,
                path,
                row,
                start,
                end,
                reference_date,
                scene_ids: vec![],
            };
            let resolver = Resolver::new(MetadataIndex::from_config(&config)?);
            for id in selection.resolve_scene_ids(&resolver).await? {
                println!("{id}");
            }
        }
        Command::Download {
            credentials,
            output,
            selection,
            mut scene_ids,
        } => {
            if let Some(selection) = selection {
                let selection = SceneSelection::read(&selection)?;
                let resolver = Resolver::new(MetadataIndex::from_config(&config)?);
                scene_ids.extend(selection.resolve_scene_ids(&resolver).await?);
            }
            if scene_ids.is_empty() {
                bail!("No scenes to download");
            }

            let credentials = Credentials::read(&credentials)?;
            let orchestrator =
                BatchOrchestrator::new(config).with_progress(Arc::new(log_progress));
            let result = orchestrator.run(&scene_ids, &output, &credentials).await?;
            result.write(output.join("batch_report.json"))?;

            println!(
                "succeeded: {}, skipped: {}, failed: {}",
                result.succeeded.len(),
                result.skipped.len(),
                result.failed.len()
            );
            for failure in &result.failed {
                println!("  {}: {}", failure.scene_id, failure.reason);
            }
        }
    }

    Ok(())
}
