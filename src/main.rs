use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use pricepath::{
    config::Config,
    estimator::estimate_with_config,
    pipeline::{load_or_train, prepare},
    projection::{FlatCarry, Projector},
};
use serde_json::json;
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG: &str = "pricepath.toml";

#[derive(Parser)]
#[command(name = "pricepath")]
#[command(about = "UK house price training, projection and estimation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the panel and train (or reload) the model
    Train,

    /// Project a postcode's monthly price forward
    Project {
        /// Postcode, e.g. "SW1A 1AA"
        #[arg(short, long)]
        postcode: String,

        /// Years ahead; defaults to the configured value
        #[arg(short, long)]
        years: Option<u32>,
    },

    /// Answer one estimator request: JSON on stdin, JSON on stdout
    Estimate,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::from_file(p).with_context(|| format!("reading config {}", p.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => Config::from_file(DEFAULT_CONFIG),
        None => Ok(Config::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Train => {
            let prepared = prepare(&config)?;
            let (artifact, source) = load_or_train(&config, &prepared.engineered)?;
            info!("Model ready ({:?}, {} features)", source, artifact.features.len());
        }
        Commands::Project { postcode, years } => {
            let years = years.unwrap_or(config.projection.default_years);
            let prepared = prepare(&config)?;
            let (artifact, _) = load_or_train(&config, &prepared.engineered)?;
            let policy = FlatCarry {
                synthetic_count: config.projection.synthetic_count,
            };
            let projection = Projector::with_policy(&artifact, &prepared.panel, &prepared.certs, policy)
                .try_project(&postcode, years)
                .with_context(|| format!("projecting {}", postcode))?;

            let out = json!({
                "postcode": projection.postcode.display(),
                "months": projection.months,
                "aborted": projection.aborted.as_ref().map(ToString::to_string),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Estimate => {
            let mut input = String::new();
            io::stdin().read_to_string(&mut input)?;
            let response = estimate_with_config(&config.estimator, &input, Local::now().date_naive());
            println!("{}", serde_json::to_string(&response)?);
        }
    }

    Ok(())
}
