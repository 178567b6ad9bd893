use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use findme::config::{self, Config};
use findme::encoder::VisionEncoder;
use findme::error::ConfigError;
use findme::{discover, MatchStrategy, ScanError, Scanner};
use log::info;

#[derive(Parser)]
#[command(name = "findme")]
#[command(
    version,
    about = "Find the photos that contain the person in a selfie"
)]
struct Cli {
    /// Config file (defaults to the system config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a folder of photos for the face in a selfie
    Scan {
        /// Reference portrait
        selfie: PathBuf,
        /// Folder of candidate images (png, jpg, jpeg)
        folder: PathBuf,
        /// Match tolerance, 0.0-1.0 (lower is stricter)
        #[arg(short, long)]
        tolerance: Option<f32>,
        /// Ignore faces smaller than this many pixels
        #[arg(short, long)]
        min_face_size: Option<u32>,
        /// Images processed in parallel
        #[arg(short, long)]
        workers: Option<usize>,
        /// Per-image timeout in seconds (0 disables)
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Score every face instead of stopping at the first match
        #[arg(long)]
        exhaustive: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Open config file in editor
    Config,
}

struct ScanArgs {
    selfie: PathBuf,
    folder: PathBuf,
    json: bool,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan {
            selfie,
            folder,
            tolerance,
            min_face_size,
            workers,
            timeout_secs,
            exhaustive,
            json,
        } => {
            if let Some(t) = tolerance {
                cfg.tolerance = t;
            }
            if let Some(m) = min_face_size {
                cfg.min_face_size = m;
            }
            if let Some(w) = workers {
                cfg.workers = w;
            }
            if let Some(s) = timeout_secs {
                cfg.candidate_timeout_secs = s;
            }
            if exhaustive {
                cfg.strategy = MatchStrategy::Exhaustive;
            }
            scan(
                &cfg,
                ScanArgs {
                    selfie,
                    folder,
                    json,
                },
            )
        }
        Commands::Config => open_config(cli.config.as_deref()),
    }
}

fn scan(cfg: &Config, args: ScanArgs) -> Result<()> {
    let run = cfg.run_configuration()?;

    if !args.selfie.is_file() {
        return Err(ConfigError::MissingPath(args.selfie).into());
    }
    let candidates = discover::list_candidates(&args.folder)?;
    if candidates.is_empty() {
        return Err(ScanError::NoCandidates)
            .with_context(|| format!("searching {}", args.folder.display()));
    }

    info!("Selfie: {}", args.selfie.display());
    info!("Folder: {}", args.folder.display());
    info!("Found {} images.", candidates.len());

    let encoder = VisionEncoder::with_pool(
        &cfg.model_paths(),
        cfg.detector_settings(),
        run.workers.min(candidates.len()),
    )?;
    let scanner = Scanner::new(Arc::new(encoder), run);

    let report = scanner
        .scan(&args.selfie, &candidates)
        .context("Scan aborted")?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    if !config_path.exists() {
        config::save_config(&Config::default(), Some(config_path))
            .context("Failed to write default config")?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
