use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use urban_lens::analytics::{ImageFetcher, TrafficPipeline};
use urban_lens::auth::{ephemeral_secret, TokenService};
use urban_lens::config::Config;
use urban_lens::db::Database;
use urban_lens::llm::{AnalysisQueue, VisionClient};
use urban_lens::logging;
use urban_lens::schedule::Scheduler;
use urban_lens::server::{self, AppState};

/// How long queued analyses may keep running after the server stops.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("urban-lens {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config_path
}

fn print_help() {
    println!(
        r#"urban-lens - Traffic analytics API server

USAGE:
    urban-lens [OPTIONS]

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    URBAN_LENS_CONFIG         Path to config file (overrides default location)
    URBAN_LENS_LOG            Log filter (trace, debug, info, warn, error)
    URBAN_LENS_LISTEN_ADDR    Listen address, e.g. 0.0.0.0:8000
    URBAN_LENS_DATABASE_PATH  SQLite database file
    URBAN_LENS_JWT_SECRET     Token signing secret
    URBAN_LENS_LLM_API_KEY    Vision API key (GEMINI_API_KEY also accepted)
    URBAN_LENS_CORS_ORIGINS   Comma-separated or JSON list of origins
    URBAN_LENS_OBJECT_STORE   Enable s3:// image references (true/false)
    URBAN_LENS_DEBUG          Debug mode, disables the hourly scheduler

Config file location: $XDG_CONFIG_HOME/urban-lens/config.toml

See also: urban-lens-batch --help"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_args();

    // journald on Linux, rolling file otherwise
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let mut config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    if config.auth.jwt_secret.is_empty() {
        tracing::warn!("No JWT secret configured, using an ephemeral one; tokens will not survive a restart");
        config.auth.jwt_secret = ephemeral_secret();
    }
    let tokens = TokenService::from_config(&config.auth).context("Invalid auth configuration")?;

    let db = Database::open(&config.database)?;
    db.initialize()?;
    tracing::info!(path = %config.database.path.display(), "Database ready");

    let vision = VisionClient::from_config(&config.llm);
    tracing::info!(provider = vision.provider_name(), model = %config.llm.model, "Vision client configured");
    let pipeline = TrafficPipeline::new(
        db.clone(),
        Arc::new(ImageFetcher::new(&config.images)),
        vision,
    );
    let (queue, worker) = AnalysisQueue::start(Arc::new(pipeline));

    let scheduler = if config.schedule.enabled && !config.server.debug {
        Some(Scheduler::new(config.schedule.clone(), queue.clone()).start())
    } else {
        tracing::info!("Hourly scheduler disabled");
        None
    };

    let state = AppState {
        db,
        queue,
        tokens,
        config: Arc::new(config),
    };
    let result = server::serve(state).await;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, worker).await.is_err() {
        tracing::warn!("Analysis worker still busy at exit, abandoning queued jobs");
    }

    result.context("Server failed")
}
