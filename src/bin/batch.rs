//! One-shot runner for the hourly traffic batch.
//!
//! Analyzes the images of a single hour bucket in the foreground and prints
//! what was stored, without starting the API server.
//!
//! ## Usage
//!
//! ```bash
//! urban-lens-batch                      # previous hour
//! urban-lens-batch --hours-ago 3        # three hours back
//! urban-lens-batch --prompt "Count bicycles"
//! ```

use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use urban_lens::analytics::{truncate_to_hour, ImageFetcher, TrafficPipeline, MAX_HOURS_AGO};
use urban_lens::config::Config;
use urban_lens::db::{format_timestamp, Database};
use urban_lens::llm::VisionClient;
use urban_lens::logging;

#[derive(Debug, PartialEq)]
struct BatchArgs {
    hours_ago: i64,
    prompt: Option<String>,
    config_path: Option<PathBuf>,
}

impl Default for BatchArgs {
    fn default() -> Self {
        Self {
            hours_ago: 1,
            prompt: None,
            config_path: None,
        }
    }
}

enum Command {
    Run(BatchArgs),
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let mut parsed = BatchArgs::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--hours-ago" | "-n" => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--hours-ago requires a number");
                };
                parsed.hours_ago = match value.parse::<i64>() {
                    Ok(n) if (0..=MAX_HOURS_AGO).contains(&n) => n,
                    _ => bail!(
                        "--hours-ago expects a number from 0 to {}, got `{}`",
                        MAX_HOURS_AGO,
                        value
                    ),
                };
                i += 1;
            }
            "--prompt" | "-p" => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--prompt requires text");
                };
                parsed.prompt = Some(value.clone());
                i += 1;
            }
            "--config" | "-c" => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--config requires a path argument");
                };
                parsed.config_path = Some(PathBuf::from(value));
                i += 1;
            }
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-V" => return Ok(Command::Version),
            other => bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    Ok(Command::Run(parsed))
}

fn print_help() {
    println!(
        r#"urban-lens-batch - Analyze one hour of traffic images

USAGE:
    urban-lens-batch [OPTIONS]

OPTIONS:
    --hours-ago, -n N   Hour bucket to process, counted back from the current hour (default: 1)
    --prompt, -p TEXT   Replace the default traffic prompt
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    URBAN_LENS_CONFIG   Path to config file (overrides default location)
    URBAN_LENS_LOG      Log filter (trace, debug, info, warn, error)"#
    );
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let batch = match parse_args(&args) {
        Ok(Command::Run(batch)) => batch,
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Command::Version) => {
            println!("urban-lens-batch {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    logging::init_stderr()?;

    let config = match &batch.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.database)?;
    db.initialize()?;

    let pipeline = TrafficPipeline::new(
        db,
        Arc::new(ImageFetcher::new(&config.images)),
        VisionClient::from_config(&config.llm),
    );

    let hour_start = truncate_to_hour(Utc::now()) - Duration::hours(batch.hours_ago);
    info!(hour = %hour_start, "Running traffic batch");
    let processed = pipeline.process_hour(hour_start, batch.prompt.as_deref())?;

    if processed.is_empty() {
        println!("No images found for hour {}", format_timestamp(hour_start));
        return Ok(());
    }

    for sample in &processed {
        let status = if sample.succeeded { "ok" } else { "failed" };
        println!(
            "#{} [{}] {} ({})\n{}\n",
            sample.sample_id, sample.source_id, sample.timestamp, status, sample.analysis
        );
    }
    let failed = processed.iter().filter(|s| !s.succeeded).count();
    info!(processed = processed.len(), failed, "Traffic batch finished");

    Ok(())
}
