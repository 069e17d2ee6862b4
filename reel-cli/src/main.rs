mod cli;
mod commands;
mod config;
mod error;
mod output;
mod utils;

use std::process;
use std::sync::Arc;

use clap::Parser;
use reel_engine::{DownloadRequest, Engine, FileSink};
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands},
    config::AppConfig,
    error::{AppError, Result},
    output::OutputManager,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let json = args.command.json();

    if let Err(e) = run(args).await {
        if json {
            let error_json = serde_json::json!({
                "status": "error",
                "message": e.to_string(),
            });
            println!("{error_json}");
        } else {
            error!("Application error: {}", e);
            eprintln!("Error: {}", e);
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let config = AppConfig::load(args.config.as_deref())?;
    debug!("Loaded configuration: {:?}", config);
    let engine_config = commands::engine_config(&config, &args)?;
    let output = OutputManager::new(args.command.json());

    match args.command {
        Commands::Variants {
            url,
            referrer,
            stream,
            ..
        } => {
            let sink = Arc::new(FileSink::new(config.output_dir()));
            let engine = Engine::new(engine_config, sink)?;
            commands::list_variants(&engine, &output, url, referrer, stream).await
        }
        Commands::Download {
            url,
            format,
            variant,
            compress,
            referrer,
            stream,
            output_dir,
            filename,
            ..
        } => {
            let dir = output_dir.unwrap_or_else(|| config.output_dir());
            let engine = Engine::new(engine_config, Arc::new(FileSink::new(dir)))?;

            let mut request = DownloadRequest::new(format, url)
                .with_compress(compress)
                .with_referrer(referrer);
            if let Some(variant) = variant {
                request = request.with_variant(variant);
            }
            if let Some(filename) = filename {
                request = request.with_filename(filename);
            }
            if let Some(stream) = stream {
                request = request.with_stream(stream);
            }
            commands::download(&engine, &output, request).await
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}
