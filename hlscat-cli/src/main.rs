mod cli;
mod commands;
mod error;
mod headers;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    error::Result,
};
use clap::Parser;
use mimalloc::MiMalloc;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        if e.is_broken_pipe() {
            debug!("Output closed by consumer");
            return;
        }
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, finishing queued segments (Ctrl-C again to abort)");
                token.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    error!("Interrupted again, aborting");
                    process::exit(130);
                }
            }
        });
    }

    let executor = CommandExecutor::new(&args, token)?;

    match args.command {
        Commands::List { input, base } => executor.list(&input, base.as_deref()).await,
        Commands::Play { url } => executor.play(&url).await,
        Commands::Pack {
            url,
            output,
            header_kib,
            stop_free,
        } => executor.pack(&url, &output, header_kib, stop_free).await,
        Commands::Playlist {
            archive,
            uri,
            live,
            header_kib,
        } => {
            executor
                .playlist(&archive, uri.as_deref(), live, header_kib)
                .await
        }
        Commands::Extract { archive, range } => executor.extract(&archive, &range).await,
    }
}

/// Logs go to stderr; stdout carries playlist and stream output.
fn init_logging(verbose: bool, quiet: bool) {
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
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
}
