//! Echoform CLI
//!
//! Command-line interface for the Echoform audio editing pipeline.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use echoform::cli::commands::{self, report_error};
use echoform::cli::{Cli, Commands};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!("Echoform v{}", env!("CARGO_PKG_VERSION"));

    let config = commands::build_config(&cli)?;

    let result = match cli.command {
        Some(Commands::Info { input }) => commands::info(&input).await,
        Some(Commands::Export {
            input,
            rate,
            effects,
            out_dir,
        }) => commands::export(config, &input, rate, &effects, out_dir.as_deref()).await,
        Some(Commands::Play { input, rate }) => commands::play(config, &input, rate).await,
        Some(Commands::Interactive { input }) => {
            commands::interactive(config, input.as_deref()).await
        }
        None => {
            println!("Echoform v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = &result {
        report_error(e);
        std::process::exit(1);
    }
    Ok(())
}
