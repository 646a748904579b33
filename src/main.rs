//! Extract - Geodata order processing
//!
//! CLI entry point for the Extract engine.

#![forbid(unsafe_code)]

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "extract=info,extract_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = cli::Cli::parse();

    if let Err(error) = cli::run(cli).await {
        if let Some(engine_error) = error.downcast_ref::<extract_core::Error>() {
            eprintln!("{}", extract_core::format_error_for_cli(engine_error));
        }
        return Err(error);
    }

    Ok(())
}
