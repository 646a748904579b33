//! CLI module for Extract
//!
//! - `run`: Start the orchestration engine
//! - `config`: Inspect the effective configuration

use clap::{Parser, Subcommand};

pub mod config;

/// Extract orchestration engine
#[derive(Parser, Debug)]
#[command(name = "extract")]
#[command(about = "Geodata order processing engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the engine
    Run,
    /// Inspect the configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Run) => crate::server::run().await,
        Some(Commands::Config(cmd)) => config::run(cmd),
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["extract", "run"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run)));

        let cli = Cli::try_parse_from(["extract", "config", "get", "orchestrator.mode"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config(config::ConfigCommands::Get { ref key })) if key == "orchestrator.mode"
        ));

        let cli = Cli::try_parse_from(["extract"]).unwrap();
        assert!(cli.command.is_none());
    }
}
