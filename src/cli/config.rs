//! `extract config {show,get,check,defaults}`

use crate::server::config::AppConfig;
use crate::server::{load_config, DEFAULT_CONFIG};
use anyhow::{Context, Result};
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print one setting
    Get {
        /// Setting key (dot notation: orchestrator.mode)
        key: String,
    },
    /// Validate the effective configuration
    Check,
    /// Print the embedded defaults
    Defaults,
}

pub fn run(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let config = load_config().context("Failed to load configuration")?;
            print!("{}", config.to_toml()?);
        }
        ConfigCommands::Get { key } => {
            let config = load_config().context("Failed to load configuration")?;
            println!("{}", lookup(&config, &key)?);
        }
        ConfigCommands::Check => {
            let config = load_config().context("Failed to load configuration")?;
            config.validate()?;
            println!("Configuration is valid");
        }
        ConfigCommands::Defaults => print!("{}", DEFAULT_CONFIG),
    }
    Ok(())
}

fn lookup(config: &AppConfig, key: &str) -> Result<String> {
    let root = toml::Value::try_from(config).context("Failed to serialize config")?;

    let value = key
        .split('.')
        .try_fold(&root, |value, part| value.get(part))
        .with_context(|| format!("Unknown setting: {}", key))?;

    Ok(match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
