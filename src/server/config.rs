//! Host configuration types

use anyhow::{Context, Result};
use extract_core::OrchestratorSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            database: DatabaseConfig::default(),
            orchestrator: OrchestratorSettings::default(),
            workers: WorkersConfig::default(),
            notifications: NotificationsConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl AppConfig {
    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Reject settings the engine would refuse at startup
    pub fn validate(&self) -> Result<()> {
        if self.language.trim().is_empty() {
            anyhow::bail!("language must not be empty");
        }

        if self.workers.max_concurrent_tasks == Some(0) {
            anyhow::bail!("workers.max_concurrent_tasks must be at least 1");
        }

        self.orchestrator
            .validate()
            .context("Invalid orchestrator settings")
    }
}

/// SQLite database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/extract.db"),
        }
    }
}

/// Task worker pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
}

/// E-mail notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Graceful shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_shutdown_timeout")]
    pub timeout_secs: u64,
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout(),
        }
    }
}
