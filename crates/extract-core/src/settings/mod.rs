//! Orchestrator and management settings
//!
//! [`OrchestratorSettings`] carries the scheduling step and the working-hours
//! policy. Both can be supplied by the host configuration or read from the
//! system parameters with [`OrchestratorSettings::from_parameters`].

mod time_range;


use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{Error, Result};
use crate::repositories::ParametersRepository;

pub use time_range::{TimeRange, TimeRangeCollection};

/// Default scheduling step in seconds
pub const DEFAULT_FREQUENCY_SECS: u64 = 20;

/// System parameter keys read by the engine
pub mod keys {
    /// Scheduling step in seconds
    pub const SCHEDULER_FREQUENCY: &str = "freq_scheduler_sec";
    /// Scheduler mode (ON, RANGES, OFF)
    pub const SCHEDULER_MODE: &str = "op_mode";
    /// Working-hours ranges as JSON
    pub const SCHEDULER_RANGES: &str = "op_timeranges";
    /// Days between standby reminders, 0 disables them
    pub const STANDBY_REMINDER_DAYS: &str = "standby_reminder_days";
    /// Whether the directory is enabled
    pub const LDAP_ENABLED: &str = "ldap_on";
    /// Whether directory synchronisation is enabled
    pub const LDAP_SYNCHRONIZATION_ENABLED: &str = "ldap_synchro_on";
    /// Hours between directory synchronisations
    pub const LDAP_SYNCHRONIZATION_FREQUENCY: &str = "ldap_synchro_freq";
    /// Last directory synchronisation (RFC 3339)
    pub const LDAP_LAST_SYNCHRONIZATION: &str = "ldap_last_synchro";
}

/// Working-hours policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchedulerMode {
    /// Jobs always run
    #[default]
    On,
    /// Jobs run inside the configured time ranges
    Ranges,
    /// Jobs never run
    Off,
}

impl fmt::Display for SchedulerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "ON"),
            Self::Ranges => write!(f, "RANGES"),
            Self::Off => write!(f, "OFF"),
        }
    }
}

impl FromStr for SchedulerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "ON" => Ok(Self::On),
            "RANGES" => Ok(Self::Ranges),
            "OFF" => Ok(Self::Off),
            other => Err(Error::invalid_config(
                "orchestrator.mode",
                format!("unknown scheduler mode '{}'", other),
            )),
        }
    }
}

/// Whether the engine should currently be running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingState {
    /// Jobs are allowed to run
    Running,
    /// Outside the working-hours ranges
    ScheduledStop,
    /// Scheduling switched off
    Stopped,
    /// RANGES mode without any range
    ScheduleConfigError,
}

impl fmt::Display for WorkingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::ScheduledStop => write!(f, "SCHEDULED_STOP"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::ScheduleConfigError => write!(f, "SCHEDULE_CONFIG_ERROR"),
        }
    }
}

/// Orchestrator-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Scheduling step in seconds
    #[serde(default = "default_frequency_secs")]
    pub frequency_secs: u64,
    /// Working-hours policy
    #[serde(default)]
    pub mode: SchedulerMode,
    /// Working-hours ranges (RANGES mode)
    #[serde(default)]
    pub ranges: TimeRangeCollection,
}

fn default_frequency_secs() -> u64 {
    DEFAULT_FREQUENCY_SECS
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            frequency_secs: DEFAULT_FREQUENCY_SECS,
            mode: SchedulerMode::On,
            ranges: TimeRangeCollection::default(),
        }
    }
}

impl OrchestratorSettings {
    /// Create settings
    pub fn new(frequency_secs: u64, mode: SchedulerMode, ranges: TimeRangeCollection) -> Self {
        Self {
            frequency_secs,
            mode,
            ranges,
        }
    }

    /// Read the settings from the system parameters, defaulting missing values
    pub async fn from_parameters(parameters: &dyn ParametersRepository) -> Result<Self> {
        let frequency_secs = match parameters.get(keys::SCHEDULER_FREQUENCY).await? {
            Some(value) => value.trim().parse().map_err(|_| {
                Error::invalid_config(
                    keys::SCHEDULER_FREQUENCY,
                    format!("'{}' is not a number of seconds", value),
                )
            })?,
            None => DEFAULT_FREQUENCY_SECS,
        };

        let mode = match parameters.get(keys::SCHEDULER_MODE).await? {
            Some(value) => value.parse()?,
            None => SchedulerMode::On,
        };

        let ranges = match parameters.get(keys::SCHEDULER_RANGES).await? {
            Some(value) => TimeRangeCollection::from_json(&value)?,
            None => TimeRangeCollection::default(),
        };

        Ok(Self::new(frequency_secs, mode, ranges))
    }

    /// Check the frequency and, in RANGES mode, the ranges
    pub fn validate(&self) -> Result<()> {
        if self.frequency_secs == 0 {
            return Err(Error::invalid_config(
                "orchestrator.frequency_secs",
                "the scheduling frequency must be greater than 0",
            ));
        }

        if self.mode == SchedulerMode::Ranges {
            self.ranges.validate()?;
        }

        Ok(())
    }

    /// Whether the settings are usable
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Whether jobs should run at an instant
    pub fn is_working_at<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        match self.mode {
            SchedulerMode::Off => false,
            SchedulerMode::On => true,
            SchedulerMode::Ranges => self.ranges.is_in_ranges(at),
        }
    }

    /// Whether jobs should run now, local time
    pub fn is_working(&self) -> bool {
        self.is_working_at(&Local::now())
    }

    /// Working state at an instant
    pub fn state_at<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> WorkingState {
        match self.mode {
            SchedulerMode::On => WorkingState::Running,
            SchedulerMode::Off => WorkingState::Stopped,
            SchedulerMode::Ranges if self.ranges.is_empty() => WorkingState::ScheduleConfigError,
            SchedulerMode::Ranges if self.ranges.is_in_ranges(at) => WorkingState::Running,
            SchedulerMode::Ranges => WorkingState::ScheduledStop,
        }
    }

    /// Working state now, local time
    pub fn state(&self) -> WorkingState {
        self.state_at(&Local::now())
    }
}

/// Directory synchronisation settings, stored in the system parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySyncSettings {
    /// Whether the directory is enabled at all
    pub enabled: bool,
    /// Whether periodic synchronisation is enabled
    pub synchronization_enabled: bool,
    /// Hours between synchronisations
    pub synchronization_frequency_hours: i64,
    /// Last synchronisation
    pub last_synchronization: Option<DateTime<Utc>>,
}

impl DirectorySyncSettings {
    /// Read the settings from the system parameters
    pub async fn load(parameters: &dyn ParametersRepository) -> Result<Self> {
        let flag = |value: Option<String>| {
            value
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "on"))
                .unwrap_or(false)
        };

        let enabled = flag(parameters.get(keys::LDAP_ENABLED).await?);
        let synchronization_enabled = flag(parameters.get(keys::LDAP_SYNCHRONIZATION_ENABLED).await?);

        let synchronization_frequency_hours = parameters
            .get(keys::LDAP_SYNCHRONIZATION_FREQUENCY)
            .await?
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(24);

        let last_synchronization = parameters
            .get(keys::LDAP_LAST_SYNCHRONIZATION)
            .await?
            .and_then(|value| DateTime::parse_from_rfc3339(value.trim()).ok())
            .map(|date| date.with_timezone(&Utc));

        Ok(Self {
            enabled,
            synchronization_enabled,
            synchronization_frequency_hours,
            last_synchronization,
        })
    }

    /// Whether periodic synchronisation should run
    pub fn is_synchronization_enabled(&self) -> bool {
        self.enabled && self.synchronization_enabled && self.synchronization_frequency_hours > 0
    }

    /// When the next synchronisation is due
    ///
    /// `None` when synchronisation is disabled or the frequency overflows; now
    /// when it never ran.
    pub fn next_scheduled_synchronization(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.is_synchronization_enabled() {
            return None;
        }

        match self.last_synchronization {
            None => Some(now),
            Some(last) => {
                let hours = self.synchronization_frequency_hours;
                let next = Duration::try_hours(hours).and_then(|delay| last.checked_add_signed(delay));
                if next.is_none() {
                    warn!(hours, "Directory synchronisation frequency out of range, not scheduled");
                }
                next
            }
        }
    }

    /// Record a synchronisation date
    pub async fn store_last_synchronization(
        parameters: &dyn ParametersRepository,
        at: DateTime<Utc>,
    ) -> Result<()> {
        parameters
            .set(keys::LDAP_LAST_SYNCHRONIZATION, &at.to_rfc3339())
            .await
    }
}
