//! Working-hours time ranges
//!
//! A range spans ISO weekdays `dayfrom..=dayto` (1 = Monday, 7 = Sunday,
//! wrapping around the week when `dayfrom > dayto`) and the times
//! `timefrom..=timeto` on each of those days. `24:00` is a valid end time.

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const SECONDS_PER_DAY: u32 = 24 * 3600;

/// One working-hours range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// First ISO weekday
    #[serde(rename = "dayfrom")]
    pub day_from: u32,
    /// Last ISO weekday
    #[serde(rename = "dayto")]
    pub day_to: u32,
    /// Start time, `HH:MM`
    #[serde(rename = "timefrom")]
    pub time_from: String,
    /// End time, `HH:MM`
    #[serde(rename = "timeto")]
    pub time_to: String,
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            day_from: 1,
            day_to: 7,
            time_from: "00:00".to_string(),
            time_to: "24:00".to_string(),
        }
    }
}

impl TimeRange {
    /// Create a range
    pub fn new(
        day_from: u32,
        day_to: u32,
        time_from: impl Into<String>,
        time_to: impl Into<String>,
    ) -> Self {
        Self {
            day_from,
            day_to,
            time_from: time_from.into(),
            time_to: time_to.into(),
        }
    }

    /// Check days and times
    pub fn validate(&self) -> Result<()> {
        for day in [self.day_from, self.day_to] {
            if !(1..=7).contains(&day) {
                return Err(Error::invalid_config(
                    "orchestrator.ranges",
                    format!("day {} is not an ISO weekday (1-7)", day),
                ));
            }
        }

        let from = parse_time(&self.time_from)?;
        let to = parse_time(&self.time_to)?;

        if from > to {
            return Err(Error::invalid_config(
                "orchestrator.ranges",
                format!("{} is after {}", self.time_from, self.time_to),
            ));
        }

        Ok(())
    }

    /// Whether a weekday falls in the day span
    pub fn fits_day_range(&self, iso_weekday: u32) -> bool {
        if self.day_from <= self.day_to {
            (self.day_from..=self.day_to).contains(&iso_weekday)
        } else {
            iso_weekday >= self.day_from || iso_weekday <= self.day_to
        }
    }

    /// Whether a time of day (seconds from midnight) falls in the time span
    pub fn fits_time_range(&self, seconds_from_midnight: u32) -> bool {
        match (parse_time(&self.time_from), parse_time(&self.time_to)) {
            (Ok(from), Ok(to)) => from <= seconds_from_midnight && seconds_from_midnight <= to,
            _ => false,
        }
    }

    /// Whether an instant is inside the range
    pub fn is_in_range<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        let iso_weekday = at.weekday().number_from_monday();
        self.fits_day_range(iso_weekday) && self.fits_time_range(at.num_seconds_from_midnight())
    }
}

fn parse_time(value: &str) -> Result<u32> {
    let invalid = || {
        Error::invalid_config(
            "orchestrator.ranges",
            format!("'{}' is not a HH:MM time", value),
        )
    };

    let (hours, minutes) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;

    if minutes >= 60 {
        return Err(invalid());
    }

    let seconds = hours * 3600 + minutes * 60;

    if seconds > SECONDS_PER_DAY {
        return Err(invalid());
    }

    Ok(seconds)
}

/// Set of working-hours ranges; an instant is inside if any range contains it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeRangeCollection {
    ranges: Vec<TimeRange>,
}

impl TimeRangeCollection {
    /// Create a collection
    pub fn new(ranges: Vec<TimeRange>) -> Self {
        Self { ranges }
    }

    /// Parse the JSON array stored in the system parameters
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_json::from_str(json)?)
    }

    /// JSON array representation
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.ranges)?)
    }

    /// Ranges
    pub fn ranges(&self) -> &[TimeRange] {
        &self.ranges
    }

    /// Number of ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether there is no range
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Check every range
    pub fn validate(&self) -> Result<()> {
        self.ranges.iter().try_for_each(TimeRange::validate)
    }

    /// Whether an instant is inside any range
    pub fn is_in_ranges<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.ranges.iter().any(|range| range.is_in_range(at))
    }
}
