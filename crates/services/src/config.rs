//! Runtime configuration for the tutor services.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use tutor_core::model::DEFAULT_RECENT_QUIZ_LIMIT;

use crate::error::ConfigError;

pub const ENV_RECENT_QUIZ_LIMIT: &str = "TUTOR_RECENT_QUIZ_LIMIT";
pub const ENV_UTC_OFFSET_MINUTES: &str = "TUTOR_UTC_OFFSET_MINUTES";
pub const ENV_STREAK_POLICY: &str = "TUTOR_STREAK_POLICY";
pub const ENV_MAX_WRITE_ATTEMPTS: &str = "TUTOR_MAX_WRITE_ATTEMPTS";

/// Default number of read-modify-write attempts before a conflict surfaces.
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 8;

/// Which activity advances the study streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreakPolicy {
    /// Viewing the dashboard counts as a study day.
    #[default]
    DashboardView,
    /// Only answering questions counts; the dashboard is read-only.
    StudyActivity,
}

impl fmt::Display for StreakPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DashboardView => "dashboard",
            Self::StudyActivity => "activity",
        })
    }
}

impl FromStr for StreakPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dashboard" | "dashboard-view" => Ok(Self::DashboardView),
            "activity" | "study-activity" => Ok(Self::StudyActivity),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_STREAK_POLICY,
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TutorConfig {
    /// How many completed quizzes the dashboard lists.
    pub recent_quiz_limit: u32,
    /// Offset used to cut timestamps into calendar days for the streak.
    pub utc_offset: FixedOffset,
    pub streak_policy: StreakPolicy,
    pub max_write_attempts: u32,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            recent_quiz_limit: DEFAULT_RECENT_QUIZ_LIMIT,
            utc_offset: Utc.fix(),
            streak_policy: StreakPolicy::default(),
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }
}

impl TutorConfig {
    /// Read overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unset keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_RECENT_QUIZ_LIMIT) {
            config.recent_quiz_limit = parse_positive(ENV_RECENT_QUIZ_LIMIT, &value)?;
        }
        if let Some(value) = lookup(ENV_UTC_OFFSET_MINUTES) {
            config.utc_offset = parse_offset_minutes(&value)?;
        }
        if let Some(value) = lookup(ENV_STREAK_POLICY) {
            config.streak_policy = value.parse()?;
        }
        if let Some(value) = lookup(ENV_MAX_WRITE_ATTEMPTS) {
            config.max_write_attempts = parse_positive(ENV_MAX_WRITE_ATTEMPTS, &value)?;
        }

        Ok(config)
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
        })
}

/// Parses a signed offset in minutes east of UTC, e.g. `-300` or `330`.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` outside ±24 hours.
pub fn parse_offset_minutes(value: &str) -> Result<FixedOffset, ConfigError> {
    value
        .trim()
        .parse::<i32>()
        .ok()
        .and_then(|minutes| minutes.checked_mul(60))
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: ENV_UTC_OFFSET_MINUTES,
            value: value.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = TutorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, TutorConfig::default());
        assert_eq!(config.recent_quiz_limit, 5);
        assert_eq!(config.streak_policy, StreakPolicy::DashboardView);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = TutorConfig::from_lookup(lookup(&[
            (ENV_RECENT_QUIZ_LIMIT, "10"),
            (ENV_UTC_OFFSET_MINUTES, "-300"),
            (ENV_STREAK_POLICY, "activity"),
            (ENV_MAX_WRITE_ATTEMPTS, "3"),
        ]))
        .unwrap();
        assert_eq!(config.recent_quiz_limit, 10);
        assert_eq!(config.utc_offset.local_minus_utc(), -300 * 60);
        assert_eq!(config.streak_policy, StreakPolicy::StudyActivity);
        assert_eq!(config.max_write_attempts, 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(TutorConfig::from_lookup(lookup(&[(ENV_RECENT_QUIZ_LIMIT, "0")])).is_err());
        assert!(TutorConfig::from_lookup(lookup(&[(ENV_UTC_OFFSET_MINUTES, "2000")])).is_err());
        assert!(TutorConfig::from_lookup(lookup(&[(ENV_STREAK_POLICY, "never")])).is_err());
        assert!(TutorConfig::from_lookup(lookup(&[(ENV_MAX_WRITE_ATTEMPTS, "x")])).is_err());
    }
}
