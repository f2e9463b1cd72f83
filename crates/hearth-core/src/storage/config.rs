//! TOML-based engine configuration.
//!
//! Stores reward policy and timing knobs:
//! - Level-up, streak-milestone and referral reward amounts
//! - Streak milestones and multiplier curve
//! - Safety check-in grace period
//!
//! Configuration is stored at `<data_dir>/config.toml`.

use std::path::{Path, PathBuf};

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;

/// Reward amounts. Referral amounts are copied onto each referral when it is
/// created, so changing them never affects outstanding invitations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Pi paid per level number on each level-up (level 4 pays 4x this).
    #[serde(default = "default_level_up_bonus")]
    pub level_up_bonus_per_level: Decimal,
    #[serde(default = "default_streak_milestone_bonus")]
    pub streak_milestone_bonus: Decimal,
    #[serde(default = "default_referrer_reward")]
    pub referrer_reward: Decimal,
    #[serde(default = "default_referred_reward")]
    pub referred_reward: Decimal,
    #[serde(default = "default_referrer_xp")]
    pub referrer_xp: u64,
}

/// Streak tracking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreaksConfig {
    /// Streak length that pays the milestone bonus.
    #[serde(default = "default_milestone_days")]
    pub milestone_days: u32,
    /// Streak length that awards the streak-master badge.
    #[serde(default = "default_master_badge_days")]
    pub master_badge_days: u32,
    #[serde(default = "default_multiplier_step")]
    pub multiplier_step: f64,
    #[serde(default = "default_multiplier_cap")]
    pub multiplier_cap: f64,
    /// Offset from UTC used to decide which calendar day an activity falls on.
    #[serde(default)]
    pub utc_offset_hours: i32,
}

/// Safety check-in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Time after the scheduled check-in before escalation.
    #[serde(default = "default_grace_period_minutes")]
    pub grace_period_minutes: u32,
    #[serde(default = "default_true")]
    pub notify_authorities: bool,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub streaks: StreaksConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

fn default_level_up_bonus() -> Decimal {
    Decimal::ONE
}
fn default_streak_milestone_bonus() -> Decimal {
    Decimal::from(5)
}
fn default_referrer_reward() -> Decimal {
    Decimal::from(10)
}
fn default_referred_reward() -> Decimal {
    Decimal::from(5)
}
fn default_referrer_xp() -> u64 {
    100
}
fn default_milestone_days() -> u32 {
    7
}
fn default_master_badge_days() -> u32 {
    30
}
fn default_multiplier_step() -> f64 {
    0.05
}
fn default_multiplier_cap() -> f64 {
    2.0
}
fn default_grace_period_minutes() -> u32 {
    120
}
fn default_true() -> bool {
    true
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            level_up_bonus_per_level: default_level_up_bonus(),
            streak_milestone_bonus: default_streak_milestone_bonus(),
            referrer_reward: default_referrer_reward(),
            referred_reward: default_referred_reward(),
            referrer_xp: default_referrer_xp(),
        }
    }
}

impl Default for StreaksConfig {
    fn default() -> Self {
        Self {
            milestone_days: default_milestone_days(),
            master_badge_days: default_master_badge_days(),
            multiplier_step: default_multiplier_step(),
            multiplier_cap: default_multiplier_cap(),
            utc_offset_hours: 0,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            grace_period_minutes: default_grace_period_minutes(),
            notify_authorities: true,
        }
    }
}

impl SafetyConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::minutes(i64::from(self.grace_period_minutes))
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default config location.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without persisting.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit the field.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
