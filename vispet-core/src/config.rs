//! Configuration for the VisPet companion system.
//!
//! Maps directly to `vispet.toml`. Every section and field has a default,
//! so an empty file is a valid configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VisPetError};
use crate::types::Position;

/// Top-level VisPet configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(Default)]
pub struct VisPetConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Where per-owner files live.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Spawn/despawn/migration tuning.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Trial grant settings.
    #[serde(default)]
    pub trial: TrialConfig,
}

impl VisPetConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `VisPetError::Config` if the TOML is invalid or fails
    /// [`VisPetConfig::validate`].
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| VisPetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject values the lifecycle cannot run with.
    ///
    /// # Errors
    /// Returns `VisPetError::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.lifecycle.companion_inventory_capacity == 0 {
            return Err(VisPetError::Config(
                "lifecycle.companion_inventory_capacity must be at least 1".to_string(),
            ));
        }
        if self.trial.tick_interval_ms == 0 {
            return Err(VisPetError::Config(
                "trial.tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.trial.duration_ms <= 0 {
            return Err(VisPetError::Config(
                "trial.duration_ms must be positive".to_string(),
            ));
        }
        if self.trial.item_id.is_empty() {
            return Err(VisPetError::Config("trial.item_id must not be empty".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the companion system is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

/// Persistence directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding `<owner>.csv` companion inventories.
    #[serde(default = "default_inventory_dir")]
    pub inventory_dir: PathBuf,
    /// Directory holding `<owner>.properties` trial records.
    #[serde(default = "default_trial_dir")]
    pub trial_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            inventory_dir: default_inventory_dir(),
            trial_dir: default_trial_dir(),
        }
    }
}

/// Spawn, despawn and migration tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Hotbar slots given to every spawned companion.
    #[serde(default = "default_54")]
    pub companion_inventory_capacity: u16,
    /// Ticks after a world migration during which the item-lost check is
    /// suppressed.
    #[serde(default = "default_100")]
    pub world_change_grace_ticks: u32,
    /// Duration of the "active" marker effect attached to the owner.
    #[serde(default = "default_active_effect_secs")]
    pub active_effect_duration_secs: f32,
    /// Companions farther than this from their owner are teleported back.
    #[serde(default = "default_teleport_distance")]
    pub teleport_distance: f64,
    /// Spawn position used by a migration when the owner has no transform.
    #[serde(default = "default_fallback_position")]
    pub migration_fallback_position: Position,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            companion_inventory_capacity: 54,
            world_change_grace_ticks: 100,
            active_effect_duration_secs: 999_999.0,
            teleport_distance: 15.0,
            migration_fallback_position: default_fallback_position(),
        }
    }
}

/// Trial grant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Item ID of the time-limited summon item.
    #[serde(default = "default_trial_item")]
    pub item_id: String,
    /// Active-time budget of a fresh grant, in milliseconds.
    #[serde(default = "default_trial_duration")]
    pub duration_ms: i64,
    /// Period of the expiry check.
    #[serde(default = "default_1000")]
    pub tick_interval_ms: u64,
    /// Grant the trial item to every player on first login.
    #[serde(default = "default_true")]
    pub grant_on_first_login: bool,
    /// Message shown on grant. `{time}` is replaced with the budget.
    #[serde(default = "default_grant_message")]
    pub grant_message: String,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            item_id: default_trial_item(),
            duration_ms: default_trial_duration(),
            tick_interval_ms: 1000,
            grant_on_first_login: true,
            grant_message: default_grant_message(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

/// Three days.
pub const DEFAULT_TRIAL_DURATION_MS: i64 = 3 * 24 * 60 * 60 * 1000;

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_inventory_dir() -> PathBuf { PathBuf::from("data").join("vispet") }
fn default_trial_dir() -> PathBuf { PathBuf::from("data").join("freepet") }
fn default_trial_item() -> String { "Loot_Fox_Free".to_string() }
fn default_trial_duration() -> i64 { DEFAULT_TRIAL_DURATION_MS }
fn default_grant_message() -> String { "Here's a free Fox companion for {time}!".to_string() }
fn default_fallback_position() -> Position { Position::new(0.0, 100.0, 0.0) }
fn default_active_effect_secs() -> f32 { 999_999.0 }
fn default_teleport_distance() -> f64 { 15.0 }
fn default_54() -> u16 { 54 }
fn default_100() -> u32 { 100 }
fn default_1000() -> u64 { 1000 }
