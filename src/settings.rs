use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DAY_MS, DEFAULT_CRIT_BONUS, DEFAULT_CRIT_CHANCE, DEFAULT_DAILY_BONUS_MULTIPLIER,
    DEFAULT_DEATH_CHANCE, DEFAULT_DUNGEON_BASE_COST, DEFAULT_DUNGEON_LEVEL_COST,
    DEFAULT_MAX_LEVEL, DEFAULT_PARTY_SIZE, DEFAULT_STEP_TIME_MS, GROUP_FINDER_TIMER_NAME,
};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A recurring cooldown. With `base_ms` set the cooldown resets on fixed
/// boundaries `base_ms + k * length_ms`; without it the cooldown rolls from
/// the last use.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimerSettings {
    pub name: String,
    pub base_ms: Option<u64>,
    pub length_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            name: GROUP_FINDER_TIMER_NAME.to_string(),
            base_ms: None,
            length_ms: DAY_MS,
        }
    }
}

impl TimerSettings {
    /// Remaining cooldown for a timer last used at `last_used_ms`.
    pub fn remaining_ms(&self, last_used_ms: u64, now_ms: u64) -> u64 {
        if self.length_ms == 0 {
            return 0;
        }
        match self.base_ms {
            Some(base_ms) if now_ms >= base_ms => {
                let periods = (now_ms - base_ms) / self.length_ms;
                let last_reset = base_ms + periods * self.length_ms;
                if last_used_ms >= last_reset {
                    last_reset + self.length_ms - now_ms
                } else {
                    0
                }
            }
            Some(_) => 0,
            None => last_used_ms
                .saturating_add(self.length_ms)
                .saturating_sub(now_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DungeonSettings {
    pub party_size: usize,
    pub step_time_ms: u64,
    pub dungeon_base_cost: u64,
    pub dungeon_level_cost: u64,
    pub daily_bonus_multiplier: f64,
    pub crit_chance: f64,
    pub crit_bonus: f64,
    pub death_chance: f64,
    pub level_restrictions: bool,
    pub max_level: u32,
    pub group_finder_timer: TimerSettings,
}

impl Default for DungeonSettings {
    fn default() -> Self {
        Self {
            party_size: DEFAULT_PARTY_SIZE,
            step_time_ms: DEFAULT_STEP_TIME_MS,
            dungeon_base_cost: DEFAULT_DUNGEON_BASE_COST,
            dungeon_level_cost: DEFAULT_DUNGEON_LEVEL_COST,
            daily_bonus_multiplier: DEFAULT_DAILY_BONUS_MULTIPLIER,
            crit_chance: DEFAULT_CRIT_CHANCE,
            crit_bonus: DEFAULT_CRIT_BONUS,
            death_chance: DEFAULT_DEATH_CHANCE,
            level_restrictions: true,
            max_level: DEFAULT_MAX_LEVEL,
            group_finder_timer: TimerSettings::default(),
        }
    }
}

impl DungeonSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: DungeonSettings = serde_json::from_str(&text)?;
        Ok(settings.normalized())
    }

    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read_u64 = |key: &str| lookup(key).and_then(|raw| raw.trim().parse::<u64>().ok());
        let read_f64 = |key: &str| lookup(key).and_then(|raw| raw.trim().parse::<f64>().ok());

        if let Some(value) = read_u64("PARTY_SIZE") {
            self.party_size = value as usize;
        }
        if let Some(value) = read_u64("STEP_TIME_MS") {
            self.step_time_ms = value;
        }
        if let Some(value) = read_u64("DUNGEON_BASE_COST") {
            self.dungeon_base_cost = value;
        }
        if let Some(value) = read_u64("DUNGEON_LEVEL_COST") {
            self.dungeon_level_cost = value;
        }
        if let Some(value) = read_f64("CRIT_CHANCE") {
            self.crit_chance = value;
        }
        if let Some(value) = read_f64("CRIT_BONUS") {
            self.crit_bonus = value;
        }
        if let Some(value) = read_f64("DEATH_CHANCE") {
            self.death_chance = value;
        }
        if let Some(raw) = lookup("LEVEL_RESTRICTIONS") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => self.level_restrictions = true,
                "0" | "false" | "off" | "no" => self.level_restrictions = false,
                _ => {}
            }
        }
        self.normalized()
    }

    pub fn normalized(mut self) -> Self {
        self.party_size = self.party_size.clamp(1, 10);
        self.crit_chance = clamp_probability(self.crit_chance);
        self.death_chance = clamp_probability(self.death_chance);
        if !self.crit_bonus.is_finite() || self.crit_bonus < 0.0 {
            self.crit_bonus = 0.0;
        }
        if !self.daily_bonus_multiplier.is_finite() || self.daily_bonus_multiplier < 1.0 {
            self.daily_bonus_multiplier = 1.0;
        }
        self.max_level = self.max_level.max(1);
        self
    }
}

fn clamp_probability(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
