use std::collections::HashMap;
use std::fs;
use std::ops::Add;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DungeonRun;

const BUILTIN_CONTENT: &str = include_str!("../data/content.json");

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to read content file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse content: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid content: {0}")]
    Invalid(String),
}

/// Additive modifiers granted by a character class or a piece of gear.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatBonus {
    pub success_chance: f64,
    pub death_prevention: f64,
    pub item_find: f64,
    pub xp_bonus: f64,
    pub currency_bonus: f64,
}

impl Add for StatBonus {
    type Output = StatBonus;

    fn add(self, rhs: StatBonus) -> StatBonus {
        StatBonus {
            success_chance: self.success_chance + rhs.success_chance,
            death_prevention: self.death_prevention + rhs.death_prevention,
            item_find: self.item_find + rhs.item_find,
            xp_bonus: self.xp_bonus + rhs.xp_bonus,
            currency_bonus: self.currency_bonus + rhs.currency_bonus,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterClass {
    pub id: u32,
    pub name: String,
    #[serde(default = "default_true")]
    pub can_play: bool,
    #[serde(default)]
    pub bonus: StatBonus,
    /// Item types this class may equip and therefore receive as loot.
    #[serde(default)]
    pub item_types: Vec<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: u32,
    pub name: String,
    pub item_type: u32,
    #[serde(default)]
    pub bonus: StatBonus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DungeonMode {
    pub id: u32,
    pub name: String,
    pub flag: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelRange {
    pub mode_id: u32,
    pub min_level: u32,
    pub max_level: u32,
}

impl LevelRange {
    pub fn contains(&self, level: u32) -> bool {
        level >= self.min_level && level <= self.max_level
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterDifficulty {
    pub mode_id: u32,
    pub difficulty: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    pub enemy: String,
    pub setup_text: String,
    pub completion_text: String,
    pub difficulties: Vec<EncounterDifficulty>,
}

impl Encounter {
    pub fn difficulty(&self, mode_id: u32) -> f64 {
        self.difficulties
            .iter()
            .find(|entry| entry.mode_id == mode_id)
            .map(|entry| entry.difficulty)
            .unwrap_or(0.0)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootEntry {
    pub mode_id: u32,
    pub item_id: u32,
    pub drop_chance: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dungeon {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub introduction: String,
    pub failure_text: String,
    pub level_ranges: Vec<LevelRange>,
    pub encounters: Vec<Encounter>,
    #[serde(default)]
    pub loot: Vec<LootEntry>,
}

impl Dungeon {
    pub fn level_range(&self, mode_id: u32) -> Option<LevelRange> {
        self.level_ranges
            .iter()
            .find(|range| range.mode_id == mode_id)
            .copied()
    }

    pub fn loot_for_mode(&self, mode_id: u32) -> impl Iterator<Item = &LootEntry> {
        self.loot.iter().filter(move |entry| entry.mode_id == mode_id)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentFile {
    modes: Vec<DungeonMode>,
    dungeons: Vec<Dungeon>,
    classes: Vec<CharacterClass>,
    #[serde(default)]
    items: Vec<Item>,
}

/// Read-only dungeon content: what the engine consumes, already loaded.
#[derive(Clone, Debug, Default)]
pub struct ContentCatalog {
    modes: Vec<DungeonMode>,
    dungeons: Vec<Dungeon>,
    classes: HashMap<u32, CharacterClass>,
    items: HashMap<u32, Item>,
}

impl ContentCatalog {
    pub fn builtin() -> Result<Self, ContentError> {
        Self::from_json_str(BUILTIN_CONTENT)
    }

    pub fn load(path: &Path) -> Result<Self, ContentError> {
        let text = fs::read_to_string(path).map_err(|source| ContentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ContentError> {
        let file: ContentFile = serde_json::from_str(text)?;
        Self::from_parts(file.modes, file.dungeons, file.classes, file.items)
    }

    pub fn from_parts(
        modes: Vec<DungeonMode>,
        dungeons: Vec<Dungeon>,
        classes: Vec<CharacterClass>,
        items: Vec<Item>,
    ) -> Result<Self, ContentError> {
        let catalog = Self {
            modes,
            dungeons,
            classes: classes.into_iter().map(|class| (class.id, class)).collect(),
            items: items.into_iter().map(|item| (item.id, item)).collect(),
        };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), ContentError> {
        for dungeon in &self.dungeons {
            if dungeon.encounters.is_empty() {
                return Err(ContentError::Invalid(format!(
                    "dungeon {} has no encounters",
                    dungeon.id
                )));
            }
            for range in &dungeon.level_ranges {
                if self.mode(range.mode_id).is_none() {
                    return Err(ContentError::Invalid(format!(
                        "dungeon {} references unknown mode {}",
                        dungeon.id, range.mode_id
                    )));
                }
                if range.min_level > range.max_level {
                    return Err(ContentError::Invalid(format!(
                        "dungeon {} mode {} has an empty level range",
                        dungeon.id, range.mode_id
                    )));
                }
            }
            for entry in &dungeon.loot {
                if !self.items.contains_key(&entry.item_id) {
                    return Err(ContentError::Invalid(format!(
                        "dungeon {} loot references unknown item {}",
                        dungeon.id, entry.item_id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn modes(&self) -> &[DungeonMode] {
        &self.modes
    }

    pub fn mode(&self, mode_id: u32) -> Option<&DungeonMode> {
        self.modes.iter().find(|mode| mode.id == mode_id)
    }

    pub fn default_mode(&self) -> Option<&DungeonMode> {
        self.modes
            .iter()
            .find(|mode| mode.is_default)
            .or_else(|| self.modes.first())
    }

    pub fn mode_by_flag(&self, flag: &str) -> Option<&DungeonMode> {
        let flag = flag.trim();
        self.modes
            .iter()
            .find(|mode| mode.flag.eq_ignore_ascii_case(flag))
    }

    pub fn dungeons(&self) -> &[Dungeon] {
        &self.dungeons
    }

    pub fn dungeon(&self, dungeon_id: u32) -> Option<&Dungeon> {
        self.dungeons.iter().find(|dungeon| dungeon.id == dungeon_id)
    }

    pub fn class(&self, class_id: u32) -> Option<&CharacterClass> {
        self.classes.get(&class_id)
    }

    pub fn item(&self, item_id: u32) -> Option<&Item> {
        self.items.get(&item_id)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Every (dungeon, mode) pair that has a level range configured.
    pub fn runs(&self) -> Vec<DungeonRun> {
        self.dungeons
            .iter()
            .flat_map(|dungeon| {
                dungeon
                    .level_ranges
                    .iter()
                    .map(move |range| DungeonRun::new(dungeon.id, range.mode_id))
            })
            .collect()
    }

    pub fn level_range(&self, run: DungeonRun) -> Option<LevelRange> {
        self.dungeon(run.dungeon_id)?.level_range(run.mode_id)
    }

    pub fn run_name(&self, run: DungeonRun) -> String {
        let dungeon = self
            .dungeon(run.dungeon_id)
            .map(|dungeon| dungeon.name.as_str())
            .unwrap_or("Unknown Dungeon");
        match self.mode(run.mode_id) {
            Some(mode) if !mode.is_default => format!("{dungeon} [{}]", mode.name),
            _ => dungeon.to_string(),
        }
    }

    /// Resolves a run from a dungeon id and an optional mode flag, falling back
    /// to the default mode.
    pub fn resolve_run(&self, dungeon_id: u32, mode_flag: Option<&str>) -> Option<DungeonRun> {
        let dungeon = self.dungeon(dungeon_id)?;
        let mode = match mode_flag {
            Some(flag) => self.mode_by_flag(flag)?,
            None => self.default_mode()?,
        };
        dungeon.level_range(mode.id)?;
        Some(DungeonRun::new(dungeon.id, mode.id))
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_content_loads_and_validates() {
        let catalog = ContentCatalog::builtin().expect("builtin content is valid");
        assert!(!catalog.dungeons().is_empty());
        assert!(catalog.default_mode().is_some());
        assert!(!catalog.runs().is_empty());
        for run in catalog.runs() {
            assert!(catalog.level_range(run).is_some());
        }
    }

    #[test]
    fn resolve_run_uses_default_mode_without_flag() {
        let catalog = ContentCatalog::builtin().expect("builtin content is valid");
        let dungeon_id = catalog.dungeons()[0].id;
        let default_mode = catalog.default_mode().expect("default mode").id;
        let run = catalog.resolve_run(dungeon_id, None).expect("run");
        assert_eq!(run, DungeonRun::new(dungeon_id, default_mode));
        assert!(catalog.resolve_run(dungeon_id, Some("no-such-flag")).is_none());
        assert!(catalog.resolve_run(9_999, None).is_none());
    }

    #[test]
    fn dungeon_without_encounters_is_rejected() {
        let raw = r#"{
  "modes": [{ "id": 1, "name": "Normal", "flag": "n", "isDefault": true }],
  "dungeons": [{
    "id": 1,
    "name": "Empty Crypt",
    "introduction": "...",
    "failureText": "...",
    "levelRanges": [{ "modeId": 1, "minLevel": 1, "maxLevel": 5 }],
    "encounters": []
  }],
  "classes": []
}"#;
        let error = ContentCatalog::from_json_str(raw).expect_err("must reject");
        assert!(matches!(error, ContentError::Invalid(_)));
    }

    #[test]
    fn loot_referencing_unknown_item_is_rejected() {
        let raw = r#"{
  "modes": [{ "id": 1, "name": "Normal", "flag": "n", "isDefault": true }],
  "dungeons": [{
    "id": 1,
    "name": "Crypt",
    "introduction": "...",
    "failureText": "...",
    "levelRanges": [{ "modeId": 1, "minLevel": 1, "maxLevel": 5 }],
    "encounters": [{ "enemy": "Rat", "setupText": "a", "completionText": "b",
      "difficulties": [{ "modeId": 1, "difficulty": 0.5 }] }],
    "loot": [{ "modeId": 1, "itemId": 77, "dropChance": 0.5 }]
  }],
  "classes": []
}"#;
        assert!(matches!(
            ContentCatalog::from_json_str(raw),
            Err(ContentError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let path = std::env::temp_dir().join("dungeon-party-missing-content.json");
        assert!(matches!(
            ContentCatalog::load(&path),
            Err(ContentError::Io { .. })
        ));
    }

    #[test]
    fn stat_bonus_adds_field_by_field() {
        let a = StatBonus {
            success_chance: 0.1,
            xp_bonus: 0.2,
            ..StatBonus::default()
        };
        let b = StatBonus {
            success_chance: 0.3,
            currency_bonus: 0.5,
            ..StatBonus::default()
        };
        let sum = a + b;
        assert!((sum.success_chance - 0.4).abs() < 1e-9);
        assert!((sum.xp_bonus - 0.2).abs() < 1e-9);
        assert!((sum.currency_bonus - 0.5).abs() < 1e-9);
        assert_eq!(sum.death_prevention, 0.0);
    }
}
