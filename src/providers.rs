//! Collaborators the engine calls out to. Everything behind these traits
//! (player records, inventories, pets, run history) is owned elsewhere; the
//! engine only borrows it for the duration of a call through [`Providers`].

use serde::{Deserialize, Serialize};

use crate::content::StatBonus;
use crate::types::{DungeonHistory, Lockout};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: String,
    pub name: String,
    pub level: u32,
    pub experience: u64,
    pub currency: u64,
    #[serde(rename = "classId")]
    pub class_id: u32,
}

pub trait PlayerProvider {
    fn player(&self, player_id: &str) -> Option<PlayerProfile>;

    /// Total experience required to reach `level`.
    fn experience_floor(&self, level: u32) -> u64;

    /// Adds experience, levelling the player up as thresholds are crossed.
    fn grant_experience(&mut self, player_id: &str, amount: u64);

    fn remove_experience(&mut self, player_id: &str, amount: u64);

    fn grant_currency(&mut self, player_id: &str, amount: u64);

    fn remove_currency(&mut self, player_id: &str, amount: u64);
}

pub trait EquipmentProvider {
    /// Stat bonuses of every item the player currently has equipped.
    fn equipped_bonuses(&self, player_id: &str) -> Vec<StatBonus>;

    /// Item ids the player owns, equipped or not.
    fn inventory(&self, player_id: &str) -> Vec<u32>;

    fn add_inventory_record(&mut self, player_id: &str, item_id: u32);
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PetRarity {
    pub id: u32,
    pub name: String,
    #[serde(rename = "dropChance")]
    pub drop_chance: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PetGrant {
    pub pet_id: u32,
    pub name: String,
    pub rarity: String,
    pub duplicate: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PetHunger {
    pub name: String,
    pub starving: bool,
}

pub trait PetProvider {
    /// Maps a uniform roll to the rarity it lands in, if any.
    fn roll_rarity(&self, roll: f64) -> Option<PetRarity>;

    /// Grants a pet of the given rarity; `pick` selects among candidates.
    fn grant_pet(&mut self, player_id: &str, rarity: &PetRarity, pick: f64) -> Option<PetGrant>;

    /// Spends one hunger point of the player's active pet.
    fn consume_hunger(&mut self, player_id: &str) -> Option<PetHunger>;
}

pub trait HistoryStore {
    fn record_run(&mut self, history: DungeonHistory);

    fn lockout(&self, player_id: &str, timer: &str) -> Option<Lockout>;

    fn save_lockout(&mut self, lockout: Lockout);
}

pub struct Providers<'a> {
    pub players: &'a mut dyn PlayerProvider,
    pub equipment: &'a mut dyn EquipmentProvider,
    pub pets: &'a mut dyn PetProvider,
    pub history: &'a mut dyn HistoryStore,
}
