use std::collections::HashMap;

use crate::content::{ContentCatalog, StatBonus};
use crate::providers::{
    EquipmentProvider, HistoryStore, PetGrant, PetHunger, PetProvider, PetRarity, PlayerProfile,
    PlayerProvider, Providers,
};
use crate::types::{DungeonHistory, Lockout};

const PET_MAX_HUNGER: u32 = 100;

pub fn experience_for_level(level: u32) -> u64 {
    let steps = level.saturating_sub(1) as u64;
    steps * steps * 20
}

pub struct MemoryPlayers {
    max_level: u32,
    players: HashMap<String, PlayerProfile>,
}

impl MemoryPlayers {
    pub fn new(max_level: u32) -> Self {
        Self {
            max_level: max_level.max(1),
            players: HashMap::new(),
        }
    }

    pub fn add_player(&mut self, id: &str, name: &str, level: u32, class_id: u32, currency: u64) {
        let level = level.clamp(1, self.max_level);
        self.players.insert(
            id.to_string(),
            PlayerProfile {
                id: id.to_string(),
                name: name.to_string(),
                level,
                experience: experience_for_level(level),
                currency,
                class_id,
            },
        );
    }
}

impl PlayerProvider for MemoryPlayers {
    fn player(&self, player_id: &str) -> Option<PlayerProfile> {
        self.players.get(player_id).cloned()
    }

    fn experience_floor(&self, level: u32) -> u64 {
        experience_for_level(level)
    }

    fn grant_experience(&mut self, player_id: &str, amount: u64) {
        let max_level = self.max_level;
        if let Some(player) = self.players.get_mut(player_id) {
            player.experience = player.experience.saturating_add(amount);
            while player.level < max_level
                && player.experience >= experience_for_level(player.level + 1)
            {
                player.level += 1;
            }
        }
    }

    fn remove_experience(&mut self, player_id: &str, amount: u64) {
        if let Some(player) = self.players.get_mut(player_id) {
            player.experience = player.experience.saturating_sub(amount);
        }
    }

    fn grant_currency(&mut self, player_id: &str, amount: u64) {
        if let Some(player) = self.players.get_mut(player_id) {
            player.currency = player.currency.saturating_add(amount);
        }
    }

    fn remove_currency(&mut self, player_id: &str, amount: u64) {
        if let Some(player) = self.players.get_mut(player_id) {
            player.currency = player.currency.saturating_sub(amount);
        }
    }
}

#[derive(Default)]
pub struct MemoryEquipment {
    item_bonuses: HashMap<u32, StatBonus>,
    inventory: HashMap<String, Vec<u32>>,
    equipped: HashMap<String, Vec<u32>>,
}

impl MemoryEquipment {
    pub fn from_catalog(catalog: &ContentCatalog) -> Self {
        Self {
            item_bonuses: catalog
                .items()
                .map(|item| (item.id, item.bonus))
                .collect(),
            ..Self::default()
        }
    }

    pub fn equip(&mut self, player_id: &str, item_id: u32) {
        self.add_inventory_record(player_id, item_id);
        let equipped = self.equipped.entry(player_id.to_string()).or_default();
        if !equipped.contains(&item_id) {
            equipped.push(item_id);
        }
    }
}

impl EquipmentProvider for MemoryEquipment {
    fn equipped_bonuses(&self, player_id: &str) -> Vec<StatBonus> {
        self.equipped
            .get(player_id)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item_id| self.item_bonuses.get(item_id).copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn inventory(&self, player_id: &str) -> Vec<u32> {
        self.inventory.get(player_id).cloned().unwrap_or_default()
    }

    fn add_inventory_record(&mut self, player_id: &str, item_id: u32) {
        let items = self.inventory.entry(player_id.to_string()).or_default();
        if !items.contains(&item_id) {
            items.push(item_id);
        }
    }
}

#[derive(Clone, Debug)]
pub struct PetSpecies {
    pub id: u32,
    pub name: String,
    pub rarity_id: u32,
}

#[derive(Clone, Debug)]
struct ActivePet {
    pet_id: u32,
    hunger: u32,
}

#[derive(Default)]
pub struct MemoryPets {
    /// Rarest first.
    rarities: Vec<PetRarity>,
    species: Vec<PetSpecies>,
    owned: HashMap<String, Vec<u32>>,
    active: HashMap<String, ActivePet>,
}

impl MemoryPets {
    pub fn new(mut rarities: Vec<PetRarity>, species: Vec<PetSpecies>) -> Self {
        rarities.sort_by(|a, b| a.drop_chance.total_cmp(&b.drop_chance));
        Self {
            rarities,
            species,
            ..Self::default()
        }
    }

    pub fn with_defaults() -> Self {
        let rarity = |id: u32, name: &str, drop_chance: f64| PetRarity {
            id,
            name: name.to_string(),
            drop_chance,
        };
        let species = |id: u32, name: &str, rarity_id: u32| PetSpecies {
            id,
            name: name.to_string(),
            rarity_id,
        };
        Self::new(
            vec![
                rarity(1, "Common", 0.05),
                rarity(2, "Rare", 0.01),
                rarity(3, "Legendary", 0.002),
            ],
            vec![
                species(1, "Mud Toad", 1),
                species(2, "Cave Bat", 1),
                species(3, "Ember Fox", 2),
                species(4, "Tide Serpent", 2),
                species(5, "Ash Phoenix", 3),
            ],
        )
    }

    pub fn owned(&self, player_id: &str) -> Vec<u32> {
        self.owned.get(player_id).cloned().unwrap_or_default()
    }

    pub fn hunger(&self, player_id: &str) -> Option<u32> {
        self.active.get(player_id).map(|pet| pet.hunger)
    }
}

impl PetProvider for MemoryPets {
    fn roll_rarity(&self, roll: f64) -> Option<PetRarity> {
        self.rarities
            .iter()
            .find(|rarity| roll < rarity.drop_chance)
            .cloned()
    }

    fn grant_pet(&mut self, player_id: &str, rarity: &PetRarity, pick: f64) -> Option<PetGrant> {
        let candidates: Vec<&PetSpecies> = self
            .species
            .iter()
            .filter(|species| species.rarity_id == rarity.id)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let index = ((pick * candidates.len() as f64).floor() as usize).min(candidates.len() - 1);
        let species = candidates[index];
        let owned = self.owned.entry(player_id.to_string()).or_default();
        let duplicate = owned.contains(&species.id);
        if !duplicate {
            owned.push(species.id);
        }
        self.active
            .entry(player_id.to_string())
            .or_insert(ActivePet {
                pet_id: species.id,
                hunger: PET_MAX_HUNGER,
            });
        Some(PetGrant {
            pet_id: species.id,
            name: species.name.clone(),
            rarity: rarity.name.clone(),
            duplicate,
        })
    }

    fn consume_hunger(&mut self, player_id: &str) -> Option<PetHunger> {
        let active = self.active.get_mut(player_id)?;
        active.hunger = active.hunger.saturating_sub(1);
        let name = self
            .species
            .iter()
            .find(|species| species.id == active.pet_id)
            .map(|species| species.name.clone())
            .unwrap_or_default();
        Some(PetHunger {
            name,
            starving: active.hunger == 0,
        })
    }
}

#[derive(Default)]
pub struct MemoryHistory {
    pub runs: Vec<DungeonHistory>,
    lockouts: HashMap<(String, String), Lockout>,
}

impl HistoryStore for MemoryHistory {
    fn record_run(&mut self, history: DungeonHistory) {
        self.runs.push(history);
    }

    fn lockout(&self, player_id: &str, timer: &str) -> Option<Lockout> {
        self.lockouts
            .get(&(player_id.to_string(), timer.to_string()))
            .cloned()
    }

    fn save_lockout(&mut self, lockout: Lockout) {
        self.lockouts.insert(
            (lockout.player_id.clone(), lockout.timer.clone()),
            lockout,
        );
    }
}

/// In-memory collaborators bundled together, for hosts without a database.
pub struct MemoryWorld {
    pub players: MemoryPlayers,
    pub equipment: MemoryEquipment,
    pub pets: MemoryPets,
    pub history: MemoryHistory,
}

impl MemoryWorld {
    pub fn new(catalog: &ContentCatalog, max_level: u32) -> Self {
        Self {
            players: MemoryPlayers::new(max_level),
            equipment: MemoryEquipment::from_catalog(catalog),
            pets: MemoryPets::with_defaults(),
            history: MemoryHistory::default(),
        }
    }

    pub fn providers(&mut self) -> Providers<'_> {
        Providers {
            players: &mut self.players,
            equipment: &mut self.equipment,
            pets: &mut self.pets,
            history: &mut self.history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granting_experience_levels_up_across_thresholds() {
        let mut players = MemoryPlayers::new(20);
        players.add_player("p1", "Alice", 2, 1, 0);
        let floor_three = experience_for_level(3);
        let start = players.player("p1").expect("player").experience;
        players.grant_experience("p1", floor_three - start);
        let player = players.player("p1").expect("player");
        assert_eq!(player.level, 3);
        assert_eq!(player.experience, floor_three);
    }

    #[test]
    fn level_is_capped_at_max_level() {
        let mut players = MemoryPlayers::new(5);
        players.add_player("p1", "Alice", 5, 1, 0);
        players.grant_experience("p1", 1_000_000);
        assert_eq!(players.player("p1").expect("player").level, 5);
    }

    #[test]
    fn currency_removal_saturates() {
        let mut players = MemoryPlayers::new(20);
        players.add_player("p1", "Alice", 1, 1, 10);
        players.remove_currency("p1", 50);
        assert_eq!(players.player("p1").expect("player").currency, 0);
    }

    #[test]
    fn pet_rarity_prefers_rarest_matching_tier() {
        let pets = MemoryPets::with_defaults();
        assert_eq!(pets.roll_rarity(0.001).expect("legendary").name, "Legendary");
        assert_eq!(pets.roll_rarity(0.005).expect("rare").name, "Rare");
        assert_eq!(pets.roll_rarity(0.03).expect("common").name, "Common");
        assert!(pets.roll_rarity(0.5).is_none());
    }

    #[test]
    fn second_grant_of_same_pet_is_duplicate_and_hunger_drains() {
        let mut pets = MemoryPets::with_defaults();
        let common = pets.roll_rarity(0.03).expect("common");
        let first = pets.grant_pet("p1", &common, 0.0).expect("grant");
        let second = pets.grant_pet("p1", &common, 0.0).expect("grant");
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(pets.owned("p1"), vec![first.pet_id]);

        let hunger = pets.consume_hunger("p1").expect("active pet");
        assert_eq!(hunger.name, first.name);
        assert!(!hunger.starving);
        assert_eq!(pets.hunger("p1"), Some(PET_MAX_HUNGER - 1));
        assert!(pets.consume_hunger("nobody").is_none());
    }

    #[test]
    fn equipment_reports_bonuses_of_equipped_items_only() {
        let catalog = ContentCatalog::builtin().expect("builtin content");
        let mut equipment = MemoryEquipment::from_catalog(&catalog);
        equipment.equip("p1", 1);
        equipment.add_inventory_record("p1", 2);
        assert_eq!(equipment.equipped_bonuses("p1").len(), 1);
        assert_eq!(equipment.inventory("p1"), vec![1, 2]);
    }
}
