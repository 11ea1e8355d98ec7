use super::utils::{load_members, party_bonuses, round_reward, MemberStats};
use super::*;
use crate::constants::{base_currency, base_experience};
use crate::content::StatBonus;
use crate::types::{DungeonHistory, DungeonParticipant, LootDrop, Party};

struct EarnedReward {
    experience: u64,
    currency: u64,
    crit: bool,
    group_finder_bonus: bool,
}

impl DungeonController {
    /// Pays out a completed run, then resets or dissolves the party.
    pub(super) fn complete_run(
        &mut self,
        party_id: PartyId,
        now_ms: u64,
        providers: &mut Providers<'_>,
    ) {
        let Some(party) = self.parties.party(party_id).cloned() else {
            return;
        };
        let Some(run) = party.run else {
            self.parties.reset_after_run(party_id);
            return;
        };
        let members = load_members(&party, &self.catalog, providers);
        let bonuses = party_bonuses(&members);
        let mut participants = Vec::new();

        for member in &members {
            let player_id = member.profile.id.clone();
            let reward = self.roll_reward(&party, member, &bonuses, now_ms, providers);
            providers.players.grant_currency(&player_id, reward.currency);
            providers.players.grant_experience(&player_id, reward.experience);

            let loot = self.roll_loot(run, member, bonuses.item_find, providers);
            let pet_id = self.roll_pet(&player_id, providers);
            if let Some(hunger) = providers.pets.consume_hunger(&player_id) {
                if hunger.starving {
                    self.events.push(DungeonEvent::PetHungry {
                        player_id: player_id.clone(),
                        name: hunger.name,
                        starving: true,
                    });
                }
            }

            participants.push(DungeonParticipant {
                player_id: player_id.clone(),
                wait_time_ms: party.queue_times.get(&player_id).copied().unwrap_or(0),
                experience: reward.experience as i64,
                currency: reward.currency as i64,
                item_id: loot.as_ref().map(|drop| drop.item_id),
                pet_id,
            });
            self.events.push(DungeonEvent::RunCompleted {
                player_id,
                experience: reward.experience,
                currency: reward.currency,
                loot,
                queue_group: party.is_queue_group,
                group_finder_bonus: reward.group_finder_bonus,
                crit_bonus: reward.crit,
            });
        }

        providers.history.record_run(DungeonHistory {
            party_id,
            resolved_at_ms: now_ms,
            is_queue_group: party.is_queue_group,
            success: true,
            run,
            participants,
        });
        emit_log(
            "info",
            "dungeon_completed",
            json!({
                "partyId": party_id,
                "run": run,
                "dungeon": self.catalog.run_name(run),
                "queueGroup": party.is_queue_group,
            }),
        );
        self.parties.reset_after_run(party_id);
    }

    /// Rolls deaths for a failed run, applies penalties, then resets or
    /// dissolves the party.
    pub(super) fn fail_run(&mut self, party_id: PartyId, now_ms: u64, providers: &mut Providers<'_>) {
        let Some(party) = self.parties.party(party_id).cloned() else {
            return;
        };
        let Some(run) = party.run else {
            self.parties.reset_after_run(party_id);
            return;
        };
        let members = load_members(&party, &self.catalog, providers);
        let bonuses = party_bonuses(&members);
        let party_death_chance = self.settings.death_chance - bonuses.death_prevention;
        let mut deceased = Vec::new();
        let mut participants = Vec::new();

        for member in &members {
            let player_id = member.profile.id.clone();
            let death_chance = party_death_chance - member.gear_bonus.death_prevention;
            let mut participant = DungeonParticipant {
                player_id: player_id.clone(),
                wait_time_ms: party.queue_times.get(&player_id).copied().unwrap_or(0),
                experience: 0,
                currency: 0,
                item_id: None,
                pet_id: None,
            };

            if self.rng.chance(death_chance) {
                let (experience_lost, currency_lost) = death_penalty(member, &bonuses, providers);
                providers.players.remove_experience(&player_id, experience_lost);
                providers.players.remove_currency(&player_id, currency_lost);
                participant.experience = -(experience_lost as i64);
                participant.currency = -(currency_lost as i64);
                self.events.push(DungeonEvent::PlayerDied {
                    player_id: player_id.clone(),
                    experience_lost,
                    currency_lost,
                });
                deceased.push(player_id);
            }
            participants.push(participant);
        }

        self.events.push(DungeonEvent::RunFailed {
            party_id,
            deceased: deceased.clone(),
        });
        providers.history.record_run(DungeonHistory {
            party_id,
            resolved_at_ms: now_ms,
            is_queue_group: party.is_queue_group,
            success: false,
            run,
            participants,
        });
        emit_log(
            "info",
            "dungeon_failed",
            json!({
                "partyId": party_id,
                "run": run,
                "dungeon": self.catalog.run_name(run),
                "deceased": deceased,
            }),
        );
        self.parties.reset_after_run(party_id);
    }

    fn roll_reward(
        &mut self,
        party: &Party,
        member: &MemberStats,
        bonuses: &StatBonus,
        now_ms: u64,
        providers: &mut Providers<'_>,
    ) -> EarnedReward {
        let level = member.profile.level;
        let mut experience = base_experience(level);
        let mut currency = base_currency(level);

        let crit = self.rng.chance(self.settings.crit_chance);
        if crit {
            experience *= 1.0 + self.settings.crit_bonus;
        }

        let mut group_finder_bonus = false;
        if party.is_queue_group
            && self
                .group_finder
                .get_lockout_time(&*providers.history, &member.profile.id, now_ms)
                == 0
        {
            experience *= self.settings.daily_bonus_multiplier;
            currency *= self.settings.daily_bonus_multiplier;
            self.group_finder
                .set_lockout(&mut *providers.history, &member.profile.id, now_ms);
            group_finder_bonus = true;
        }

        experience *= 1.0 + bonuses.xp_bonus;
        currency *= 1.0 + bonuses.currency_bonus;
        EarnedReward {
            experience: round_reward(experience),
            currency: round_reward(currency),
            crit,
            group_finder_bonus,
        }
    }

    /// One uniformly chosen candidate from the mode's loot table; it drops on
    /// `roll < drop chance + party item find`.
    fn roll_loot(
        &mut self,
        run: DungeonRun,
        member: &MemberStats,
        item_find: f64,
        providers: &mut Providers<'_>,
    ) -> Option<LootDrop> {
        let dungeon = self.catalog.dungeon(run.dungeon_id)?;
        let owned = providers.equipment.inventory(&member.profile.id);
        let candidates: Vec<(u32, f64, String)> = dungeon
            .loot_for_mode(run.mode_id)
            .filter_map(|entry| {
                let item = self.catalog.item(entry.item_id)?;
                if !member.item_types.contains(&item.item_type) || owned.contains(&item.id) {
                    return None;
                }
                Some((item.id, entry.drop_chance, item.name.clone()))
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let (item_id, drop_chance, name) = candidates[self.rng.pick_index(candidates.len())].clone();
        if !self.rng.chance(drop_chance + item_find) {
            return None;
        }
        providers
            .equipment
            .add_inventory_record(&member.profile.id, item_id);
        Some(LootDrop { item_id, name })
    }

    fn roll_pet(&mut self, player_id: &str, providers: &mut Providers<'_>) -> Option<u32> {
        let roll = self.rng.roll();
        let rarity = providers.pets.roll_rarity(roll)?;
        let pick = self.rng.roll();
        let grant = providers.pets.grant_pet(player_id, &rarity, pick)?;
        self.events.push(DungeonEvent::PetFound {
            player_id: player_id.to_string(),
            pet_id: grant.pet_id,
            name: grant.name,
            rarity: grant.rarity,
            duplicate: grant.duplicate,
        });
        Some(grant.pet_id)
    }
}

/// What a member would have earned on success (no crit, no daily bonus),
/// clamped so experience never drops below the current level's floor.
fn death_penalty(member: &MemberStats, bonuses: &StatBonus, providers: &Providers<'_>) -> (u64, u64) {
    let level = member.profile.level;
    let experience = round_reward(base_experience(level) * (1.0 + bonuses.xp_bonus));
    let currency = round_reward(base_currency(level) * (1.0 + bonuses.currency_bonus));
    let floor = providers.players.experience_floor(level);
    let spare_experience = member.profile.experience.saturating_sub(floor);
    (
        experience.min(spare_experience),
        currency.min(member.profile.currency),
    )
}
