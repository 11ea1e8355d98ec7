use std::collections::HashMap;

use crate::constants::level_coefficient;
use crate::content::{ContentCatalog, StatBonus};
use crate::providers::{PlayerProfile, Providers};
use crate::types::Party;

#[derive(Clone, Debug)]
pub(super) struct MemberStats {
    pub profile: PlayerProfile,
    pub class_bonus: StatBonus,
    pub gear_bonus: StatBonus,
    pub item_types: Vec<u32>,
}

impl MemberStats {
    pub fn total(&self) -> StatBonus {
        self.class_bonus + self.gear_bonus
    }
}

/// Resolves every member of `party` that the player provider still knows.
pub(super) fn load_members(
    party: &Party,
    catalog: &ContentCatalog,
    providers: &Providers<'_>,
) -> Vec<MemberStats> {
    party
        .members
        .iter()
        .filter_map(|member| {
            let profile = providers.players.player(member)?;
            let class = catalog.class(profile.class_id);
            let gear_bonus = providers
                .equipment
                .equipped_bonuses(member)
                .into_iter()
                .fold(StatBonus::default(), |sum, bonus| sum + bonus);
            Some(MemberStats {
                class_bonus: class.map(|class| class.bonus).unwrap_or_default(),
                item_types: class.map(|class| class.item_types.clone()).unwrap_or_default(),
                gear_bonus,
                profile,
            })
        })
        .collect()
}

/// Sums a per-member value, dividing each contribution by how many members
/// share that member's class.
pub(super) fn normalized_sum<F>(members: &[MemberStats], value: F) -> f64
where
    F: Fn(&MemberStats) -> f64,
{
    let mut class_counts: HashMap<u32, usize> = HashMap::new();
    for member in members {
        *class_counts.entry(member.profile.class_id).or_insert(0) += 1;
    }
    members
        .iter()
        .map(|member| {
            let count = class_counts
                .get(&member.profile.class_id)
                .copied()
                .unwrap_or(1)
                .max(1);
            value(member) / count as f64
        })
        .sum()
}

pub(super) fn party_success_chance(members: &[MemberStats], max_level: u32) -> f64 {
    normalized_sum(members, |member| {
        member.total().success_chance * level_coefficient(member.profile.level, max_level)
    })
}

pub(super) fn party_bonuses(members: &[MemberStats]) -> StatBonus {
    StatBonus {
        success_chance: 0.0,
        death_prevention: normalized_sum(members, |member| member.total().death_prevention),
        item_find: normalized_sum(members, |member| member.total().item_find),
        xp_bonus: normalized_sum(members, |member| member.total().xp_bonus),
        currency_bonus: normalized_sum(members, |member| member.total().currency_bonus),
    }
}

pub(super) fn round_reward(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}
