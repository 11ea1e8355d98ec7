use std::collections::{BTreeMap, HashMap};

use serde_json::json;

use crate::log::emit_log;
use crate::types::{DungeonRun, Party, PartyId, PartyState, PlayerId, StepState};

/// Owns every active party and the membership / invite / ready state machine.
///
/// ```text
/// Forming ──▶ Full ──▶ Started ──▶ Complete ──┐
///    ▲  │      │                 └─▶ Failed ───┤
///    │  │      └──▶ Forming                    ├──▶ Forming (reset)
///    │  └──▶ Disbanded                          └──▶ Disbanded (queue groups)
/// ```
///
/// Mutations report failure with `false`; a rejected request never changes
/// state.
pub struct PartyController {
    party_size: usize,
    next_id: u64,
    parties: BTreeMap<PartyId, Party>,
    by_player: HashMap<PlayerId, PartyId>,
}

impl PartyController {
    pub fn new(party_size: usize) -> Self {
        Self {
            party_size: party_size.max(1),
            next_id: 1,
            parties: BTreeMap::new(),
            by_player: HashMap::new(),
        }
    }

    pub fn party_size(&self) -> usize {
        self.party_size
    }

    pub fn party(&self, party_id: PartyId) -> Option<&Party> {
        self.parties.get(&party_id)
    }

    pub fn party_mut(&mut self, party_id: PartyId) -> Option<&mut Party> {
        self.parties.get_mut(&party_id)
    }

    pub fn parties(&self) -> impl Iterator<Item = &Party> {
        self.parties.values()
    }

    pub fn party_ids_in_state(&self, state: PartyState) -> Vec<PartyId> {
        self.parties
            .values()
            .filter(|party| party.state == state)
            .map(|party| party.id)
            .collect()
    }

    pub fn party_for_player(&self, player_id: &str) -> Option<&Party> {
        self.by_player
            .get(player_id)
            .and_then(|party_id| self.parties.get(party_id))
    }

    pub fn pending_invite_for(&self, player_id: &str) -> Option<PartyId> {
        self.parties
            .values()
            .find(|party| party.is_invited(player_id))
            .map(|party| party.id)
    }

    /// Creates a `Forming` party holding `players`; the first player leads.
    /// Refuses if any of them already belongs to a party.
    pub fn create_party(
        &mut self,
        is_queue_group: bool,
        players: Vec<PlayerId>,
    ) -> Option<PartyId> {
        if players.iter().any(|player| self.by_player.contains_key(player)) {
            return None;
        }
        let party_id = PartyId(self.next_id);
        self.next_id += 1;
        for player in &players {
            self.by_player.insert(player.clone(), party_id);
        }
        let party = Party::new(party_id, is_queue_group, players);
        emit_log(
            "info",
            "party_created",
            json!({
                "partyId": party_id,
                "members": party.members,
                "queueGroup": is_queue_group,
            }),
        );
        self.parties.insert(party_id, party);
        Some(party_id)
    }

    pub fn invite_player(&mut self, party_id: PartyId, player_id: &str) -> bool {
        if self.by_player.contains_key(player_id) || self.pending_invite_for(player_id).is_some() {
            return false;
        }
        let party_size = self.party_size;
        let Some(party) = self.parties.get_mut(&party_id) else {
            return false;
        };
        if party.state != PartyState::Forming
            || party.members.len() + party.pending_invites.len() >= party_size
        {
            return false;
        }
        party.pending_invites.insert(player_id.to_string())
    }

    /// Joins an invited player; the invite stays open if they cannot join yet.
    pub fn accept_invite(&mut self, party_id: PartyId, player_id: &str) -> bool {
        if self.by_player.contains_key(player_id) {
            return false;
        }
        let party_size = self.party_size;
        let Some(party) = self.parties.get_mut(&party_id) else {
            return false;
        };
        if !party.is_invited(player_id)
            || party.state != PartyState::Forming
            || party.members.len() >= party_size
        {
            return false;
        }
        party.pending_invites.remove(player_id);
        self.add_player(party_id, player_id)
    }

    pub fn decline_invite(&mut self, party_id: PartyId, player_id: &str) -> bool {
        self.parties
            .get_mut(&party_id)
            .map(|party| party.pending_invites.remove(player_id))
            .unwrap_or(false)
    }

    /// Adds a member to a forming party; filling the last slot readies it.
    pub fn add_player(&mut self, party_id: PartyId, player_id: &str) -> bool {
        if self.by_player.contains_key(player_id) {
            return false;
        }
        let party_size = self.party_size;
        let Some(party) = self.parties.get_mut(&party_id) else {
            return false;
        };
        if party.state != PartyState::Forming || party.members.len() >= party_size {
            return false;
        }
        party.members.push(player_id.to_string());
        if party.leader.is_none() {
            party.leader = Some(player_id.to_string());
        }
        let now_full = party.members.len() >= party_size;
        self.by_player.insert(player_id.to_string(), party_id);
        if now_full {
            self.set_ready(party_id);
        }
        true
    }

    pub fn remove_player(&mut self, party_id: PartyId, player_id: &str) -> bool {
        let Some(party) = self.parties.get_mut(&party_id) else {
            return false;
        };
        if !party.state.is_open() {
            return false;
        }
        let Some(index) = party.members.iter().position(|member| member == player_id) else {
            return false;
        };
        party.members.remove(index);
        party.queue_times.remove(player_id);
        if party.is_leader(player_id) {
            party.leader = party.members.first().cloned();
        }
        let now_empty = party.members.is_empty();
        party.state = if now_empty {
            PartyState::Disbanded
        } else {
            PartyState::Forming
        };
        self.by_player.remove(player_id);
        if now_empty {
            self.disband(party_id);
        }
        true
    }

    pub fn set_ready(&mut self, party_id: PartyId) -> bool {
        let Some(party) = self.parties.get_mut(&party_id) else {
            return false;
        };
        if party.state != PartyState::Forming
            || !party.pending_invites.is_empty()
            || party.members.is_empty()
        {
            return false;
        }
        party.state = PartyState::Full;
        true
    }

    pub fn unset_ready(&mut self, party_id: PartyId) -> bool {
        let party_size = self.party_size;
        let Some(party) = self.parties.get_mut(&party_id) else {
            return false;
        };
        if party.state != PartyState::Full || party.members.len() >= party_size {
            return false;
        }
        party.state = PartyState::Forming;
        true
    }

    /// Makes `player_id` the leader and moves them to the front of the roster.
    pub fn set_leader(&mut self, party_id: PartyId, player_id: &str) -> bool {
        let Some(party) = self.parties.get_mut(&party_id) else {
            return false;
        };
        if party.is_leader(player_id) || !party.is_member(player_id) {
            return false;
        }
        party.members.retain(|member| member != player_id);
        party.members.insert(0, player_id.to_string());
        party.leader = Some(player_id.to_string());
        true
    }

    /// `Full → Started`; the caller has already settled entry requirements.
    pub fn start_run(&mut self, party_id: PartyId, run: DungeonRun, now_ms: u64) -> bool {
        let Some(party) = self.parties.get_mut(&party_id) else {
            return false;
        };
        if party.state != PartyState::Full {
            return false;
        }
        party.state = PartyState::Started;
        party.run = Some(run);
        party.current_encounter = 0;
        party.step_state = StepState::Setup;
        party.last_update_ms = now_ms;
        true
    }

    /// Clears a resolved run. Queue groups dissolve; other parties go back to
    /// `Forming` with their roster intact.
    pub fn reset_after_run(&mut self, party_id: PartyId) -> bool {
        let Some(party) = self.parties.get_mut(&party_id) else {
            return false;
        };
        if !matches!(party.state, PartyState::Complete | PartyState::Failed) {
            return false;
        }
        party.reset_progress();
        if party.is_queue_group {
            self.disband(party_id);
        } else {
            party.state = PartyState::Forming;
        }
        true
    }

    /// Cancels a party that has not started a run.
    pub fn disband_party(&mut self, party_id: PartyId) -> bool {
        match self.parties.get(&party_id) {
            Some(party) if party.state.is_open() => {
                self.disband(party_id);
                true
            }
            _ => false,
        }
    }

    fn disband(&mut self, party_id: PartyId) {
        let Some(party) = self.parties.get_mut(&party_id) else {
            return;
        };
        party.state = PartyState::Disbanded;
        party.pending_invites.clear();
        for member in &party.members {
            if self.by_player.get(member) == Some(&party_id) {
                self.by_player.remove(member);
            }
        }
        emit_log("info", "party_disbanded", json!({ "partyId": party_id }));
    }

    /// Drops disbanded parties from the arena.
    pub fn remove_disbanded(&mut self) -> Vec<PartyId> {
        let removed: Vec<PartyId> = self.party_ids_in_state(PartyState::Disbanded);
        for party_id in &removed {
            self.parties.remove(party_id);
        }
        removed
    }
}
