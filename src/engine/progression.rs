use super::utils::{load_members, party_success_chance};
use super::*;
use crate::types::StepState;

impl DungeonController {
    /// Moves a started party forward by exactly one sub-step.
    pub(super) fn advance_party(
        &mut self,
        party_id: PartyId,
        now_ms: u64,
        providers: &mut Providers<'_>,
    ) {
        let Some(party) = self.parties.party(party_id).cloned() else {
            return;
        };
        let Some(run) = party.run else {
            return;
        };
        let Some(dungeon) = self.catalog.dungeon(run.dungeon_id) else {
            emit_log(
                "error",
                "unknown_dungeon",
                json!({ "partyId": party_id, "dungeonId": run.dungeon_id }),
            );
            return;
        };
        let encounter_count = dungeon.encounters.len();

        if party.current_encounter == 0 {
            let message = dungeon.introduction.clone();
            if let Some(party) = self.parties.party_mut(party_id) {
                party.current_encounter = 1;
                party.step_state = StepState::Setup;
                party.last_update_ms = now_ms;
            }
            self.events
                .push(DungeonEvent::Progress { party_id, message });
            return;
        }

        let Some(encounter) = dungeon.encounters.get(party.current_encounter - 1) else {
            if let Some(party) = self.parties.party_mut(party_id) {
                party.state = PartyState::Complete;
                party.last_update_ms = now_ms;
            }
            return;
        };

        let message = match party.step_state {
            StepState::Setup => {
                let message = encounter.setup_text.clone();
                if let Some(party) = self.parties.party_mut(party_id) {
                    party.step_state = StepState::Resolving;
                }
                message
            }
            StepState::Resolving => {
                let members = load_members(&party, &self.catalog, providers);
                let chance = (encounter.difficulty(run.mode_id)
                    + party_success_chance(&members, self.settings.max_level))
                .clamp(0.0, 1.0);
                let enemy = encounter.enemy.clone();
                let failure_text = dungeon.failure_text.clone();
                let success = self.rng.chance(chance);
                if let Some(party) = self.parties.party_mut(party_id) {
                    if success {
                        party.step_state = StepState::Complete;
                    } else {
                        party.step_state = StepState::Setup;
                        party.state = PartyState::Failed;
                    }
                }
                if success {
                    format!("Your party successfully defeated the {enemy}!")
                } else {
                    failure_text
                }
            }
            StepState::Complete => {
                let message = encounter.completion_text.clone();
                if let Some(party) = self.parties.party_mut(party_id) {
                    party.current_encounter += 1;
                    party.step_state = StepState::Setup;
                    if party.current_encounter > encounter_count {
                        party.state = PartyState::Complete;
                    }
                }
                message
            }
        };

        if let Some(party) = self.parties.party_mut(party_id) {
            party.last_update_ms = now_ms;
        }
        self.events
            .push(DungeonEvent::Progress { party_id, message });
    }
}
