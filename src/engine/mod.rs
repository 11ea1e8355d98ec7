use serde_json::json;

use crate::constants::dungeon_cost;
use crate::content::ContentCatalog;
use crate::group_finder::{GroupFinderController, QueueResult};
use crate::log::emit_log;
use crate::party::PartyController;
use crate::providers::{PlayerProfile, Providers};
use crate::rng::RollSource;
use crate::settings::DungeonSettings;
use crate::types::{
    DungeonEvent, DungeonRun, PartyId, PartyState, PartyView, PlayerId, QueueEntryView,
};

mod progression;
mod rewards;
mod utils;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StartResult {
    pub ok: bool,
    pub reason: Option<String>,
    /// Members who cannot pay the entry cost.
    pub unaffordable: Vec<PlayerId>,
    /// Members outside the mode's level range.
    pub ineligible: Vec<PlayerId>,
}

impl StartResult {
    fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    fn err(reason: &str) -> Self {
        Self {
            ok: false,
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

/// Drives every party through its dungeon run and settles the outcome.
///
/// The controller is single-threaded: hosts serialize calls to
/// [`DungeonController::process`] and the player-facing operations.
pub struct DungeonController {
    settings: DungeonSettings,
    catalog: ContentCatalog,
    rng: Box<dyn RollSource + Send>,
    parties: PartyController,
    group_finder: GroupFinderController,
    events: Vec<DungeonEvent>,
}

impl DungeonController {
    pub fn new(
        settings: DungeonSettings,
        catalog: ContentCatalog,
        rng: Box<dyn RollSource + Send>,
    ) -> Self {
        let parties = PartyController::new(settings.party_size);
        let group_finder = GroupFinderController::new(settings.group_finder_timer.clone());
        Self {
            settings,
            catalog,
            rng,
            parties,
            group_finder,
            events: Vec::new(),
        }
    }

    pub fn settings(&self) -> &DungeonSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &ContentCatalog {
        &self.catalog
    }

    pub fn parties(&self) -> &PartyController {
        &self.parties
    }

    pub fn parties_mut(&mut self) -> &mut PartyController {
        &mut self.parties
    }

    pub fn group_finder(&self) -> &GroupFinderController {
        &self.group_finder
    }

    /// Outbound notifications raised since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<DungeonEvent> {
        let mut events = self.group_finder.drain_events();
        events.append(&mut self.events);
        events
    }

    pub fn party_views(&self) -> Vec<PartyView> {
        self.parties.parties().map(|party| party.to_view()).collect()
    }

    pub fn queue_views(&self) -> Vec<QueueEntryView> {
        self.group_finder
            .get_queue_entries()
            .iter()
            .map(|entry| entry.to_view())
            .collect()
    }

    pub fn dungeon_cost(&self, player: &PlayerProfile) -> u64 {
        dungeon_cost(
            self.settings.dungeon_base_cost,
            self.settings.dungeon_level_cost,
            player.level,
        )
    }

    /// Runs whose level range admits `player`; every run when level
    /// restrictions are off.
    pub fn eligible_runs(&self, player: &PlayerProfile) -> Vec<DungeonRun> {
        self.catalog
            .runs()
            .into_iter()
            .filter(|run| {
                !self.settings.level_restrictions
                    || self
                        .catalog
                        .level_range(*run)
                        .map(|range| range.contains(player.level))
                        .unwrap_or(false)
            })
            .collect()
    }

    /// Opens a new party led by `player_id`.
    pub fn create_party(&mut self, player_id: &str) -> Option<PartyId> {
        if self.parties.party_for_player(player_id).is_some()
            || self.group_finder.is_player_queued(player_id)
        {
            return None;
        }
        self.parties.create_party(false, vec![player_id.to_string()])
    }

    pub fn invite_player(&mut self, party_id: PartyId, player_id: &str) -> bool {
        if self.group_finder.is_player_queued(player_id) {
            return false;
        }
        self.parties.invite_player(party_id, player_id)
    }

    /// A queued player keeps the invite but must dequeue before joining.
    pub fn accept_invite(&mut self, party_id: PartyId, player_id: &str) -> bool {
        if self.group_finder.is_player_queued(player_id) {
            return false;
        }
        self.parties.accept_invite(party_id, player_id)
    }

    /// Checks entry requirements for every member without charging anyone.
    pub fn can_start(
        &self,
        party_id: PartyId,
        run: Option<DungeonRun>,
        providers: &Providers<'_>,
    ) -> StartResult {
        let Some(party) = self.parties.party(party_id) else {
            return StartResult::err("no such party");
        };
        if party.state != PartyState::Full {
            return StartResult::err("party is not ready");
        }
        let Some(run) = run.or(party.run) else {
            return StartResult::err("no dungeon selected");
        };
        let Some(range) = self.catalog.level_range(run) else {
            return StartResult::err("unknown dungeon");
        };

        let mut result = StartResult::ok();
        for member in &party.members {
            let Some(player) = providers.players.player(member) else {
                return StartResult::err("unknown party member");
            };
            if self.settings.level_restrictions && !range.contains(player.level) {
                result.ineligible.push(member.clone());
            }
            if player.currency < self.dungeon_cost(&player) {
                result.unaffordable.push(member.clone());
            }
        }
        if !result.ineligible.is_empty() {
            result.ok = false;
            result.reason = Some("level requirement not met".to_string());
        } else if !result.unaffordable.is_empty() {
            result.ok = false;
            result.reason = Some("not every member can afford the entry cost".to_string());
        }
        result
    }

    /// `Full → Started`: charges every member and begins the run.
    pub fn start_dungeon(
        &mut self,
        party_id: PartyId,
        run: Option<DungeonRun>,
        now_ms: u64,
        providers: &mut Providers<'_>,
    ) -> StartResult {
        let result = self.can_start(party_id, run, providers);
        if !result.ok {
            return result;
        }
        let Some(party) = self.parties.party(party_id) else {
            return StartResult::err("no such party");
        };
        let Some(run) = run.or(party.run) else {
            return StartResult::err("no dungeon selected");
        };
        let members = party.members.clone();

        for member in &members {
            if let Some(player) = providers.players.player(member) {
                let cost = self.dungeon_cost(&player);
                providers.players.remove_currency(member, cost);
            }
        }
        if !self.parties.start_run(party_id, run, now_ms) {
            return StartResult::err("party is not ready");
        }
        emit_log(
            "info",
            "dungeon_started",
            json!({
                "partyId": party_id,
                "run": run,
                "dungeon": self.catalog.run_name(run),
                "members": members,
            }),
        );
        result
    }

    /// Enqueues a solo player for every requested run they are eligible for
    /// (all eligible runs when none are requested). A completed match is
    /// started straight away.
    pub fn queue_player(
        &mut self,
        player_id: &str,
        requested: &[DungeonRun],
        now_ms: u64,
        providers: &mut Providers<'_>,
    ) -> QueueResult {
        let Some(player) = providers.players.player(player_id) else {
            return QueueResult::err("unknown player");
        };
        let can_play = self
            .catalog
            .class(player.class_id)
            .map(|class| class.can_play)
            .unwrap_or(false);
        if !can_play {
            return QueueResult::err("class cannot enter dungeons");
        }
        if player.currency < self.dungeon_cost(&player) {
            return QueueResult::err("cannot afford the entry cost");
        }
        let eligible = self.eligible_runs(&player);
        let runs: Vec<DungeonRun> = if requested.is_empty() {
            eligible
        } else {
            requested
                .iter()
                .copied()
                .filter(|run| eligible.contains(run))
                .collect()
        };

        let result = self.group_finder.queue_player(
            &mut self.parties,
            player_id,
            player.class_id,
            runs,
            now_ms,
            self.rng.as_mut(),
        );
        if let Some(party_id) = result.party_id {
            let started = self.start_dungeon(party_id, None, now_ms, providers);
            if !started.ok {
                emit_log(
                    "warn",
                    "group_start_failed",
                    json!({
                        "partyId": party_id,
                        "reason": started.reason,
                        "unaffordable": started.unaffordable,
                        "ineligible": started.ineligible,
                    }),
                );
                let members = self
                    .parties
                    .party(party_id)
                    .map(|party| party.members.clone())
                    .unwrap_or_default();
                if self.parties.disband_party(party_id) {
                    self.events.push(DungeonEvent::PartyDisbanded {
                        party_id,
                        members,
                        reason: started
                            .reason
                            .unwrap_or_else(|| "group could not start".to_string()),
                    });
                }
            }
        }
        result
    }

    pub fn dequeue_player(&mut self, player_id: &str) -> bool {
        self.group_finder.dequeue_player(player_id)
    }

    /// One scheduling pass: advances every due started party by one step,
    /// settles due completed and failed parties, then drops disbanded ones.
    pub fn process(&mut self, now_ms: u64, providers: &mut Providers<'_>) {
        let step_time_ms = self.settings.step_time_ms;
        let due = |controller: &Self, state: PartyState| -> Vec<PartyId> {
            controller
                .parties
                .parties()
                .filter(|party| party.state == state && party.is_due(now_ms, step_time_ms))
                .map(|party| party.id)
                .collect()
        };
        let started = due(self, PartyState::Started);
        let complete = due(self, PartyState::Complete);
        let failed = due(self, PartyState::Failed);

        for party_id in started {
            self.advance_party(party_id, now_ms, providers);
        }
        for party_id in complete {
            self.complete_run(party_id, now_ms, providers);
        }
        for party_id in failed {
            self.fail_run(party_id, now_ms, providers);
        }
        self.parties.remove_disbanded();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{experience_for_level, MemoryWorld};
    use crate::providers::{EquipmentProvider, PlayerProvider};
    use crate::rng::{FixedRolls, Rng};

    const CATALOG: &str = r#"{
  "modes": [{ "id": 1, "name": "Normal", "flag": "n", "isDefault": true }],
  "classes": [
    { "id": 0, "name": "Deprived", "canPlay": false },
    { "id": 1, "name": "Warrior", "itemTypes": [1] },
    { "id": 2, "name": "Mage", "itemTypes": [1] }
  ],
  "items": [{ "id": 1, "name": "Test Blade", "itemType": 1 }],
  "dungeons": [
    {
      "id": 1, "name": "Crypt", "introduction": "intro", "failureText": "wiped",
      "levelRanges": [{ "modeId": 1, "minLevel": 1, "maxLevel": 20 }],
      "encounters": [{ "enemy": "Rat King", "setupText": "squeak", "completionText": "done",
        "difficulties": [{ "modeId": 1, "difficulty": 1.0 }] }],
      "loot": [{ "modeId": 1, "itemId": 1, "dropChance": 1.0 }]
    },
    {
      "id": 2, "name": "Pit", "introduction": "intro", "failureText": "wiped",
      "levelRanges": [{ "modeId": 1, "minLevel": 1, "maxLevel": 20 }],
      "encounters": [{ "enemy": "Abyss", "setupText": "dark", "completionText": "light",
        "difficulties": [{ "modeId": 1, "difficulty": 0.0 }] }]
    },
    {
      "id": 3, "name": "Spire", "introduction": "intro", "failureText": "wiped",
      "levelRanges": [{ "modeId": 1, "minLevel": 15, "maxLevel": 20 }],
      "encounters": [{ "enemy": "Warden", "setupText": "a", "completionText": "b",
        "difficulties": [{ "modeId": 1, "difficulty": 1.0 }] }]
    },
    {
      "id": 4, "name": "Halls", "introduction": "intro", "failureText": "wiped",
      "levelRanges": [{ "modeId": 1, "minLevel": 1, "maxLevel": 20 }],
      "encounters": [
        { "enemy": "Ghoul", "setupText": "one", "completionText": "one down",
          "difficulties": [{ "modeId": 1, "difficulty": 1.0 }] },
        { "enemy": "Lich", "setupText": "two", "completionText": "two down",
          "difficulties": [{ "modeId": 1, "difficulty": 1.0 }] }
      ]
    }
  ]
}"#;

    const CRYPT: DungeonRun = DungeonRun {
        dungeon_id: 1,
        mode_id: 1,
    };
    const PIT: DungeonRun = DungeonRun {
        dungeon_id: 2,
        mode_id: 1,
    };
    const SPIRE: DungeonRun = DungeonRun {
        dungeon_id: 3,
        mode_id: 1,
    };
    const HALLS: DungeonRun = DungeonRun {
        dungeon_id: 4,
        mode_id: 1,
    };

    fn settings(death_chance: f64) -> DungeonSettings {
        DungeonSettings {
            party_size: 2,
            step_time_ms: 1_000,
            crit_chance: 0.0,
            death_chance,
            ..DungeonSettings::default()
        }
    }

    fn setup(death_chance: f64) -> (DungeonController, MemoryWorld) {
        let catalog = ContentCatalog::from_json_str(CATALOG).expect("test catalog");
        let settings = settings(death_chance);
        let mut world = MemoryWorld::new(&catalog, settings.max_level);
        world.players.add_player("a", "Alice", 10, 1, 1_000);
        world.players.add_player("b", "Bob", 10, 2, 1_000);
        let controller =
            DungeonController::new(settings, catalog, Box::new(FixedRolls::constant(0.5)));
        (controller, world)
    }

    fn ready_party(controller: &mut DungeonController) -> PartyId {
        let party_id = controller.create_party("a").expect("party");
        assert!(controller.invite_player(party_id, "b"));
        assert!(controller.accept_invite(party_id, "b"));
        party_id
    }

    fn party_state(controller: &DungeonController, party_id: PartyId) -> Option<PartyState> {
        controller.parties().party(party_id).map(|party| party.state)
    }

    fn currency(world: &MemoryWorld, player_id: &str) -> u64 {
        world.players.player(player_id).expect("player").currency
    }

    fn experience(world: &MemoryWorld, player_id: &str) -> u64 {
        world.players.player(player_id).expect("player").experience
    }

    #[test]
    fn scripted_run_walks_every_step_then_pays_out() {
        let (mut controller, mut world) = setup(0.25);
        let party_id = ready_party(&mut controller);

        let started = controller.start_dungeon(party_id, Some(CRYPT), 0, &mut world.providers());
        assert!(started.ok, "{started:?}");
        assert_eq!(currency(&world, "a"), 875);

        for pass in 1..=4 {
            controller.process(pass * 1_000, &mut world.providers());
        }
        assert_eq!(party_state(&controller, party_id), Some(PartyState::Complete));
        let progress: Vec<String> = controller
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                DungeonEvent::Progress { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(
            progress,
            vec![
                "intro".to_string(),
                "squeak".to_string(),
                "Your party successfully defeated the Rat King!".to_string(),
                "done".to_string(),
            ]
        );

        controller.process(5_000, &mut world.providers());
        let events = controller.drain_events();
        let completions: Vec<&DungeonEvent> = events
            .iter()
            .filter(|event| matches!(event, DungeonEvent::RunCompleted { .. }))
            .collect();
        assert_eq!(completions.len(), 2);
        for event in completions {
            let DungeonEvent::RunCompleted {
                experience,
                currency,
                loot,
                group_finder_bonus,
                crit_bonus,
                ..
            } = event
            else {
                unreachable!();
            };
            assert_eq!(*experience, 35);
            assert_eq!(*currency, 75);
            assert_eq!(loot.as_ref().map(|drop| drop.item_id), Some(1));
            assert!(!group_finder_bonus);
            assert!(!crit_bonus);
        }
        assert_eq!(currency(&world, "a"), 950);
        assert_eq!(experience(&world, "b"), experience_for_level(10) + 35);
        assert_eq!(world.equipment.inventory("a"), vec![1]);

        let party = controller.parties().party(party_id).expect("party survives");
        assert_eq!(party.state, PartyState::Forming);
        assert!(party.run.is_none());
        assert_eq!(party.current_encounter, 0);
        assert_eq!(world.history.runs.len(), 1);
        assert!(world.history.runs[0].success);
    }

    #[test]
    fn parties_only_move_once_per_step_interval() {
        let (mut controller, mut world) = setup(0.25);
        let party_id = ready_party(&mut controller);
        assert!(controller
            .start_dungeon(party_id, Some(CRYPT), 0, &mut world.providers())
            .ok);

        controller.process(999, &mut world.providers());
        assert!(controller.drain_events().is_empty());
        controller.process(1_000, &mut world.providers());
        controller.process(1_500, &mut world.providers());
        assert_eq!(controller.drain_events().len(), 1);
        let party = controller.parties().party(party_id).expect("party");
        assert_eq!(party.current_encounter, 1);
        assert_eq!(party.last_update_ms, 1_000);
    }

    #[test]
    fn certain_death_costs_currency_but_never_a_level() {
        let (mut controller, mut world) = setup(1.0);
        let party_id = ready_party(&mut controller);
        assert!(controller
            .start_dungeon(party_id, Some(PIT), 0, &mut world.providers())
            .ok);
        for pass in 1..=3 {
            controller.process(pass * 1_000, &mut world.providers());
        }
        assert_eq!(party_state(&controller, party_id), Some(PartyState::Failed));
        controller.drain_events();

        controller.process(4_000, &mut world.providers());
        let events = controller.drain_events();
        let deaths: Vec<(u64, u64)> = events
            .iter()
            .filter_map(|event| match event {
                DungeonEvent::PlayerDied {
                    experience_lost,
                    currency_lost,
                    ..
                } => Some((*experience_lost, *currency_lost)),
                _ => None,
            })
            .collect();
        assert_eq!(deaths, vec![(0, 75), (0, 75)]);
        assert!(events.iter().any(|event| matches!(
            event,
            DungeonEvent::RunFailed { deceased, .. } if deceased.len() == 2
        )));
        assert_eq!(currency(&world, "a"), 800);
        assert_eq!(experience(&world, "a"), experience_for_level(10));
        assert_eq!(party_state(&controller, party_id), Some(PartyState::Forming));
        assert!(!world.history.runs[0].success);
    }

    #[test]
    fn death_takes_back_would_have_earned_experience_down_to_the_level_floor() {
        let (mut controller, mut world) = setup(1.0);
        world.players.grant_experience("a", 100);
        world.players.grant_experience("b", 20);
        let party_id = ready_party(&mut controller);
        assert!(controller
            .start_dungeon(party_id, Some(PIT), 0, &mut world.providers())
            .ok);
        for pass in 1..=4 {
            controller.process(pass * 1_000, &mut world.providers());
        }

        let deaths: Vec<(String, u64)> = controller
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                DungeonEvent::PlayerDied {
                    player_id,
                    experience_lost,
                    ..
                } => Some((player_id, experience_lost)),
                _ => None,
            })
            .collect();
        assert_eq!(deaths, vec![("a".to_string(), 35), ("b".to_string(), 20)]);
        assert_eq!(experience(&world, "a"), experience_for_level(10) + 65);
        assert_eq!(experience(&world, "b"), experience_for_level(10));
        assert_eq!(world.players.player("b").expect("player").level, 10);
    }

    #[test]
    fn failure_without_deaths_leaves_players_untouched() {
        let (mut controller, mut world) = setup(0.0);
        let party_id = ready_party(&mut controller);
        assert!(controller
            .start_dungeon(party_id, Some(PIT), 0, &mut world.providers())
            .ok);
        for pass in 1..=4 {
            controller.process(pass * 1_000, &mut world.providers());
        }
        let events = controller.drain_events();
        assert!(!events
            .iter()
            .any(|event| matches!(event, DungeonEvent::PlayerDied { .. })));
        assert!(events.iter().any(|event| matches!(
            event,
            DungeonEvent::RunFailed { deceased, .. } if deceased.is_empty()
        )));
        assert_eq!(currency(&world, "b"), 875);
    }

    #[test]
    fn start_rejects_unready_ineligible_and_broke_parties() {
        let (mut controller, mut world) = setup(0.25);
        let forming = controller.create_party("a").expect("party");
        let result = controller.start_dungeon(forming, Some(CRYPT), 0, &mut world.providers());
        assert!(!result.ok);
        assert_eq!(result.reason.as_deref(), Some("party is not ready"));

        assert!(controller.invite_player(forming, "b"));
        assert!(controller.accept_invite(forming, "b"));
        let result = controller.start_dungeon(forming, Some(SPIRE), 0, &mut world.providers());
        assert!(!result.ok);
        assert_eq!(result.ineligible, vec!["a".to_string(), "b".to_string()]);

        world.players.remove_currency("b", 1_000);
        let result = controller.start_dungeon(forming, Some(CRYPT), 0, &mut world.providers());
        assert!(!result.ok);
        assert_eq!(result.unaffordable, vec!["b".to_string()]);
        assert_eq!(currency(&world, "a"), 1_000);
        assert_eq!(party_state(&controller, forming), Some(PartyState::Full));
    }

    #[test]
    fn queue_group_starts_itself_and_earns_bonus_once_per_day() {
        let (mut controller, mut world) = setup(0.25);
        assert!(controller.queue_player("a", &[CRYPT], 0, &mut world.providers()).ok);
        let matched = controller.queue_player("b", &[CRYPT], 400, &mut world.providers());
        let party_id = matched.party_id.expect("group formed");
        assert_eq!(party_state(&controller, party_id), Some(PartyState::Started));
        assert_eq!(currency(&world, "b"), 875);
        let party = controller.parties().party(party_id).expect("party");
        assert_eq!(party.leader.as_deref(), Some("a"));
        assert_eq!(party.queue_times.get("a"), Some(&400));

        let events = controller.drain_events();
        assert!(matches!(events.first(), Some(DungeonEvent::PartyFound { .. })));

        for pass in 1..=5 {
            controller.process(400 + pass * 1_000, &mut world.providers());
        }
        let bonus: Vec<(u64, u64, bool)> = controller
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                DungeonEvent::RunCompleted {
                    experience,
                    currency,
                    group_finder_bonus,
                    queue_group,
                    ..
                } => {
                    assert!(queue_group);
                    Some((experience, currency, group_finder_bonus))
                }
                _ => None,
            })
            .collect();
        assert_eq!(bonus, vec![(70, 150, true), (70, 150, true)]);
        assert!(controller.parties().party(party_id).is_none());
        assert_eq!(world.history.runs[0].participants[0].wait_time_ms, 400);

        assert!(controller.queue_player("a", &[CRYPT], 10_000, &mut world.providers()).ok);
        assert!(controller.queue_player("b", &[CRYPT], 10_000, &mut world.providers()).ok);
        for pass in 1..=5 {
            controller.process(10_000 + pass * 1_000, &mut world.providers());
        }
        let second: Vec<bool> = controller
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                DungeonEvent::RunCompleted {
                    group_finder_bonus, ..
                } => Some(group_finder_bonus),
                _ => None,
            })
            .collect();
        assert_eq!(second, vec![false, false]);
    }

    #[test]
    fn each_encounter_adds_three_steps_after_the_introduction() {
        let (mut controller, mut world) = setup(0.25);
        let party_id = ready_party(&mut controller);
        assert!(controller
            .start_dungeon(party_id, Some(HALLS), 0, &mut world.providers())
            .ok);

        for pass in 1..=6 {
            controller.process(pass * 1_000, &mut world.providers());
        }
        let party = controller.parties().party(party_id).expect("party");
        assert_eq!(party.state, PartyState::Started);
        assert_eq!(party.current_encounter, 2);

        controller.process(7_000, &mut world.providers());
        assert_eq!(party_state(&controller, party_id), Some(PartyState::Complete));
        let progress = controller
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, DungeonEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 7);
    }

    #[test]
    fn invited_players_stay_out_of_the_queue_and_queued_players_cannot_join() {
        let (mut controller, mut world) = setup(0.25);
        world.players.add_player("c", "Cid", 10, 1, 1_000);
        let party_id = controller.create_party("a").expect("party");
        assert!(controller.invite_player(party_id, "b"));

        let queued = controller.queue_player("b", &[CRYPT], 0, &mut world.providers());
        assert_eq!(queued.reason.as_deref(), Some("has a pending party invite"));
        assert!(controller.accept_invite(party_id, "b"));
        let lone = controller.queue_player("c", &[CRYPT], 10, &mut world.providers());
        assert!(lone.ok);
        assert!(lone.party_id.is_none());
        assert_eq!(
            controller
                .parties()
                .parties()
                .filter(|party| party.members.iter().any(|member| member == "b"))
                .count(),
            1
        );

        let second = controller.create_party("d").expect("party");
        assert!(controller.parties_mut().invite_player(second, "c"));
        assert!(!controller.accept_invite(second, "c"));
        assert_eq!(controller.parties().pending_invite_for("c"), Some(second));
        assert!(controller.dequeue_player("c"));
        assert!(controller.accept_invite(second, "c"));
        assert_eq!(
            controller.parties().party_for_player("c").map(|party| party.id),
            Some(second)
        );
    }

    #[test]
    fn matched_group_that_cannot_pay_is_dissolved_with_notice() {
        let (mut controller, mut world) = setup(0.25);
        assert!(controller.queue_player("a", &[CRYPT], 0, &mut world.providers()).ok);
        world.players.remove_currency("a", 1_000);
        let matched = controller.queue_player("b", &[CRYPT], 100, &mut world.providers());
        let party_id = matched.party_id.expect("group formed");

        let events = controller.drain_events();
        assert!(matches!(events.first(), Some(DungeonEvent::PartyFound { .. })));
        assert!(events.iter().any(|event| matches!(
            event,
            DungeonEvent::PartyDisbanded { party_id: dissolved, members, reason }
                if *dissolved == party_id
                    && members.len() == 2
                    && reason == "not every member can afford the entry cost"
        )));
        assert_eq!(party_state(&controller, party_id), Some(PartyState::Disbanded));
        assert!(controller.parties().party_for_player("a").is_none());
        assert!(!controller.group_finder().is_player_queued("b"));
        assert_eq!(currency(&world, "b"), 1_000);
    }

    #[test]
    fn queue_rejects_players_who_cannot_enter() {
        let (mut controller, mut world) = setup(0.25);
        world.players.add_player("z", "Zed", 10, 0, 1_000);
        world.players.add_player("p", "Poor", 10, 1, 10);
        let deprived = controller.queue_player("z", &[], 0, &mut world.providers());
        assert_eq!(deprived.reason.as_deref(), Some("class cannot enter dungeons"));
        let broke = controller.queue_player("p", &[], 0, &mut world.providers());
        assert_eq!(broke.reason.as_deref(), Some("cannot afford the entry cost"));
        let ineligible = controller.queue_player("a", &[SPIRE], 0, &mut world.providers());
        assert_eq!(ineligible.reason.as_deref(), Some("no eligible dungeons"));
        assert!(controller.queue_views().is_empty());
    }

    #[test]
    fn same_seed_replays_same_run() {
        let replay = |seed: u32| -> String {
            let catalog = ContentCatalog::builtin().expect("builtin");
            let settings = DungeonSettings {
                step_time_ms: 1_000,
                ..DungeonSettings::default()
            };
            let mut world = MemoryWorld::new(&catalog, settings.max_level);
            for (index, class_id) in [1, 2, 3].into_iter().enumerate() {
                world
                    .players
                    .add_player(&format!("p{index}"), "Hero", 5, class_id, 5_000);
            }
            let mut controller =
                DungeonController::new(settings, catalog, Box::new(Rng::new(seed)));
            for index in 0..3 {
                controller.queue_player(&format!("p{index}"), &[], 0, &mut world.providers());
            }
            for pass in 1..=20 {
                controller.process(pass * 1_000, &mut world.providers());
            }
            serde_json::to_string(&controller.drain_events()).expect("events serialize")
        };
        assert_eq!(replay(7), replay(7));
    }
}
