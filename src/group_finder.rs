use std::collections::{BTreeSet, HashMap};

use serde_json::json;

use crate::constants::MAX_CLASS_DUPLICATES;
use crate::log::emit_log;
use crate::party::PartyController;
use crate::providers::HistoryStore;
use crate::rng::RollSource;
use crate::settings::TimerSettings;
use crate::types::{DungeonEvent, DungeonRun, Lockout, PartyId, QueueEntry, QueueEntryId};

#[derive(Clone, Debug, PartialEq)]
pub struct QueueResult {
    pub ok: bool,
    pub reason: Option<String>,
    pub party_id: Option<PartyId>,
}

impl QueueResult {
    pub(crate) fn queued(party_id: Option<PartyId>) -> Self {
        Self {
            ok: true,
            reason: None,
            party_id,
        }
    }

    pub(crate) fn err(reason: &str) -> Self {
        Self {
            ok: false,
            reason: Some(reason.to_string()),
            party_id: None,
        }
    }
}

/// Solo-player matchmaking queue and the daily group finder bonus lockout.
pub struct GroupFinderController {
    timer: TimerSettings,
    next_id: u64,
    entries: Vec<QueueEntry>,
    events: Vec<DungeonEvent>,
}

impl GroupFinderController {
    pub fn new(timer: TimerSettings) -> Self {
        Self {
            timer,
            next_id: 1,
            entries: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn get_player_queue_entry(&self, player_id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|entry| entry.player_id == player_id)
    }

    pub fn is_player_queued(&self, player_id: &str) -> bool {
        self.get_player_queue_entry(player_id).is_some()
    }

    pub fn dequeue_player(&mut self, player_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.player_id != player_id);
        self.entries.len() != before
    }

    pub fn get_queue_entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn drain_events(&mut self) -> Vec<DungeonEvent> {
        std::mem::take(&mut self.events)
    }

    /// Enqueues a player and tries to assemble a full party around them.
    pub fn queue_player(
        &mut self,
        parties: &mut PartyController,
        player_id: &str,
        class_id: u32,
        runs: Vec<DungeonRun>,
        now_ms: u64,
        rng: &mut dyn RollSource,
    ) -> QueueResult {
        if self.is_player_queued(player_id) {
            return QueueResult::err("already queued");
        }
        if parties.party_for_player(player_id).is_some() {
            return QueueResult::err("already in a party");
        }
        if parties.pending_invite_for(player_id).is_some() {
            return QueueResult::err("has a pending party invite");
        }
        if runs.is_empty() {
            return QueueResult::err("no eligible dungeons");
        }

        let entry_id = QueueEntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(QueueEntry {
            id: entry_id,
            player_id: player_id.to_string(),
            class_id,
            runs,
            queued_at_ms: now_ms,
        });

        let Some(group) = self.find_group(entry_id, parties.party_size()) else {
            return QueueResult::queued(None);
        };
        let party_id = self.form_party(parties, group, now_ms, rng);
        QueueResult::queued(party_id)
    }

    /// Searches for a full group containing `entry_id`, preferring the
    /// longest-waiting candidates. Returns entries oldest first.
    fn find_group(&self, entry_id: QueueEntryId, party_size: usize) -> Option<Vec<QueueEntry>> {
        let anchor = self.entries.iter().find(|entry| entry.id == entry_id)?;
        let mut pool: Vec<&QueueEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.id != entry_id)
            .collect();
        pool.sort_by_key(|entry| (entry.queued_at_ms, entry.id));

        let mut class_counts = HashMap::new();
        class_counts.insert(anchor.class_id, 1usize);
        let shared: BTreeSet<DungeonRun> = anchor.runs.iter().copied().collect();
        let mut picked = Vec::new();
        let needed = party_size.saturating_sub(1);
        if !search_group(&pool, 0, needed, &shared, &mut class_counts, &mut picked) {
            return None;
        }

        let mut group: Vec<QueueEntry> = picked.iter().map(|index| pool[*index].clone()).collect();
        group.push(anchor.clone());
        group.sort_by_key(|entry| (entry.queued_at_ms, entry.id));
        Some(group)
    }

    fn form_party(
        &mut self,
        parties: &mut PartyController,
        group: Vec<QueueEntry>,
        now_ms: u64,
        rng: &mut dyn RollSource,
    ) -> Option<PartyId> {
        let shared = shared_runs(&group);
        let run = if shared.is_empty() {
            None
        } else {
            Some(shared[rng.pick_index(shared.len())])
        };
        let members: Vec<String> = group.iter().map(|entry| entry.player_id.clone()).collect();
        let leader = group
            .iter()
            .min_by_key(|entry| (entry.queued_at_ms, entry.id))
            .map(|entry| entry.player_id.clone());

        let Some(party_id) = parties.create_party(true, members.clone()) else {
            emit_log(
                "warn",
                "group_members_already_in_party",
                json!({ "members": members }),
            );
            return None;
        };
        self.entries
            .retain(|entry| !group.iter().any(|matched| matched.id == entry.id));

        if let Some(leader) = leader.as_deref() {
            parties.set_leader(party_id, leader);
        }
        if let Some(party) = parties.party_mut(party_id) {
            party.run = run;
            for entry in &group {
                party
                    .queue_times
                    .insert(entry.player_id.clone(), now_ms.saturating_sub(entry.queued_at_ms));
            }
        }
        parties.set_ready(party_id);

        emit_log(
            "info",
            "group_found",
            json!({
                "partyId": party_id,
                "members": members,
                "leader": leader,
                "run": run,
            }),
        );
        let members = parties
            .party(party_id)
            .map(|party| party.members.clone())
            .unwrap_or(members);
        self.events.push(DungeonEvent::PartyFound {
            party_id,
            members,
            leader,
            run,
        });
        Some(party_id)
    }

    /// Remaining group finder bonus cooldown in milliseconds; 0 when eligible.
    pub fn get_lockout_time(&self, history: &dyn HistoryStore, player_id: &str, now_ms: u64) -> u64 {
        history
            .lockout(player_id, &self.timer.name)
            .map(|lockout| self.timer.remaining_ms(lockout.last_used_ms, now_ms))
            .unwrap_or(0)
    }

    pub fn set_lockout(&self, history: &mut dyn HistoryStore, player_id: &str, now_ms: u64) {
        history.save_lockout(Lockout {
            player_id: player_id.to_string(),
            timer: self.timer.name.clone(),
            last_used_ms: now_ms,
        });
    }
}

/// Depth-first over `pool` (oldest first), so the first complete group found
/// is the one that favours the longest waiters.
fn search_group(
    pool: &[&QueueEntry],
    start: usize,
    needed: usize,
    shared: &BTreeSet<DungeonRun>,
    class_counts: &mut HashMap<u32, usize>,
    picked: &mut Vec<usize>,
) -> bool {
    if shared.is_empty() {
        return false;
    }
    if needed == 0 {
        return true;
    }
    for index in start..pool.len() {
        if pool.len() - index < needed {
            break;
        }
        let candidate = pool[index];
        let count = class_counts.get(&candidate.class_id).copied().unwrap_or(0);
        if count >= MAX_CLASS_DUPLICATES {
            continue;
        }
        let narrowed: BTreeSet<DungeonRun> = candidate
            .runs
            .iter()
            .filter(|run| shared.contains(run))
            .copied()
            .collect();
        if narrowed.is_empty() {
            continue;
        }

        class_counts.insert(candidate.class_id, count + 1);
        picked.push(index);
        if search_group(pool, index + 1, needed - 1, &narrowed, class_counts, picked) {
            return true;
        }
        picked.pop();
        class_counts.insert(candidate.class_id, count);
    }
    false
}

fn shared_runs(group: &[QueueEntry]) -> Vec<DungeonRun> {
    let Some(first) = group.first() else {
        return Vec::new();
    };
    let mut shared: BTreeSet<DungeonRun> = first.runs.iter().copied().collect();
    for entry in &group[1..] {
        shared.retain(|run| entry.runs.contains(run));
    }
    shared.into_iter().collect()
}
