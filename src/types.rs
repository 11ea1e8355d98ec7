use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub type PlayerId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub u64);

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "party_{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueEntryId(pub u64);

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue_{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyState {
    Forming,
    Full,
    Started,
    Complete,
    Failed,
    Disbanded,
}

impl PartyState {
    /// Membership may only change before a run starts.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Forming | Self::Full)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Setup,
    Resolving,
    Complete,
}

/// A dungeon paired with one of its difficulty modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DungeonRun {
    #[serde(rename = "dungeonId")]
    pub dungeon_id: u32,
    #[serde(rename = "modeId")]
    pub mode_id: u32,
}

impl DungeonRun {
    pub fn new(dungeon_id: u32, mode_id: u32) -> Self {
        Self {
            dungeon_id,
            mode_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Party {
    pub id: PartyId,
    pub members: Vec<PlayerId>,
    pub leader: Option<PlayerId>,
    pub pending_invites: BTreeSet<PlayerId>,
    pub state: PartyState,
    pub is_queue_group: bool,
    pub run: Option<DungeonRun>,
    /// 1-based; 0 until the introduction has been told.
    pub current_encounter: usize,
    pub step_state: StepState,
    pub last_update_ms: u64,
    /// Milliseconds each member waited in the group finder queue.
    pub queue_times: BTreeMap<PlayerId, u64>,
}

impl Party {
    pub fn new(id: PartyId, is_queue_group: bool, members: Vec<PlayerId>) -> Self {
        let leader = members.first().cloned();
        Self {
            id,
            members,
            leader,
            pending_invites: BTreeSet::new(),
            state: PartyState::Forming,
            is_queue_group,
            run: None,
            current_encounter: 0,
            step_state: StepState::Setup,
            last_update_ms: 0,
            queue_times: BTreeMap::new(),
        }
    }

    pub fn is_member(&self, player_id: &str) -> bool {
        self.members.iter().any(|member| member == player_id)
    }

    pub fn is_invited(&self, player_id: &str) -> bool {
        self.pending_invites.contains(player_id)
    }

    pub fn is_leader(&self, player_id: &str) -> bool {
        self.leader.as_deref() == Some(player_id)
    }

    pub fn is_due(&self, now_ms: u64, step_time_ms: u64) -> bool {
        now_ms >= self.last_update_ms.saturating_add(step_time_ms)
    }

    pub fn reset_progress(&mut self) {
        self.run = None;
        self.current_encounter = 0;
        self.step_state = StepState::Setup;
        self.queue_times.clear();
    }

    pub fn to_view(&self) -> PartyView {
        PartyView {
            id: self.id,
            members: self.members.clone(),
            leader: self.leader.clone(),
            pending_invites: self.pending_invites.iter().cloned().collect(),
            state: self.state,
            is_queue_group: self.is_queue_group,
            run: self.run,
            current_encounter: self.current_encounter,
            step_state: self.step_state,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub player_id: PlayerId,
    pub class_id: u32,
    pub runs: Vec<DungeonRun>,
    pub queued_at_ms: u64,
}

impl QueueEntry {
    pub fn to_view(&self) -> QueueEntryView {
        QueueEntryView {
            id: self.id,
            player_id: self.player_id.clone(),
            class_id: self.class_id,
            runs: self.runs.clone(),
            queued_at_ms: self.queued_at_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DungeonParticipant {
    #[serde(rename = "playerId")]
    pub player_id: PlayerId,
    #[serde(rename = "waitTimeMs")]
    pub wait_time_ms: u64,
    pub experience: i64,
    pub currency: i64,
    #[serde(rename = "itemId")]
    pub item_id: Option<u32>,
    #[serde(rename = "petId")]
    pub pet_id: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DungeonHistory {
    #[serde(rename = "partyId")]
    pub party_id: PartyId,
    #[serde(rename = "resolvedAtMs")]
    pub resolved_at_ms: u64,
    #[serde(rename = "isQueueGroup")]
    pub is_queue_group: bool,
    pub success: bool,
    pub run: DungeonRun,
    pub participants: Vec<DungeonParticipant>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockout {
    #[serde(rename = "playerId")]
    pub player_id: PlayerId,
    pub timer: String,
    #[serde(rename = "lastUsedMs")]
    pub last_used_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LootDrop {
    #[serde(rename = "itemId")]
    pub item_id: u32,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DungeonEvent {
    Progress {
        #[serde(rename = "partyId")]
        party_id: PartyId,
        message: String,
    },
    RunCompleted {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
        experience: u64,
        currency: u64,
        loot: Option<LootDrop>,
        #[serde(rename = "queueGroup")]
        queue_group: bool,
        #[serde(rename = "groupFinderBonus")]
        group_finder_bonus: bool,
        #[serde(rename = "critBonus")]
        crit_bonus: bool,
    },
    PlayerDied {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
        #[serde(rename = "experienceLost")]
        experience_lost: u64,
        #[serde(rename = "currencyLost")]
        currency_lost: u64,
    },
    RunFailed {
        #[serde(rename = "partyId")]
        party_id: PartyId,
        deceased: Vec<PlayerId>,
    },
    PartyFound {
        #[serde(rename = "partyId")]
        party_id: PartyId,
        members: Vec<PlayerId>,
        leader: Option<PlayerId>,
        run: Option<DungeonRun>,
    },
    PartyDisbanded {
        #[serde(rename = "partyId")]
        party_id: PartyId,
        members: Vec<PlayerId>,
        reason: String,
    },
    PetFound {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
        #[serde(rename = "petId")]
        pet_id: u32,
        name: String,
        rarity: String,
        duplicate: bool,
    },
    PetHungry {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
        name: String,
        starving: bool,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct PartyView {
    pub id: PartyId,
    pub members: Vec<PlayerId>,
    pub leader: Option<PlayerId>,
    #[serde(rename = "pendingInvites")]
    pub pending_invites: Vec<PlayerId>,
    pub state: PartyState,
    #[serde(rename = "isQueueGroup")]
    pub is_queue_group: bool,
    pub run: Option<DungeonRun>,
    #[serde(rename = "currentEncounter")]
    pub current_encounter: usize,
    #[serde(rename = "stepState")]
    pub step_state: StepState,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueueEntryView {
    pub id: QueueEntryId,
    #[serde(rename = "playerId")]
    pub player_id: PlayerId,
    #[serde(rename = "classId")]
    pub class_id: u32,
    pub runs: Vec<DungeonRun>,
    #[serde(rename = "queuedAtMs")]
    pub queued_at_ms: u64,
}
