use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::log::emit_log;
use crate::providers::HistoryStore;
use crate::types::{DungeonHistory, Lockout};

const STORE_VERSION: u8 = 1;
const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Clone, Debug, Serialize)]
struct HistoryStoreFile<'a> {
    version: u8,
    #[serde(rename = "savedAtIso")]
    saved_at_iso: String,
    runs: &'a [DungeonHistory],
    lockouts: Vec<&'a Lockout>,
}

#[derive(Clone, Debug, Deserialize)]
struct HistoryStoreFileRaw {
    version: u8,
    #[serde(default)]
    runs: Vec<serde_json::Value>,
    #[serde(default)]
    lockouts: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryResponse {
    #[serde(rename = "generatedAtIso")]
    pub generated_at_iso: String,
    pub entries: Vec<DungeonHistory>,
}

/// Dungeon history and cooldowns persisted as a single JSON document,
/// rewritten after every change.
pub struct FileHistoryStore {
    file_path: PathBuf,
    runs: Vec<DungeonHistory>,
    lockouts: HashMap<(String, String), Lockout>,
}

impl FileHistoryStore {
    pub fn new(file_path: PathBuf) -> Self {
        let (runs, lockouts) = load_store(&file_path);
        Self {
            file_path,
            runs,
            lockouts,
        }
    }

    pub fn runs(&self) -> &[DungeonHistory] {
        &self.runs
    }

    /// Most recent runs first, optionally only those `player_id` took part in.
    pub fn build_response(&self, player_id: Option<&str>, requested_limit: Option<usize>) -> HistoryResponse {
        let limit = requested_limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let entries = self
            .runs
            .iter()
            .rev()
            .filter(|run| {
                player_id.map_or(true, |player_id| {
                    run.participants
                        .iter()
                        .any(|participant| participant.player_id == player_id)
                })
            })
            .take(limit)
            .cloned()
            .collect();
        HistoryResponse {
            generated_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            entries,
        }
    }

    fn save(&self) {
        if let Some(parent) = self.file_path.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                emit_log(
                    "error",
                    "history_store_mkdir_failed",
                    json!({ "path": parent.display().to_string(), "error": error.to_string() }),
                );
                return;
            }
        }

        let mut lockouts: Vec<&Lockout> = self.lockouts.values().collect();
        lockouts.sort_by(|a, b| (&a.player_id, &a.timer).cmp(&(&b.player_id, &b.timer)));
        let payload = HistoryStoreFile {
            version: STORE_VERSION,
            saved_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            runs: &self.runs,
            lockouts,
        };
        let text = match serde_json::to_string_pretty(&payload) {
            Ok(text) => text,
            Err(error) => {
                emit_log(
                    "error",
                    "history_store_serialize_failed",
                    json!({ "path": self.file_path.display().to_string(), "error": error.to_string() }),
                );
                return;
            }
        };
        if let Err(error) = fs::write(&self.file_path, text) {
            emit_log(
                "error",
                "history_store_write_failed",
                json!({ "path": self.file_path.display().to_string(), "error": error.to_string() }),
            );
        }
    }
}

impl HistoryStore for FileHistoryStore {
    fn record_run(&mut self, history: DungeonHistory) {
        self.runs.push(history);
        self.save();
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
        self.save();
    }
}

type LoadedStore = (Vec<DungeonHistory>, HashMap<(String, String), Lockout>);

fn load_store(path: &Path) -> LoadedStore {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn_load(path, "read_failed", &error.to_string());
            }
            return Default::default();
        }
    };
    let parsed = match serde_json::from_str::<HistoryStoreFileRaw>(&text) {
        Ok(value) if value.version == STORE_VERSION => value,
        Ok(value) => {
            warn_load(path, "unsupported_version", &value.version.to_string());
            return Default::default();
        }
        Err(error) => {
            warn_load(path, "parse_failed", &error.to_string());
            return Default::default();
        }
    };

    let mut runs = Vec::new();
    for raw in parsed.runs {
        match serde_json::from_value::<DungeonHistory>(raw) {
            Ok(run) => runs.push(run),
            Err(error) => warn_load(path, "run_skipped", &error.to_string()),
        }
    }
    runs.sort_by_key(|run| run.resolved_at_ms);

    let mut lockouts = HashMap::new();
    for raw in parsed.lockouts {
        let lockout = match serde_json::from_value::<Lockout>(raw) {
            Ok(lockout) => lockout,
            Err(error) => {
                warn_load(path, "lockout_skipped", &error.to_string());
                continue;
            }
        };
        if lockout.player_id.trim().is_empty() {
            continue;
        }
        let key = (lockout.player_id.clone(), lockout.timer.clone());
        match lockouts.get(&key) {
            Some(Lockout { last_used_ms, .. }) if *last_used_ms >= lockout.last_used_ms => {}
            _ => {
                lockouts.insert(key, lockout);
            }
        }
    }

    (runs, lockouts)
}

fn warn_load(path: &Path, reason: &str, error: &str) {
    emit_log(
        "warn",
        "history_store_load",
        json!({ "path": path.display().to_string(), "reason": reason, "error": error }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DungeonParticipant, DungeonRun, PartyId};

    fn temp_file(name: &str) -> PathBuf {
        let unique = format!(
            "{}-{}-{}",
            name,
            std::process::id(),
            rand::random::<u32>()
        );
        std::env::temp_dir().join(unique).join("history.json")
    }

    fn history(party: u64, resolved_at_ms: u64, players: &[&str]) -> DungeonHistory {
        DungeonHistory {
            party_id: PartyId(party),
            resolved_at_ms,
            is_queue_group: false,
            success: true,
            run: DungeonRun::new(1, 1),
            participants: players
                .iter()
                .map(|player| DungeonParticipant {
                    player_id: player.to_string(),
                    wait_time_ms: 0,
                    experience: 35,
                    currency: 75,
                    item_id: None,
                    pet_id: None,
                })
                .collect(),
        }
    }

    fn cleanup(path: &Path) {
        let _ = fs::remove_file(path);
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn runs_and_lockouts_survive_reload() {
        let path = temp_file("history-store-reload");
        let mut store = FileHistoryStore::new(path.clone());
        store.record_run(history(1, 100, &["alice", "bob"]));
        store.save_lockout(Lockout {
            player_id: "alice".to_string(),
            timer: "GroupFinder".to_string(),
            last_used_ms: 100,
        });

        let reloaded = FileHistoryStore::new(path.clone());
        assert_eq!(reloaded.runs().len(), 1);
        assert_eq!(reloaded.runs()[0].participants.len(), 2);
        let lockout = reloaded.lockout("alice", "GroupFinder").expect("lockout");
        assert_eq!(lockout.last_used_ms, 100);
        assert!(reloaded.lockout("bob", "GroupFinder").is_none());

        cleanup(&path);
    }

    #[test]
    fn missing_or_corrupt_file_starts_empty() {
        let path = temp_file("history-store-corrupt");
        assert!(FileHistoryStore::new(path.clone()).runs().is_empty());

        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        fs::write(&path, "{ not json").expect("write file");
        assert!(FileHistoryStore::new(path.clone()).runs().is_empty());

        fs::write(&path, r#"{ "version": 9, "runs": [] }"#).expect("write file");
        assert!(FileHistoryStore::new(path.clone()).runs().is_empty());

        cleanup(&path);
    }

    #[test]
    fn load_skips_broken_entries_and_keeps_latest_lockout() {
        let path = temp_file("history-store-partial");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        let raw = r#"{
  "version": 1,
  "runs": [
    { "partyId": 3, "resolvedAtMs": 50, "isQueueGroup": true, "success": false,
      "run": { "dungeonId": 1, "modeId": 1 }, "participants": [] },
    { "partyId": "broken" }
  ],
  "lockouts": [
    { "playerId": "alice", "timer": "GroupFinder", "lastUsedMs": 10 },
    { "playerId": "alice", "timer": "GroupFinder", "lastUsedMs": 30 },
    { "playerId": "", "timer": "GroupFinder", "lastUsedMs": 99 },
    { "playerId": "bob" }
  ]
}"#;
        fs::write(&path, raw).expect("write file");

        let store = FileHistoryStore::new(path.clone());
        assert_eq!(store.runs().len(), 1);
        assert!(store.runs()[0].is_queue_group);
        let lockout = store.lockout("alice", "GroupFinder").expect("lockout");
        assert_eq!(lockout.last_used_ms, 30);
        assert!(store.lockout("bob", "GroupFinder").is_none());

        cleanup(&path);
    }

    #[test]
    fn build_response_is_newest_first_and_filtered() {
        let path = temp_file("history-store-response");
        let mut store = FileHistoryStore::new(path.clone());
        store.record_run(history(1, 100, &["alice"]));
        store.record_run(history(2, 200, &["bob"]));
        store.record_run(history(3, 300, &["alice", "bob"]));

        let all = store.build_response(None, None);
        let order: Vec<u64> = all.entries.iter().map(|run| run.resolved_at_ms).collect();
        assert_eq!(order, vec![300, 200, 100]);

        let alice = store.build_response(Some("alice"), Some(1));
        assert_eq!(alice.entries.len(), 1);
        assert_eq!(alice.entries[0].party_id, PartyId(3));
        assert_eq!(store.build_response(None, Some(0)).entries.len(), 1);

        cleanup(&path);
    }
}
