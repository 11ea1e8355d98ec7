use clap::Parser;
use dungeon_party_server::constants::{MAX_CLASS_DUPLICATES, SCHEDULER_TICK_MS};
use dungeon_party_server::content::ContentCatalog;
use dungeon_party_server::engine::DungeonController;
use dungeon_party_server::memory::MemoryWorld;
use dungeon_party_server::providers::PlayerProvider;
use dungeon_party_server::rng::Rng;
use dungeon_party_server::settings::DungeonSettings;
use dungeon_party_server::types::DungeonEvent;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const CLASS_ROTATION: [u32; 5] = [1, 2, 3, 4, 5];
const STARTING_CURRENCY: u64 = 100_000;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    single: bool,
    #[arg(long)]
    players: Option<i32>,
    #[arg(long)]
    minutes: Option<i32>,
    #[arg(long)]
    party_size: Option<i32>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    players: usize,
    minutes: i32,
    #[serde(rename = "partySize")]
    party_size: usize,
    seed: u32,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    seed: u32,
    players: usize,
    minutes: i32,
    #[serde(rename = "partiesFormed")]
    parties_formed: usize,
    #[serde(rename = "groupsDissolved")]
    groups_dissolved: usize,
    #[serde(rename = "runsCompleted")]
    runs_completed: usize,
    #[serde(rename = "runsFailed")]
    runs_failed: usize,
    deaths: usize,
    #[serde(rename = "lootDrops")]
    loot_drops: usize,
    #[serde(rename = "petsFound")]
    pets_found: usize,
    #[serde(rename = "groupFinderBonuses")]
    group_finder_bonuses: usize,
    #[serde(rename = "averageWaitMs")]
    average_wait_ms: u64,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    tick: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioRunResult {
    #[serde(flatten)]
    result: ScenarioResultLine,
    #[serde(rename = "anomalyRecords")]
    anomaly_records: Vec<AnomalyRecord>,
    finished_tick: u64,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "outcomeCounts")]
    outcome_counts: BTreeMap<String, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
    details: Value,
}

#[derive(Default)]
struct EventTally {
    parties_formed: usize,
    groups_dissolved: usize,
    runs_failed: usize,
    deaths: usize,
    loot_drops: usize,
    pets_found: usize,
    group_finder_bonuses: usize,
}

impl EventTally {
    fn record(&mut self, event: &DungeonEvent) {
        match event {
            DungeonEvent::PartyFound { .. } => self.parties_formed += 1,
            DungeonEvent::PartyDisbanded { .. } => self.groups_dissolved += 1,
            DungeonEvent::RunFailed { .. } => self.runs_failed += 1,
            DungeonEvent::PlayerDied { .. } => self.deaths += 1,
            DungeonEvent::PetFound { .. } => self.pets_found += 1,
            DungeonEvent::RunCompleted {
                loot,
                group_finder_bonus,
                ..
            } => {
                if loot.is_some() {
                    self.loot_drops += 1;
                }
                if *group_finder_bonus {
                    self.group_finder_bonuses += 1;
                }
            }
            _ => {}
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let scenarios = resolve_scenarios(&cli);
    let run_started_at_ms = now_ms();
    let seed_hint = scenarios.first().map(|scenario| scenario.seed).unwrap_or(0);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed_hint, run_started_at_ms));
    let catalog = match ContentCatalog::builtin() {
        Ok(catalog) => catalog,
        Err(error) => {
            emit_log(
                "error",
                "content_load_failed",
                &match_id,
                None,
                None,
                None,
                json!({ "error": error.to_string() }),
            );
            std::process::exit(2);
        }
    };
    let mut has_anomaly = false;
    let mut scenario_results = Vec::new();
    let mut outcome_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_anomalies = 0usize;

    for scenario in scenarios {
        emit_log(
            "info",
            "scenario_started",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            None,
            json!({
                "players": scenario.players,
                "minutes": scenario.minutes,
                "partySize": scenario.party_size,
            }),
        );
        let scenario_run = run_scenario(&scenario, &catalog);

        for anomaly in &scenario_run.anomaly_records {
            emit_log(
                "warn",
                "anomaly_detected",
                &match_id,
                Some(&scenario.name),
                Some(scenario.seed),
                Some(anomaly.tick),
                json!({ "message": anomaly.message }),
            );
        }

        if !scenario_run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += scenario_run.anomaly_records.len();
        *outcome_counts.entry("completed".to_string()).or_insert(0) +=
            scenario_run.result.runs_completed;
        *outcome_counts.entry("failed".to_string()).or_insert(0) +=
            scenario_run.result.runs_failed;

        emit_log(
            "info",
            "scenario_finished",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            Some(scenario_run.finished_tick),
            json!({
                "partiesFormed": scenario_run.result.parties_formed,
                "runsCompleted": scenario_run.result.runs_completed,
                "runsFailed": scenario_run.result.runs_failed,
                "anomalyCount": scenario_run.anomaly_records.len(),
            }),
        );

        match serde_json::to_string(&scenario_run.result) {
            Ok(line) => println!("{line}"),
            Err(error) => eprintln!("[simulate] failed to serialize scenario result: {error}"),
        }
        scenario_results.push(scenario_run.result);
    }

    let summary = build_run_summary(
        match_id.clone(),
        run_started_at_ms,
        now_ms(),
        scenario_results,
        outcome_counts,
        total_anomalies,
    );

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &match_id,
                None,
                None,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &match_id,
        None,
        None,
        None,
        json!({
            "scenarioCount": summary.scenario_count,
            "anomalyCount": summary.anomaly_count,
            "outcomeCounts": summary.outcome_counts,
            "summaryOut": summary_out_written,
        }),
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

/// Every player re-queues for any eligible dungeon whenever idle; the
/// scheduler runs once per simulated second.
fn run_scenario(scenario: &Scenario, catalog: &ContentCatalog) -> ScenarioRunResult {
    let settings = DungeonSettings {
        party_size: scenario.party_size,
        ..DungeonSettings::default()
    }
    .normalized();
    let mut world = MemoryWorld::new(catalog, settings.max_level);
    let player_ids: Vec<String> = (0..scenario.players)
        .map(|idx| {
            let id = format!("sim_{}", idx + 1);
            let level = 3 + (idx as u32 % 12);
            let class_id = CLASS_ROTATION[idx % CLASS_ROTATION.len()];
            world
                .players
                .add_player(&id, &format!("Sim-{:02}", idx + 1), level, class_id, STARTING_CURRENCY);
            id
        })
        .collect();
    let mut controller =
        DungeonController::new(settings, catalog.clone(), Box::new(Rng::new(scenario.seed)));

    let mut tally = EventTally::default();
    let mut anomalies = Vec::new();
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let total_ticks = scenario.minutes.max(1) as u64 * 60_000 / SCHEDULER_TICK_MS;
    let mut tick = 0u64;

    while tick < total_ticks {
        tick += 1;
        let now_ms = tick * SCHEDULER_TICK_MS;
        for player_id in &player_ids {
            let idle = controller.parties().party_for_player(player_id).is_none()
                && !controller.group_finder().is_player_queued(player_id);
            if idle {
                controller.queue_player(player_id, &[], now_ms, &mut world.providers());
            }
        }
        controller.process(now_ms, &mut world.providers());
        for event in controller.drain_events() {
            tally.record(&event);
        }
        for message in collect_anomalies(&controller, &world) {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                tick,
                message,
            );
        }
    }

    let runs_completed = world.history.runs.iter().filter(|run| run.success).count();
    let waits: Vec<u64> = world
        .history
        .runs
        .iter()
        .flat_map(|run| run.participants.iter().map(|participant| participant.wait_time_ms))
        .collect();
    let average_wait_ms = if waits.is_empty() {
        0
    } else {
        waits.iter().sum::<u64>() / waits.len() as u64
    };

    ScenarioRunResult {
        result: ScenarioResultLine {
            scenario: scenario.name.clone(),
            seed: scenario.seed,
            players: scenario.players,
            minutes: scenario.minutes,
            parties_formed: tally.parties_formed,
            groups_dissolved: tally.groups_dissolved,
            runs_completed,
            runs_failed: tally.runs_failed,
            deaths: tally.deaths,
            loot_drops: tally.loot_drops,
            pets_found: tally.pets_found,
            group_finder_bonuses: tally.group_finder_bonuses,
            average_wait_ms,
            anomalies,
        },
        anomaly_records,
        finished_tick: tick,
    }
}

fn collect_anomalies(controller: &DungeonController, world: &MemoryWorld) -> Vec<String> {
    let mut anomalies = Vec::new();
    let party_size = controller.settings().party_size;
    let mut seen_members: HashMap<&str, usize> = HashMap::new();

    for party in controller.parties().parties() {
        if party.members.len() > party_size {
            anomalies.push(format!(
                "party over capacity: {} has {}",
                party.id,
                party.members.len()
            ));
        }
        for member in &party.members {
            *seen_members.entry(member.as_str()).or_insert(0) += 1;
            if controller.group_finder().is_player_queued(member) {
                anomalies.push(format!("queued player is in a party: {member}"));
            }
        }
        if party.is_queue_group {
            let mut class_counts: HashMap<u32, usize> = HashMap::new();
            for member in &party.members {
                if let Some(profile) = world.players.player(member) {
                    *class_counts.entry(profile.class_id).or_insert(0) += 1;
                }
            }
            if class_counts.values().any(|count| *count > MAX_CLASS_DUPLICATES) {
                anomalies.push(format!("queue group stacks one class: {}", party.id));
            }
        }
    }

    for (member, count) in seen_members {
        if count > 1 {
            anomalies.push(format!("player in {count} parties: {member}"));
        }
    }
    anomalies
}

fn resolve_scenarios(cli: &Cli) -> Vec<Scenario> {
    let seed = normalize_seed(cli.seed.unwrap_or_else(now_ms));
    let party_size = clamp_i32(cli.party_size.unwrap_or(3), 1, 10) as usize;

    if cli.single || cli.players.is_some() || cli.minutes.is_some() {
        let players = clamp_i32(cli.players.unwrap_or(6), 1, 500);
        return vec![Scenario {
            name: format!("custom-p{players}"),
            players: players as usize,
            minutes: clamp_i32(cli.minutes.unwrap_or(30), 1, 24 * 60),
            party_size,
            seed,
        }];
    }

    vec![
        Scenario {
            name: "quick-check-p6".to_string(),
            players: 6,
            minutes: 30,
            party_size,
            seed,
        },
        Scenario {
            name: "busy-queue-p24".to_string(),
            players: 24,
            minutes: 120,
            party_size,
            seed: normalize_seed(seed as u64 + 1),
        },
    ]
}

fn clamp_i32(value: i32, min: i32, max: i32) -> i32 {
    value.clamp(min, max)
}

fn normalize_seed(seed: u64) -> u32 {
    seed as u32
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    tick: u64,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        tick,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_match_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    match_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    scenarios: Vec<ScenarioResultLine>,
    outcome_counts: BTreeMap<String, usize>,
    anomaly_count: usize,
) -> RunSummary {
    RunSummary {
        match_id,
        started_at_ms,
        finished_at_ms,
        scenario_count: scenarios.len(),
        anomaly_count,
        outcome_counts,
        scenarios,
    }
}

fn emit_log(
    level: &str,
    event: &str,
    match_id: &str,
    scenario: Option<&str>,
    seed: Option<u32>,
    tick: Option<u64>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        match_id: match_id.to_string(),
        scenario: scenario.map(|value| value.to_string()),
        seed,
        tick,
        details,
    };
    match serde_json::to_string(&log_line) {
        Ok(text) => eprintln!("{text}"),
        Err(error) => eprintln!("[simulate] failed to serialize {event}: {error}"),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(players: usize, minutes: i32, seed: u32) -> Scenario {
        Scenario {
            name: "test".to_string(),
            players,
            minutes,
            party_size: 3,
            seed,
        }
    }

    #[test]
    fn default_match_id_contains_seed_and_timestamp() {
        assert_eq!(default_match_id(42, 123456789), "sim-42-123456789");
    }

    #[test]
    fn scenario_runs_dungeons_without_anomalies() {
        let catalog = ContentCatalog::builtin().expect("builtin content");
        let run = run_scenario(&scenario(6, 20, 42), &catalog);
        assert!(run.result.anomalies.is_empty(), "{:?}", run.result.anomalies);
        assert!(run.result.parties_formed > 0);
        assert!(run.result.runs_completed + run.result.runs_failed > 0);
        assert_eq!(run.finished_tick, 20 * 60);
    }

    #[test]
    fn same_seed_gives_same_result_line() {
        let catalog = ContentCatalog::builtin().expect("builtin content");
        let first = run_scenario(&scenario(9, 15, 7), &catalog);
        let second = run_scenario(&scenario(9, 15, 7), &catalog);
        assert_eq!(
            serde_json::to_string(&first.result).expect("serialize"),
            serde_json::to_string(&second.result).expect("serialize"),
        );
    }

    #[test]
    fn write_summary_returns_error_when_parent_does_not_exist() {
        let target = std::env::temp_dir()
            .join(format!("dungeon-sim-missing-{}", now_ms()))
            .join("summary.json");
        let summary = build_run_summary(
            "sim-1-1".to_string(),
            1,
            2,
            Vec::new(),
            BTreeMap::new(),
            0,
        );
        assert!(write_summary(&target, &summary).is_err());
    }

    #[test]
    fn push_anomaly_keeps_records_and_deduplicates_summary_messages() {
        let mut anomalies = Vec::new();
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        push_anomaly(&mut anomalies, &mut records, &mut seen, 10, "same".to_string());
        push_anomaly(&mut anomalies, &mut records, &mut seen, 11, "same".to_string());

        assert_eq!(anomalies.len(), 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].tick, 11);
    }
}
