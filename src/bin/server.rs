use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use dungeon_party_server::constants::SCHEDULER_TICK_MS;
use dungeon_party_server::content::ContentCatalog;
use dungeon_party_server::engine::DungeonController;
use dungeon_party_server::history_store::FileHistoryStore;
use dungeon_party_server::log::{emit_log, wall_clock_ms};
use dungeon_party_server::memory::{MemoryEquipment, MemoryPets, MemoryPlayers};
use dungeon_party_server::providers::{PlayerProvider, Providers};
use dungeon_party_server::rng::{RollSource, Rng};
use dungeon_party_server::server_protocol::{parse_client_message, ParsedClientMessage, RunRequest};
use dungeon_party_server::server_utils::{
    normalize_class_id, normalize_level, parse_history_limit, player_order_key, sanitize_name,
    DEFAULT_STARTING_CURRENCY,
};
use dungeon_party_server::settings::DungeonSettings;
use dungeon_party_server::types::{DungeonRun, PartyId};
use futures_util::{SinkExt, StreamExt};
use rand::distr::Alphanumeric;
use rand::Rng as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone, Debug)]
struct Session {
    id: String,
    reconnect_token: String,
    connected: bool,
}

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
    player_id: Option<String>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    sessions: HashMap<String, Session>,
    active_client_by_player_id: HashMap<String, String>,
    controller: DungeonController,
    players: MemoryPlayers,
    equipment: MemoryEquipment,
    pets: MemoryPets,
    history: FileHistoryStore,
}

impl ServerState {
    fn new(
        settings: DungeonSettings,
        catalog: ContentCatalog,
        rng: Box<dyn RollSource + Send>,
        history: FileHistoryStore,
    ) -> Self {
        let players = MemoryPlayers::new(settings.max_level);
        let equipment = MemoryEquipment::from_catalog(&catalog);
        Self {
            clients: HashMap::new(),
            sessions: HashMap::new(),
            active_client_by_player_id: HashMap::new(),
            controller: DungeonController::new(settings, catalog, rng),
            players,
            equipment,
            pets: MemoryPets::with_defaults(),
            history,
        }
    }

    fn engine(&mut self) -> (&mut DungeonController, Providers<'_>) {
        (
            &mut self.controller,
            Providers {
                players: &mut self.players,
                equipment: &mut self.equipment,
                pets: &mut self.pets,
                history: &mut self.history,
            },
        )
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<String>,
    #[serde(rename = "playerId")]
    player_id: Option<String>,
}

#[tokio::main]
async fn main() {
    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let catalog = match std::env::var("CONTENT_PATH") {
        Ok(path) => ContentCatalog::load(&PathBuf::from(path)),
        Err(_) => ContentCatalog::builtin(),
    };
    let catalog = match catalog {
        Ok(catalog) => catalog,
        Err(error) => {
            emit_log("error", "content_load_failed", json!({ "error": error.to_string() }));
            std::process::exit(1);
        }
    };

    let settings = match std::env::var("SETTINGS_PATH") {
        Ok(path) => match DungeonSettings::load(&PathBuf::from(path)) {
            Ok(settings) => settings,
            Err(error) => {
                emit_log("error", "settings_load_failed", json!({ "error": error.to_string() }));
                std::process::exit(1);
            }
        },
        Err(_) => DungeonSettings::default(),
    }
    .apply_env();

    let history_path = std::env::var("HISTORY_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".data/history.json"));
    let rng: Box<dyn RollSource + Send> = match std::env::var("SEED")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
    {
        Some(seed) => Box::new(Rng::new(seed)),
        None => Box::new(Rng::from_entropy()),
    };

    emit_log(
        "info",
        "server_config",
        json!({
            "port": port,
            "settings": settings,
            "historyPath": history_path.display().to_string(),
            "dungeons": catalog.dungeons().len(),
        }),
    );

    let state = Arc::new(Mutex::new(ServerState::new(
        settings,
        catalog,
        rng,
        FileHistoryStore::new(history_path),
    )));
    start_scheduler(state.clone());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/dungeons", get(dungeons_handler))
        .route("/api/parties", get(parties_handler))
        .route("/api/queue", get(queue_handler))
        .route("/api/history", get(history_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        emit_log(
            "info",
            "static_root",
            json!({ "path": static_dir.to_string_lossy() }),
        );
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind server socket");

    emit_log("info", "server_listening", json!({ "port": port }));
    axum::serve(listener, app)
        .await
        .expect("server runtime failed");
}

fn resolve_static_dir() -> Option<PathBuf> {
    let raw = std::env::var("STATIC_DIR").ok()?;
    let path = PathBuf::from(raw);
    path.join("index.html").is_file().then_some(path)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn dungeons_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.lock().await;
    let catalog = guard.controller.catalog();
    let runs: Vec<Value> = catalog
        .runs()
        .into_iter()
        .map(|run| {
            let range = catalog.level_range(run);
            json!({
                "run": run,
                "name": catalog.run_name(run),
                "minLevel": range.map(|range| range.min_level),
                "maxLevel": range.map(|range| range.max_level),
            })
        })
        .collect();
    Json(json!({ "runs": runs, "modes": catalog.modes() }))
}

async fn parties_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(guard.controller.party_views())
}

async fn queue_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(guard.controller.queue_views())
}

async fn history_handler(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(guard.history.build_response(
        query.player_id.as_deref(),
        parse_history_limit(query.limit.as_deref()),
    ))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        guard.clients.insert(
            client_id.clone(),
            ClientContext {
                tx: tx.clone(),
                player_id: None,
            },
        );
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(&state, &client_id, raw.as_str()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = std::str::from_utf8(&raw) {
                    handle_client_message(&state, &client_id, text).await;
                } else {
                    let mut guard = state.lock().await;
                    send_error(&mut guard, &client_id, "invalid utf8 message");
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    {
        let mut guard = state.lock().await;
        disconnect_client_internal(&mut guard, &client_id);
        broadcast_world(&mut guard);
    }
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: &SharedState, client_id: &str, raw: &str) {
    let mut guard = state.lock().await;
    let Some(message) = parse_client_message(raw) else {
        send_error(&mut guard, client_id, "invalid message");
        return;
    };

    match message {
        ParsedClientMessage::Hello {
            name,
            reconnect_token,
            level,
            class_id,
        } => {
            handle_hello(&mut guard, client_id, name, reconnect_token, level, class_id);
        }
        ParsedClientMessage::Ping { t } => {
            send_to_client(
                &mut guard,
                client_id,
                &json!({ "type": "pong", "t": t }),
                QueuePolicy::DisconnectOnFull,
            );
        }
        command => {
            let player_id = guard
                .clients
                .get(client_id)
                .and_then(|ctx| ctx.player_id.clone());
            let Some(player_id) = player_id else {
                send_error(&mut guard, client_id, "send hello first");
                return;
            };
            match apply_command(&mut guard, &player_id, command, wall_clock_ms()) {
                Ok(ack) => {
                    send_to_client(
                        &mut guard,
                        client_id,
                        &json!({ "type": "ack", "result": ack }),
                        QueuePolicy::DisconnectOnFull,
                    );
                    flush_events(&mut guard);
                    broadcast_world(&mut guard);
                }
                Err(reason) => send_error(&mut guard, client_id, &reason),
            }
        }
    }
}

fn handle_hello(
    state: &mut ServerState,
    client_id: &str,
    requested_name: String,
    reconnect_token: Option<String>,
    level: Option<i64>,
    class_id: Option<i64>,
) {
    let existing = reconnect_token.as_deref().and_then(|token| {
        state
            .sessions
            .values()
            .find(|session| session.reconnect_token == token)
            .map(|session| session.id.clone())
    });

    let player_id = match existing {
        Some(player_id) => player_id,
        None => {
            let player_id = make_id("player");
            let max_level = state.controller.settings().max_level;
            state.players.add_player(
                &player_id,
                &sanitize_name(&requested_name),
                normalize_level(level, max_level),
                normalize_class_id(class_id),
                DEFAULT_STARTING_CURRENCY,
            );
            state.sessions.insert(
                player_id.clone(),
                Session {
                    id: player_id.clone(),
                    reconnect_token: make_reconnect_token(),
                    connected: true,
                },
            );
            emit_log("info", "player_joined", json!({ "playerId": player_id }));
            player_id
        }
    };

    bind_client_to_player(state, client_id, &player_id);
    if let Some(session) = state.sessions.get_mut(&player_id) {
        session.connected = true;
    }

    let token = state
        .sessions
        .get(&player_id)
        .map(|session| session.reconnect_token.clone());
    let profile = state.players.player(&player_id);
    let eligible = profile
        .as_ref()
        .map(|profile| state.controller.eligible_runs(profile))
        .unwrap_or_default();
    send_to_client(
        state,
        client_id,
        &json!({
            "type": "welcome",
            "playerId": player_id,
            "reconnectToken": token,
            "profile": profile.map(|profile| json!({
                "name": profile.name,
                "level": profile.level,
                "experience": profile.experience,
                "currency": profile.currency,
                "classId": profile.class_id,
            })),
            "eligibleRuns": eligible,
        }),
        QueuePolicy::DisconnectOnFull,
    );
    broadcast_world(state);
}

/// Applies one player command to the dungeon controller.
fn apply_command(
    state: &mut ServerState,
    player_id: &str,
    command: ParsedClientMessage,
    now_ms: u64,
) -> Result<Value, String> {
    match command {
        ParsedClientMessage::CreateParty => state
            .controller
            .create_party(player_id)
            .map(|party_id| json!({ "partyId": party_id }))
            .ok_or_else(|| "already in a party or queued".to_string()),
        ParsedClientMessage::Invite { player_id: target } => {
            let party_id = led_party(state, player_id)?;
            if !state.sessions.contains_key(&target) {
                return Err("unknown player".to_string());
            }
            check(state.controller.invite_player(party_id, &target), "cannot invite player")?;
            notify_player(
                state,
                &target,
                &json!({ "type": "invited", "partyId": party_id, "from": player_id }),
            );
            Ok(json!({ "partyId": party_id, "invited": target }))
        }
        ParsedClientMessage::AcceptInvite { party_id } => {
            check(
                state.controller.accept_invite(party_id, player_id),
                "no pending invite",
            )?;
            Ok(json!({ "partyId": party_id }))
        }
        ParsedClientMessage::DeclineInvite { party_id } => {
            check(
                state.controller.parties_mut().decline_invite(party_id, player_id),
                "no pending invite",
            )?;
            Ok(json!({ "partyId": party_id }))
        }
        ParsedClientMessage::LeaveParty => {
            let party_id = member_party(state, player_id)?;
            check(
                state.controller.parties_mut().remove_player(party_id, player_id),
                "cannot leave a party mid-run",
            )?;
            Ok(json!({ "partyId": party_id }))
        }
        ParsedClientMessage::Ready => {
            let party_id = led_party(state, player_id)?;
            check(state.controller.parties_mut().set_ready(party_id), "party is not full")?;
            Ok(json!({ "partyId": party_id }))
        }
        ParsedClientMessage::Unready => {
            let party_id = led_party(state, player_id)?;
            check(state.controller.parties_mut().unset_ready(party_id), "party is not ready")?;
            Ok(json!({ "partyId": party_id }))
        }
        ParsedClientMessage::Promote { player_id: target } => {
            let party_id = led_party(state, player_id)?;
            check(
                state.controller.parties_mut().set_leader(party_id, &target),
                "player is not a member",
            )?;
            Ok(json!({ "partyId": party_id, "leader": target }))
        }
        ParsedClientMessage::Disband => {
            let party_id = led_party(state, player_id)?;
            check(
                state.controller.parties_mut().disband_party(party_id),
                "cannot disband a party mid-run",
            )?;
            Ok(json!({ "partyId": party_id }))
        }
        ParsedClientMessage::StartDungeon { run } => {
            let party_id = led_party(state, player_id)?;
            let run = resolve_run(&state.controller, &run)?;
            let (controller, mut providers) = state.engine();
            let result = controller.start_dungeon(party_id, Some(run), now_ms, &mut providers);
            if !result.ok {
                return Err(result.reason.unwrap_or_else(|| "cannot start".to_string()));
            }
            Ok(json!({ "partyId": party_id, "run": run }))
        }
        ParsedClientMessage::Queue { runs } => {
            let runs = runs
                .iter()
                .map(|run| resolve_run(&state.controller, run))
                .collect::<Result<Vec<_>, _>>()?;
            let (controller, mut providers) = state.engine();
            let result = controller.queue_player(player_id, &runs, now_ms, &mut providers);
            if !result.ok {
                return Err(result.reason.unwrap_or_else(|| "cannot queue".to_string()));
            }
            Ok(json!({ "queued": true, "partyId": result.party_id }))
        }
        ParsedClientMessage::Dequeue => {
            check(state.controller.dequeue_player(player_id), "not queued")?;
            Ok(json!({ "queued": false }))
        }
        ParsedClientMessage::Hello { .. } | ParsedClientMessage::Ping { .. } => {
            Err("unexpected message".to_string())
        }
    }
}

fn check(ok: bool, reason: &str) -> Result<(), String> {
    if ok {
        Ok(())
    } else {
        Err(reason.to_string())
    }
}

fn member_party(state: &ServerState, player_id: &str) -> Result<PartyId, String> {
    state
        .controller
        .parties()
        .party_for_player(player_id)
        .map(|party| party.id)
        .ok_or_else(|| "not in a party".to_string())
}

fn led_party(state: &ServerState, player_id: &str) -> Result<PartyId, String> {
    let party = state
        .controller
        .parties()
        .party_for_player(player_id)
        .ok_or_else(|| "not in a party".to_string())?;
    if !party.is_leader(player_id) {
        return Err("only the party leader can do that".to_string());
    }
    Ok(party.id)
}

fn resolve_run(controller: &DungeonController, request: &RunRequest) -> Result<DungeonRun, String> {
    controller
        .catalog()
        .resolve_run(request.dungeon_id, request.mode.as_deref())
        .ok_or_else(|| "unknown dungeon or mode".to_string())
}

fn disconnect_client_internal(state: &mut ServerState, client_id: &str) {
    let Some(context) = state.clients.remove(client_id) else {
        return;
    };
    let Some(bound_player_id) = context.player_id else {
        return;
    };
    if state
        .active_client_by_player_id
        .get(&bound_player_id)
        .map(|active| active != client_id)
        .unwrap_or(true)
    {
        return;
    }
    state.active_client_by_player_id.remove(&bound_player_id);

    if let Some(session) = state.sessions.get_mut(&bound_player_id) {
        session.connected = false;
    }
    if state.controller.dequeue_player(&bound_player_id) {
        emit_log(
            "info",
            "dequeued_on_disconnect",
            json!({ "playerId": bound_player_id }),
        );
    }
}

fn bind_client_to_player(state: &mut ServerState, client_id: &str, player_id: &str) {
    if let Some(old_client_id) = state.active_client_by_player_id.get(player_id).cloned() {
        if old_client_id != client_id {
            if let Some(old_client) = state.clients.get_mut(&old_client_id) {
                old_client.player_id = None;
                let _ = old_client.tx.try_send(OutboundMessage::Close {
                    code: 4001,
                    reason: "superseded by new connection".to_string(),
                });
            }
        }
    }

    let previous_player_id = state
        .clients
        .get(client_id)
        .and_then(|ctx| ctx.player_id.clone());
    if let Some(previous_player_id) = previous_player_id {
        if previous_player_id != player_id {
            state.active_client_by_player_id.remove(&previous_player_id);
        }
    }

    if let Some(ctx) = state.clients.get_mut(client_id) {
        ctx.player_id = Some(player_id.to_string());
    }
    state
        .active_client_by_player_id
        .insert(player_id.to_string(), client_id.to_string());
}

fn broadcast_world(state: &mut ServerState) {
    let mut sessions: Vec<&Session> = state.sessions.values().collect();
    sessions.sort_by_key(|session| player_order_key(&session.id));
    let players: Vec<Value> = sessions
        .iter()
        .filter_map(|session| {
            let profile = state.players.player(&session.id)?;
            Some(json!({
                "id": session.id,
                "name": profile.name,
                "level": profile.level,
                "classId": profile.class_id,
                "currency": profile.currency,
                "connected": session.connected,
            }))
        })
        .collect();

    let message = json!({
        "type": "world",
        "players": players,
        "parties": state.controller.party_views(),
        "queue": state.controller.queue_views(),
    });
    broadcast(state, &message, QueuePolicy::DropOnFull);
}

fn start_scheduler(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(SCHEDULER_TICK_MS));
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            run_scheduler_pass(&mut guard, wall_clock_ms());
        }
    });
}

fn run_scheduler_pass(state: &mut ServerState, now_ms: u64) {
    let (controller, mut providers) = state.engine();
    controller.process(now_ms, &mut providers);
    if flush_events(state) > 0 {
        broadcast_world(state);
    }
}

/// Broadcasts every pending dungeon event; returns how many were sent.
fn flush_events(state: &mut ServerState) -> usize {
    let events = state.controller.drain_events();
    let count = events.len();
    for event in events {
        broadcast(
            state,
            &json!({ "type": "dungeon_event", "event": event }),
            QueuePolicy::DisconnectOnFull,
        );
    }
    count
}

fn notify_player(state: &mut ServerState, player_id: &str, message: &Value) {
    if let Some(client_id) = state.active_client_by_player_id.get(player_id).cloned() {
        send_to_client(state, &client_id, message, QueuePolicy::DropOnFull);
    }
}

fn send_to_client(state: &mut ServerState, client_id: &str, message: &Value, policy: QueuePolicy) {
    let send_failed = if let Some(client) = state.clients.get(client_id) {
        client
            .tx
            .try_send(OutboundMessage::Text(message.to_string()))
            .is_err()
    } else {
        false
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        disconnect_client_internal(state, client_id);
    }
}

fn send_error(state: &mut ServerState, client_id: &str, message: &str) {
    send_to_client(
        state,
        client_id,
        &json!({ "type": "error", "message": message }),
        QueuePolicy::DisconnectOnFull,
    );
}

fn broadcast(state: &mut ServerState, message: &Value, policy: QueuePolicy) {
    let payload = message.to_string();
    let mut failed_clients = Vec::new();
    for (client_id, client) in &state.clients {
        if !can_receive_broadcast(state, client_id, client) {
            continue;
        }
        if client
            .tx
            .try_send(OutboundMessage::Text(payload.clone()))
            .is_err()
            && policy == QueuePolicy::DisconnectOnFull
        {
            failed_clients.push(client_id.clone());
        }
    }
    for client_id in failed_clients {
        disconnect_client_internal(state, &client_id);
    }
}

fn can_receive_broadcast(state: &ServerState, client_id: &str, client: &ClientContext) -> bool {
    let Some(player_id) = client.player_id.as_ref() else {
        return false;
    };
    state
        .active_client_by_player_id
        .get(player_id)
        .map(|id| id.as_str())
        == Some(client_id)
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn make_reconnect_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}
