use serde_json::{Map, Value};

use crate::types::PartyId;

/// A dungeon picked by id with an optional mode flag (`"n"`, `"h"`, ...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRequest {
    pub dungeon_id: u32,
    pub mode: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    Hello {
        name: String,
        reconnect_token: Option<String>,
        level: Option<i64>,
        class_id: Option<i64>,
    },
    CreateParty,
    Invite {
        player_id: String,
    },
    AcceptInvite {
        party_id: PartyId,
    },
    DeclineInvite {
        party_id: PartyId,
    },
    LeaveParty,
    Ready,
    Unready,
    Promote {
        player_id: String,
    },
    Disband,
    StartDungeon {
        run: RunRequest,
    },
    Queue {
        runs: Vec<RunRequest>,
    },
    Dequeue,
    Ping {
        t: f64,
    },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "hello" => {
            let name = object.get("name")?.as_str()?.to_string();
            let reconnect_token = match object.get("reconnectToken") {
                None => None,
                Some(value) => Some(value.as_str()?.to_string()),
            };
            let level = parse_optional_i64(object.get("level"))?;
            let class_id = parse_optional_i64(object.get("classId"))?;
            Some(ParsedClientMessage::Hello {
                name,
                reconnect_token,
                level,
                class_id,
            })
        }
        "create_party" => Some(ParsedClientMessage::CreateParty),
        "invite" => Some(ParsedClientMessage::Invite {
            player_id: parse_player_id(object)?,
        }),
        "accept_invite" => Some(ParsedClientMessage::AcceptInvite {
            party_id: parse_party_id(object.get("partyId")?)?,
        }),
        "decline_invite" => Some(ParsedClientMessage::DeclineInvite {
            party_id: parse_party_id(object.get("partyId")?)?,
        }),
        "leave_party" => Some(ParsedClientMessage::LeaveParty),
        "ready" => Some(ParsedClientMessage::Ready),
        "unready" => Some(ParsedClientMessage::Unready),
        "promote" => Some(ParsedClientMessage::Promote {
            player_id: parse_player_id(object)?,
        }),
        "disband" => Some(ParsedClientMessage::Disband),
        "start_dungeon" => Some(ParsedClientMessage::StartDungeon {
            run: parse_run_request(object)?,
        }),
        "queue" => {
            let runs = match object.get("runs") {
                None => Vec::new(),
                Some(value) => value
                    .as_array()?
                    .iter()
                    .map(|run| parse_run_request(run.as_object()?))
                    .collect::<Option<Vec<_>>>()?,
            };
            Some(ParsedClientMessage::Queue { runs })
        }
        "dequeue" => Some(ParsedClientMessage::Dequeue),
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_player_id(object: &Map<String, Value>) -> Option<String> {
    let player_id = object.get("playerId")?.as_str()?.trim();
    if player_id.is_empty() {
        return None;
    }
    Some(player_id.to_string())
}

fn parse_party_id(value: &Value) -> Option<PartyId> {
    if let Some(id) = value.as_u64() {
        return Some(PartyId(id));
    }
    let raw = value.as_str()?;
    let digits = raw.strip_prefix("party_").unwrap_or(raw);
    digits.parse::<u64>().ok().map(PartyId)
}

fn parse_run_request(object: &Map<String, Value>) -> Option<RunRequest> {
    let dungeon_id = u32::try_from(object.get("dungeonId")?.as_u64()?).ok()?;
    let mode = match object.get("mode") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_str()?.trim().to_ascii_lowercase()),
    };
    Some(RunRequest { dungeon_id, mode })
}

fn parse_optional_i64(value: Option<&Value>) -> Option<Option<i64>> {
    const MAX_SAFE_INTEGER_F64: f64 = 9_007_199_254_740_991.0;

    let Some(value) = value else {
        return Some(None);
    };
    if let Some(number) = value.as_i64() {
        return Some(Some(number));
    }
    if let Some(number) = value.as_u64() {
        return i64::try_from(number).ok().map(Some);
    }
    if let Some(number) = value.as_f64() {
        if number.is_finite() {
            let floored = number.floor();
            if floored.abs() > MAX_SAFE_INTEGER_F64 {
                return None;
            }
            return Some(Some(floored as i64));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hello_message() {
        let parsed = parse_client_message(r#"{"type":"hello","name":"A","level":7,"classId":2}"#)
            .expect("hello message should parse");
        assert_eq!(
            parsed,
            ParsedClientMessage::Hello {
                name: "A".to_string(),
                reconnect_token: None,
                level: Some(7),
                class_id: Some(2),
            }
        );
    }

    #[test]
    fn parse_hello_floors_level_and_rejects_bad_types() {
        let parsed = parse_client_message(r#"{"type":"hello","name":"A","level":4.8}"#);
        assert!(matches!(
            parsed,
            Some(ParsedClientMessage::Hello { level: Some(4), .. })
        ));
        assert!(parse_client_message(r#"{"type":"hello","name":"A","level":"high"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"hello","name":"A","level":1e100}"#).is_none());
        assert!(parse_client_message(r#"{"type":"hello"}"#).is_none());
    }

    #[test]
    fn party_ids_accept_numbers_and_display_form() {
        assert_eq!(
            parse_client_message(r#"{"type":"accept_invite","partyId":4}"#),
            Some(ParsedClientMessage::AcceptInvite {
                party_id: PartyId(4)
            })
        );
        assert_eq!(
            parse_client_message(r#"{"type":"decline_invite","partyId":"party_9"}"#),
            Some(ParsedClientMessage::DeclineInvite {
                party_id: PartyId(9)
            })
        );
        assert!(parse_client_message(r#"{"type":"accept_invite","partyId":"nine"}"#).is_none());
    }

    #[test]
    fn invite_requires_non_empty_player_id() {
        assert!(parse_client_message(r#"{"type":"invite","playerId":"  "}"#).is_none());
        assert_eq!(
            parse_client_message(r#"{"type":"promote","playerId":"player_2"}"#),
            Some(ParsedClientMessage::Promote {
                player_id: "player_2".to_string()
            })
        );
    }

    #[test]
    fn parse_start_dungeon_with_mode_flag() {
        let parsed =
            parse_client_message(r#"{"type":"start_dungeon","dungeonId":2,"mode":" H "}"#);
        assert_eq!(
            parsed,
            Some(ParsedClientMessage::StartDungeon {
                run: RunRequest {
                    dungeon_id: 2,
                    mode: Some("h".to_string()),
                }
            })
        );
        assert!(parse_client_message(r#"{"type":"start_dungeon"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"start_dungeon","dungeonId":-1}"#).is_none());
    }

    #[test]
    fn parse_queue_with_and_without_runs() {
        assert_eq!(
            parse_client_message(r#"{"type":"queue"}"#),
            Some(ParsedClientMessage::Queue { runs: Vec::new() })
        );
        let parsed = parse_client_message(
            r#"{"type":"queue","runs":[{"dungeonId":1},{"dungeonId":2,"mode":"h"}]}"#,
        );
        let Some(ParsedClientMessage::Queue { runs }) = parsed else {
            panic!("expected queue message");
        };
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].mode, None);
        assert_eq!(runs[1].mode.as_deref(), Some("h"));
        assert!(parse_client_message(r#"{"type":"queue","runs":[{"mode":"h"}]}"#).is_none());
    }

    #[test]
    fn unknown_type_and_non_finite_ping_are_rejected() {
        assert!(parse_client_message(r#"{"type":"teleport"}"#).is_none());
        assert!(parse_client_message("not json").is_none());
        assert!(matches!(
            parse_client_message(r#"{"type":"ping","t":12.5}"#),
            Some(ParsedClientMessage::Ping { .. })
        ));
    }
}
