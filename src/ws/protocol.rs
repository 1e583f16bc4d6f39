//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::ClientId;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Enter the matchmaking queue
    JoinQueue {
        #[serde(default)]
        name: Option<String>,
    },

    /// Accept a proposed match
    MatchAccepted { match_id: Uuid },

    /// Ready to play
    GameReady,

    /// Client-reported position
    Move { x: f64, y: f64 },

    /// Change display name
    SetName {
        #[serde(default)]
        name: Option<String>,
    },

    /// Client-asserted hit on another player
    Hit {
        target_id: ClientId,
        /// Requested damage, any JSON value (non-numbers fall back to the default)
        #[serde(default)]
        dmg: Option<serde_json::Value>,
    },

    /// Hitscan shot from (x, y) along (dx, dy)
    Shoot { x: f64, y: f64, dx: f64, dy: f64 },

    /// Ask for the match to start
    StartGame,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Welcome message after a session accepted the connection
    Welcome {
        session_id: ClientId,
        server_time: u64,
    },

    /// Two queued players were paired
    MatchFound {
        match_id: Uuid,
        /// Opponent display name
        opponent: String,
        opponent_id: ClientId,
    },

    /// Both players accepted, the battle is ready to join with this seat
    MatchStart { match_id: Uuid, seat: Uuid },

    /// A proposed match was dropped before both players accepted
    MatchCancelled { match_id: Uuid },

    /// Someone asked to start with enough members present
    GameStart { timestamp: u64 },

    /// Ready quorum reached
    GameCanStart { timestamp: u64 },

    /// Start refused, sent only to the requester
    StartBlocked { message: String },

    /// A shot for visual replay
    Shot {
        from_id: ClientId,
        x: f64,
        y: f64,
        dx: f64,
        dy: f64,
        hit_id: Option<ClientId>,
        hit_hp: Option<u32>,
    },

    /// Result of a client-reported hit
    HitResult {
        target_id: ClientId,
        dmg: u32,
        new_hp: u32,
    },

    /// Full state, sent to a member on its first sync
    State {
        tick: u64,
        players: BTreeMap<ClientId, PlayerSnapshot>,
    },

    /// Fields changed since the previous sync
    Patch {
        tick: u64,
        changed: BTreeMap<ClientId, PlayerPatch>,
        removed: Vec<ClientId>,
    },

    /// Error message
    Error { code: String, message: String },
}

/// Synchronized player fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// Health (0-100)
    pub hp: u32,
    pub alive: bool,
}

/// Changed player fields, absent fields are unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hp: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,
}

impl PlayerPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.x.is_none()
            && self.y.is_none()
            && self.hp.is_none()
            && self.alive.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_messages_parse() {
        let msg: ClientMsg = serde_json::from_value(json!({"type": "move", "x": 12.5, "y": 3})).unwrap();
        assert!(matches!(msg, ClientMsg::Move { x, y } if x == 12.5 && y == 3.0));

        let msg: ClientMsg = serde_json::from_value(json!({"type": "game_ready"})).unwrap();
        assert!(matches!(msg, ClientMsg::GameReady));

        let target = ClientId::new();
        let msg: ClientMsg =
            serde_json::from_value(json!({"type": "hit", "targetId": target, "dmg": "lots"})).unwrap();
        match msg {
            ClientMsg::Hit { target_id, dmg } => {
                assert_eq!(target_id, target);
                assert_eq!(dmg, Some(json!("lots")));
            }
            other => panic!("unexpected {:?}", other),
        }

        let msg: ClientMsg = serde_json::from_value(json!({"type": "join_queue"})).unwrap();
        assert!(matches!(msg, ClientMsg::JoinQueue { name: None }));
    }

    #[test]
    fn test_malformed_client_messages_are_rejected() {
        assert!(serde_json::from_value::<ClientMsg>(json!({"type": "move", "x": "left"})).is_err());
        assert!(serde_json::from_value::<ClientMsg>(json!({"type": "teleport"})).is_err());
        assert!(serde_json::from_value::<ClientMsg>(json!({"type": "match_accepted"})).is_err());
    }

    #[test]
    fn test_server_message_field_names() {
        let match_id = Uuid::new_v4();
        let opponent_id = ClientId::new();
        let value = serde_json::to_value(ServerMsg::MatchFound {
            match_id,
            opponent: "Rex".to_string(),
            opponent_id,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "type": "match_found",
                "matchId": match_id,
                "opponent": "Rex",
                "opponentId": opponent_id,
            })
        );

        let value = serde_json::to_value(ServerMsg::StartBlocked {
            message: "Need 2 players to start. Currently: 1".to_string(),
        })
        .unwrap();
        assert_eq!(value["type"], "start_blocked");
    }

    #[test]
    fn test_patch_omits_unchanged_fields() {
        let patch = PlayerPatch {
            hp: Some(40),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({"hp": 40}));
        assert!(!patch.is_empty());
        assert!(PlayerPatch::default().is_empty());
    }
}
