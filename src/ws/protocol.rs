//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::game::outcome::EndReason;
use crate::game::state::{RoomKind, Side, SimulationState};

/// Inbound `type` tags this server understands
const KNOWN_TYPES: &[&str] = &[
    "setNickname",
    "joinRoom",
    "findMatch",
    "createRoom",
    "playerInput",
    "playerReady",
    "getRoomInfo",
    "leaveRoom",
    "ping",
    "requestSync",
];

/// Matchmaking options sent with `findMatch` / `createRoom`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOptions {
    /// `"off"` disables power-ups, anything else leaves them on
    pub power_up: Option<String>,
}

impl MatchOptions {
    pub fn power_ups_enabled(&self) -> bool {
        self.power_up.as_deref() != Some("off")
    }
}

/// Raw paddle control payload. Shape checks live in the input validator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerInput {
    /// `"countdownFinished"` releases the serve
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub direction: Option<Value>,
    pub timestamp: Option<f64>,
}

impl PlayerInput {
    pub fn is_countdown_finished(&self) -> bool {
        self.kind.as_deref() == Some("countdownFinished")
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    SetNickname {
        nickname: String,
    },

    /// Join a specific room by id
    JoinRoom {
        room_id: Uuid,
    },

    /// Ask matchmaking for a room
    FindMatch {
        #[serde(default)]
        game_type: RoomKind,
        #[serde(default)]
        options: MatchOptions,
    },

    CreateRoom {
        #[serde(default)]
        game_type: RoomKind,
        #[serde(default)]
        options: MatchOptions,
    },

    PlayerInput {
        room_id: Uuid,
        input: PlayerInput,
    },

    PlayerReady {
        room_id: Uuid,
        ready: bool,
    },

    GetRoomInfo {
        room_id: Uuid,
    },

    LeaveRoom {
        room_id: Uuid,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp, echoed back
        timestamp: Option<u64>,
    },

    /// Ask for a full snapshot after a desync
    RequestSync {
        room_id: Uuid,
    },
}

/// Why an inbound frame could not be turned into a [`ClientMsg`]
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    Malformed,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl ClientMsg {
    /// Parse one text frame, telling unknown types apart from broken JSON
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::Malformed)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::Malformed)?;

        if !KNOWN_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Welcome message after connection
    Connected {
        player_id: Uuid,
        nickname: String,
        message: String,
    },

    NicknameSet {
        player_id: Uuid,
        nickname: String,
    },

    JoinResult {
        success: bool,
        room_id: Uuid,
    },

    RoomCreated {
        room_id: Uuid,
    },

    WaitingForPlayers {
        room_id: Uuid,
        current_players: usize,
        max_players: usize,
    },

    MatchFound {
        room_id: Uuid,
    },

    /// Personalized start payload, one per seated player
    GameStarted {
        game_state: SeatedState,
    },

    /// Authoritative state broadcast each tick
    GameUpdate {
        game_state: FrameState,
        timestamp: u64,
        frame_id: u64,
    },

    GameEnded {
        winner: Side,
        reason: EndReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        disconnected_player: Option<String>,
        final_score: FinalScore,
        players: Vec<EndedPlayer>,
        timestamp: u64,
    },

    PlayerJoined {
        player: PlayerRef,
        total_players: usize,
        max_players: usize,
    },

    PlayerLeft {
        player_id: Uuid,
        total_players: usize,
    },

    PlayerReadyChanged {
        player_id: Uuid,
        ready: bool,
    },

    RoomInfo {
        room: Option<RoomSummary>,
    },

    LeftRoom {
        room_id: Uuid,
    },

    FullStateSync {
        game_state: SimulationState,
        room_info: RoomSummary,
        timestamp: u64,
    },

    Pong {
        timestamp: Option<u64>,
        server_time: u64,
    },

    Error {
        message: String,
    },
}

impl ServerMsg {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Simulation state plus the receiving player's seat
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatedState {
    #[serde(flatten)]
    pub state: SimulationState,
    pub my_side: Side,
    pub my_paddle_index: usize,
}

/// Simulation state tagged with its frame
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameState {
    #[serde(flatten)]
    pub state: SimulationState,
    pub frame_id: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FinalScore {
    pub left: u32,
    pub right: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndedPlayer {
    pub nickname: String,
    pub side: Side,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerRef {
    pub id: Uuid,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerSummary {
    pub id: Uuid,
    pub nickname: String,
    pub ready: bool,
    pub online: bool,
}

/// Public view of a room
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: Uuid,
    pub players: Vec<PlayerSummary>,
    pub is_active: bool,
    pub max_players: usize,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub power_ups_enabled: bool,
}
