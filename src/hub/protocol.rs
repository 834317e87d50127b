//! The realtime wire protocol: `{ "type", "payload", "timestamp" }`
//! envelopes over a duplex text-frame transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{Board, Cell, Color};
use crate::session::{EndReason, SessionId, SessionStatus};

/// Payload-less messages still carry an (empty) `payload` object on the
/// wire, matching the envelope shape uniformly across message types.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Empty {}

/// A board snapshot as sent to clients: row-major, bottom row first,
/// `0 = empty, 1 = red, 2 = yellow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub cells: Vec<Vec<u8>>,
}

impl From<&Board> for BoardView {
    fn from(board: &Board) -> Self {
        let cells = board
            .rows()
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        Cell::Empty => 0,
                        Cell::Occupied(Color::Red) => 1,
                        Cell::Occupied(Color::Yellow) => 2,
                    })
                    .collect()
            })
            .collect();
        BoardView { cells }
    }
}

/// Messages the hub accepts from a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinQueue { payload: Empty, timestamp: DateTime<Utc> },
    LeaveQueue { payload: Empty, timestamp: DateTime<Utc> },
    JoinGame { payload: JoinGamePayload, timestamp: DateTime<Utc> },
    MakeMove { payload: MakeMovePayload, timestamp: DateTime<Utc> },
    Reconnect { payload: ReconnectPayload, timestamp: DateTime<Utc> },
    LeaveGame { payload: JoinGamePayload, timestamp: DateTime<Utc> },
    PlayWithBot { payload: PlayWithBotPayload, timestamp: DateTime<Utc> },
    CreateCustomRoom { payload: Empty, timestamp: DateTime<Utc> },
    JoinCustomRoom { payload: JoinCustomRoomPayload, timestamp: DateTime<Utc> },
    RematchCustomRoom { payload: JoinGamePayload, timestamp: DateTime<Utc> },
    Ping { payload: Empty, timestamp: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinGamePayload {
    pub game_id: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakeMovePayload {
    pub game_id: SessionId,
    pub column: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPayload {
    pub game_id: SessionId,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayWithBotPayload {
    pub difficulty: Option<crate::bot::BotDifficulty>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinCustomRoomPayload {
    pub code: String,
}

/// Messages the hub sends to a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    QueueJoined { payload: QueueJoinedPayload, timestamp: DateTime<Utc> },
    QueueStatus { payload: QueueStatusPayload, timestamp: DateTime<Utc> },
    MatchFound { payload: MatchFoundPayload, timestamp: DateTime<Utc> },
    RoomCreated { payload: RoomCreatedPayload, timestamp: DateTime<Utc> },
    WaitingForOpponent { payload: WaitingForOpponentPayload, timestamp: DateTime<Utc> },
    GameStarted { payload: GameStartedPayload, timestamp: DateTime<Utc> },
    MoveMade { payload: MoveMadePayload, timestamp: DateTime<Utc> },
    GameEnded { payload: GameEndedPayload, timestamp: DateTime<Utc> },
    GameState { payload: GameStatePayload, timestamp: DateTime<Utc> },
    PlayerJoined { payload: PlayerPresencePayload, timestamp: DateTime<Utc> },
    PlayerLeft { payload: PlayerPresencePayload, timestamp: DateTime<Utc> },
    Error { payload: ErrorPayload, timestamp: DateTime<Utc> },
    Pong { payload: Empty, timestamp: DateTime<Utc> },
}

impl ServerMessage {
    /// Whether this message must always reach the client: game-ending and
    /// error notifications are one-shot and not superseded by anything
    /// later, so the outbound queue never evicts them under backpressure.
    /// Everything else is a state update a later message can supersede and
    /// is eligible to be dropped (oldest first) when the queue is full.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerMessage::GameEnded { .. } | ServerMessage::Error { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJoinedPayload {
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusPayload {
    pub position: usize,
    pub wait_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFoundPayload {
    pub game_id: SessionId,
    pub opponent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomCreatedPayload {
    pub game_id: SessionId,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingForOpponentPayload {
    pub game_id: SessionId,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStartedPayload {
    pub game_id: SessionId,
    pub opponent: String,
    pub your_color: Color,
    pub current_turn: Color,
    pub board: BoardView,
    pub is_bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveMadePayload {
    pub game_id: SessionId,
    pub column: u8,
    pub row: u8,
    pub color: Color,
    pub next_turn: Color,
    pub board: BoardView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEndedPayload {
    pub game_id: SessionId,
    pub winner: Option<String>,
    pub reason: EndReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStatePayload {
    pub game_id: SessionId,
    pub board: BoardView,
    pub current_turn: Color,
    pub status: SessionStatus,
    pub your_color: Option<Color>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPresencePayload {
    pub game_id: SessionId,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Stable wire error codes the hub maps domain errors onto. Never swallowed
/// silently — every rejected request yields one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidColumn,
    ColumnFull,
    WrongTurn,
    GameNotInProgress,
    GameNotFound,
    PlayerNotFound,
    DuplicatePlayer,
    AlreadyInQueue,
    AlreadyInGame,
    RoomNotFound,
    RoomFull,
    SessionAbandoned,
    InternalError,
}

impl From<crate::engine::RuleError> for ErrorCode {
    fn from(err: crate::engine::RuleError) -> Self {
        match err {
            crate::engine::RuleError::OutOfRange(_) => ErrorCode::InvalidColumn,
            crate::engine::RuleError::ColumnFull(_) => ErrorCode::ColumnFull,
            crate::engine::RuleError::WrongTurn(_) => ErrorCode::WrongTurn,
        }
    }
}

impl From<crate::session::SessionError> for ErrorCode {
    fn from(err: crate::session::SessionError) -> Self {
        match err {
            crate::session::SessionError::NotFound => ErrorCode::GameNotFound,
            crate::session::SessionError::NotInProgress => ErrorCode::GameNotInProgress,
            crate::session::SessionError::DuplicatePlayer => ErrorCode::DuplicatePlayer,
            crate::session::SessionError::SessionAbandoned => ErrorCode::SessionAbandoned,
            crate::session::SessionError::PlayerNotInSession => ErrorCode::PlayerNotFound,
            crate::session::SessionError::Rule(rule) => rule.into(),
        }
    }
}

impl From<crate::matchmaking::QueueError> for ErrorCode {
    fn from(err: crate::matchmaking::QueueError) -> Self {
        match err {
            crate::matchmaking::QueueError::AlreadyInQueue => ErrorCode::AlreadyInQueue,
            crate::matchmaking::QueueError::AlreadyInGame => ErrorCode::AlreadyInGame,
            crate::matchmaking::QueueError::RoomNotFound => ErrorCode::RoomNotFound,
            crate::matchmaking::QueueError::RoomFull => ErrorCode::RoomFull,
        }
    }
}
