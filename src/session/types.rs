//! Session data model: `GameSession`, its state machine, and the move
//! result returned from `submit_move`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{Board, Color, Move, RuleError};

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a session came to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Ranked,
    Bot,
    Custom,
}

/// Session state machine. `Completed` and `Abandoned` are absorbing —
/// `Abandoned` is reachable only from `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    InProgress,
    Completed,
    Abandoned,
}

/// Why a session ended, mirrored on the wire as `game_ended.reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Win,
    Draw,
    Forfeit,
}

/// The live state of one Connect-4 game instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSession {
    pub id: SessionId,
    pub player1: String,
    pub player2: String,
    pub kind: SessionKind,
    pub current_turn: Color,
    pub status: SessionStatus,
    pub board: Board,
    pub move_history: Vec<Move>,
    pub winner: Option<Color>,
    pub end_reason: Option<EndReason>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub disconnected_at: HashMap<String, DateTime<Utc>>,
    pub room_code: Option<String>,
    /// Set when a move-write failure persisted the move in memory only.
    /// Surfaced to operators; the game is allowed to continue.
    pub unsynced_writes: bool,
}

impl GameSession {
    pub fn new(
        id: SessionId,
        player1: String,
        player2: String,
        kind: SessionKind,
        status: SessionStatus,
        now: DateTime<Utc>,
        room_code: Option<String>,
    ) -> Self {
        Self {
            id,
            player1,
            player2,
            kind,
            current_turn: Color::Red,
            status,
            board: Board::new(),
            move_history: Vec::new(),
            winner: None,
            end_reason: None,
            started_at: now,
            ended_at: None,
            last_activity_at: now,
            disconnected_at: HashMap::new(),
            room_code,
            unsynced_writes: false,
        }
    }

    /// The username playing `color`.
    pub fn player_for(&self, color: Color) -> &str {
        match color {
            Color::Red => &self.player1,
            Color::Yellow => &self.player2,
        }
    }

    /// The color `username` is playing, if they are in this session.
    pub fn color_for(&self, username: &str) -> Option<Color> {
        if username == self.player1 {
            Some(Color::Red)
        } else if username == self.player2 {
            Some(Color::Yellow)
        } else {
            None
        }
    }

    pub fn opponent_of(&self, username: &str) -> Option<&str> {
        if username == self.player1 {
            Some(&self.player2)
        } else if username == self.player2 {
            Some(&self.player1)
        } else {
            None
        }
    }

    pub fn contains_player(&self, username: &str) -> bool {
        username == self.player1 || username == self.player2
    }

    pub fn duration(&self) -> Duration {
        match self.ended_at {
            Some(end) => (end - self.started_at).to_std().unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }
}

/// Errors the session manager surfaces to the hub, which maps them onto
/// stable wire error codes (see `hub::protocol::ErrorCode`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session is not in progress")]
    NotInProgress,
    #[error("duplicate player in session creation")]
    DuplicatePlayer,
    #[error("session was abandoned")]
    SessionAbandoned,
    #[error("player is not in this session")]
    PlayerNotInSession,
    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// Returned by `submit_move`: the session snapshot after the move, plus
/// whether the game just ended.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub session: GameSession,
    pub row: u8,
    pub game_ended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_for_identifies_both_players() {
        let session = GameSession::new(
            SessionId::new(),
            "alice".into(),
            "bob".into(),
            SessionKind::Ranked,
            SessionStatus::InProgress,
            Utc::now(),
            None,
        );
        assert_eq!(session.color_for("alice"), Some(Color::Red));
        assert_eq!(session.color_for("bob"), Some(Color::Yellow));
        assert_eq!(session.color_for("carol"), None);
    }

    #[test]
    fn opponent_lookup() {
        let session = GameSession::new(
            SessionId::new(),
            "alice".into(),
            "bob".into(),
            SessionKind::Ranked,
            SessionStatus::InProgress,
            Utc::now(),
            None,
        );
        assert_eq!(session.opponent_of("alice"), Some("bob"));
        assert_eq!(session.opponent_of("bob"), Some("alice"));
        assert_eq!(session.opponent_of("carol"), None);
    }
}
