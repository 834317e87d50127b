//! Repository capability traits.
//!
//! The persistent store is deliberately out of scope (see `spec.md` §1) —
//! this module only defines the narrow interfaces the core consumes, plus
//! an in-memory reference implementation used by tests and the demo
//! binary. A real deployment swaps these for a database-backed impl
//! without touching `session`/`matchmaking`/`hub`, matching the "capability
//! structs over ambient singletons" redesign note in `spec.md` §9.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::engine::Move;
use crate::session::types::{GameSession, SessionId};

/// Every repository call carries a 5 s deadline in the real implementation;
/// this error type distinguishes transient failures (worth retrying) from
/// ones that are not.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("repository call timed out")]
    Timeout,
    #[error("session {0:?} not found")]
    NotFound(SessionId),
    #[error("repository backend error: {0}")]
    Backend(String),
}

impl RepoError {
    /// Whether retrying this call with backoff is worthwhile. Per
    /// `spec.md` §4.3, write failures retry up to 3 attempts within a 5 s
    /// deadline; `Backend` errors are treated as potentially transient,
    /// `NotFound` is not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, RepoError::NotFound(_))
    }
}

/// Persists game sessions and their move history. Read-path failures
/// propagate (the core cannot fabricate data); write-path failures degrade
/// to in-memory-only with an operator-visible flag (see
/// `session::manager::SessionManager`).
#[async_trait]
pub trait GameRepository: Send + Sync {
    async fn save_session(&self, session: &GameSession) -> Result<(), RepoError>;
    async fn load_session(&self, id: SessionId) -> Result<Option<GameSession>, RepoError>;
    async fn append_move(&self, session_id: SessionId, mv: Move) -> Result<(), RepoError>;
    async fn moves(&self, session_id: SessionId) -> Result<Vec<Move>, RepoError>;
    async fn find_by_room_code(&self, code: &str) -> Result<Option<SessionId>, RepoError>;
}

/// Per-player aggregate statistics, updated atomically at game completion.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStats {
    pub username: String,
    pub games_played: u64,
    pub games_won: u64,
    pub total_duration: Duration,
    pub last_played_at: Option<DateTime<Utc>>,
}

impl PlayerStats {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            games_played: 0,
            games_won: 0,
            total_duration: Duration::ZERO,
            last_played_at: None,
        }
    }

    /// `gamesWon / gamesPlayed`, or 0 when `gamesPlayed = 0`.
    pub fn win_rate(&self) -> f64 {
        if self.games_played == 0 {
            0.0
        } else {
            self.games_won as f64 / self.games_played as f64
        }
    }

    pub fn avg_game_duration(&self) -> Duration {
        if self.games_played == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.games_played as u32
        }
    }
}

/// Upserts win/loss counters by username. Failures are logged and the game
/// continues — stats are idempotently recomputable off-line from the
/// persisted move log.
#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// Records the completion of one game for `username`. A draw still
    /// counts toward `games_played` for both players (see `SPEC_FULL.md`
    /// §4, decided per `spec.md` §9's open question).
    async fn record_game(
        &self,
        username: &str,
        won: bool,
        duration: Duration,
        played_at: DateTime<Utc>,
    ) -> Result<(), RepoError>;

    async fn get(&self, username: &str) -> Result<Option<PlayerStats>, RepoError>;
}

/// In-memory `GameRepository`, used by tests and the demo binary.
#[derive(Default)]
pub struct InMemoryGameRepository {
    sessions: Mutex<HashMap<SessionId, GameSession>>,
    moves: Mutex<HashMap<SessionId, Vec<Move>>>,
    room_codes: Mutex<HashMap<String, SessionId>>,
}

impl InMemoryGameRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameRepository for InMemoryGameRepository {
    async fn save_session(&self, session: &GameSession) -> Result<(), RepoError> {
        if let Some(code) = &session.room_code {
            self.room_codes.lock().unwrap().insert(code.clone(), session.id);
        }
        self.sessions.lock().unwrap().insert(session.id, session.clone());
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<GameSession>, RepoError> {
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn append_move(&self, session_id: SessionId, mv: Move) -> Result<(), RepoError> {
        self.moves.lock().unwrap().entry(session_id).or_default().push(mv);
        Ok(())
    }

    async fn moves(&self, session_id: SessionId) -> Result<Vec<Move>, RepoError> {
        Ok(self.moves.lock().unwrap().get(&session_id).cloned().unwrap_or_default())
    }

    async fn find_by_room_code(&self, code: &str) -> Result<Option<SessionId>, RepoError> {
        Ok(self.room_codes.lock().unwrap().get(code).copied())
    }
}

/// In-memory `StatsRepository`, used by tests and the demo binary.
#[derive(Default)]
pub struct InMemoryStatsRepository {
    stats: Mutex<HashMap<String, PlayerStats>>,
}

impl InMemoryStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatsRepository for InMemoryStatsRepository {
    async fn record_game(
        &self,
        username: &str,
        won: bool,
        duration: Duration,
        played_at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let mut stats = self.stats.lock().unwrap();
        let entry = stats.entry(username.to_string()).or_insert_with(|| PlayerStats::new(username));
        entry.games_played += 1;
        if won {
            entry.games_won += 1;
        }
        entry.total_duration += duration;
        entry.last_played_at = Some(played_at);
        Ok(())
    }

    async fn get(&self, username: &str) -> Result<Option<PlayerStats>, RepoError> {
        Ok(self.stats.lock().unwrap().get(username).cloned())
    }
}
