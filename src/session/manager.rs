//! Session lifecycle: creation, move submission, disconnect/reconnect
//! handling, forfeiture, and the bot-turn loop.
//!
//! Concurrency follows the pattern in `spec.md` §9 (avoid a "god lock" on
//! the sessions table): a top-level lock guards only map membership
//! (insert/lookup/remove); each session's data lives behind its own mutex,
//! so moves submitted to distinct sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{error, instrument, warn};

use crate::analytics::{AnalyticsProducer, GameEventData};
use crate::bot::{self, BotDifficulty};
use crate::clock::Clock;
use crate::engine::{self, Color, Move, Outcome};
use crate::repository::{GameRepository, RepoError, StatsRepository};

use super::types::{EndReason, GameSession, MoveOutcome, SessionError, SessionId, SessionKind, SessionStatus};

const MOVE_WRITE_MAX_ATTEMPTS: u32 = 3;

/// A session plus the lock guarding its mutable fields.
struct SessionEntry {
    session: Mutex<GameSession>,
}

/// Live game sessions plus the indices needed to look them up.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    player_index: RwLock<HashMap<String, SessionId>>,
    repo: Arc<dyn GameRepository>,
    stats: Arc<dyn StatsRepository>,
    clock: Arc<dyn Clock>,
    analytics: AnalyticsProducer,
    disconnect_grace: Duration,
    session_retention: Duration,
    repository_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        repo: Arc<dyn GameRepository>,
        stats: Arc<dyn StatsRepository>,
        clock: Arc<dyn Clock>,
        analytics: AnalyticsProducer,
        disconnect_grace: Duration,
        session_retention: Duration,
        repository_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            player_index: RwLock::new(HashMap::new()),
            repo,
            stats,
            clock,
            analytics,
            disconnect_grace,
            session_retention,
            repository_timeout,
        })
    }

    /// Creates a new session for `p1` (Red) vs `p2` (Yellow). `Bot` and
    /// `Ranked` sessions start `InProgress`; `Custom` sessions start
    /// `Waiting` for the second player to join by room code.
    #[instrument(skip(self))]
    pub async fn create_session(
        self: &Arc<Self>,
        p1: String,
        p2: String,
        kind: SessionKind,
        room_code: Option<String>,
    ) -> Result<GameSession, SessionError> {
        if !p1.is_empty() && !p2.is_empty() && p1 == p2 {
            return Err(SessionError::DuplicatePlayer);
        }

        let status = match kind {
            SessionKind::Custom if p2.is_empty() => SessionStatus::Waiting,
            _ => SessionStatus::InProgress,
        };

        let now = self.clock.now_utc();
        let session = GameSession::new(SessionId::new(), p1.clone(), p2.clone(), kind, status, now, room_code);

        {
            let mut sessions = self.sessions.write().await;
            let mut index = self.player_index.write().await;
            sessions.insert(session.id, Arc::new(SessionEntry { session: Mutex::new(session.clone()) }));
            if !p1.is_empty() {
                index.insert(p1.clone(), session.id);
            }
            if !p2.is_empty() {
                index.insert(p2.clone(), session.id);
            }
        }

        if let Err(err) = self.repo.save_session(&session).await {
            warn!(session_id = %session.id, error = %err, "failed to persist new session");
        }

        self.analytics
            .emit(crate::analytics::GameEvent::new(
                session.id,
                None,
                now,
                GameEventData::GameStarted { player1: p1, player2: p2 },
            ))
            .await;

        if status == SessionStatus::InProgress {
            self.maybe_spawn_bot_turn(session.id, &session).await;
        }

        Ok(session)
    }

    /// Validates and applies `player`'s move, persisting it, broadcasting
    /// the result (the caller is expected to relay the returned snapshot to
    /// the hub), and handling game completion.
    #[instrument(skip(self))]
    pub async fn submit_move(self: &Arc<Self>, session_id: SessionId, player: &str, column: u8) -> Result<MoveOutcome, SessionError> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.session.lock().await;

        if guard.status != SessionStatus::InProgress {
            return Err(SessionError::NotInProgress);
        }

        let color = guard.color_for(player).ok_or(SessionError::PlayerNotInSession)?;

        engine::validate_move(&guard.board, guard.current_turn, color, column)?;
        let row = engine::apply_move(&mut guard.board, color, column);
        let sequence = guard.move_history.len() as u32;
        let mv = Move { color, column, row, sequence };
        guard.move_history.push(mv);

        let now = self.clock.now_utc();
        guard.last_activity_at = now;

        let outcome = engine::detect_outcome(&guard.board, mv);
        guard.current_turn = color.opponent();

        let game_ended = !matches!(outcome, Outcome::InProgress);
        if game_ended {
            guard.status = SessionStatus::Completed;
            guard.ended_at = Some(now);
            guard.end_reason = Some(match outcome {
                Outcome::Win(_) => EndReason::Win,
                Outcome::Draw => EndReason::Draw,
                Outcome::InProgress => unreachable!(),
            });
            guard.winner = match outcome {
                Outcome::Win(c) => Some(c),
                _ => None,
            };
        }

        self.persist_move(session_id, mv, &mut guard).await;

        self.analytics
            .emit(crate::analytics::GameEvent::new(
                session_id,
                Some(player.to_string()),
                now,
                GameEventData::MoveMade { column, row, color, sequence },
            ))
            .await;

        if game_ended {
            self.finish_game(session_id, &mut guard, now).await;
        }

        let snapshot = guard.clone();
        drop(guard);

        if !game_ended {
            self.maybe_spawn_bot_turn(session_id, &snapshot).await;
        }

        Ok(MoveOutcome { session: snapshot, row, game_ended })
    }

    /// Records a player's socket drop. The sweeper forfeits the session if
    /// the grace window expires before a matching `mark_reconnected`.
    #[instrument(skip(self))]
    pub async fn mark_disconnected(self: &Arc<Self>, session_id: SessionId, player: &str) -> Result<(), SessionError> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.session.lock().await;
        if !guard.contains_player(player) {
            return Err(SessionError::PlayerNotInSession);
        }
        let now = self.clock.now_utc();
        guard.disconnected_at.insert(player.to_string(), now);
        drop(guard);

        self.analytics
            .emit(crate::analytics::GameEvent::new(session_id, Some(player.to_string()), now, GameEventData::PlayerLeft))
            .await;
        Ok(())
    }

    /// Clears a disconnection. Rejects with `SessionAbandoned` if the
    /// session already transitioned out of `InProgress` while disconnected
    /// (the grace window already expired via the sweeper).
    #[instrument(skip(self))]
    pub async fn mark_reconnected(self: &Arc<Self>, session_id: SessionId, player: &str) -> Result<GameSession, SessionError> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.session.lock().await;
        if !guard.contains_player(player) {
            return Err(SessionError::PlayerNotInSession);
        }
        if guard.status == SessionStatus::Abandoned {
            return Err(SessionError::SessionAbandoned);
        }
        guard.disconnected_at.remove(player);
        let now = self.clock.now_utc();
        guard.last_activity_at = now;
        let snapshot = guard.clone();
        drop(guard);

        self.analytics
            .emit(crate::analytics::GameEvent::new(
                session_id,
                Some(player.to_string()),
                now,
                GameEventData::PlayerReconnected,
            ))
            .await;
        Ok(snapshot)
    }

    /// The sweeper's per-session action: forfeits a session whose
    /// disconnect grace window has expired. Returns the updated snapshot if
    /// a transition occurred.
    pub async fn forfeit_if_expired(self: &Arc<Self>, session_id: SessionId) -> Option<GameSession> {
        let entry = match self.sessions.read().await.get(&session_id).cloned() {
            Some(entry) => entry,
            None => return None,
        };
        let mut guard = entry.session.lock().await;
        if guard.status != SessionStatus::InProgress {
            return None;
        }

        let now = self.clock.now_utc();
        let expired: Vec<String> = guard
            .disconnected_at
            .iter()
            .filter(|(_, since)| now.signed_duration_since(**since).to_std().unwrap_or(Duration::ZERO) > self.disconnect_grace)
            .map(|(player, _)| player.clone())
            .collect();

        if expired.is_empty() {
            return None;
        }

        let both_disconnected = guard.disconnected_at.len() >= 2;

        guard.ended_at = Some(now);
        if both_disconnected {
            guard.status = SessionStatus::Abandoned;
            guard.winner = None;
            guard.end_reason = None;
        } else {
            let forfeiting = &expired[0];
            let winner_username = guard.opponent_of(forfeiting).map(|s| s.to_string());
            guard.status = SessionStatus::Completed;
            guard.end_reason = Some(EndReason::Forfeit);
            guard.winner = winner_username.as_deref().and_then(|w| guard.color_for(w));
        }

        self.finish_game(session_id, &mut guard, now).await;
        let snapshot = guard.clone();
        Some(snapshot)
    }

    /// Joins `player2` into a `Waiting` custom-room session, transitioning
    /// it to `InProgress`. Used when a second player supplies a room code.
    #[instrument(skip(self))]
    pub async fn join_room(self: &Arc<Self>, session_id: SessionId, player2: String) -> Result<GameSession, SessionError> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.session.lock().await;
        if guard.status != SessionStatus::Waiting {
            return Err(SessionError::NotInProgress);
        }
        if guard.player1 == player2 {
            return Err(SessionError::DuplicatePlayer);
        }
        guard.player2 = player2.clone();
        guard.status = SessionStatus::InProgress;
        let now = self.clock.now_utc();
        guard.last_activity_at = now;
        let snapshot = guard.clone();
        drop(guard);

        self.player_index.write().await.insert(player2, session_id);
        if let Err(err) = self.repo.save_session(&snapshot).await {
            warn!(session_id = %session_id, error = %err, "failed to persist joined room");
        }
        self.maybe_spawn_bot_turn(session_id, &snapshot).await;
        Ok(snapshot)
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<GameSession, SessionError> {
        let entry = self.entry(session_id).await?;
        Ok(entry.session.lock().await.clone())
    }

    pub async fn get_session_by_player(&self, player: &str) -> Option<GameSession> {
        let session_id = *self.player_index.read().await.get(player)?;
        let entry = self.sessions.read().await.get(&session_id).cloned()?;
        Some(entry.session.lock().await.clone())
    }

    pub async fn get_active_sessions(&self) -> Vec<GameSession> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for entry in sessions.values() {
            out.push(entry.session.lock().await.clone());
        }
        out
    }

    /// Number of live sessions currently flagged `unsynced_writes`, for an
    /// operator dashboard to alert on persistence degradation.
    pub async fn unsynced_session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        let mut count = 0;
        for entry in sessions.values() {
            if entry.session.lock().await.unsynced_writes {
                count += 1;
            }
        }
        count
    }

    /// Evicts `Completed`/`Abandoned` sessions older than the configured
    /// retention window from the in-memory map. The repository keeps them
    /// indefinitely.
    pub async fn sweep_retention(&self) {
        let now = self.clock.now_utc();
        let mut to_remove = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, entry) in sessions.iter() {
                let guard = entry.session.lock().await;
                if let Some(ended_at) = guard.ended_at {
                    let age = now.signed_duration_since(ended_at).to_std().unwrap_or(Duration::ZERO);
                    if age > self.session_retention {
                        to_remove.push((*id, guard.player1.clone(), guard.player2.clone()));
                    }
                }
            }
        }
        if to_remove.is_empty() {
            return;
        }
        let mut sessions = self.sessions.write().await;
        let mut index = self.player_index.write().await;
        for (id, p1, p2) in to_remove {
            sessions.remove(&id);
            if index.get(&p1) == Some(&id) {
                index.remove(&p1);
            }
            if index.get(&p2) == Some(&id) {
                index.remove(&p2);
            }
        }
    }

    async fn entry(&self, session_id: SessionId) -> Result<Arc<SessionEntry>, SessionError> {
        self.sessions.read().await.get(&session_id).cloned().ok_or(SessionError::NotFound)
    }

    async fn persist_move(&self, session_id: SessionId, mv: Move, session: &mut GameSession) {
        let mut attempt = 0;
        let deadline = self.clock.now_instant() + self.repository_timeout;
        loop {
            attempt += 1;
            match self.repo.append_move(session_id, mv).await {
                Ok(()) => {
                    let _ = self.repo.save_session(session).await;
                    return;
                }
                Err(err) if err.is_transient() && attempt < MOVE_WRITE_MAX_ATTEMPTS && self.clock.now_instant() < deadline => {
                    let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    error!(session_id = %session_id, error = %err, "move write exhausted retries, continuing in-memory only");
                    session.unsynced_writes = true;
                    return;
                }
            }
        }
    }

    async fn finish_game(&self, session_id: SessionId, session: &mut GameSession, now: chrono::DateTime<chrono::Utc>) {
        self.analytics
            .emit(crate::analytics::GameEvent::new(
                session_id,
                None,
                now,
                GameEventData::GameCompleted {
                    winner: session.winner.map(|c| session.player_for(c).to_string()),
                    reason: session.end_reason.unwrap_or(EndReason::Draw),
                },
            ))
            .await;

        if session.status != SessionStatus::Abandoned {
            self.update_stats(session, now).await;
        }

        if let Err(err) = self.repo.save_session(session).await {
            warn!(session_id = %session_id, error = %err, "failed to persist completed session");
        }
    }

    async fn update_stats(&self, session: &GameSession, now: chrono::DateTime<chrono::Utc>) {
        let duration = session.duration();
        for (username, won) in [
            (&session.player1, session.winner == Some(Color::Red)),
            (&session.player2, session.winner == Some(Color::Yellow)),
        ] {
            if username.is_empty() {
                continue;
            }
            if let Err(err) = self.stats.record_game(username, won, duration, now).await {
                warn!(player = %username, error = %err, "stats update failed, continuing");
            }
        }
    }

    /// If the session is `InProgress` and the player to move is a bot,
    /// spawns a detached worker that computes and submits the bot's move
    /// within the latency budget.
    async fn maybe_spawn_bot_turn(self: &Arc<Self>, session_id: SessionId, session: &GameSession) {
        if session.status != SessionStatus::InProgress {
            return;
        }
        let to_move = session.player_for(session.current_turn);
        if !bot::is_bot(to_move) {
            return;
        }

        let manager = Arc::clone(self);
        let board = session.board.clone();
        let self_color = session.current_turn;
        let bot_username = to_move.to_string();
        let difficulty = BotDifficulty::Medium;

        tokio::spawn(async move {
            let start = manager.clock.now_instant();
            let deadline = bot::search_deadline(start, difficulty);
            let column = bot::choose_move_or_fallback(&board, self_color, deadline).unwrap_or(0);

            let elapsed = manager.clock.now_instant().saturating_duration_since(start);
            let residual = difficulty.human_delay().saturating_sub(elapsed);
            if residual > Duration::ZERO {
                tokio::time::sleep(residual).await;
            }

            if let Err(err) = manager.submit_move(session_id, &bot_username, column).await {
                warn!(session_id = %session_id, error = %err, "bot move submission failed");
            }
        });
    }
}
