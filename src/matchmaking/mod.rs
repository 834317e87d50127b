//! The matchmaking scheduler: a single FIFO queue with a periodic pairing
//! tick, plus custom-room creation/joining (orthogonal to the queue).

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::bot;
use crate::clock::Clock;
use crate::session::{GameSession, SessionId, SessionKind, SessionManager};

const ROOM_CODE_LEN: usize = 4;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("already in queue")]
    AlreadyInQueue,
    #[error("already in an active game")]
    AlreadyInGame,
    #[error("room code not found")]
    RoomNotFound,
    #[error("room already has two players")]
    RoomFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub position: usize,
    pub wait: Duration,
}

struct QueueEntry {
    username: String,
    enqueued_at: std::time::Instant,
}

/// Outcome of one pairing tick, for the hub to announce.
pub enum PairingOutcome {
    Paired { session: GameSession },
    BotEscalated { session: GameSession },
}

pub struct MatchmakingScheduler {
    queue: Mutex<VecDeque<QueueEntry>>,
    room_codes: Mutex<HashSet<String>>,
    sessions: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    bot_escalation_deadline: Duration,
}

impl MatchmakingScheduler {
    pub fn new(sessions: Arc<SessionManager>, clock: Arc<dyn Clock>, bot_escalation_deadline: Duration) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            room_codes: Mutex::new(HashSet::new()),
            sessions,
            clock,
            bot_escalation_deadline,
        })
    }

    /// Adds `username` to the tail of the queue. Rejects if already queued
    /// or already playing.
    #[instrument(skip(self))]
    pub async fn enqueue(&self, username: String) -> Result<(), QueueError> {
        if self.sessions.get_session_by_player(&username).await.is_some() {
            return Err(QueueError::AlreadyInGame);
        }
        let mut queue = self.queue.lock().await;
        if queue.iter().any(|e| e.username == username) {
            return Err(QueueError::AlreadyInQueue);
        }
        queue.push_back(QueueEntry { username, enqueued_at: self.clock.now_instant() });
        Ok(())
    }

    /// Idempotent removal from the queue.
    pub async fn dequeue(&self, username: &str) -> bool {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|e| e.username != username);
        queue.len() != before
    }

    pub async fn status(&self, username: &str) -> Option<QueueStatus> {
        let queue = self.queue.lock().await;
        let now = self.clock.now_instant();
        queue.iter().position(|e| e.username == username).map(|position| QueueStatus {
            position,
            wait: now.saturating_duration_since(queue[position].enqueued_at),
        })
    }

    /// Runs one pairing tick: pairs head-of-queue entries two at a time,
    /// then escalates any remaining head entry that has waited past the
    /// bot-escalation deadline. Human pairing always takes priority over
    /// bot escalation within the same tick.
    pub async fn tick(self: &Arc<Self>) -> Vec<PairingOutcome> {
        let mut outcomes = Vec::new();

        loop {
            let pair = {
                let mut queue = self.queue.lock().await;
                if queue.len() < 2 {
                    break;
                }
                let a = queue.pop_front().unwrap();
                let b = queue.pop_front().unwrap();
                (a, b)
            };
            if let Ok(session) = self.sessions.create_session(pair.0.username, pair.1.username, SessionKind::Ranked, None).await {
                outcomes.push(PairingOutcome::Paired { session });
            }
        }

        let now = self.clock.now_instant();
        let expired = {
            let mut queue = self.queue.lock().await;
            match queue.front() {
                Some(entry) if now.saturating_duration_since(entry.enqueued_at) >= self.bot_escalation_deadline => queue.pop_front(),
                _ => None,
            }
        };
        if let Some(entry) = expired {
            let bot_id = bot::mint_bot_identifier();
            if let Ok(session) = self.sessions.create_session(entry.username, bot_id, SessionKind::Bot, None).await {
                outcomes.push(PairingOutcome::BotEscalated { session });
            }
        }

        outcomes
    }

    /// Runs `tick` on a fixed interval until the returned handle is
    /// dropped/aborted. Intended to be spawned once from `main`.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// Creates a `Waiting` custom room for `username`, returning the
    /// session and its freshly-minted, collision-checked room code.
    pub async fn create_custom_room(&self, username: String) -> (GameSession, String) {
        let code = self.mint_room_code().await;
        let session = self
            .sessions
            .create_session(username, String::new(), SessionKind::Custom, Some(code.clone()))
            .await
            .expect("custom room creation with empty second player never duplicates");
        (session, code)
    }

    /// Joins `username` into the waiting room identified by `code`
    /// (case-insensitive).
    pub async fn join_custom_room(&self, code: &str, username: String) -> Result<GameSession, QueueError> {
        let code = code.to_uppercase();
        let waiting = self
            .sessions
            .get_active_sessions()
            .await
            .into_iter()
            .find(|s| s.room_code.as_deref() == Some(code.as_str()));

        let session = waiting.ok_or(QueueError::RoomNotFound)?;
        if !session.player2.is_empty() {
            return Err(QueueError::RoomFull);
        }

        self.sessions.join_room(session.id, username).await.map_err(|_| QueueError::RoomFull)
    }

    async fn mint_room_code(&self) -> String {
        let mut codes = self.room_codes.lock().await;
        loop {
            let mut rng = rand::thread_rng();
            let code: String = (0..ROOM_CODE_LEN)
                .map(|_| *ROOM_CODE_ALPHABET.choose(&mut rng).expect("alphabet is non-empty") as char)
                .collect();
            if codes.insert(code.clone()) {
                return code;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{AnalyticsProducer, BreakerConfig, LoggingEventSink};
    use crate::clock::FrozenClock;
    use crate::repository::{InMemoryGameRepository, InMemoryStatsRepository};

    fn test_scheduler() -> (Arc<MatchmakingScheduler>, FrozenClock) {
        let clock = FrozenClock::new();
        let analytics = AnalyticsProducer::new(Arc::new(LoggingEventSink::new()), 1000, BreakerConfig::default());
        let sessions = SessionManager::new(
            Arc::new(InMemoryGameRepository::new()),
            Arc::new(InMemoryStatsRepository::new()),
            Arc::new(clock.clone()),
            analytics,
            Duration::from_secs(30),
            Duration::from_secs(300),
            Duration::from_secs(5),
        );
        let scheduler = MatchmakingScheduler::new(sessions, Arc::new(clock.clone()), Duration::from_secs(10));
        (scheduler, clock)
    }

    #[tokio::test]
    async fn enqueue_rejects_duplicate() {
        let (scheduler, _clock) = test_scheduler();
        scheduler.enqueue("alice".into()).await.unwrap();
        let err = scheduler.enqueue("alice".into()).await.unwrap_err();
        assert_eq!(err, QueueError::AlreadyInQueue);
    }

    #[tokio::test]
    async fn two_waiting_players_pair_on_tick() {
        let (scheduler, _clock) = test_scheduler();
        scheduler.enqueue("alice".into()).await.unwrap();
        scheduler.enqueue("bob".into()).await.unwrap();
        let outcomes = scheduler.tick().await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], PairingOutcome::Paired { .. }));
    }

    #[tokio::test]
    async fn lone_player_escalates_to_bot_after_deadline() {
        let (scheduler, clock) = test_scheduler();
        scheduler.enqueue("alice".into()).await.unwrap();
        clock.advance(Duration::from_secs(11));
        let outcomes = scheduler.tick().await;
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            PairingOutcome::BotEscalated { session } => {
                assert!(bot::is_bot(&session.player2));
            }
            _ => panic!("expected bot escalation"),
        }
    }

    #[tokio::test]
    async fn pairing_takes_priority_over_escalation_in_same_tick() {
        let (scheduler, clock) = test_scheduler();
        scheduler.enqueue("alice".into()).await.unwrap();
        clock.advance(Duration::from_secs(11));
        scheduler.enqueue("bob".into()).await.unwrap();
        let outcomes = scheduler.tick().await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], PairingOutcome::Paired { .. }));
    }

    #[tokio::test]
    async fn custom_room_round_trip() {
        let (scheduler, _clock) = test_scheduler();
        let (session, code) = scheduler.create_custom_room("alice".into()).await;
        assert_eq!(session.status, crate::session::SessionStatus::Waiting);

        let joined = scheduler.join_custom_room(&code, "bob".into()).await.unwrap();
        assert_eq!(joined.status, crate::session::SessionStatus::InProgress);
        assert_eq!(joined.player2, "bob");
    }

    #[tokio::test]
    async fn joining_unknown_code_fails() {
        let (scheduler, _clock) = test_scheduler();
        let err = scheduler.join_custom_room("ZZZZ", "bob".into()).await.unwrap_err();
        assert_eq!(err, QueueError::RoomNotFound);
    }
}
