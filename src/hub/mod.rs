//! The realtime hub: WebSocket accept loop, connection registry, and
//! message dispatch wiring the wire protocol to `SessionManager` and
//! `MatchmakingScheduler`.

pub mod connection;
pub mod protocol;
pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::config::ServerConfig;
use crate::matchmaking::MatchmakingScheduler;
use crate::session::{SessionId, SessionKind, SessionManager, SessionStatus};

use protocol::{
    BoardView, ClientMessage, Empty, ErrorCode, ErrorPayload, GameEndedPayload, GameStartedPayload, GameStatePayload,
    MatchFoundPayload, MoveMadePayload, PlayerPresencePayload, QueueJoinedPayload, RoomCreatedPayload, ServerMessage,
    WaitingForOpponentPayload,
};
use registry::{ConnectionId, ConnectionRegistry};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to bind {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),
}

/// The realtime server: owns the connection registry and routes between
/// the wire protocol and the game/matchmaking core.
pub struct Hub {
    registry: ConnectionRegistry,
    sessions: Arc<SessionManager>,
    matchmaking: Arc<MatchmakingScheduler>,
    config: ServerConfig,
}

impl Hub {
    pub fn new(sessions: Arc<SessionManager>, matchmaking: Arc<MatchmakingScheduler>, config: ServerConfig) -> Arc<Self> {
        Arc::new(Self { registry: ConnectionRegistry::new(), sessions, matchmaking, config })
    }

    /// Binds and accepts connections until the process is torn down.
    /// Intended to be spawned once from `main`, alongside the matchmaking
    /// tick, session sweeper, and analytics worker tasks.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) -> Result<(), HubError> {
        let addr: SocketAddr = self
            .config
            .bind_addr
            .parse()
            .unwrap_or_else(|_| "0.0.0.0:8080".parse().expect("fallback bind address is valid"));
        let listener = TcpListener::bind(addr).await.map_err(|e| HubError::BindFailed(addr, e))?;
        info!(%addr, "hub listening");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            if self.registry.connection_count().await >= self.config.max_connections {
                warn!(%peer, "connection limit reached, rejecting");
                drop(stream);
                continue;
            }
            let hub = Arc::clone(&self);
            tokio::spawn(async move { connection::run(hub, stream, peer).await });
        }
    }

    async fn dispatch(&self, conn: ConnectionId, username: &str, msg: ClientMessage) {
        let result = match msg {
            ClientMessage::JoinQueue { .. } => self.handle_join_queue(conn, username).await,
            ClientMessage::LeaveQueue { .. } => {
                self.matchmaking.dequeue(username).await;
                Ok(())
            }
            ClientMessage::JoinGame { payload, .. } => self.handle_join_game(conn, username, payload.game_id).await,
            ClientMessage::MakeMove { payload, .. } => self.handle_make_move(conn, username, payload.game_id, payload.column).await,
            ClientMessage::Reconnect { payload, .. } => self.handle_reconnect(conn, &payload.username, payload.game_id).await,
            ClientMessage::LeaveGame { payload, .. } => self.handle_leave_game(conn, username, payload.game_id).await,
            ClientMessage::PlayWithBot { payload, .. } => self.handle_play_with_bot(conn, username, payload.difficulty).await,
            ClientMessage::CreateCustomRoom { .. } => self.handle_create_custom_room(conn, username).await,
            ClientMessage::JoinCustomRoom { payload, .. } => self.handle_join_custom_room(conn, username, &payload.code).await,
            ClientMessage::RematchCustomRoom { payload, .. } => self.handle_rematch(conn, username, payload.game_id).await,
            ClientMessage::Ping { .. } => {
                self.registry.send_to(conn, ServerMessage::Pong { payload: Empty {}, timestamp: Utc::now() }).await;
                Ok(())
            }
        };

        if let Err(code) = result {
            self.send_error(conn, code).await;
        }
    }

    async fn send_error(&self, conn: ConnectionId, code: ErrorCode) {
        let message = format!("{code:?}");
        self.registry
            .send_to(conn, ServerMessage::Error { payload: ErrorPayload { code, message }, timestamp: Utc::now() })
            .await;
    }

    async fn handle_join_queue(&self, conn: ConnectionId, username: &str) -> Result<(), ErrorCode> {
        self.matchmaking.enqueue(username.to_string()).await.map_err(Into::into)?;
        let position = self.matchmaking.status(username).await.map(|s| s.position).unwrap_or(0);
        self.registry
            .send_to(conn, ServerMessage::QueueJoined { payload: QueueJoinedPayload { position }, timestamp: Utc::now() })
            .await;
        Ok(())
    }

    async fn handle_join_game(&self, conn: ConnectionId, username: &str, game_id: SessionId) -> Result<(), ErrorCode> {
        let session = self.sessions.get_session(game_id).await.map_err(ErrorCode::from)?;
        if !session.contains_player(username) {
            return Err(ErrorCode::PlayerNotFound);
        }
        self.registry.join_room(conn, game_id).await;
        let your_color = session.color_for(username);
        self.registry
            .send_to(
                conn,
                ServerMessage::GameState {
                    payload: GameStatePayload {
                        game_id,
                        board: BoardView::from(&session.board),
                        current_turn: session.current_turn,
                        status: session.status,
                        your_color,
                    },
                    timestamp: Utc::now(),
                },
            )
            .await;
        Ok(())
    }

    async fn handle_make_move(&self, _conn: ConnectionId, username: &str, game_id: SessionId, column: u8) -> Result<(), ErrorCode> {
        let outcome = self.sessions.submit_move(game_id, username, column).await.map_err(ErrorCode::from)?;
        let session = &outcome.session;
        let board = BoardView::from(&session.board);
        let mv = *session.move_history.last().expect("a move was just applied");

        self.registry
            .broadcast_room(
                game_id,
                ServerMessage::MoveMade {
                    payload: MoveMadePayload {
                        game_id,
                        column: mv.column,
                        row: outcome.row,
                        color: mv.color,
                        next_turn: session.current_turn,
                        board: board.clone(),
                    },
                    timestamp: Utc::now(),
                },
                None,
            )
            .await;

        if outcome.game_ended {
            let winner = session.winner.map(|c| session.player_for(c).to_string());
            let reason = session.end_reason.unwrap_or(crate::session::EndReason::Draw);
            self.registry
                .broadcast_room(
                    game_id,
                    ServerMessage::GameEnded { payload: GameEndedPayload { game_id, winner, reason }, timestamp: Utc::now() },
                    None,
                )
                .await;
        }
        Ok(())
    }

    async fn handle_reconnect(&self, conn: ConnectionId, username: &str, game_id: SessionId) -> Result<(), ErrorCode> {
        let session = self.sessions.mark_reconnected(game_id, username).await.map_err(ErrorCode::from)?;
        self.registry.join_room(conn, game_id).await;
        self.registry
            .broadcast_room(
                game_id,
                ServerMessage::PlayerJoined {
                    payload: PlayerPresencePayload { game_id, username: username.to_string() },
                    timestamp: Utc::now(),
                },
                Some(conn),
            )
            .await;
        self.registry
            .send_to(
                conn,
                ServerMessage::GameState {
                    payload: GameStatePayload {
                        game_id,
                        board: BoardView::from(&session.board),
                        current_turn: session.current_turn,
                        status: session.status,
                        your_color: session.color_for(username),
                    },
                    timestamp: Utc::now(),
                },
            )
            .await;
        Ok(())
    }

    async fn handle_leave_game(&self, _conn: ConnectionId, username: &str, game_id: SessionId) -> Result<(), ErrorCode> {
        // Treated the same as a socket drop: starts the disconnect grace
        // window rather than forfeiting immediately, so a player who left
        // by mistake can still reconnect within the grace period.
        self.sessions.mark_disconnected(game_id, username).await.map_err(ErrorCode::from)?;
        self.registry
            .broadcast_room(
                game_id,
                ServerMessage::PlayerLeft {
                    payload: PlayerPresencePayload { game_id, username: username.to_string() },
                    timestamp: Utc::now(),
                },
                None,
            )
            .await;
        Ok(())
    }

    async fn handle_play_with_bot(&self, conn: ConnectionId, username: &str, difficulty: Option<crate::bot::BotDifficulty>) -> Result<(), ErrorCode> {
        let _ = difficulty;
        let bot_id = crate::bot::mint_bot_identifier();
        let session = self
            .sessions
            .create_session(username.to_string(), bot_id, SessionKind::Bot, None)
            .await
            .map_err(ErrorCode::from)?;
        self.registry.join_room(conn, session.id).await;
        self.announce_game_started(conn, &session, username, true).await;
        Ok(())
    }

    async fn handle_create_custom_room(&self, conn: ConnectionId, username: &str) -> Result<(), ErrorCode> {
        let (session, code) = self.matchmaking.create_custom_room(username.to_string()).await;
        self.registry.join_room(conn, session.id).await;
        self.registry
            .send_to(
                conn,
                ServerMessage::RoomCreated { payload: RoomCreatedPayload { game_id: session.id, code: code.clone() }, timestamp: Utc::now() },
            )
            .await;
        self.registry
            .send_to(
                conn,
                ServerMessage::WaitingForOpponent {
                    payload: WaitingForOpponentPayload { game_id: session.id, code: Some(code) },
                    timestamp: Utc::now(),
                },
            )
            .await;
        Ok(())
    }

    async fn handle_join_custom_room(&self, conn: ConnectionId, username: &str, code: &str) -> Result<(), ErrorCode> {
        let session = self.matchmaking.join_custom_room(code, username.to_string()).await.map_err(ErrorCode::from)?;
        self.registry.join_room(conn, session.id).await;
        self.announce_game_started(conn, &session, username, false).await;

        if let Some(opponent_conn) = self.registry.connection_for_player(&session.player1).await {
            self.registry
                .send_to(
                    opponent_conn,
                    ServerMessage::MatchFound {
                        payload: MatchFoundPayload { game_id: session.id, opponent: username.to_string() },
                        timestamp: Utc::now(),
                    },
                )
                .await;
        }
        Ok(())
    }

    async fn handle_rematch(&self, conn: ConnectionId, username: &str, game_id: SessionId) -> Result<(), ErrorCode> {
        let previous = self.sessions.get_session(game_id).await.map_err(ErrorCode::from)?;
        if previous.status == SessionStatus::Abandoned {
            return Err(ErrorCode::GameNotFound);
        }
        if previous.status == SessionStatus::InProgress || previous.status == SessionStatus::Waiting {
            return Err(ErrorCode::GameNotInProgress);
        }
        let opponent = previous.opponent_of(username).ok_or(ErrorCode::PlayerNotFound)?.to_string();

        // Swap colors so the previous loser opens, matching the usual
        // rematch convention.
        let session = self
            .sessions
            .create_session(opponent, username.to_string(), previous.kind, previous.room_code.clone())
            .await
            .map_err(ErrorCode::from)?;
        self.registry.join_room(conn, session.id).await;
        self.announce_game_started(conn, &session, username, crate::bot::is_bot(&session.player1)).await;
        Ok(())
    }

    async fn announce_game_started(&self, conn: ConnectionId, session: &crate::session::GameSession, username: &str, is_bot: bool) {
        let your_color = session.color_for(username);
        let opponent = session.opponent_of(username).unwrap_or_default().to_string();
        self.registry
            .send_to(
                conn,
                ServerMessage::GameStarted {
                    payload: GameStartedPayload {
                        game_id: session.id,
                        opponent,
                        your_color: your_color.unwrap_or(crate::engine::Color::Red),
                        current_turn: session.current_turn,
                        board: BoardView::from(&session.board),
                        is_bot,
                    },
                    timestamp: Utc::now(),
                },
            )
            .await;
    }

    async fn handle_disconnect(&self, conn: ConnectionId, username: &str) {
        self.matchmaking.dequeue(username).await;
        if let Some(session) = self.sessions.get_session_by_player(username).await {
            if session.status == SessionStatus::InProgress {
                if let Err(err) = self.sessions.mark_disconnected(session.id, username).await {
                    warn!(%username, error = %err, "failed to record disconnect");
                }
            }
        }
        self.registry.disconnect(conn).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{AnalyticsProducer, BreakerConfig, LoggingEventSink};
    use crate::clock::FrozenClock;
    use crate::repository::{InMemoryGameRepository, InMemoryStatsRepository};
    use std::time::Duration;

    fn test_hub() -> Arc<Hub> {
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
        let matchmaking = MatchmakingScheduler::new(sessions.clone(), Arc::new(clock), Duration::from_secs(10));
        Hub::new(sessions, matchmaking, ServerConfig::default())
    }

    #[tokio::test]
    async fn join_queue_reports_position_to_caller() {
        let hub = test_hub();
        let (conn, queue) = hub.registry.register("alice".into(), 8).await;
        hub.handle_join_queue(conn, "alice").await.unwrap();
        let msg = queue.pop().await.unwrap();
        assert!(matches!(msg, ServerMessage::QueueJoined { .. }));
    }

    #[tokio::test]
    async fn play_with_bot_starts_a_session_immediately() {
        let hub = test_hub();
        let (conn, queue) = hub.registry.register("alice".into(), 8).await;
        hub.handle_play_with_bot(conn, "alice", None).await.unwrap();
        let msg = queue.pop().await.unwrap();
        assert!(matches!(msg, ServerMessage::GameStarted { .. }));
    }

    #[tokio::test]
    async fn make_move_broadcasts_to_both_room_members() {
        let hub = test_hub();
        let (conn_a, queue_a) = hub.registry.register("alice".into(), 8).await;
        let (conn_b, queue_b) = hub.registry.register("bob".into(), 8).await;

        let session = hub.sessions.create_session("alice".into(), "bob".into(), SessionKind::Ranked, None).await.unwrap();
        hub.registry.join_room(conn_a, session.id).await;
        hub.registry.join_room(conn_b, session.id).await;

        hub.handle_make_move(conn_a, "alice", session.id, 3).await.unwrap();
        assert!(matches!(queue_a.pop().await.unwrap(), ServerMessage::MoveMade { .. }));
        assert!(matches!(queue_b.pop().await.unwrap(), ServerMessage::MoveMade { .. }));
    }

    #[tokio::test]
    async fn invalid_move_surfaces_as_error_from_dispatch() {
        let hub = test_hub();
        let (conn, queue) = hub.registry.register("alice".into(), 8).await;
        let session = hub.sessions.create_session("alice".into(), "bob".into(), SessionKind::Ranked, None).await.unwrap();

        hub.dispatch(
            conn,
            "bob",
            ClientMessage::MakeMove {
                payload: protocol::MakeMovePayload { game_id: session.id, column: 0 },
                timestamp: Utc::now(),
            },
        )
        .await;

        let msg = queue.pop().await.unwrap();
        match msg {
            ServerMessage::Error { payload, .. } => assert_eq!(payload.code, ErrorCode::WrongTurn),
            _ => panic!("expected error"),
        }
    }
}
