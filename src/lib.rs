//! # Connect-4 Arena Server
//!
//! Realtime two-player Connect-4 with bot opponents, matchmaking, and
//! reconnection handling.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 CONNECT-4 ARENA SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  engine/         - Board, rules, move validation, outcomes   │
//! │  bot/            - Minimax opponent (iterative deepening,    │
//! │                    alpha-beta, deadline-bounded)              │
//! │  clock/          - Time as a capability (real vs frozen)     │
//! │  repository      - GameRepository / StatsRepository traits   │
//! │  session/        - GameSession state machine + SessionManager│
//! │  matchmaking/    - FIFO queue, bot escalation, custom rooms  │
//! │  hub/            - WebSocket wire protocol, connection        │
//! │                    registry, reader/writer pump               │
//! │  analytics/      - Fire-and-forget event pipeline with a     │
//! │                    circuit breaker guarding the sink          │
//! │  config          - Process-wide tunables, env overridable    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! There is no single global loop. Each connection owns a reader and a
//! writer task; each bot turn spawns a transient task; a recurring task
//! drives matchmaking ticks, another drives session sweeping, and the
//! analytics worker drains its queue independently. The sessions table is
//! guarded by one lock for membership changes only — each session's data
//! lives behind its own mutex, so moves to distinct games proceed in
//! parallel (see `session::manager`).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod analytics;
pub mod bot;
pub mod clock;
pub mod config;
pub mod engine;
pub mod hub;
pub mod matchmaking;
pub mod repository;
pub mod session;

pub use clock::{Clock, FrozenClock, SystemClock};
pub use config::ServerConfig;
pub use engine::{Board, Cell, Color, Move, Outcome, RuleError, COLS, ROWS, WIN_LENGTH};
pub use hub::Hub;
pub use matchmaking::MatchmakingScheduler;
pub use repository::{GameRepository, PlayerStats, StatsRepository};
pub use session::{GameSession, SessionId, SessionManager};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
