//! Live game state: the `GameSession` data model and the `SessionManager`
//! that owns its lifecycle.

pub mod manager;
pub mod types;

pub use manager::SessionManager;
pub use types::{EndReason, GameSession, MoveOutcome, SessionError, SessionId, SessionKind, SessionStatus};
