//! The bot opponent: minimax with iterative deepening, alpha-beta pruning,
//! center-out move ordering, and a hard deadline.

pub mod eval;
pub mod search;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::engine::{Board, Color};

pub use search::{choose_move, tactical_pass, MAX_DEPTH, MOVE_ORDER, WIN_SCORE};

/// Bot skill level. Each level subtracts a different "human delay" from the
/// hard 1-second total bot-latency budget so weaker bots appear to think
/// less and reply faster, and stronger bots get more search time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotDifficulty {
    Easy,
    Medium,
    Hard,
}

impl BotDifficulty {
    /// Intentional pause after the bot decides, so the response feels
    /// natural, subtracted from the 1 s total budget before the deadline
    /// passed to [`choose_move`].
    pub fn human_delay(self) -> Duration {
        match self {
            BotDifficulty::Easy => Duration::from_millis(500),
            BotDifficulty::Medium => Duration::from_millis(300),
            BotDifficulty::Hard => Duration::from_millis(100),
        }
    }
}

/// Total bot-latency budget: search time plus human delay never exceeds
/// this.
pub const BOT_TOTAL_BUDGET: Duration = Duration::from_secs(1);

/// Computes the absolute search deadline for a bot turn at `difficulty`,
/// starting from `now`.
pub fn search_deadline(now: Instant, difficulty: BotDifficulty) -> Instant {
    now + BOT_TOTAL_BUDGET.saturating_sub(difficulty.human_delay())
}

/// Reserved username prefix marking an identifier as an automated
/// opponent. The prefix is the only contract — callers must never mint a
/// human username matching it.
pub const BOT_PREFIX: &str = "Bot_";

/// True if `username` is a bot identifier by convention.
pub fn is_bot(username: &str) -> bool {
    username.starts_with(BOT_PREFIX)
}

/// Mints a fresh bot identifier, unique enough to avoid collisions within a
/// single process's lifetime.
pub fn mint_bot_identifier() -> String {
    format!("{BOT_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

/// Chooses a move for the bot, respecting the deadline, and falling back to
/// the always-available tactical pass if `choose_move` cannot complete in
/// time (defensive: `choose_move` itself already respects the deadline, but
/// a caller invoking this after the deadline slipped — e.g. due to
/// scheduling delay — still gets a legal column).
pub fn choose_move_or_fallback(board: &Board, self_color: Color, deadline: Instant) -> Option<u8> {
    if Instant::now() >= deadline {
        return tactical_pass(board, self_color);
    }
    choose_move(board, self_color, deadline).or_else(|| tactical_pass(board, self_color))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_prefix_recognizes_bot_identifiers() {
        assert!(is_bot("Bot_abc123"));
        assert!(!is_bot("alice"));
    }

    #[test]
    fn minted_identifiers_carry_prefix() {
        let id = mint_bot_identifier();
        assert!(is_bot(&id));
    }

    #[test]
    fn human_delay_ordering() {
        assert!(BotDifficulty::Easy.human_delay() > BotDifficulty::Medium.human_delay());
        assert!(BotDifficulty::Medium.human_delay() > BotDifficulty::Hard.human_delay());
    }

    #[test]
    fn deadline_never_exceeds_total_budget() {
        let now = Instant::now();
        for difficulty in [BotDifficulty::Easy, BotDifficulty::Medium, BotDifficulty::Hard] {
            let deadline = search_deadline(now, difficulty);
            assert!(deadline.duration_since(now) <= BOT_TOTAL_BUDGET);
        }
    }

    #[test]
    fn fallback_returns_legal_move_past_deadline() {
        let board = Board::new();
        let already_past = Instant::now() - Duration::from_millis(10);
        let col = choose_move_or_fallback(&board, Color::Red, already_past);
        assert!(col.is_some());
    }
}
