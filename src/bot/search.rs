//! Minimax with alpha-beta pruning and iterative deepening.
//!
//! `choose_move` always returns a legal column whenever at least one
//! exists, and never runs past the supplied deadline by more than a small
//! implementation slack (a single in-flight recursive call finishing).

use std::time::Instant;

use tracing::debug;

use crate::engine::{apply_move, detect_outcome, Board, Color, Move, Outcome, COLS};

use super::eval::evaluate;

/// Columns tried in this order at every node: center outward. Substantially
/// improves alpha-beta pruning versus left-to-right order.
pub const MOVE_ORDER: [u8; COLS] = [3, 2, 4, 1, 5, 0, 6];

/// Score magnitude large enough to dominate any heuristic evaluation.
pub const WIN_SCORE: i32 = 1_000_000;

/// Maximum iterative-deepening depth attempted.
pub const MAX_DEPTH: u8 = 7;

/// Legal (non-full) columns, in center-outward order.
fn legal_columns(board: &Board) -> Vec<u8> {
    MOVE_ORDER.iter().copied().filter(|&c| !board.is_column_full(c as usize)).collect()
}

/// Returns the first column (in move order) that is an immediate win for
/// `color`, if any.
fn immediate_win(board: &Board, color: Color) -> Option<u8> {
    for col in legal_columns(board) {
        let mut copy = board.clone();
        let row = apply_move(&mut copy, color, col);
        let mv = Move { color, column: col, row, sequence: 0 };
        if detect_outcome(&copy, mv) == Outcome::Win(color) {
            return Some(col);
        }
    }
    None
}

/// The tactical pass: win-if-possible, else block-if-threatened. Computable
/// in microseconds; always available even under a blown deadline, and
/// forms the mandatory fallback when deeper search is interrupted.
pub fn tactical_pass(board: &Board, self_color: Color) -> Option<u8> {
    if let Some(col) = immediate_win(board, self_color) {
        return Some(col);
    }
    if let Some(col) = immediate_win(board, self_color.opponent()) {
        return Some(col);
    }
    legal_columns(board).into_iter().next()
}

/// Chooses a move for `self_color` within `deadline`. Always returns a
/// legal column when one exists (returns `None` only on a full board).
pub fn choose_move(board: &Board, self_color: Color, deadline: Instant) -> Option<u8> {
    let legal = legal_columns(board);
    if legal.is_empty() {
        return None;
    }
    if legal.len() == 1 {
        return Some(legal[0]);
    }

    if let Some(col) = immediate_win(board, self_color) {
        return Some(col);
    }
    if let Some(col) = immediate_win(board, self_color.opponent()) {
        return Some(col);
    }

    let mut best = legal[0];
    let mut nodes_total = 0u64;
    let mut depth_reached = 0u8;

    for depth in 1..=MAX_DEPTH {
        if Instant::now() >= deadline {
            break;
        }
        let mut nodes = 0u64;
        match search_root(board, self_color, depth, deadline, &mut nodes) {
            Some((col, _score)) => {
                best = col;
                depth_reached = depth;
                nodes_total += nodes;
            }
            None => break,
        }
    }

    debug!(depth_reached, nodes_total, column = best, "bot search complete");
    Some(best)
}

fn search_root(
    board: &Board,
    self_color: Color,
    depth: u8,
    deadline: Instant,
    nodes: &mut u64,
) -> Option<(u8, i32)> {
    let mut alpha = -WIN_SCORE * 2;
    let beta = WIN_SCORE * 2;
    let mut best: Option<(u8, i32)> = None;

    for col in legal_columns(board) {
        if Instant::now() >= deadline && best.is_some() {
            return best;
        }
        let mut next = board.clone();
        let row = apply_move(&mut next, self_color, col);
        let mv = Move { color: self_color, column: col, row, sequence: 0 };
        let score = match detect_outcome(&next, mv) {
            Outcome::Win(winner) => terminal_score(winner, self_color, depth),
            Outcome::Draw => 0,
            Outcome::InProgress => {
                -negamax(&next, self_color.opponent(), self_color, depth - 1, -beta, -alpha, deadline, nodes)
            }
        };
        *nodes += 1;

        if best.map(|(_, b)| score > b).unwrap_or(true) {
            best = Some((col, score));
        }
        if score > alpha {
            alpha = score;
        }
    }

    best
}

/// Negamax form of minimax: `node_color` is the player to move at this
/// node, `self_color` is the root's perspective used for terminal scoring.
fn negamax(
    board: &Board,
    node_color: Color,
    self_color: Color,
    depth: u8,
    mut alpha: i32,
    beta: i32,
    deadline: Instant,
    nodes: &mut u64,
) -> i32 {
    *nodes += 1;

    if depth == 0 || Instant::now() >= deadline {
        let raw = evaluate(board, self_color);
        return if node_color == self_color { raw } else { -raw };
    }

    let legal = legal_columns(board);
    if legal.is_empty() {
        return 0; // draw: no legal moves left and no line (detect_outcome would have caught wins earlier)
    }

    let mut best = -WIN_SCORE * 2;
    for col in legal {
        let mut next = board.clone();
        let row = apply_move(&mut next, node_color, col);
        let mv = Move { color: node_color, column: col, row, sequence: 0 };

        let score = match detect_outcome(&next, mv) {
            Outcome::Win(winner) => terminal_score(winner, self_color, depth),
            Outcome::Draw => 0,
            Outcome::InProgress => {
                -negamax(&next, node_color.opponent(), self_color, depth - 1, -beta, -alpha, deadline, nodes)
            }
        };

        if score > best {
            best = score;
        }
        if best > alpha {
            alpha = best;
        }
        if alpha >= beta {
            break; // beta cutoff
        }
    }

    best
}

/// Terminal score for a position where `winner` has just completed a line,
/// viewed from `self_color`'s perspective: winning positions score
/// `+WIN_SCORE + depth` (prefer faster wins), losing positions score
/// `-WIN_SCORE - depth` (prefer slower losses).
pub fn terminal_score(winner: Color, self_color: Color, depth: u8) -> i32 {
    let magnitude = WIN_SCORE + depth as i32;
    if winner == self_color {
        magnitude
    } else {
        -magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn deadline_in(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[test]
    fn takes_immediate_win() {
        let mut board = Board::new();
        apply_move(&mut board, Color::Red, 0);
        apply_move(&mut board, Color::Yellow, 0);
        apply_move(&mut board, Color::Red, 1);
        apply_move(&mut board, Color::Yellow, 1);
        apply_move(&mut board, Color::Red, 2);
        apply_move(&mut board, Color::Yellow, 2);
        // Red can win at column 3.
        let col = choose_move(&board, Color::Red, deadline_in(200)).unwrap();
        assert_eq!(col, 3);
    }

    #[test]
    fn blocks_opponent_immediate_win() {
        let mut board = Board::new();
        apply_move(&mut board, Color::Yellow, 0);
        apply_move(&mut board, Color::Red, 4);
        apply_move(&mut board, Color::Yellow, 1);
        apply_move(&mut board, Color::Red, 4);
        apply_move(&mut board, Color::Yellow, 2);
        // It's Red's turn; Yellow threatens a win at column 3. Red must block.
        let col = choose_move(&board, Color::Red, deadline_in(200)).unwrap();
        assert_eq!(col, 3);
    }

    #[test]
    fn never_illegal_when_moves_remain() {
        let mut board = Board::new();
        for col in 0..6u8 {
            for _ in 0..6 {
                let turn = if board.disc_count() % 2 == 0 { Color::Red } else { Color::Yellow };
                if !board.is_column_full(col as usize) {
                    apply_move(&mut board, turn, col);
                }
            }
        }
        // Only column 6 remains open.
        let col = choose_move(&board, Color::Red, deadline_in(50)).unwrap();
        assert_eq!(col, 6);
    }

    #[test]
    fn returns_none_on_full_board() {
        let mut board = Board::new();
        for col in 0..COLS as u8 {
            for row in 0..6 {
                let turn = if (col as usize * 6 + row) % 2 == 0 { Color::Red } else { Color::Yellow };
                apply_move(&mut board, turn, col);
            }
        }
        assert!(board.is_full());
        assert!(choose_move(&board, Color::Red, deadline_in(50)).is_none());
    }

    #[test]
    fn respects_deadline() {
        let board = Board::new();
        let start = Instant::now();
        let deadline = start + Duration::from_millis(40);
        let col = choose_move(&board, Color::Red, deadline);
        assert!(col.is_some());
        // Allow small implementation slack for the in-flight node to unwind.
        assert!(Instant::now() < deadline + Duration::from_millis(150));
    }

    #[test]
    fn tactical_pass_always_legal() {
        let board = Board::new();
        assert!(tactical_pass(&board, Color::Red).is_some());
    }
}
