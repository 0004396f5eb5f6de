//! Board evaluation — pure win/draw arithmetic.
//!
//! DESIGN
//! ======
//! Checks the eight winning triples in a fixed priority order (rows, then
//! columns, then diagonals) and reports the first fully-occupied one. The
//! Room Coordinator is the only caller; nothing here touches state.

use crate::services::game::{Board, Symbol};

/// The eight winning triples, in evaluation priority order.
const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Result of a winning evaluation: who won and on which triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub winner: Symbol,
    pub line: [usize; 3],
}

/// Find the first fully-occupied triple, if any.
#[must_use]
pub fn evaluate(board: &Board) -> Option<Evaluation> {
    for line in LINES {
        let [a, b, c] = line;
        if let Some(symbol) = board.cell(a) {
            if board.cell(b) == Some(symbol) && board.cell(c) == Some(symbol) {
                return Some(Evaluation { winner: symbol, line });
            }
        }
    }
    None
}

/// A draw is a full board with no winner.
#[must_use]
pub fn is_draw(board: &Board, evaluation: Option<&Evaluation>) -> bool {
    evaluation.is_none() && board.is_full()
}

/// Cell indices run 0..9, row-major.
#[must_use]
pub fn is_valid_index(index: usize) -> bool {
    index < 9
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_of(cells: [&str; 9]) -> Board {
        let mut board = Board::empty();
        for (i, cell) in cells.iter().enumerate() {
            board.0[i] = Symbol::parse(cell);
        }
        board
    }

    #[test]
    fn empty_board_has_no_winner() {
        assert_eq!(evaluate(&Board::empty()), None);
    }

    #[test]
    fn detects_every_row_column_and_diagonal() {
        for line in LINES {
            let mut board = Board::empty();
            for index in line {
                board.0[index] = Some(Symbol::O);
            }
            let eval = evaluate(&board).expect("line should win");
            assert_eq!(eval.winner, Symbol::O);
            assert_eq!(eval.line, line);
        }
    }

    #[test]
    fn winning_line_cells_all_match_winner() {
        let board = board_of(["X", "X", "X", "O", "O", "", "", "", ""]);
        let eval = evaluate(&board).unwrap();
        assert_eq!(eval.winner, Symbol::X);
        for index in eval.line {
            assert_eq!(board.cell(index), Some(Symbol::X));
        }
    }

    #[test]
    fn row_beats_diagonal_in_priority() {
        // Both the top row and the main diagonal are complete for X;
        // the fixed order reports the row.
        let board = board_of(["X", "X", "X", "O", "X", "O", "", "", "X"]);
        assert_eq!(evaluate(&board).unwrap().line, [0, 1, 2]);
    }

    #[test]
    fn mixed_triples_do_not_win() {
        let board = board_of(["X", "O", "X", "X", "O", "O", "O", "X", "X"]);
        assert_eq!(evaluate(&board), None);
    }

    #[test]
    fn full_board_without_winner_is_draw() {
        let board = board_of(["X", "O", "X", "X", "O", "O", "O", "X", "X"]);
        let eval = evaluate(&board);
        assert!(is_draw(&board, eval.as_ref()));
    }

    #[test]
    fn incomplete_board_is_not_draw() {
        let board = board_of(["X", "O", "X", "", "", "", "", "", ""]);
        assert!(!is_draw(&board, None));
    }

    #[test]
    fn won_board_is_not_draw_even_when_full() {
        let board = board_of(["X", "X", "X", "O", "O", "X", "X", "O", "O"]);
        let eval = evaluate(&board);
        assert!(eval.is_some());
        assert!(!is_draw(&board, eval.as_ref()));
    }

    #[test]
    fn index_bounds() {
        assert!(is_valid_index(0));
        assert!(is_valid_index(8));
        assert!(!is_valid_index(9));
    }
}
