//! Game entity — the authoritative state of one match.
//!
//! DESIGN
//! ======
//! `Game` mirrors the `games` table. The board travels on the wire and in
//! the database as a JSON array of nine strings ("" | "X" | "O"), so the
//! `Board` newtype owns that mapping instead of leaking `Option<Symbol>`
//! serialization details into the protocol.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::frame::Data;

// =============================================================================
// SYMBOL
// =============================================================================

/// One of the two player marks. X always moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    X,
    O,
}

impl Symbol {
    /// The opposing mark.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::X => Self::O,
            Self::O => Self::X,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X => "X",
            Self::O => "O",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "X" => Some(Self::X),
            "O" => Some(Self::O),
            _ => None,
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// The 3x3 grid, row-major. Index 0 is top-left, 8 is bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Board(pub [Option<Symbol>; 9]);

impl Board {
    /// All nine cells empty.
    #[must_use]
    pub fn empty() -> Self {
        Self([None; 9])
    }

    #[must_use]
    pub fn cell(&self, index: usize) -> Option<Symbol> {
        self.0.get(index).copied().flatten()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }
}

impl Serialize for Board {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let cells: Vec<&str> = self
            .0
            .iter()
            .map(|c| c.map_or("", Symbol::as_str))
            .collect();
        cells.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Board {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cells: Vec<String> = Vec::deserialize(deserializer)?;
        if cells.len() != 9 {
            return Err(D::Error::custom(format!("expected 9 cells, got {}", cells.len())));
        }
        let mut board = [None; 9];
        for (i, cell) in cells.iter().enumerate() {
            board[i] = match cell.as_str() {
                "" => None,
                s => Some(Symbol::parse(s).ok_or_else(|| D::Error::custom(format!("invalid cell: {s:?}")))?),
            };
        }
        Ok(Self(board))
    }
}

// =============================================================================
// GAME
// =============================================================================

/// One ongoing or finished match. `player_x` is the creator; `player_o`
/// stays empty until a second identity joins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: Uuid,
    pub player_x: String,
    pub player_o: Option<String>,
    pub board: Board,
    pub current_turn: Symbol,
    pub winner: Option<Symbol>,
    pub is_draw: bool,
    pub winning_line: Option<[usize; 3]>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Optimistic-concurrency counter, bumped by every persisted mutation.
    pub version: i64,
}

impl Game {
    /// Fresh game hosted by `player_x`: empty board, X to move.
    #[must_use]
    pub fn new(player_x: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            player_x: player_x.to_string(),
            player_o: None,
            board: Board::empty(),
            current_turn: Symbol::X,
            winner: None,
            is_draw: false,
            winning_line: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// A game is completed once it has a winner or ended in a draw.
    /// The board is frozen until an explicit restart or rematch.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.winner.is_some() || self.is_draw
    }

    /// Whether `identity` occupies the X or O seat.
    #[must_use]
    pub fn is_participant(&self, identity: &str) -> bool {
        self.player_x == identity || self.player_o.as_deref() == Some(identity)
    }

    /// The mark held by `identity`, if any.
    #[must_use]
    pub fn symbol_of(&self, identity: &str) -> Option<Symbol> {
        if self.player_x == identity {
            Some(Symbol::X)
        } else if self.player_o.as_deref() == Some(identity) {
            Some(Symbol::O)
        } else {
            None
        }
    }

    /// The identity holding `symbol`, if that seat is taken.
    #[must_use]
    pub fn identity_of(&self, symbol: Symbol) -> Option<&str> {
        match symbol {
            Symbol::X => Some(self.player_x.as_str()),
            Symbol::O => self.player_o.as_deref(),
        }
    }

    /// Whether it is `identity`'s turn to move.
    #[must_use]
    pub fn is_turn_of(&self, identity: &str) -> bool {
        self.identity_of(self.current_turn) == Some(identity)
    }

    /// Clear the outcome and board for a restart. X moves first again.
    pub fn reset(&mut self) {
        self.board = Board::empty();
        self.current_turn = Symbol::X;
        self.winner = None;
        self.is_draw = false;
        self.winning_line = None;
    }

    /// Flat payload form used inside `game:state_update` frames.
    #[must_use]
    pub fn to_data(&self) -> Data {
        let mut data = Data::new();
        data.insert("id".into(), serde_json::json!(self.id));
        data.insert("player_x".into(), serde_json::json!(self.player_x));
        data.insert("player_o".into(), serde_json::json!(self.player_o));
        data.insert("board".into(), serde_json::json!(self.board));
        data.insert("current_turn".into(), serde_json::json!(self.current_turn));
        data.insert("winner".into(), serde_json::json!(self.winner));
        data.insert("is_draw".into(), serde_json::json!(self.is_draw));
        data.insert("winning_line".into(), serde_json::json!(self.winning_line));
        data.insert(
            "created_at".into(),
            serde_json::json!(self
                .created_at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default()),
        );
        data
    }
}

// =============================================================================
// TESTS
// =============================================================================
