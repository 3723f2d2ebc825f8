//! Explosion geometry for the atomic variant.
//!
//! A capture in atomic removes the captured piece and every occupant of
//! the surrounding squares. The controller turns these squares into
//! piece-removal edits for the board widget.

use crate::domain::square::Square;

/// The eight squares adjacent to `center` (fewer at edges and corners).
#[must_use]
pub fn neighbors(center: Square) -> Vec<Square> {
    let mut squares = Vec::with_capacity(8);
    for df in -1i8..=1 {
        for dr in -1i8..=1 {
            if df == 0 && dr == 0 {
                continue;
            }
            let file = center.file().wrapping_add_signed(df);
            let rank = center.rank().wrapping_add_signed(dr);
            if let Some(sq) = Square::new(file, rank) {
                squares.push(sq);
            }
        }
    }
    squares
}

/// Every square an explosion centered on `center` clears, the center
/// included.
#[must_use]
pub fn explosion_squares(center: Square) -> Vec<Square> {
    let mut squares = vec![center];
    squares.extend(neighbors(center));
    squares
}
