use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Grid marker for a cell the players have not solved yet.
pub const UNSOLVED_CELL: char = '*';
/// Grid marker for a non-playable cell.
pub const BLOCKED_CELL: char = '.';

/// A crossword solution grid in row-major order: a letter per playable
/// cell, [`BLOCKED_CELL`] per non-playable cell. Content loading is
/// handled elsewhere; the game core only reads these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Puzzle {
    pub id: i32,
    pub width: u16,
    pub height: u16,
    pub solution: Vec<char>,
}

impl Puzzle {
    pub fn new(id: i32, width: u16, height: u16, solution: &str) -> Result<Self> {
        let cells: Vec<char> = solution.chars().collect();
        if cells.len() != width as usize * height as usize {
            bail!(
                "Puzzle {} solution has {} cells, expected {}x{}",
                id,
                cells.len(),
                width,
                height
            );
        }
        Ok(Puzzle { id, width, height, solution: cells })
    }

    pub fn cell_count(&self) -> usize {
        self.solution.len()
    }

    /// Row-major index for a coordinate pair, or None when out of range.
    pub fn index(&self, row: u16, col: u16) -> Option<usize> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some(row as usize * self.width as usize + col as usize)
    }

    /// Solution letter at a coordinate. None when out of range or when the
    /// cell is non-playable.
    pub fn solution_at(&self, row: u16, col: u16) -> Option<char> {
        let letter = self.solution[self.index(row, col)?];
        if letter == BLOCKED_CELL { None } else { Some(letter) }
    }

    pub fn playable_cells(&self) -> usize {
        self.solution.iter().filter(|&&c| c != BLOCKED_CELL).count()
    }

    /// Fresh grid for a new room: every playable cell unsolved.
    pub fn blank_grid(&self) -> Vec<char> {
        self.solution
            .iter()
            .map(|&c| if c == BLOCKED_CELL { BLOCKED_CELL } else { UNSOLVED_CELL })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn puzzle() -> Puzzle {
        Puzzle::new(1, 3, 2, "CAT.O.").unwrap()
    }

    #[test]
    fn test_indexing() {
        let p = puzzle();
        assert_eq!(p.index(0, 0), Some(0));
        assert_eq!(p.index(1, 2), Some(5));
        assert_eq!(p.index(2, 0), None);
        assert_eq!(p.index(0, 3), None);
    }

    #[test]
    fn test_solution_at_skips_blocked() {
        let p = puzzle();
        assert_eq!(p.solution_at(0, 1), Some('A'));
        assert_eq!(p.solution_at(1, 0), None); // blocked
        assert_eq!(p.solution_at(9, 9), None);
    }

    #[test]
    fn test_blank_grid() {
        let p = puzzle();
        assert_eq!(p.blank_grid(), vec!['*', '*', '*', '.', '*', '.']);
        assert_eq!(p.playable_cells(), 4);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        assert!(Puzzle::new(1, 3, 2, "CAT").is_err());
    }
}
