//! Per-generation hooks that run on the coordinating rank.
//!
//! When at least one observer is registered, the coordinator gathers the whole grid after
//! every generation and hands each observer a [`GridSnapshot`]. Observers see the state the
//! ranks just computed and cannot change it.

use crate::cell::{Cell, CellState};
use crate::error::EpigridError;
use crate::report::StateCounts;

/// The assembled global grid in row-major order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridSnapshot {
    pub rows: usize,
    pub cols: usize,
    cells: Vec<Cell>,
}

impl GridSnapshot {
    /// # Panics
    ///
    /// Panics if `cells` does not hold exactly `rows * cols` cells.
    #[must_use]
    pub fn new(rows: usize, cols: usize, cells: Vec<Cell>) -> Self {
        assert_eq!(cells.len(), rows * cols, "snapshot size does not match its shape");
        GridSnapshot { rows, cols, cells }
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Cell {
        self.cells[row * self.cols + col]
    }

    #[must_use]
    pub fn state(&self, row: usize, col: usize) -> CellState {
        self.get(row, col).state()
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[must_use]
    pub fn counts(&self) -> StateCounts {
        self.cells.iter().collect()
    }
}

pub trait Observer {
    /// Called once per generation, starting with the initial grid as generation 0.
    ///
    /// # Errors
    ///
    /// An error stops the run on every rank.
    fn on_generation(&mut self, generation: u64, snapshot: &GridSnapshot)
        -> Result<(), EpigridError>;

    /// Called after the last generation.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered output cannot be flushed.
    fn finish(&mut self) -> Result<(), EpigridError> {
        Ok(())
    }
}

/// Keeps every snapshot in memory. Mostly useful for tests.
#[derive(Debug, Default)]
pub struct SnapshotRecorder {
    pub snapshots: Vec<(u64, GridSnapshot)>,
}

impl Observer for SnapshotRecorder {
    fn on_generation(
        &mut self,
        generation: u64,
        snapshot: &GridSnapshot,
    ) -> Result<(), EpigridError> {
        self.snapshots.push((generation, snapshot.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_are_row_major() {
        let mut cells = vec![Cell::default(); 6];
        cells[4] = Cell {
            is_dead: true,
            ..Cell::default()
        };
        let snapshot = GridSnapshot::new(2, 3, cells);
        assert_eq!(snapshot.state(1, 1), CellState::Dead);
        assert_eq!(snapshot.state(0, 1), CellState::Default);
        assert_eq!(snapshot.counts().dead, 1);
        assert_eq!(snapshot.counts().total(), 6);
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn mismatched_shapes_are_rejected() {
        let _ = GridSnapshot::new(2, 2, vec![Cell::default(); 3]);
    }
}
