//! The double-buffered local sub-grid held by one rank.
//!
//! Local coordinates include the ghost margin: on an axis with a margin of one, local index
//! `0` and `owned + 1` are ghosts and the owned cells sit at `1..=owned`. An axis without a
//! margin is owned end to end by this rank and wraps around locally, which is how both the
//! unpartitioned grid and the rows of a vertical strip get their toroidal neighbors.

use std::ops::Range;

use crate::cell::Cell;

/// Moore neighborhood offsets as `(row, col)` deltas.
pub const MOORE_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Shape of a local sub-grid: the owned rectangle and the ghost margin on each axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub owned_rows: usize,
    pub owned_cols: usize,
    pub row_margin: usize,
    pub col_margin: usize,
}

impl Layout {
    #[must_use]
    pub fn new(owned_rows: usize, owned_cols: usize, row_margin: usize, col_margin: usize) -> Self {
        assert!(row_margin <= 1 && col_margin <= 1, "ghost margins are one cell deep");
        Layout {
            owned_rows,
            owned_cols,
            row_margin,
            col_margin,
        }
    }

    #[must_use]
    pub fn local_rows(&self) -> usize {
        self.owned_rows + 2 * self.row_margin
    }

    #[must_use]
    pub fn local_cols(&self) -> usize {
        self.owned_cols + 2 * self.col_margin
    }

    #[must_use]
    pub fn wraps_rows(&self) -> bool {
        self.row_margin == 0
    }

    #[must_use]
    pub fn wraps_cols(&self) -> bool {
        self.col_margin == 0
    }

    #[must_use]
    pub fn owned_row_range(&self) -> Range<usize> {
        self.row_margin..self.row_margin + self.owned_rows
    }

    #[must_use]
    pub fn owned_col_range(&self) -> Range<usize> {
        self.col_margin..self.col_margin + self.owned_cols
    }

    /// Owned rows whose neighborhood never reaches a ghost row.
    #[must_use]
    pub fn interior_row_range(&self) -> Range<usize> {
        interior(self.owned_row_range(), self.row_margin)
    }

    /// Owned columns whose neighborhood never reaches a ghost column.
    #[must_use]
    pub fn interior_col_range(&self) -> Range<usize> {
        interior(self.owned_col_range(), self.col_margin)
    }

    #[must_use]
    pub fn is_owned(&self, row: usize, col: usize) -> bool {
        self.owned_row_range().contains(&row) && self.owned_col_range().contains(&col)
    }

    #[must_use]
    pub fn is_interior(&self, row: usize, col: usize) -> bool {
        self.interior_row_range().contains(&row) && self.interior_col_range().contains(&col)
    }

    /// Owned cells that read at least one ghost cell, in row-major order.
    #[must_use]
    pub fn border_cells(&self) -> Vec<(usize, usize)> {
        let interior_rows = self.interior_row_range();
        let interior_cols = self.interior_col_range();
        let mut cells = Vec::new();
        for row in self.owned_row_range() {
            if interior_rows.contains(&row) {
                // Only the edge columns of this row touch the margin.
                for col in self.owned_col_range() {
                    if !interior_cols.contains(&col) {
                        cells.push((row, col));
                    }
                    if col + 1 == interior_cols.start && !interior_cols.is_empty() {
                        // Skip straight to the far edge.
                        for col in interior_cols.end..self.owned_col_range().end {
                            cells.push((row, col));
                        }
                        break;
                    }
                }
            } else {
                cells.extend(self.owned_col_range().map(|col| (row, col)));
            }
        }
        cells
    }
}

fn interior(owned: Range<usize>, margin: usize) -> Range<usize> {
    if margin == 0 {
        return owned;
    }
    let start = owned.start + margin;
    let end = owned.end.saturating_sub(margin).max(start);
    start..end
}

/// Two equally shaped cell buffers and a selector for the one being read.
#[derive(Clone, Debug)]
pub struct GridState {
    layout: Layout,
    buffers: [Vec<Cell>; 2],
    current: usize,
}

impl GridState {
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        let len = layout.local_rows() * layout.local_cols();
        GridState {
            layout,
            buffers: [vec![Cell::default(); len], vec![Cell::default(); len]],
            current: 0,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn index(&self, row: usize, col: usize) -> usize {
        let (rows, cols) = (self.layout.local_rows(), self.layout.local_cols());
        assert!(
            row < rows && col < cols,
            "local coordinate ({row}, {col}) is outside the {rows}x{cols} local grid"
        );
        row * cols + col
    }

    /// Reads a cell from the current buffer.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Cell {
        self.buffers[self.current][self.index(row, col)]
    }

    /// Writes the next-generation value of an owned cell.
    pub fn set_next(&mut self, row: usize, col: usize, cell: Cell) {
        debug_assert!(self.layout.is_owned(row, col), "ghost ({row}, {col}) is not writable");
        let index = self.index(row, col);
        self.buffers[1 - self.current][index] = cell;
    }

    /// Overwrites an owned cell in the current buffer. Only for initial conditions.
    pub fn set_current(&mut self, row: usize, col: usize, cell: Cell) {
        debug_assert!(self.layout.is_owned(row, col), "ghost ({row}, {col}) is not owned");
        let index = self.index(row, col);
        self.buffers[self.current][index] = cell;
    }

    /// Refreshes a ghost cell in the current buffer with a neighbor's value.
    pub fn set_ghost(&mut self, row: usize, col: usize, cell: Cell) {
        debug_assert!(!self.layout.is_owned(row, col), "({row}, {col}) is owned");
        let index = self.index(row, col);
        self.buffers[self.current][index] = cell;
    }

    /// Exchanges the roles of the two buffers.
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// The eight Moore neighbors of `(row, col)` in [`MOORE_OFFSETS`] order.
    #[must_use]
    pub fn neighborhood(&self, row: usize, col: usize) -> [Cell; 8] {
        let rows = self.layout.local_rows();
        let cols = self.layout.local_cols();
        let (wrap_rows, wrap_cols) = (self.layout.wraps_rows(), self.layout.wraps_cols());
        MOORE_OFFSETS.map(|(dr, dc)| {
            let r = step(row, dr, rows, wrap_rows);
            let c = step(col, dc, cols, wrap_cols);
            self.get(r, c)
        })
    }

    /// Owned cells of the current buffer in row-major order.
    pub fn owned_cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.layout
            .owned_row_range()
            .flat_map(move |row| self.layout.owned_col_range().map(move |col| self.get(row, col)))
    }
}

fn step(index: usize, delta: isize, extent: usize, wrap: bool) -> usize {
    if wrap {
        (index + extent).wrapping_add_signed(delta) % extent
    } else {
        // Out-of-range results are caught by `GridState::index`.
        index.wrapping_add_signed(delta)
    }
}
