//! Domain decomposition of the global grid.
//!
//! A [`PartitionScheme`] turns a `global_rows x global_cols` grid and a process count into one
//! [`Subdomain`] per rank: the owned rectangle, the ghost [`Layout`], and a neighbor table that
//! maps each [`Direction`] to the rank on the other side of that edge (if any).
//!
//! * `Single` keeps the whole grid on rank 0 and wraps both axes.
//! * `Strip1D` slices the grid into vertical strips arranged in a periodic ring. Every strip
//!   spans all rows, so rows wrap locally and only the two edge columns need ghosts.
//! * `Block2D` tiles the grid into an `R x C` process grid. Neighbors are looked up from a
//!   rank's coordinate in that grid; there is no wraparound off the edge of the tiling.
//!
//! Extents that do not divide evenly are split as evenly as possible, so slices differ in size
//! by at most one cell and every global cell still has exactly one owner.

use strum::{EnumIter, IntoEnumIterator};

use crate::error::EpigridError;
use crate::grid::Layout;

/// The eight directions a ghost segment can face.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter)]
pub enum Direction {
    North,
    South,
    West,
    East,
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
}

impl Direction {
    /// `(row, col)` step towards this direction.
    #[must_use]
    pub fn offset(self) -> (isize, isize) {
        match self {
            Direction::North => (-1, 0),
            Direction::South => (1, 0),
            Direction::West => (0, -1),
            Direction::East => (0, 1),
            Direction::NorthWest => (-1, -1),
            Direction::NorthEast => (-1, 1),
            Direction::SouthWest => (1, -1),
            Direction::SouthEast => (1, 1),
        }
    }

    #[must_use]
    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
            Direction::East => Direction::West,
            Direction::NorthWest => Direction::SouthEast,
            Direction::NorthEast => Direction::SouthWest,
            Direction::SouthWest => Direction::NorthEast,
            Direction::SouthEast => Direction::NorthWest,
        }
    }

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn is_corner(self) -> bool {
        let (dr, dc) = self.offset();
        dr != 0 && dc != 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PartitionScheme {
    /// No partitioning: one rank owns the torus.
    Single,
    /// Vertical strips in a periodic ring.
    Strip1D,
    /// A `process_rows x process_cols` tiling, ranks numbered row-major.
    Block2D {
        process_rows: usize,
        process_cols: usize,
    },
}

impl PartitionScheme {
    /// A `Block2D` tiling for `process_count` ranks that is as close to square as possible.
    #[must_use]
    pub fn block(process_count: usize) -> PartitionScheme {
        let mut process_rows = 1;
        let mut candidate = 1;
        while candidate * candidate <= process_count {
            if process_count % candidate == 0 {
                process_rows = candidate;
            }
            candidate += 1;
        }
        PartitionScheme::Block2D {
            process_rows,
            process_cols: process_count / process_rows.max(1),
        }
    }

    /// Computes the subdomain of every rank.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::PartitionError` when the grid is empty, there are no processes,
    /// the tiling does not match the process count, or some rank would own no cells.
    pub fn decompose(
        self,
        global_rows: usize,
        global_cols: usize,
        process_count: usize,
    ) -> Result<Decomposition, EpigridError> {
        if global_rows == 0 || global_cols == 0 {
            return Err(EpigridError::PartitionError(format!(
                "cannot partition an empty {global_rows}x{global_cols} grid"
            )));
        }
        if process_count == 0 {
            return Err(EpigridError::PartitionError(
                "at least one process is required".to_string(),
            ));
        }

        let (process_rows, process_cols, row_margin, col_margin) = match self {
            PartitionScheme::Single => {
                if process_count != 1 {
                    return Err(EpigridError::PartitionError(format!(
                        "the single scheme runs on exactly one process, not {process_count}"
                    )));
                }
                (1, 1, 0, 0)
            }
            PartitionScheme::Strip1D => (1, process_count, 0, 1),
            PartitionScheme::Block2D {
                process_rows,
                process_cols,
            } => {
                if process_rows * process_cols != process_count {
                    return Err(EpigridError::PartitionError(format!(
                        "a {process_rows}x{process_cols} tiling needs {} processes, not {process_count}",
                        process_rows * process_cols
                    )));
                }
                (process_rows, process_cols, 1, 1)
            }
        };

        if process_rows > global_rows || process_cols > global_cols {
            return Err(EpigridError::PartitionError(format!(
                "a {global_rows}x{global_cols} grid cannot be split {process_rows}x{process_cols}"
            )));
        }

        let subdomains = (0..process_count)
            .map(|rank| {
                let (process_row, process_col) = (rank / process_cols, rank % process_cols);
                let (row_start, row_end) = split(global_rows, process_rows, process_row);
                let (col_start, col_end) = split(global_cols, process_cols, process_col);
                let mut neighbors = [None; 8];
                for direction in Direction::iter() {
                    neighbors[direction.index()] =
                        self.neighbor(process_rows, process_cols, process_row, process_col, direction);
                }
                Subdomain {
                    rank,
                    row_start,
                    row_end,
                    col_start,
                    col_end,
                    layout: Layout::new(
                        row_end - row_start,
                        col_end - col_start,
                        row_margin,
                        col_margin,
                    ),
                    neighbors,
                }
            })
            .collect();

        Ok(Decomposition {
            scheme: self,
            global_rows,
            global_cols,
            subdomains,
        })
    }

    fn neighbor(
        self,
        process_rows: usize,
        process_cols: usize,
        process_row: usize,
        process_col: usize,
        direction: Direction,
    ) -> Option<usize> {
        match self {
            PartitionScheme::Single => None,
            PartitionScheme::Strip1D => match direction {
                Direction::West => Some((process_col + process_cols - 1) % process_cols),
                Direction::East => Some((process_col + 1) % process_cols),
                _ => None,
            },
            PartitionScheme::Block2D { .. } => {
                let (dr, dc) = direction.offset();
                let row = process_row.checked_add_signed(dr).filter(|r| *r < process_rows)?;
                let col = process_col.checked_add_signed(dc).filter(|c| *c < process_cols)?;
                Some(row * process_cols + col)
            }
        }
    }
}

/// Bounds of slice `index` when `extent` cells are split into `parts` slices.
fn split(extent: usize, parts: usize, index: usize) -> (usize, usize) {
    (index * extent / parts, (index + 1) * extent / parts)
}

/// The part of the global grid one rank owns and who its neighbors are.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subdomain {
    pub rank: usize,
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
    pub layout: Layout,
    neighbors: [Option<usize>; 8],
}

impl Subdomain {
    #[must_use]
    pub fn owned_rows(&self) -> usize {
        self.row_end - self.row_start
    }

    #[must_use]
    pub fn owned_cols(&self) -> usize {
        self.col_end - self.col_start
    }

    #[must_use]
    pub fn owned_len(&self) -> usize {
        self.owned_rows() * self.owned_cols()
    }

    /// The rank across the given edge, or `None` if nothing is there.
    #[must_use]
    pub fn neighbor(&self, direction: Direction) -> Option<usize> {
        self.neighbors[direction.index()]
    }

    /// Directions that have a neighbor, in a fixed order.
    pub fn neighbor_directions(&self) -> impl Iterator<Item = (Direction, usize)> + '_ {
        Direction::iter().filter_map(|d| self.neighbor(d).map(|rank| (d, rank)))
    }

    #[must_use]
    pub fn owns(&self, global_row: usize, global_col: usize) -> bool {
        (self.row_start..self.row_end).contains(&global_row)
            && (self.col_start..self.col_end).contains(&global_col)
    }

    /// Local coordinates of an owned global cell.
    #[must_use]
    pub fn to_local(&self, global_row: usize, global_col: usize) -> Option<(usize, usize)> {
        self.owns(global_row, global_col).then(|| {
            (
                global_row - self.row_start + self.layout.row_margin,
                global_col - self.col_start + self.layout.col_margin,
            )
        })
    }

    /// Global coordinates of an owned local cell.
    #[must_use]
    pub fn to_global(&self, local_row: usize, local_col: usize) -> (usize, usize) {
        debug_assert!(self.layout.is_owned(local_row, local_col));
        (
            local_row - self.layout.row_margin + self.row_start,
            local_col - self.layout.col_margin + self.col_start,
        )
    }
}

/// The static topology of a run: one subdomain per rank.
#[derive(Clone, Debug)]
pub struct Decomposition {
    pub scheme: PartitionScheme,
    pub global_rows: usize,
    pub global_cols: usize,
    subdomains: Vec<Subdomain>,
}

impl Decomposition {
    #[must_use]
    pub fn process_count(&self) -> usize {
        self.subdomains.len()
    }

    /// # Panics
    ///
    /// Panics if `rank` is not part of the decomposition.
    #[must_use]
    pub fn subdomain(&self, rank: usize) -> &Subdomain {
        &self.subdomains[rank]
    }

    pub fn subdomains(&self) -> impl Iterator<Item = &Subdomain> {
        self.subdomains.iter()
    }

    /// The rank that owns a global cell.
    #[must_use]
    pub fn owner_of(&self, global_row: usize, global_col: usize) -> Option<usize> {
        self.subdomains
            .iter()
            .find(|s| s.owns(global_row, global_col))
            .map(|s| s.rank)
    }

    /// Total number of owned cells over all ranks.
    #[must_use]
    pub fn owned_total(&self) -> usize {
        self.subdomains.iter().map(Subdomain::owned_len).sum()
    }
}
