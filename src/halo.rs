//! Ghost-cell exchange between neighboring subdomains.
//!
//! Every generation each rank sends the owned cells along each edge that has a neighbor and
//! then fills its ghost margin with what the neighbors sent. A message is tagged with the
//! direction it travels, so the ghosts on a rank's west side arrive tagged `Halo(East)` from
//! the western neighbor. Corner segments are single cells and only exist for `Block2D`.
//!
//! Sides without a neighbor keep the default cell in their ghosts. A default cell is neither
//! contagious nor vaccinated, so it never affects the rule.

use std::ops::Range;

use log::trace;

use crate::cell::{pack_cells, unpack_cells};
use crate::comm::{Communicator, Payload, Tag};
use crate::error::EpigridError;
use crate::grid::{GridState, Layout};
use crate::partition::{Direction, Subdomain};

/// A rectangle of local coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Segment {
    rows: Range<usize>,
    cols: Range<usize>,
}

impl Segment {
    fn len(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    fn coordinates(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows
            .clone()
            .flat_map(move |row| self.cols.clone().map(move |col| (row, col)))
    }
}

/// Owned cells along the edge facing `direction`.
fn boundary(layout: &Layout, direction: Direction) -> Segment {
    let owned_rows = layout.owned_row_range();
    let owned_cols = layout.owned_col_range();
    let (dr, dc) = direction.offset();
    Segment {
        rows: edge(owned_rows, dr, 0),
        cols: edge(owned_cols, dc, 0),
    }
}

/// Ghost cells just outside the edge facing `direction`.
fn ghosts(layout: &Layout, direction: Direction) -> Segment {
    let owned_rows = layout.owned_row_range();
    let owned_cols = layout.owned_col_range();
    let (dr, dc) = direction.offset();
    Segment {
        rows: edge(owned_rows, dr, 1),
        cols: edge(owned_cols, dc, 1),
    }
}

/// One line of `owned` offset `outward` cells past the edge picked by `delta`, or the whole
/// range when `delta` is zero.
fn edge(owned: Range<usize>, delta: isize, outward: usize) -> Range<usize> {
    match delta {
        -1 => {
            let index = owned.start - outward;
            index..index + 1
        }
        1 => {
            let index = owned.end - 1 + outward;
            index..index + 1
        }
        _ => owned,
    }
}

#[derive(Clone, Debug)]
struct Route {
    direction: Direction,
    neighbor: usize,
    boundary: Segment,
    ghosts: Segment,
}

/// The send and receive routes of one rank, fixed for the whole run.
#[derive(Clone, Debug)]
pub struct HaloExchange {
    routes: Vec<Route>,
}

impl HaloExchange {
    #[must_use]
    pub fn new(subdomain: &Subdomain) -> Self {
        let layout = subdomain.layout;
        let routes = subdomain
            .neighbor_directions()
            .map(|(direction, neighbor)| Route {
                direction,
                neighbor,
                boundary: boundary(&layout, direction),
                ghosts: ghosts(&layout, direction),
            })
            .collect();
        HaloExchange { routes }
    }

    /// True when this rank has no neighbors, as in the unpartitioned run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Number of cells this rank sends per generation.
    #[must_use]
    pub fn outgoing_cells(&self) -> usize {
        self.routes.iter().map(|route| route.boundary.len()).sum()
    }

    /// Sends every boundary segment of the current buffer to the neighbor it faces.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::CommunicationError` if a neighbor cannot be reached.
    pub fn send_boundaries<C: Communicator + ?Sized>(
        &self,
        grid: &GridState,
        comm: &mut C,
        generation: u64,
    ) -> Result<(), EpigridError> {
        for route in &self.routes {
            let cells = pack_cells(
                route
                    .boundary
                    .coordinates()
                    .map(|(row, col)| grid.get(row, col)),
            );
            trace!(
                "rank {} sends {} cells {:?} to rank {}",
                comm.rank(),
                cells.len(),
                route.direction,
                route.neighbor
            );
            comm.send(
                route.neighbor,
                Tag::Halo(route.direction),
                generation,
                Payload::Cells(cells),
            )?;
        }
        Ok(())
    }

    /// Waits for every neighbor's boundary and writes it into the ghost margin.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::CommunicationError` if a segment is missing, belongs to another
    /// generation, or does not match the size of the ghost segment it should fill.
    pub fn receive_ghosts<C: Communicator + ?Sized>(
        &self,
        grid: &mut GridState,
        comm: &mut C,
        generation: u64,
    ) -> Result<(), EpigridError> {
        for route in &self.routes {
            let payload = comm.receive(
                route.neighbor,
                Tag::Halo(route.direction.opposite()),
                generation,
            )?;
            let Payload::Cells(cells) = payload else {
                return Err(EpigridError::CommunicationError(format!(
                    "rank {} sent a non-cell payload for the {:?} ghosts",
                    route.neighbor, route.direction
                )));
            };
            if cells.len() != route.ghosts.len() {
                return Err(EpigridError::CommunicationError(format!(
                    "rank {} sent {} cells for {} {:?} ghosts",
                    route.neighbor,
                    cells.len(),
                    route.ghosts.len(),
                    route.direction
                )));
            }
            for ((row, col), cell) in route.ghosts.coordinates().zip(unpack_cells(&cells)) {
                grid.set_ghost(row, col, cell);
            }
        }
        Ok(())
    }
}
