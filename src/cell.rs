//! The state of a single person on the grid.
//!
//! A [`Cell`] is a plain value with named fields. It has no identity beyond its grid position
//! and is copied freely. When cells cross a rank boundary they are packed into a 16-bit
//! [`WireCell`]:
//!
//! | bits  | field                |
//! |-------|----------------------|
//! | 0     | `is_infected`        |
//! | 1     | `is_immune`          |
//! | 2     | `is_dead`            |
//! | 3     | `is_vaccinated`      |
//! | 4-5   | `days_of_incubation` |
//! | 6-8   | `days_of_infection`  |
//! | 9-15  | `age`                |

use serde_derive::Serialize;
use strum::EnumIter;

/// Incubation days saturate at this value; a cell becomes contagious two days earlier.
pub const MAX_DAYS_OF_INCUBATION: u8 = 3;
/// Infection days saturate at this value.
pub const MAX_DAYS_OF_INFECTION: u8 = 7;
/// Ages are drawn from `0..MAX_AGE`.
pub const MAX_AGE: u8 = 100;
/// Incubation day from which an infected neighbor is contagious.
pub const CONTAGIOUS_AFTER_DAYS: u8 = 2;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Cell {
    pub is_infected: bool,
    pub is_immune: bool,
    pub is_dead: bool,
    pub is_vaccinated: bool,
    pub days_of_incubation: u8,
    pub days_of_infection: u8,
    pub age: u8,
}

impl Cell {
    /// A healthy, never-infected person of the given age.
    #[must_use]
    pub fn with_age(age: u8) -> Self {
        Cell {
            age,
            ..Cell::default()
        }
    }

    /// Dead and vaccinated people never change again.
    #[must_use]
    pub fn is_absorbed(&self) -> bool {
        self.is_dead || self.is_vaccinated
    }

    /// Infected and past the non-contagious part of the incubation window.
    #[must_use]
    pub fn is_contagious(&self) -> bool {
        self.is_infected && self.days_of_incubation >= CONTAGIOUS_AFTER_DAYS
    }

    #[must_use]
    pub fn state(&self) -> CellState {
        CellState::of(self)
    }

    #[must_use]
    pub fn pack(&self) -> WireCell {
        WireCell::from(*self)
    }
}

/// The six visual states a renderer distinguishes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, Serialize)]
pub enum CellState {
    Default,
    Incubating,
    Contagious,
    Immune,
    Dead,
    Vaccinated,
}

impl CellState {
    /// Classifies a cell the way the frame renderer colors it. The first matching state wins,
    /// so an infected person is shown as incubating while the incubation counter is running.
    #[must_use]
    pub fn of(cell: &Cell) -> CellState {
        if cell.is_infected && cell.days_of_incubation < MAX_DAYS_OF_INCUBATION {
            CellState::Incubating
        } else if cell.is_infected {
            CellState::Contagious
        } else if cell.is_immune {
            CellState::Immune
        } else if cell.is_dead {
            CellState::Dead
        } else if cell.is_vaccinated {
            CellState::Vaccinated
        } else {
            CellState::Default
        }
    }
}

/// Fixed-width transfer form of a [`Cell`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct WireCell(pub u16);

const INFECTED_BIT: u16 = 1;
const IMMUNE_BIT: u16 = 1 << 1;
const DEAD_BIT: u16 = 1 << 2;
const VACCINATED_BIT: u16 = 1 << 3;
const INCUBATION_SHIFT: u16 = 4;
const INCUBATION_MASK: u16 = 0b11;
const INFECTION_SHIFT: u16 = 6;
const INFECTION_MASK: u16 = 0b111;
const AGE_SHIFT: u16 = 9;
const AGE_MASK: u16 = 0b111_1111;

impl From<Cell> for WireCell {
    fn from(cell: Cell) -> Self {
        debug_assert!(cell.days_of_incubation <= MAX_DAYS_OF_INCUBATION);
        debug_assert!(cell.days_of_infection <= MAX_DAYS_OF_INFECTION);
        debug_assert!(u16::from(cell.age) <= AGE_MASK);

        let mut bits = 0;
        if cell.is_infected {
            bits |= INFECTED_BIT;
        }
        if cell.is_immune {
            bits |= IMMUNE_BIT;
        }
        if cell.is_dead {
            bits |= DEAD_BIT;
        }
        if cell.is_vaccinated {
            bits |= VACCINATED_BIT;
        }
        bits |= (u16::from(cell.days_of_incubation) & INCUBATION_MASK) << INCUBATION_SHIFT;
        bits |= (u16::from(cell.days_of_infection) & INFECTION_MASK) << INFECTION_SHIFT;
        bits |= (u16::from(cell.age) & AGE_MASK) << AGE_SHIFT;
        WireCell(bits)
    }
}

impl From<WireCell> for Cell {
    #[allow(clippy::cast_possible_truncation)]
    fn from(wire: WireCell) -> Self {
        let bits = wire.0;
        Cell {
            is_infected: bits & INFECTED_BIT != 0,
            is_immune: bits & IMMUNE_BIT != 0,
            is_dead: bits & DEAD_BIT != 0,
            is_vaccinated: bits & VACCINATED_BIT != 0,
            days_of_incubation: ((bits >> INCUBATION_SHIFT) & INCUBATION_MASK) as u8,
            days_of_infection: ((bits >> INFECTION_SHIFT) & INFECTION_MASK) as u8,
            age: ((bits >> AGE_SHIFT) & AGE_MASK) as u8,
        }
    }
}

/// Packs a run of cells for transfer.
pub fn pack_cells(cells: impl IntoIterator<Item = Cell>) -> Vec<WireCell> {
    cells.into_iter().map(WireCell::from).collect()
}

/// Unpacks a received run of cells.
pub fn unpack_cells(wire: &[WireCell]) -> impl Iterator<Item = Cell> + '_ {
    wire.iter().map(|w| Cell::from(*w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn packs_every_field_into_its_own_bits() {
        let cell = Cell {
            is_infected: true,
            is_immune: false,
            is_dead: true,
            is_vaccinated: false,
            days_of_incubation: 2,
            days_of_infection: 5,
            age: 99,
        };
        let wire = cell.pack();
        assert_eq!(wire.0 & 0b1111, 0b0101);
        assert_eq!((wire.0 >> 4) & 0b11, 2);
        assert_eq!((wire.0 >> 6) & 0b111, 5);
        assert_eq!(wire.0 >> 9, 99);
        assert_eq!(Cell::from(wire), cell);
    }

    #[test]
    fn saturated_counters_survive_transfer() {
        let cell = Cell {
            is_infected: true,
            is_immune: true,
            is_dead: false,
            is_vaccinated: true,
            days_of_incubation: MAX_DAYS_OF_INCUBATION,
            days_of_infection: MAX_DAYS_OF_INFECTION,
            age: MAX_AGE - 1,
        };
        let unpacked: Vec<Cell> = unpack_cells(&pack_cells([cell, Cell::default()])).collect();
        assert_eq!(unpacked, vec![cell, Cell::default()]);
    }

    #[test]
    fn contagious_only_after_two_days_of_incubation() {
        let mut cell = Cell::with_age(30);
        cell.is_infected = true;
        assert!(!cell.is_contagious());
        cell.days_of_incubation = 1;
        assert!(!cell.is_contagious());
        cell.days_of_incubation = 2;
        assert!(cell.is_contagious());
    }

    #[test]
    fn classification_prefers_infection_over_other_flags() {
        let incubating = Cell {
            is_infected: true,
            days_of_incubation: 1,
            ..Cell::default()
        };
        assert_eq!(incubating.state(), CellState::Incubating);

        let contagious = Cell {
            days_of_incubation: 3,
            ..incubating
        };
        assert_eq!(contagious.state(), CellState::Contagious);

        let dead_and_immune = Cell {
            is_dead: true,
            is_immune: true,
            ..Cell::default()
        };
        assert_eq!(dead_and_immune.state(), CellState::Immune);

        assert_eq!(Cell::default().state(), CellState::Default);
        assert_eq!(CellState::iter().count(), 6);
    }
}
