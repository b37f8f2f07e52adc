//! The cell transition rule.
//!
//! [`next_state`] maps a cell and its eight Moore neighbors to the cell's next value. It reads
//! nothing but its arguments; randomness comes from the generator passed in. Chances are drawn
//! as integers, `uniform(0..denominator) < numerator`, so a numerator at or above its
//! denominator always succeeds and one of zero never does (no draw is made in either case).

use rand::Rng;

use crate::cell::{Cell, MAX_DAYS_OF_INCUBATION, MAX_DAYS_OF_INFECTION};
use crate::parameters::Parameters;

/// Spontaneous vaccination is `vaccination_percentage / 1000` percent.
const SPONTANEOUS_VACCINATION_DENOMINATOR: u64 = 100_000;
/// Peer-influenced vaccination is `vaccination_percentage * neighbors / 2.5` percent.
const PEER_VACCINATION_DENOMINATOR: u64 = 250;
const PERCENT: u64 = 100;

/// The percentages that drive the rule.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransitionRates {
    pub infection: u32,
    pub immunity: u32,
    pub lose_immunity: u32,
    pub vaccination: u32,
    pub death: u32,
}

impl From<&Parameters> for TransitionRates {
    fn from(parameters: &Parameters) -> Self {
        TransitionRates {
            infection: parameters.infection_percentage,
            immunity: parameters.immunity_percentage,
            lose_immunity: parameters.lose_immunity_percentage,
            vaccination: parameters.vaccination_percentage,
            death: parameters.death_percentage,
        }
    }
}

impl TransitionRates {
    /// Mortality percentage for a person of the given age.
    #[must_use]
    pub fn mortality(&self, age: u8) -> u32 {
        match age {
            65.. => self.death,
            26..=64 => self.death / 2,
            _ => self.death / 4,
        }
    }
}

/// What a cell sees around it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NeighborCounts {
    /// Neighbors that are infected and past the non-contagious incubation window.
    pub infected: u32,
    pub vaccinated: u32,
}

#[must_use]
pub fn count_neighbors(neighbors: &[Cell; 8]) -> NeighborCounts {
    neighbors
        .iter()
        .fold(NeighborCounts::default(), |mut counts, neighbor| {
            if neighbor.is_contagious() {
                counts.infected += 1;
            }
            if neighbor.is_vaccinated {
                counts.vaccinated += 1;
            }
            counts
        })
}

fn chance<R: Rng + ?Sized>(rng: &mut R, numerator: u64, denominator: u64) -> bool {
    if numerator == 0 {
        return false;
    }
    if numerator >= denominator {
        return true;
    }
    rng.random_range(0..denominator) < numerator
}

/// Computes the next value of `cell`.
pub fn next_state<R: Rng + ?Sized>(
    cell: Cell,
    neighbors: &[Cell; 8],
    rates: &TransitionRates,
    rng: &mut R,
) -> Cell {
    let mut next = cell;

    if cell.is_absorbed() {
        return next;
    }

    if cell.is_infected && !cell.is_immune {
        if cell.days_of_incubation < MAX_DAYS_OF_INCUBATION {
            next.days_of_incubation += 1;
            return next;
        }

        if cell.days_of_infection < MAX_DAYS_OF_INFECTION {
            next.days_of_incubation = 0;
            next.days_of_infection += 1;
        } else if chance(rng, u64::from(rates.immunity), PERCENT) {
            next.is_infected = false;
            next.is_immune = true;
        }

        if chance(rng, u64::from(rates.mortality(cell.age)), PERCENT) {
            next.is_infected = false;
            next.is_dead = true;
        }
        return next;
    }

    let counts = count_neighbors(neighbors);

    if counts.infected > 0
        && !cell.is_immune
        && chance(
            rng,
            u64::from(rates.infection) * u64::from(counts.infected),
            PERCENT,
        )
    {
        next.is_infected = true;
        return next;
    }

    if chance(
        rng,
        u64::from(rates.vaccination),
        SPONTANEOUS_VACCINATION_DENOMINATOR,
    ) {
        next.is_vaccinated = true;
        return next;
    }

    if counts.vaccinated > 0
        && chance(
            rng,
            u64::from(rates.vaccination) * u64::from(counts.vaccinated),
            PEER_VACCINATION_DENOMINATOR,
        )
    {
        next.is_vaccinated = true;
        return next;
    }

    if chance(rng, u64::from(rates.lose_immunity), PERCENT) {
        next.is_immune = false;
    }
    next
}
