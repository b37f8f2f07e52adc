//! Per-rank random number generators.
//!
//! Every rank draws from its own `SmallRng`. The stream for a rank is seeded with a base seed
//! offset by a hash of the rank's name, so ranks get independent streams while a run with a
//! fixed base seed and a fixed decomposition is reproducible. Without an explicit base seed
//! the wall clock is used.
//!
//! Initial ages are not drawn from those streams. They are a hash of the base seed and the
//! global position, so the starting grid is the same however it is partitioned.

use std::time::{SystemTime, UNIX_EPOCH};

use log::trace;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

use crate::cell::MAX_AGE;

pub type ProcessRng = SmallRng;

/// A convenience method to compute the hash of a `&str`.
#[must_use]
pub fn hash_str(data: &str) -> u64 {
    xxh3_64(data.as_bytes())
}

/// A base seed taken from the current time.
#[must_use]
pub fn wall_clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() ^ u64::from(elapsed.subsec_nanos()))
        .unwrap_or_default()
}

/// The seed used by `rank` for the given base seed.
#[must_use]
pub fn rank_seed(base_seed: u64, rank: usize) -> u64 {
    base_seed.wrapping_add(hash_str(&format!("rank-{rank}")))
}

/// Creates the generator for `rank`.
#[must_use]
pub fn rank_rng(base_seed: u64, rank: usize) -> ProcessRng {
    let seed = rank_seed(base_seed, rank);
    trace!("creating RNG for rank {rank} (base seed {base_seed}, seed {seed})");
    ProcessRng::seed_from_u64(seed)
}

/// The starting age of the person at a global position, in `0..MAX_AGE`.
#[must_use]
pub fn initial_age(base_seed: u64, global_row: usize, global_col: usize) -> u8 {
    let mut position = [0; 16];
    position[..8].copy_from_slice(&(global_row as u64).to_le_bytes());
    position[8..].copy_from_slice(&(global_col as u64).to_le_bytes());
    let age = xxh3_64_with_seed(&position, base_seed) % u64::from(MAX_AGE);
    u8::try_from(age).unwrap_or(0)
}
