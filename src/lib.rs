//! A domain-decomposed cellular-automaton epidemic simulator.
//!
//! A square grid of people evolves in synchronous generations. Each person is healthy,
//! incubating, contagious, immune, dead, or vaccinated, and moves between those states with
//! probabilities that depend on their eight neighbors. Dead and vaccinated people never change
//! again.
//!
//! The grid is split across a fixed group of cooperating ranks, each of which owns one
//! rectangle of it:
//! * `Single` keeps the whole (toroidal) grid on one rank and is the reference behavior.
//! * `Strip1D` slices the grid into vertical strips arranged in a ring.
//! * `Block2D` tiles the grid into an `R x C` arrangement of blocks.
//!
//! Every rank keeps a one-cell ghost margin with copies of its neighbors' edge cells. Each
//! generation the ranks swap edges, update the cells that need no ghosts while the messages
//! are in flight, then update the rest. Ranks run as threads of one [`comm::ProcessGroup`],
//! or as the processes of an MPI launch with the `distributed` feature, and only talk through
//! the [`comm::Communicator`] trait.
//!
//! The quickest way in is [`simulation::run_simulation`]:
//!
//! ```no_run
//! use epigrid::parameters::Parameters;
//! use epigrid::partition::PartitionScheme;
//! use epigrid::simulation::{run_simulation, RunOptions};
//!
//! let options = RunOptions {
//!     scheme: PartitionScheme::Strip1D,
//!     process_count: 4,
//!     base_seed: Some(42),
//!     show_progress: false,
//! };
//! let summary = run_simulation(&Parameters::default(), &options, Vec::new()).unwrap();
//! println!("{} people died", summary.final_counts.dead);
//! ```
pub mod cell;
pub mod comm;
#[cfg(feature = "distributed")]
pub mod comm_mpi;
pub mod error;
pub mod grid;
pub mod halo;
pub mod log;
pub mod observer;
pub mod parameters;
pub mod partition;
#[cfg(feature = "progress_bar")]
pub mod progress;
pub mod random;
pub mod render;
pub mod report;
pub mod rule;
pub mod runner;
pub mod simulation;

pub mod prelude;
