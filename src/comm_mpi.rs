//! MPI transport for ranks that run as separate processes.
//!
//! Requires the `distributed` feature and an MPI installation. Start the binary with
//! `mpirun -n <ranks> epigrid ...` and every process of the MPI world becomes one rank.
//!
//! Each message is one [`encode_frame`] buffer of bytes, sent with the [`Tag`] code as the
//! MPI tag. MPI delivers messages with the same source and tag in order, so no parking is
//! needed. Sends are buffered (`MPI_Bsend`) and return once the frame is copied into the
//! send buffer attached to the universe, which must hold one generation of traffic.

use log::{error, trace};
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use crate::comm::{self, decode_frame, encode_frame, Payload, Tag};
use crate::error::EpigridError;

/// Environment variables the common MPI launchers set for every process they start.
const LAUNCHER_VARIABLES: [&str; 5] = [
    "OMPI_COMM_WORLD_SIZE",
    "PMI_SIZE",
    "PMI_RANK",
    "PMIX_RANK",
    "MPI_LOCALNRANKS",
];

/// Headroom per message for the frame header and the MPI envelope of a buffered send.
const MESSAGE_OVERHEAD: usize = 1024;

/// Most messages a rank sends in one generation: eight halo segments, a snapshot, and the
/// settings or counts exchanged at the edges of the run.
const MESSAGES_PER_GENERATION: usize = 10;

/// True when this process was started by `mpirun`, `mpiexec`, or `srun`.
#[must_use]
pub fn launched_by_mpi() -> bool {
    launcher_in(std::env::vars())
}

fn launcher_in(variables: impl IntoIterator<Item = (String, String)>) -> bool {
    variables
        .into_iter()
        .any(|(name, _)| LAUNCHER_VARIABLES.contains(&name.as_str()))
}

/// Send buffer a rank needs for a grid of `global_cells` cells.
///
/// One generation never sends more than the whole grid, since a rank's snapshot and halo
/// segments are both bounded by it. The buffer holds two generations of that.
#[must_use]
pub fn send_buffer_bytes(global_cells: usize) -> usize {
    2 * (global_cells * 2 + MESSAGES_PER_GENERATION * MESSAGE_OVERHEAD)
}

fn rank_from_mpi(value: i32) -> Result<usize, EpigridError> {
    usize::try_from(value)
        .map_err(|_| EpigridError::CommunicationError(format!("MPI reported rank {value}")))
}

fn rank_to_mpi(rank: usize) -> Result<i32, EpigridError> {
    i32::try_from(rank)
        .map_err(|_| EpigridError::CommunicationError(format!("rank {rank} exceeds MPI ranks")))
}

/// One process's endpoint in the MPI world.
pub struct MpiCommunicator {
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

impl MpiCommunicator {
    /// Attaches a send buffer of `send_buffer_bytes` to `universe` and wraps its world.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::CommunicationError` if MPI reports a negative rank or size.
    pub fn new(universe: &mut Universe, send_buffer_bytes: usize) -> Result<Self, EpigridError> {
        universe.set_buffer_size(send_buffer_bytes);
        let world = universe.world();
        let rank = rank_from_mpi(world.rank())?;
        let size = rank_from_mpi(world.size())?;
        Ok(MpiCommunicator { world, rank, size })
    }

    fn check_peer(&self, peer: usize) -> Result<i32, EpigridError> {
        if peer >= self.size {
            return Err(EpigridError::CommunicationError(format!(
                "rank {peer} is not part of the MPI world of {}",
                self.size
            )));
        }
        rank_to_mpi(peer)
    }
}

impl comm::Communicator for MpiCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(
        &mut self,
        dest: usize,
        tag: Tag,
        generation: u64,
        payload: Payload,
    ) -> Result<(), EpigridError> {
        let peer = self.check_peer(dest)?;
        let frame = encode_frame(generation, &payload);
        trace!(
            "rank {} sends {tag:?} to rank {dest} (generation {generation}, {} bytes)",
            self.rank,
            frame.len()
        );
        self.world
            .process_at_rank(peer)
            .buffered_send_with_tag(&frame[..], i32::from(tag.code()));
        Ok(())
    }

    fn receive(
        &mut self,
        source: usize,
        tag: Tag,
        generation: u64,
    ) -> Result<Payload, EpigridError> {
        let peer = self.check_peer(source)?;
        let (frame, _status) = self
            .world
            .process_at_rank(peer)
            .receive_vec_with_tag::<u8>(i32::from(tag.code()));
        let (sent_for, payload) = decode_frame(&frame)?;
        if sent_for != generation {
            return Err(EpigridError::CommunicationError(format!(
                "expected {tag:?} from rank {source} for generation {generation}, got generation {sent_for}"
            )));
        }
        Ok(payload)
    }

    fn barrier(&self) -> Result<(), EpigridError> {
        self.world.barrier();
        Ok(())
    }

    /// Tears down every process of the world. MPI offers no way to wake a blocked peer short
    /// of ending it.
    fn abort(&self) {
        error!("rank {} aborts the MPI world", self.rank);
        self.world.abort(1);
    }
}
