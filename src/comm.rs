//! Point-to-point messaging and the group barrier that keep ranks in lockstep.
//!
//! Ranks are addressed by index in `0..size`. A message is identified by its source rank, a
//! [`Tag`], and the generation it belongs to. Sends never block. Receives block until the
//! matching message arrives; messages that arrive early for a different `(source, tag)` are
//! parked until someone asks for them, so each `(source, tag)` channel is delivered in order.
//!
//! [`ProcessGroup`] runs one thread per rank. [`SoloCommunicator`] is the one-rank group used
//! by the sequential reference mode. With the `distributed` feature, `comm_mpi` provides the
//! same trait over MPI for ranks that are separate processes; those ranks exchange
//! [`encode_frame`] buffers.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use log::{debug, error, trace};
use strum::IntoEnumIterator;

use crate::cell::WireCell;
use crate::error::EpigridError;
use crate::partition::Direction;

/// What a message is for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Boundary cells travelling in the given direction.
    Halo(Direction),
    /// Owned cells on their way to the coordinator.
    Snapshot,
    /// Per-state cell counts on their way to the coordinator.
    Counts,
    /// Sent by a failing rank to wake peers blocked in a receive.
    Abort,
    /// Run-wide settings on their way from the coordinator to every rank.
    Settings,
}

impl Tag {
    /// Number of distinct tag codes.
    pub const CODES: u8 = 12;

    /// A small integer naming this tag on transports that only carry integer tags.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Tag::Halo(direction) => Direction::iter()
                .position(|d| d == direction)
                .and_then(|index| u8::try_from(index).ok())
                .unwrap_or(u8::MAX),
            Tag::Snapshot => 8,
            Tag::Counts => 9,
            Tag::Abort => 10,
            Tag::Settings => 11,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Tag> {
        match code {
            0..=7 => Direction::iter().nth(usize::from(code)).map(Tag::Halo),
            8 => Some(Tag::Snapshot),
            9 => Some(Tag::Counts),
            10 => Some(Tag::Abort),
            11 => Some(Tag::Settings),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Cells(Vec<WireCell>),
    Counts(Vec<u64>),
    Empty,
}

const FRAME_HEADER: usize = 9;
const KIND_EMPTY: u8 = 0;
const KIND_CELLS: u8 = 1;
const KIND_COUNTS: u8 = 2;

/// Serializes a payload and its generation into bytes for transports that move raw buffers.
///
/// The layout is the generation as a little-endian `u64`, one kind byte, then the cells as
/// little-endian `u16`s or the counts as little-endian `u64`s.
#[must_use]
pub fn encode_frame(generation: u64, payload: &Payload) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER + payload_bytes(payload));
    frame.extend_from_slice(&generation.to_le_bytes());
    match payload {
        Payload::Empty => frame.push(KIND_EMPTY),
        Payload::Cells(cells) => {
            frame.push(KIND_CELLS);
            for cell in cells {
                frame.extend_from_slice(&cell.0.to_le_bytes());
            }
        }
        Payload::Counts(counts) => {
            frame.push(KIND_COUNTS);
            for count in counts {
                frame.extend_from_slice(&count.to_le_bytes());
            }
        }
    }
    frame
}

fn payload_bytes(payload: &Payload) -> usize {
    match payload {
        Payload::Empty => 0,
        Payload::Cells(cells) => cells.len() * 2,
        Payload::Counts(counts) => counts.len() * 8,
    }
}

/// Reverses [`encode_frame`].
///
/// # Errors
///
/// Returns `EpigridError::CommunicationError` for a truncated frame, an unknown kind byte, or
/// a body that is not a whole number of items.
pub fn decode_frame(frame: &[u8]) -> Result<(u64, Payload), EpigridError> {
    let malformed =
        |what: &str| EpigridError::CommunicationError(format!("malformed frame: {what}"));
    if frame.len() < FRAME_HEADER {
        return Err(malformed("shorter than its header"));
    }
    let (generation, rest) = frame.split_at(8);
    let mut word = [0u8; 8];
    word.copy_from_slice(generation);
    let generation = u64::from_le_bytes(word);
    let (kind, body) = rest.split_at(1);
    let payload = match kind[0] {
        KIND_EMPTY if body.is_empty() => Payload::Empty,
        KIND_CELLS if body.len() % 2 == 0 => Payload::Cells(
            body.chunks_exact(2)
                .map(|pair| WireCell(u16::from_le_bytes([pair[0], pair[1]])))
                .collect(),
        ),
        KIND_COUNTS if body.len() % 8 == 0 => Payload::Counts(
            body.chunks_exact(8)
                .map(|chunk| {
                    let mut word = [0u8; 8];
                    word.copy_from_slice(chunk);
                    u64::from_le_bytes(word)
                })
                .collect(),
        ),
        KIND_EMPTY | KIND_CELLS | KIND_COUNTS => return Err(malformed("ragged body")),
        other => return Err(malformed(&format!("unknown kind {other}"))),
    };
    Ok((generation, payload))
}

#[derive(Debug)]
struct Envelope {
    source: usize,
    tag: Tag,
    generation: u64,
    payload: Payload,
}

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Queues a message for `dest` and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::CommunicationError` if `dest` does not exist or has gone away.
    fn send(
        &mut self,
        dest: usize,
        tag: Tag,
        generation: u64,
        payload: Payload,
    ) -> Result<(), EpigridError>;

    /// Blocks until the message from `source` with `tag` arrives.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::CommunicationError` if the message can never arrive or belongs
    /// to a different generation.
    fn receive(
        &mut self,
        source: usize,
        tag: Tag,
        generation: u64,
    ) -> Result<Payload, EpigridError>;

    /// Waits until every rank has arrived.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::Aborted` if some rank aborted the group before this barrier
    /// released.
    fn barrier(&self) -> Result<(), EpigridError>;

    /// Marks the group as failed. Every rank leaves its next barrier or blocking receive with
    /// `EpigridError::Aborted`.
    fn abort(&self);

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

fn check_generation(envelope: Envelope, generation: u64) -> Result<Payload, EpigridError> {
    if envelope.generation == generation {
        Ok(envelope.payload)
    } else {
        Err(EpigridError::CommunicationError(format!(
            "expected {:?} from rank {} for generation {generation}, got generation {}",
            envelope.tag, envelope.source, envelope.generation
        )))
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    epoch: u64,
    aborted: bool,
}

/// State shared by every rank of a [`ProcessGroup`]: a reusable barrier that an abort breaks.
#[derive(Debug)]
struct GroupState {
    size: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl GroupState {
    fn new(size: usize) -> Self {
        GroupState {
            size,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<(), EpigridError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.aborted {
            return Err(EpigridError::Aborted);
        }
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.epoch += 1;
            self.released.notify_all();
            return Ok(());
        }
        let epoch = state.epoch;
        while state.epoch == epoch && !state.aborted {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.epoch == epoch {
            Err(EpigridError::Aborted)
        } else {
            Ok(())
        }
    }

    fn abort(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let first = !state.aborted;
        state.aborted = true;
        self.released.notify_all();
        first
    }

    fn is_aborted(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .aborted
    }
}

/// One rank's endpoint in a threaded process group.
#[derive(Debug)]
pub struct ThreadCommunicator {
    rank: usize,
    outboxes: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    parked: HashMap<(usize, Tag), VecDeque<Envelope>>,
    group: Arc<GroupState>,
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.outboxes.len()
    }

    fn send(
        &mut self,
        dest: usize,
        tag: Tag,
        generation: u64,
        payload: Payload,
    ) -> Result<(), EpigridError> {
        let outbox = self.outboxes.get(dest).ok_or_else(|| {
            EpigridError::CommunicationError(format!("rank {dest} is not part of the group"))
        })?;
        trace!("rank {} sends {tag:?} to rank {dest} (generation {generation})", self.rank);
        outbox
            .send(Envelope {
                source: self.rank,
                tag,
                generation,
                payload,
            })
            .map_err(|_| {
                EpigridError::CommunicationError(format!("rank {dest} is no longer receiving"))
            })
    }

    fn receive(
        &mut self,
        source: usize,
        tag: Tag,
        generation: u64,
    ) -> Result<Payload, EpigridError> {
        if let Some(envelope) = self
            .parked
            .get_mut(&(source, tag))
            .and_then(VecDeque::pop_front)
        {
            return check_generation(envelope, generation);
        }
        if self.group.is_aborted() {
            return Err(EpigridError::Aborted);
        }
        loop {
            let envelope = self.inbox.recv().map_err(|_| {
                EpigridError::CommunicationError(format!(
                    "rank {} lost every peer while waiting for {tag:?} from rank {source}",
                    self.rank
                ))
            })?;
            if envelope.tag == Tag::Abort {
                return Err(EpigridError::Aborted);
            }
            if envelope.source == source && envelope.tag == tag {
                return check_generation(envelope, generation);
            }
            self.parked
                .entry((envelope.source, envelope.tag))
                .or_default()
                .push_back(envelope);
        }
    }

    fn barrier(&self) -> Result<(), EpigridError> {
        self.group.wait()
    }

    fn abort(&self) {
        if !self.group.abort() {
            return;
        }
        for (dest, outbox) in self.outboxes.iter().enumerate() {
            if dest != self.rank {
                // A peer that already left has nothing left to wake.
                let _ = outbox.send(Envelope {
                    source: self.rank,
                    tag: Tag::Abort,
                    generation: 0,
                    payload: Payload::Empty,
                });
            }
        }
    }
}

/// Spawns and joins a fixed-size group of ranks.
pub struct ProcessGroup;

impl ProcessGroup {
    /// Creates fully connected endpoints for `size` ranks.
    #[must_use]
    pub fn communicators(size: usize) -> Vec<ThreadCommunicator> {
        let group = Arc::new(GroupState::new(size));
        let (outboxes, inboxes): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ThreadCommunicator {
                rank,
                outboxes: outboxes.clone(),
                inbox,
                parked: HashMap::new(),
                group: Arc::clone(&group),
            })
            .collect()
    }

    /// Runs `body` on `size` ranks, one thread each, and returns their results in rank order.
    ///
    /// A rank that fails or panics aborts the group, so peers waiting on a barrier or on a
    /// message leave with `EpigridError::Aborted` instead of waiting forever.
    ///
    /// # Errors
    ///
    /// Returns the first error other than `Aborted` reported by any rank.
    ///
    /// # Panics
    ///
    /// Panics if the operating system refuses to spawn a thread.
    pub fn run<T, F>(size: usize, body: F) -> Result<Vec<T>, EpigridError>
    where
        T: Send,
        F: Fn(&mut ThreadCommunicator) -> Result<T, EpigridError> + Sync,
    {
        if size == 0 {
            return Err(EpigridError::CommunicationError(
                "a process group needs at least one rank".to_string(),
            ));
        }
        debug!("starting process group with {size} ranks");
        let body = &body;
        let outcomes: Vec<Result<T, EpigridError>> = thread::scope(|scope| {
            let handles: Vec<_> = Self::communicators(size)
                .into_iter()
                .map(|mut comm| {
                    thread::Builder::new()
                        .name(format!("rank-{}", comm.rank()))
                        .spawn_scoped(scope, move || run_rank(&mut comm, body))
                        .expect("failed to spawn rank thread")
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(EpigridError::CommunicationError(format!("rank {rank} panicked")))
                    })
                })
                .collect()
        });

        let mut results = Vec::with_capacity(size);
        let mut failure = None;
        for outcome in outcomes {
            match outcome {
                Ok(value) => results.push(value),
                Err(EpigridError::Aborted) => {
                    failure.get_or_insert(EpigridError::Aborted);
                }
                Err(err) => {
                    if matches!(failure, None | Some(EpigridError::Aborted)) {
                        failure = Some(err);
                    }
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }
}

fn run_rank<T, F>(comm: &mut ThreadCommunicator, body: &F) -> Result<T, EpigridError>
where
    F: Fn(&mut ThreadCommunicator) -> Result<T, EpigridError>,
{
    let rank = comm.rank();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(comm))).unwrap_or_else(|_| {
        Err(EpigridError::CommunicationError(format!("rank {rank} panicked")))
    });
    if let Err(err) = &outcome {
        if !matches!(err, EpigridError::Aborted) {
            error!("rank {rank} failed: {err}");
            comm.abort();
        }
    }
    outcome
}

/// The group of one used when the grid is not partitioned. Messages to self are queued
/// locally and a receive that nothing could ever satisfy is an error rather than a hang.
#[derive(Debug, Default)]
pub struct SoloCommunicator {
    queue: VecDeque<Envelope>,
}

impl SoloCommunicator {
    #[must_use]
    pub fn new() -> Self {
        SoloCommunicator::default()
    }
}

impl Communicator for SoloCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(
        &mut self,
        dest: usize,
        tag: Tag,
        generation: u64,
        payload: Payload,
    ) -> Result<(), EpigridError> {
        if dest != 0 {
            return Err(EpigridError::CommunicationError(format!(
                "rank {dest} is not part of a single-process group"
            )));
        }
        self.queue.push_back(Envelope {
            source: 0,
            tag,
            generation,
            payload,
        });
        Ok(())
    }

    fn receive(
        &mut self,
        source: usize,
        tag: Tag,
        generation: u64,
    ) -> Result<Payload, EpigridError> {
        let position = self
            .queue
            .iter()
            .position(|e| e.source == source && e.tag == tag)
            .ok_or_else(|| {
                EpigridError::CommunicationError(format!(
                    "{tag:?} from rank {source} can never arrive in a single-process group"
                ))
            })?;
        let envelope = self.queue.remove(position).ok_or_else(|| {
            EpigridError::CommunicationError("message queue changed underfoot".to_string())
        })?;
        check_generation(envelope, generation)
    }

    fn barrier(&self) -> Result<(), EpigridError> {
        Ok(())
    }

    fn abort(&self) {
        // Nobody else to notify.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[u16]) -> Payload {
        Payload::Cells(values.iter().copied().map(WireCell).collect())
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn messages_are_matched_by_source_and_tag() {
        let results = ProcessGroup::run(3, |comm| {
            let rank = comm.rank();
            if rank == 0 {
                // Ask for rank 2 first even if rank 1's message lands earlier.
                let from_two = comm.receive(2, Tag::Snapshot, 0)?;
                let from_one = comm.receive(1, Tag::Snapshot, 0)?;
                assert_eq!(from_two, cells(&[2]));
                assert_eq!(from_one, cells(&[1]));
            } else {
                comm.send(0, Tag::Snapshot, 0, cells(&[rank as u16]))?;
            }
            comm.barrier()?;
            Ok(rank)
        })
        .unwrap();
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[test]
    fn each_channel_is_delivered_in_order() {
        ProcessGroup::run(2, |comm| {
            if comm.rank() == 1 {
                for generation in 0..5 {
                    comm.send(0, Tag::Halo(Direction::East), generation, cells(&[7]))?;
                    comm.send(0, Tag::Halo(Direction::West), generation, cells(&[9]))?;
                }
            } else {
                for generation in 0..5 {
                    let west = comm.receive(1, Tag::Halo(Direction::West), generation)?;
                    assert_eq!(west, cells(&[9]));
                }
                for generation in 0..5 {
                    let east = comm.receive(1, Tag::Halo(Direction::East), generation)?;
                    assert_eq!(east, cells(&[7]));
                }
            }
            comm.barrier()
        })
        .unwrap();
    }

    #[test]
    fn a_generation_mismatch_is_fatal() {
        let mut comm = SoloCommunicator::new();
        comm.send(0, Tag::Counts, 3, Payload::Counts(vec![1])).unwrap();
        assert!(matches!(
            comm.receive(0, Tag::Counts, 4),
            Err(EpigridError::CommunicationError(_))
        ));
    }

    #[test]
    fn solo_group_reports_impossible_receives() {
        let mut comm = SoloCommunicator::new();
        assert!(comm.barrier().is_ok());
        assert!(matches!(
            comm.receive(0, Tag::Snapshot, 0),
            Err(EpigridError::CommunicationError(_))
        ));
        assert!(comm.send(1, Tag::Snapshot, 0, cells(&[])).is_err());
    }

    #[test]
    fn a_failing_rank_releases_its_peers() {
        let result: Result<Vec<()>, _> = ProcessGroup::run(3, |comm| {
            if comm.rank() == 1 {
                return Err(EpigridError::from("observer failed"));
            }
            comm.barrier()
        });
        assert!(matches!(result, Err(EpigridError::EpigridError(ref msg)) if msg == "observer failed"));
    }

    #[test]
    fn a_failing_rank_releases_peers_waiting_for_its_messages() {
        let result: Result<Vec<()>, _> = ProcessGroup::run(3, |comm| {
            if comm.rank() == 2 {
                return Err(EpigridError::CommunicationError("lost".to_string()));
            }
            comm.receive(2, Tag::Halo(Direction::West), 0)?;
            comm.barrier()
        });
        assert!(matches!(result, Err(EpigridError::CommunicationError(ref msg)) if msg == "lost"));
    }

    #[test]
    fn a_panicking_rank_is_reported() {
        let result: Result<Vec<()>, _> = ProcessGroup::run(2, |comm| {
            if comm.rank() == 0 {
                panic!("boom");
            }
            comm.barrier()
        });
        assert!(matches!(result, Err(EpigridError::CommunicationError(_))));
    }

    #[test]
    fn tag_codes_name_every_tag_once() {
        let mut tags: Vec<Tag> = Direction::iter().map(Tag::Halo).collect();
        tags.extend([Tag::Snapshot, Tag::Counts, Tag::Abort, Tag::Settings]);
        let codes: Vec<u8> = tags.iter().map(|tag| tag.code()).collect();
        assert_eq!(codes, (0..Tag::CODES).collect::<Vec<_>>());
        for tag in tags {
            assert_eq!(Tag::from_code(tag.code()), Some(tag));
        }
        assert_eq!(Tag::from_code(Tag::CODES), None);
    }

    #[test]
    fn frames_carry_the_generation_and_payload() {
        let frame = encode_frame(258, &cells(&[0x0102, 0xffff]));
        assert_eq!(frame, vec![2, 1, 0, 0, 0, 0, 0, 0, 1, 2, 1, 255, 255]);
        assert_eq!(decode_frame(&frame).unwrap(), (258, cells(&[0x0102, 0xffff])));

        let counts = Payload::Counts(vec![u64::MAX, 0, 7]);
        assert_eq!(decode_frame(&encode_frame(9, &counts)).unwrap(), (9, counts));
        assert_eq!(
            decode_frame(&encode_frame(0, &Payload::Empty)).unwrap(),
            (0, Payload::Empty)
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let mut ragged = encode_frame(1, &cells(&[5]));
        ragged.pop();
        for frame in [&[0u8; 4][..], &ragged, &[0, 0, 0, 0, 0, 0, 0, 0, 42]] {
            assert!(matches!(
                decode_frame(frame),
                Err(EpigridError::CommunicationError(_))
            ));
        }
    }
}
