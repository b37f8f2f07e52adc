//! The generation loop.
//!
//! Every rank runs the same loop over its own [`Process`]. One generation is:
//!
//! 1. send the boundary cells of the current buffer to every neighbor,
//! 2. update the interior cells, which never read a ghost, while those messages travel,
//! 3. receive the neighbors' boundaries into the ghost margin,
//! 4. update the border cells,
//! 5. swap the buffers,
//! 6. gather a global snapshot on rank 0 if anyone is observing,
//! 7. wait at the group barrier,
//! 8. sleep the configured pacing delay.
//!
//! The phases are public so tests can look at a rank between them.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::cell::{pack_cells, unpack_cells, Cell};
use crate::comm::{Communicator, Payload, ProcessGroup, SoloCommunicator, Tag};
use crate::error::EpigridError;
use crate::grid::GridState;
use crate::halo::HaloExchange;
use crate::observer::{GridSnapshot, Observer};
use crate::parameters::Parameters;
use crate::partition::{Decomposition, PartitionScheme, Subdomain};
use crate::random::{initial_age, rank_rng, wall_clock_seed, ProcessRng};
use crate::report::StateCounts;
use crate::rule::{next_state, TransitionRates};

/// One rank's share of a run: its sub-grid, its routes, and its random stream.
pub struct Process<'a, C: Communicator + ?Sized> {
    comm: &'a mut C,
    decomposition: &'a Decomposition,
    subdomain: &'a Subdomain,
    grid: GridState,
    border: Vec<(usize, usize)>,
    halo: HaloExchange,
    rates: TransitionRates,
    rng: ProcessRng,
    base_seed: u64,
    generation: u64,
}

impl<'a, C: Communicator + ?Sized> Process<'a, C> {
    /// # Errors
    ///
    /// Returns `EpigridError::PartitionError` if the decomposition was made for a different
    /// number of ranks than the communicator connects.
    pub fn new(
        comm: &'a mut C,
        decomposition: &'a Decomposition,
        rates: TransitionRates,
        base_seed: u64,
    ) -> Result<Self, EpigridError> {
        if decomposition.process_count() != comm.size() {
            return Err(EpigridError::PartitionError(format!(
                "the grid is split for {} processes but the group has {}",
                decomposition.process_count(),
                comm.size()
            )));
        }
        let rank = comm.rank();
        let subdomain = decomposition.subdomain(rank);
        let halo = HaloExchange::new(subdomain);
        debug!(
            "rank {rank} owns rows {}..{} and columns {}..{}, sends {} boundary cells per generation",
            subdomain.row_start,
            subdomain.row_end,
            subdomain.col_start,
            subdomain.col_end,
            halo.outgoing_cells()
        );
        Ok(Process {
            decomposition,
            subdomain,
            grid: GridState::new(subdomain.layout),
            border: subdomain.layout.border_cells(),
            halo,
            rates,
            rng: rank_rng(base_seed, rank),
            base_seed,
            generation: 0,
            comm,
        })
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.comm.is_root()
    }

    /// The generation held in the current buffer.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn grid(&self) -> &GridState {
        &self.grid
    }

    #[must_use]
    pub fn subdomain(&self) -> &Subdomain {
        self.subdomain
    }

    /// Fills the owned cells with healthy people of random age.
    pub fn initialize(&mut self) {
        let layout = self.subdomain.layout;
        for row in layout.owned_row_range() {
            for col in layout.owned_col_range() {
                let (global_row, global_col) = self.subdomain.to_global(row, col);
                let age = initial_age(self.base_seed, global_row, global_col);
                self.grid.set_current(row, col, Cell::with_age(age));
            }
        }
    }

    /// Marks the person at a global position as freshly infected if this rank owns it.
    pub fn seed_infection(&mut self, global_row: usize, global_col: usize) -> bool {
        match self.cell(global_row, global_col) {
            Some(cell) => self.set_cell(
                global_row,
                global_col,
                Cell {
                    is_infected: true,
                    ..cell
                },
            ),
            None => false,
        }
    }

    /// Overwrites an owned cell of the current buffer. Returns false if another rank owns it.
    pub fn set_cell(&mut self, global_row: usize, global_col: usize, cell: Cell) -> bool {
        match self.subdomain.to_local(global_row, global_col) {
            Some((row, col)) => {
                self.grid.set_current(row, col, cell);
                true
            }
            None => false,
        }
    }

    /// The current value of an owned cell.
    #[must_use]
    pub fn cell(&self, global_row: usize, global_col: usize) -> Option<Cell> {
        self.subdomain
            .to_local(global_row, global_col)
            .map(|(row, col)| self.grid.get(row, col))
    }

    /// # Errors
    ///
    /// Returns `EpigridError::CommunicationError` if a neighbor cannot be reached.
    pub fn send_boundaries(&mut self) -> Result<(), EpigridError> {
        self.halo
            .send_boundaries(&self.grid, self.comm, self.generation)
    }

    pub fn update_interior(&mut self) {
        let layout = *self.grid.layout();
        for row in layout.interior_row_range() {
            for col in layout.interior_col_range() {
                self.update(row, col);
            }
        }
    }

    /// # Errors
    ///
    /// Returns `EpigridError::CommunicationError` if a neighbor's boundary is missing or
    /// malformed, or `EpigridError::Aborted` if the group was torn down while waiting.
    pub fn receive_ghosts(&mut self) -> Result<(), EpigridError> {
        self.halo
            .receive_ghosts(&mut self.grid, self.comm, self.generation)
    }

    pub fn update_border(&mut self) {
        for index in 0..self.border.len() {
            let (row, col) = self.border[index];
            self.update(row, col);
        }
    }

    /// Makes the next buffer current and advances the generation counter.
    pub fn swap(&mut self) {
        self.grid.swap();
        self.generation += 1;
    }

    fn update(&mut self, row: usize, col: usize) {
        let cell = self.grid.get(row, col);
        let neighbors = self.grid.neighborhood(row, col);
        let next = next_state(cell, &neighbors, &self.rates, &mut self.rng);
        self.grid.set_next(row, col, next);
    }

    /// Runs the compute and exchange phases of one generation and swaps.
    ///
    /// # Errors
    ///
    /// Propagates halo exchange failures.
    pub fn step(&mut self) -> Result<(), EpigridError> {
        self.send_boundaries()?;
        self.update_interior();
        self.receive_ghosts()?;
        self.update_border();
        self.swap();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `EpigridError::Aborted` if another rank aborted the group.
    pub fn barrier(&self) -> Result<(), EpigridError> {
        self.comm.barrier()
    }

    /// Marks the group as failed.
    pub fn abort(&self) {
        self.comm.abort();
    }

    /// State counts of the owned cells.
    #[must_use]
    pub fn local_counts(&self) -> StateCounts {
        self.grid.owned_cells().collect()
    }

    /// Collects every rank's owned cells on rank 0. Returns the assembled grid on rank 0 and
    /// `None` elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::CommunicationError` if a rank's share is missing or has the
    /// wrong size.
    pub fn gather_snapshot(&mut self) -> Result<Option<GridSnapshot>, EpigridError> {
        if !self.is_root() {
            let cells = pack_cells(self.grid.owned_cells());
            self.comm
                .send(0, Tag::Snapshot, self.generation, Payload::Cells(cells))?;
            return Ok(None);
        }

        let (rows, cols) = (
            self.decomposition.global_rows,
            self.decomposition.global_cols,
        );
        let mut cells = vec![Cell::default(); rows * cols];
        place(&mut cells, cols, self.subdomain, self.grid.owned_cells());
        for subdomain in self.decomposition.subdomains().skip(1) {
            let payload = self
                .comm
                .receive(subdomain.rank, Tag::Snapshot, self.generation)?;
            let Payload::Cells(wire) = payload else {
                return Err(EpigridError::CommunicationError(format!(
                    "rank {} sent a non-cell snapshot",
                    subdomain.rank
                )));
            };
            if wire.len() != subdomain.owned_len() {
                return Err(EpigridError::CommunicationError(format!(
                    "rank {} sent {} cells for a {}x{} subdomain",
                    subdomain.rank,
                    wire.len(),
                    subdomain.owned_rows(),
                    subdomain.owned_cols()
                )));
            }
            place(&mut cells, cols, subdomain, unpack_cells(&wire));
        }
        Ok(Some(GridSnapshot::new(rows, cols, cells)))
    }

    /// Sums the state counts of every rank on rank 0. Returns `None` elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `EpigridError::CommunicationError` if a rank's counts are missing or malformed.
    pub fn reduce_counts(&mut self) -> Result<Option<StateCounts>, EpigridError> {
        let local = self.local_counts();
        if !self.is_root() {
            self.comm
                .send(0, Tag::Counts, self.generation, Payload::Counts(local.to_vec()))?;
            return Ok(None);
        }
        let mut total = local;
        for source in 1..self.comm.size() {
            match self.comm.receive(source, Tag::Counts, self.generation)? {
                Payload::Counts(values) => total.merge(&StateCounts::from_slice(&values)?),
                _ => {
                    return Err(EpigridError::CommunicationError(format!(
                        "rank {source} sent something other than counts"
                    )))
                }
            }
        }
        Ok(Some(total))
    }
}

/// Copies a rank's owned cells, in row-major order, into the global buffer.
fn place(
    global: &mut [Cell],
    global_cols: usize,
    subdomain: &Subdomain,
    cells: impl Iterator<Item = Cell>,
) {
    let coordinates = (subdomain.row_start..subdomain.row_end)
        .flat_map(|row| (subdomain.col_start..subdomain.col_end).map(move |col| (row, col)));
    for ((row, col), cell) in coordinates.zip(cells) {
        global[row * global_cols + col] = cell;
    }
}

/// How to run: the decomposition and the random seed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOptions {
    pub scheme: PartitionScheme,
    pub process_count: usize,
    /// `None` seeds from the wall clock.
    pub base_seed: Option<u64>,
    pub show_progress: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            scheme: PartitionScheme::Single,
            process_count: 1,
            base_seed: None,
            show_progress: false,
        }
    }
}

/// What the coordinator knows at the end of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub generations: u64,
    pub process_count: usize,
    pub base_seed: u64,
    pub elapsed: Duration,
    pub final_counts: StateCounts,
}

type Observers<'o> = Mutex<Vec<&'o mut (dyn Observer + Send)>>;

/// Runs a whole simulation and returns the coordinator's summary.
///
/// `Single` runs on the calling thread; the other schemes start one thread per rank. The
/// person at the center of the grid is infected before the first generation. Observers run on
/// rank 0 only and see generation 0 (the initial grid) and every generation after it.
///
/// # Errors
///
/// Returns the first configuration, partition, communication, or observer error any rank
/// hits. Nothing is simulated if the configuration or the partition is invalid.
pub fn run_simulation(
    parameters: &Parameters,
    options: &RunOptions,
    observers: Vec<&mut (dyn Observer + Send)>,
) -> Result<RunSummary, EpigridError> {
    parameters.validate()?;
    let size = parameters.matrix_size;
    let decomposition = options
        .scheme
        .decompose(size, size, options.process_count)?;
    let base_seed = options.base_seed.unwrap_or_else(wall_clock_seed);
    info!(
        "simulating {} generations of a {size}x{size} grid on {} processes ({:?}, seed {base_seed})",
        parameters.number_of_generations,
        decomposition.process_count(),
        options.scheme
    );

    let gather = !observers.is_empty();
    let observers: Observers = Mutex::new(observers);
    let body = |comm: &mut dyn Communicator| {
        drive(
            comm,
            &decomposition,
            parameters,
            base_seed,
            gather,
            &observers,
            options.show_progress,
        )
    };

    let outcomes = if options.scheme == PartitionScheme::Single {
        let mut comm = SoloCommunicator::new();
        vec![body(&mut comm)?]
    } else {
        ProcessGroup::run(decomposition.process_count(), |comm| body(comm))?
    };

    outcomes
        .into_iter()
        .flatten()
        .next()
        .ok_or_else(|| EpigridError::from("the coordinating rank returned no summary"))
}

/// Runs the calling rank's share of a simulation over a group that already exists, such as
/// the processes of an MPI launch. Every rank of `comm` must call this with the same
/// parameters and scheme.
///
/// The base seed and whether snapshots are gathered are decided by rank 0 and shared with
/// the rest, so only rank 0 needs observers and a seed. `options.process_count` is ignored in
/// favor of the size of `comm`. A rank that fails aborts the group.
///
/// Returns the summary on rank 0 and `None` on every other rank.
///
/// # Errors
///
/// Returns the first configuration, partition, communication, or observer error this rank
/// hits, or `EpigridError::Aborted` if another rank gave up first.
pub fn run_distributed(
    parameters: &Parameters,
    options: &RunOptions,
    comm: &mut dyn Communicator,
    observers: Vec<&mut (dyn Observer + Send)>,
) -> Result<Option<RunSummary>, EpigridError> {
    let outcome = run_rank_share(parameters, options, comm, observers);
    if let Err(err) = &outcome {
        if !matches!(err, EpigridError::Aborted) {
            error!("rank {} failed: {err}", comm.rank());
            comm.abort();
        }
    }
    outcome
}

fn run_rank_share(
    parameters: &Parameters,
    options: &RunOptions,
    comm: &mut dyn Communicator,
    observers: Vec<&mut (dyn Observer + Send)>,
) -> Result<Option<RunSummary>, EpigridError> {
    parameters.validate()?;
    let size = parameters.matrix_size;
    let decomposition = options.scheme.decompose(size, size, comm.size())?;
    let (base_seed, gather) = agree_on_settings(
        comm,
        options.base_seed.unwrap_or_else(wall_clock_seed),
        !observers.is_empty(),
    )?;
    if comm.is_root() {
        info!(
            "simulating {} generations of a {size}x{size} grid on {} processes ({:?}, seed {base_seed})",
            parameters.number_of_generations,
            decomposition.process_count(),
            options.scheme
        );
    }
    let observers: Observers = Mutex::new(observers);
    drive(
        comm,
        &decomposition,
        parameters,
        base_seed,
        gather,
        &observers,
        options.show_progress,
    )
}

/// Replaces every rank's base seed and gather flag with rank 0's.
fn agree_on_settings(
    comm: &mut dyn Communicator,
    base_seed: u64,
    gather: bool,
) -> Result<(u64, bool), EpigridError> {
    if comm.is_root() {
        for rank in 1..comm.size() {
            comm.send(
                rank,
                Tag::Settings,
                0,
                Payload::Counts(vec![base_seed, u64::from(gather)]),
            )?;
        }
        return Ok((base_seed, gather));
    }
    match comm.receive(0, Tag::Settings, 0)? {
        Payload::Counts(settings) if settings.len() == 2 => Ok((settings[0], settings[1] != 0)),
        other => Err(EpigridError::CommunicationError(format!(
            "rank {} expected run settings from the coordinator, got {other:?}",
            comm.rank()
        ))),
    }
}

fn drive(
    comm: &mut dyn Communicator,
    decomposition: &Decomposition,
    parameters: &Parameters,
    base_seed: u64,
    gather: bool,
    observers: &Observers,
    show_progress: bool,
) -> Result<Option<RunSummary>, EpigridError> {
    let generations = parameters.number_of_generations;
    let pacing = parameters.pacing_delay();
    let mut process = Process::new(
        comm,
        decomposition,
        TransitionRates::from(parameters),
        base_seed,
    )?;
    process.initialize();
    let center = parameters.matrix_size / 2;
    process.seed_infection(center, center);
    if let (true, Some(owner)) = (process.is_root(), decomposition.owner_of(center, center)) {
        debug!("the infection starts at ({center}, {center}) on rank {owner}");
    }

    let mut observers = if process.is_root() {
        Some(observers.lock().unwrap_or_else(PoisonError::into_inner))
    } else {
        None
    };
    let show_progress = show_progress && process.is_root();
    #[cfg(feature = "progress_bar")]
    if show_progress {
        crate::progress::init_generation_progress_bar(generations);
    }

    let start = Instant::now();
    if gather {
        publish(&mut process, observers.as_deref_mut())?;
    }
    for generation in 1..=generations {
        if process.is_root() {
            info!("Generation {generation}");
        }
        process.step()?;
        if gather {
            publish(&mut process, observers.as_deref_mut())?;
        }
        process.barrier()?;
        #[cfg(feature = "progress_bar")]
        if show_progress {
            crate::progress::update_generation_progress(generation, generations);
        }
        if !pacing.is_zero() {
            thread::sleep(pacing);
        }
    }
    let elapsed = start.elapsed();

    let final_counts = process.reduce_counts()?;
    let Some(final_counts) = final_counts else {
        return Ok(None);
    };
    if let Some(observers) = observers.as_deref_mut() {
        for observer in observers.iter_mut() {
            observer.finish()?;
        }
    }
    info!(
        "simulated {generations} generations in {}",
        humantime::format_duration(elapsed)
    );
    Ok(Some(RunSummary {
        generations,
        process_count: decomposition.process_count(),
        base_seed,
        elapsed,
        final_counts,
    }))
}

/// Gathers the current generation on rank 0 and hands it to the observers.
fn publish<C: Communicator + ?Sized>(
    process: &mut Process<'_, C>,
    observers: Option<&mut Vec<&mut (dyn Observer + Send)>>,
) -> Result<(), EpigridError> {
    let generation = process.generation();
    if let (Some(snapshot), Some(observers)) = (process.gather_snapshot()?, observers) {
        for observer in observers.iter_mut() {
            observer.on_generation(generation, &snapshot)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellState;
    use crate::observer::SnapshotRecorder;

    fn quiet(matrix_size: usize, generations: u64) -> Parameters {
        Parameters {
            number_of_generations: generations,
            matrix_size,
            infection_percentage: 0,
            immunity_percentage: 0,
            lose_immunity_percentage: 0,
            vaccination_percentage: 0,
            death_percentage: 0,
            ..Parameters::default()
        }
    }

    fn options(scheme: PartitionScheme, process_count: usize) -> RunOptions {
        RunOptions {
            scheme,
            process_count,
            base_seed: Some(11),
            show_progress: false,
        }
    }

    #[test]
    fn a_process_must_match_its_group() {
        let decomposition = PartitionScheme::Strip1D.decompose(4, 4, 2).unwrap();
        let mut comm = SoloCommunicator::new();
        assert!(matches!(
            Process::new(&mut comm, &decomposition, TransitionRates::default(), 0),
            Err(EpigridError::PartitionError(_))
        ));
    }

    #[test]
    fn initialization_clears_flags_and_draws_ages() {
        let decomposition = PartitionScheme::Single.decompose(10, 10, 1).unwrap();
        let mut comm = SoloCommunicator::new();
        let mut process =
            Process::new(&mut comm, &decomposition, TransitionRates::default(), 5).unwrap();
        process.initialize();
        let counts = process.local_counts();
        assert_eq!(counts.default, 100);
        let ages: Vec<u8> = process.grid().owned_cells().map(|c| c.age).collect();
        assert!(ages.iter().all(|age| *age < 100));
        assert!(ages.iter().any(|age| *age != ages[0]));

        assert!(process.seed_infection(5, 5));
        assert!(!process.seed_infection(10, 0));
        assert!(process.cell(5, 5).unwrap().is_infected);
    }

    #[test]
    fn the_generation_advances_on_swap() {
        let decomposition = PartitionScheme::Single.decompose(3, 3, 1).unwrap();
        let mut comm = SoloCommunicator::new();
        let mut process =
            Process::new(&mut comm, &decomposition, TransitionRates::default(), 5).unwrap();
        process.initialize();
        process.step().unwrap();
        process.step().unwrap();
        assert_eq!(process.generation(), 2);
    }

    #[test]
    fn observers_see_the_initial_grid_and_every_generation() {
        let mut recorder = SnapshotRecorder::default();
        let observers: Vec<&mut (dyn Observer + Send)> = vec![&mut recorder];
        let summary =
            run_simulation(&quiet(9, 4), &options(PartitionScheme::Single, 1), observers).unwrap();
        assert_eq!(summary.generations, 4);
        assert_eq!(summary.final_counts.total(), 81);

        let generations: Vec<u64> = recorder.snapshots.iter().map(|(g, _)| *g).collect();
        assert_eq!(generations, vec![0, 1, 2, 3, 4]);
        let (_, initial) = &recorder.snapshots[0];
        assert_eq!(initial.state(4, 4), CellState::Incubating);
        assert_eq!(initial.counts().infected(), 1);
    }

    #[test]
    fn summaries_agree_across_schemes() {
        let parameters = quiet(12, 6);
        let single = run_simulation(&parameters, &options(PartitionScheme::Single, 1), vec![])
            .unwrap();
        let strips = run_simulation(&parameters, &options(PartitionScheme::Strip1D, 3), vec![])
            .unwrap();
        let blocks = run_simulation(&parameters, &options(PartitionScheme::block(4), 4), vec![])
            .unwrap();
        assert_eq!(strips.process_count, 3);
        assert_eq!(single.final_counts, strips.final_counts);
        assert_eq!(single.final_counts, blocks.final_counts);
    }

    #[test]
    fn invalid_partitions_fail_before_running() {
        let result = run_simulation(
            &quiet(4, 1),
            &options(PartitionScheme::Strip1D, 5),
            vec![],
        );
        assert!(matches!(result, Err(EpigridError::PartitionError(_))));
    }

    struct FailingObserver;

    impl Observer for FailingObserver {
        fn on_generation(&mut self, generation: u64, _: &GridSnapshot) -> Result<(), EpigridError> {
            if generation == 2 {
                Err(EpigridError::from("disk full"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn an_observer_failure_stops_every_rank() {
        let mut failing = FailingObserver;
        let observers: Vec<&mut (dyn Observer + Send)> = vec![&mut failing];
        let result = run_simulation(
            &quiet(8, 10),
            &options(PartitionScheme::Strip1D, 2),
            observers,
        );
        assert!(matches!(result, Err(EpigridError::EpigridError(ref msg)) if msg == "disk full"));
    }

    #[test]
    fn an_existing_group_follows_the_coordinators_settings() {
        let parameters = Parameters {
            matrix_size: 12,
            number_of_generations: 6,
            ..Parameters::default()
        };
        let threaded = run_simulation(&parameters, &options(PartitionScheme::Strip1D, 3), vec![])
            .unwrap();

        let recorder = Mutex::new(SnapshotRecorder::default());
        let summaries = ProcessGroup::run(3, |comm| {
            if comm.is_root() {
                let mut recorder = recorder.lock().unwrap();
                let observers: Vec<&mut (dyn Observer + Send)> = vec![&mut *recorder];
                run_distributed(
                    &parameters,
                    &options(PartitionScheme::Strip1D, 1),
                    comm,
                    observers,
                )
            } else {
                let unseeded = RunOptions {
                    base_seed: None,
                    ..options(PartitionScheme::Strip1D, 1)
                };
                run_distributed(&parameters, &unseeded, comm, Vec::new())
            }
        })
        .unwrap();

        assert!(summaries[1].is_none() && summaries[2].is_none());
        let summary = summaries[0].clone().unwrap();
        assert_eq!(summary.process_count, 3);
        assert_eq!(summary.base_seed, 11);
        assert_eq!(summary.final_counts, threaded.final_counts);
        assert_eq!(recorder.into_inner().unwrap().snapshots.len(), 7);
    }

    #[test]
    fn a_failing_rank_of_an_existing_group_aborts_it() {
        let result = ProcessGroup::run(2, |comm| {
            let mut failing = FailingObserver;
            let observers: Vec<&mut (dyn Observer + Send)> = if comm.is_root() {
                vec![&mut failing]
            } else {
                Vec::new()
            };
            run_distributed(
                &quiet(8, 10),
                &options(PartitionScheme::Strip1D, 2),
                comm,
                observers,
            )
        });
        assert!(matches!(result, Err(EpigridError::EpigridError(ref msg)) if msg == "disk full"));
    }
}
