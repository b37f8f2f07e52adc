use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::thread;

use clap::{Args, Command, FromArgMatches as _, ValueEnum};
use log::{info, warn};

use crate::error::EpigridError;
use crate::log::apply_level_spec;
use crate::observer::Observer;
use crate::parameters::{load_parameters, Parameters};
use crate::partition::PartitionScheme;
use crate::render::{FrameWriter, Palette};
use crate::report::CountsReport;
use crate::simulation::{run_simulation, RunOptions, RunSummary};
#[cfg(feature = "distributed")]
use crate::simulation::run_distributed;

/// How the grid is split across processes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PartitionKind {
    /// One process owns the whole grid
    Single,
    /// Vertical strips in a ring
    Strip,
    /// A 2D tiling of rectangular blocks
    Block,
}

/// Command line arguments of the `epigrid` binary
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct BaseArgs {
    /// Path to a JSON parameters file. Built-in defaults are used without one
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of processes. Defaults to 1 for `single` and to the available parallelism
    /// otherwise
    #[arg(short = 'n', long)]
    pub processes: Option<usize>,

    /// Partitioning scheme
    #[arg(short, long, value_enum, default_value_t = PartitionKind::Single)]
    pub partition: PartitionKind,

    /// Rows of the process grid for `block`
    #[arg(long, requires = "process_cols")]
    pub process_rows: Option<usize>,

    /// Columns of the process grid for `block`
    #[arg(long, requires = "process_rows")]
    pub process_cols: Option<usize>,

    /// Base random seed. Defaults to the wall clock
    #[arg(short, long)]
    pub random_seed: Option<u64>,

    /// Overrides the number of generations from the parameters file
    #[arg(short, long)]
    pub generations: Option<u64>,

    /// Directory for the state-count report and frames
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Also write a PPM frame per generation (needs --output-dir)
    #[arg(long, requires = "output_dir")]
    pub frames: bool,

    /// Log level, optionally followed by per-module filters (e.g. `info,epigrid::halo=trace`)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl Default for BaseArgs {
    fn default() -> Self {
        BaseArgs {
            config: None,
            processes: None,
            partition: PartitionKind::Single,
            process_rows: None,
            process_cols: None,
            random_seed: None,
            generations: None,
            output_dir: None,
            frames: false,
            log_level: None,
            no_progress: true,
        }
    }
}

fn create_epigrid_cli() -> Command {
    let cli = Command::new("epigrid")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A domain-decomposed cellular-automaton epidemic simulator");
    BaseArgs::augment_args(cli)
}

/// Parses the command line and runs a simulation.
///
/// Under an MPI launcher (with the `distributed` feature) this process runs one rank of the
/// MPI world and only rank 0 returns a summary. Otherwise the whole run happens here.
///
/// # Errors
/// Returns an error if argument parsing, configuration, or the run itself fails
#[allow(clippy::missing_errors_doc)]
pub fn run_with_args() -> Result<Option<RunSummary>, Box<dyn std::error::Error>> {
    let matches = create_epigrid_cli().get_matches();
    let args = BaseArgs::from_arg_matches(&matches)?;
    #[cfg(feature = "distributed")]
    if crate::comm_mpi::launched_by_mpi() {
        return Ok(run_with_mpi(&args)?);
    }
    Ok(Some(run_with_base_args(&args)?))
}

/// Turns the partition arguments into a scheme and a process count.
///
/// # Errors
///
/// Returns `EpigridError::ConfigError` for a combination that names no valid partition.
pub fn resolve_partition(args: &BaseArgs) -> Result<(PartitionScheme, usize), EpigridError> {
    let default_processes = || thread::available_parallelism().map_or(2, usize::from);
    match args.partition {
        PartitionKind::Single => {
            if args.processes.is_some_and(|n| n != 1) {
                return Err(EpigridError::ConfigError(
                    "the single partition runs on exactly one process".to_string(),
                ));
            }
            Ok((PartitionScheme::Single, 1))
        }
        PartitionKind::Strip => Ok((
            PartitionScheme::Strip1D,
            args.processes.unwrap_or_else(default_processes),
        )),
        PartitionKind::Block => match (args.process_rows, args.process_cols) {
            (Some(process_rows), Some(process_cols)) => Ok((
                PartitionScheme::Block2D {
                    process_rows,
                    process_cols,
                },
                args.processes.unwrap_or(process_rows * process_cols),
            )),
            _ => {
                let processes = args.processes.unwrap_or_else(default_processes);
                Ok((PartitionScheme::block(processes), processes))
            }
        },
    }
}

/// Whether to draw the progress bar. It shares stdout with the run summary, so it is only
/// drawn on a terminal.
fn show_progress(args: &BaseArgs, stdout_is_terminal: bool) -> bool {
    !args.no_progress && stdout_is_terminal
}

fn load_run_parameters(args: &BaseArgs) -> Result<Parameters, EpigridError> {
    let mut parameters = match &args.config {
        Some(path) => {
            info!("loading parameters from {}", path.display());
            load_parameters(path)?
        }
        None => {
            warn!("no parameters file given, using built-in defaults");
            Parameters::default()
        }
    };
    if let Some(generations) = args.generations {
        parameters.number_of_generations = generations;
    }
    parameters.validate()?;
    Ok(parameters)
}

/// The report and frame writers asked for on the command line.
#[derive(Default)]
struct Outputs {
    report: Option<CountsReport>,
    frames: Option<FrameWriter>,
}

impl Outputs {
    fn create(args: &BaseArgs, parameters: &Parameters) -> Result<Self, EpigridError> {
        let mut outputs = Outputs::default();
        if let Some(output_dir) = &args.output_dir {
            outputs.report = Some(CountsReport::create(&output_dir.join("counts.csv"))?);
            if args.frames {
                outputs.frames = Some(FrameWriter::new(
                    &output_dir.join("frames"),
                    Palette::new(parameters.colors),
                    parameters.square_size,
                )?);
            }
        }
        Ok(outputs)
    }

    fn observers(&mut self) -> Vec<&mut (dyn Observer + Send)> {
        let mut observers: Vec<&mut (dyn Observer + Send)> = Vec::new();
        if let Some(report) = self.report.as_mut() {
            observers.push(report);
        }
        if let Some(frames) = self.frames.as_mut() {
            observers.push(frames);
        }
        observers
    }
}

/// Runs a simulation configured by already parsed arguments.
///
/// # Errors
///
/// Returns the first configuration, I/O, partition, or communication error.
pub fn run_with_base_args(args: &BaseArgs) -> Result<RunSummary, EpigridError> {
    if let Some(spec) = &args.log_level {
        apply_level_spec(spec)?;
    }
    let parameters = load_run_parameters(args)?;
    let (scheme, process_count) = resolve_partition(args)?;
    let options = RunOptions {
        scheme,
        process_count,
        base_seed: args.random_seed,
        show_progress: show_progress(args, io::stdout().is_terminal()),
    };
    let mut outputs = Outputs::create(args, &parameters)?;
    run_simulation(&parameters, &options, outputs.observers())
}

/// Runs this process's rank of an MPI launch. The world size is the process count, and only
/// rank 0 writes outputs and returns a summary.
///
/// # Errors
///
/// Returns the first configuration, I/O, partition, or communication error this rank hits.
/// A rank that fails aborts the whole MPI world.
#[cfg(feature = "distributed")]
pub fn run_with_mpi(args: &BaseArgs) -> Result<Option<RunSummary>, EpigridError> {
    use crate::comm::Communicator;
    use crate::comm_mpi::{send_buffer_bytes, MpiCommunicator};

    if let Some(spec) = &args.log_level {
        apply_level_spec(spec)?;
    }
    let parameters = load_run_parameters(args)?;
    let mut universe = mpi::initialize().ok_or_else(|| {
        EpigridError::CommunicationError("MPI was already initialized".to_string())
    })?;
    let global_cells = parameters.matrix_size * parameters.matrix_size;
    let mut comm = MpiCommunicator::new(&mut universe, send_buffer_bytes(global_cells))?;

    let prepared = resolve_mpi_partition(args, comm.size()).and_then(|(scheme, _)| {
        let outputs = if comm.is_root() {
            Outputs::create(args, &parameters)?
        } else {
            Outputs::default()
        };
        Ok((scheme, outputs))
    });
    let (scheme, mut outputs) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            comm.abort();
            return Err(err);
        }
    };
    let options = RunOptions {
        scheme,
        process_count: comm.size(),
        base_seed: args.random_seed,
        show_progress: comm.is_root() && show_progress(args, io::stdout().is_terminal()),
    };
    run_distributed(&parameters, &options, &mut comm, outputs.observers())
}

/// Resolves the partition for a world of `world_size` processes, which is also the default
/// process count.
///
/// # Errors
///
/// Returns `EpigridError::PartitionError` if the arguments ask for a different number of
/// processes than the world has.
#[cfg(feature = "distributed")]
fn resolve_mpi_partition(
    args: &BaseArgs,
    world_size: usize,
) -> Result<(PartitionScheme, usize), EpigridError> {
    let args = BaseArgs {
        processes: Some(args.processes.unwrap_or(world_size)),
        ..args.clone()
    };
    let (scheme, process_count) = resolve_partition(&args)?;
    if process_count != world_size {
        return Err(EpigridError::PartitionError(format!(
            "the partition asks for {process_count} processes but MPI started {world_size}"
        )));
    }
    Ok((scheme, process_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn args() -> BaseArgs {
        BaseArgs {
            random_seed: Some(42),
            generations: Some(3),
            ..BaseArgs::default()
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        create_epigrid_cli().debug_assert();
    }

    #[test]
    fn parses_partition_flags() {
        let matches = create_epigrid_cli().get_matches_from([
            "epigrid",
            "--partition",
            "block",
            "--process-rows",
            "2",
            "--process-cols",
            "3",
            "--random-seed",
            "7",
        ]);
        let args = BaseArgs::from_arg_matches(&matches).unwrap();
        assert_eq!(args.partition, PartitionKind::Block);
        assert_eq!(args.random_seed, Some(7));
        assert_eq!(
            resolve_partition(&args).unwrap(),
            (
                PartitionScheme::Block2D {
                    process_rows: 2,
                    process_cols: 3
                },
                6
            )
        );
    }

    #[test]
    fn frames_need_an_output_dir() {
        let result = create_epigrid_cli().try_get_matches_from(["epigrid", "--frames"]);
        assert!(result.is_err());
    }

    #[test]
    fn single_rejects_extra_processes() {
        let args = BaseArgs {
            processes: Some(3),
            ..args()
        };
        assert!(matches!(
            resolve_partition(&args),
            Err(EpigridError::ConfigError(_))
        ));
    }

    #[test]
    fn block_without_a_shape_picks_one() {
        let args = BaseArgs {
            partition: PartitionKind::Block,
            processes: Some(6),
            ..args()
        };
        assert_eq!(
            resolve_partition(&args).unwrap(),
            (PartitionScheme::block(6), 6)
        );
    }

    #[test]
    fn runs_with_defaults() {
        let summary = run_with_base_args(&args()).unwrap();
        assert_eq!(summary.generations, 3);
        assert_eq!(summary.base_seed, 42);
        assert_eq!(summary.final_counts.total(), 64 * 64);
    }

    #[test]
    fn writes_reports_and_frames() {
        let dir = tempdir().unwrap();
        let args = BaseArgs {
            output_dir: Some(dir.path().to_path_buf()),
            frames: true,
            partition: PartitionKind::Strip,
            processes: Some(2),
            ..args()
        };
        run_with_base_args(&args).unwrap();

        let report = fs::read_to_string(dir.path().join("counts.csv")).unwrap();
        // Header plus generations 0 through 3.
        assert_eq!(report.lines().count(), 5);
        let frames = fs::read_dir(dir.path().join("frames")).unwrap().count();
        assert_eq!(frames, 4);
    }

    #[test]
    fn a_missing_config_file_is_reported() {
        let args = BaseArgs {
            config: Some(PathBuf::from("does/not/exist.json")),
            ..args()
        };
        assert!(matches!(
            run_with_base_args(&args),
            Err(EpigridError::IoError(_))
        ));
    }

    #[test]
    fn the_progress_bar_needs_a_terminal() {
        let args = BaseArgs {
            no_progress: false,
            ..args()
        };
        assert!(show_progress(&args, true));
        assert!(!show_progress(&args, false));
        assert!(!show_progress(&BaseArgs::default(), true));
    }

    #[cfg(feature = "distributed")]
    #[test]
    fn an_mpi_launch_sizes_the_partition() {
        let strip = BaseArgs {
            partition: PartitionKind::Strip,
            ..args()
        };
        assert_eq!(
            resolve_mpi_partition(&strip, 4).unwrap(),
            (PartitionScheme::Strip1D, 4)
        );
        let mismatched = BaseArgs {
            processes: Some(3),
            ..strip
        };
        assert!(matches!(
            resolve_mpi_partition(&mismatched, 4),
            Err(EpigridError::PartitionError(_))
        ));
        assert!(matches!(
            resolve_mpi_partition(&args(), 2),
            Err(EpigridError::ConfigError(_))
        ));
    }
}
