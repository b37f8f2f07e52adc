pub use crate::cell::{Cell, CellState};
pub use crate::comm::{Communicator, ProcessGroup, SoloCommunicator};
pub use crate::error::EpigridError;
pub use crate::log::{debug, error, info, trace, warn};
pub use crate::observer::{GridSnapshot, Observer};
pub use crate::parameters::{load_parameters, Parameters};
pub use crate::partition::{Direction, PartitionScheme};
pub use crate::simulation::{run_distributed, run_simulation, Process, RunOptions, RunSummary};
