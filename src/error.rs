use std::fmt::{self, Debug, Display};
use std::io;

/// Provides `EpigridError` and maps to other errors to
/// convert to an `EpigridError`
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum EpigridError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    CSVError(csv::Error),
    /// A parameter is missing, negative, or out of range.
    ConfigError(String),
    /// The grid cannot be decomposed the way that was asked for.
    PartitionError(String),
    /// A peer is unreachable, a message is mis-tagged, or a rank died.
    CommunicationError(String),
    /// Another rank gave up and the whole group was torn down.
    Aborted,
    EpigridError(String),
}

impl From<io::Error> for EpigridError {
    fn from(error: io::Error) -> Self {
        EpigridError::IoError(error)
    }
}

impl From<serde_json::Error> for EpigridError {
    fn from(error: serde_json::Error) -> Self {
        EpigridError::JsonError(error)
    }
}

impl From<csv::Error> for EpigridError {
    fn from(error: csv::Error) -> Self {
        EpigridError::CSVError(error)
    }
}

impl From<String> for EpigridError {
    fn from(error: String) -> Self {
        EpigridError::EpigridError(error)
    }
}

impl From<&str> for EpigridError {
    fn from(error: &str) -> Self {
        EpigridError::EpigridError(error.to_string())
    }
}

impl std::error::Error for EpigridError {}

impl Display for EpigridError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EpigridError::ConfigError(msg) => write!(f, "Error: invalid configuration: {msg}")?,
            EpigridError::PartitionError(msg) => write!(f, "Error: invalid partition: {msg}")?,
            EpigridError::CommunicationError(msg) => {
                write!(f, "Error: communication failure: {msg}")?;
            }
            EpigridError::Aborted => write!(f, "Error: process group aborted")?,
            _ => write!(f, "Error: {self:?}")?,
        }
        Ok(())
    }
}
