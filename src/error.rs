use std::fmt::{self, Debug, Display};
use std::io;

use crate::Day;

/// Provides `StiError` and maps to other errors to
/// convert to an `StiError`
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum StiError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    CSVError(csv::Error),
    EncodeError(bincode::error::EncodeError),
    DecodeError(bincode::error::DecodeError),
    /// A malformed or missing configuration entry, detected at `initialise()`.
    ConfigError(String),
    /// An imported population state that does not fit the running configuration.
    StateError(String),
    /// A failure raised while a trajectory was stepping.
    TrajectoryError {
        trajectory: usize,
        day: Day,
        message: String,
    },
    /// A batch of trajectories did not complete within its time limit.
    Timeout,
    /// The worker thread pool for a batch could not be built.
    PoolError(String),
    Other(String),
}

impl From<io::Error> for StiError {
    fn from(error: io::Error) -> Self {
        StiError::IoError(error)
    }
}

impl From<serde_json::Error> for StiError {
    fn from(error: serde_json::Error) -> Self {
        StiError::JsonError(error)
    }
}

impl From<csv::Error> for StiError {
    fn from(error: csv::Error) -> Self {
        StiError::CSVError(error)
    }
}

impl From<bincode::error::EncodeError> for StiError {
    fn from(error: bincode::error::EncodeError) -> Self {
        StiError::EncodeError(error)
    }
}

impl From<bincode::error::DecodeError> for StiError {
    fn from(error: bincode::error::DecodeError) -> Self {
        StiError::DecodeError(error)
    }
}

impl From<String> for StiError {
    fn from(error: String) -> Self {
        StiError::Other(error)
    }
}

impl From<&str> for StiError {
    fn from(error: &str) -> Self {
        StiError::Other(error.to_string())
    }
}

impl std::error::Error for StiError {}

impl Display for StiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StiError::ConfigError(message) => write!(f, "Configuration error: {message}"),
            StiError::StateError(message) => write!(f, "State error: {message}"),
            StiError::TrajectoryError {
                trajectory,
                day,
                message,
            } => write!(f, "Trajectory {trajectory} failed on day {day}: {message}"),
            StiError::Timeout => write!(f, "Timed out waiting for trajectories"),
            StiError::PoolError(message) => write!(f, "Thread pool error: {message}"),
            StiError::Other(message) => write!(f, "{message}"),
            _ => write!(f, "Error: {self:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_names_field() {
        let error = StiError::ConfigError("condom_use.regular.anal must be in [0, 1]".into());
        assert_eq!(
            error.to_string(),
            "Configuration error: condom_use.regular.anal must be in [0, 1]"
        );
    }

    #[test]
    fn trajectory_error_display_has_context() {
        let error = StiError::TrajectoryError {
            trajectory: 3,
            day: 17,
            message: "boom".into(),
        };
        assert_eq!(error.to_string(), "Trajectory 3 failed on day 17: boom");
    }

    #[test]
    fn converts_from_str() {
        let error: StiError = "bad".into();
        assert!(matches!(&error, StiError::Other(message) if message == "bad"));
        assert_eq!(error.to_string(), "bad");
    }

    #[test]
    fn pool_error_display() {
        let error = StiError::PoolError("no threads".into());
        assert_eq!(error.to_string(), "Thread pool error: no threads");
    }
}
