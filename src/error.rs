use flume::{RecvError, SendError};
use thiserror::Error;

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
#[derive(Debug, Error)]
pub enum Error {
    /// The link to the vehicle could not be opened. The String contains the reason.
    #[error("connection error: {0}")]
    Connection(String),
    /// None of the scanned serial devices answered.
    #[error("no vehicle found on {prefix}N after {attempts} attempts")]
    NoDeviceFound {
        /// Device path prefix that was scanned
        prefix: String,
        /// Number of device paths tried
        attempts: usize,
    },
    /// Unexpected error reading or writing the MAVLink link. The String contains the reason.
    #[error("link error: {0}")]
    Link(String),
    /// The vehicle object is currently disconnected.
    #[error("vehicle disconnected")]
    Disconnected,
    /// Operation timed out waiting for the vehicle.
    #[error("timeout waiting for the vehicle")]
    Timeout,
    /// Mode name not known by the lib.
    #[error("unknown vehicle mode {0:?}")]
    UnknownMode(String),
    /// Custom mode number reported by the vehicle is not known by the lib.
    #[error("unsupported custom mode number {0}")]
    UnsupportedMode(u32),
    /// The vehicle answered a command with a result other than accepted.
    #[error("command {command} rejected: {result}")]
    CommandRejected {
        /// Name of the MAVLink command
        command: String,
        /// Name of the MAVLink result
        result: String,
    },
    /// Parameter subsystem error. The String contains the reason.
    #[error("parameter error: {0}")]
    ParamError(String),
    /// Battery voltage went under the configured minimum.
    #[error("battery voltage too low: {voltage:.2}V < {minimum:.2}V")]
    LowBattery {
        /// Last voltage reported by the vehicle
        voltage: f32,
        /// Configured minimum voltage
        minimum: f32,
    },
    /// Error with the async runtime or a child process.
    #[error("system error: {0}")]
    SystemError(String),
}

impl From<RecvError> for Error {
    fn from(_: RecvError) -> Self {
        Error::Disconnected
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(_: SendError<T>) -> Self {
        Error::Disconnected
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Error::SystemError(format!("{}", error))
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Connection(format!("{}", error))
    }
}
