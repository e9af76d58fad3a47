use thiserror::Error;

/// `EX_NOHOST` from sysexits.h, so a supervisor can tell a dead uplink apart
/// from a crash.
pub const EXIT_TRANSPORT_EXHAUSTED: i32 = 68;

/// Smart beacon error types
#[derive(Error, Debug, Clone)]
pub enum BeaconError {
    #[error("GPSD unavailable: {0}")]
    GpsdUnavailable(String),

    #[error("GPSD protocol error: {0}")]
    GpsdProtocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport exhausted after {attempts} connection attempts to {endpoint}")]
    TransportExhausted { endpoint: String, attempts: u32 },

    #[error("Host metrics unavailable: {0}")]
    Metrics(String),

    #[error("Invalid report: {0}")]
    InvalidReport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for beacon operations
pub type BResult<T> = Result<T, BeaconError>;

impl BeaconError {
    /// Only an exhausted uplink is allowed to take the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BeaconError::TransportExhausted { .. })
    }

    /// Process exit status for an error that escaped the scheduler
    pub fn exit_code(&self) -> i32 {
        match self {
            BeaconError::TransportExhausted { .. } => EXIT_TRANSPORT_EXHAUSTED,
            BeaconError::GpsdUnavailable(_)
            | BeaconError::GpsdProtocol(_)
            | BeaconError::Storage(_)
            | BeaconError::Transport(_)
            | BeaconError::Metrics(_)
            | BeaconError::InvalidReport(_)
            | BeaconError::Config(_) => 1,
        }
    }
}
