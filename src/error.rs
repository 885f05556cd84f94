//! Driver error types and result handling.
//!
//! The error taxonomy distinguishes the failure classes a caller has to react
//! to differently: a register-map load failure is fatal at startup, a full
//! write queue is surfaced synchronously, and the three per-request failures
//! (protocol exception, link fault, timeout) are reported through the
//! completion path without ever crashing the scheduler.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors produced by the extension driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The register-map source is missing or malformed. Fatal at startup;
    /// the driver never starts with an incomplete map.
    #[error("register map load failed: {message}")]
    ConfigLoad {
        /// Description of the load failure.
        message: String,
    },

    /// The transport currently has no connection to the bus.
    #[error("link is not connected")]
    LinkUnavailable,

    /// The slave reported a protocol-level exception for one request.
    #[error("device reported a protocol exception: {message}")]
    Protocol {
        /// Device-reported error text.
        message: String,
    },

    /// A link-level failure occurred while issuing one request.
    #[error("transport failure: {message}")]
    Transport {
        /// Link-level error text.
        message: String,
    },

    /// No response arrived within the request's timeout bound.
    #[error("no response within {timeout:?}")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The bounded write queue is full; the write was never accepted.
    #[error("write queue is full")]
    QueueFull,

    /// The named circuit does not exist in the loaded register map.
    #[error("unknown circuit: {name}")]
    UnknownCircuit {
        /// Circuit name as given by the caller.
        name: String,
    },

    /// The driver worker has shut down and no longer accepts operations.
    #[error("driver is no longer running")]
    Closed,
}

impl DriverError {
    /// Build a [`DriverError::ConfigLoad`] from any displayable cause.
    pub fn config_load(message: impl Into<String>) -> Self {
        DriverError::ConfigLoad {
            message: message.into(),
        }
    }

    /// Build a [`DriverError::Protocol`] from device-reported text.
    pub fn protocol(message: impl Into<String>) -> Self {
        DriverError::Protocol {
            message: message.into(),
        }
    }

    /// Build a [`DriverError::Transport`] from link-level text.
    pub fn transport(message: impl Into<String>) -> Self {
        DriverError::Transport {
            message: message.into(),
        }
    }

    /// True for the per-request failure classes that leave the scheduler
    /// able to continue handling subsequent operations.
    pub fn is_operation_scoped(&self) -> bool {
        !matches!(self, DriverError::ConfigLoad { .. })
    }
}
