//! Device and top-level error types.

use cac_common::config::ConfigError;
use cac_common::device::{ComponentKind, DeviceId};
use cac_common::state::DeviceStatus;
use cac_shared_memory::{HandshakeError, ShmError};
use std::fmt;
use thiserror::Error;

/// Failure of one hardware operation on one device.
///
/// Every variant maps to the [`DeviceStatus`] code published in the
/// device's slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// ADC channel path could not be opened
    #[error("cannot open ADC channel {path}: {reason}")]
    OpenAdc {
        /// Channel path
        path: String,
        /// OS error text
        reason: String,
    },

    /// Read failed, was empty, or did not hold an integer
    #[error("bad read from ADC channel {path}: {reason}")]
    ReadAdc {
        /// Channel path
        path: String,
        /// Cause
        reason: String,
    },

    /// ADC channel could not be closed
    #[error("cannot close ADC channel {path}: {reason}")]
    CloseAdc {
        /// Channel path
        path: String,
        /// OS error text
        reason: String,
    },

    /// No GPIO chip path configured
    #[error("GPIO chip path is empty")]
    GpioPathEmpty,

    /// GPIO chip could not be opened
    #[error("cannot open GPIO chip {path}: {reason}")]
    OpenGpio {
        /// Chip path
        path: String,
        /// Cause
        reason: String,
    },

    /// Line lookup failed
    #[error("cannot get GPIO line {pin}: {reason}")]
    GpioGetLine {
        /// Line offset
        pin: u16,
        /// Cause
        reason: String,
    },

    /// Output request failed
    #[error("cannot request GPIO line {pin} as output: {reason}")]
    GpioRequestOutput {
        /// Line offset
        pin: u16,
        /// Cause
        reason: String,
    },

    /// Line write failed
    #[error("cannot write GPIO line {pin}: {reason}")]
    WriteGpio {
        /// Line offset
        pin: u16,
        /// Cause
        reason: String,
    },

    /// Driver is not initialised or already released
    #[error("device not ready")]
    NotReady,
}

impl DeviceError {
    /// Status code published for this failure.
    pub fn status(&self) -> DeviceStatus {
        match self {
            Self::OpenAdc { .. } => DeviceStatus::ErrOpenAdc,
            Self::ReadAdc { .. } => DeviceStatus::ErrReadAdc,
            Self::CloseAdc { .. } => DeviceStatus::ErrCloseAdc,
            Self::GpioPathEmpty => DeviceStatus::ErrGpioPathEmpty,
            Self::OpenGpio { .. } => DeviceStatus::ErrOpenGpio,
            Self::GpioGetLine { .. } => DeviceStatus::ErrGpioGetLine,
            Self::GpioRequestOutput { .. } => DeviceStatus::ErrGpioRequestOutput,
            Self::WriteGpio { .. } => DeviceStatus::ErrWriteGpio,
            Self::NotReady => DeviceStatus::ErrNotReady,
        }
    }
}

/// Devices of one kind that could not be acquired at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionFailures(pub Vec<(DeviceId, DeviceError)>);

impl fmt::Display for AcquisitionFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (id, err)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "device {id}: {err}")?;
        }
        Ok(())
    }
}

/// Top-level error for the core, the actors and the control endpoint.
#[derive(Debug, Error)]
pub enum CacError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Shared memory error
    #[error("Shared memory error: {0}")]
    Shm(#[from] ShmError),

    /// Handshake error
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// One device operation failed
    #[error("Device {id}: {source}")]
    Device {
        /// Device id
        id: DeviceId,
        /// Cause
        #[source]
        source: DeviceError,
    },

    /// Some devices of a kind could not be acquired
    #[error("{kind} acquisition failed: {failures}")]
    Acquisition {
        /// Device class
        kind: ComponentKind,
        /// Every failed device with its cause
        failures: AcquisitionFailures,
    },

    /// Id not present in the board table
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// Id present but of the other kind
    #[error("Device {id} is not a {expected}")]
    WrongKind {
        /// Device id
        id: DeviceId,
        /// Kind the operation needs
        expected: ComponentKind,
    },

    /// Backend not registered
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Core or actor could not start
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Operation requires an initialised core
    #[error("Core is not running")]
    NotRunning,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
