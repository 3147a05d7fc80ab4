//! Scanner error types.
//!
//! `ScanError` is the single error type returned by every fallible HAL
//! operation. Programming errors (an uncomputed session, reading a register
//! that was never initialised) panic instead.

use thiserror::Error;

/// Operation that failed on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    /// Single register read.
    ReadRegister,
    /// Single register write.
    WriteRegister,
    /// Bulk read from a port.
    BulkRead,
    /// Bulk write to a port.
    BulkWrite,
    /// Write to the ASIC memory bus.
    MemoryWrite,
}

impl std::fmt::Display for TransportOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportOp::ReadRegister => "read_register",
            TransportOp::WriteRegister => "write_register",
            TransportOp::BulkRead => "bulk_read",
            TransportOp::BulkWrite => "bulk_write",
            TransportOp::MemoryWrite => "raw_memory_write",
        };
        f.write_str(name)
    }
}

/// I/O with the device failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op} at 0x{address:x} failed: {message}")]
pub struct TransportError {
    /// Failed operation.
    pub op: TransportOp,
    /// Register, port or memory address involved.
    pub address: u32,
    /// Transport specific description.
    pub message: String,
}

impl TransportError {
    /// Build a transport error.
    pub fn new(op: TransportOp, address: u32, message: impl Into<String>) -> Self {
        Self {
            op,
            address,
            message: message.into(),
        }
    }
}

/// Error kinds surfaced by the scanner HAL.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    /// Device I/O failed. Never retried.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A bounded status polling loop ran out of iterations.
    #[error("Hardware timeout: {0}")]
    HardwareTimeout(String),

    /// No sensor, motor or model profile matches the request.
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// The hardware or the request uses a configuration this driver cannot program.
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// The strip search exhausted its pass budget.
    #[error("Calibration target not found: {0}")]
    CalibrationTargetNotFound(String),

    /// Scan parameters rejected before any hardware access.
    #[error("Invalid scan parameters: {0}")]
    InvalidParameters(String),

    /// Calibration cache could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<crate::config::ConfigError> for ScanError {
    fn from(e: crate::config::ConfigError) -> Self {
        ScanError::Config(e.to_string())
    }
}

/// Result alias used across the HAL.
pub type ScanResult<T> = Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::new(TransportOp::BulkRead, 0x45, "pipe stalled");
        assert_eq!(err.to_string(), "bulk_read at 0x45 failed: pipe stalled");

        let scan: ScanError = err.into();
        assert!(matches!(scan, ScanError::Transport(_)));
        assert!(scan.to_string().contains("pipe stalled"));
    }

    #[test]
    fn test_config_error_conversion() {
        let missing = std::path::PathBuf::from("scanner.toml");
        let err: ScanError = crate::config::ConfigError::FileNotFound(missing).into();
        assert!(matches!(err, ScanError::Config(_)));
        assert!(err.to_string().contains("scanner.toml"));
    }
}
