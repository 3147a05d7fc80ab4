//! Prelude module for common re-exports.
//!
//! ```rust
//! use scan_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::hal::config::{CalibrationConfig, ScannerConfig, TimingConfig};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::hal::error::{ScanError, ScanResult, TransportError, TransportOp};

// ─── Hardware access ────────────────────────────────────────────────
pub use crate::hal::registers::RegisterSet;
pub use crate::hal::transport::{CollectingSink, ScanSink, ScannerTransport};

// ─── Scan types ─────────────────────────────────────────────────────
pub use crate::hal::model::{
    Frontend, FrontendType, ModelDescriptor, ModelFlags, MotorConfig, MotorId, MotorProfile,
    SensorConfig, SensorId, SensorProfile,
};
pub use crate::hal::types::{
    ColorFilter, Direction, MotionState, ScanFlags, ScanMode, ScanParams, ScanSession, StepType,
    StripColor,
};
