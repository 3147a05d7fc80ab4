//! # Scanner HAL Library
//!
//! Register-driven backend for flatbed scanner ASICs with pluggable command
//! sets.
//!
//! The HAL turns a scan request into a session layout, programs the ASIC
//! registers and motor slope tables for it, drives the head, runs the
//! calibration sequences and reads the image data back. Hardware access
//! goes through the `ScannerTransport` trait from `scan_common`.
//!
//! # Module Structure
//!
//! - [`core`] - ScannerCore, attach and compound operations
//! - [`driver_registry`] - Command set factory registration
//! - [`drivers`] - ASIC command set implementations
//! - [`command_set`] - The per-ASIC command set trait
//! - [`device`] - The device aggregate
//! - [`session`] - Scan session compiler
//! - [`slope`] - Motor acceleration tables
//! - [`calibration`] - Calibration statistics and shading tables
//! - [`calibration_cache`] - Persisted calibration results
//! - [`profiles`] - Built-in model, sensor and motor tables
//! - [`simulation`] - Simulated scanner transport
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      scan_hal (single crate)                     │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │ Calibration │◄──►│ ScannerCore  │◄──►│  Driver Registry    │  │
//! │  │   cache     │    │              │    │                     │  │
//! │  └─────────────┘    └──────┬───────┘    └─────────────────────┘  │
//! │                            │                                     │
//! │                            ▼                                     │
//! │                   ┌────────────────┐      ┌──────────────────┐   │
//! │                   │  CommandSet    │─────►│ Device           │   │
//! │                   │  trait object  │      │ (transport, regs)│   │
//! │                   └────────────────┘      └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod calibration;
pub mod calibration_cache;
pub mod command_set;
pub mod core;
pub mod device;
pub mod driver_registry;
pub mod drivers;
pub mod profiles;
pub mod session;
pub mod simulation;
pub mod slope;

// Re-export key types for convenience
pub use crate::core::ScannerCore;
pub use crate::driver_registry::DriverRegistry;
pub use crate::simulation::SimulatedScanner;
