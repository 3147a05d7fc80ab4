//! Scanner Common Library
//!
//! Shared building blocks for the scanner HAL workspace: configuration
//! loading, the register mirror, scan request/session types, model
//! descriptors and the transport capability the HAL drives hardware through.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`hal`] - Scanner types, registers, errors and constants
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use scan_common::prelude::*;
//!
//! let mut regs = RegisterSet::new();
//! regs.init_reg(0x01, 0x00);
//! regs.set_bits(0x01, 0x01);
//! assert_eq!(regs.get8(0x01), 0x01);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod hal;
pub mod prelude;
