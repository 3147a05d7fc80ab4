//! Scanner hardware abstraction types.
//!
//! Everything the session compiler, the ASIC command sets and the
//! simulator share lives here, so that no module in `scan_hal` has to
//! depend on another command set's internals.

pub mod config;
pub mod consts;
pub mod error;
pub mod model;
pub mod registers;
pub mod transport;
pub mod types;
