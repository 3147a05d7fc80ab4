//! ASIC command set implementations.
//!
//! - [`gl846`] - GL846 family (CIS and CCD flatbeds)
//!
//! # Adding a Command Set
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `CommandSet` trait from `crate::command_set`, naming
//!    the family the way model descriptors spell their `asic`
//! 3. Register its factory in [`register_all_command_sets`]

pub mod gl846;

use scan_common::hal::error::ScanResult;

use crate::driver_registry::DriverRegistry;

/// Register every built-in command set.
///
/// # Errors
/// `UnsupportedConfiguration` if two command sets drive the same family.
pub fn register_all_command_sets(registry: &mut DriverRegistry) -> ScanResult<()> {
    registry.register(gl846::create_command_set)?;
    Ok(())
}
