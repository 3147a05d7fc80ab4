//! Command sets by ASIC family.
//!
//! A command set registers only its factory. The registry asks the built
//! command set which family it drives, and a model descriptor's `asic`
//! field is then enough to pick one at attach time.

use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::model::ModelDescriptor;
use std::collections::BTreeMap;
use tracing::debug;

use crate::command_set::{CommandSet, CommandSetFactory};
use crate::drivers::register_all_command_sets;

/// Command set factories keyed by the ASIC family they drive.
#[derive(Default)]
pub struct DriverRegistry {
    families: BTreeMap<&'static str, CommandSetFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in command set.
    ///
    /// # Errors
    /// `UnsupportedConfiguration` if two built-in command sets claim the
    /// same family.
    pub fn with_builtin() -> ScanResult<Self> {
        let mut registry = Self::new();
        register_all_command_sets(&mut registry)?;
        Ok(registry)
    }

    /// Register `factory` under the family its command set reports.
    ///
    /// Returns that family name.
    ///
    /// # Errors
    /// `UnsupportedConfiguration` if the family already has a command set.
    pub fn register(&mut self, factory: CommandSetFactory) -> ScanResult<&'static str> {
        let family = factory().name();
        if self.families.contains_key(family) {
            return Err(ScanError::UnsupportedConfiguration(format!(
                "ASIC family '{family}' already has a command set"
            )));
        }
        self.families.insert(family, factory);
        debug!("registered {} command set", family);
        Ok(family)
    }

    /// Whether a command set drives the ASIC of `model`.
    pub fn supports(&self, model: &ModelDescriptor) -> bool {
        self.families.contains_key(model.asic)
    }

    /// Build the command set for `model`.
    ///
    /// # Errors
    /// `UnsupportedConfiguration` if no command set drives its ASIC.
    pub fn for_model(&self, model: &ModelDescriptor) -> ScanResult<Box<dyn CommandSet>> {
        let factory = self.families.get(model.asic).ok_or_else(|| {
            ScanError::UnsupportedConfiguration(format!(
                "{} {} uses ASIC '{}', which has no command set",
                model.vendor, model.name, model.asic
            ))
        })?;
        Ok(factory())
    }

    /// Registered families, in name order.
    pub fn families(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.families.keys().copied()
    }
}
