//! In-memory register set.
//!
//! A [`RegisterSet`] maps 8-bit addresses to 8-bit values. Wider registers
//! occupy consecutive addresses, least significant byte first. The device
//! keeps two sets: the working set the programmer fills, and a mirror of the
//! values last written to hardware. [`RegisterSet::diff`] yields only the
//! entries that differ from the mirror so a bulk write carries the minimum.

use crate::hal::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered register file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSet {
    regs: BTreeMap<u8, u8>,
}

impl RegisterSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a register with its reset value.
    pub fn init_reg(&mut self, address: u8, value: u8) {
        self.regs.insert(address, value);
    }

    /// Whether `address` is part of the set.
    pub fn has(&self, address: u8) -> bool {
        self.regs.contains_key(&address)
    }

    /// Number of registers in the set.
    pub fn len(&self) -> usize {
        self.regs.len()
    }

    /// Whether the set holds no register.
    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Read an 8-bit register.
    ///
    /// # Panics
    /// Panics if `address` was never initialised.
    pub fn get8(&self, address: u8) -> u8 {
        match self.regs.get(&address) {
            Some(value) => *value,
            None => panic!("register 0x{address:02x} is not part of the register set"),
        }
    }

    /// Write an 8-bit register.
    pub fn set8(&mut self, address: u8, value: u8) {
        self.regs.insert(address, value);
    }

    /// Set the bits of `mask`.
    pub fn set_bits(&mut self, address: u8, mask: u8) {
        let value = self.get8(address) | mask;
        self.set8(address, value);
    }

    /// Clear the bits of `mask`.
    pub fn clear_bits(&mut self, address: u8, mask: u8) {
        let value = self.get8(address) & !mask;
        self.set8(address, value);
    }

    /// Replace the bits of `mask` with the corresponding bits of `value`.
    pub fn set_masked(&mut self, address: u8, mask: u8, value: u8) {
        let current = self.get8(address) & !mask;
        self.set8(address, current | (value & mask));
    }

    /// Whether every bit of `mask` is set.
    pub fn is_set(&self, address: u8, mask: u8) -> bool {
        self.get8(address) & mask == mask
    }

    /// Write a 16-bit register spanning `address` and `address + 1`.
    ///
    /// # Errors
    /// `UnsupportedConfiguration` if `value` does not fit in 16 bits.
    pub fn set16(&mut self, address: u8, value: u32) -> ScanResult<()> {
        self.set_wide(address, 2, value)
    }

    /// Write a 24-bit register spanning `address..address + 3`.
    ///
    /// # Errors
    /// `UnsupportedConfiguration` if `value` does not fit in 24 bits.
    pub fn set24(&mut self, address: u8, value: u32) -> ScanResult<()> {
        self.set_wide(address, 3, value)
    }

    /// Read a 16-bit register.
    pub fn get16(&self, address: u8) -> u16 {
        self.get_wide(address, 2) as u16
    }

    /// Read a 24-bit register.
    pub fn get24(&self, address: u8) -> u32 {
        self.get_wide(address, 3)
    }

    fn set_wide(&mut self, address: u8, bytes: u8, value: u32) -> ScanResult<()> {
        let max = (1u64 << (8 * bytes as u32)) - 1;
        if value as u64 > max {
            return Err(ScanError::UnsupportedConfiguration(format!(
                "value {value:#x} does not fit the {}-bit register at 0x{address:02x}",
                8 * bytes as u32
            )));
        }
        if address as u16 + bytes as u16 - 1 > u8::MAX as u16 {
            return Err(ScanError::UnsupportedConfiguration(format!(
                "register 0x{address:02x} overflows the address space"
            )));
        }
        for i in 0..bytes {
            self.set8(address + i, (value >> (8 * i as u32)) as u8);
        }
        Ok(())
    }

    fn get_wide(&self, address: u8, bytes: u8) -> u32 {
        (0..bytes).fold(0u32, |acc, i| {
            acc | (self.get8(address.wrapping_add(i)) as u32) << (8 * i as u32)
        })
    }

    /// Iterate over `(address, value)` pairs in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.regs.iter().map(|(a, v)| (*a, *v))
    }

    /// Entries of `self` whose value differs from (or is absent in) `mirror`.
    pub fn diff(&self, mirror: &RegisterSet) -> Vec<(u8, u8)> {
        self.iter()
            .filter(|(address, value)| mirror.regs.get(address) != Some(value))
            .collect()
    }

    /// Record `pairs` as written.
    pub fn apply(&mut self, pairs: &[(u8, u8)]) {
        for (address, value) in pairs {
            self.set8(*address, *value);
        }
    }

    /// Serialise `pairs` as the `address, value, address, value, ...` stream
    /// accepted by the register bulk port.
    pub fn encode_pairs(pairs: &[(u8, u8)]) -> Vec<u8> {
        pairs.iter().flat_map(|(a, v)| [*a, *v]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bit_helpers() {
        let mut regs = RegisterSet::new();
        regs.init_reg(0x01, 0x20);
        regs.set_bits(0x01, 0x01);
        assert_eq!(regs.get8(0x01), 0x21);
        regs.clear_bits(0x01, 0x20);
        assert_eq!(regs.get8(0x01), 0x01);
        regs.set_masked(0x01, 0x0c, 0xff);
        assert_eq!(regs.get8(0x01), 0x0d);
        assert!(regs.is_set(0x01, 0x0c));
    }

    #[test]
    fn test_multi_byte_layout_is_little_endian() {
        let mut regs = RegisterSet::new();
        regs.set24(0x25, 0x012345).unwrap();
        assert_eq!(regs.get8(0x25), 0x45);
        assert_eq!(regs.get8(0x26), 0x23);
        assert_eq!(regs.get8(0x27), 0x01);
        assert_eq!(regs.get24(0x25), 0x012345);
    }

    #[test]
    fn test_width_overflow_rejected() {
        let mut regs = RegisterSet::new();
        assert!(matches!(
            regs.set16(0x10, 0x1_0000),
            Err(ScanError::UnsupportedConfiguration(_))
        ));
        assert!(matches!(
            regs.set24(0x60, 0x100_0000),
            Err(ScanError::UnsupportedConfiguration(_))
        ));
        assert!(regs.is_empty());
        assert!(regs.set16(0xff, 1).is_err());
    }

    #[test]
    #[should_panic(expected = "not part of the register set")]
    fn test_get_unknown_register_panics() {
        RegisterSet::new().get8(0x42);
    }

    #[test]
    fn test_diff_only_carries_changes() {
        let mut mirror = RegisterSet::new();
        mirror.init_reg(0x01, 0x00);
        mirror.init_reg(0x02, 0x10);

        let mut working = mirror.clone();
        assert!(working.diff(&mirror).is_empty());

        working.set8(0x02, 0x30);
        working.init_reg(0x03, 0x00);
        let dirty = working.diff(&mirror);
        assert_eq!(dirty, vec![(0x02, 0x30), (0x03, 0x00)]);
        assert_eq!(RegisterSet::encode_pairs(&dirty), vec![0x02, 0x30, 0x03, 0x00]);

        mirror.apply(&dirty);
        assert!(working.diff(&mirror).is_empty());
    }

    proptest! {
        #[test]
        fn prop_set24_accepts_exactly_24_bits(value in any::<u32>()) {
            let mut regs = RegisterSet::new();
            let result = regs.set24(0x60, value);
            if value <= 0xff_ffff {
                prop_assert!(result.is_ok());
                prop_assert_eq!(regs.get24(0x60), value);
            } else {
                prop_assert!(result.is_err());
            }
        }
    }
}
