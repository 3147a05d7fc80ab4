//! GL846 register map.
//!
//! Multi-byte registers are little-endian: the lowest address holds the
//! least significant byte.

#![allow(missing_docs)]

use bitflags::bitflags;
use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::registers::RegisterSet;

// ─── Ports ──────────────────────────────────────────────────────────

/// Bulk port accepting `address, value` register pairs.
pub const REGISTER_PORT: u8 = 0x83;

/// Bulk port delivering scanned data.
pub const DATA_PORT: u8 = 0x45;

// ─── Control registers ──────────────────────────────────────────────

/// Chip version, readable when CHKVER is set.
pub const REG_0X00: u8 = 0x00;

pub const REG_0X01: u8 = 0x01;
pub const REG_0X01_CISSET: u8 = 0x80;
pub const REG_0X01_DVDSET: u8 = 0x20;
pub const REG_0X01_STAGGER: u8 = 0x10;
pub const REG_0X01_SHDAREA: u8 = 0x02;
pub const REG_0X01_SCAN: u8 = 0x01;

pub const REG_0X02: u8 = 0x02;
pub const REG_0X02_NOTHOME: u8 = 0x80;
pub const REG_0X02_ACDCDIS: u8 = 0x40;
pub const REG_0X02_AGOHOME: u8 = 0x20;
pub const REG_0X02_MTRPWR: u8 = 0x10;
pub const REG_0X02_FASTFED: u8 = 0x08;
pub const REG_0X02_MTRREV: u8 = 0x04;

pub const REG_0X03: u8 = 0x03;
pub const REG_0X03_LAMPPWR: u8 = 0x10;

pub const REG_0X04: u8 = 0x04;
pub const REG_0X04_LINEART: u8 = 0x80;
pub const REG_0X04_BITSET: u8 = 0x40;
pub const REG_0X04_AFEMOD: u8 = 0x30;
pub const REG_0X04_AFEMOD_COLOR: u8 = 0x10;
pub const REG_0X04_AFEMOD_MONO: u8 = 0x20;
pub const REG_0X04_FILTER: u8 = 0x0c;
pub const REG_0X04_FESET: u8 = 0x03;
/// FESET value of the Wolfson frontend layout.
pub const FESET_WOLFSON: u8 = 0x02;

pub const REG_0X05: u8 = 0x05;
pub const REG_0X05_DPIHW: u8 = 0xc0;
pub const REG_0X05_DPIHW_600: u8 = 0x00;
pub const REG_0X05_DPIHW_1200: u8 = 0x40;
pub const REG_0X05_DPIHW_2400: u8 = 0x80;
pub const REG_0X05_DPIHW_4800: u8 = 0xc0;
pub const REG_0X05_GMMENB: u8 = 0x08;

pub const REG_0X06: u8 = 0x06;
pub const REG_0X06_PWRBIT: u8 = 0x10;

pub const REG_0X0B: u8 = 0x0b;
pub const REG_0X0B_ENBDRAM: u8 = 0x08;

pub const REG_0X0C: u8 = 0x0c;
pub const REG_0X0C_CCDLMT: u8 = 0x0f;

pub const REG_0X0D: u8 = 0x0d;
pub const REG_0X0D_CLRMCNT: u8 = 0x04;
pub const REG_0X0D_CLRLNCNT: u8 = 0x01;

/// Writing any value resets the ASIC.
pub const REG_0X0E: u8 = 0x0e;
/// Writing 1 starts the motor (and the scan when SCAN is set).
pub const REG_0X0F: u8 = 0x0f;

pub const REG_EXPR: u8 = 0x10;
pub const REG_EXPG: u8 = 0x12;
pub const REG_EXPB: u8 = 0x14;

pub const REG_0X1C: u8 = 0x1c;
pub const REG_0X1C_TGTIME: u8 = 0x07;

pub const REG_STEPNO: u8 = 0x21;
pub const REG_FWDSTEP: u8 = 0x23;
pub const REG_LINCNT: u8 = 0x25;
pub const REG_BWDSTEP: u8 = 0x28;
pub const REG_FASTNO: u8 = 0x2a;
pub const REG_DPISET: u8 = 0x2c;
pub const REG_STRPIXEL: u8 = 0x30;
pub const REG_ENDPIXEL: u8 = 0x32;
pub const REG_DUMMY: u8 = 0x34;
pub const REG_MAXWD: u8 = 0x35;
pub const REG_LPERIOD: u8 = 0x38;
pub const REG_FEEDL: u8 = 0x3d;

// ─── Frontend serial port ───────────────────────────────────────────

pub const REG_FE_DATA_HI: u8 = 0x3a;
/// Writing the low byte commits the frontend write.
pub const REG_FE_DATA_LO: u8 = 0x3b;
pub const REG_FE_ADDRESS: u8 = 0x51;

pub const FE_CONFIG_BASE: u8 = 0x00;
pub const FE_OFFSET_BASE: u8 = 0x20;
pub const FE_GAIN_BASE: u8 = 0x28;

// ─── Status ─────────────────────────────────────────────────────────

pub const REG_0X40: u8 = 0x40;
pub const REG_0X41: u8 = 0x41;
/// Bytes waiting in the data buffer (24 bits).
pub const REG_VALIDWORD: u8 = 0x42;

bitflags! {
    /// Combined view of status registers 0x40 (low byte) and 0x41 (high byte).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u16 {
        /// Data path active.
        const DATAENB  = 0x0001;
        /// Motor moving.
        const MOTMFLG  = 0x0002;
        /// Chip version readable.
        const CHKVER   = 0x0010;
        /// Motor enabled.
        const MOTORENB = 0x0100;
        /// Head on the home sensor.
        const HOMESNR  = 0x0800;
        /// Scan finished.
        const SCANFSH  = 0x1000;
        /// Feed finished.
        const FEEDFSH  = 0x2000;
        /// Data buffer empty.
        const BUFEMPTY = 0x4000;
    }
}

impl Status {
    /// Assemble from the two status register values.
    pub fn from_regs(reg40: u8, reg41: u8) -> Self {
        Self::from_bits_truncate(reg40 as u16 | (reg41 as u16) << 8)
    }

    /// Whether the motor or the data path is still running.
    pub fn is_busy(self) -> bool {
        self.intersects(Status::DATAENB | Status::MOTMFLG | Status::MOTORENB)
    }
}

// ─── Motor ──────────────────────────────────────────────────────────

/// Low bits of 0x5e: deceleration steps after a fast feed.
pub const REG_0X5E: u8 = 0x5e;
pub const REG_0X5E_DECSEL: u8 = 0x1f;
pub const REG_FEDCNT: u8 = 0x5f;
pub const REG_Z1MOD: u8 = 0x60;
pub const REG_Z2MOD: u8 = 0x63;
/// Bit position of the step type inside Z1MOD / Z2MOD.
pub const ZMOD_STEP_SHIFT: u32 = 21;
pub const REG_FSHDEC: u8 = 0x69;
pub const REG_FMOVNO: u8 = 0x6b;
pub const REG_FMOVDEC: u8 = 0x6d;

pub const REG_0X9D: u8 = 0x9d;
pub const REG_0X9D_STEPTIM: u8 = 0x0c;

/// Registers holding the shading bank number of each channel.
pub const REG_SHADING_BANKS: [u8; 3] = [0xd0, 0xd1, 0xd2];

/// Slope table slots in ASIC memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SlopeSlot {
    /// Scan acceleration.
    Scan = 0,
    /// Backtracking.
    Backtrack = 1,
    /// Deceleration at the end of a scan.
    Stop = 2,
    /// Fast feed.
    Fast = 3,
    /// Return to home.
    Home = 4,
}

/// Power-on register image of the family.
pub const DEFAULT_REGISTERS: &[(u8, u8)] = &[
    (0x01, 0x60),
    (0x02, 0x38),
    (0x03, 0x03),
    (0x04, 0x12),
    (0x05, 0x80),
    (0x06, 0x50),
    (0x08, 0x10),
    (0x09, 0x00),
    (0x0a, 0x00),
    (0x0b, 0x8b),
    (0x0c, 0x00),
    (0x0d, 0x00),
    (0x10, 0x00),
    (0x11, 0x00),
    (0x12, 0x00),
    (0x13, 0x00),
    (0x14, 0x00),
    (0x15, 0x00),
    (0x16, 0x08),
    (0x17, 0x50),
    (0x18, 0x00),
    (0x19, 0x2a),
    (0x1a, 0x00),
    (0x1b, 0x00),
    (0x1c, 0x01),
    (0x1d, 0x04),
    (0x1e, 0x10),
    (0x1f, 0x04),
    (0x20, 0x02),
    (0x21, 0x10),
    (0x22, 0x00),
    (0x23, 0x7f),
    (0x24, 0x00),
    (0x25, 0x00),
    (0x26, 0x00),
    (0x27, 0x00),
    (0x28, 0x7f),
    (0x29, 0x00),
    (0x2a, 0x10),
    (0x2b, 0x00),
    (0x2c, 0x02),
    (0x2d, 0x58),
    (0x2e, 0x80),
    (0x2f, 0x80),
    (0x30, 0x00),
    (0x31, 0x00),
    (0x32, 0x00),
    (0x33, 0x00),
    (0x34, 0x1f),
    (0x35, 0x00),
    (0x36, 0x00),
    (0x37, 0x00),
    (0x38, 0xf8),
    (0x39, 0x2a),
    (0x3d, 0x00),
    (0x3e, 0x00),
    (0x3f, 0x00),
    (0x52, 0x02),
    (0x53, 0x04),
    (0x54, 0x06),
    (0x55, 0x08),
    (0x56, 0x0a),
    (0x57, 0x00),
    (0x58, 0x59),
    (0x59, 0x31),
    (0x5a, 0x40),
    (0x5e, 0x1f),
    (0x5f, 0x01),
    (0x60, 0x00),
    (0x61, 0x00),
    (0x62, 0x00),
    (0x63, 0x00),
    (0x64, 0x00),
    (0x65, 0x00),
    (0x67, 0x7f),
    (0x68, 0x7f),
    (0x69, 0x01),
    (0x6a, 0x00),
    (0x6b, 0x01),
    (0x6c, 0x00),
    (0x6d, 0x01),
    (0x6e, 0x00),
    (0x70, 0x01),
    (0x71, 0x00),
    (0x72, 0x02),
    (0x73, 0x01),
    (0x74, 0x00),
    (0x75, 0x00),
    (0x76, 0x00),
    (0x7d, 0x00),
    (0x87, 0x02),
    (0x9d, 0x04),
    (0xa2, 0x0f),
    (0xbd, 0x18),
    (0xfe, 0x08),
    (0xd0, 0x0a),
    (0xd1, 0x15),
    (0xd2, 0x20),
];

/// DPIHW field for hardware resolution `hw_dpi`.
///
/// # Errors
/// `UnsupportedConfiguration` for resolutions the sensor clock cannot produce.
pub fn dpihw_bits(hw_dpi: u32) -> ScanResult<u8> {
    match hw_dpi {
        600 => Ok(REG_0X05_DPIHW_600),
        1200 => Ok(REG_0X05_DPIHW_1200),
        2400 => Ok(REG_0X05_DPIHW_2400),
        4800 => Ok(REG_0X05_DPIHW_4800),
        other => Err(ScanError::UnsupportedConfiguration(format!(
            "no DPIHW setting for {other} dpi"
        ))),
    }
}

/// Hardware resolution selected by a DPIHW field.
pub fn hw_dpi_from_bits(bits: u8) -> u32 {
    match bits & REG_0X05_DPIHW {
        REG_0X05_DPIHW_600 => 600,
        REG_0X05_DPIHW_1200 => 1200,
        REG_0X05_DPIHW_2400 => 2400,
        _ => 4800,
    }
}

/// Slope table entries per step selected by STEPTIM.
pub fn step_multiplier(regs: &RegisterSet) -> u32 {
    if !regs.has(REG_0X9D) {
        return 2;
    }
    match regs.get8(REG_0X9D) & REG_0X9D_STEPTIM {
        0x00 => 1,
        0x04 => 2,
        0x08 => 4,
        _ => 2,
    }
}

/// Load the power-on image into `regs`.
pub fn load_defaults(regs: &mut RegisterSet) {
    for (address, value) in DEFAULT_REGISTERS {
        regs.init_reg(*address, *value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_unique() {
        let mut seen = std::collections::BTreeSet::new();
        for (address, _) in DEFAULT_REGISTERS {
            assert!(seen.insert(*address), "0x{address:02x} listed twice");
        }
    }

    #[test]
    fn test_defaults_select_wolfson_frontend() {
        let mut regs = RegisterSet::new();
        load_defaults(&mut regs);
        assert_eq!(regs.get8(REG_0X04) & REG_0X04_FESET, FESET_WOLFSON);
        assert_eq!(step_multiplier(&regs), 2);
    }

    #[test]
    fn test_dpihw_roundtrip() {
        for dpi in [600, 1200, 2400, 4800] {
            assert_eq!(hw_dpi_from_bits(dpihw_bits(dpi).unwrap()), dpi);
        }
        assert!(dpihw_bits(300).is_err());
    }

    #[test]
    fn test_status_assembly() {
        let status = Status::from_regs(0x03, 0x08);
        assert!(status.contains(Status::DATAENB | Status::MOTMFLG | Status::HOMESNR));
        assert!(status.is_busy());
        assert!(!Status::from_regs(0x00, 0x08).is_busy());
    }

    #[test]
    fn test_step_multiplier_follows_steptim() {
        let mut regs = RegisterSet::new();
        regs.set8(REG_0X9D, 0x00);
        assert_eq!(step_multiplier(&regs), 1);
        regs.set8(REG_0X9D, 0x08);
        assert_eq!(step_multiplier(&regs), 4);
    }
}
