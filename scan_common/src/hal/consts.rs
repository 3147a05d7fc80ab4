//! Scanner HAL constants.
//!
//! Polling bounds, ASIC memory layout and calibration targets shared by the
//! command sets, the simulator and the tests.

use static_assertions::const_assert;
use std::time::Duration;

/// Canonical service name (used for logging).
pub const SCAN_SERVICE_NAME: &str = "scan_hal";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/scan_hal/scanner.toml";

/// Default calibration cache file name.
pub const DEFAULT_CALIBRATION_CACHE_FILE: &str = "scan_calibration.bin";

// ─── Polling ────────────────────────────────────────────────────────

/// Default sleep between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default sleep between two "valid words" polls while waiting for data.
pub const DEFAULT_DATA_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Status polls while waiting for the motor and data path to stop.
pub const STOP_POLL_COUNT: u32 = 10;

/// Status polls while waiting for the home sensor.
pub const HOME_POLL_COUNT: u32 = 300;

/// Status polls while waiting for a feed to finish.
pub const FEED_POLL_COUNT: u32 = 300;

/// Polls while waiting for scanned data to become available.
pub const DATA_POLL_COUNT: u32 = 1000;

// ─── ASIC memory ────────────────────────────────────────────────────

/// Number of 16-bit entries of one slope table in ASIC memory.
pub const SLOPE_TABLE_SIZE: usize = 1024;

/// Base address of the slope tables on the ASIC memory bus.
pub const SLOPE_TABLE_BASE: u32 = 0x1000_0000;

/// Distance between two slope tables in ASIC memory.
pub const SLOPE_TABLE_STRIDE: u32 = 0x4000;

/// Base address of the shading banks on the ASIC memory bus.
pub const SHADING_BASE: u32 = 0x1000_0000;

/// Distance between two shading banks (bank numbers come from registers).
pub const SHADING_BANK_STRIDE: u32 = 0x2000;

/// Bytes per pixel per channel in a shading table: dark level + coefficient.
pub const SHADING_BYTES_PER_PIXEL: usize = 4;

const_assert!(SLOPE_TABLE_SIZE * 2 <= SLOPE_TABLE_STRIDE as usize);

// ─── Calibration ────────────────────────────────────────────────────

/// Pass budget of the offset binary search.
pub const OFFSET_MAX_PASSES: u32 = 32;

/// Target black level of the offset search on the 16-bit scale.
pub const OFFSET_TARGET: u16 = 0x0400;

/// Iteration budget of the LED exposure loop.
pub const LED_MAX_ITERATIONS: u32 = 100;

/// Lower edge of the accepted LED brightness band (16-bit scale).
pub const LED_BAND_LOW: u32 = 28_000;

/// Upper edge of the accepted LED brightness band (16-bit scale).
pub const LED_BAND_HIGH: u32 = 32_000;

/// Centre of the LED brightness band.
pub const LED_BAND_CENTER: u32 = 30_000;

const_assert!(LED_BAND_LOW < LED_BAND_CENTER && LED_BAND_CENTER < LED_BAND_HIGH);

/// Lines averaged by the coarse gain pass.
pub const COARSE_GAIN_LINES: u32 = 10;

/// Pass budget of the strip search.
pub const STRIP_SEARCH_MAX_PASSES: u32 = 20;

/// 8-bit level above which a pixel is not black.
pub const STRIP_BLACK_THRESHOLD: u8 = 90;

/// 8-bit level below which a pixel is not white.
pub const STRIP_WHITE_THRESHOLD: u8 = 60;

/// Percentage of off-colour pixels from which a line is rejected.
pub const STRIP_MAX_WRONG_PERCENT: usize = 3;

/// Shading coefficient unity.
pub const SHADING_COEFFICIENT_UNIT: u32 = 0x2000;

/// White level the shading correction aims at.
pub const SHADING_TARGET: u32 = 0xdc00;

/// Default calibration cache lifetime.
pub const DEFAULT_CALIBRATION_EXPIRATION_MINUTES: u32 = 60;
