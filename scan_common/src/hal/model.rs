//! Static scanner model descriptors.
//!
//! A model bundles the ASIC family, the sensor, the motor and the analog
//! frontend defaults. Descriptors are built once by the profile tables in
//! `scan_hal` and never mutated at runtime.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::hal::types::StepType;

bitflags! {
    /// Calibration capabilities of a model.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModelFlags: u16 {
        /// Run the frontend offset search.
        const OFFSET_CALIBRATION = 0x0001;
        /// Capture a dark reference with the lamp off.
        const DARK_CALIBRATION   = 0x0002;
        /// Tune LED exposure times (CIS sensors).
        const LED_CALIBRATION    = 0x0004;
        /// Locate the white strip before shading.
        const SEARCH_STRIP       = 0x0008;
        /// Return home after the shading capture.
        const SHADING_REPARK     = 0x0010;
    }
}

/// Sensor identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SensorId {
    /// Placeholder of an unresolved model. Never valid for a scan.
    #[default]
    Unknown,
    /// A4 contact image sensor with RGB LEDs.
    CisA4,
    /// A4 CCD with a cold cathode lamp.
    CcdA4,
}

/// Motor identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MotorId {
    /// Placeholder of an unresolved model.
    #[default]
    Unknown,
    /// Stepper of the CIS flatbed.
    CisA4,
    /// Stepper of the CCD flatbed.
    CcdA4,
}

/// Sensor timing for one hardware resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorProfile {
    /// Hardware resolution this profile applies to.
    pub dpihw: u32,
    /// Line period in pixel clocks.
    pub exposure_lperiod: u32,
    /// Segments read in parallel.
    pub segment_count: u32,
    /// Registers written on top of the family defaults.
    pub custom_regs: Vec<(u8, u8)>,
}

/// Sensor description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorConfig {
    /// Identity.
    pub sensor_id: SensorId,
    /// Native optical resolution.
    pub optical_res: u32,
    /// Sensor pixels per system pixel.
    pub ccd_pixels_per_system_pixel: u32,
    /// Masked pixels at the start of each line, at optical resolution.
    pub black_pixels: u32,
    /// Dummy pixels clocked before the window.
    pub dummy_pixel: u32,
    /// Offset of the first usable pixel, at optical resolution.
    pub ccd_start_xoffset: u32,
    /// Usable pixels across the glass, at optical resolution.
    pub sensor_pixels: u32,
    /// Reference white level used by the coarse gain pass (8-bit scale).
    pub gain_white_ref: u32,
    /// Default LED exposure per channel (CIS only).
    pub exposure: [u16; 3],
    /// Whether the sensor can halve its resolution in hardware.
    pub half_ccd_mode: bool,
    /// Lines between odd and even pixel rows, at motor base resolution.
    pub stagger_lines: u32,
    /// Per-profile timing.
    pub profiles: Vec<SensorProfile>,
}

/// Acceleration table of a motor at one exposure.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorProfile {
    /// Motor this profile belongs to.
    pub motor_id: MotorId,
    /// Exposure (line period) this profile was tuned for.
    pub exposure: u32,
    /// Microstepping used with this profile.
    pub step_type: StepType,
    /// Speed codes from standstill to full speed, at full step.
    pub table: &'static [u16],
}

/// Motor description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MotorConfig {
    /// Identity.
    pub motor_id: MotorId,
    /// Full-step resolution of the motor.
    pub base_ydpi: u32,
    /// Distance in base steps above which the ASIC fast-feeds to the start.
    pub fast_feed_threshold: u32,
    /// Motor profiles.
    pub profiles: Vec<MotorProfile>,
}

/// Analog frontend layout understood by a command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FrontendType {
    /// Wolfson-style AFE behind the ASIC serial port.
    #[default]
    Wolfson,
}

/// Analog frontend register image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Frontend {
    /// Frontend layout.
    pub fe_type: FrontendType,
    /// Configuration registers 0..=3.
    pub config: [u8; 4],
    /// Per-channel gain codes.
    pub gain: [u8; 3],
    /// Per-channel offset codes.
    pub offset: [u8; 3],
}

/// Static description of one scanner model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// Model name used for lookup.
    pub name: &'static str,
    /// Vendor name.
    pub vendor: &'static str,
    /// ASIC family selecting the command set.
    pub asic: &'static str,
    /// Contact image sensor (LED illumination, planar colour output).
    pub is_cis: bool,
    /// Supported horizontal resolutions, ascending.
    pub xdpi_values: Vec<u32>,
    /// Supported vertical resolutions, ascending.
    pub ydpi_values: Vec<u32>,
    /// Pixels between the sensor start and the document edge, at optical resolution.
    pub x_offset: u32,
    /// Distance from home to the document top, in motor base steps.
    pub y_offset: u32,
    /// Distance from home to the white calibration area, in motor base steps.
    pub y_offset_calib_white: u32,
    /// Per-channel line distance at motor base resolution.
    pub ld_shift: [u32; 3],
    /// Lines captured by shading and strip search scans.
    pub shading_lines: u32,
    /// Maximum head travel in motor base steps.
    pub max_travel_steps: u32,
    /// Calibration capabilities.
    pub flags: ModelFlags,
    /// Sensor.
    pub sensor: SensorConfig,
    /// Motor.
    pub motor: MotorConfig,
    /// Frontend power-on values.
    pub frontend: Frontend,
}

impl ModelDescriptor {
    /// Lowest supported horizontal resolution.
    pub fn lowest_xdpi(&self) -> u32 {
        self.xdpi_values.first().copied().unwrap_or(self.sensor.optical_res)
    }

    /// Lowest supported vertical resolution.
    pub fn lowest_ydpi(&self) -> u32 {
        self.ydpi_values.first().copied().unwrap_or(self.motor.base_ydpi)
    }

    /// Highest resolution the sensor delivers per system pixel.
    pub fn system_optical_res(&self) -> u32 {
        self.sensor.optical_res / self.sensor.ccd_pixels_per_system_pixel.max(1)
    }

    /// Whether `xres` is a supported horizontal resolution.
    pub fn supports_xdpi(&self, xres: u32) -> bool {
        self.xdpi_values.contains(&xres)
    }
}
