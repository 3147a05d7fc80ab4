//! Scan request and session types.
//!
//! [`ScanParams`] is what a caller asks for; [`ScanSession`] is what the
//! session compiler derives from it. Every register programming function
//! takes a session and refuses to run on one that was not computed.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::hal::error::{ScanError, ScanResult};

bitflags! {
    /// Per-scan behaviour switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ScanFlags: u16 {
        /// Do not apply shading correction.
        const DISABLE_SHADING          = 0x0001;
        /// Do not apply the gamma table.
        const DISABLE_GAMMA            = 0x0002;
        /// Scan a single line without moving the head.
        const SINGLE_LINE              = 0x0004;
        /// Move only, no image capture.
        const FEEDING                  = 0x0008;
        /// Ignore inter-channel line distance and stagger.
        const IGNORE_LINE_DISTANCE     = 0x0010;
        /// Keep the lamp off (dark capture).
        const DISABLE_LAMP             = 0x0020;
        /// Move the head backwards while scanning.
        const REVERSE                  = 0x0040;
        /// Do not move the motor when the ASIC buffer runs full.
        const DISABLE_BUFFER_FULL_MOVE = 0x0080;
    }
}

/// Colour mode of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Black and white. Scanned as 8-bit gray, thresholded downstream.
    Lineart,
    /// Single channel gray.
    Gray,
    /// Three channel colour.
    #[default]
    Color,
}

/// Channel routed to the output of a single-channel scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFilter {
    /// Red channel.
    Red,
    /// Green channel.
    #[default]
    Green,
    /// Blue channel.
    Blue,
}

/// Motor microstepping mode.
///
/// The discriminant is the shift applied to step counts and speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StepType {
    /// Full step.
    Full = 0,
    /// Half step.
    Half = 1,
    /// Quarter step.
    Quarter = 2,
    /// Eighth step.
    Eighth = 3,
}

impl StepType {
    /// Shift applied to distances and speeds.
    pub fn shift(self) -> u32 {
        self as u32
    }

    /// Decode the 3-bit field stored in the Z-mod registers.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(StepType::Full),
            1 => Some(StepType::Half),
            2 => Some(StepType::Quarter),
            3 => Some(StepType::Eighth),
            _ => None,
        }
    }
}

/// Head travel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Away from home.
    Forward,
    /// Towards home.
    Backward,
}

/// Colour of a calibration strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StripColor {
    /// Uniform black strip.
    Black,
    /// Uniform white strip.
    White,
}

/// Motion controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MotionState {
    /// No motion requested since attach.
    #[default]
    Idle,
    /// The motor has been started.
    Moving,
    /// The home sensor confirmed arrival.
    HomeReached,
    /// A polling bound was exceeded.
    Timeout,
    /// The motor was stopped on request.
    StoppedExplicit,
}

/// A scan request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    /// Horizontal resolution (dpi).
    pub xres: u32,
    /// Vertical resolution (dpi).
    pub yres: u32,
    /// First pixel, in optical resolution pixels.
    pub startx: u32,
    /// Lines to move before capture starts, in motor base steps.
    pub starty: u32,
    /// Pixels per line at `xres`.
    pub pixels: u32,
    /// Lines at `yres`.
    pub lines: u32,
    /// Bits per sample (8 or 16).
    pub depth: u32,
    /// Samples per pixel (1 or 3).
    pub channels: u32,
    /// Colour mode.
    pub scan_mode: ScanMode,
    /// Channel extracted by single-channel scans.
    pub color_filter: ColorFilter,
    /// Behaviour switches.
    pub flags: ScanFlags,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            xres: 300,
            yres: 300,
            startx: 0,
            starty: 0,
            pixels: 0,
            lines: 0,
            depth: 8,
            channels: 3,
            scan_mode: ScanMode::Color,
            color_filter: ColorFilter::Green,
            flags: ScanFlags::empty(),
        }
    }
}

impl ScanParams {
    /// Reject requests no command set can program.
    pub fn validate(&self) -> ScanResult<()> {
        if self.xres == 0 || self.yres == 0 {
            return Err(ScanError::InvalidParameters(format!(
                "resolution {}x{} must be non-zero",
                self.xres, self.yres
            )));
        }
        if self.pixels == 0 || self.lines == 0 {
            return Err(ScanError::InvalidParameters(format!(
                "geometry {}x{} must be non-zero",
                self.pixels, self.lines
            )));
        }
        if self.depth != 8 && self.depth != 16 {
            return Err(ScanError::InvalidParameters(format!(
                "depth {} is not 8 or 16",
                self.depth
            )));
        }
        match (self.scan_mode, self.channels) {
            (ScanMode::Color, 3) | (ScanMode::Gray, 1) | (ScanMode::Lineart, 1) => Ok(()),
            (mode, channels) => Err(ScanError::InvalidParameters(format!(
                "{channels} channels do not match scan mode {mode:?}"
            ))),
        }
    }

    /// Bytes per sample.
    pub fn bytes_per_sample(&self) -> u32 {
        self.depth / 8
    }
}

/// Derived scan layout shared by the register programmer, the data reader
/// and the image sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    /// Request this session was derived from.
    pub params: Option<ScanParams>,
    /// Set by the session compiler once every field is filled.
    pub computed: bool,

    /// 2 when the sensor runs in half-CCD mode.
    pub ccd_size_divisor: u32,
    /// Optical resolution after the half-CCD divisor.
    pub optical_resolution: u32,
    /// Hardware resolution programmed into DPIHW.
    pub hw_dpi: u32,
    /// Optical resolution divided by the hardware resolution.
    pub hwdpi_divisor: u32,
    /// Value programmed into DPISET.
    pub dpiset: u32,

    /// Pixels read from the sensor, at optical resolution.
    pub optical_pixels: u32,

    /// Resolution of the delivered data.
    pub output_resolution: u32,
    /// Pixels per delivered line.
    pub output_pixels: u32,
    /// Bytes of one channel of one line.
    pub output_channel_bytes: u32,
    /// Bytes of one line.
    pub output_line_bytes: u32,
    /// Bytes of one line as produced by the ASIC.
    pub output_line_bytes_raw: u32,
    /// Lines produced by the ASIC, including shift and stagger lines.
    pub output_line_count: u32,
    /// Bytes of the whole raw scan.
    pub output_total_bytes_raw: u32,
    /// Read chunk size.
    pub buffer_size_read: u32,

    /// Lines of stagger between odd and even sensor pixels.
    pub num_staggered_lines: u32,
    /// Per-channel colour shift lines.
    pub color_shift_lines: [u32; 3],
    /// Largest of `color_shift_lines`.
    pub max_color_shift_lines: u32,

    /// Sensor segments read in parallel.
    pub segment_count: u32,
    /// First pixel, in register units.
    pub pixel_startx: u32,
    /// One past the last pixel, in register units.
    pub pixel_endx: u32,

    /// Line period in pixel clocks.
    pub exposure_time: u32,
}

impl ScanSession {
    /// Panic unless the session compiler filled this session.
    ///
    /// # Panics
    /// Always panics on an uncomputed session: consuming one is a
    /// programming error.
    pub fn assert_computed(&self) {
        if !self.computed {
            panic!("ScanSession consumed before compute_session filled it");
        }
    }

    /// The request this session was computed for.
    ///
    /// # Panics
    /// Panics on an uncomputed session.
    pub fn params(&self) -> &ScanParams {
        self.assert_computed();
        match &self.params {
            Some(params) => params,
            None => panic!("computed ScanSession carries no parameters"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_params() -> ScanParams {
        ScanParams {
            pixels: 600,
            lines: 600,
            ..ScanParams::default()
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(color_params().validate().is_ok());

        let bad_depth = ScanParams {
            depth: 12,
            ..color_params()
        };
        assert!(matches!(
            bad_depth.validate(),
            Err(ScanError::InvalidParameters(_))
        ));

        let mismatched = ScanParams {
            channels: 1,
            ..color_params()
        };
        assert!(mismatched.validate().is_err());

        let empty = ScanParams::default();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_step_type_bits() {
        assert_eq!(StepType::from_bits(2), Some(StepType::Quarter));
        assert_eq!(StepType::from_bits(7), None);
        assert_eq!(StepType::Eighth.shift(), 3);
        assert!(StepType::Half < StepType::Quarter);
    }

    #[test]
    #[should_panic(expected = "consumed before compute_session")]
    fn test_uncomputed_session_panics() {
        ScanSession::default().assert_computed();
    }

    #[test]
    fn test_flags_survive_toml() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Wrapper {
            flags: ScanFlags,
        }
        let wrapper = Wrapper {
            flags: ScanFlags::DISABLE_SHADING | ScanFlags::FEEDING,
        };
        let text = toml::to_string(&wrapper).unwrap();
        assert!(text.contains("DISABLE_SHADING"));
        assert_eq!(toml::from_str::<Wrapper>(&text).unwrap(), wrapper);
    }
}
