//! Synthetic image formation.
//!
//! Light reaching a sensor column is illumination times the reflectance of
//! the flatbed at the head position times a fixed per-column response. The
//! frontend adds the dark level and the offset, then amplifies.

use scan_common::hal::consts::SHADING_COEFFICIENT_UNIT;

use crate::calibration::gain_factor;

/// Signal of a fully dark column.
pub const DARK_LEVEL: f64 = 300.0;

/// Frontend offset added per code above 128.
pub const OFFSET_STEP: f64 = 48.0;

/// Light per exposure unit of each LED (CIS).
pub const LED_EFFICIENCY: [f64; 3] = [2.2, 1.9, 1.6];

/// Light per line period unit of the lamp (CCD), per colour.
pub const LAMP_EFFICIENCY: [f64; 3] = [1.5, 1.4, 1.2];

const WHITE_REFLECTANCE: f64 = 0.92;
const BLACK_REFLECTANCE: f64 = 0.02;
const DOCUMENT_LIGHT: f64 = 0.90;
const DOCUMENT_DARK: f64 = 0.05;

/// What lies under the glass along the travel axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SimLayout {
    /// End of the white calibration area, in base steps from home.
    pub white_end: u32,
    /// Black strip span, in base steps from home.
    pub black_strip: Option<(u32, u32)>,
    /// Width of the document's vertical stripes, in optical pixels.
    pub stripe_width: u32,
}

impl Default for SimLayout {
    fn default() -> Self {
        Self {
            white_end: 300,
            black_strip: Some((300, 420)),
            stripe_width: 64,
        }
    }
}

impl SimLayout {
    /// Layout without the black strip.
    pub fn without_black_strip() -> Self {
        Self {
            black_strip: None,
            ..Self::default()
        }
    }

    /// Reflectance at head position `y` and optical column `column`.
    pub fn reflectance(&self, y: f64, column: u32) -> f64 {
        if y < self.white_end as f64 {
            return WHITE_REFLECTANCE;
        }
        if let Some((start, end)) = self.black_strip
            && y >= start as f64
            && y < end as f64
        {
            return BLACK_REFLECTANCE;
        }
        if (column / self.stripe_width.max(1)) % 2 == 0 {
            DOCUMENT_LIGHT
        } else {
            DOCUMENT_DARK
        }
    }
}

/// Fixed response non-uniformity of a sensor column.
pub fn prnu(column: u32) -> f64 {
    1.0 - 0.06 * (column % 53) as f64 / 53.0
}

/// Parameters shared by every line of one scan.
#[derive(Debug, Clone)]
pub(crate) struct LineSetup {
    pub first_column: u32,
    pub column_step: f64,
    pub pixels: usize,
    pub channels: usize,
    pub bytes_per_sample: usize,
    pub planar: bool,
    pub black_pixels: u32,
    pub illumination: [f64; 3],
    pub filter_channel: usize,
    pub gain: [u8; 3],
    pub offset: [u8; 3],
    pub shading: Option<[Vec<u8>; 3]>,
}

impl LineSetup {
    fn sample(&self, layout: &SimLayout, y: f64, pixel: usize, out_channel: usize) -> u16 {
        let color = if self.channels == 3 { out_channel } else { self.filter_channel };
        let column = self.first_column + (pixel as f64 * self.column_step) as u32;

        let light = if column < self.black_pixels {
            0.0
        } else {
            self.illumination[color] * layout.reflectance(y, column) * prnu(column)
        };
        let offset = (self.offset[color] as f64 - 128.0) * OFFSET_STEP;
        let mut value = ((light + DARK_LEVEL + offset).max(0.0) * gain_factor(self.gain[color]))
            .min(u16::MAX as f64);

        if let Some(banks) = &self.shading {
            let bank = &banks[color];
            let at = pixel * 4;
            if bank.len() >= at + 4 {
                let dark = u16::from_le_bytes([bank[at], bank[at + 1]]) as f64;
                let coefficient = u16::from_le_bytes([bank[at + 2], bank[at + 3]]) as f64;
                value = (value - dark).max(0.0) * coefficient / SHADING_COEFFICIENT_UNIT as f64;
            }
        }
        value.clamp(0.0, u16::MAX as f64) as u16
    }

    /// Append one line captured at head position `y`.
    pub fn render_line(&self, layout: &SimLayout, y: f64, out: &mut Vec<u8>) {
        let wide = self.bytes_per_sample == 2;
        let mut push = |value: u16| {
            if wide {
                out.extend_from_slice(&value.to_le_bytes());
            } else {
                out.push((value >> 8) as u8);
            }
        };
        if self.planar {
            for channel in 0..self.channels {
                for pixel in 0..self.pixels {
                    push(self.sample(layout, y, pixel, channel));
                }
            }
        } else {
            for pixel in 0..self.pixels {
                for channel in 0..self.channels {
                    push(self.sample(layout, y, pixel, channel));
                }
            }
        }
    }
}
