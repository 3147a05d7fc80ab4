//! Calibration arithmetic.
//!
//! Everything here is pure: sample access, the offset binary search, the
//! gain code transform, the LED exposure feedback step, strip
//! classification and shading table construction. The command sets drive
//! the hardware and feed the captured buffers through these helpers.

use scan_common::hal::consts::{
    LED_BAND_CENTER, LED_BAND_HIGH, LED_BAND_LOW, OFFSET_MAX_PASSES, SHADING_BYTES_PER_PIXEL,
    SHADING_COEFFICIENT_UNIT, SHADING_TARGET, STRIP_BLACK_THRESHOLD, STRIP_MAX_WRONG_PERCENT,
    STRIP_WHITE_THRESHOLD,
};
use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::types::{Direction, ScanSession, StripColor};
use serde::{Deserialize, Serialize};

/// Read-only view over a raw scan buffer.
///
/// Colour data is either interleaved (`RGBRGB...` per line) or planar
/// (`RRR...GGG...BBB...` per line, as contact image sensors deliver it).
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    data: &'a [u8],
    pixels: usize,
    lines: usize,
    channels: usize,
    bytes_per_sample: usize,
    planar: bool,
}

impl<'a> ImageView<'a> {
    /// Wrap `data` laid out as described.
    ///
    /// # Errors
    /// `InvalidParameters` if `data` is shorter than the described image.
    pub fn new(
        data: &'a [u8],
        pixels: usize,
        lines: usize,
        channels: usize,
        depth: u32,
        planar: bool,
    ) -> ScanResult<Self> {
        let bytes_per_sample = (depth / 8).max(1) as usize;
        let needed = pixels * lines * channels * bytes_per_sample;
        if data.len() < needed {
            return Err(ScanError::InvalidParameters(format!(
                "buffer holds {} bytes, image needs {needed}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            pixels,
            lines,
            channels,
            bytes_per_sample,
            planar,
        })
    }

    /// Wrap the raw buffer of a scan described by `session`.
    pub fn for_session(data: &'a [u8], session: &ScanSession, planar: bool) -> ScanResult<Self> {
        let params = session.params();
        Self::new(
            data,
            session.output_pixels as usize,
            session.output_line_count as usize,
            params.channels as usize,
            params.depth,
            planar && params.channels == 3,
        )
    }

    /// Pixels per line.
    pub fn pixels(&self) -> usize {
        self.pixels
    }

    /// Number of lines.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Samples per pixel.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Sample at `line`, `pixel`, `channel`, on the native scale of the buffer.
    pub fn get(&self, line: usize, pixel: usize, channel: usize) -> u16 {
        let line_samples = self.pixels * self.channels;
        let sample = if self.planar {
            line * line_samples + channel * self.pixels + pixel
        } else {
            line * line_samples + pixel * self.channels + channel
        };
        let offset = sample * self.bytes_per_sample;
        if self.bytes_per_sample == 2 {
            u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
        } else {
            self.data[offset] as u16
        }
    }

    /// Average of `channel` over `pixels` across every line.
    pub fn average(&self, channel: usize, pixels: std::ops::Range<usize>) -> u32 {
        let pixels = pixels.start.min(self.pixels)..pixels.end.min(self.pixels);
        let count = pixels.len() * self.lines;
        if count == 0 {
            return 0;
        }
        let mut sum = 0u64;
        for line in 0..self.lines {
            for pixel in pixels.clone() {
                sum += self.get(line, pixel, channel) as u64;
            }
        }
        (sum / count as u64) as u32
    }

    /// Per-pixel average over every line, channel-major.
    pub fn average_lines(&self) -> Vec<u16> {
        let mut out = Vec::with_capacity(self.pixels * self.channels);
        for channel in 0..self.channels {
            for pixel in 0..self.pixels {
                let sum: u64 = (0..self.lines)
                    .map(|line| self.get(line, pixel, channel) as u64)
                    .sum();
                out.push((sum / self.lines.max(1) as u64) as u16);
            }
        }
        out
    }
}

/// Per-channel average over the masked margin at the start of each line.
pub fn dark_average(view: &ImageView<'_>, black_pixels: usize) -> [u32; 3] {
    let mut averages = [0u32; 3];
    for (channel, avg) in averages.iter_mut().enumerate().take(view.channels()) {
        *avg = view.average(channel, 0..black_pixels);
    }
    averages
}

/// Per-channel binary search of the frontend offset code.
///
/// All channels start from the same `[0, 255]` interval. Each pass probes
/// the midpoint; a channel whose black level is above the target moves its
/// upper bound down, otherwise its lower bound up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetSearch {
    bottom: [u8; 3],
    top: [u8; 3],
    target: u32,
    passes: u32,
}

impl OffsetSearch {
    /// Start a search aiming at black level `target`.
    pub fn new(target: u32) -> Self {
        Self {
            bottom: [0; 3],
            top: [255; 3],
            target,
            passes: 0,
        }
    }

    /// Codes to program for the next probe.
    pub fn probe(&self) -> [u8; 3] {
        let mut codes = [0u8; 3];
        for (ch, code) in codes.iter_mut().enumerate() {
            *code = ((self.bottom[ch] as u16 + self.top[ch] as u16) / 2) as u8;
        }
        codes
    }

    /// Narrow every interval with the black levels measured at [`probe`](Self::probe).
    pub fn update(&mut self, black_levels: [u32; 3]) {
        let probe = self.probe();
        for ch in 0..3 {
            if black_levels[ch] > self.target {
                self.top[ch] = probe[ch];
            } else {
                self.bottom[ch] = probe[ch];
            }
        }
        self.passes += 1;
    }

    /// Whether every interval is at most one code wide.
    pub fn converged(&self) -> bool {
        (0..3).all(|ch| self.top[ch] - self.bottom[ch] <= 1)
    }

    /// Whether the pass budget is spent.
    pub fn exhausted(&self) -> bool {
        self.passes >= OFFSET_MAX_PASSES
    }

    /// Passes run so far.
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// First code of each channel whose black level exceeds the target.
    pub fn result(&self) -> [u8; 3] {
        self.top
    }
}

/// Gain coefficient applied below the sensor's full resolution.
pub fn coarse_gain_coefficient(xres: u32, system_optical_res: u32) -> f64 {
    if xres < system_optical_res { 0.9 } else { 1.0 }
}

/// Frontend gain code bringing `average` to `white_ref * coefficient`.
///
/// The frontend amplifies by `208 / (283 - code)`; the result is clamped to
/// the valid code range and a zero average saturates to the maximum gain.
pub fn gain_code(average: u32, white_ref: u32, coefficient: f64) -> u8 {
    if average == 0 {
        return 255;
    }
    let gain = white_ref as f64 * coefficient / average as f64;
    if gain <= 0.0 {
        return 0;
    }
    let code = 283.0 - 208.0 / gain;
    code.clamp(0.0, 255.0) as u8
}

/// Amplification of a frontend gain code.
pub fn gain_factor(code: u8) -> f64 {
    208.0 / (283.0 - code as f64)
}

/// Contact image sensors share one gain control: keep the lowest code.
pub fn collapse_cis_gains(gains: [u8; 3]) -> [u8; 3] {
    let min = gains.iter().copied().min().unwrap_or(0);
    [min; 3]
}

/// One step of the LED exposure feedback loop.
///
/// Returns `None` once every channel is inside the accepted band, otherwise
/// the rescaled exposures. In-band channels keep their exposure.
pub fn adjust_exposure(exposure: [u16; 3], averages: [u32; 3]) -> Option<[u16; 3]> {
    let in_band = |avg: u32| (LED_BAND_LOW..=LED_BAND_HIGH).contains(&avg);
    if averages.iter().all(|avg| in_band(*avg)) {
        return None;
    }
    let mut next = exposure;
    for ch in 0..3 {
        if in_band(averages[ch]) {
            continue;
        }
        let scaled = if averages[ch] == 0 {
            u16::MAX as u64
        } else {
            exposure[ch] as u64 * LED_BAND_CENTER as u64 / averages[ch] as u64
        };
        next[ch] = scaled.clamp(1, u16::MAX as u64) as u16;
    }
    Some(next)
}

/// Count pixels of an 8-bit line that do not have the strip colour.
pub fn count_wrong_pixels(samples: impl IntoIterator<Item = u16>, color: StripColor) -> usize {
    samples
        .into_iter()
        .filter(|v| match color {
            StripColor::Black => *v > STRIP_BLACK_THRESHOLD as u16,
            StripColor::White => *v < STRIP_WHITE_THRESHOLD as u16,
        })
        .count()
}

/// Whether `wrong` off-colour pixels out of `total` still make a strip.
pub fn is_strip(wrong: usize, total: usize) -> bool {
    total > 0 && wrong * 100 / total < STRIP_MAX_WRONG_PERCENT
}

/// Look for a strip of `color` in an 8-bit gray capture.
///
/// Forward searches accept the first uniform line. Backward searches
/// require the whole captured area to be uniform.
pub fn find_strip(view: &ImageView<'_>, color: StripColor, direction: Direction) -> bool {
    let pixels = view.pixels();
    let line_samples = |line: usize| (0..pixels).map(move |p| view.get(line, p, 0));
    match direction {
        Direction::Forward => (0..view.lines())
            .any(|line| is_strip(count_wrong_pixels(line_samples(line), color), pixels)),
        Direction::Backward => {
            let wrong: usize = (0..view.lines())
                .map(|line| count_wrong_pixels(line_samples(line), color))
                .sum();
            is_strip(wrong, pixels * view.lines())
        }
    }
}

/// Shading table captured at calibration resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadingTable {
    /// Pixels per channel.
    pub pixels: usize,
    /// Channels.
    pub channels: usize,
    /// `[dark LE16, coefficient LE16]` per pixel, channel-major.
    pub data: Vec<u8>,
}

impl ShadingTable {
    /// Build the table from channel-major per-pixel dark and white averages.
    ///
    /// # Errors
    /// `InvalidParameters` if the averages do not cover `pixels * channels` entries.
    pub fn compute(
        dark: &[u16],
        white: &[u16],
        pixels: usize,
        channels: usize,
    ) -> ScanResult<Self> {
        let entries = pixels * channels;
        if dark.len() < entries || white.len() < entries {
            return Err(ScanError::InvalidParameters(format!(
                "shading needs {entries} averages, got {} dark and {} white",
                dark.len(),
                white.len()
            )));
        }
        let mut data = Vec::with_capacity(entries * SHADING_BYTES_PER_PIXEL);
        for i in 0..entries {
            let d = dark[i];
            let coefficient = shading_coefficient(d, white[i]);
            data.extend_from_slice(&d.to_le_bytes());
            data.extend_from_slice(&coefficient.to_le_bytes());
        }
        Ok(Self {
            pixels,
            channels,
            data,
        })
    }

    /// Entry of `channel` at `pixel`.
    pub fn entry(&self, channel: usize, pixel: usize) -> (u16, u16) {
        let at = (channel * self.pixels + pixel) * SHADING_BYTES_PER_PIXEL;
        (
            u16::from_le_bytes([self.data[at], self.data[at + 1]]),
            u16::from_le_bytes([self.data[at + 2], self.data[at + 3]]),
        )
    }

    /// Re-sample one channel for a scan: every `factor`-th pixel starting at
    /// `offset`, `out_pixels` entries. Pixels past the captured width repeat
    /// the last entry.
    pub fn decimate(&self, channel: usize, offset: usize, factor: usize, out_pixels: usize) -> Vec<u8> {
        let factor = factor.max(1);
        let base = channel.min(self.channels.saturating_sub(1)) * self.pixels;
        let mut out = Vec::with_capacity(out_pixels * SHADING_BYTES_PER_PIXEL);
        for x in 0..out_pixels {
            let src = (offset + x * factor).min(self.pixels.saturating_sub(1));
            let at = (base + src) * SHADING_BYTES_PER_PIXEL;
            out.extend_from_slice(&self.data[at..at + SHADING_BYTES_PER_PIXEL]);
        }
        out
    }
}

/// Shading coefficient mapping `white` over `dark` to the shading target.
pub fn shading_coefficient(dark: u16, white: u16) -> u16 {
    if white <= dark {
        return SHADING_COEFFICIENT_UNIT as u16;
    }
    let diff = (white - dark) as u32;
    (SHADING_COEFFICIENT_UNIT * SHADING_TARGET / diff).min(u16::MAX as u32) as u16
}

/// Dark reference taken from the masked margin of a lamp-on capture.
///
/// Every pixel of a channel gets the margin average of that channel.
pub fn dummy_dark(view: &ImageView<'_>, black_pixels: usize) -> Vec<u16> {
    let levels = dark_average(view, black_pixels);
    let mut out = Vec::with_capacity(view.pixels() * view.channels());
    for level in levels.iter().take(view.channels()) {
        out.extend(std::iter::repeat_n(*level as u16, view.pixels()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn interleaved_16(pixels: usize, lines: usize, f: impl Fn(usize, usize, usize) -> u16) -> Vec<u8> {
        let mut data = Vec::new();
        for line in 0..lines {
            for pixel in 0..pixels {
                for ch in 0..3 {
                    data.extend_from_slice(&f(line, pixel, ch).to_le_bytes());
                }
            }
        }
        data
    }

    #[test]
    fn test_planar_and_interleaved_access() {
        let interleaved = [1u8, 2, 3, 4, 5, 6];
        let view = ImageView::new(&interleaved, 2, 1, 3, 8, false).unwrap();
        assert_eq!(view.get(0, 1, 0), 4);
        assert_eq!(view.get(0, 0, 2), 3);

        let planar = [1u8, 2, 3, 4, 5, 6];
        let view = ImageView::new(&planar, 2, 1, 3, 8, true).unwrap();
        assert_eq!(view.get(0, 1, 0), 2);
        assert_eq!(view.get(0, 0, 2), 5);

        assert!(ImageView::new(&planar, 4, 1, 3, 8, true).is_err());
    }

    #[test]
    fn test_dark_average_uses_margin_only() {
        let data = interleaved_16(10, 2, |_, pixel, ch| {
            if pixel < 4 { 100 * (ch as u16 + 1) } else { 40000 }
        });
        let view = ImageView::new(&data, 10, 2, 3, 16, false).unwrap();
        assert_eq!(dark_average(&view, 4), [100, 200, 300]);

        let dark = dummy_dark(&view, 4);
        assert_eq!(dark.len(), 30);
        assert_eq!(dark[0], 100);
        assert_eq!(dark[25], 300);
    }

    #[test]
    fn test_gain_code_clamps() {
        assert_eq!(gain_code(0, 200, 1.0), 255);
        assert_eq!(gain_code(1, 200, 1.0), 255);
        assert_eq!(gain_code(255, 200, 1.0), 17);
        assert_eq!(gain_code(10_000, 200, 1.0), 0);
        // 283 - 208 / 2
        assert_eq!(gain_code(100, 200, 1.0), 179);
        assert!((gain_factor(179) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_gain_coefficient_and_cis_collapse() {
        assert_eq!(coarse_gain_coefficient(300, 1200), 0.9);
        assert_eq!(coarse_gain_coefficient(1200, 1200), 1.0);
        assert_eq!(collapse_cis_gains([90, 40, 70]), [40, 40, 40]);
    }

    #[test]
    fn test_adjust_exposure() {
        assert_eq!(adjust_exposure([100, 100, 100], [30000, 28000, 32000]), None);

        let next = adjust_exposure([1000, 1000, 1000], [15000, 30000, 60000]).unwrap();
        assert_eq!(next, [2000, 1000, 500]);

        let saturated = adjust_exposure([1000, 1000, 1000], [0, 1, 30000]).unwrap();
        assert_eq!(saturated, [u16::MAX, u16::MAX, 1000]);
    }

    #[test]
    fn test_strip_threshold_boundary() {
        // 2 % off-colour pixels: still a strip
        let mut line = vec![10u16; 100];
        line[0] = 200;
        line[1] = 200;
        assert!(is_strip(count_wrong_pixels(line.clone(), StripColor::Black), 100));

        // 4 %: rejected
        line[2] = 200;
        line[3] = 200;
        assert!(!is_strip(count_wrong_pixels(line.clone(), StripColor::Black), 100));

        // exactly 3 % is already too much
        line[3] = 10;
        assert!(!is_strip(count_wrong_pixels(line, StripColor::Black), 100));

        let white = vec![59u16, 60, 200];
        assert_eq!(count_wrong_pixels(white, StripColor::White), 1);
    }

    #[test]
    fn test_find_strip_direction_asymmetry() {
        // first line black, second line white
        let mut data = vec![5u8; 100];
        data.extend(vec![250u8; 100]);
        let view = ImageView::new(&data, 100, 2, 1, 8, false).unwrap();

        assert!(find_strip(&view, StripColor::Black, Direction::Forward));
        assert!(!find_strip(&view, StripColor::Black, Direction::Backward));
        assert!(find_strip(&view, StripColor::White, Direction::Forward));
    }

    #[test]
    fn test_shading_table() {
        let dark = vec![1000u16, 1000, 2000, 2000];
        let white = vec![1000 + 0xdc00, 1000 + 0x6e00, 2000, 1000];
        let table = ShadingTable::compute(&dark, &white, 2, 2).unwrap();

        assert_eq!(table.data.len(), 16);
        assert_eq!(table.entry(0, 0), (1000, 0x2000));
        assert_eq!(table.entry(0, 1), (1000, 0x4000));
        // no signal above dark: unity coefficient
        assert_eq!(table.entry(1, 0), (2000, 0x2000));
        assert_eq!(table.entry(1, 1), (2000, 0x2000));

        assert!(ShadingTable::compute(&dark, &white, 4, 2).is_err());
        assert_eq!(shading_coefficient(0, 1), u16::MAX);
    }

    #[test]
    fn test_shading_decimation() {
        let dark: Vec<u16> = (0..8).collect();
        let white = vec![0xffff; 8];
        let table = ShadingTable::compute(&dark, &white, 4, 2).unwrap();

        let out = table.decimate(1, 1, 2, 3);
        assert_eq!(out.len(), 12);
        let darks: Vec<u16> = out
            .chunks(4)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        // channel 1 holds darks 4..8; pixels 1, 3 then clamped to 3
        assert_eq!(darks, vec![5, 7, 7]);
    }

    proptest! {
        #[test]
        fn prop_gain_code_in_range(avg in any::<u32>(), white in 0u32..1000, coeff in 0.5f64..1.5) {
            let code = gain_code(avg, white, coeff);
            if avg == 0 {
                prop_assert_eq!(code, 255);
            } else {
                prop_assert!(gain_code(avg.saturating_add(1), white, coeff) <= code);
            }
        }

        #[test]
        fn prop_offset_search_finds_crossover(
            slope in 1u32..400,
            base in 0u32..60000,
            target in 0u32..70000,
        ) {
            let black = |code: u8| base + slope * code as u32;
            let crossover = (0..=255u32).find(|c| black(*c as u8) > target).unwrap_or(256);

            let mut search = OffsetSearch::new(target);
            while !search.converged() && !search.exhausted() {
                let probe = search.probe();
                search.update([black(probe[0]), black(probe[1]), black(probe[2])]);
            }

            prop_assert!(search.converged());
            prop_assert!(search.passes() <= OFFSET_MAX_PASSES);
            for code in search.result() {
                prop_assert!((code as i64 - crossover as i64).abs() <= 1);
            }
        }
    }
}
