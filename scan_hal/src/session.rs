//! Scan session compiler.
//!
//! [`compute_session`] turns a [`ScanParams`] request into the derived
//! layout every later stage relies on. It performs no hardware I/O and is
//! deterministic: the same inputs always give an identical session.

use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::model::{ModelDescriptor, SensorConfig, SensorId};
use scan_common::hal::types::{ScanFlags, ScanParams, ScanSession};
use tracing::trace;

use crate::profiles::find_sensor_profile;

/// Lines per read chunk.
const READ_CHUNK_LINES: u32 = 64;

/// Quantize a requested sensor resolution to a hardware resolution step.
pub fn quantize_hw_dpi(optical_res: u32, dpi: u32) -> u32 {
    if dpi <= 600 {
        600.min(optical_res)
    } else if dpi <= optical_res / 4 {
        optical_res / 4
    } else if dpi <= optical_res / 2 {
        optical_res / 2
    } else {
        optical_res
    }
}

/// Narrow a derived size to the 32 bits the session and registers hold.
fn fit_u32(value: u64, what: &str) -> ScanResult<u32> {
    u32::try_from(value)
        .map_err(|_| ScanError::InvalidParameters(format!("{what} of {value} is out of range")))
}

/// Derive the scan layout for `params` on `model` with `sensor`.
///
/// Sizes are computed in 64 bits, so an oversized request is rejected
/// instead of wrapping.
///
/// # Panics
/// Panics if `sensor` is the unresolved default sensor.
///
/// # Errors
/// - `InvalidParameters` if the request is malformed, leaves the sensor,
///   runs past the end of travel or does not fit the layout fields
/// - `ProfileNotFound` if the sensor has no timing for the hardware resolution
pub fn compute_session(
    model: &ModelDescriptor,
    params: &ScanParams,
    sensor: &SensorConfig,
) -> ScanResult<ScanSession> {
    if sensor.sensor_id == SensorId::Unknown {
        panic!("compute_session called with an unresolved sensor");
    }
    params.validate()?;

    let ppsp = sensor.ccd_pixels_per_system_pixel.max(1);
    let sensor_dpi = params
        .xres
        .checked_mul(ppsp)
        .filter(|dpi| *dpi <= sensor.optical_res)
        .ok_or_else(|| {
            ScanError::InvalidParameters(format!(
                "{} dpi exceeds the {} dpi the sensor delivers",
                params.xres,
                sensor.optical_res / ppsp
            ))
        })?;

    let base_ydpi = model.motor.base_ydpi.max(1);
    if !params.flags.contains(ScanFlags::SINGLE_LINE) {
        let travel = params.starty as u64 + params.lines as u64 * base_ydpi as u64 / params.yres as u64;
        if travel > model.max_travel_steps as u64 {
            return Err(ScanError::InvalidParameters(format!(
                "{} lines at {} dpi from step {} run past the {} step travel",
                params.lines, params.yres, params.starty, model.max_travel_steps
            )));
        }
    }

    let ccd_size_divisor = if sensor.half_ccd_mode && sensor_dpi <= sensor.optical_res / 2 {
        2
    } else {
        1
    };
    let optical_resolution = sensor.optical_res / ccd_size_divisor;

    let hw_dpi = quantize_hw_dpi(sensor.optical_res, sensor_dpi);
    let hwdpi_divisor = sensor.optical_res / hw_dpi;
    let profile = find_sensor_profile(sensor, hw_dpi)?;
    let segment_count = profile.segment_count.max(1);

    // Register pixel unit, in optical pixels.
    let unit = (hwdpi_divisor * ppsp * segment_count) as u64;

    let mut optical_pixels =
        (params.pixels as u64 * optical_resolution as u64 / params.xres as u64).div_ceil(unit) * unit;
    if ccd_size_divisor == 2 && optical_pixels % 2 == 1 {
        optical_pixels += 1;
    }

    let window_end = params.startx as u64 + sensor.ccd_start_xoffset as u64 + optical_pixels;
    if window_end > sensor.ccd_start_xoffset as u64 + sensor.sensor_pixels as u64 {
        return Err(ScanError::InvalidParameters(format!(
            "window ends at pixel {window_end}, sensor has {}",
            sensor.sensor_pixels
        )));
    }
    let optical_pixels = fit_u32(optical_pixels, "optical width")?;
    let unit = unit as u32;

    let output_pixels = optical_pixels * params.xres / optical_resolution;

    let ignore_ld = params.flags.contains(ScanFlags::IGNORE_LINE_DISTANCE);
    let scale_lines = |lines: u32| params.yres as u64 * lines as u64 / base_ydpi as u64;

    let mut color_shift_lines = [0u32; 3];
    if !ignore_ld && params.channels == 3 {
        for (shift, ld) in color_shift_lines.iter_mut().zip(model.ld_shift) {
            *shift = fit_u32(scale_lines(ld), "colour shift")?;
        }
    }
    let max_color_shift_lines = color_shift_lines.iter().copied().max().unwrap_or(0);

    let num_staggered_lines =
        if !ignore_ld && sensor.stagger_lines > 0 && sensor_dpi > sensor.optical_res / 2 {
            fit_u32(scale_lines(sensor.stagger_lines), "stagger")?
        } else {
            0
        };

    let output_line_count = fit_u32(
        params.lines as u64 + max_color_shift_lines as u64 + num_staggered_lines as u64,
        "line count",
    )?;

    let bytes_per_sample = params.bytes_per_sample();
    let output_channel_bytes = output_pixels * bytes_per_sample;
    let output_line_bytes = output_channel_bytes * params.channels;
    let output_line_bytes_raw = output_line_bytes;
    let output_total_bytes_raw = fit_u32(
        output_line_bytes_raw as u64 * output_line_count as u64,
        "scan size",
    )?;

    let pixel_startx = (params.startx + sensor.ccd_start_xoffset) / unit;
    let pixel_endx = pixel_startx + optical_pixels / unit;

    let session = ScanSession {
        params: Some(params.clone()),
        computed: true,
        ccd_size_divisor,
        optical_resolution,
        hw_dpi,
        hwdpi_divisor,
        dpiset: sensor_dpi,
        optical_pixels,
        output_resolution: params.xres,
        output_pixels,
        output_channel_bytes,
        output_line_bytes,
        output_line_bytes_raw,
        output_line_count,
        output_total_bytes_raw,
        buffer_size_read: output_line_bytes_raw * READ_CHUNK_LINES.min(output_line_count),
        num_staggered_lines,
        color_shift_lines,
        max_color_shift_lines,
        segment_count,
        pixel_startx,
        pixel_endx,
        exposure_time: profile.exposure_lperiod,
    };

    trace!(
        "session: hw_dpi={} pixels={}..{} out={}x{} bytes/line={}",
        session.hw_dpi,
        session.pixel_startx,
        session.pixel_endx,
        session.output_pixels,
        session.output_line_count,
        session.output_line_bytes
    );

    Ok(session)
}
