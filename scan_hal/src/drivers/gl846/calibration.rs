//! GL846 calibration sequences.
//!
//! Each sequence reprograms the device for its own captures, so the working
//! register image is left in calibration state and the next scan has to be
//! programmed again.

use scan_common::hal::consts::{
    COARSE_GAIN_LINES, LED_MAX_ITERATIONS, OFFSET_TARGET, SHADING_BANK_STRIDE, SHADING_BASE,
};
use scan_common::hal::error::ScanResult;
use scan_common::hal::model::{ModelDescriptor, ModelFlags};
use scan_common::hal::types::{ColorFilter, ScanFlags, ScanMode, ScanParams, ScanSession};
use tracing::{debug, info, warn};

use super::motion::{run_scan, slow_back_home};
use super::registers::*;
use super::{program_session, set_fe};
use crate::calibration::{
    ImageView, OffsetSearch, ShadingTable, adjust_exposure, coarse_gain_coefficient,
    collapse_cis_gains, dark_average, dummy_dark, gain_code,
};
use crate::command_set::FrontendAction;
use crate::device::Device;
use crate::session::compute_session;

/// Pixels covering the whole sensor at `xres`.
pub fn full_width(model: &ModelDescriptor, xres: u32) -> u32 {
    model.sensor.sensor_pixels * xres / model.sensor.optical_res.max(1)
}

/// Output pixels of `session` that fall in the masked margin.
fn black_pixels(model: &ModelDescriptor, session: &ScanSession) -> usize {
    let params = session.params();
    (model.sensor.black_pixels * params.xres / session.optical_resolution.max(1)) as usize
}

fn calibration_params(
    model: &ModelDescriptor,
    calib_xres: u32,
    lines: u32,
    depth: u32,
    flags: ScanFlags,
) -> ScanParams {
    ScanParams {
        xres: calib_xres,
        yres: calib_xres,
        startx: 0,
        starty: 0,
        pixels: full_width(model, calib_xres),
        lines,
        depth,
        channels: 3,
        scan_mode: ScanMode::Color,
        color_filter: ColorFilter::Green,
        flags: flags
            | ScanFlags::DISABLE_SHADING
            | ScanFlags::DISABLE_GAMMA
            | ScanFlags::IGNORE_LINE_DISTANCE,
    }
}

/// Program, run and read one calibration capture.
fn calibration_scan(
    dev: &mut Device,
    params: &ScanParams,
    move_head: bool,
) -> ScanResult<(ScanSession, Vec<u8>)> {
    let session = compute_session(&dev.model, params, &dev.model.sensor)?;
    let mut regs = dev.reg.clone();
    program_session(dev, &mut regs, &session)?;
    if !move_head {
        regs.clear_bits(REG_0X02, REG_0X02_MTRPWR);
    }
    let data = run_scan(dev, &mut regs, &session)?;
    dev.reg = regs;
    Ok((session, data))
}

/// Binary search of the frontend offset codes on the masked margin.
pub fn offset_calibration(dev: &mut Device, calib_xres: u32) -> ScanResult<()> {
    if !dev.model.flags.contains(ModelFlags::OFFSET_CALIBRATION) {
        debug!("model has no offset calibration");
        return Ok(());
    }

    let params = calibration_params(&dev.model, calib_xres, 1, 16, ScanFlags::SINGLE_LINE);
    dev.frontend.gain = [0; 3];
    let mut search = OffsetSearch::new(OFFSET_TARGET as u32);

    loop {
        let probe = search.probe();
        dev.frontend.offset = probe;
        set_fe(dev, FrontendAction::Set)?;

        let (session, data) = calibration_scan(dev, &params, false)?;
        let view = ImageView::for_session(&data, &session, dev.model.is_cis)?;
        let levels = dark_average(&view, black_pixels(&dev.model, &session));
        debug!("offset pass {}: codes {:?} black {:?}", search.passes() + 1, probe, levels);

        search.update(levels);
        if search.converged() {
            break;
        }
        if search.exhausted() {
            warn!("offset search stopped after {} passes", search.passes());
            break;
        }
    }

    dev.frontend.offset = search.result();
    set_fe(dev, FrontendAction::Set)?;
    info!(
        "offset calibration: {:?} after {} passes",
        dev.frontend.offset,
        search.passes()
    );
    Ok(())
}

/// Set the gain codes so the white level reaches the sensor reference.
pub fn coarse_gain_calibration(dev: &mut Device, calib_xres: u32, target_xres: u32) -> ScanResult<()> {
    let params = calibration_params(
        &dev.model,
        calib_xres,
        COARSE_GAIN_LINES,
        8,
        ScanFlags::SINGLE_LINE,
    );
    set_fe(dev, FrontendAction::Set)?;

    let (session, data) = calibration_scan(dev, &params, false)?;
    let view = ImageView::for_session(&data, &session, dev.model.is_cis)?;
    let pixels = view.pixels();
    let coefficient = coarse_gain_coefficient(target_xres, dev.model.system_optical_res());

    let mut codes = [0u8; 3];
    for (channel, code) in codes.iter_mut().enumerate() {
        let average = view.average(channel, pixels / 4..3 * pixels / 4);
        *code = gain_code(average, dev.model.sensor.gain_white_ref, coefficient);
        debug!("gain channel {}: average {} -> code {}", channel, average, code);
    }
    if dev.model.is_cis {
        codes = collapse_cis_gains(codes);
    }

    dev.frontend.gain = codes;
    set_fe(dev, FrontendAction::Set)?;
    info!("coarse gain calibration: {:?}", codes);
    Ok(())
}

/// Feedback loop on the LED exposure times.
///
/// Non-convergence is not an error: the last exposures are kept.
pub fn led_calibration(dev: &mut Device, calib_xres: u32) -> ScanResult<()> {
    if !dev.model.is_cis || !dev.model.flags.contains(ModelFlags::LED_CALIBRATION) {
        debug!("model has no LED calibration");
        return Ok(());
    }

    let params = calibration_params(&dev.model, calib_xres, 1, 16, ScanFlags::SINGLE_LINE);
    let mut exposure = dev.led_exposure;

    for iteration in 0..LED_MAX_ITERATIONS {
        dev.led_exposure = exposure;
        let (session, data) = calibration_scan(dev, &params, false)?;
        let view = ImageView::for_session(&data, &session, true)?;
        let pixels = view.pixels();
        let averages = [0, 1, 2].map(|channel| view.average(channel, 0..pixels));
        debug!("LED pass {}: exposure {:?} averages {:?}", iteration + 1, exposure, averages);

        match adjust_exposure(exposure, averages) {
            None => {
                info!(
                    "LED calibration: {:?} after {} passes",
                    exposure,
                    iteration + 1
                );
                return Ok(());
            }
            Some(next) => exposure = next,
        }
    }

    dev.led_exposure = exposure;
    warn!(
        "LED calibration did not converge after {} passes, keeping {:?}",
        LED_MAX_ITERATIONS, exposure
    );
    Ok(())
}

/// Capture the dark and white references and build the shading table.
pub fn shading_calibration(dev: &mut Device, calib_xres: u32) -> ScanResult<ShadingTable> {
    let lines = dev.model.shading_lines.max(1);
    let planar = dev.model.is_cis;

    let dark = if dev.model.flags.contains(ModelFlags::DARK_CALIBRATION) {
        let params = calibration_params(&dev.model, calib_xres, lines, 16, ScanFlags::DISABLE_LAMP);
        let (session, data) = calibration_scan(dev, &params, false)?;
        Some(ImageView::for_session(&data, &session, planar)?.average_lines())
    } else {
        None
    };

    let params = calibration_params(&dev.model, calib_xres, lines, 16, ScanFlags::empty());
    let (session, data) = calibration_scan(dev, &params, true)?;
    let view = ImageView::for_session(&data, &session, planar)?;
    let white = view.average_lines();
    let dark = match dark {
        Some(dark) => dark,
        None => dummy_dark(&view, black_pixels(&dev.model, &session)),
    };
    let table = ShadingTable::compute(&dark, &white, view.pixels(), view.channels())?;

    if dev.model.flags.contains(ModelFlags::SHADING_REPARK) {
        slow_back_home(dev, true)?;
    }
    info!(
        "shading calibration: {} pixels at {} dpi",
        table.pixels, calib_xres
    );
    Ok(table)
}

/// Upload the slice of `table` under the window of `session`.
///
/// Each channel goes to the bank named by its bank register, re-sampled from
/// calibration resolution to the scan resolution.
pub fn send_shading_data(
    dev: &mut Device,
    session: &ScanSession,
    table: &ShadingTable,
    calib_xres: u32,
) -> ScanResult<()> {
    session.assert_computed();
    let params = session.params();
    let factor = (calib_xres / params.xres.max(1)).max(1) as usize;
    let offset =
        (params.startx as u64 * calib_xres as u64 / session.optical_resolution.max(1) as u64) as usize;
    let pixels = session.output_pixels as usize;

    for (channel, bank_reg) in REG_SHADING_BANKS.iter().enumerate() {
        let bank = dev.read_register(*bank_reg)?;
        let address = SHADING_BASE + bank as u32 * SHADING_BANK_STRIDE;
        let data = table.decimate(channel, offset, factor, pixels);
        dev.raw_memory_write(address, &data)?;
    }
    debug!(
        "shading data sent: {} pixels, factor {}, offset {}",
        pixels, factor, offset
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::find_model;

    #[test]
    fn test_full_width_fits_sensor() {
        for name in crate::profiles::MODEL_NAMES {
            let model = find_model(name).unwrap();
            for xres in [75, 150, 300, 600] {
                let params = calibration_params(&model, xres, 1, 16, ScanFlags::empty());
                let session = compute_session(&model, &params, &model.sensor).unwrap();
                assert!(session.optical_pixels <= model.sensor.sensor_pixels);
            }
        }
    }

    #[test]
    fn test_black_margin_at_calibration_resolution() {
        let model = find_model("cis-flatbed").unwrap();
        let params = calibration_params(&model, 300, 1, 16, ScanFlags::empty());
        let session = compute_session(&model, &params, &model.sensor).unwrap();
        // 96 masked pixels at 2400 dpi
        assert_eq!(black_pixels(&model, &session), 12);
        assert!(params.flags.contains(ScanFlags::DISABLE_SHADING));
    }
}
