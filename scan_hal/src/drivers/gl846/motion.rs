//! Head motion and the scan lifecycle.
//!
//! Every wait is a bounded status poll. A motion that fails after the motor
//! started is stopped and the working register image is written back; any
//! error raised by that recovery is logged and the original error returned.

use scan_common::hal::consts::{
    DATA_POLL_COUNT, FEED_POLL_COUNT, HOME_POLL_COUNT, STOP_POLL_COUNT, STRIP_SEARCH_MAX_PASSES,
};
use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::registers::RegisterSet;
use scan_common::hal::types::{
    ColorFilter, Direction, MotionState, ScanFlags, ScanMode, ScanParams, ScanSession, StripColor,
};
use tracing::{debug, info, warn};

use super::program_session;
use super::registers::*;
use crate::calibration::{ImageView, find_strip};
use crate::device::Device;
use crate::session::compute_session;

/// Read status registers 0x40 and 0x41.
pub fn read_status(dev: &mut Device) -> ScanResult<Status> {
    let reg40 = dev.read_register(REG_0X40)?;
    let reg41 = dev.read_register(REG_0X41)?;
    Ok(Status::from_regs(reg40, reg41))
}

fn read_valid_words(dev: &mut Device) -> ScanResult<u32> {
    let mut value = 0u32;
    for i in 0..3u8 {
        value |= (dev.read_register(REG_VALIDWORD + i)? as u32) << (8 * i as u32);
    }
    Ok(value)
}

fn current_reg01(dev: &mut Device) -> ScanResult<u8> {
    match dev.mirrored(REG_0X01) {
        Some(value) => Ok(value),
        None => dev.read_register(REG_0X01),
    }
}

/// Best-effort stop and register restore after a failed motion.
fn recover_motion(dev: &mut Device, cause: &ScanError) {
    warn!("motion failed ({}), stopping motor", cause);
    if let Err(e) = stop_action(dev) {
        warn!("stop during recovery failed: {}", e);
    }
    let regs = dev.reg.clone();
    if let Err(e) = dev.write_registers(&regs) {
        warn!("register restore during recovery failed: {}", e);
    }
}

/// Parameters of a motor-only move at the lowest resolution.
fn move_params(dev: &Device, starty: u32, flags: ScanFlags) -> ScanParams {
    ScanParams {
        xres: dev.model.lowest_xdpi(),
        yres: dev.model.lowest_ydpi(),
        startx: 0,
        starty,
        pixels: 100,
        lines: 1,
        depth: 8,
        channels: 1,
        scan_mode: ScanMode::Gray,
        color_filter: ColorFilter::Green,
        flags: flags
            | ScanFlags::DISABLE_SHADING
            | ScanFlags::DISABLE_GAMMA
            | ScanFlags::IGNORE_LINE_DISTANCE,
    }
}

// ─── Motor ──────────────────────────────────────────────────────────

/// Start the motor with the registers already written.
pub fn start_action(dev: &mut Device) -> ScanResult<()> {
    dev.write_register(REG_0X0F, 0x01)?;
    dev.motion_state = MotionState::Moving;
    Ok(())
}

/// Stop the motor and the data path, then wait for both to settle.
///
/// # Errors
/// `HardwareTimeout` if the status still reports activity after
/// `STOP_POLL_COUNT` polls.
pub fn stop_action(dev: &mut Device) -> ScanResult<()> {
    let status = read_status(dev)?;
    if !status.is_busy() {
        debug!("motor already stopped");
        if dev.motion_state == MotionState::Moving {
            dev.motion_state = MotionState::StoppedExplicit;
        }
        return Ok(());
    }

    let reg01 = current_reg01(dev)? & !REG_0X01_SCAN;
    dev.write_register(REG_0X01, reg01)?;
    if dev.reg.has(REG_0X01) {
        dev.reg.clear_bits(REG_0X01, REG_0X01_SCAN);
    }
    dev.sleep_poll();

    for _ in 0..STOP_POLL_COUNT {
        let status = read_status(dev)?;
        if !status.is_busy() {
            dev.motion_state = MotionState::StoppedExplicit;
            return Ok(());
        }
        dev.sleep_poll();
    }

    dev.motion_state = MotionState::Timeout;
    Err(ScanError::HardwareTimeout(format!(
        "motor still running after {STOP_POLL_COUNT} status polls"
    )))
}

/// Drive the head back to the home sensor.
///
/// Without `wait_until_home` the move is started and the call returns; the
/// tracked position is only reset once the sensor confirms arrival.
///
/// # Errors
/// `HardwareTimeout` if the home sensor does not trigger within
/// `HOME_POLL_COUNT` polls.
pub fn slow_back_home(dev: &mut Device, wait_until_home: bool) -> ScanResult<()> {
    // The first status read after power-up or a move can be stale.
    read_status(dev)?;
    let status = read_status(dev)?;
    if status.contains(Status::HOMESNR) {
        debug!("head already at home");
        dev.scanhead_position_in_steps = 0;
        dev.motion_state = MotionState::HomeReached;
        return Ok(());
    }
    if status.is_busy() {
        stop_action(dev)?;
    }

    let params = move_params(dev, 0, ScanFlags::REVERSE);
    let session = compute_session(&dev.model, &params, &dev.model.sensor)?;
    let mut regs = dev.reg.clone();
    program_session(dev, &mut regs, &session)?;
    regs.clear_bits(REG_0X01, REG_0X01_SCAN);
    regs.set_bits(REG_0X02, REG_0X02_MTRREV | REG_0X02_MTRPWR);
    regs.clear_bits(REG_0X02, REG_0X02_FASTFED);
    dev.write_registers(&regs)?;

    if let Err(e) = start_action(dev) {
        recover_motion(dev, &e);
        return Err(e);
    }
    if !wait_until_home {
        debug!("homing started without waiting");
        return Ok(());
    }

    for poll in 0..HOME_POLL_COUNT {
        let status = read_status(dev)?;
        if status.contains(Status::HOMESNR) {
            stop_action(dev)?;
            dev.scanhead_position_in_steps = 0;
            dev.motion_state = MotionState::HomeReached;
            info!("head at home after {} polls", poll + 1);
            return Ok(());
        }
        dev.sleep_poll();
    }

    let err = ScanError::HardwareTimeout(format!(
        "home sensor not reached after {HOME_POLL_COUNT} polls"
    ));
    recover_motion(dev, &err);
    dev.motion_state = MotionState::Timeout;
    Err(err)
}

/// Move the head `steps` base steps away from home without scanning.
///
/// # Errors
/// - `InvalidParameters` if the move would leave the travel range
/// - `HardwareTimeout` if the feed does not finish within `FEED_POLL_COUNT` polls
pub fn feed(dev: &mut Device, steps: u32) -> ScanResult<()> {
    if steps == 0 {
        return Ok(());
    }
    let target = dev.scanhead_position_in_steps as u64 + steps as u64;
    if target > dev.model.max_travel_steps as u64 {
        return Err(ScanError::InvalidParameters(format!(
            "feeding {steps} steps from {} exceeds the {} step travel",
            dev.scanhead_position_in_steps, dev.model.max_travel_steps
        )));
    }

    let params = move_params(dev, steps, ScanFlags::FEEDING);
    let session = compute_session(&dev.model, &params, &dev.model.sensor)?;
    let mut regs = dev.reg.clone();
    program_session(dev, &mut regs, &session)?;
    regs.clear_bits(REG_0X01, REG_0X01_SCAN);
    regs.set_bits(REG_0X02, REG_0X02_MTRPWR);
    regs.clear_bits(REG_0X02, REG_0X02_MTRREV);
    for address in [REG_EXPR, REG_EXPG, REG_EXPB] {
        regs.set16(address, 0)?;
    }
    dev.write_registers(&regs)?;

    if let Err(e) = start_action(dev) {
        recover_motion(dev, &e);
        return Err(e);
    }

    for _ in 0..FEED_POLL_COUNT {
        let status = read_status(dev)?;
        if status.contains(Status::FEEDFSH) {
            stop_action(dev)?;
            dev.scanhead_position_in_steps += steps;
            debug!("fed {} steps, head at {}", steps, dev.scanhead_position_in_steps);
            return Ok(());
        }
        dev.sleep_poll();
    }

    let err = ScanError::HardwareTimeout(format!(
        "feed of {steps} steps not finished after {FEED_POLL_COUNT} polls"
    ));
    recover_motion(dev, &err);
    dev.motion_state = MotionState::Timeout;
    Err(err)
}

// ─── Scan lifecycle ─────────────────────────────────────────────────

/// Write `regs`, clear the counters and start acquisition.
pub fn begin_scan(dev: &mut Device, regs: &mut RegisterSet, start_motor: bool) -> ScanResult<()> {
    dev.write_registers(regs)?;

    let reg0d = regs.get8(REG_0X0D) | REG_0X0D_CLRLNCNT | REG_0X0D_CLRMCNT;
    dev.write_register(REG_0X0D, reg0d)?;

    regs.set_bits(REG_0X01, REG_0X01_SCAN);
    dev.write_register(REG_0X01, regs.get8(REG_0X01))?;

    if start_motor {
        start_action(dev)
    } else {
        dev.write_register(REG_0X0F, 0x00)
    }
}

/// Read the whole raw buffer of `session`.
///
/// # Errors
/// `HardwareTimeout` if no data arrives within `DATA_POLL_COUNT` polls.
pub fn read_data(dev: &mut Device, session: &ScanSession) -> ScanResult<Vec<u8>> {
    let total = session.output_total_bytes_raw as usize;
    let chunk_limit = session.buffer_size_read.max(1) as usize;
    let mut data = vec![0u8; total];
    let mut done = 0;

    while done < total {
        let available = wait_for_data(dev)?;
        let chunk = available.min(total - done).min(chunk_limit);
        dev.bulk_read(DATA_PORT, &mut data[done..done + chunk])?;
        done += chunk;
    }
    debug!("read {} bytes", total);
    Ok(data)
}

fn wait_for_data(dev: &mut Device) -> ScanResult<usize> {
    for _ in 0..DATA_POLL_COUNT {
        let words = read_valid_words(dev)?;
        if words > 0 {
            return Ok(words as usize);
        }
        dev.sleep_data_poll();
    }
    Err(ScanError::HardwareTimeout(format!(
        "no scan data after {DATA_POLL_COUNT} polls"
    )))
}

/// Clear the SCAN bit and optionally wait for the motor to stop.
pub fn end_scan(dev: &mut Device, regs: &mut RegisterSet, check_stop: bool) -> ScanResult<()> {
    regs.clear_bits(REG_0X01, REG_0X01_SCAN);
    dev.write_register(REG_0X01, regs.get8(REG_0X01))?;
    if check_stop {
        stop_action(dev)?;
    }
    Ok(())
}

/// Run one programmed scan and return its raw buffer.
///
/// A failed read ends the scan before the error is returned.
pub(crate) fn run_scan(
    dev: &mut Device,
    regs: &mut RegisterSet,
    session: &ScanSession,
) -> ScanResult<Vec<u8>> {
    begin_scan(dev, regs, true)?;
    let data = match read_data(dev, session) {
        Ok(data) => data,
        Err(e) => {
            if let Err(stop) = end_scan(dev, regs, true) {
                warn!("ending a failed scan: {}", stop);
            }
            return Err(e);
        }
    };
    end_scan(dev, regs, true)?;
    if regs.is_set(REG_0X02, REG_0X02_MTRPWR) {
        dev.track_scan_motion(session);
    }
    Ok(data)
}

// ─── Strip search ───────────────────────────────────────────────────

/// Scan in `direction` until a strip of `color` shows up.
///
/// # Errors
/// `CalibrationTargetNotFound` after `STRIP_SEARCH_MAX_PASSES` passes
/// without a match.
pub fn search_strip(dev: &mut Device, direction: Direction, color: StripColor) -> ScanResult<()> {
    let dpi = dev.model.lowest_xdpi();
    let mut flags = ScanFlags::DISABLE_SHADING
        | ScanFlags::DISABLE_GAMMA
        | ScanFlags::IGNORE_LINE_DISTANCE;
    if direction == Direction::Backward {
        flags |= ScanFlags::REVERSE;
    }
    let params = ScanParams {
        xres: dpi,
        yres: dpi,
        startx: 0,
        starty: 0,
        pixels: dev.model.sensor.sensor_pixels * dpi / dev.model.sensor.optical_res,
        lines: dev.model.shading_lines.max(1),
        depth: 8,
        channels: 1,
        scan_mode: ScanMode::Gray,
        color_filter: ColorFilter::Green,
        flags,
    };
    let session = compute_session(&dev.model, &params, &dev.model.sensor)?;
    let mut regs = dev.reg.clone();
    program_session(dev, &mut regs, &session)?;

    for pass in 0..STRIP_SEARCH_MAX_PASSES {
        let data = run_scan(dev, &mut regs, &session)?;
        let view = ImageView::for_session(&data, &session, false)?;
        if find_strip(&view, color, direction) {
            info!(
                "{:?} strip found {:?} after {} passes, head at {}",
                color,
                direction,
                pass + 1,
                dev.scanhead_position_in_steps
            );
            return Ok(());
        }
        debug!("strip pass {}: no {:?} strip", pass + 1, color);
    }

    Err(ScanError::CalibrationTargetNotFound(format!(
        "no {color:?} strip found after {STRIP_SEARCH_MAX_PASSES} passes"
    )))
}
