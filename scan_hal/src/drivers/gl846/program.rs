//! Session to register translation.
//!
//! Both blocks only touch the register set they are given. The motor block
//! returns the slope tables it derived so the caller can upload them.

use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::model::ModelDescriptor;
use scan_common::hal::registers::RegisterSet;
use scan_common::hal::types::{ColorFilter, ScanFlags, ScanSession, StepType};
use tracing::debug;

use super::registers::*;
use crate::device::ScanTravel;
use crate::profiles::{find_motor_profile, find_sensor_profile};
use crate::slope::{
    SlopeTable, build_slope_table, calculate_zmod, corrected_feed_length, ramp_distance,
};

/// Slope tables of one programmed move.
#[derive(Debug, Clone)]
pub struct MotorTables {
    /// Acceleration to scan speed.
    pub scan: SlopeTable,
    /// Acceleration to fast feed speed.
    pub fast: SlopeTable,
    /// Head travel of the programmed move.
    pub travel: ScanTravel,
}

/// Program the sensor, frontend mode and pixel window for `session`.
///
/// # Errors
/// - `ProfileNotFound` if the sensor has no timing for the session resolution
/// - `UnsupportedConfiguration` if a field does not fit its register
pub fn program_optical(
    model: &ModelDescriptor,
    regs: &mut RegisterSet,
    session: &ScanSession,
    led_exposure: [u16; 3],
) -> ScanResult<()> {
    session.assert_computed();
    let params = session.params();
    let sensor = &model.sensor;

    let profile = find_sensor_profile(sensor, session.hw_dpi)?;
    for (address, value) in &profile.custom_regs {
        regs.set8(*address, *value);
    }

    regs.set16(REG_STRPIXEL, session.pixel_startx)?;
    regs.set16(REG_ENDPIXEL, session.pixel_endx)?;

    regs.clear_bits(REG_0X01, REG_0X01_SCAN);
    if model.is_cis {
        regs.set_bits(REG_0X01, REG_0X01_CISSET);
    } else {
        regs.clear_bits(REG_0X01, REG_0X01_CISSET);
    }
    if params.flags.contains(ScanFlags::DISABLE_SHADING) {
        regs.clear_bits(REG_0X01, REG_0X01_DVDSET);
    } else {
        regs.set_bits(REG_0X01, REG_0X01_DVDSET);
    }
    regs.set_bits(REG_0X01, REG_0X01_SHDAREA);
    if session.num_staggered_lines > 0 {
        regs.set_bits(REG_0X01, REG_0X01_STAGGER);
    } else {
        regs.clear_bits(REG_0X01, REG_0X01_STAGGER);
    }

    if params.flags.contains(ScanFlags::DISABLE_LAMP) {
        regs.clear_bits(REG_0X03, REG_0X03_LAMPPWR);
    } else {
        regs.set_bits(REG_0X03, REG_0X03_LAMPPWR);
    }

    regs.clear_bits(REG_0X04, REG_0X04_LINEART);
    if params.depth == 16 {
        regs.set_bits(REG_0X04, REG_0X04_BITSET);
    } else {
        regs.clear_bits(REG_0X04, REG_0X04_BITSET);
    }
    if params.channels == 3 {
        regs.set_masked(REG_0X04, REG_0X04_AFEMOD | REG_0X04_FILTER, REG_0X04_AFEMOD_COLOR);
    } else {
        let filter = match params.color_filter {
            ColorFilter::Red => 0x04,
            ColorFilter::Green => 0x08,
            ColorFilter::Blue => 0x0c,
        };
        regs.set_masked(
            REG_0X04,
            REG_0X04_AFEMOD | REG_0X04_FILTER,
            REG_0X04_AFEMOD_MONO | filter,
        );
    }

    regs.set_masked(REG_0X05, REG_0X05_DPIHW, dpihw_bits(session.hw_dpi)?);
    if params.depth < 16 && !params.flags.contains(ScanFlags::DISABLE_GAMMA) {
        regs.set_bits(REG_0X05, REG_0X05_GMMENB);
    } else {
        regs.clear_bits(REG_0X05, REG_0X05_GMMENB);
    }

    regs.set16(REG_DPISET, session.dpiset)?;
    regs.set8(REG_DUMMY, sensor.dummy_pixel.min(u8::MAX as u32) as u8);
    regs.set24(REG_MAXWD, session.output_line_bytes_raw)?;
    regs.set16(REG_LPERIOD, session.exposure_time)?;

    let exposure = if model.is_cis { led_exposure } else { sensor.exposure };
    for (address, value) in [REG_EXPR, REG_EXPG, REG_EXPB].into_iter().zip(exposure) {
        regs.set16(address, value as u32)?;
    }

    Ok(())
}

/// Program the motor for `session` and return the slope tables to upload.
///
/// # Errors
/// - `ProfileNotFound` if the motor has no profile for the session exposure
/// - `InvalidParameters` if the requested speed is out of range
/// - `UnsupportedConfiguration` if a field does not fit its register
pub fn program_motor(
    model: &ModelDescriptor,
    regs: &mut RegisterSet,
    session: &ScanSession,
    multiplier: u32,
) -> ScanResult<MotorTables> {
    session.assert_computed();
    let params = session.params();
    let motor = &model.motor;
    let exposure = session.exposure_time;

    let profile = find_motor_profile(&motor.profiles, motor.motor_id, exposure)?;
    let step_type = profile.step_type;

    let slope_dpi = if model.is_cis && params.channels == 3 {
        params.yres * params.channels
    } else {
        params.yres
    };
    let scan = build_slope_table(
        slope_dpi,
        exposure,
        motor.base_ydpi,
        step_type,
        multiplier,
        motor.motor_id,
        &motor.profiles,
    )?;

    let fast_step = step_type.min(StepType::Quarter);
    let mut fast = build_slope_table(
        model.lowest_ydpi(),
        exposure,
        motor.base_ydpi,
        fast_step,
        multiplier,
        motor.motor_id,
        &motor.profiles,
    )?;
    if fast.len() > 1 {
        let second = fast.table[1];
        fast.set_first(second);
    }

    regs.set24(REG_LINCNT, session.output_line_count)?;

    if params.flags.contains(ScanFlags::SINGLE_LINE) {
        regs.clear_bits(REG_0X02, REG_0X02_MTRPWR);
    } else {
        regs.set_bits(REG_0X02, REG_0X02_MTRPWR);
    }
    regs.clear_bits(REG_0X02, REG_0X02_AGOHOME);
    if params.flags.contains(ScanFlags::REVERSE) {
        regs.set_bits(REG_0X02, REG_0X02_MTRREV);
    } else {
        regs.clear_bits(REG_0X02, REG_0X02_MTRREV);
    }
    if params.flags.contains(ScanFlags::DISABLE_BUFFER_FULL_MOVE) {
        regs.set_bits(REG_0X02, REG_0X02_ACDCDIS);
    } else {
        regs.clear_bits(REG_0X02, REG_0X02_ACDCDIS);
    }

    regs.set16(REG_STEPNO, scan.steps_count)?;
    regs.set16(REG_FASTNO, fast.steps_count)?;
    regs.set16(REG_FSHDEC, scan.steps_count)?;
    regs.set16(REG_FMOVNO, fast.steps_count)?;
    regs.set16(REG_FMOVDEC, fast.steps_count)?;

    let feeding = params.flags.contains(ScanFlags::FEEDING);
    let use_fast_fed = !feeding && params.starty >= motor.fast_feed_threshold;
    let decsel = if regs.has(REG_0X5E) {
        (regs.get8(REG_0X5E) & REG_0X5E_DECSEL) as u32
    } else {
        0
    };
    let fedcnt = if regs.has(REG_FEDCNT) {
        regs.get8(REG_FEDCNT) as u32
    } else {
        0
    };
    let ramp = ramp_distance(
        scan.steps_count,
        fast.steps_count,
        multiplier,
        use_fast_fed,
        feeding,
        decsel,
        fedcnt,
    );
    let feedl = corrected_feed_length(params.starty << step_type.shift(), ramp);
    regs.set24(REG_FEEDL, feedl)?;
    if use_fast_fed {
        regs.set_bits(REG_0X02, REG_0X02_FASTFED);
    } else {
        regs.clear_bits(REG_0X02, REG_0X02_FASTFED);
    }

    let min_restep = (scan.steps_count / 2).saturating_sub(1).max(1);
    regs.set16(REG_FWDSTEP, min_restep)?;
    regs.set16(REG_BWDSTEP, min_restep)?;

    let ccdlmt = if regs.has(REG_0X0C) {
        (regs.get8(REG_0X0C) & REG_0X0C_CCDLMT) as u32 + 1
    } else {
        1
    };
    let tgtime = if regs.has(REG_0X1C) {
        1u32 << (regs.get8(REG_0X1C) & REG_0X1C_TGTIME)
    } else {
        1
    };
    let effective_exposure = exposure * ccdlmt * tgtime;
    if effective_exposure >= 1 << ZMOD_STEP_SHIFT {
        return Err(ScanError::UnsupportedConfiguration(format!(
            "effective line period {effective_exposure} does not fit Z1MOD"
        )));
    }
    // The ASIC walks `multiplier` table entries per step.
    let (z1, z2) = calculate_zmod(
        use_fast_fed,
        effective_exposure,
        &scan.table,
        scan.steps_count * multiplier,
        feedl,
        min_restep * multiplier,
    );
    regs.set24(REG_Z1MOD, z1 | (step_type as u32) << ZMOD_STEP_SHIFT)?;
    regs.set24(REG_Z2MOD, z2 | (fast_step as u32) << ZMOD_STEP_SHIFT)?;

    debug!(
        "motor: {:?} scan steps={} fast steps={} feedl={} fast_fed={}",
        step_type, scan.steps_count, fast.steps_count, feedl, use_fast_fed
    );

    let shift = step_type.shift();
    let line_time = if model.is_cis && params.channels == 3 {
        exposure * params.channels
    } else {
        exposure
    };
    let travel = ScanTravel {
        lead_in_steps: (feedl + ramp) >> shift,
        line_time,
        step_time: (scan.last() as u32) << shift,
    };

    Ok(MotorTables { scan, fast, travel })
}
