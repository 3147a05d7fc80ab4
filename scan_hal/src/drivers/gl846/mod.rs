//! GL846 command set.
//!
//! Bring-up, frontend access and the [`CommandSet`] implementation. The
//! register translation lives in [`program`], head motion and the scan
//! lifecycle in [`motion`], the calibration sequences in [`calibration`].

pub mod calibration;
pub mod motion;
pub mod program;
pub mod registers;

use scan_common::hal::consts::{SLOPE_TABLE_BASE, SLOPE_TABLE_STRIDE};
use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::registers::RegisterSet;
use scan_common::hal::types::{Direction, ScanSession, StripColor};
use tracing::{debug, info};

use crate::calibration::ShadingTable;
use crate::command_set::{CommandSet, FrontendAction};
use crate::device::Device;

use self::program::{MotorTables, program_motor, program_optical};
use self::registers::*;

/// ASIC family name.
pub const GL846_NAME: &str = "gl846";

/// Command set of the GL846 family.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gl846;

/// Factory function registered under [`GL846_NAME`].
pub fn create_command_set() -> Box<dyn CommandSet> {
    Box::new(Gl846)
}

// ─── Shared helpers ─────────────────────────────────────────────────

/// Program `regs` for `session` and upload its slope tables.
pub(crate) fn program_session(
    dev: &mut Device,
    regs: &mut RegisterSet,
    session: &ScanSession,
) -> ScanResult<()> {
    program_optical(&dev.model, regs, session, dev.led_exposure)?;
    let tables = program_motor(&dev.model, regs, session, step_multiplier(regs))?;
    upload_slope_tables(dev, &tables)?;
    dev.scan_travel = tables.travel;
    Ok(())
}

fn upload_slope_tables(dev: &mut Device, tables: &MotorTables) -> ScanResult<()> {
    let slots = [
        (SlopeSlot::Scan, &tables.scan),
        (SlopeSlot::Backtrack, &tables.scan),
        (SlopeSlot::Stop, &tables.scan),
        (SlopeSlot::Fast, &tables.fast),
        (SlopeSlot::Home, &tables.fast),
    ];
    for (slot, table) in slots {
        let address = SLOPE_TABLE_BASE + slot as u32 * SLOPE_TABLE_STRIDE;
        dev.raw_memory_write(address, &table.to_bytes())?;
    }
    Ok(())
}

fn write_fe(dev: &mut Device, address: u8, value: u8) -> ScanResult<()> {
    dev.write_register(REG_FE_ADDRESS, address)?;
    dev.write_register(REG_FE_DATA_HI, 0)?;
    dev.write_register(REG_FE_DATA_LO, value)
}

/// Write the frontend codes held by `dev`.
///
/// # Errors
/// `UnsupportedConfiguration` if FESET selects a frontend other than the
/// Wolfson layout.
pub(crate) fn set_fe(dev: &mut Device, action: FrontendAction) -> ScanResult<()> {
    let reg04 = if dev.reg.has(REG_0X04) {
        dev.reg.get8(REG_0X04)
    } else {
        dev.read_register(REG_0X04)?
    };
    let feset = reg04 & REG_0X04_FESET;
    if feset != FESET_WOLFSON {
        return Err(ScanError::UnsupportedConfiguration(format!(
            "frontend type {feset:#04x} is not supported"
        )));
    }

    if action == FrontendAction::Init {
        dev.frontend = dev.frontend_initial;
    }
    let fe = dev.frontend;
    for (i, value) in fe.config.iter().enumerate() {
        write_fe(dev, FE_CONFIG_BASE + i as u8, *value)?;
    }
    for (i, value) in fe.offset.iter().enumerate() {
        write_fe(dev, FE_OFFSET_BASE + i as u8, *value)?;
    }
    for (i, value) in fe.gain.iter().enumerate() {
        write_fe(dev, FE_GAIN_BASE + i as u8, *value)?;
    }
    debug!("frontend {:?}: offset {:?} gain {:?}", action, fe.offset, fe.gain);
    Ok(())
}

impl CommandSet for Gl846 {
    fn name(&self) -> &'static str {
        GL846_NAME
    }

    fn register_port(&self) -> u8 {
        REGISTER_PORT
    }

    fn init_registers(&self, dev: &mut Device) {
        let mut regs = RegisterSet::new();
        load_defaults(&mut regs);
        if dev.model.is_cis {
            regs.set_bits(REG_0X01, REG_0X01_CISSET);
        }
        dev.reg = regs;
    }

    fn is_cold(&self, dev: &mut Device) -> ScanResult<bool> {
        let reg06 = dev.read_register(REG_0X06)?;
        Ok(reg06 & REG_0X06_PWRBIT == 0)
    }

    fn boot(&self, dev: &mut Device, cold: bool) -> ScanResult<()> {
        if cold {
            dev.write_register(REG_0X0E, 0x01)?;
            dev.write_register(REG_0X0E, 0x00)?;
        }
        if dev.reg.is_empty() {
            self.init_registers(dev);
        }
        dev.invalidate_mirror();
        let regs = dev.reg.clone();
        let written = dev.write_registers(&regs)?;

        let dram = dev.reg.get8(REG_0X0B) | REG_0X0B_ENBDRAM;
        dev.reg.set8(REG_0X0B, dram);
        dev.write_register(REG_0X0B, dram)?;

        if motion::read_status(dev)?.contains(Status::CHKVER) {
            let version = dev.read_register(REG_0X00)?;
            debug!("{} chip version 0x{:02x}", GL846_NAME, version);
        }

        set_fe(dev, FrontendAction::Init)?;
        info!(
            "{} booted ({} start, {} registers)",
            GL846_NAME,
            if cold { "cold" } else { "warm" },
            written
        );
        Ok(())
    }

    fn set_fe(&self, dev: &mut Device, action: FrontendAction) -> ScanResult<()> {
        set_fe(dev, action)
    }

    fn init_regs_for_scan_session(
        &self,
        dev: &mut Device,
        regs: &mut RegisterSet,
        session: &ScanSession,
    ) -> ScanResult<()> {
        program_session(dev, regs, session)
    }

    fn begin_scan(&self, dev: &mut Device, regs: &mut RegisterSet, start_motor: bool) -> ScanResult<()> {
        motion::begin_scan(dev, regs, start_motor)
    }

    fn read_data(&self, dev: &mut Device, session: &ScanSession) -> ScanResult<Vec<u8>> {
        motion::read_data(dev, session)
    }

    fn end_scan(&self, dev: &mut Device, regs: &mut RegisterSet, check_stop: bool) -> ScanResult<()> {
        motion::end_scan(dev, regs, check_stop)
    }

    fn start_action(&self, dev: &mut Device) -> ScanResult<()> {
        motion::start_action(dev)
    }

    fn stop_action(&self, dev: &mut Device) -> ScanResult<()> {
        motion::stop_action(dev)
    }

    fn slow_back_home(&self, dev: &mut Device, wait_until_home: bool) -> ScanResult<()> {
        motion::slow_back_home(dev, wait_until_home)
    }

    fn feed(&self, dev: &mut Device, steps: u32) -> ScanResult<()> {
        motion::feed(dev, steps)
    }

    fn search_strip(&self, dev: &mut Device, direction: Direction, color: StripColor) -> ScanResult<()> {
        motion::search_strip(dev, direction, color)
    }

    fn offset_calibration(&self, dev: &mut Device, calib_xres: u32) -> ScanResult<()> {
        calibration::offset_calibration(dev, calib_xres)
    }

    fn coarse_gain_calibration(&self, dev: &mut Device, calib_xres: u32, target_xres: u32) -> ScanResult<()> {
        calibration::coarse_gain_calibration(dev, calib_xres, target_xres)
    }

    fn led_calibration(&self, dev: &mut Device, calib_xres: u32) -> ScanResult<()> {
        calibration::led_calibration(dev, calib_xres)
    }

    fn shading_calibration(&self, dev: &mut Device, calib_xres: u32) -> ScanResult<ShadingTable> {
        calibration::shading_calibration(dev, calib_xres)
    }

    fn send_shading_data(
        &self,
        dev: &mut Device,
        session: &ScanSession,
        table: &ShadingTable,
        calib_xres: u32,
    ) -> ScanResult<()> {
        calibration::send_shading_data(dev, session, table, calib_xres)
    }
}
