//! ASIC command set interface.
//!
//! A command set knows how one ASIC family maps sessions onto registers and
//! how it moves the head and runs calibration. Operations take the
//! [`Device`] they act on; the command set itself holds no device state.

use scan_common::hal::error::ScanResult;
use scan_common::hal::registers::RegisterSet;
use scan_common::hal::types::{Direction, ScanSession, StripColor};

use crate::calibration::ShadingTable;
use crate::device::Device;

/// What [`CommandSet::set_fe`] should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendAction {
    /// Restore the power-on frontend values, then write them.
    Init,
    /// Write the current frontend values.
    Set,
}

/// Factory function type for command set creation.
pub type CommandSetFactory = fn() -> Box<dyn CommandSet>;

/// Operations of one ASIC family.
pub trait CommandSet: Send {
    /// ASIC family name.
    fn name(&self) -> &'static str;

    /// Bulk port accepting `address, value` register pairs.
    fn register_port(&self) -> u8;

    // ─── Bring-up ───────────────────────────────────────────────────

    /// Load the family default registers into `dev.reg`.
    fn init_registers(&self, dev: &mut Device);

    /// Whether the ASIC lost power since the last boot.
    fn is_cold(&self, dev: &mut Device) -> ScanResult<bool>;

    /// Bring the ASIC into a known state.
    fn boot(&self, dev: &mut Device, cold: bool) -> ScanResult<()>;

    /// Program the analog frontend.
    fn set_fe(&self, dev: &mut Device, action: FrontendAction) -> ScanResult<()>;

    // ─── Register programming ───────────────────────────────────────

    /// Translate `session` into `regs` and upload its motor tables.
    ///
    /// Records the travel of the programmed move on `dev`.
    fn init_regs_for_scan_session(
        &self,
        dev: &mut Device,
        regs: &mut RegisterSet,
        session: &ScanSession,
    ) -> ScanResult<()>;

    // ─── Scan lifecycle ─────────────────────────────────────────────

    /// Write `regs` and start acquisition.
    fn begin_scan(&self, dev: &mut Device, regs: &mut RegisterSet, start_motor: bool) -> ScanResult<()>;

    /// Read the whole raw buffer of `session`.
    fn read_data(&self, dev: &mut Device, session: &ScanSession) -> ScanResult<Vec<u8>>;

    /// Stop acquisition, optionally waiting for the motor to stop.
    fn end_scan(&self, dev: &mut Device, regs: &mut RegisterSet, check_stop: bool) -> ScanResult<()>;

    // ─── Motion ─────────────────────────────────────────────────────

    /// Start the motor with the registers already written.
    fn start_action(&self, dev: &mut Device) -> ScanResult<()>;

    /// Stop the motor and the data path.
    fn stop_action(&self, dev: &mut Device) -> ScanResult<()>;

    /// Return the head to the home sensor.
    fn slow_back_home(&self, dev: &mut Device, wait_until_home: bool) -> ScanResult<()>;

    /// Move the head forward by `steps` base steps without scanning.
    fn feed(&self, dev: &mut Device, steps: u32) -> ScanResult<()>;

    /// Scan in `direction` until a strip of `color` is found.
    fn search_strip(&self, dev: &mut Device, direction: Direction, color: StripColor) -> ScanResult<()>;

    // ─── Calibration ────────────────────────────────────────────────

    /// Search the frontend offset codes.
    fn offset_calibration(&self, dev: &mut Device, calib_xres: u32) -> ScanResult<()>;

    /// Set the frontend gain codes for scans at `target_xres`.
    fn coarse_gain_calibration(&self, dev: &mut Device, calib_xres: u32, target_xres: u32) -> ScanResult<()>;

    /// Tune the LED exposure times.
    fn led_calibration(&self, dev: &mut Device, calib_xres: u32) -> ScanResult<()>;

    /// Capture dark and white references and build the shading table.
    fn shading_calibration(&self, dev: &mut Device, calib_xres: u32) -> ScanResult<ShadingTable>;

    /// Upload the part of `table` that `session` needs.
    fn send_shading_data(
        &self,
        dev: &mut Device,
        session: &ScanSession,
        table: &ShadingTable,
        calib_xres: u32,
    ) -> ScanResult<()>;
}
