//! The device aggregate.
//!
//! A [`Device`] owns everything that describes one attached scanner: its
//! static model, the transport, the working register set and the mirror of
//! what the hardware holds, the frontend codes, the tracked head position
//! and the current calibration. Every operation borrows it mutably for its
//! whole duration, which rules out interleaving at compile time.

use scan_common::hal::config::TimingConfig;
use scan_common::hal::error::ScanResult;
use scan_common::hal::model::{Frontend, ModelDescriptor};
use scan_common::hal::registers::RegisterSet;
use scan_common::hal::transport::ScannerTransport;
use scan_common::hal::types::{MotionState, ScanFlags, ScanSession};
use std::thread;
use tracing::trace;

use crate::calibration_cache::CalibrationEntry;

/// Head travel of the last programmed move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanTravel {
    /// Base steps moved before the first line is captured.
    pub lead_in_steps: u32,
    /// Pixel clocks per captured line.
    pub line_time: u32,
    /// Pixel clocks per base step at scan speed.
    pub step_time: u32,
}

impl ScanTravel {
    /// Base steps covered by a move capturing `lines` lines.
    pub fn distance(&self, lines: u32) -> u32 {
        let capture = if self.step_time == 0 {
            0
        } else {
            lines as u64 * self.line_time as u64 / self.step_time as u64
        };
        (self.lead_in_steps as u64 + capture).min(u32::MAX as u64) as u32
    }
}

/// One attached scanner.
pub struct Device {
    /// Static model description.
    pub model: ModelDescriptor,
    transport: Box<dyn ScannerTransport>,
    register_port: u8,
    /// Working register set, the state the next write should produce.
    pub reg: RegisterSet,
    mirror: RegisterSet,
    /// Registers as they were after the last successful calibration.
    /// Scans start from this snapshot when there is one.
    pub calib_reg: Option<RegisterSet>,
    /// Frontend codes in use.
    pub frontend: Frontend,
    /// Frontend codes after power-on.
    pub frontend_initial: Frontend,
    /// LED exposure per channel (CIS only).
    pub led_exposure: [u16; 3],
    /// Head position relative to home, in motor base steps.
    pub scanhead_position_in_steps: u32,
    /// Motion controller state.
    pub motion_state: MotionState,
    /// Travel of the move programmed last.
    pub scan_travel: ScanTravel,
    /// Polling intervals.
    pub timing: TimingConfig,
    /// Calibration applied to shaded scans.
    pub calibration: Option<CalibrationEntry>,
}

impl Device {
    /// Attach `transport` as a scanner of `model`.
    ///
    /// `register_port` is the bulk port accepting `address, value` pairs.
    pub fn new(
        model: ModelDescriptor,
        transport: Box<dyn ScannerTransport>,
        timing: TimingConfig,
        register_port: u8,
    ) -> Self {
        let frontend = model.frontend;
        let led_exposure = model.sensor.exposure;
        Self {
            model,
            transport,
            register_port,
            reg: RegisterSet::new(),
            mirror: RegisterSet::new(),
            calib_reg: None,
            frontend,
            frontend_initial: frontend,
            led_exposure,
            scanhead_position_in_steps: 0,
            motion_state: MotionState::Idle,
            scan_travel: ScanTravel::default(),
            timing,
            calibration: None,
        }
    }

    /// Read one register.
    pub fn read_register(&mut self, address: u8) -> ScanResult<u8> {
        let value = self.transport.read_register(address)?;
        trace!("read  0x{:02x} = 0x{:02x}", address, value);
        Ok(value)
    }

    /// Write one register and record it in the mirror.
    pub fn write_register(&mut self, address: u8, value: u8) -> ScanResult<()> {
        trace!("write 0x{:02x} = 0x{:02x}", address, value);
        self.transport.write_register(address, value)?;
        self.mirror.set8(address, value);
        Ok(())
    }

    /// Send every register of `regs` that differs from the hardware mirror.
    ///
    /// Returns the number of registers written.
    pub fn write_registers(&mut self, regs: &RegisterSet) -> ScanResult<usize> {
        let dirty = regs.diff(&self.mirror);
        if dirty.is_empty() {
            return Ok(0);
        }
        trace!("bulk write of {} registers", dirty.len());
        self.transport
            .bulk_write(self.register_port, &RegisterSet::encode_pairs(&dirty))?;
        self.mirror.apply(&dirty);
        Ok(dirty.len())
    }

    /// Forget what the hardware holds, so the next write sends everything.
    pub fn invalidate_mirror(&mut self) {
        self.mirror = RegisterSet::new();
    }

    /// Value last written to `address`, if any.
    pub fn mirrored(&self, address: u8) -> Option<u8> {
        self.mirror.has(address).then(|| self.mirror.get8(address))
    }

    /// Fill `buffer` from the bulk port at `address`.
    pub fn bulk_read(&mut self, address: u8, buffer: &mut [u8]) -> ScanResult<()> {
        self.transport.bulk_read(address, buffer)?;
        Ok(())
    }

    /// Write to the ASIC memory bus.
    pub fn raw_memory_write(&mut self, address: u32, data: &[u8]) -> ScanResult<()> {
        trace!("memory write of {} bytes at 0x{:08x}", data.len(), address);
        self.transport.raw_memory_write(address, data)?;
        Ok(())
    }

    /// Sleep one status poll interval.
    pub fn sleep_poll(&self) {
        let interval = self.timing.poll_interval();
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }

    /// Sleep one data poll interval.
    pub fn sleep_data_poll(&self) {
        let interval = self.timing.data_poll_interval();
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }

    /// Move the tracked head position by the distance a scan covered.
    ///
    /// The distance is the lead-in and capture travel of the programmed
    /// move, bounded by the ends of travel.
    pub fn track_scan_motion(&mut self, session: &ScanSession) {
        let params = session.params();
        if params.flags.contains(ScanFlags::SINGLE_LINE) {
            return;
        }
        let steps = self.scan_travel.distance(session.output_line_count);
        self.scanhead_position_in_steps = if params.flags.contains(ScanFlags::REVERSE) {
            self.scanhead_position_in_steps.saturating_sub(steps)
        } else {
            self.scanhead_position_in_steps
                .saturating_add(steps)
                .min(self.model.max_travel_steps)
        };
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("model", &self.model.name)
            .field("registers", &self.reg.len())
            .field("position", &self.scanhead_position_in_steps)
            .field("motion_state", &self.motion_state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_travel_distance() {
        let travel = ScanTravel {
            lead_in_steps: 600,
            line_time: 33000,
            step_time: 8250,
        };
        assert_eq!(travel.distance(0), 600);
        assert_eq!(travel.distance(600), 3000);

        // partial steps are dropped once, not per line
        let gray = ScanTravel {
            lead_in_steps: 34,
            line_time: 11000,
            step_time: 686,
        };
        assert_eq!(gray.distance(8), 34 + 128);

        assert_eq!(ScanTravel::default().distance(100), 0);
    }
}
