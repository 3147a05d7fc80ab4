//! Register-level model of a GL846 ASIC with its frontend, motor and
//! data buffer.
//!
//! Register writes have the side effects the command set relies on: 0x0e
//! resets, 0x0f starts, clearing SCAN in 0x01 halts, the frontend low byte
//! commits to the AFE. Time only advances when the status register 0x41
//! is read, so a test run is deterministic whatever the poll intervals.

use std::collections::BTreeMap;

use scan_common::hal::consts::{SHADING_BANK_STRIDE, SHADING_BASE, SLOPE_TABLE_BASE};
use scan_common::hal::error::{TransportError, TransportOp};
use scan_common::hal::model::ModelDescriptor;
use scan_common::hal::types::StepType;
use tracing::trace;

use super::optics::{LAMP_EFFICIENCY, LED_EFFICIENCY, LineSetup, SimLayout};
use super::{SimCounters, SimFault};
use crate::drivers::gl846::registers::*;
use crate::slope::ramp_distance;

/// Value of the chip version register.
pub const CHIP_VERSION: u8 = 0x46;

/// Base steps covered between two status polls.
pub const HEAD_STEPS_PER_POLL: f64 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Idle,
    Scanning,
    Feeding { remaining: f64 },
    Homing,
}

/// Mutable state behind a [`super::SimulatedScanner`].
#[derive(Debug)]
pub(crate) struct SimState {
    model: ModelDescriptor,
    pub(crate) layout: SimLayout,
    regs: [u8; 256],
    afe: [u8; 256],
    memory: BTreeMap<u32, Vec<u8>>,
    pub(crate) head_y: f64,
    motion: Motion,
    stuck: bool,
    feed_done: bool,
    scan_done: bool,
    data: Vec<u8>,
    read_pos: usize,
    valid_snapshot: u32,
    pub(crate) faults: Vec<SimFault>,
    pub(crate) counters: SimCounters,
}

impl SimState {
    /// Powered-off device: every register reads zero, so PWRBIT is clear.
    pub(crate) fn new(model: ModelDescriptor, layout: SimLayout) -> Self {
        Self {
            model,
            layout,
            regs: [0; 256],
            afe: [0; 256],
            memory: BTreeMap::new(),
            head_y: 0.0,
            motion: Motion::Idle,
            stuck: false,
            feed_done: false,
            scan_done: false,
            data: Vec::new(),
            read_pos: 0,
            valid_snapshot: 0,
            faults: Vec::new(),
            counters: SimCounters::default(),
        }
    }

    pub(crate) fn has_fault(&self, fault: SimFault) -> bool {
        self.faults.contains(&fault)
    }

    fn check_link(&self, op: TransportOp, address: u32) -> Result<(), TransportError> {
        if self.has_fault(SimFault::TransportFailure) {
            return Err(TransportError::new(op, address, "simulated link failure"));
        }
        Ok(())
    }

    fn get16(&self, address: u8) -> u32 {
        let a = address as usize;
        self.regs[a] as u32 | (self.regs[a + 1] as u32) << 8
    }

    fn get24(&self, address: u8) -> u32 {
        let a = address as usize;
        self.get16(address) | (self.regs[a + 2] as u32) << 16
    }

    fn max_travel(&self) -> f64 {
        self.model.max_travel_steps as f64
    }

    fn clamp_head(&self, y: f64) -> f64 {
        y.clamp(0.0, self.max_travel())
    }

    // ─── Probes ─────────────────────────────────────────────────────

    pub(crate) fn peek(&self, address: u8) -> u8 {
        self.regs[address as usize]
    }

    pub(crate) fn afe(&self, address: u8) -> u8 {
        self.afe[address as usize]
    }

    pub(crate) fn memory(&self, address: u32) -> Option<&[u8]> {
        self.memory.get(&address).map(Vec::as_slice)
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    // ─── Status ─────────────────────────────────────────────────────

    fn motor_busy(&self) -> bool {
        self.stuck || self.motion != Motion::Idle
    }

    fn home_sensor(&self) -> bool {
        self.head_y <= 0.0 && !self.has_fault(SimFault::HomeSensorDead)
    }

    fn status(&self) -> Status {
        let mut status = Status::CHKVER;
        if self.motion == Motion::Scanning {
            status |= Status::DATAENB;
        }
        if self.motor_busy() {
            status |= Status::MOTMFLG | Status::MOTORENB;
        }
        if self.home_sensor() {
            status |= Status::HOMESNR;
        }
        if self.feed_done {
            status |= Status::FEEDFSH;
        }
        if self.scan_done {
            status |= Status::SCANFSH;
        }
        if self.pending_bytes() == 0 {
            status |= Status::BUFEMPTY;
        }
        status
    }

    /// Advance the head by one poll interval.
    fn tick(&mut self) {
        match self.motion {
            Motion::Homing => {
                self.head_y = (self.head_y - HEAD_STEPS_PER_POLL).max(0.0);
                if self.home_sensor() {
                    self.motion = Motion::Idle;
                }
            }
            Motion::Feeding { remaining } => {
                if self.has_fault(SimFault::FeedStalled) {
                    return;
                }
                let step = remaining.min(HEAD_STEPS_PER_POLL);
                self.head_y = self.clamp_head(self.head_y + step);
                let left = remaining - step;
                if left <= 0.0 {
                    self.motion = Motion::Idle;
                    self.feed_done = true;
                } else {
                    self.motion = Motion::Feeding { remaining: left };
                }
            }
            Motion::Idle | Motion::Scanning => {}
        }
    }

    fn valid_bytes(&self) -> u32 {
        if self.has_fault(SimFault::DataStarved) {
            return 0;
        }
        self.pending_bytes().min(0xff_ffff) as u32
    }

    // ─── Register side effects ──────────────────────────────────────

    pub(crate) fn read_register(&mut self, address: u8) -> Result<u8, TransportError> {
        self.check_link(TransportOp::ReadRegister, address as u32)?;
        let value = match address {
            REG_0X00 => CHIP_VERSION,
            REG_0X40 => (self.status().bits() & 0xff) as u8,
            REG_0X41 => {
                self.counters.status_polls += 1;
                self.tick();
                (self.status().bits() >> 8) as u8
            }
            REG_VALIDWORD => {
                self.valid_snapshot = self.valid_bytes();
                self.valid_snapshot as u8
            }
            a if a == REG_VALIDWORD + 1 => (self.valid_snapshot >> 8) as u8,
            a if a == REG_VALIDWORD + 2 => (self.valid_snapshot >> 16) as u8,
            other => self.regs[other as usize],
        };
        Ok(value)
    }

    pub(crate) fn write_register(&mut self, address: u8, value: u8) -> Result<(), TransportError> {
        self.check_link(TransportOp::WriteRegister, address as u32)?;
        self.counters.register_writes += 1;
        self.apply_write(address, value);
        Ok(())
    }

    pub(crate) fn bulk_write(&mut self, address: u8, data: &[u8]) -> Result<(), TransportError> {
        self.check_link(TransportOp::BulkWrite, address as u32)?;
        if address != REGISTER_PORT {
            return Err(TransportError::new(
                TransportOp::BulkWrite,
                address as u32,
                "no bulk endpoint at this port",
            ));
        }
        if data.len() % 2 != 0 {
            return Err(TransportError::new(
                TransportOp::BulkWrite,
                address as u32,
                format!("register block of {} bytes is not made of pairs", data.len()),
            ));
        }
        self.counters.bulk_writes += 1;
        for pair in data.chunks_exact(2) {
            self.counters.register_writes += 1;
            self.apply_write(pair[0], pair[1]);
        }
        Ok(())
    }

    pub(crate) fn bulk_read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), TransportError> {
        self.check_link(TransportOp::BulkRead, address as u32)?;
        if address != DATA_PORT {
            return Err(TransportError::new(
                TransportOp::BulkRead,
                address as u32,
                "no bulk endpoint at this port",
            ));
        }
        if buffer.len() > self.pending_bytes() {
            return Err(TransportError::new(
                TransportOp::BulkRead,
                address as u32,
                format!(
                    "requested {} bytes, {} buffered",
                    buffer.len(),
                    self.pending_bytes()
                ),
            ));
        }
        let end = self.read_pos + buffer.len();
        buffer.copy_from_slice(&self.data[self.read_pos..end]);
        self.read_pos = end;
        if self.pending_bytes() == 0 && self.motion == Motion::Scanning {
            self.motion = Motion::Idle;
            self.scan_done = true;
        }
        Ok(())
    }

    pub(crate) fn raw_memory_write(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        self.check_link(TransportOp::MemoryWrite, address)?;
        self.counters.memory_writes += 1;
        self.memory.insert(address, data.to_vec());
        Ok(())
    }

    fn apply_write(&mut self, address: u8, value: u8) {
        if address == REG_0X0E {
            self.reset();
            return;
        }
        self.regs[address as usize] = value;
        match address {
            REG_0X01 if value & REG_0X01_SCAN == 0 => self.halt(),
            REG_0X0F if value & 0x01 != 0 => self.start(),
            REG_FE_DATA_LO => {
                let target = self.regs[REG_FE_ADDRESS as usize];
                self.afe[target as usize] = value;
                self.counters.afe_writes += 1;
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        trace!("sim: ASIC reset");
        self.regs = [0; 256];
        self.afe = [0; 256];
        self.motion = Motion::Idle;
        self.stuck = false;
        self.feed_done = false;
        self.scan_done = false;
        self.data.clear();
        self.read_pos = 0;
        self.counters.resets += 1;
    }

    fn halt(&mut self) {
        if self.stuck || self.motion == Motion::Idle {
            return;
        }
        trace!("sim: motion halted at {:.1}", self.head_y);
        if self.motion == Motion::Scanning {
            self.data.clear();
            self.read_pos = 0;
        }
        self.motion = Motion::Idle;
    }

    // ─── Motion ─────────────────────────────────────────────────────

    fn step_type(&self) -> StepType {
        let bits = (self.get24(REG_Z1MOD) >> ZMOD_STEP_SHIFT) & 0x07;
        StepType::from_bits(bits as u8).unwrap_or(StepType::Full)
    }

    fn multiplier(&self) -> u32 {
        match self.regs[REG_0X9D as usize] & REG_0X9D_STEPTIM {
            0x00 => 1,
            0x08 => 4,
            _ => 2,
        }
    }

    /// Distance of the programmed move before data capture, in base steps.
    fn programmed_feed(&self, feeding: bool) -> f64 {
        let ramp = ramp_distance(
            self.get16(REG_STEPNO),
            self.get16(REG_FASTNO),
            self.multiplier(),
            self.regs[REG_0X02 as usize] & REG_0X02_FASTFED != 0,
            feeding,
            (self.regs[REG_0X5E as usize] & REG_0X5E_DECSEL) as u32,
            self.regs[REG_FEDCNT as usize] as u32,
        );
        ((self.get24(REG_FEEDL) + ramp) >> self.step_type().shift()) as f64
    }

    /// Pixel clocks per captured line and per base step at scan speed.
    fn line_timing(&self, colour_cis: bool) -> Option<(u64, u64)> {
        let last = self
            .memory
            .get(&SLOPE_TABLE_BASE)
            .filter(|table| table.len() >= 2)
            .map(|table| u16::from_le_bytes([table[table.len() - 2], table[table.len() - 1]]))
            .unwrap_or(0);
        if last == 0 {
            return None;
        }
        let line_time = self.get16(REG_LPERIOD) as u64 * if colour_cis { 3 } else { 1 };
        Some((line_time, (last as u64) << self.step_type().shift()))
    }

    fn start(&mut self) {
        self.counters.motor_starts += 1;
        if self.has_fault(SimFault::MotorStuck) {
            self.stuck = true;
        }
        self.feed_done = false;
        self.scan_done = false;

        let reg01 = self.regs[REG_0X01 as usize];
        let reg02 = self.regs[REG_0X02 as usize];
        if reg01 & REG_0X01_SCAN != 0 {
            self.start_scan();
        } else if reg02 & REG_0X02_MTRPWR != 0 {
            if reg02 & REG_0X02_MTRREV != 0 {
                trace!("sim: homing from {:.1}", self.head_y);
                self.motion = Motion::Homing;
            } else {
                let remaining = self.programmed_feed(true);
                trace!("sim: feeding {:.1} steps from {:.1}", remaining, self.head_y);
                self.motion = Motion::Feeding { remaining };
            }
        }
    }

    fn line_setup(&self) -> LineSetup {
        let reg04 = self.regs[REG_0X04 as usize];
        let channels = if reg04 & REG_0X04_AFEMOD == REG_0X04_AFEMOD_COLOR { 3 } else { 1 };
        let bytes_per_sample = if reg04 & REG_0X04_BITSET != 0 { 2 } else { 1 };
        let pixels = self.get24(REG_MAXWD) as usize / (bytes_per_sample * channels);

        let sensor = &self.model.sensor;
        let ppsp = sensor.ccd_pixels_per_system_pixel.max(1);
        let hw_dpi = hw_dpi_from_bits(self.regs[REG_0X05 as usize]);
        let unit = (sensor.optical_res / hw_dpi).max(1) * ppsp;
        let dpiset = self.get16(REG_DPISET).max(1);

        let illumination = if self.regs[REG_0X03 as usize] & REG_0X03_LAMPPWR == 0 {
            [0.0; 3]
        } else if self.model.is_cis {
            let exposure = [REG_EXPR, REG_EXPG, REG_EXPB].map(|reg| self.get16(reg) as f64);
            [0, 1, 2].map(|c| exposure[c] * LED_EFFICIENCY[c])
        } else {
            let lperiod = self.get16(REG_LPERIOD) as f64;
            LAMP_EFFICIENCY.map(|efficiency| lperiod * efficiency)
        };

        let shading = (self.regs[REG_0X01 as usize] & REG_0X01_DVDSET != 0).then(|| {
            REG_SHADING_BANKS.map(|reg| {
                let bank = self.regs[reg as usize] as u32;
                self.memory
                    .get(&(SHADING_BASE + bank * SHADING_BANK_STRIDE))
                    .cloned()
                    .unwrap_or_default()
            })
        });

        LineSetup {
            first_column: self.get16(REG_STRPIXEL) * unit,
            column_step: sensor.optical_res as f64 * ppsp as f64 / dpiset as f64,
            pixels,
            channels,
            bytes_per_sample,
            planar: self.regs[REG_0X01 as usize] & REG_0X01_CISSET != 0 && channels == 3,
            black_pixels: sensor.black_pixels,
            illumination,
            filter_channel: match reg04 & REG_0X04_FILTER {
                0x04 => 0,
                0x0c => 2,
                _ => 1,
            },
            gain: [0, 1, 2].map(|c| self.afe[FE_GAIN_BASE as usize + c]),
            offset: [0, 1, 2].map(|c| self.afe[FE_OFFSET_BASE as usize + c]),
            shading,
        }
    }

    fn start_scan(&mut self) {
        let setup = self.line_setup();
        let lines = self.get24(REG_LINCNT) as usize;
        let reg02 = self.regs[REG_0X02 as usize];
        let moving = reg02 & REG_0X02_MTRPWR != 0;
        let direction = if reg02 & REG_0X02_MTRREV != 0 { -1.0 } else { 1.0 };

        // The motor runs whole steps: lines render at fractional positions,
        // the head stops on the last whole step.
        let (per_line, travel) = if moving {
            let feed = self.programmed_feed(false);
            self.head_y = self.clamp_head(self.head_y + direction * feed);
            match self.line_timing(self.model.is_cis && setup.channels == 3) {
                Some((line_time, step_time)) => (
                    line_time as f64 / step_time as f64,
                    (lines as u64 * line_time / step_time) as f64,
                ),
                None => (0.0, 0.0),
            }
        } else {
            (0.0, 0.0)
        };

        let mut data = Vec::with_capacity(lines * setup.pixels * setup.channels * setup.bytes_per_sample);
        for line in 0..lines {
            let y = self.clamp_head(self.head_y + direction * per_line * line as f64);
            setup.render_line(&self.layout, y, &mut data);
        }
        self.head_y = self.clamp_head(self.head_y + direction * travel);
        trace!(
            "sim: scan of {} lines x {} pixels, head now at {:.1}",
            lines, setup.pixels, self.head_y
        );

        self.data = data;
        self.read_pos = 0;
        if self.data.is_empty() {
            self.motion = Motion::Idle;
            self.scan_done = true;
        } else {
            self.motion = Motion::Scanning;
        }
    }
}
