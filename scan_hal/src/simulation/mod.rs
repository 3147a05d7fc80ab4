//! Simulated scanner behind the [`ScannerTransport`] interface.
//!
//! The simulator models the register file, the analog frontend, the motor
//! and a flatbed with a white calibration area, a black strip and a striped
//! document. It lets the whole HAL run without hardware and lets tests
//! inject the failures the motion controller has to survive.
//!
//! # Usage
//!
//! ```no_run
//! use scan_hal::profiles::find_model;
//! use scan_hal::simulation::{SimFault, SimulatedScanner};
//!
//! let sim = SimulatedScanner::new(find_model("cis-flatbed").unwrap());
//! let transport = sim.transport();
//! sim.inject_fault(SimFault::HomeSensorDead);
//! ```

pub mod asic;
pub mod optics;

use std::sync::Arc;

use parking_lot::Mutex;
use scan_common::hal::error::TransportError;
use scan_common::hal::model::ModelDescriptor;
use scan_common::hal::transport::ScannerTransport;
use serde::Serialize;

use self::asic::SimState;
pub use self::optics::SimLayout;

/// Failure modes the simulator can reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimFault {
    /// Once started, the motor never reports idle again.
    MotorStuck,
    /// The home sensor never triggers.
    HomeSensorDead,
    /// Feeds never finish.
    FeedStalled,
    /// The data buffer never reports available bytes.
    DataStarved,
    /// Every transport call fails.
    TransportFailure,
}

/// Activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimCounters {
    /// Reads of status register 0x41.
    pub status_polls: u32,
    /// Registers written, single or bulk.
    pub register_writes: u32,
    /// Bulk register blocks received.
    pub bulk_writes: u32,
    /// Memory bus writes.
    pub memory_writes: u32,
    /// Motor starts.
    pub motor_starts: u32,
    /// Frontend register commits.
    pub afe_writes: u32,
    /// ASIC resets.
    pub resets: u32,
}

/// Handle to a simulated scanner.
///
/// Clones share the same device, so a test can keep one handle for probes
/// while the HAL owns another as its transport.
#[derive(Debug, Clone)]
pub struct SimulatedScanner {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedScanner {
    /// Powered-off scanner of `model` with the head at home.
    pub fn new(model: ModelDescriptor) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(model, SimLayout::default()))),
        }
    }

    /// Replace the flatbed layout.
    pub fn with_layout(self, layout: SimLayout) -> Self {
        self.state.lock().layout = layout;
        self
    }

    /// Boxed handle for the HAL.
    pub fn transport(&self) -> Box<dyn ScannerTransport> {
        Box::new(self.clone())
    }

    /// Enable `fault` from now on.
    pub fn inject_fault(&self, fault: SimFault) {
        let mut state = self.state.lock();
        if !state.faults.contains(&fault) {
            state.faults.push(fault);
        }
    }

    /// Disable every fault.
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Move the head without going through the motor.
    pub fn set_head_position(&self, steps: u32) {
        self.state.lock().head_y = steps as f64;
    }

    /// Head position in base steps, rounded.
    pub fn head_position(&self) -> u32 {
        self.state.lock().head_y.round() as u32
    }

    /// Register value, without side effects.
    pub fn register(&self, address: u8) -> u8 {
        self.state.lock().peek(address)
    }

    /// Little-endian multi-byte register value, without side effects.
    pub fn register_wide(&self, address: u8, bytes: u8) -> u32 {
        let state = self.state.lock();
        (0..bytes).fold(0u32, |acc, i| {
            acc | (state.peek(address.wrapping_add(i)) as u32) << (8 * i as u32)
        })
    }

    /// Frontend register value.
    pub fn afe_register(&self, address: u8) -> u8 {
        self.state.lock().afe(address)
    }

    /// Block last written at `address` on the memory bus.
    pub fn memory(&self, address: u32) -> Option<Vec<u8>> {
        self.state.lock().memory(address).map(<[u8]>::to_vec)
    }

    /// Bytes captured but not read yet.
    pub fn pending_bytes(&self) -> usize {
        self.state.lock().pending_bytes()
    }

    /// Snapshot of the activity counters.
    pub fn counters(&self) -> SimCounters {
        self.state.lock().counters
    }

    /// Zero the activity counters.
    pub fn reset_counters(&self) {
        self.state.lock().counters = SimCounters::default();
    }
}

impl ScannerTransport for SimulatedScanner {
    fn read_register(&mut self, address: u8) -> Result<u8, TransportError> {
        self.state.lock().read_register(address)
    }

    fn write_register(&mut self, address: u8, value: u8) -> Result<(), TransportError> {
        self.state.lock().write_register(address, value)
    }

    fn bulk_read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), TransportError> {
        self.state.lock().bulk_read(address, buffer)
    }

    fn bulk_write(&mut self, address: u8, data: &[u8]) -> Result<(), TransportError> {
        self.state.lock().bulk_write(address, data)
    }

    fn raw_memory_write(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        self.state.lock().raw_memory_write(address, data)
    }
}
