//! Device capability interfaces.
//!
//! The HAL never talks to USB directly: a [`ScannerTransport`] is handed to
//! the device at attach time and every register and memory access goes
//! through it. Scanned data leaves the HAL through a [`ScanSink`].

use crate::hal::error::{ScanError, TransportError};
use crate::hal::types::ScanSession;

/// Register and memory access to one scanner ASIC.
///
/// Implementations must be blocking. The HAL does not retry failed calls;
/// every `TransportError` is surfaced to the caller of the current
/// operation.
pub trait ScannerTransport: Send {
    /// Read one register.
    fn read_register(&mut self, address: u8) -> Result<u8, TransportError>;

    /// Write one register.
    fn write_register(&mut self, address: u8, value: u8) -> Result<(), TransportError>;

    /// Fill `buffer` from the bulk port at `address`.
    fn bulk_read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), TransportError>;

    /// Send `data` to the bulk port at `address`.
    fn bulk_write(&mut self, address: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Write `data` to the ASIC memory bus starting at `address`.
    ///
    /// Slope and shading tables go through this path instead of the
    /// register set.
    fn raw_memory_write(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError>;
}

/// Downstream image pipeline stage.
///
/// Receives the raw buffer of a finished scan together with the session
/// that describes its layout.
pub trait ScanSink {
    /// Consume one scan worth of raw samples.
    fn consume(&mut self, session: &ScanSession, data: &[u8]) -> Result<(), ScanError>;
}

/// Sink that keeps every buffer it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    /// Received buffers, in order.
    pub buffers: Vec<Vec<u8>>,
}

impl ScanSink for CollectingSink {
    fn consume(&mut self, session: &ScanSession, data: &[u8]) -> Result<(), ScanError> {
        session.assert_computed();
        self.buffers.push(data.to_vec());
        Ok(())
    }
}
