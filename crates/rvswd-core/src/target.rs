//! Per-call view of one connected CH32V20x target.
//!
//! `Target` borrows the caller's transport and delay for the duration of a
//! sequence and holds no target state of its own: every query re-reads the
//! hardware. The debug module controller (`debug`), abstract access layer
//! (`access`), flash engine (`flash`) and option-byte reader
//! (`option_bytes`) are implemented as methods on it.

use tracing::trace;

use crate::poll::Delay;
use crate::transport::{RvswdTransport, TransportError};

pub struct Target<T: RvswdTransport, D: Delay> {
    pub(crate) transport: T,
    pub(crate) delay: D,
}

impl<T: RvswdTransport, D: Delay> Target<T, D> {
    pub fn new(transport: T, delay: D) -> Self {
        Self { transport, delay }
    }

    /// Release the transport and delay.
    pub fn into_parts(self) -> (T, D) {
        (self.transport, self.delay)
    }

    pub(crate) fn dm_write(&mut self, reg: u8, value: u32) -> Result<(), TransportError> {
        trace!(reg = %format!("0x{:02X}", reg), value = %format!("0x{:08X}", value), "DM write");
        self.transport.write(reg, value)
    }

    pub(crate) fn dm_read(&mut self, reg: u8) -> Result<u32, TransportError> {
        let value = self.transport.read(reg)?;
        trace!(reg = %format!("0x{:02X}", reg), value = %format!("0x{:08X}", value), "DM read");
        Ok(value)
    }

    pub(crate) fn sleep_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

impl<T: RvswdTransport, D: Delay> Delay for Target<T, D> {
    fn delay_ms(&mut self, ms: u32) {
        self.sleep_ms(ms);
    }
}
