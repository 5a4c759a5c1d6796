//! RVSWD transport layer abstraction.
//!
//! Defines the `RvswdTransport` trait for debug register access,
//! allowing different implementations (GPIO bit-bang, simulator, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Debug register address 0x{0:02X} is out of range")]
    InvalidRegister(u8),

    #[error("No response from target while accessing register 0x{reg:02X}")]
    NoResponse { reg: u8 },

    #[error("Link failure: {0}")]
    Link(String),
}

/// Single-wire debug link to one target.
///
/// Implementations perform exactly one round trip per call and never retry;
/// failures are returned as-is to the caller.
pub trait RvswdTransport {
    /// Bring up the link lines.
    fn init(&mut self) -> Result<(), TransportError>;

    /// Issue the link reset sequence.
    fn reset(&mut self) -> Result<(), TransportError>;

    /// Write a debug module register.
    fn write(&mut self, reg: u8, value: u32) -> Result<(), TransportError>;

    /// Read a debug module register.
    fn read(&mut self, reg: u8) -> Result<u32, TransportError>;
}

impl<T: RvswdTransport + ?Sized> RvswdTransport for &mut T {
    fn init(&mut self) -> Result<(), TransportError> {
        (**self).init()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        (**self).reset()
    }

    fn write(&mut self, reg: u8, value: u32) -> Result<(), TransportError> {
        (**self).write(reg, value)
    }

    fn read(&mut self, reg: u8) -> Result<u32, TransportError> {
        (**self).read(reg)
    }
}
