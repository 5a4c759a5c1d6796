//! rvswd-core: CH32V20x flash programming over the RVSWD debug link.
//!
//! This crate drives the RISC-V debug module of a WCH CH32V20x through a
//! two-wire RVSWD transport to halt the core, reach memory indirectly through
//! the program buffer, and erase, program and verify code flash.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Debug module and flash controller constants, abstract
//!   command encoding
//! - **Transport**: Debug register access abstraction (simulated target)
//! - **Target**: Debug module controller, abstract access layer, flash
//!   engine and option-byte reader, all as methods on [`Target`]
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator for the two workflows
//!
//! # Example
//!
//! ```no_run
//! use rvswd_core::session::{ProgrammerSession, SessionConfig};
//! use rvswd_core::transport::SimulatedTarget;
//!
//! let firmware = std::fs::read("coprocessor.bin").unwrap();
//! let mut link = SimulatedTarget::new();
//! let mut session = ProgrammerSession::new(SessionConfig::default());
//! session
//!     .program(&mut link, &firmware, &mut |msg: &str, pct: u8| {
//!         println!("{}: {}%", msg, pct)
//!     })
//!     .expect("programming failed");
//! ```

pub mod access;
pub mod debug;
pub mod error;
pub mod events;
pub mod flash;
pub mod image;
pub mod option_bytes;
pub mod poll;
pub mod protocol;
pub mod session;
pub mod target;
pub mod transport;

// Re-exports for convenience
pub use error::{ProgrammerError, WorkflowStep};
pub use events::{LogLevel, ProgrammerEvent, ProgrammerObserver, ProgrammerPhase, TracingObserver};
pub use flash::ProgressFn;
pub use image::{FirmwareImage, ImageError};
pub use option_bytes::{InvalidOptionByte, OptionBytes, OptionField, ReadProtection, UserConfig};
pub use poll::{Delay, StdDelay};
pub use protocol::AbstractCommand;
pub use session::{ProgrammerSession, SessionConfig, program, read_option_bytes};
pub use target::Target;
pub use transport::{RvswdTransport, SimulatedTarget, TransportError};
