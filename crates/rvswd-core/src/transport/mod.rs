//! Transport layer module.

pub mod mock;
pub mod traits;

pub use mock::SimulatedTarget;
pub use traits::{RvswdTransport, TransportError};
