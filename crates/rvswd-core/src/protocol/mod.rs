//! Protocol module - debug module and flash controller definitions.

pub mod command;
pub mod constants;

pub use command::{AbstractCommand, Direction};
pub use constants::*;
