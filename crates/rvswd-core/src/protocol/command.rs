//! Abstract command word encoding.

use std::fmt;

const TRANSFER: u32 = 1 << 17;
const WRITE: u32 = 1 << 16;
const POSTEXEC: u32 = 1 << 18;
const AARSIZE_32: u32 = 2 << 20;
/// cmdtype field (bits 31:24) value 0, access register.
const CMDTYPE_ACCESS_REGISTER: u32 = 0;
const REGNO_MASK: u32 = 0xFFFF;

/// Transfer direction for an access-register command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// One command written to `DM_COMMAND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractCommand {
    /// Transfer a 32-bit register through DATA0.
    AccessRegister { regno: u16, direction: Direction },
    /// Execute the program buffer without a register transfer.
    RunProgramBuffer,
}

impl AbstractCommand {
    /// Encode as the 32-bit command register value.
    pub fn encode(self) -> u32 {
        // progbuf execution is issued as an access-register command too
        let cmdtype = CMDTYPE_ACCESS_REGISTER;
        match self {
            AbstractCommand::AccessRegister { regno, direction } => {
                let dir = match direction {
                    Direction::Read => 0,
                    Direction::Write => WRITE,
                };
                regno as u32 | dir | TRANSFER | AARSIZE_32 | cmdtype
            }
            AbstractCommand::RunProgramBuffer => POSTEXEC | AARSIZE_32 | cmdtype,
        }
    }

    /// Decode a command register value. Returns `None` for command words
    /// that neither transfer nor execute.
    pub fn decode(word: u32) -> Option<Self> {
        if word & TRANSFER != 0 {
            let direction = if word & WRITE != 0 {
                Direction::Write
            } else {
                Direction::Read
            };
            Some(AbstractCommand::AccessRegister {
                regno: (word & REGNO_MASK) as u16,
                direction,
            })
        } else if word & POSTEXEC != 0 {
            Some(AbstractCommand::RunProgramBuffer)
        } else {
            None
        }
    }
}

impl fmt::Display for AbstractCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractCommand::AccessRegister { regno, direction } => {
                write!(f, "{:?} reg 0x{:04X}", direction, regno)
            }
            AbstractCommand::RunProgramBuffer => write!(f, "run progbuf"),
        }
    }
}
