//! Programmer error taxonomy.

use std::fmt;

use thiserror::Error;

use crate::option_bytes::InvalidOptionByte;
use crate::protocol::BLOCK_WORDS;
use crate::transport::TransportError;

/// Orchestration steps shared by the programming and option-byte workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    TransportInit,
    LinkReset,
    ResetAndRun,
    Halt,
    Unlock,
    ClearOperations,
    WriteImage,
    Lock,
    Relaunch,
    ReadOptionBytes,
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStep::TransportInit => write!(f, "transport init"),
            WorkflowStep::LinkReset => write!(f, "link reset"),
            WorkflowStep::ResetAndRun => write!(f, "reset target"),
            WorkflowStep::Halt => write!(f, "halt target"),
            WorkflowStep::Unlock => write!(f, "unlock flash"),
            WorkflowStep::ClearOperations => write!(f, "clear running operations"),
            WorkflowStep::WriteImage => write!(f, "write flash"),
            WorkflowStep::Lock => write!(f, "lock flash"),
            WorkflowStep::Relaunch => write!(f, "relaunch firmware"),
            WorkflowStep::ReadOptionBytes => write!(f, "read option bytes"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProgrammerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Core did not halt, DMSTATUS=0x{status:08X}")]
    HaltTimeout { status: u32 },

    #[error("Core did not resume, DMSTATUS=0x{status:08X}")]
    ResumeTimeout { status: u32 },

    #[error("Core reset not observed, DMSTATUS=0x{status:08X}")]
    ResetTimeout { status: u32 },

    #[error("Debug program is too long ({size}/{max} bytes)")]
    ProgramTooLarge { size: usize, max: usize },

    #[error("Debug program size must be a multiple of 2 ({size})")]
    InvalidProgramSize { size: usize },

    #[error("Address 0x{address:08X} is not aligned to {align} bytes")]
    UnalignedAddress { address: u32, align: u32 },

    #[error("{len} bytes at 0x{address:08X} run past the end of the address space")]
    AddressOutOfRange { address: u32, len: usize },

    #[error("Flash stayed busy, FLASH_STATR=0x{status:08X}")]
    FlashBusyTimeout { status: u32 },

    #[error("Failed to erase block at 0x{address:08X}: {source}")]
    EraseFailed {
        address: u32,
        #[source]
        source: Box<ProgrammerError>,
    },

    #[error("Failed to program block at 0x{address:08X}: {source}")]
    ProgramFailed {
        address: u32,
        #[source]
        source: Box<ProgrammerError>,
    },

    #[error("Readback mismatch in block at 0x{address:08X}")]
    VerifyMismatch {
        address: u32,
        written: Box<[u32; BLOCK_WORDS]>,
        readback: Box<[u32; BLOCK_WORDS]>,
    },

    #[error(
        "Target busy for unknown reason (FLASH_STATR=0x{status:08X}, FLASH_CTLR=0x{control:08X})"
    )]
    UnknownBusyState { status: u32, control: u32 },

    #[error("Timeout waiting for target to clear busy flag, FLASH_STATR=0x{status:08X}")]
    ClearTimeout { status: u32 },

    #[error("Flash still locked after unlock sequence, FLASH_CTLR=0x{control:08X}")]
    UnlockFailed { control: u32 },

    #[error("Flash not locked after setting LOCK, FLASH_CTLR=0x{control:08X}")]
    LockFailed { control: u32 },

    #[error(transparent)]
    InvalidOptionByte(#[from] InvalidOptionByte),

    #[error("{step} failed: {source}")]
    StepFailed {
        step: WorkflowStep,
        #[source]
        source: Box<ProgrammerError>,
    },
}

impl ProgrammerError {
    /// Wrap with the workflow step that produced this error.
    pub fn at(self, step: WorkflowStep) -> Self {
        ProgrammerError::StepFailed {
            step,
            source: Box::new(self),
        }
    }

    /// Step that failed, if this error came out of a workflow.
    pub fn step(&self) -> Option<WorkflowStep> {
        match self {
            ProgrammerError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The specific condition, with workflow and per-block wrapping removed.
    pub fn root_cause(&self) -> &ProgrammerError {
        match self {
            ProgrammerError::StepFailed { source, .. }
            | ProgrammerError::EraseFailed { source, .. }
            | ProgrammerError::ProgramFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Drop only the workflow-step wrapper.
    pub fn without_step(&self) -> &ProgrammerError {
        match self {
            ProgrammerError::StepFailed { source, .. } => source.without_step(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_all_layers() {
        let err = ProgrammerError::EraseFailed {
            address: 0x0800_0200,
            source: Box::new(ProgrammerError::FlashBusyTimeout { status: 1 }),
        }
        .at(WorkflowStep::WriteImage);

        assert_eq!(err.step(), Some(WorkflowStep::WriteImage));
        assert!(matches!(
            err.without_step(),
            ProgrammerError::EraseFailed {
                address: 0x0800_0200,
                ..
            }
        ));
        assert!(matches!(
            err.root_cause(),
            ProgrammerError::FlashBusyTimeout { status: 1 }
        ));
    }

    #[test]
    fn test_message_names_step_and_condition() {
        let err = ProgrammerError::HaltTimeout { status: 0 }.at(WorkflowStep::Halt);
        assert_eq!(
            err.to_string(),
            "halt target failed: Core did not halt, DMSTATUS=0x00000000"
        );
    }
}
