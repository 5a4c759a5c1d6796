//! Event system for UI decoupling.
//!
//! Lets a CLI or GUI follow a programming session without coupling to the
//! flash engine. The session forwards every progress callback as an event.

use std::fmt;

use crate::error::WorkflowStep;
use crate::option_bytes::OptionBytes;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Session phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgrammerPhase {
    /// Nothing started yet.
    Idle,
    /// Link bring-up and core reset.
    Connecting,
    /// Halting the core.
    Halting,
    /// Entering flash keys.
    Unlocking,
    /// Clearing a stale busy state.
    Recovering,
    /// Erase/program loop.
    Writing,
    Locking,
    /// Reset-and-run of the new firmware.
    Relaunching,
    ReadingOptionBytes,
    Complete,
    Error,
}

impl fmt::Display for ProgrammerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgrammerPhase::Idle => write!(f, "Idle"),
            ProgrammerPhase::Connecting => write!(f, "Connecting"),
            ProgrammerPhase::Halting => write!(f, "Halting"),
            ProgrammerPhase::Unlocking => write!(f, "Unlocking"),
            ProgrammerPhase::Recovering => write!(f, "Recovering"),
            ProgrammerPhase::Writing => write!(f, "Writing"),
            ProgrammerPhase::Locking => write!(f, "Locking"),
            ProgrammerPhase::Relaunching => write!(f, "Relaunching"),
            ProgrammerPhase::ReadingOptionBytes => write!(f, "Reading Option Bytes"),
            ProgrammerPhase::Complete => write!(f, "Complete"),
            ProgrammerPhase::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by a programming session.
#[derive(Debug, Clone)]
pub enum ProgrammerEvent {
    /// Phase changed.
    PhaseChanged {
        from: ProgrammerPhase,
        to: ProgrammerPhase,
    },
    /// Progress callback invocation.
    Progress { message: String, percent: u8 },
    /// Option bytes decoded.
    OptionBytes(OptionBytes),
    /// Log message.
    Log { level: LogLevel, message: String },
    /// A workflow step failed.
    Error { step: WorkflowStep, message: String },
    /// Workflow finished successfully.
    Complete,
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait ProgrammerObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &ProgrammerEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl ProgrammerObserver for NullObserver {
    fn on_event(&self, _event: &ProgrammerEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl ProgrammerObserver for TracingObserver {
    fn on_event(&self, event: &ProgrammerEvent) {
        match event {
            ProgrammerEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            ProgrammerEvent::Progress { message, percent } => {
                tracing::debug!(progress = %format!("{}%", percent), "{}", message);
            }
            ProgrammerEvent::OptionBytes(ob) => {
                tracing::info!(valid = ob.is_valid(), "Option bytes decoded");
            }
            ProgrammerEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            ProgrammerEvent::Error { step, message } => {
                tracing::error!(step = %step, "Error: {}", message);
            }
            ProgrammerEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}
