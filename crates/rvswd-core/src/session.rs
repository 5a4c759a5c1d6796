//! Programming session - orchestrates the two public workflows.
//!
//! Both workflows share the bring-up sequence (transport init, link reset,
//! reset-and-run, halt). Programming then unlocks, recovers any stale busy
//! state, writes the image, locks and relaunches the new firmware. The
//! option-byte workflow reads and decodes the option block after halting.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::error::{ProgrammerError, WorkflowStep};
use crate::events::{
    LogLevel, ProgrammerEvent, ProgrammerObserver, ProgrammerPhase, TracingObserver,
};
use crate::flash::ProgressFn;
use crate::option_bytes::OptionBytes;
use crate::poll::{Delay, StdDelay};
use crate::protocol::FLASH_BASE;
use crate::target::Target;
use crate::transport::RvswdTransport;

/// Configuration for a programming session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// GPIO driving SWDIO.
    pub swdio_pin: u8,
    /// GPIO driving SWCLK.
    pub swclk_pin: u8,
    /// Address the image is written to.
    pub flash_base: u32,
    /// Firmware image to program.
    pub image_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            swdio_pin: 22,
            swclk_pin: 23,
            flash_base: FLASH_BASE,
            image_path: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Programming session over one exclusively owned transport.
pub struct ProgrammerSession<O: ProgrammerObserver, D: Delay = StdDelay> {
    config: SessionConfig,
    observer: Arc<O>,
    delay: D,
    phase: ProgrammerPhase,
}

impl ProgrammerSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: ProgrammerObserver> ProgrammerSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self::with_delay(config, observer, StdDelay)
    }
}

impl<O: ProgrammerObserver, D: Delay> ProgrammerSession<O, D> {
    /// Create a session with a custom observer and delay source.
    pub fn with_delay(config: SessionConfig, observer: Arc<O>, delay: D) -> Self {
        Self {
            config,
            observer,
            delay,
            phase: ProgrammerPhase::Idle,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> ProgrammerPhase {
        self.phase
    }

    fn enter(&mut self, to: ProgrammerPhase) {
        let from = self.phase;
        self.phase = to;
        self.observer
            .on_event(&ProgrammerEvent::PhaseChanged { from, to });
    }

    fn log(&self, level: LogLevel, message: String) {
        self.observer
            .on_event(&ProgrammerEvent::Log { level, message });
    }

    /// Report a failed step and tag the error with it.
    fn fail(&mut self, step: WorkflowStep, err: ProgrammerError) -> ProgrammerError {
        error!(step = %step, "{}", err);
        self.observer.on_event(&ProgrammerEvent::Error {
            step,
            message: err.to_string(),
        });
        self.enter(ProgrammerPhase::Error);
        err.at(step)
    }

    /// Run one step against a fresh target view.
    fn run_step<T, R, F>(&mut self, transport: &mut T, step: WorkflowStep, f: F) -> Result<R, ProgrammerError>
    where
        T: RvswdTransport,
        F: FnOnce(&mut Target<&mut T, &mut D>) -> Result<R, ProgrammerError>,
    {
        let result = {
            let mut target = Target::new(&mut *transport, &mut self.delay);
            f(&mut target)
        };
        result.map_err(|e| self.fail(step, e))
    }

    fn bring_up<T: RvswdTransport>(&mut self, transport: &mut T) -> Result<(), ProgrammerError> {
        self.enter(ProgrammerPhase::Connecting);
        if let Err(e) = transport.init() {
            return Err(self.fail(WorkflowStep::TransportInit, e.into()));
        }
        if let Err(e) = transport.reset() {
            return Err(self.fail(WorkflowStep::LinkReset, e.into()));
        }
        self.run_step(transport, WorkflowStep::ResetAndRun, |t| t.reset_and_run())?;

        self.enter(ProgrammerPhase::Halting);
        self.run_step(transport, WorkflowStep::Halt, |t| t.halt())
    }

    /// Write `firmware` to flash and relaunch the target.
    ///
    /// `progress` sees one call per block followed by a final 100% call.
    #[instrument(skip_all, fields(len = firmware.len()))]
    pub fn program<T: RvswdTransport>(
        &mut self,
        transport: &mut T,
        firmware: &[u8],
        progress: &mut ProgressFn<'_>,
    ) -> Result<(), ProgrammerError> {
        self.log(
            LogLevel::Info,
            format!(
                "Programming {} bytes at 0x{:08x}",
                firmware.len(),
                self.config.flash_base
            ),
        );
        self.bring_up(transport)?;

        self.enter(ProgrammerPhase::Unlocking);
        self.run_step(transport, WorkflowStep::Unlock, |t| t.unlock_flash())?;

        self.enter(ProgrammerPhase::Recovering);
        self.run_step(transport, WorkflowStep::ClearOperations, |t| {
            t.clear_running_operations()
        })?;

        self.enter(ProgrammerPhase::Writing);
        let observer = Arc::clone(&self.observer);
        let mut forward = |message: &str, percent: u8| {
            observer.on_event(&ProgrammerEvent::Progress {
                message: message.to_string(),
                percent,
            });
            progress(message, percent);
        };
        let base = self.config.flash_base;
        self.run_step(transport, WorkflowStep::WriteImage, |t| {
            t.write_image(base, firmware, &mut forward)
        })?;

        self.enter(ProgrammerPhase::Locking);
        self.run_step(transport, WorkflowStep::Lock, |t| t.lock_flash())?;

        self.enter(ProgrammerPhase::Relaunching);
        self.run_step(transport, WorkflowStep::Relaunch, |t| t.reset_and_run())?;

        forward("Programming done", 100);
        info!(len = firmware.len(), "Programming done");
        self.enter(ProgrammerPhase::Complete);
        self.observer.on_event(&ProgrammerEvent::Complete);
        Ok(())
    }

    /// Halt the target and decode its option bytes.
    #[instrument(skip_all)]
    pub fn read_option_bytes<T: RvswdTransport>(
        &mut self,
        transport: &mut T,
    ) -> Result<OptionBytes, ProgrammerError> {
        self.bring_up(transport)?;

        self.enter(ProgrammerPhase::ReadingOptionBytes);
        let ob = self.run_step(transport, WorkflowStep::ReadOptionBytes, |t| {
            t.read_option_bytes()
        })?;

        for e in ob.errors() {
            self.log(LogLevel::Warn, e.to_string());
        }
        self.observer
            .on_event(&ProgrammerEvent::OptionBytes(ob.clone()));
        self.enter(ProgrammerPhase::Complete);
        self.observer.on_event(&ProgrammerEvent::Complete);
        Ok(ob)
    }
}

/// Program `firmware` at the start of code flash with default settings.
pub fn program<T: RvswdTransport>(
    transport: &mut T,
    firmware: &[u8],
    progress: &mut ProgressFn<'_>,
) -> Result<(), ProgrammerError> {
    ProgrammerSession::new(SessionConfig::default()).program(transport, firmware, progress)
}

/// Read and decode the option bytes with default settings.
pub fn read_option_bytes<T: RvswdTransport>(
    transport: &mut T,
) -> Result<OptionBytes, ProgrammerError> {
    ProgrammerSession::new(SessionConfig::default()).read_option_bytes(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::RecordingObserver;
    use crate::poll::tests::RecordingDelay;
    use crate::protocol::FLASH_CTLR_LOCK;
    use crate::transport::{SimulatedTarget, TransportError};

    fn session(observer: Arc<RecordingObserver>) -> ProgrammerSession<RecordingObserver, RecordingDelay> {
        ProgrammerSession::with_delay(SessionConfig::default(), observer, RecordingDelay::default())
    }

    fn firmware(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn test_program_full_workflow() {
        let observer = Arc::new(RecordingObserver::default());
        let mut session = session(observer.clone());
        let mut sim = SimulatedTarget::new();
        let data = firmware(512);

        let mut calls = Vec::new();
        session
            .program(&mut sim, &data, &mut |msg: &str, pct: u8| {
                calls.push((msg.to_string(), pct))
            })
            .unwrap();

        assert_eq!(
            calls,
            vec![
                ("Writing at 0x08000000".to_string(), 0),
                ("Writing at 0x08000100".to_string(), 50),
                ("Programming done".to_string(), 100),
            ]
        );
        assert_eq!(sim.flash_bytes(FLASH_BASE, 512), data);
        assert!(sim.is_flash_locked());
        assert!(!sim.is_halted());
        assert_eq!(sim.reset_count(), 2);
        assert_eq!(sim.init_count(), 1);
        assert_eq!(sim.link_reset_count(), 1);
        assert_eq!(session.phase(), ProgrammerPhase::Complete);

        assert_eq!(
            observer.phases(),
            vec![
                ProgrammerPhase::Connecting,
                ProgrammerPhase::Halting,
                ProgrammerPhase::Unlocking,
                ProgrammerPhase::Recovering,
                ProgrammerPhase::Writing,
                ProgrammerPhase::Locking,
                ProgrammerPhase::Relaunching,
                ProgrammerPhase::Complete,
            ]
        );
        let forwarded: Vec<u8> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ProgrammerEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(forwarded, vec![0, 50, 100]);
        assert!(observer.events().iter().any(|e| matches!(
            e,
            ProgrammerEvent::Log { level: LogLevel::Info, message }
                if message == "Programming 512 bytes at 0x08000000"
        )));
    }

    #[test]
    fn test_program_reports_halt_step() {
        let observer = Arc::new(RecordingObserver::default());
        let mut session = session(observer.clone());
        let mut sim = SimulatedTarget::new();
        sim.fault_never_halt();

        let mut calls = 0;
        let err = session
            .program(&mut sim, &firmware(256), &mut |_: &str, _: u8| calls += 1)
            .unwrap_err();

        assert_eq!(err.step(), Some(WorkflowStep::Halt));
        assert!(matches!(err.root_cause(), ProgrammerError::HaltTimeout { .. }));
        assert_eq!(calls, 0);
        assert_eq!(sim.pages_erased(), 0);
        assert_eq!(session.phase(), ProgrammerPhase::Error);
        assert!(observer.events().iter().any(|e| matches!(
            e,
            ProgrammerEvent::Error {
                step: WorkflowStep::Halt,
                ..
            }
        )));
    }

    #[test]
    fn test_program_reports_transport_init() {
        let mut session = session(Arc::new(RecordingObserver::default()));
        let mut sim = SimulatedTarget::new();
        sim.fault_init_fails();

        let err = session
            .program(&mut sim, &firmware(256), &mut |_: &str, _: u8| {})
            .unwrap_err();
        assert_eq!(err.step(), Some(WorkflowStep::TransportInit));
        assert!(matches!(
            err.root_cause(),
            ProgrammerError::Transport(TransportError::Link(_))
        ));
        assert_eq!(sim.register_write_count(), 0);
    }

    #[test]
    fn test_program_reports_unlock_failure() {
        let mut session = session(Arc::new(RecordingObserver::default()));
        let mut sim = SimulatedTarget::new();
        sim.fault_reject_keys();

        let err = session
            .program(&mut sim, &firmware(256), &mut |_: &str, _: u8| {})
            .unwrap_err();
        assert_eq!(err.step(), Some(WorkflowStep::Unlock));
        assert!(matches!(err.root_cause(), ProgrammerError::UnlockFailed { .. }));
        assert_eq!(sim.pages_erased(), 0);
    }

    #[test]
    fn test_program_stops_on_block_failure() {
        let mut session = session(Arc::new(RecordingObserver::default()));
        let mut sim = SimulatedTarget::new();
        sim.fault_stuck_busy_after_pages(2);

        let mut percents = Vec::new();
        let err = session
            .program(&mut sim, &firmware(1024), &mut |_: &str, pct: u8| {
                percents.push(pct)
            })
            .unwrap_err();

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
            ProgrammerError::FlashBusyTimeout { .. }
        ));
        assert_eq!(percents, vec![0, 25, 50]);
        assert_eq!(sim.pages_programmed(), 2);
        // No lock and no relaunch after the failure.
        assert_eq!(sim.reset_count(), 1);
        assert!(!sim.is_flash_locked());
    }

    #[test]
    fn test_read_option_bytes_workflow() {
        let observer = Arc::new(RecordingObserver::default());
        let mut session = session(observer.clone());
        let mut sim = SimulatedTarget::new();

        let ob = session.read_option_bytes(&mut sim).unwrap();
        assert!(ob.is_valid());
        assert!(sim.is_halted());
        assert_eq!(sim.reset_count(), 1);
        assert_eq!(
            observer.phases(),
            vec![
                ProgrammerPhase::Connecting,
                ProgrammerPhase::Halting,
                ProgrammerPhase::ReadingOptionBytes,
                ProgrammerPhase::Complete,
            ]
        );
        assert!(observer
            .events()
            .iter()
            .any(|e| matches!(e, ProgrammerEvent::OptionBytes(_))));
    }

    #[test]
    fn test_read_option_bytes_reports_invalid_fields() {
        let observer = Arc::new(RecordingObserver::default());
        let mut session = session(observer.clone());
        let mut sim = SimulatedTarget::new();
        sim.set_option_bytes([0x00FF_5AA5, 0x0000_00FF, 0x00FF_00FF, 0x00FF_00FF]);

        let ob = session.read_option_bytes(&mut sim).unwrap();
        assert!(!ob.is_valid());
        assert!(ob.data1.is_err());
        let warnings: Vec<String> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ProgrammerEvent::Log {
                    level: LogLevel::Warn,
                    message,
                } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(warnings, vec!["Invalid user data 1 0x00 0x00".to_string()]);
    }

    #[test]
    fn test_program_reports_lock_failure() {
        let observer = Arc::new(RecordingObserver::default());
        let mut session = session(observer.clone());
        let mut sim = SimulatedTarget::new();
        sim.fault_ignore_lock();

        let err = session
            .program(&mut sim, &firmware(256), &mut |_: &str, _: u8| {})
            .unwrap_err();
        assert_eq!(err.step(), Some(WorkflowStep::Lock));
        assert!(matches!(
            err.root_cause(),
            ProgrammerError::LockFailed { control } if control & FLASH_CTLR_LOCK == 0
        ));
        // Image is written, but the firmware is not relaunched.
        assert_eq!(sim.pages_programmed(), 1);
        assert_eq!(sim.reset_count(), 1);
        assert_eq!(session.phase(), ProgrammerPhase::Error);
    }

    #[test]
    fn test_read_option_bytes_reports_link_reset() {
        let mut session = session(Arc::new(RecordingObserver::default()));
        let mut sim = SimulatedTarget::new();
        sim.fault_disconnect();

        let err = session.read_option_bytes(&mut sim).unwrap_err();
        assert_eq!(err.step(), Some(WorkflowStep::LinkReset));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = SessionConfig {
            swdio_pin: 4,
            swclk_pin: 5,
            flash_base: 0x0800_1000,
            image_path: Some("coprocessor.bin".to_string()),
        };
        let path = std::env::temp_dir().join(format!("rvswd-config-{}.toml", std::process::id()));
        config.save_to_file(&path).unwrap();
        let loaded = SessionConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_defaults_fill_missing_keys() {
        let config: SessionConfig = toml::from_str("swdio_pin = 1").unwrap();
        assert_eq!(config.swdio_pin, 1);
        assert_eq!(config.swclk_pin, 23);
        assert_eq!(config.flash_base, FLASH_BASE);
        assert_eq!(config.image_path, None);
    }
}
