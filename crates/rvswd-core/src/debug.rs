//! Debug module controller: halt, resume and reset the core.
//!
//! Each transition writes DMCONTROL and then polls one 2-bit DMSTATUS field
//! for `0b11` under `CORE_STATE_POLL`.

use tracing::{error, info};

use crate::error::ProgrammerError;
use crate::poll::{CORE_STATE_POLL, Delay, Poll, PollOutcome};
use crate::protocol::*;
use crate::target::Target;
use crate::transport::RvswdTransport;

/// True when both bits of the any/all pair at `shift` are set.
fn field_set(status: u32, shift: u32) -> bool {
    (status >> shift) & 0b11 == 0b11
}

impl<T: RvswdTransport, D: Delay> Target<T, D> {
    fn poll_status(&mut self, shift: u32) -> Result<PollOutcome<(), u32>, ProgrammerError> {
        CORE_STATE_POLL.poll(self, |target, _| -> Result<_, ProgrammerError> {
            let status = target.dm_read(DM_STATUS)?;
            Ok(if field_set(status, shift) {
                Poll::Ready(())
            } else {
                Poll::Pending(status)
            })
        })
    }

    /// Halt the core.
    ///
    /// On timeout the halt request is left asserted.
    pub fn halt(&mut self) -> Result<(), ProgrammerError> {
        self.dm_write(DM_CONTROL, DMCONTROL_HALT_REQ)?;
        self.dm_write(DM_CONTROL, DMCONTROL_HALT_REQ)?;

        if let PollOutcome::TimedOut(status) = self.poll_status(DMSTATUS_HALTED_SHIFT)? {
            error!(dmstatus = %format!("0x{:08X}", status), "Failed to halt core");
            return Err(ProgrammerError::HaltTimeout { status });
        }

        self.dm_write(DM_CONTROL, DMCONTROL_ENABLE)?;
        info!("Core halted");
        Ok(())
    }

    /// Resume a halted core.
    pub fn resume(&mut self) -> Result<(), ProgrammerError> {
        self.dm_write(DM_CONTROL, DMCONTROL_HALT_REQ)?;
        self.dm_write(DM_CONTROL, DMCONTROL_HALT_REQ)?;
        self.dm_write(DM_CONTROL, DMCONTROL_ENABLE)?;
        self.dm_write(DM_CONTROL, DMCONTROL_RESUME_REQ)?;

        if let PollOutcome::TimedOut(status) = self.poll_status(DMSTATUS_RUNNING_SHIFT)? {
            error!(dmstatus = %format!("0x{:08X}", status), "Failed to resume core");
            return Err(ProgrammerError::ResumeTimeout { status });
        }

        info!("Core resumed");
        Ok(())
    }

    /// Reset the core and let it run.
    pub fn reset_and_run(&mut self) -> Result<(), ProgrammerError> {
        self.dm_write(DM_CONTROL, DMCONTROL_HALT_REQ)?;
        self.dm_write(DM_CONTROL, DMCONTROL_HALT_REQ)?;
        self.dm_write(DM_CONTROL, DMCONTROL_ENABLE)?;
        self.dm_write(DM_CONTROL, DMCONTROL_CORE_RESET)?;

        if let PollOutcome::TimedOut(status) = self.poll_status(DMSTATUS_HAVERESET_SHIFT)? {
            error!(dmstatus = %format!("0x{:08X}", status), "Failed to reset core");
            return Err(ProgrammerError::ResetTimeout { status });
        }

        // Fixed settling time between each step; not polled.
        self.dm_write(DM_CONTROL, DMCONTROL_ENABLE)?;
        self.sleep_ms(10);
        self.dm_write(DM_CONTROL, DMCONTROL_ACK_RESET)?;
        self.sleep_ms(10);
        self.dm_write(DM_CONTROL, DMCONTROL_ENABLE)?;
        self.sleep_ms(10);

        info!("Core reset and running");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::tests::RecordingDelay;
    use crate::transport::SimulatedTarget;

    #[test]
    fn test_halt() {
        let mut sim = SimulatedTarget::new();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        target.halt().unwrap();
        assert!(sim.is_halted());
        assert_eq!(sim.dmcontrol(), DMCONTROL_ENABLE);
    }

    #[test]
    fn test_halt_timeout_after_exactly_five_polls() {
        let mut sim = SimulatedTarget::new();
        sim.fault_never_halt();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        let err = target.halt().unwrap_err();
        assert!(matches!(err, ProgrammerError::HaltTimeout { .. }));
        assert_eq!(sim.dmstatus_reads(), 5);
        assert_eq!(delay.sleeps, vec![10; 4]);
        // Request stays asserted on failure.
        assert_eq!(sim.dmcontrol(), DMCONTROL_HALT_REQ);
    }

    #[test]
    fn test_resume() {
        let mut sim = SimulatedTarget::new();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        target.halt().unwrap();
        target.resume().unwrap();
        assert!(!sim.is_halted());
    }

    #[test]
    fn test_resume_timeout() {
        let mut sim = SimulatedTarget::new();
        sim.fault_never_resume();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        let err = target.resume().unwrap_err();
        assert!(matches!(err, ProgrammerError::ResumeTimeout { .. }));
        assert_eq!(sim.dmstatus_reads(), 5);
    }

    #[test]
    fn test_reset_and_run_settles_and_acks_reset() {
        let mut sim = SimulatedTarget::new();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        target.reset_and_run().unwrap();
        assert!(!sim.is_halted());
        assert!(!sim.have_reset());
        assert_eq!(sim.reset_count(), 1);
        // Three unconditional settle delays, no polling sleeps.
        assert_eq!(delay.sleeps, vec![10, 10, 10]);
    }

    #[test]
    fn test_reset_timeout_skips_remaining_steps() {
        let mut sim = SimulatedTarget::new();
        sim.fault_never_reset();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        let err = target.reset_and_run().unwrap_err();
        assert!(matches!(err, ProgrammerError::ResetTimeout { .. }));
        assert_eq!(delay.total_ms(), 40);
        assert_eq!(sim.dmcontrol(), DMCONTROL_CORE_RESET);
    }

    #[test]
    fn test_transport_error_aborts_halt() {
        let mut sim = SimulatedTarget::new();
        sim.fault_disconnect();
        let mut delay = RecordingDelay::default();
        let mut target = Target::new(&mut sim, &mut delay);

        let err = target.halt().unwrap_err();
        assert!(matches!(err, ProgrammerError::Transport(_)));
        assert!(delay.sleeps.is_empty());
    }
}
