//! Bounded polling with an injectable sleep.

use std::thread;
use std::time::Duration;

/// Blocking millisecond delay.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Delay backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// Result of a single poll attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll<T, S> {
    /// Condition met.
    Ready(T),
    /// Not yet; carries the state observed on this attempt.
    Pending(S),
}

/// Result of a complete polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T, S> {
    Ready(T),
    /// Attempt budget exhausted; carries the last observed state.
    TimedOut(S),
}

/// Attempt budget and sleep interval for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval_ms: u32,
}

/// Core halt/resume/reset transitions.
pub const CORE_STATE_POLL: PollPolicy = PollPolicy::new(5, 10);
/// Flash controller BSY.
pub const FLASH_READY_POLL: PollPolicy = PollPolicy::new(1000, 1);
/// Stale busy recovery.
pub const CLEAR_BUSY_POLL: PollPolicy = PollPolicy::new(100, 10);

impl PollPolicy {
    pub const fn new(attempts: u32, interval_ms: u32) -> Self {
        Self {
            attempts,
            interval_ms,
        }
    }

    /// Run `check` until it reports `Ready` or the attempt budget runs out.
    ///
    /// `check` receives the polling context and the zero-based attempt
    /// number. The interval is slept on the context between attempts, never
    /// after the last one. Errors from `check` abort the loop immediately.
    pub fn poll<C, T, S, E, F>(&self, ctx: &mut C, mut check: F) -> Result<PollOutcome<T, S>, E>
    where
        C: Delay + ?Sized,
        F: FnMut(&mut C, u32) -> Result<Poll<T, S>, E>,
    {
        let mut attempt = 0;
        loop {
            match check(ctx, attempt)? {
                Poll::Ready(value) => return Ok(PollOutcome::Ready(value)),
                Poll::Pending(state) => {
                    attempt += 1;
                    if attempt >= self.attempts {
                        return Ok(PollOutcome::TimedOut(state));
                    }
                    ctx.delay_ms(self.interval_ms);
                }
            }
        }
    }
}
