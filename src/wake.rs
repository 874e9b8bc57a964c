//! Low-power wait mechanisms. They all implement [`WakeMechanism`] and differ only in whether
//! the processor resumes in place or comes back through a reset.

use crate::error::Error;
use embedded_hal::delay::DelayNs;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wake {
    /// The wait is over and execution continues after `arm`
    Resumed,
    /// The expiry resets the device. On hardware `arm` does not return in this case, test
    /// doubles return this instead.
    Reset,
}

pub trait WakeMechanism {
    /// `false` if the wait always ends in a reset.
    const RESUMES_IN_PLACE: bool;

    /// Longest wait a single `arm` can cover, `None` if unbounded.
    fn max_sleep_ms(&self) -> Option<u32>;

    /// Waits for `duration_ms`, or at most [`WakeMechanism::max_sleep_ms`].
    fn arm(&mut self, duration_ms: u32) -> Result<Wake, Error>;
}

impl<W: WakeMechanism> WakeMechanism for &mut W {
    const RESUMES_IN_PLACE: bool = W::RESUMES_IN_PLACE;

    fn max_sleep_ms(&self) -> Option<u32> {
        (**self).max_sleep_ms()
    }

    fn arm(&mut self, duration_ms: u32) -> Result<Wake, Error> {
        (*self).arm(duration_ms)
    }
}

/// Busy or blocking delay. No power saving beyond what the delay provider does, but available
/// on every target.
pub struct BlockingDelay<D> {
    delay: D,
}

impl<D: DelayNs> BlockingDelay<D> {
    pub fn new(delay: D) -> Self {
        Self { delay }
    }
}

impl<D: DelayNs> WakeMechanism for BlockingDelay<D> {
    const RESUMES_IN_PLACE: bool = true;

    fn max_sleep_ms(&self) -> Option<u32> {
        None
    }

    fn arm(&mut self, duration_ms: u32) -> Result<Wake, Error> {
        self.delay.delay_ms(duration_ms);
        Ok(Wake::Resumed)
    }
}

/// A countdown timer that keeps running while the processor is suspended, e.g. an RTC alarm.
pub trait OneShotTimer {
    type Error;

    /// Longest countdown the timer supports.
    fn max_duration_ms(&self) -> Option<u32> {
        None
    }

    fn start(&mut self, duration_ms: u32) -> Result<(), Self::Error>;

    /// Suspends the processor until the countdown expires.
    fn wait(&mut self) -> Result<(), Self::Error>;
}

impl<T: OneShotTimer> OneShotTimer for &mut T {
    type Error = T::Error;

    fn max_duration_ms(&self) -> Option<u32> {
        (**self).max_duration_ms()
    }

    fn start(&mut self, duration_ms: u32) -> Result<(), Self::Error> {
        (*self).start(duration_ms)
    }

    fn wait(&mut self) -> Result<(), Self::Error> {
        (*self).wait()
    }
}

pub struct TimerWake<T> {
    timer: T,
}

impl<T: OneShotTimer> TimerWake<T> {
    pub fn new(timer: T) -> Self {
        Self { timer }
    }
}

impl<T: OneShotTimer> WakeMechanism for TimerWake<T> {
    const RESUMES_IN_PLACE: bool = true;

    fn max_sleep_ms(&self) -> Option<u32> {
        self.timer.max_duration_ms()
    }

    fn arm(&mut self, duration_ms: u32) -> Result<Wake, Error> {
        if duration_ms == 0 {
            return Ok(Wake::Resumed);
        }

        let duration_ms = match self.timer.max_duration_ms() {
            Some(max) => duration_ms.min(max),
            None => duration_ms,
        };
        self.timer
            .start(duration_ms)
            .map_err(|_| Error::WakeError)?;
        self.timer.wait().map_err(|_| Error::WakeError)?;
        Ok(Wake::Resumed)
    }
}

/// A watchdog that can be left to expire on purpose. Its expiry resets the chip, which is the
/// wake-up.
pub trait WatchdogTimer {
    /// Longest timeout the watchdog supports.
    const MAX_TIMEOUT_MS: u32;

    /// Starts the watchdog without ever feeding it and suspends the processor. Does not return on
    /// hardware.
    fn expire_after(&mut self, timeout_ms: u32);
}

impl<W: WatchdogTimer> WatchdogTimer for &mut W {
    const MAX_TIMEOUT_MS: u32 = W::MAX_TIMEOUT_MS;

    fn expire_after(&mut self, timeout_ms: u32) {
        (*self).expire_after(timeout_ms)
    }
}

pub struct WatchdogWake<W> {
    watchdog: W,
}

impl<W: WatchdogTimer> WatchdogWake<W> {
    pub fn new(watchdog: W) -> Self {
        Self { watchdog }
    }
}

impl<W: WatchdogTimer> WakeMechanism for WatchdogWake<W> {
    const RESUMES_IN_PLACE: bool = false;

    fn max_sleep_ms(&self) -> Option<u32> {
        Some(W::MAX_TIMEOUT_MS)
    }

    fn arm(&mut self, duration_ms: u32) -> Result<Wake, Error> {
        self.watchdog
            .expire_after(duration_ms.clamp(1, W::MAX_TIMEOUT_MS));
        Ok(Wake::Reset)
    }
}
