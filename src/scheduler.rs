//! Keeps one sample per `sample_interval_seconds`, independent of how long sampling takes and of
//! whether the wait ends in place or in a reset.

use crate::controller::Recorded;
use crate::error::Error;
use crate::platform::{Clock, Platform, PowerDomain, Sensor};
use crate::wake::{Wake, WakeMechanism};
use crate::{Logger, Mode};
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// How an interval is split into watchdog expiries when it is longer than the longest timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WatchdogPlan {
    /// Expiries per sample, at least one
    pub cycles_per_sample: u32,
    /// Timeout of every single expiry
    pub cycle_ms: u32,
}

impl WatchdogPlan {
    pub fn new(interval_seconds: u32, max_timeout_ms: u32) -> Self {
        let interval_ms = interval_seconds as u64 * 1000;
        let cycles = interval_ms.div_ceil(max_timeout_ms.max(1) as u64).max(1);
        let cycle_ms = interval_ms / cycles;

        Self {
            cycles_per_sample: u32::try_from(cycles).unwrap_or(u32::MAX),
            cycle_ms: u32::try_from(cycle_ms).unwrap_or(u32::MAX),
        }
    }
}

/// Result of one [`WakeScheduler::run_cycle`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cycle {
    /// A sample was due and handed to the logger
    Recorded(Recorded),
    /// A sample was due but the sensor failed, the slot is skipped
    SensorFault,
    /// The watchdog is armed and the device resets
    Reset,
    /// Not logging, nothing to schedule
    Stopped,
}

/// Where the in-place schedule of one session is anchored on the clock.
#[derive(Debug, Clone, Copy)]
struct Timing {
    /// `initial_epoch` of the session
    session: u32,
    /// Clock time at which the session was `origin_elapsed` seconds old
    origin_ms: u64,
    origin_elapsed: u32,
    /// Absolute time of the next sample on the clock
    next_wake_ms: u64,
}

impl Timing {
    /// Offset of the sample due at `due_ms`, in seconds since `initial_epoch`.
    fn elapsed_at(&self, due_ms: u64) -> u32 {
        let since_origin = (due_ms - self.origin_ms) / 1000;
        u32::try_from(since_origin)
            .unwrap_or(u32::MAX)
            .saturating_add(self.origin_elapsed)
    }
}

pub struct WakeScheduler<W, C> {
    wake: W,
    clock: C,
    timing: Option<Timing>,
}

impl<W: WakeMechanism, C: Clock> WakeScheduler<W, C> {
    /// The clock is only consulted by mechanisms that resume in place.
    pub fn new(wake: W, clock: C) -> Self {
        Self {
            wake,
            clock,
            timing: None,
        }
    }

    /// Time of the next sample on the scheduler's clock, if a session is being timed.
    pub fn next_wake_ms(&self) -> Option<u64> {
        self.timing.map(|timing| timing.next_wake_ms)
    }

    /// Sleeps until the next sample is due and records it.
    ///
    /// With a mechanism that resumes in place this covers exactly one interval. With the
    /// watchdog it is called once per boot: it counts the expiry that caused the boot, records a
    /// sample when enough expiries have passed and arms the watchdog again.
    pub fn run_cycle<T: Platform, S: Sensor, P: PowerDomain>(
        &mut self,
        logger: &mut Logger<T>,
        sensor: &mut S,
        power: &mut P,
    ) -> Result<Cycle, Error> {
        if logger.mode() != Mode::Logging {
            self.timing = None;
            return Ok(Cycle::Stopped);
        }

        if W::RESUMES_IN_PLACE {
            self.run_in_place(logger, sensor, power)
        } else {
            self.run_across_reset(logger, sensor, power)
        }
    }

    fn run_in_place<T: Platform, S: Sensor, P: PowerDomain>(
        &mut self,
        logger: &mut Logger<T>,
        sensor: &mut S,
        power: &mut P,
    ) -> Result<Cycle, Error> {
        let interval_ms = logger.config().sample_interval_seconds as u64 * 1000;
        let session = logger.config().initial_epoch;
        let now = self.clock.now_ms();

        let mut timing = match self.timing {
            Some(timing) if timing.session == session => timing,
            // samples of this session that are already stored keep their slots
            _ => Timing {
                session,
                origin_ms: now,
                origin_elapsed: logger.last_elapsed_seconds()?,
                next_wake_ms: now + interval_ms,
            },
        };
        let due = timing.next_wake_ms;

        // only the remainder is slept, time spent sampling does not accumulate
        let mut remaining = due.saturating_sub(now);

        #[cfg(feature = "defmt")]
        trace!("sleep: {}ms until {}", remaining, due);

        power.suspend_unused_peripherals();
        let slept = self.sleep(&mut remaining);
        power.restore_peripherals();

        if slept? == Wake::Reset {
            return Ok(Cycle::Reset);
        }

        timing.next_wake_ms = due + interval_ms;
        self.timing = Some(timing);
        sample(logger, sensor, timing.elapsed_at(due))
    }

    fn sleep(&mut self, remaining: &mut u64) -> Result<Wake, Error> {
        while *remaining > 0 {
            let limit = self.wake.max_sleep_ms().unwrap_or(u32::MAX);
            let chunk = (*remaining).min(limit as u64) as u32;
            if self.wake.arm(chunk)? == Wake::Reset {
                return Ok(Wake::Reset);
            }
            *remaining -= chunk as u64;
        }
        Ok(Wake::Resumed)
    }

    fn run_across_reset<T: Platform, S: Sensor, P: PowerDomain>(
        &mut self,
        logger: &mut Logger<T>,
        sensor: &mut S,
        power: &mut P,
    ) -> Result<Cycle, Error> {
        let plan = WatchdogPlan::new(
            logger.config().sample_interval_seconds,
            self.wake.max_sleep_ms().unwrap_or(u32::MAX),
        );

        let interval = logger.config().sample_interval_seconds.max(1);

        let planned = logger.take_planned_wake();
        let (cycles_remaining, slot) = match (logger.wake_cycles_remaining(), logger.wake_slot()) {
            (Some(remaining), Some(slot)) if planned && remaining > 1 => (remaining - 1, slot),
            (Some(_), Some(slot)) if planned => {
                let cycle = sample(logger, sensor, slot.saturating_mul(interval))?;
                if logger.mode() != Mode::Logging {
                    return Ok(cycle);
                }
                (plan.cycles_per_sample, slot.saturating_add(1))
            }
            // first cycle of a session, continues after the most recent record
            _ => (
                plan.cycles_per_sample,
                (logger.last_elapsed_seconds()? / interval).saturating_add(1),
            ),
        };

        #[cfg(feature = "defmt")]
        trace!(
            "watchdog: {} of {} cycles left to slot {}, {}ms each",
            cycles_remaining, plan.cycles_per_sample, slot, plan.cycle_ms
        );

        logger.arm_planned_reset(cycles_remaining, slot)?;
        power.suspend_unused_peripherals();
        self.wake.arm(plan.cycle_ms)?;
        Ok(Cycle::Reset)
    }
}

/// Reads the sensor for the slot due `elapsed_seconds` into the session.
fn sample<T: Platform, S: Sensor>(
    logger: &mut Logger<T>,
    sensor: &mut S,
    elapsed_seconds: u32,
) -> Result<Cycle, Error> {
    match sensor.read() {
        Ok(reading) => Ok(Cycle::Recorded(logger.record_at(reading, elapsed_seconds)?)),
        Err(_) => {
            #[cfg(feature = "defmt")]
            warn!("sensor read failed, skipping slot at {}s", elapsed_seconds);
            Ok(Cycle::SensorFault)
        }
    }
}
