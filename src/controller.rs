//! Mode transitions of [`Logger`]. Every transition persists the new mode before anything else
//! happens, so after a crash flash describes the mode the device was entering.

use crate::error::Error;
use crate::platform::{Platform, Reading};
use crate::raw::{InitPacket, Sample};
use crate::store::{PLANNED_RESET_MAGIC, Samples};
use crate::{Logger, Mode, WakeState};
#[cfg(feature = "defmt")]
use defmt::{info, warn};

/// What [`Logger::boot`] concluded from the persisted state and the reset cause.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootEvent {
    /// Nothing to resume, waiting for commands
    Idle,
    /// Woken by the scheduler, the session continues
    PlannedWake,
    /// A configured session that has not stored a sample yet (re)starts
    Resumed,
    /// A retrieval was cut short, back to idle
    RetrievalInterrupted,
    /// Logging was abandoned, the error says why
    ForcedIdle(Error),
}

/// Outcome of [`Logger::record`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recorded {
    /// Stored, the value is the number of samples in the log
    Stored(u32),
    /// The log is full and the device dropped to idle, the value is the number of samples
    Full(u32),
    /// The reading was outside the plausible range and was not stored
    Discarded,
    /// Not logging, nothing was stored
    NotLogging,
}

impl<T: Platform> Logger<T> {
    pub(crate) fn reconcile(&mut self) -> Result<BootEvent, Error> {
        let configured = self.config.is_configured();
        let index = self.store.index();

        let event = match self.config.mode {
            Mode::Retrieval => {
                self.transition(Mode::Idle)?;
                BootEvent::RetrievalInterrupted
            }
            Mode::Logging if !configured => {
                self.transition(Mode::Idle)?;
                BootEvent::ForcedIdle(Error::InvalidConfiguration)
            }
            Mode::Logging if self.store.is_full() => {
                self.transition(Mode::Idle)?;
                BootEvent::ForcedIdle(Error::OutOfSpace)
            }
            Mode::Logging if self.wake.planned => BootEvent::PlannedWake,
            Mode::Logging if index == 0 => BootEvent::Resumed,
            Mode::Logging => {
                #[cfg(feature = "defmt")]
                warn!("unexpected reset ({}) while logging", self.reset_cause);

                self.transition(Mode::Idle)?;
                BootEvent::ForcedIdle(Error::UnexpectedReset)
            }
            Mode::Idle if configured && index == 0 => {
                self.transition(Mode::Logging)?;
                BootEvent::Resumed
            }
            Mode::Idle => BootEvent::Idle,
        };

        #[cfg(feature = "defmt")]
        info!("boot: {} -> {} ({} samples)", event, self.config.mode, index);

        Ok(event)
    }

    /// Persists the new mode and only then adopts it. On error the in-memory state is left as it
    /// was.
    pub(crate) fn transition(&mut self, mode: Mode) -> Result<(), Error> {
        if self.config.mode == mode {
            return Ok(());
        }

        let next = self.config.with_mode(mode);
        self.store.save_config(&next)?;

        #[cfg(feature = "defmt")]
        info!("mode: {} -> {}", self.config.mode, mode);

        self.config = next;
        Ok(())
    }

    /// Starts a fresh session from a host supplied packet: verify, erase the whole log, persist
    /// the new config in logging mode.
    pub fn begin_logging(&mut self, packet: &InitPacket) -> Result<(), Error> {
        if self.config.mode != Mode::Idle {
            return Err(Error::NotIdle(self.config.mode));
        }

        let config = packet.to_config()?;

        // an interrupted reset leaves an erased config page, which boots as idle
        self.store.reset()?;
        self.store.save_config(&config)?;

        #[cfg(feature = "defmt")]
        info!(
            "logging: epoch {} every {}s as {}",
            config.initial_epoch, config.sample_interval_seconds, config.device_label
        );

        self.config = config;
        self.wake = WakeState::default();
        Ok(())
    }

    /// Ends the current session on request. The log is kept.
    pub fn stop_logging(&mut self) -> Result<(), Error> {
        match self.config.mode {
            Mode::Logging => self.transition(Mode::Idle),
            _ => Ok(()),
        }
    }

    /// Appends one reading, stamped one interval after the most recent record.
    pub fn record(&mut self, reading: Reading) -> Result<Recorded, Error> {
        if self.config.mode != Mode::Logging {
            return Ok(Recorded::NotLogging);
        }

        let elapsed_seconds = self
            .last_elapsed_seconds()?
            .saturating_add(self.config.sample_interval_seconds);
        self.record_at(reading, elapsed_seconds)
    }

    /// Appends one reading taken `elapsed_seconds` after `initial_epoch`. Drops to idle once the
    /// data region is full.
    pub fn record_at(&mut self, reading: Reading, elapsed_seconds: u32) -> Result<Recorded, Error> {
        if self.config.mode != Mode::Logging {
            return Ok(Recorded::NotLogging);
        }

        let sample = Sample {
            elapsed_seconds,
            value: reading.value,
            aux: reading.aux,
        };

        // an implausible record would end the log on the next recovery scan
        if !sample.is_plausible() {
            #[cfg(feature = "defmt")]
            warn!("discarding implausible reading {}", reading.value);
            return Ok(Recorded::Discarded);
        }

        match self.store.append(&sample) {
            Ok(()) if self.store.is_full() => {
                self.transition(Mode::Idle)?;
                Ok(Recorded::Full(self.store.index()))
            }
            Ok(()) => Ok(Recorded::Stored(self.store.index())),
            Err(Error::OutOfSpace) => {
                self.transition(Mode::Idle)?;
                Ok(Recorded::Full(self.store.index()))
            }
            Err(e) => Err(e),
        }
    }

    pub fn begin_retrieval(&mut self) -> Result<(), Error> {
        if self.config.mode != Mode::Idle {
            return Err(Error::NotIdle(self.config.mode));
        }
        self.transition(Mode::Retrieval)
    }

    pub fn end_retrieval(&mut self) -> Result<(), Error> {
        match self.config.mode {
            Mode::Retrieval => self.transition(Mode::Idle),
            _ => Ok(()),
        }
    }

    /// Offset of the most recent record, 0 for an empty log.
    pub fn last_elapsed_seconds(&mut self) -> Result<u32, Error> {
        Ok(self.store.last()?.map_or(0, |sample| sample.elapsed_seconds))
    }

    /// All stored samples in the order they were recorded.
    pub fn samples(&mut self) -> Samples<'_, T> {
        self.store.read_all()
    }

    /// Reports a planned wake only once per boot, so that one expiry is never counted twice.
    pub(crate) fn take_planned_wake(&mut self) -> bool {
        core::mem::take(&mut self.wake.planned)
    }

    /// Watchdog expiries left before the next sample, as persisted before the last planned reset.
    pub fn wake_cycles_remaining(&self) -> Option<u32> {
        self.wake.cycles_remaining
    }

    /// Sample slot the watchdog expiries count down to, as persisted before the last planned
    /// reset.
    pub fn wake_slot(&self) -> Option<u32> {
        self.wake.slot
    }

    /// Persists the cycle counter with its slot and then the planned reset marker. Must be the
    /// last flash operation before the watchdog is allowed to expire.
    pub fn arm_planned_reset(&mut self, cycles_remaining: u32, slot: u32) -> Result<(), Error> {
        let regions = *self.store.regions();
        self.store
            .save_word_pair(regions.wake_state(), cycles_remaining, slot)?;
        self.wake.cycles_remaining = Some(cycles_remaining);
        self.wake.slot = Some(slot);
        self.store
            .save_word(regions.planned_reset(), PLANNED_RESET_MAGIC)
    }
}
