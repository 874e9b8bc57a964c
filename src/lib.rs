#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

mod controller;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod raw;
pub mod region;
pub mod scheduler;
pub mod store;
pub mod wake;

/// Maximum label length is 15 bytes + 1 byte for the null terminator.
const MAX_LABEL_LENGTH: usize = 15;
pub(crate) const MAX_LABEL_NUL_TERMINATED_LENGTH: usize = MAX_LABEL_LENGTH + 1;

/// A 16-byte device label (up to 15 bytes of text, always followed by a null terminator).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Label([u8; MAX_LABEL_NUL_TERMINATED_LENGTH]);

impl Label {
    pub const fn empty() -> Self {
        Self([0u8; MAX_LABEL_NUL_TERMINATED_LENGTH])
    }

    /// Creates a null-padded label. Input longer than 15 bytes is cut at the last character
    /// boundary that still fits, it never overruns the buffer.
    pub fn from_str_truncated(s: &str) -> Self {
        let mut end = s.len().min(MAX_LABEL_LENGTH);
        while !s.is_char_boundary(end) {
            end -= 1;
        }

        let mut dst = [0u8; MAX_LABEL_NUL_TERMINATED_LENGTH];
        dst[..end].copy_from_slice(&s.as_bytes()[..end]);
        Self(dst)
    }

    /// Takes the bytes as they were received or stored, see [`Label::as_str`] for how a missing
    /// terminator is handled.
    pub(crate) const fn from_raw(raw: [u8; MAX_LABEL_NUL_TERMINATED_LENGTH]) -> Self {
        Self(raw)
    }

    pub const fn as_bytes(&self) -> &[u8; MAX_LABEL_NUL_TERMINATED_LENGTH] {
        &self.0
    }

    /// Text up to the first null byte, at most 15 bytes. Invalid UTF-8 is cut off.
    pub fn as_str(&self) -> &str {
        let text = &self.0[..MAX_LABEL_LENGTH];
        let text = match text.iter().position(|&byte| byte == 0) {
            Some(end) => &text[..end],
            None => text,
        };
        match core::str::from_utf8(text) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&text[..e.valid_up_to()]).unwrap_or_default(),
        }
    }

    /// No control characters and no field separator.
    pub fn is_csv_safe(&self) -> bool {
        !self.as_str().chars().any(is_csv_unsafe)
    }

    /// The text with every control character and field separator replaced by `_`.
    pub fn csv_chars(&self) -> impl Iterator<Item = char> + '_ {
        self.as_str()
            .chars()
            .map(|c| if is_csv_unsafe(c) { '_' } else { c })
    }

    /// Same text with the padding zeroed and the terminator in place.
    pub(crate) fn normalized(&self) -> Self {
        Self::from_str_truncated(self.as_str())
    }
}

fn is_csv_unsafe(c: char) -> bool {
    c.is_control() || c == ','
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({:?})", self.as_str())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating mode, persisted as part of the config record.
#[derive(strum::FromRepr, strum::Display, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Mode {
    /// Accepts commands over the serial link
    Idle = 0,
    /// Collects samples, does not accept commands
    Logging = 1,
    /// Streams the log out, returns to idle afterwards
    Retrieval = 2,
}

/// Hardware reset cause as reported by the chip at boot.
#[derive(strum::Display, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetCause {
    PowerOn,
    Brownout,
    /// Reset pin or debugger
    External,
    Software,
    /// Watchdog expiry, the only cause that can be a planned wake
    Watchdog,
    Unknown,
}

pub use controller::{BootEvent, Recorded};
pub use error::Error;
pub use raw::{ConfigRecord, InitPacket, Sample};
pub use region::RegionMap;

use crate::platform::Platform;
use crate::store::LogStore;
use core::fmt;

/// Scheduling state read from flash at boot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct WakeState {
    /// The reset we booted from was requested by the wake scheduler
    pub(crate) planned: bool,
    /// Watchdog expiries left until the next sample is due
    pub(crate) cycles_remaining: Option<u32>,
    /// Sample slot the expiries count down to, slot `n` is due `n` intervals after the start
    pub(crate) slot: Option<u32>,
}

/// The owned context of the device: flash, the in-memory mirror of the config record, the
/// recovered index and the scheduling state. All mode transitions go through it, nothing lives
/// in globals.
pub struct Logger<T: Platform> {
    pub(crate) store: LogStore<T>,
    pub(crate) config: ConfigRecord,
    pub(crate) wake: WakeState,
    pub(crate) reset_cause: ResetCause,
}

impl<T: Platform> Logger<T> {
    /// Restores the device state after any kind of reset:
    /// 1. Load the config record, falling back to the unconfigured default if it is not intact
    /// 2. Replay the data region to find the recovered index
    /// 3. Read and clear the planned reset marker
    /// 4. Decide the mode from the stored mode, the index and the reset cause
    ///
    /// Mode changes made here are persisted before this returns.
    pub fn boot(
        hal: T,
        regions: RegionMap,
        reset_cause: ResetCause,
    ) -> Result<(Logger<T>, BootEvent), Error> {
        let mut store = LogStore::new(hal, regions);

        let config = match store.load_config()? {
            Some(config) => config,
            None => ConfigRecord::unconfigured(),
        };
        store.recover_index()?;

        let marker = store.load_word(regions.planned_reset())?;
        if marker.is_some() {
            store.clear_word(regions.planned_reset())?;
        }
        let (cycles_remaining, slot) = store.load_word_pair(regions.wake_state())?;

        let mut logger = Self {
            store,
            config,
            wake: WakeState {
                planned: marker == Some(store::PLANNED_RESET_MAGIC)
                    && reset_cause == ResetCause::Watchdog,
                cycles_remaining,
                slot,
            },
            reset_cause,
        };

        let event = logger.reconcile()?;
        Ok((logger, event))
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn config(&self) -> &ConfigRecord {
        &self.config
    }

    /// Number of samples in the log.
    pub fn index(&self) -> u32 {
        self.store.index()
    }

    pub fn capacity(&self) -> u32 {
        self.store.capacity()
    }

    pub fn has_data(&self) -> bool {
        self.store.index() > 0
    }

    pub fn reset_cause(&self) -> ResetCause {
        self.reset_cause
    }

    /// Whether this boot was a reset requested by the wake scheduler.
    pub fn is_planned_wake(&self) -> bool {
        self.wake.planned
    }

    /// Gives back the flash, e.g. to simulate a reset.
    pub fn release(self) -> T {
        self.store.release()
    }
}
