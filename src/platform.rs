use embedded_storage::nor_flash::NorFlash;

/// Any NOR flash driver can back the log. Sensor, power and clock capabilities are separate
/// traits so that the core logic has no dependency on a particular chip.
pub trait Platform: NorFlash {}

impl<T: NorFlash> Platform for T {}

pub trait AlignedOps: Platform {
    fn align_read(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_write_ceil(size: usize) -> usize {
        align_ceil(size, Self::WRITE_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }
}

#[inline(always)]
const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: Platform> AlignedOps for T {}

/// A single acquisition from the sensor driver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    /// Temperature in degrees Celsius
    pub value: f32,
    /// Optional auxiliary channel, e.g. proximity 0..=255
    pub aux: Option<u8>,
}

/// The physical sensor driver.
pub trait Sensor {
    type Error;

    fn read(&mut self) -> Result<Reading, Self::Error>;
}

impl<S: Sensor> Sensor for &mut S {
    type Error = S::Error;

    fn read(&mut self) -> Result<Reading, Self::Error> {
        (*self).read()
    }
}

/// Peripheral power domains that are switched off while the processor waits for the next sample.
/// Implemented once per target.
pub trait PowerDomain {
    fn suspend_unused_peripherals(&mut self);

    fn restore_peripherals(&mut self);
}

impl<P: PowerDomain> PowerDomain for &mut P {
    fn suspend_unused_peripherals(&mut self) {
        (*self).suspend_unused_peripherals()
    }

    fn restore_peripherals(&mut self) {
        (*self).restore_peripherals()
    }
}

/// Monotonic time in milliseconds. It only has to keep running while the processor is suspended
/// in place, not across resets.
pub trait Clock {
    fn now_ms(&mut self) -> u64;
}

impl<F: FnMut() -> u64> Clock for F {
    fn now_ms(&mut self) -> u64 {
        self()
    }
}
