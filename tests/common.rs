#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use flashlog::platform::{PowerDomain, Reading, Sensor};
use flashlog::raw::{INIT_PACKET_SIZE, encode_init_packet};
use flashlog::wake::{OneShotTimer, WatchdogTimer};
use flashlog::{InitPacket, Label, RegionMap};
use std::cell::Cell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

pub const FLASH_SECTOR_SIZE: usize = 4096;
// Taken from https://github.com/esp-rs/esp-hal/blob/main/esp-storage/src/stub.rs
pub const WORD_SIZE: usize = 4;

/// Config, planned reset marker and wake state.
pub const AUX_PAGES: usize = 3;
pub const SAMPLES_PER_PAGE: u32 = (FLASH_SECTOR_SIZE / 16) as u32;

pub const EPOCH: u32 = 1_700_000_000;
pub const INTERVAL: u32 = 300;

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(pages: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * pages],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(pages: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * pages],
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    /// Fails every operation from the next one on.
    pub fn fail_from_now(&mut self) {
        self.fail_after_operation = self.operations.len();
    }

    pub fn erases(&self) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .cloned()
            .collect()
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE as _));

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        assert!(!bytes.is_empty());

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

/// A flash with the given number of data pages and a map covering all of it.
pub fn flash_with_regions(data_pages: u32) -> (Flash, RegionMap) {
    let flash = Flash::new(AUX_PAGES + data_pages as usize);
    let regions = RegionMap::new::<Flash>(0, data_pages, flash.len()).unwrap();
    (flash, regions)
}

pub fn init_packet() -> InitPacket {
    InitPacket::new(EPOCH, Label::from_str_truncated("DEV1"), INTERVAL)
}

pub fn init_packet_bytes(packet: &InitPacket) -> [u8; INIT_PACKET_SIZE] {
    encode_init_packet(packet)
}

/// Host side of the serial link: bytes queued in `input` are read by the device, everything the
/// device writes ends up in `output`.
#[derive(Default)]
pub struct Serial {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
}

impl Serial {
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            output: Vec::new(),
        }
    }

    pub fn send(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8(self.output.clone())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    pub fn take_lines(&mut self) -> Vec<String> {
        let lines = self.lines();
        self.output.clear();
        lines
    }
}

impl embedded_io::ErrorType for Serial {
    type Error = Infallible;
}

impl embedded_io::Read for Serial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut read = 0;
        while read < buf.len() {
            match self.input.pop_front() {
                Some(byte) => {
                    buf[read] = byte;
                    read += 1;
                }
                None => break,
            }
        }
        Ok(read)
    }
}

impl embedded_io::ReadReady for Serial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.input.is_empty())
    }
}

impl embedded_io::Write for Serial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Simulated time in milliseconds, shared between delays, timers and the scheduler clock.
#[derive(Clone, Default)]
pub struct Time(Rc<Cell<u64>>);

impl Time {
    pub fn now(&self) -> u64 {
        self.0.get()
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }

    pub fn clock(&self) -> impl FnMut() -> u64 + use<> {
        let time = self.clone();
        move || time.now()
    }
}

/// Advances the shared time instead of blocking.
#[derive(Clone, Default)]
pub struct Delay {
    pub time: Time,
    nanos: u64,
}

impl Delay {
    pub fn new(time: Time) -> Self {
        Self { time, nanos: 0 }
    }
}

impl embedded_hal::delay::DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        self.nanos += ns as u64;
        self.time.advance(self.nanos / 1_000_000);
        self.nanos %= 1_000_000;
    }
}

/// Replays the queued readings, `Err(())` entries simulate a failing driver. Once the queue is
/// empty the last value is repeated.
pub struct FakeSensor {
    pub readings: VecDeque<Result<Reading, ()>>,
    pub last: Reading,
    pub reads: usize,
}

impl FakeSensor {
    pub fn constant(value: f32) -> Self {
        Self {
            readings: VecDeque::new(),
            last: Reading { value, aux: None },
            reads: 0,
        }
    }

    pub fn sequence(readings: impl IntoIterator<Item = Result<Reading, ()>>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            last: Reading {
                value: 21.0,
                aux: None,
            },
            reads: 0,
        }
    }
}

impl Sensor for FakeSensor {
    type Error = ();

    fn read(&mut self) -> Result<Reading, Self::Error> {
        self.reads += 1;
        match self.readings.pop_front() {
            Some(Ok(reading)) => {
                self.last = reading;
                Ok(reading)
            }
            Some(Err(())) => Err(()),
            None => Ok(self.last),
        }
    }
}

#[derive(Default)]
pub struct Power {
    pub suspended: bool,
    pub suspends: usize,
    pub restores: usize,
}

impl PowerDomain for Power {
    fn suspend_unused_peripherals(&mut self) {
        self.suspended = true;
        self.suspends += 1;
    }

    fn restore_peripherals(&mut self) {
        self.suspended = false;
        self.restores += 1;
    }
}

/// Records every timeout instead of resetting the chip.
#[derive(Default)]
pub struct Watchdog {
    pub timeouts: Vec<u32>,
}

impl WatchdogTimer for Watchdog {
    const MAX_TIMEOUT_MS: u32 = 8_000;

    fn expire_after(&mut self, timeout_ms: u32) {
        self.timeouts.push(timeout_ms);
    }
}

/// Countdown on the shared time, `wait` jumps straight to the expiry.
pub struct Timer {
    pub time: Time,
    pub max_ms: Option<u32>,
    pub started: Vec<u32>,
    deadline: Option<u64>,
}

impl Timer {
    pub fn new(time: Time, max_ms: Option<u32>) -> Self {
        Self {
            time,
            max_ms,
            started: Vec::new(),
            deadline: None,
        }
    }
}

impl OneShotTimer for Timer {
    type Error = ();

    fn max_duration_ms(&self) -> Option<u32> {
        self.max_ms
    }

    fn start(&mut self, duration_ms: u32) -> Result<(), Self::Error> {
        self.started.push(duration_ms);
        self.deadline = Some(self.time.now() + duration_ms as u64);
        Ok(())
    }

    fn wait(&mut self) -> Result<(), Self::Error> {
        let deadline = self.deadline.take().ok_or(())?;
        if deadline > self.time.now() {
            self.time.advance(deadline - self.time.now());
        }
        Ok(())
    }
}
