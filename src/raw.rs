//! Binary layouts of everything that is persisted or received over the wire, and the additive
//! checksum shared by the config record and the init packet.

use crate::error::Error;
use crate::{Label, MAX_LABEL_NUL_TERMINATED_LENGTH, Mode};
use core::mem::size_of;
use core::str::FromStr;

pub const CONFIG_RECORD_SIZE: usize = 48;
pub const SAMPLE_RECORD_SIZE: usize = 16;
pub const INIT_PACKET_SIZE: usize = 28;

/// Values outside of this open interval are treated as "no record here". Erased flash decodes
/// to NaN which fails both comparisons.
pub const PLAUSIBLE_MIN: f32 = -100.0;
pub const PLAUSIBLE_MAX: f32 = 200.0;

const SAMPLE_FLAG_AUX: u8 = 0x01;

const _: () = assert!(size_of::<RawConfig>() == CONFIG_RECORD_SIZE);
const _: () = assert!(size_of::<RawSample>() == SAMPLE_RECORD_SIZE);
const _: () = assert!(size_of::<RawInitPacket>() == INIT_PACKET_SIZE);

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub(crate) struct RawConfig {
    pub(crate) initial_epoch: u32,
    pub(crate) sample_interval: u32,
    pub(crate) label: [u8; MAX_LABEL_NUL_TERMINATED_LENGTH],
    pub(crate) mode: u8,
    pub(crate) _reserved: [u8; 19],
    pub(crate) checksum: u32,
}

pub(crate) union RawConfigBytes {
    pub(crate) config: RawConfig,
    pub(crate) raw: [u8; CONFIG_RECORD_SIZE],
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub(crate) struct RawSample {
    pub(crate) elapsed_seconds: u32,
    pub(crate) value: f32,
    pub(crate) aux: u8,
    pub(crate) flags: u8,
    pub(crate) _reserved: [u8; 6],
}

pub(crate) union RawSampleBytes {
    pub(crate) sample: RawSample,
    pub(crate) raw: [u8; SAMPLE_RECORD_SIZE],
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub(crate) struct RawInitPacket {
    pub(crate) epoch: u32,
    pub(crate) label: [u8; MAX_LABEL_NUL_TERMINATED_LENGTH],
    pub(crate) interval: u32,
    pub(crate) checksum: u32,
}

pub(crate) union RawInitPacketBytes {
    pub(crate) packet: RawInitPacket,
    pub(crate) raw: [u8; INIT_PACKET_SIZE],
}

/// Sum of all bytes, truncated to 32 bits. Callers pass the payload without the trailing
/// checksum field.
pub fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &byte| acc.wrapping_add(byte as u32))
}

/// The single persisted configuration of the device.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigRecord {
    /// Start of the logging session in seconds since the unix epoch, 0 means unconfigured
    pub initial_epoch: u32,
    pub sample_interval_seconds: u32,
    pub device_label: Label,
    pub mode: Mode,
}

impl ConfigRecord {
    /// Power-on default, used whenever the config page does not hold an intact record.
    pub const fn unconfigured() -> Self {
        Self {
            initial_epoch: 0,
            sample_interval_seconds: 0,
            device_label: Label::empty(),
            mode: Mode::Idle,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.initial_epoch != 0 && self.sample_interval_seconds != 0
    }

    pub(crate) fn with_mode(&self, mode: Mode) -> Self {
        Self { mode, ..*self }
    }
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self::unconfigured()
    }
}

pub fn encode_config(config: &ConfigRecord) -> [u8; CONFIG_RECORD_SIZE] {
    let mut raw = RawConfig {
        initial_epoch: config.initial_epoch,
        sample_interval: config.sample_interval_seconds,
        label: *config.device_label.as_bytes(),
        mode: config.mode as u8,
        _reserved: [0xFF; 19],
        checksum: 0,
    };
    // Safety: both union members are plain bytes of identical size
    let bytes = unsafe { RawConfigBytes { config: raw }.raw };
    raw.checksum = checksum(&bytes[..CONFIG_RECORD_SIZE - size_of::<u32>()]);
    unsafe { RawConfigBytes { config: raw }.raw }
}

/// Returns `None` if the bytes do not hold an intact record, e.g. an erased page or a torn write.
pub fn decode_config(bytes: &[u8; CONFIG_RECORD_SIZE]) -> Option<ConfigRecord> {
    let raw = RawConfigBytes { raw: *bytes };
    // Safety: every bit pattern is a valid RawConfig, the mode is checked below
    let config = unsafe { raw.config };

    let stored = config.checksum;
    if stored != checksum(&bytes[..CONFIG_RECORD_SIZE - size_of::<u32>()]) {
        return None;
    }

    Some(ConfigRecord {
        initial_epoch: config.initial_epoch,
        sample_interval_seconds: config.sample_interval,
        device_label: Label::from_raw(config.label),
        mode: Mode::from_repr(config.mode)?,
    })
}

/// One temperature reading as stored in the data region.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    /// Seconds between `initial_epoch` and the scheduled time of this sample
    pub elapsed_seconds: u32,
    pub value: f32,
    pub aux: Option<u8>,
}

impl Sample {
    /// The scan stops at the first record that fails this test.
    pub fn is_plausible(&self) -> bool {
        self.value > PLAUSIBLE_MIN && self.value < PLAUSIBLE_MAX
    }

    /// Absolute timestamp in seconds since the unix epoch.
    pub fn timestamp(&self, initial_epoch: u32) -> u64 {
        initial_epoch as u64 + self.elapsed_seconds as u64
    }
}

pub fn encode_sample(sample: &Sample) -> [u8; SAMPLE_RECORD_SIZE] {
    let raw = RawSampleBytes {
        sample: RawSample {
            elapsed_seconds: sample.elapsed_seconds,
            value: sample.value,
            aux: sample.aux.unwrap_or(u8::MAX),
            flags: if sample.aux.is_some() {
                !SAMPLE_FLAG_AUX
            } else {
                u8::MAX
            },
            _reserved: [0xFF; 6],
        },
    };
    // Safety: both union members are plain bytes of identical size
    unsafe { raw.raw }
}

pub fn decode_sample(bytes: &[u8; SAMPLE_RECORD_SIZE]) -> Sample {
    let raw = RawSampleBytes { raw: *bytes };
    // Safety: every bit pattern is a valid RawSample
    let sample = unsafe { raw.sample };
    let flags = sample.flags;

    Sample {
        elapsed_seconds: sample.elapsed_seconds,
        value: sample.value,
        // flags are active low so that erased flash reads as "no aux"
        aux: (flags & SAMPLE_FLAG_AUX == 0).then_some(sample.aux),
    }
}

/// Configuration pushed by the host to start a new logging session. Never persisted as is.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InitPacket {
    pub epoch: u32,
    pub label: Label,
    pub interval_seconds: u32,
    pub checksum: u32,
}

impl InitPacket {
    /// Builds a packet with a matching checksum.
    pub fn new(epoch: u32, label: Label, interval_seconds: u32) -> Self {
        let mut packet = Self {
            epoch,
            label,
            interval_seconds,
            checksum: 0,
        };
        packet.checksum = packet.payload_checksum();
        packet
    }

    fn payload_checksum(&self) -> u32 {
        let raw = encode_init_packet(self);
        checksum(&raw[..INIT_PACKET_SIZE - size_of::<u32>()])
    }

    pub fn verify(&self) -> Result<(), Error> {
        if self.payload_checksum() != self.checksum {
            return Err(Error::ChecksumError);
        }
        Ok(())
    }

    /// Session configuration for this packet. The checksum has to match, neither epoch nor
    /// interval may be zero and the label has to fit into a CSV field.
    pub fn to_config(&self) -> Result<ConfigRecord, Error> {
        self.verify()?;

        let label = self.label.normalized();
        if !label.is_csv_safe() {
            return Err(Error::InvalidConfiguration);
        }

        let config = ConfigRecord {
            initial_epoch: self.epoch,
            sample_interval_seconds: self.interval_seconds,
            device_label: label,
            mode: Mode::Logging,
        };
        if !config.is_configured() {
            return Err(Error::InvalidConfiguration);
        }
        Ok(config)
    }
}

impl FromStr for InitPacket {
    type Err = Error;

    /// Parses the text form `<epoch,label,interval,checksum>`. The checksum is the decimal
    /// additive checksum of the equivalent binary packet and is not verified here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .trim()
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .ok_or(Error::MalformedPacket)?;

        let mut fields = body.split(',');
        let mut next = || fields.next().map(str::trim).ok_or(Error::MalformedPacket);

        let epoch = next()?.parse().map_err(|_| Error::MalformedPacket)?;
        let label = Label::from_str_truncated(next()?);
        let interval_seconds = next()?.parse().map_err(|_| Error::MalformedPacket)?;
        let checksum = next()?.parse().map_err(|_| Error::MalformedPacket)?;

        if fields.next().is_some() {
            return Err(Error::MalformedPacket);
        }

        Ok(Self {
            epoch,
            label,
            interval_seconds,
            checksum,
        })
    }
}

pub fn encode_init_packet(packet: &InitPacket) -> [u8; INIT_PACKET_SIZE] {
    let raw = RawInitPacketBytes {
        packet: RawInitPacket {
            epoch: packet.epoch,
            label: *packet.label.as_bytes(),
            interval: packet.interval_seconds,
            checksum: packet.checksum,
        },
    };
    // Safety: both union members are plain bytes of identical size
    unsafe { raw.raw }
}

pub fn decode_init_packet(bytes: &[u8; INIT_PACKET_SIZE]) -> InitPacket {
    let raw = RawInitPacketBytes { raw: *bytes };
    // Safety: every bit pattern is a valid RawInitPacket
    let packet = unsafe { raw.packet };

    InitPacket {
        epoch: packet.epoch,
        label: Label::from_raw(packet.label),
        interval_seconds: packet.interval,
        checksum: packet.checksum,
    }
}

/// Recomputes the checksum over everything but the trailing checksum field.
pub fn verify_init_packet(bytes: &[u8; INIT_PACKET_SIZE]) -> bool {
    checksum(&bytes[..INIT_PACKET_SIZE - size_of::<u32>()]) == decode_init_packet(bytes).checksum
}
