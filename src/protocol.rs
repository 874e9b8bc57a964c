//! Line based command protocol on the serial link. Only served while the device is idle.
//!
//! | byte      | reply                                                       |
//! |-----------|-------------------------------------------------------------|
//! | `?`       | `Hello World!`                                              |
//! | `!`, `s`  | `HAS_DATA` or `NEED_CONFIGURATION`                          |
//! | `i`       | `READY_FOR_INIT`, then a binary init packet is read         |
//! | `l`       | `READY_FOR_DATA`, then a text init packet `<...>` is read   |
//! | `r`       | CSV export terminated by `END_DATA`                         |
//! | otherwise | `UNKNOWN`                                                   |

use crate::error::Error;
use crate::platform::Platform;
use crate::raw::{INIT_PACKET_SIZE, InitPacket, decode_init_packet};
use crate::{Logger, Mode};
use core::fmt::Write as _;
use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};
#[cfg(feature = "defmt")]
use defmt::{debug, warn};

/// How long the host has to deliver an init packet after the ready reply.
pub const INIT_TIMEOUT_MS: u32 = 5_000;
const POLL_INTERVAL_MS: u32 = 10;

const LINE_CAPACITY: usize = 64;
const TEXT_PACKET_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Hello,
    Status,
    Init,
    InitText,
    Retrieve,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(byte: u8) -> Self {
        match byte {
            b'?' => Command::Hello,
            b'!' | b's' => Command::Status,
            b'i' => Command::Init,
            b'l' => Command::InitText,
            b'r' => Command::Retrieve,
            other => Command::Unknown(other),
        }
    }
}

#[derive(strum::IntoStaticStr, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Reply {
    #[strum(serialize = "Hello World!")]
    Hello,
    HasData,
    NeedConfiguration,
    ReadyForInit,
    ReadyForData,
    Initialized,
    ChecksumError,
    InitFailed,
    Timeout,
    Unknown,
    EndData,
}

impl Reply {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Serves commands from a byte stream. `D` paces the polling while waiting for an init packet.
pub struct Console<S, D> {
    serial: S,
    delay: D,
}

impl<S, D> Console<S, D>
where
    S: Read + Write + ReadReady,
    D: DelayNs,
{
    pub fn new(serial: S, delay: D) -> Self {
        Self { serial, delay }
    }

    pub fn release(self) -> (S, D) {
        (self.serial, self.delay)
    }

    /// Serves one pending command byte, if there is one. Line endings are skipped.
    pub fn poll<T: Platform>(&mut self, logger: &mut Logger<T>) -> Result<Option<Command>, Error> {
        if !self.serial.read_ready().map_err(|_| Error::SerialError)? {
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        if self.serial.read(&mut byte).map_err(|_| Error::SerialError)? == 0 {
            return Ok(None);
        }
        if byte[0] == b'\r' || byte[0] == b'\n' {
            return Ok(None);
        }

        let command = Command::from(byte[0]);
        self.handle(logger, command)?;
        Ok(Some(command))
    }

    /// Executes a command. Errors about the init packet are returned after the matching reply
    /// has been sent, the device stays idle in that case.
    pub fn handle<T: Platform>(
        &mut self,
        logger: &mut Logger<T>,
        command: Command,
    ) -> Result<(), Error> {
        if logger.mode() != Mode::Idle {
            return Err(Error::NotIdle(logger.mode()));
        }

        #[cfg(feature = "defmt")]
        debug!("command: {}", command);

        match command {
            Command::Hello => self.reply(Reply::Hello),
            Command::Status if logger.has_data() => self.reply(Reply::HasData),
            Command::Status => self.reply(Reply::NeedConfiguration),
            Command::Init => self.init_binary(logger),
            Command::InitText => self.init_text(logger),
            Command::Retrieve => self.retrieve(logger),
            Command::Unknown(_) => self.reply(Reply::Unknown),
        }
    }

    fn init_binary<T: Platform>(&mut self, logger: &mut Logger<T>) -> Result<(), Error> {
        self.reply(Reply::ReadyForInit)?;

        let mut buf = [0u8; INIT_PACKET_SIZE];
        let mut waited = 0;
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read_within(&mut buf[filled..], &mut waited)?;
        }

        self.start_session(logger, &decode_init_packet(&buf))
    }

    fn init_text<T: Platform>(&mut self, logger: &mut Logger<T>) -> Result<(), Error> {
        self.reply(Reply::ReadyForData)?;

        let mut text = heapless::Vec::<u8, TEXT_PACKET_CAPACITY>::new();
        let mut waited = 0;
        loop {
            let mut byte = [0u8; 1];
            self.read_within(&mut byte, &mut waited)?;
            match byte[0] {
                b'<' => text.clear(),
                b'\r' | b'\n' if text.is_empty() => continue,
                _ => (),
            }
            if text.push(byte[0]).is_err() {
                self.reply(Reply::InitFailed)?;
                return Err(Error::MalformedPacket);
            }
            if byte[0] == b'>' {
                break;
            }
        }

        let packet = core::str::from_utf8(&text)
            .map_err(|_| Error::MalformedPacket)
            .and_then(str::parse::<InitPacket>);
        match packet {
            Ok(packet) => self.start_session(logger, &packet),
            Err(e) => {
                self.reply(Reply::InitFailed)?;
                Err(e)
            }
        }
    }

    fn start_session<T: Platform>(
        &mut self,
        logger: &mut Logger<T>,
        packet: &InitPacket,
    ) -> Result<(), Error> {
        match logger.begin_logging(packet) {
            Ok(()) => self.reply(Reply::Initialized),
            Err(Error::ChecksumError) => {
                #[cfg(feature = "defmt")]
                warn!("init packet checksum mismatch");
                self.reply(Reply::ChecksumError)?;
                Err(Error::ChecksumError)
            }
            Err(e) => {
                self.reply(Reply::InitFailed)?;
                Err(e)
            }
        }
    }

    /// Reads whatever is available into `buf`, polling until at least one byte arrived. Replies
    /// `TIMEOUT` once `waited` reaches [`INIT_TIMEOUT_MS`].
    fn read_within(&mut self, buf: &mut [u8], waited: &mut u32) -> Result<usize, Error> {
        loop {
            if self.serial.read_ready().map_err(|_| Error::SerialError)? {
                let read = self.serial.read(buf).map_err(|_| Error::SerialError)?;
                if read > 0 {
                    return Ok(read);
                }
            }

            if *waited >= INIT_TIMEOUT_MS {
                self.reply(Reply::Timeout)?;
                return Err(Error::ProtocolTimeout);
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
            *waited += POLL_INTERVAL_MS;
        }
    }

    /// Streams the log as CSV. The device is in retrieval mode while streaming and back in idle
    /// afterwards, also if streaming failed.
    fn retrieve<T: Platform>(&mut self, logger: &mut Logger<T>) -> Result<(), Error> {
        logger.begin_retrieval()?;
        let streamed = self.export_csv(logger);
        let ended = logger.end_retrieval();
        streamed.and(ended)
    }

    fn export_csv<T: Platform>(&mut self, logger: &mut Logger<T>) -> Result<(), Error> {
        let config = *logger.config();
        let mut line = heapless::String::<LINE_CAPACITY>::new();

        write!(line, "initial_epoch,{}", config.initial_epoch).map_err(|_| Error::SerialError)?;
        self.line(&line)?;

        line.clear();
        write!(line, "interval,{}", config.sample_interval_seconds)
            .map_err(|_| Error::SerialError)?;
        self.line(&line)?;

        line.clear();
        line.push_str("label,").map_err(|_| Error::SerialError)?;
        for c in config.device_label.csv_chars() {
            line.push(c).map_err(|_| Error::SerialError)?;
        }
        self.line(&line)?;

        self.line("timestamp,value,aux")?;

        for sample in logger.samples() {
            let sample = sample?;
            line.clear();
            write!(
                line,
                "{},{:.2}",
                sample.timestamp(config.initial_epoch),
                sample.value
            )
            .map_err(|_| Error::SerialError)?;
            if let Some(aux) = sample.aux {
                write!(line, ",{aux}").map_err(|_| Error::SerialError)?;
            }
            self.line(&line)?;
        }

        self.reply(Reply::EndData)
    }

    fn reply(&mut self, reply: Reply) -> Result<(), Error> {
        self.line(reply.as_str())
    }

    fn line(&mut self, text: &str) -> Result<(), Error> {
        self.serial
            .write_all(text.as_bytes())
            .and_then(|()| self.serial.write_all(b"\n"))
            .and_then(|()| self.serial.flush())
            .map_err(|_| Error::SerialError)
    }
}
