use crate::Mode;
use thiserror::Error;

/// Errors that can occur while logging, recovering or exporting samples. None of them is fatal:
/// every path that returns one of these leaves flash in a state from which the next boot can at
/// least come up in [`Mode::Idle`].
#[derive(Error, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The region base address has to be aligned to the flash erase unit
    #[error("invalid region offset")]
    InvalidRegionOffset,

    /// The data region needs at least one page and the whole map has to fit into the flash
    #[error("invalid region size")]
    InvalidRegionSize,

    /// The record sizes are not compatible with the read/write/erase granularity of the flash
    #[error("unsupported flash geometry")]
    UnsupportedGeometry,

    /// The internal error value is returned from the provided `NorFlash` implementation
    #[error("internal flash error")]
    FlashError,

    /// Data read back after programming differs from what was written
    #[error("flash verify failed")]
    VerifyFailed,

    /// The checksum of an init packet does not match its payload
    #[error("checksum mismatch")]
    ChecksumError,

    /// A text init packet could not be parsed
    #[error("malformed init packet")]
    MalformedPacket,

    /// Epoch or sample interval of an otherwise intact init packet is zero
    #[error("invalid configuration")]
    InvalidConfiguration,

    /// The data region is full
    #[error("out of space")]
    OutOfSpace,

    /// The init byte stream stalled
    #[error("protocol timeout")]
    ProtocolTimeout,

    /// The device was logging and came back from a reset that was not scheduled
    #[error("unexpected reset")]
    UnexpectedReset,

    /// Commands are only served in idle mode, the reported value is the current mode
    #[error("not idle: {0}")]
    NotIdle(Mode),

    /// The internal error value is returned from the serial link
    #[error("serial error")]
    SerialError,

    /// The internal error value is returned from the wake timer
    #[error("wake timer error")]
    WakeError,
}
