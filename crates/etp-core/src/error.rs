//! Error types for IAP operations.

use std::fmt;

use thiserror::Error;

use crate::firmware::FirmwareError;
use crate::transport::TransportError;

/// Result type for IAP operations.
pub type Result<T> = std::result::Result<T, IapError>;

/// Coarse classification of a failure, for precise diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown IC, bad image: nothing was written.
    Identification,
    /// I/O failure on the channel.
    Transport,
    /// The controller reported an error flag or rejected a step.
    Nack,
    /// The device or its IAP version lacks the requested capability.
    Unsupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Identification => write!(f, "identification"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Nack => write!(f, "negative acknowledgement"),
            ErrorKind::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Error type for IAP operations.
#[derive(Error, Debug)]
pub enum IapError {
    #[error("The IC type is not supported (0x{0:02X})")]
    UnsupportedIc(u8),

    #[error("Firmware image: {0}")]
    Firmware(#[from] FirmwareError),

    #[error("Transport: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid page geometry: page {page_size} bytes, section {section_size} bytes")]
    InvalidGeometry {
        page_size: usize,
        section_size: usize,
    },

    #[error("IAP type readback 0x{actual:04X}, expected 0x{expected:04X}")]
    IapTypeMismatch { expected: u16, actual: u16 },

    #[error("Got an unexpected IAP password (IAP control 0x{ctrl:04X})")]
    PasswordRejected { ctrl: u16 },

    #[error("IAP reports failed write at 0x{offset:X} (IAP control 0x{ctrl:04X})")]
    BlockRejected { offset: usize, ctrl: u16 },

    #[error("Block at 0x{offset:X} failed after {attempts} attempts: {source}")]
    BlockWriteFailed {
        offset: usize,
        attempts: usize,
        #[source]
        source: Box<IapError>,
    },

    #[error("Flim type is enabled but IAP version {iap_version} cannot handle it")]
    FlimUnsupported { iap_version: u16 },

    #[error("EEPROM update not supported (flim 0x{flim_type:04X}, driver IC {driver_ic}, EEPROM IAP version {iap_version})")]
    EepromUnsupported {
        flim_type: u16,
        driver_ic: u8,
        iap_version: u8,
    },

    #[error("EEPROM {stage} not ready after {attempts} polls")]
    EepromNotReady { stage: &'static str, attempts: usize },

    #[error("EEPROM page {page} rejected with code 0x{code:04X}")]
    EepromPageRejected { page: u16, code: u16 },

    #[error("EEPROM page {page} failed after {attempts} attempts: {source}")]
    EepromPageFailed {
        page: u16,
        attempts: usize,
        #[source]
        source: Box<IapError>,
    },

    #[error("EEPROM checksum record readback 0x{actual:04X}, expected 0x{expected:04X}")]
    ChecksumRecordMismatch { expected: u16, actual: u16 },
}

impl IapError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IapError::UnsupportedIc(_) | IapError::Firmware(_) | IapError::InvalidGeometry { .. } => {
                ErrorKind::Identification
            }
            IapError::Transport(_) => ErrorKind::Transport,
            IapError::IapTypeMismatch { .. }
            | IapError::PasswordRejected { .. }
            | IapError::BlockRejected { .. }
            | IapError::EepromNotReady { .. }
            | IapError::EepromPageRejected { .. }
            | IapError::ChecksumRecordMismatch { .. } => ErrorKind::Nack,
            IapError::BlockWriteFailed { source, .. } | IapError::EepromPageFailed { source, .. } => {
                source.kind()
            }
            IapError::FlimUnsupported { .. } | IapError::EepromUnsupported { .. } => {
                ErrorKind::Unsupported
            }
        }
    }
}
