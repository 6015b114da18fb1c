//! Firmware image loading, validation and checksums.
//!
//! A main-flash image is a flat binary of `page_count * 64` bytes ending in
//! a fixed 6-byte signature. The word at offset `0x83 * 2` gives, in words,
//! the address from which the IAP loader rewrites flash. An EEPROM image is
//! taken as-is and written in 32-byte pages.

use std::ops::Range;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::constants::{
    EEPROM_PAGE_SIZE, FW_PAGE_SIZE, FW_SIGNATURE, FW_SIGNATURE_SIZE, IAP_START_ADDR_WORD,
    MAX_EEPROM_SIZE, MAX_FW_SIZE,
};
use crate::protocol::le_u16;

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("Firmware image is empty")]
    Empty,
    #[error("Firmware image too large: {actual} bytes, maximum {maximum}")]
    TooLarge { actual: usize, maximum: usize },
    #[error("Firmware size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Signature mismatch at 0x{offset:X}: expected {expected:02X?}, got {actual:02X?}")]
    SignatureMismatch {
        offset: usize,
        expected: [u8; FW_SIGNATURE_SIZE],
        actual: Vec<u8>,
    },
    #[error("IAP start address 0x{start:X} outside flashable range 0..0x{end:X}")]
    IapStartOutOfRange { start: usize, end: usize },
    #[error("Range 0x{start:X}..0x{end:X} is not a whole number of {section}-byte sections")]
    MisalignedRange {
        start: usize,
        end: usize,
        section: usize,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Firmware image held in memory for the whole session.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Read a firmware file in full.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FirmwareError> {
        let data = std::fs::read(path.as_ref())?;
        info!(path = %path.as_ref().display(), size = data.len(), "Firmware loaded");
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, FirmwareError> {
        if data.is_empty() {
            return Err(FirmwareError::Empty);
        }
        if data.len() > MAX_EEPROM_SIZE {
            return Err(FirmwareError::TooLarge {
                actual: data.len(),
                maximum: MAX_EEPROM_SIZE,
            });
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Reject images no main-flash part could hold.
    pub fn check_main_flash_limit(&self) -> Result<(), FirmwareError> {
        if self.data.len() > MAX_FW_SIZE {
            return Err(FirmwareError::TooLarge {
                actual: self.data.len(),
                maximum: MAX_FW_SIZE,
            });
        }
        Ok(())
    }

    /// Check the image matches a part with `page_count` pages.
    ///
    /// Returns the flash size in bytes.
    pub fn validate_main_flash(&self, page_count: usize) -> Result<usize, FirmwareError> {
        let expected = page_count * FW_PAGE_SIZE;
        if self.data.len() != expected {
            return Err(FirmwareError::SizeMismatch {
                expected,
                actual: self.data.len(),
            });
        }
        self.check_signature(expected)?;
        Ok(expected)
    }

    /// Check the signature that ends a flashable range of `size` bytes.
    pub fn check_signature(&self, size: usize) -> Result<(), FirmwareError> {
        let offset = size.saturating_sub(FW_SIGNATURE_SIZE);
        let actual = self.data.get(offset..size).unwrap_or(&[]);
        if actual != FW_SIGNATURE {
            return Err(FirmwareError::SignatureMismatch {
                offset,
                expected: FW_SIGNATURE,
                actual: actual.to_vec(),
            });
        }
        debug!(offset = %format!("0x{:X}", offset), "Signature verified");
        Ok(())
    }

    /// Byte address from which the IAP loader rewrites flash.
    pub fn iap_start_address(&self) -> Result<usize, FirmwareError> {
        let offset = IAP_START_ADDR_WORD * 2;
        let word = self
            .data
            .get(offset..offset + 2)
            .and_then(|b| le_u16(b).ok())
            .ok_or(FirmwareError::IapStartOutOfRange {
                start: offset,
                end: self.data.len(),
            })?;
        Ok(word as usize * 2)
    }

    /// Range to write for a flashable size of `end` bytes.
    pub fn write_range(&self, end: usize, section_size: usize) -> Result<Range<usize>, FirmwareError> {
        let start = self.iap_start_address()?;
        if start >= end || end > self.data.len() {
            return Err(FirmwareError::IapStartOutOfRange { start, end });
        }
        if section_size == 0 || (end - start) % section_size != 0 {
            return Err(FirmwareError::MisalignedRange {
                start,
                end,
                section: section_size,
            });
        }
        Ok(start..end)
    }

    /// Iterate `(offset, section)` pairs across `range`.
    pub fn sections(
        &self,
        range: Range<usize>,
        section_size: usize,
    ) -> impl Iterator<Item = (usize, &[u8])> + '_ {
        self.data[range.clone()]
            .chunks(section_size)
            .enumerate()
            .map(move |(i, chunk)| (range.start + i * section_size, chunk))
    }

    /// Number of 32-byte EEPROM pages the image occupies.
    pub fn eeprom_page_count(&self) -> usize {
        self.data.len().div_ceil(EEPROM_PAGE_SIZE)
    }

    /// Iterate `(page_index, page)` pairs, padding the last page with 0xFF.
    pub fn eeprom_pages(&self) -> impl Iterator<Item = (u16, [u8; EEPROM_PAGE_SIZE])> + '_ {
        self.data
            .chunks(EEPROM_PAGE_SIZE)
            .enumerate()
            .map(|(i, chunk)| {
                let mut page = [0xFF; EEPROM_PAGE_SIZE];
                page[..chunk.len()].copy_from_slice(chunk);
                (i as u16, page)
            })
    }
}

/// Sum of little-endian 16-bit words, wrapping. An odd trailing byte counts
/// as a word with a zero high byte.
pub fn word_checksum(data: &[u8]) -> u16 {
    data.chunks(2).fold(0u16, |acc, pair| {
        let word = match pair {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            [lo] => *lo as u16,
            _ => 0,
        };
        acc.wrapping_add(word)
    })
}

/// Sum of bytes, wrapping at 16 bits.
pub fn byte_checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}
