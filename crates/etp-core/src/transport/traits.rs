//! Transport layer abstraction.
//!
//! Defines the `IapTransport` trait for register-level communication with the
//! touchpad, allowing the hidraw, i2c-dev and tunnelled implementations (and a
//! mock) to be used interchangeably.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Touchpad not found (VID={vid:04X} PID={pid:04X}, I2C address 0x{i2c_address:02X})")]
    DeviceNotFound {
        vid: u16,
        pid: u16,
        i2c_address: u16,
    },

    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind I2C address 0x{address:02X}: {source}")]
    BindFailed {
        address: u16,
        #[source]
        source: nix::Error,
    },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Tunnel reply echoed register {actual:04X}, expected {expected:04X}")]
    EchoMismatch { expected: u16, actual: u16 },

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("ioctl failed: {0}")]
    Ioctl(#[from] nix::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Physical binding of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    /// hidraw feature reports
    Hid,
    /// Plain i2c-dev reads and writes
    I2c,
    /// Command reports tunnelled through HID-over-I2C framing on i2c-dev
    I2cHid,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceKind::Hid => write!(f, "HID"),
            InterfaceKind::I2c => write!(f, "I2C"),
            InterfaceKind::I2cHid => write!(f, "I2C-over-HID"),
        }
    }
}

/// Abstract touchpad transport.
///
/// Commands are register-level byte strings: two little-endian register
/// bytes for a read, or register bytes followed by a little-endian 16-bit
/// value for a write. Each implementation frames them for its bus.
pub trait IapTransport: Send {
    /// Which physical binding this is.
    fn interface(&self) -> InterfaceKind;

    /// Send a command that expects no reply.
    fn send(&self, command: &[u8]) -> Result<(), TransportError>;

    /// Send a read command and return `reply_len` payload bytes.
    fn send_receive(&self, command: &[u8], reply_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Push one data block (payload followed by its checksum).
    fn write_block(&self, block: &[u8]) -> Result<(), TransportError>;
}

impl<T: IapTransport + Sync + ?Sized> IapTransport for &T {
    fn interface(&self) -> InterfaceKind {
        (**self).interface()
    }

    fn send(&self, command: &[u8]) -> Result<(), TransportError> {
        (**self).send(command)
    }

    fn send_receive(&self, command: &[u8], reply_len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).send_receive(command, reply_len)
    }

    fn write_block(&self, block: &[u8]) -> Result<(), TransportError> {
        (**self).write_block(block)
    }
}

impl<T: IapTransport + ?Sized> IapTransport for Box<T> {
    fn interface(&self) -> InterfaceKind {
        (**self).interface()
    }

    fn send(&self, command: &[u8]) -> Result<(), TransportError> {
        (**self).send(command)
    }

    fn send_receive(&self, command: &[u8], reply_len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).send_receive(command, reply_len)
    }

    fn write_block(&self, block: &[u8]) -> Result<(), TransportError> {
        (**self).write_block(block)
    }
}

/// Split a register command into its register and optional value.
pub(crate) fn split_command(command: &[u8]) -> Result<(u16, Option<[u8; 2]>), TransportError> {
    match command {
        [lo, hi] => Ok((u16::from_le_bytes([*lo, *hi]), None)),
        [lo, hi, v0, v1] => Ok((u16::from_le_bytes([*lo, *hi]), Some([*v0, *v1]))),
        _ => Err(TransportError::MalformedCommand(format!(
            "expected 2 or 4 bytes, got {}",
            command.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_read_command() {
        let (reg, value) = split_command(&[0x10, 0x03]).unwrap();
        assert_eq!(reg, 0x0310);
        assert!(value.is_none());
    }

    #[test]
    fn test_split_write_command() {
        let (reg, value) = split_command(&[0x14, 0x03, 0xF0, 0xF0]).unwrap();
        assert_eq!(reg, 0x0314);
        assert_eq!(value, Some([0xF0, 0xF0]));
    }

    #[test]
    fn test_split_rejects_odd_lengths() {
        assert!(matches!(
            split_command(&[0x01, 0x02, 0x03]),
            Err(TransportError::MalformedCommand(_))
        ));
    }
}
