//! 16-bit register reads and register+value writes.
//!
//! Every higher-level operation is a sequence of these two primitives. Values
//! are decoded as `byte0 | (byte1 << 8)`.

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::transport::{IapTransport, TransportError};

/// Bytes returned by a register read.
pub const REGISTER_REPLY_LEN: usize = 2;

/// Decode the first two bytes of `buf` as a little-endian word.
pub fn le_u16(buf: &[u8]) -> Result<u16, TransportError> {
    if buf.len() < 2 {
        return Err(TransportError::ShortRead {
            expected: 2,
            actual: buf.len(),
        });
    }
    Ok(LittleEndian::read_u16(buf))
}

/// Register-level access, available on every transport.
pub trait RegisterAccess {
    /// Read raw reply bytes from a register.
    fn read_register_bytes(&self, reg: u16, len: usize) -> Result<Vec<u8>, TransportError>;

    /// Read a register as a little-endian word.
    fn read_register(&self, reg: u16) -> Result<u16, TransportError> {
        le_u16(&self.read_register_bytes(reg, REGISTER_REPLY_LEN)?)
    }

    /// Write a 16-bit value to a register.
    fn write_register(&self, reg: u16, value: u16) -> Result<(), TransportError>;
}

impl<T: IapTransport + ?Sized> RegisterAccess for T {
    fn read_register_bytes(&self, reg: u16, len: usize) -> Result<Vec<u8>, TransportError> {
        let reply = self.send_receive(&reg.to_le_bytes(), len)?;
        trace!(reg = %format!("0x{:04X}", reg), reply = ?reply, "Register read");
        Ok(reply)
    }

    fn write_register(&self, reg: u16, value: u16) -> Result<(), TransportError> {
        let mut command = [0u8; 4];
        LittleEndian::write_u16(&mut command[..2], reg);
        LittleEndian::write_u16(&mut command[2..], value);
        trace!(reg = %format!("0x{:04X}", reg), value = %format!("0x{:04X}", value), "Register write");
        self.send(&command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn test_le_u16() {
        assert_eq!(le_u16(&[0x34, 0x12]).unwrap(), 0x1234);
        assert_eq!(le_u16(&[0xFF, 0xFF, 0x00]).unwrap(), 0xFFFF);
        assert!(le_u16(&[0x01]).is_err());
    }

    #[test]
    fn test_write_register_encodes_little_endian() {
        let mock = MockTransport::new();
        mock.write_register(0x0311, 0x1EA5).unwrap();
        assert_eq!(mock.get_writes(), vec![(0x0311, 0x1EA5)]);
    }

    #[test]
    fn test_read_register_decodes_reply() {
        let mock = MockTransport::new();
        mock.set_register(0x0103, 0x0D42);
        assert_eq!(mock.read_register(0x0103).unwrap(), 0x0D42);
    }
}
