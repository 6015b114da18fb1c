//! i2c-dev transport: raw register reads and writes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use tracing::{debug, instrument, warn};

use super::traits::{IapTransport, InterfaceKind, TransportError, split_command};
use super::tunnel::I2cHidTransport;
use crate::protocol::constants::{ETP_I2C_IAP_REG_H, ETP_I2C_IAP_REG_L};

/// Linux i2c-dev ioctl wrappers
mod ioctl {
    use nix::ioctl_write_int_bad;

    const I2C_SLAVE: u16 = 0x0703;
    const I2C_SLAVE_FORCE: u16 = 0x0706;

    ioctl_write_int_bad!(i2c_slave, I2C_SLAVE);
    ioctl_write_int_bad!(i2c_slave_force, I2C_SLAVE_FORCE);
}

/// Touchpad reached through a `/dev/i2c-N` adapter.
pub struct I2cDevTransport {
    file: File,
    path: String,
    address: u16,
}

impl I2cDevTransport {
    /// Open an I2C adapter and bind the touchpad's slave address.
    ///
    /// Falls back to `I2C_SLAVE_FORCE` when a kernel driver already owns the
    /// address.
    #[instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P, address: u16) -> Result<Self, TransportError> {
        let path_str = path.as_ref().display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(|source| TransportError::OpenFailed {
                path: path_str.clone(),
                source,
            })?;

        let fd = file.as_raw_fd();
        // SAFETY: plain integer ioctl on an fd we own.
        if let Err(e) = unsafe { ioctl::i2c_slave(fd, address as libc::c_int) } {
            warn!(address = %format!("0x{:02X}", address), error = %e, "I2C_SLAVE refused, forcing");
            // SAFETY: as above.
            unsafe { ioctl::i2c_slave_force(fd, address as libc::c_int) }
                .map_err(|source| TransportError::BindFailed { address, source })?;
        }

        debug!(path = %path_str, address = %format!("0x{:02X}", address), "I2C adapter bound");
        Ok(Self {
            file,
            path: path_str,
            address,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Write raw bytes to the bound address.
    pub fn write_raw(&self, data: &[u8]) -> Result<(), TransportError> {
        (&self.file)
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    /// Read exactly `len` raw bytes from the bound address.
    pub fn read_raw(&self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        let n = (&self.file)
            .read(&mut buf)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;
        if n < len {
            return Err(TransportError::ShortRead {
                expected: len,
                actual: n,
            });
        }
        Ok(buf)
    }

    /// Re-frame this adapter's traffic as HID-over-I2C command reports.
    pub fn into_tunnel(self) -> I2cHidTransport {
        I2cHidTransport::new(self)
    }
}

impl IapTransport for I2cDevTransport {
    fn interface(&self) -> InterfaceKind {
        InterfaceKind::I2c
    }

    #[instrument(level = "trace", skip(self, command), fields(len = command.len()))]
    fn send(&self, command: &[u8]) -> Result<(), TransportError> {
        split_command(command)?;
        self.write_raw(command)
    }

    #[instrument(level = "trace", skip(self, command))]
    fn send_receive(&self, command: &[u8], reply_len: usize) -> Result<Vec<u8>, TransportError> {
        split_command(command)?;
        self.write_raw(command)?;
        self.read_raw(reply_len)
    }

    #[instrument(level = "trace", skip(self, block), fields(len = block.len()))]
    fn write_block(&self, block: &[u8]) -> Result<(), TransportError> {
        let mut frame = Vec::with_capacity(block.len() + 2);
        frame.push(ETP_I2C_IAP_REG_L);
        frame.push(ETP_I2C_IAP_REG_H);
        frame.extend_from_slice(block);
        self.write_raw(&frame)
    }
}
