//! hidraw transport using feature reports.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use tracing::{debug, instrument};

use super::traits::{IapTransport, InterfaceKind, TransportError, split_command};
use crate::protocol::constants::{
    HID_BLOCK_REPORT_ID, HID_CMD_REPORT_ID, HID_CMD_REPORT_LEN, HID_READ_PREFIX,
    HID_REPLY_HEADER_LEN,
};

/// Linux hidraw ioctl wrappers
mod ioctl {
    use nix::{ioctl_read, ioctl_read_buf, ioctl_readwrite_buf};

    const HIDRAW_IOC_MAGIC: u8 = b'H';

    /// Mirrors the kernel's `struct hidraw_devinfo`
    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct HidrawDevinfo {
        pub bustype: u32,
        pub vendor: i16,
        pub product: i16,
    }

    ioctl_read!(hidiocgrawinfo, HIDRAW_IOC_MAGIC, 0x03, HidrawDevinfo);
    ioctl_read_buf!(hidiocgrawname, HIDRAW_IOC_MAGIC, 0x04, u8);
    ioctl_readwrite_buf!(hidiocsfeature, HIDRAW_IOC_MAGIC, 0x06, u8);
    ioctl_readwrite_buf!(hidiocgfeature, HIDRAW_IOC_MAGIC, 0x07, u8);
}

/// Identity of a hidraw node as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidrawInfo {
    pub bus_type: u32,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Touchpad reached through a `/dev/hidrawN` node.
pub struct HidrawTransport {
    file: File,
    path: String,
}

impl HidrawTransport {
    /// Open a hidraw node read/write, non-blocking.
    #[instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TransportError> {
        let path_str = path.as_ref().display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path.as_ref())
            .map_err(|source| TransportError::OpenFailed {
                path: path_str.clone(),
                source,
            })?;

        debug!(path = %path_str, "hidraw node opened");
        Ok(Self {
            file,
            path: path_str,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query bus type and VID/PID of the node.
    pub fn raw_info(&self) -> Result<HidrawInfo, TransportError> {
        let mut info = ioctl::HidrawDevinfo::default();
        // SAFETY: `info` is a live, correctly laid out hidraw_devinfo.
        unsafe { ioctl::hidiocgrawinfo(self.file.as_raw_fd(), &mut info) }?;
        Ok(HidrawInfo {
            bus_type: info.bustype,
            vendor_id: info.vendor as u16,
            product_id: info.product as u16,
        })
    }

    /// Query the device name the kernel reports for the node.
    pub fn raw_name(&self) -> Result<String, TransportError> {
        let mut buf = [0u8; 256];
        // SAFETY: the request size is derived from `buf`'s length.
        unsafe { ioctl::hidiocgrawname(self.file.as_raw_fd(), &mut buf) }?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    fn set_feature(&self, report: &[u8]) -> Result<(), TransportError> {
        let mut buf = report.to_vec();
        // SAFETY: the request size is derived from `buf`'s length.
        unsafe { ioctl::hidiocsfeature(self.file.as_raw_fd(), &mut buf) }
            .map_err(|e| TransportError::WriteFailed(format!("SET_FEATURE: {e}")))?;
        Ok(())
    }

    fn get_feature(&self, report_id: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        buf[0] = report_id;
        // SAFETY: the request size is derived from `buf`'s length.
        let n = unsafe { ioctl::hidiocgfeature(self.file.as_raw_fd(), &mut buf) }
            .map_err(|e| TransportError::ReadFailed(format!("GET_FEATURE: {e}")))?;
        buf.truncate(n.max(0) as usize);
        Ok(buf)
    }
}

/// Build the command report for a register read or write.
pub(crate) fn command_report(command: &[u8]) -> Result<[u8; HID_CMD_REPORT_LEN], TransportError> {
    let (reg, value) = split_command(command)?;
    let [lo, hi] = reg.to_le_bytes();
    Ok(match value {
        None => [
            HID_CMD_REPORT_ID,
            HID_READ_PREFIX[0],
            HID_READ_PREFIX[1],
            lo,
            hi,
        ],
        Some([v0, v1]) => [HID_CMD_REPORT_ID, lo, hi, v0, v1],
    })
}

impl IapTransport for HidrawTransport {
    fn interface(&self) -> InterfaceKind {
        InterfaceKind::Hid
    }

    #[instrument(level = "trace", skip(self, command), fields(len = command.len()))]
    fn send(&self, command: &[u8]) -> Result<(), TransportError> {
        let report = command_report(command)?;
        self.set_feature(&report)
    }

    #[instrument(level = "trace", skip(self, command))]
    fn send_receive(&self, command: &[u8], reply_len: usize) -> Result<Vec<u8>, TransportError> {
        let report = command_report(command)?;
        self.set_feature(&report)?;

        let reply = self.get_feature(HID_CMD_REPORT_ID, reply_len + HID_REPLY_HEADER_LEN)?;
        if reply.len() < reply_len + HID_REPLY_HEADER_LEN {
            return Err(TransportError::ShortRead {
                expected: reply_len + HID_REPLY_HEADER_LEN,
                actual: reply.len(),
            });
        }
        Ok(reply[HID_REPLY_HEADER_LEN..HID_REPLY_HEADER_LEN + reply_len].to_vec())
    }

    #[instrument(level = "trace", skip(self, block), fields(len = block.len()))]
    fn write_block(&self, block: &[u8]) -> Result<(), TransportError> {
        let mut report = Vec::with_capacity(block.len() + 1);
        report.push(HID_BLOCK_REPORT_ID);
        report.extend_from_slice(block);
        self.set_feature(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_report_layout() {
        let report = command_report(&[0x10, 0x03]).unwrap();
        assert_eq!(report, [0x0D, 0x05, 0x03, 0x10, 0x03]);
    }

    #[test]
    fn test_write_report_layout() {
        let report = command_report(&[0x14, 0x03, 0x01, 0x08]).unwrap();
        assert_eq!(report, [0x0D, 0x14, 0x03, 0x01, 0x08]);
    }
}
