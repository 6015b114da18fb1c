//! I2C-over-HID tunnel.
//!
//! Command reports are wrapped in HID-over-I2C SET_REPORT frames written to
//! the device's command register, and replies are fetched with GET_REPORT.
//! A reply is laid out as:
//!
//! ```text
//! [len_lo, len_hi, report_id, reg_lo, reg_hi, payload...]
//! ```
//!
//! The echoed register must match the one requested.

use tracing::{instrument, warn};

use super::hid::command_report;
use super::i2c::I2cDevTransport;
use super::traits::{IapTransport, InterfaceKind, TransportError, split_command};
use crate::protocol::constants::{
    HID_BLOCK_REPORT_ID, HID_CMD_REPORT_ID, I2C_HID_COMMAND_REG, I2C_HID_DATA_REG,
    I2C_HID_OPCODE_GET_REPORT, I2C_HID_OPCODE_SET_REPORT, I2C_HID_READ_REQUEST_LEN,
    I2C_HID_REPLY_HEADER_LEN, I2C_HID_REPORT_TYPE_FEATURE, I2C_HID_TUNNEL_FRAME_LEN,
};

/// Touchpad reached through HID-over-I2C framing on an i2c-dev adapter.
pub struct I2cHidTransport {
    inner: I2cDevTransport,
}

impl I2cHidTransport {
    pub fn new(inner: I2cDevTransport) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> I2cDevTransport {
        self.inner
    }
}

/// Wrap a report (report id first) in a SET_REPORT feature frame.
pub(crate) fn set_report_frame(report: &[u8]) -> Vec<u8> {
    let report_id = report[0];
    let [cmd_lo, cmd_hi] = I2C_HID_COMMAND_REG.to_le_bytes();
    let [data_lo, data_hi] = I2C_HID_DATA_REG.to_le_bytes();
    // Length field counts itself.
    let [len_lo, len_hi] = ((report.len() + 2) as u16).to_le_bytes();

    let mut frame = Vec::with_capacity(report.len() + 8);
    frame.extend_from_slice(&[
        cmd_lo,
        cmd_hi,
        I2C_HID_REPORT_TYPE_FEATURE | report_id,
        I2C_HID_OPCODE_SET_REPORT,
        data_lo,
        data_hi,
        len_lo,
        len_hi,
    ]);
    frame.extend_from_slice(report);
    frame
}

/// Frame asking the device to present the pending command report.
pub(crate) fn read_request_frame() -> [u8; I2C_HID_READ_REQUEST_LEN] {
    let [cmd_lo, cmd_hi] = I2C_HID_COMMAND_REG.to_le_bytes();
    let [data_lo, data_hi] = I2C_HID_DATA_REG.to_le_bytes();
    [
        cmd_lo,
        cmd_hi,
        I2C_HID_REPORT_TYPE_FEATURE | HID_CMD_REPORT_ID,
        I2C_HID_OPCODE_GET_REPORT,
        data_lo,
        data_hi,
    ]
}

/// Check the echoed register and strip the reply header.
pub(crate) fn extract_payload(
    reply: &[u8],
    reg: u16,
    reply_len: usize,
) -> Result<Vec<u8>, TransportError> {
    if reply.len() < I2C_HID_REPLY_HEADER_LEN + reply_len {
        return Err(TransportError::ShortRead {
            expected: I2C_HID_REPLY_HEADER_LEN + reply_len,
            actual: reply.len(),
        });
    }
    let echoed = u16::from_le_bytes([reply[3], reply[4]]);
    if echoed != reg {
        return Err(TransportError::EchoMismatch {
            expected: reg,
            actual: echoed,
        });
    }
    Ok(reply[I2C_HID_REPLY_HEADER_LEN..I2C_HID_REPLY_HEADER_LEN + reply_len].to_vec())
}

impl IapTransport for I2cHidTransport {
    fn interface(&self) -> InterfaceKind {
        InterfaceKind::I2cHid
    }

    #[instrument(level = "trace", skip(self, command), fields(len = command.len()))]
    fn send(&self, command: &[u8]) -> Result<(), TransportError> {
        let frame = set_report_frame(&command_report(command)?);
        debug_assert_eq!(frame.len(), I2C_HID_TUNNEL_FRAME_LEN);
        self.inner.write_raw(&frame)
    }

    #[instrument(level = "trace", skip(self, command))]
    fn send_receive(&self, command: &[u8], reply_len: usize) -> Result<Vec<u8>, TransportError> {
        let (reg, _) = split_command(command)?;
        self.inner
            .write_raw(&set_report_frame(&command_report(command)?))?;
        self.inner.write_raw(&read_request_frame())?;

        let reply = self.inner.read_raw(I2C_HID_REPLY_HEADER_LEN + reply_len)?;
        extract_payload(&reply, reg, reply_len).inspect_err(|e| {
            warn!(reg = %format!("0x{:04X}", reg), error = %e, "Tunnel reply rejected");
        })
    }

    #[instrument(level = "trace", skip(self, block), fields(len = block.len()))]
    fn write_block(&self, block: &[u8]) -> Result<(), TransportError> {
        let mut report = Vec::with_capacity(block.len() + 1);
        report.push(HID_BLOCK_REPORT_ID);
        report.extend_from_slice(block);
        self.inner.write_raw(&set_report_frame(&report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_frame_is_thirteen_bytes() {
        let frame = set_report_frame(&command_report(&[0x14, 0x03, 0x00, 0x08]).unwrap());
        assert_eq!(
            frame,
            vec![
                0x05, 0x00, 0x3D, 0x03, 0x06, 0x00, 0x07, 0x00, 0x0D, 0x14, 0x03, 0x00, 0x08
            ]
        );
    }

    #[test]
    fn test_read_frame_carries_read_prefix() {
        let frame = set_report_frame(&command_report(&[0x10, 0x03]).unwrap());
        assert_eq!(frame.len(), I2C_HID_TUNNEL_FRAME_LEN);
        assert_eq!(&frame[8..], &[0x0D, 0x05, 0x03, 0x10, 0x03]);
    }

    #[test]
    fn test_read_request_frame() {
        assert_eq!(read_request_frame(), [0x05, 0x00, 0x3D, 0x02, 0x06, 0x00]);
    }

    #[test]
    fn test_extract_payload_checks_echo() {
        let reply = [0x07, 0x00, 0x0D, 0x10, 0x03, 0x80, 0x02];
        assert_eq!(extract_payload(&reply, 0x0310, 2).unwrap(), vec![0x80, 0x02]);

        let err = extract_payload(&reply, 0x0311, 2).unwrap_err();
        assert!(matches!(
            err,
            TransportError::EchoMismatch {
                expected: 0x0311,
                actual: 0x0310
            }
        ));
    }

    #[test]
    fn test_extract_payload_short_reply() {
        let reply = [0x07, 0x00, 0x0D, 0x10];
        assert!(matches!(
            extract_payload(&reply, 0x0310, 2),
            Err(TransportError::ShortRead { .. })
        ));
    }
}
