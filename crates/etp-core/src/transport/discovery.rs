//! Device node selection and discovery.
//!
//! A touchpad is reached either through an explicitly numbered node
//! (`/dev/hidrawN`, `/dev/i2c-N`) or by scanning `/dev`: hidraw nodes are
//! matched on VID/PID and must answer an IAP control read; I2C adapters must
//! accept the slave address and a probe write.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use super::hid::HidrawTransport;
use super::i2c::I2cDevTransport;
use super::traits::{IapTransport, InterfaceKind, TransportError};
use super::tunnel::I2cHidTransport;
use crate::protocol::constants::{ETP_I2C_IAP_CTRL_CMD, I2C_PROBE};

const DEV_DIR: &str = "/dev";
const HIDRAW_PREFIX: &str = "hidraw";
const I2C_PREFIX: &str = "i2c-";

/// An open touchpad channel, bound to exactly one physical interface.
pub enum DeviceChannel {
    Hid(HidrawTransport),
    I2c(I2cDevTransport),
    I2cHid(I2cHidTransport),
}

impl DeviceChannel {
    /// EEPROM operations on a raw I2C channel go through the HID tunnel.
    /// Other channels are returned unchanged.
    pub fn promote_for_eeprom(self) -> Self {
        match self {
            DeviceChannel::I2c(t) => {
                info!(path = %t.path(), "Promoting I2C channel to I2C-over-HID for EEPROM access");
                DeviceChannel::I2cHid(t.into_tunnel())
            }
            other => other,
        }
    }

    fn inner(&self) -> &dyn IapTransport {
        match self {
            DeviceChannel::Hid(t) => t,
            DeviceChannel::I2c(t) => t,
            DeviceChannel::I2cHid(t) => t,
        }
    }
}

impl IapTransport for DeviceChannel {
    fn interface(&self) -> InterfaceKind {
        self.inner().interface()
    }

    fn send(&self, command: &[u8]) -> Result<(), TransportError> {
        self.inner().send(command)
    }

    fn send_receive(&self, command: &[u8], reply_len: usize) -> Result<Vec<u8>, TransportError> {
        self.inner().send_receive(command, reply_len)
    }

    fn write_block(&self, block: &[u8]) -> Result<(), TransportError> {
        self.inner().write_block(block)
    }
}

/// Open `/dev/hidraw<index>`.
pub fn open_hidraw(index: u32) -> Result<DeviceChannel, TransportError> {
    let path = Path::new(DEV_DIR).join(format!("{HIDRAW_PREFIX}{index}"));
    Ok(DeviceChannel::Hid(HidrawTransport::open(path)?))
}

/// Open `/dev/i2c-<bus>` and bind `address`.
pub fn open_i2c(bus: u32, address: u16) -> Result<DeviceChannel, TransportError> {
    let path = Path::new(DEV_DIR).join(format!("{I2C_PREFIX}{bus}"));
    Ok(DeviceChannel::I2c(I2cDevTransport::open(path, address)?))
}

/// Scan for the touchpad, trying hidraw nodes before I2C adapters.
#[instrument(level = "info", fields(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid)))]
pub fn discover(vid: u16, pid: u16, i2c_address: u16) -> Result<DeviceChannel, TransportError> {
    if let Some(t) = scan_hidraw(vid, pid)? {
        info!(path = %t.path(), "Touchpad found on hidraw");
        return Ok(DeviceChannel::Hid(t));
    }
    if let Some(t) = scan_i2c(i2c_address)? {
        info!(path = %t.path(), "Touchpad found on I2C");
        return Ok(DeviceChannel::I2c(t));
    }
    Err(TransportError::DeviceNotFound {
        vid,
        pid,
        i2c_address,
    })
}

fn dev_nodes(prefix: &str) -> Result<Vec<PathBuf>, TransportError> {
    let mut nodes: Vec<PathBuf> = std::fs::read_dir(DEV_DIR)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .collect();
    nodes.sort();
    Ok(nodes)
}

fn scan_hidraw(vid: u16, pid: u16) -> Result<Option<HidrawTransport>, TransportError> {
    for path in dev_nodes(HIDRAW_PREFIX)? {
        let transport = match HidrawTransport::open(&path) {
            Ok(t) => t,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping hidraw node");
                continue;
            }
        };
        let Ok(info) = transport.raw_info() else {
            continue;
        };
        if info.vendor_id != vid || info.product_id != pid {
            continue;
        }

        let name = transport.raw_name().unwrap_or_default();
        debug!(
            path = %path.display(),
            name = %name,
            bus_type = info.bus_type,
            "Matching hidraw node"
        );

        let ctrl_reg = ETP_I2C_IAP_CTRL_CMD.to_le_bytes();
        if transport.send_receive(&ctrl_reg, 2).is_ok() {
            return Ok(Some(transport));
        }
    }
    Ok(None)
}

fn scan_i2c(address: u16) -> Result<Option<I2cDevTransport>, TransportError> {
    for path in dev_nodes(I2C_PREFIX)? {
        match I2cDevTransport::open(&path, address) {
            Ok(t) => {
                if t.write_raw(&I2C_PROBE).is_ok() {
                    return Ok(Some(t));
                }
                debug!(path = %path.display(), "No answer to I2C probe");
            }
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping I2C adapter"),
        }
    }
    Ok(None)
}
