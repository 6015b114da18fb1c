//! Transport layer module.

pub mod discovery;
pub mod hid;
pub mod i2c;
pub mod mock;
pub mod traits;
pub mod tunnel;

pub use discovery::{DeviceChannel, discover, open_hidraw, open_i2c};
pub use hid::{HidrawInfo, HidrawTransport};
pub use i2c::I2cDevTransport;
pub use mock::MockTransport;
pub use traits::{IapTransport, InterfaceKind, TransportError};
pub use tunnel::I2cHidTransport;
