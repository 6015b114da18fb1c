//! ETP-Core: ELAN touchpad in-application programming (IAP) in Rust.
//!
//! This crate implements the register-level IAP protocol used to update the
//! main flash and the auxiliary EEPROM of ELAN touchpad controllers over
//! Linux hidraw, i2c-dev, or HID-over-I2C tunnelled through i2c-dev.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: hidraw / i2c-dev / tunnel bindings, discovery, mock
//! - **Protocol**: Register map, constants, register read/write
//! - **Device**: IC identification and page geometry
//! - **Firmware**: Image loading, signature and checksums
//! - **State**: Update state machines
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Main-flash update orchestrator
//! - **EEPROM**: EEPROM update orchestrator
//!
//! # Example
//!
//! ```no_run
//! use etp_core::{FirmwareImage, UpdateSession, discover};
//! use etp_core::protocol::{DEFAULT_I2C_ADDRESS, DEFAULT_PRODUCT_ID, ELAN_VENDOR_ID};
//!
//! let channel = discover(ELAN_VENDOR_ID, DEFAULT_PRODUCT_ID, DEFAULT_I2C_ADDRESS)?;
//! let image = FirmwareImage::load("elan_i2c.bin")?;
//!
//! let mut session = UpdateSession::new(channel);
//! let outcome = session.run(&image)?;
//! println!("{outcome:?}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod device;
pub mod eeprom;
pub mod error;
pub mod events;
pub mod firmware;
pub mod mode;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use config::{Timing, UpdateConfig, UpdateTarget};
pub use device::{DeviceDescriptor, EepromDescriptor, PageGeometry};
pub use eeprom::{EepromOutcome, EepromSession};
pub use error::{ErrorKind, IapError, Result};
pub use events::{IapEvent, IapObserver, IapPhase, LogLevel, NullObserver, TracingObserver};
pub use firmware::{FirmwareError, FirmwareImage};
pub use protocol::RegisterAccess;
pub use session::{UpdateOutcome, UpdateSession};
pub use transport::{
    DeviceChannel, IapTransport, InterfaceKind, MockTransport, TransportError, discover,
    open_hidraw, open_i2c,
};
