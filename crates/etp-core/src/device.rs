//! Device identification and page geometry.
//!
//! Identification only reads registers, with one exception: negotiating a
//! whole-page write granularity writes the IAP type and reads it back.

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::error::{IapError, Result};
use crate::protocol::RegisterAccess;
use crate::protocol::constants::*;

/// Page count of a known IC type.
///
/// Unknown codes are an identification error, never a guess.
pub fn page_count(ic_type: u8) -> Result<usize> {
    match ic_type {
        0x06 | 0x08 => Ok(512),
        0x03 | 0x07 | 0x09 | 0x0A | 0x0B | 0x0C => Ok(768),
        0x0D => Ok(896),
        0x0E => Ok(640),
        0x10 | 0x14 | 0x15 => Ok(1024),
        0x11 => Ok(1280),
        0x13 => Ok(2048),
        other => Err(IapError::UnsupportedIc(other)),
    }
}

/// Read the IC type.
///
/// The OSM version register holds the IC type in its high byte once the
/// controller is up. Until then it reads back as its own address or 0xFFFF
/// and the IC body register is used instead.
#[instrument(level = "debug", skip(t))]
pub fn get_ic_type<T: RegisterAccess + ?Sized>(t: &T) -> Result<u8> {
    let osm = t.read_register(ETP_I2C_OSM_VERSION_CMD)?;
    if osm == ETP_I2C_OSM_VERSION_CMD || osm == ETP_REGISTER_NOT_READY {
        let body = t.read_register(ETP_I2C_IAP_ICBODY_CMD)?;
        debug!(osm = %format!("0x{:04X}", osm), body = %format!("0x{:04X}", body), "OSM version not ready, using IC body");
        return Ok((body & 0xFF) as u8);
    }
    Ok((osm >> 8) as u8)
}

/// Read the version-register pattern (0 for legacy layout).
pub fn get_pattern<T: RegisterAccess + ?Sized>(t: &T) -> Result<u8> {
    let raw = t.read_register(ETP_I2C_PATTERN_CMD)?;
    if raw == ETP_REGISTER_NOT_READY {
        return Ok(0);
    }
    Ok((raw >> 8) as u8)
}

/// Read the firmware (`is_iap == false`) or IAP version.
pub fn get_version<T: RegisterAccess + ?Sized>(t: &T, is_iap: bool, pattern: u8) -> Result<u16> {
    let reg = match (is_iap, pattern) {
        (false, _) => ETP_I2C_FW_VERSION_CMD,
        (true, 0) => ETP_I2C_IAP_VERSION_CMD,
        (true, _) => ETP_I2C_NEW_IAP_VERSION_CMD,
    };
    let reply = t.read_register_bytes(reg, 2)?;
    let value = crate::protocol::le_u16(&reply)?;
    if is_iap && pattern >= 1 {
        return Ok(reply[1] as u16);
    }
    Ok(value)
}

/// Read the firmware (`is_iap == false`) or IAP checksum.
pub fn get_checksum<T: RegisterAccess + ?Sized>(t: &T, is_iap: bool) -> Result<u16> {
    let reg = if is_iap {
        ETP_I2C_IAP_CHECKSUM_CMD
    } else {
        ETP_I2C_FW_CHECKSUM_CMD
    };
    Ok(t.read_register(reg)?)
}

pub fn get_iap_ctrl<T: RegisterAccess + ?Sized>(t: &T) -> Result<u16> {
    Ok(t.read_register(ETP_I2C_IAP_CTRL_CMD)?)
}

pub fn get_iap_type<T: RegisterAccess + ?Sized>(t: &T) -> Result<u16> {
    Ok(t.read_register(ETP_I2C_IAP_TYPE_CMD)?)
}

pub fn get_flim_type<T: RegisterAccess + ?Sized>(t: &T) -> Result<u16> {
    Ok(t.read_register(ETP_I2C_FLIM_TYPE_CMD)?)
}

pub fn module_id<T: RegisterAccess + ?Sized>(t: &T) -> Result<u16> {
    Ok(t.read_register(ETP_I2C_MODULE_ID_CMD)?)
}

pub fn hardware_id<T: RegisterAccess + ?Sized>(t: &T) -> Result<u16> {
    Ok(t.read_register(ETP_I2C_HARDWARE_ID_CMD)?)
}

/// Firmware version, or `None` while the controller is not readable.
pub fn firmware_version_if_ready<T: RegisterAccess + ?Sized>(t: &T) -> Result<Option<u16>> {
    let version = get_version(t, false, 0)?;
    if version == ETP_I2C_FW_VERSION_CMD || version == ETP_REGISTER_NOT_READY {
        return Ok(None);
    }
    Ok(Some(version))
}

/// Whether an IC type may carry a flim region.
pub fn flim_capable(ic_type: u8) -> bool {
    FLIM_CAPABLE_IC_TYPES.contains(&ic_type)
}

/// EEPROM-related identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EepromDescriptor {
    pub flim_type: u16,
    pub driver_ic: u8,
    pub iap_version: u8,
}

impl EepromDescriptor {
    #[instrument(level = "debug", skip(t))]
    pub fn query<T: RegisterAccess + ?Sized>(t: &T) -> Result<Self> {
        let flim_type = get_flim_type(t)?;
        let driver_ic = (t.read_register(ETP_I2C_EEPROM_DRIVER_IC_CMD)? & 0xFF) as u8;
        let iap_version = (t.read_register(ETP_I2C_EEPROM_IAP_VERSION_CMD)? & 0xFF) as u8;
        Ok(Self {
            flim_type,
            driver_ic,
            iap_version,
        })
    }

    /// The EEPROM capability bit is set.
    pub fn capable(&self) -> bool {
        self.flim_type & ETP_FLIM_TYPE_ENABLE != 0
    }

    /// Capability bit set and a supported driver IC / IAP version pair.
    pub fn supports_update(&self) -> bool {
        self.capable()
            && self.driver_ic == EEPROM_SUPPORTED_DRIVER_IC
            && self.iap_version == EEPROM_SUPPORTED_IAP_VERSION
    }
}

/// Identity and state of the controller, read once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub ic_type: u8,
    pub pattern: u8,
    pub iap_version: u16,
    pub fw_version: u16,
    pub fw_checksum: u16,
    pub iap_checksum: u16,
    pub eeprom: Option<EepromDescriptor>,
}

impl DeviceDescriptor {
    /// Query versions and checksums. Flim-capable IC types also carry the
    /// EEPROM descriptor.
    #[instrument(level = "debug", skip(t))]
    pub fn query<T: RegisterAccess + ?Sized>(t: &T, ic_type: u8) -> Result<Self> {
        info!("Querying device info...");
        let pattern = get_pattern(t)?;
        let fw_checksum = get_checksum(t, false)?;
        let iap_checksum = get_checksum(t, true)?;
        let fw_version = get_version(t, false, pattern)?;
        let iap_version = get_version(t, true, pattern)?;
        let eeprom = if flim_capable(ic_type) {
            Some(EepromDescriptor::query(t)?)
        } else {
            None
        };

        let descriptor = Self {
            ic_type,
            pattern,
            iap_version,
            fw_version,
            fw_checksum,
            iap_checksum,
            eeprom,
        };
        info!("{descriptor}");
        Ok(descriptor)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IC type: {:02x}, IAP version: {:4x}, FW version: {:4x}, IAP checksum: {:4x}, FW checksum: {:4x}",
            self.ic_type, self.iap_version, self.fw_version, self.iap_checksum, self.fw_checksum
        )?;
        if let Some(eeprom) = &self.eeprom {
            write!(f, ", flim type: {:x}", eeprom.flim_type)?;
        }
        Ok(())
    }
}

/// Flash write granularity.
///
/// Invariants: `section_size <= page_size` and
/// `section_size * sections_per_page == page_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub page_size: usize,
    pub section_size: usize,
    pub sections_per_page: usize,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self {
            page_size: FW_PAGE_SIZE,
            section_size: FW_PAGE_SIZE,
            sections_per_page: 1,
        }
    }
}

impl fmt::Display for PageGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page {} bytes, section {} bytes x {}",
            self.page_size, self.section_size, self.sections_per_page
        )
    }
}

impl PageGeometry {
    /// Apply the geometry decision table.
    ///
    /// `device_section` supplies the device-reported section size and is only
    /// consulted for 512-byte-page parts at IAP version 3 or later.
    pub fn derive<F>(ic_type: u8, iap_version: u16, device_section: F) -> Result<Self>
    where
        F: FnOnce() -> Result<usize>,
    {
        let mut geometry = Self::default();
        if ic_type < 0x10 || iap_version < 1 {
            return Ok(geometry);
        }

        if iap_version >= 2 && LARGE_PAGE_IC_TYPES.contains(&ic_type) {
            geometry.page_size = 512;
            geometry.section_size = if iap_version >= 3 {
                device_section()?
            } else {
                512
            };
        } else {
            geometry.page_size = 128;
            geometry.section_size = 128;
        }

        let section = geometry.section_size;
        if section == 0 || section > geometry.page_size || geometry.page_size % section != 0 {
            return Err(IapError::InvalidGeometry {
                page_size: geometry.page_size,
                section_size: section,
            });
        }
        geometry.sections_per_page = geometry.page_size / section;
        Ok(geometry)
    }

    /// Derive the geometry against a live device, confirming whole-page
    /// writes with the IAP type register.
    #[instrument(level = "debug", skip(t))]
    pub fn negotiate<T: RegisterAccess + ?Sized>(t: &T, ic_type: u8, iap_version: u16) -> Result<Self> {
        let geometry = Self::derive(ic_type, iap_version, || {
            Ok(get_iap_type(t)? as usize * 2)
        })?;

        if ic_type >= 0x10 && iap_version >= 1 && geometry.section_size == geometry.page_size {
            set_iap_type(t, (geometry.section_size / 2) as u16)?;
        }

        info!(%geometry, "Page geometry");
        Ok(geometry)
    }

    /// Whether sections are smaller than pages.
    pub fn is_sectioned(&self) -> bool {
        self.section_size != self.page_size
    }
}

/// Write the IAP type (write size in words) and confirm it, retrying once.
fn set_iap_type<T: RegisterAccess + ?Sized>(t: &T, words: u16) -> Result<()> {
    let mut actual = 0;
    for attempt in 1..=IAP_TYPE_ATTEMPTS {
        t.write_register(ETP_I2C_IAP_TYPE_CMD, words)?;
        actual = get_iap_type(t)?;
        if actual == words {
            return Ok(());
        }
        warn!(attempt, expected = words, actual, "IAP type readback mismatch");
    }
    Err(IapError::IapTypeMismatch {
        expected: words,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn test_page_count_table() {
        let table: &[(u8, usize)] = &[
            (0x03, 768),
            (0x06, 512),
            (0x07, 768),
            (0x08, 512),
            (0x09, 768),
            (0x0A, 768),
            (0x0B, 768),
            (0x0C, 768),
            (0x0D, 896),
            (0x0E, 640),
            (0x10, 1024),
            (0x11, 1280),
            (0x13, 2048),
            (0x14, 1024),
            (0x15, 1024),
        ];
        for &(ic, pages) in table {
            assert_eq!(page_count(ic).unwrap(), pages, "IC type 0x{ic:02X}");
        }
    }

    #[test]
    fn test_page_count_unknown_ic() {
        for ic in [0x00u8, 0x01, 0x02, 0x04, 0x05, 0x0F, 0x12, 0x16, 0xFF] {
            assert!(matches!(page_count(ic), Err(IapError::UnsupportedIc(code)) if code == ic));
        }
    }

    #[test]
    fn test_ic_type_from_osm_version() {
        let mock = MockTransport::new();
        mock.set_register(ETP_I2C_OSM_VERSION_CMD, 0x0601);
        assert_eq!(get_ic_type(&mock).unwrap(), 0x06);
        assert_eq!(mock.get_reads(), vec![ETP_I2C_OSM_VERSION_CMD]);
    }

    #[test]
    fn test_ic_type_falls_back_to_ic_body() {
        for not_ready in [ETP_I2C_OSM_VERSION_CMD, 0xFFFF] {
            let mock = MockTransport::new();
            mock.set_register(ETP_I2C_OSM_VERSION_CMD, not_ready);
            mock.set_register(ETP_I2C_IAP_ICBODY_CMD, 0x4213);
            assert_eq!(get_ic_type(&mock).unwrap(), 0x13);
        }
    }

    #[test]
    fn test_pattern() {
        let mock = MockTransport::new();
        mock.set_register(ETP_I2C_PATTERN_CMD, 0xFFFF);
        assert_eq!(get_pattern(&mock).unwrap(), 0);
        mock.set_register(ETP_I2C_PATTERN_CMD, 0x0201);
        assert_eq!(get_pattern(&mock).unwrap(), 2);
    }

    #[test]
    fn test_version_register_selection() {
        let mock = MockTransport::new();
        mock.set_register(ETP_I2C_FW_VERSION_CMD, 0x1234);
        mock.set_register(ETP_I2C_IAP_VERSION_CMD, 0x0002);
        mock.set_register(ETP_I2C_NEW_IAP_VERSION_CMD, 0x0301);

        assert_eq!(get_version(&mock, false, 0).unwrap(), 0x1234);
        assert_eq!(get_version(&mock, false, 1).unwrap(), 0x1234);
        assert_eq!(get_version(&mock, true, 0).unwrap(), 0x0002);
        // New pattern: IAP version is the second byte.
        assert_eq!(get_version(&mock, true, 1).unwrap(), 0x03);
    }

    #[test]
    fn test_firmware_version_if_ready() {
        let mock = MockTransport::new();
        mock.set_register(ETP_I2C_FW_VERSION_CMD, ETP_I2C_FW_VERSION_CMD);
        assert_eq!(firmware_version_if_ready(&mock).unwrap(), None);
        mock.set_register(ETP_I2C_FW_VERSION_CMD, 0xFFFF);
        assert_eq!(firmware_version_if_ready(&mock).unwrap(), None);
        mock.set_register(ETP_I2C_FW_VERSION_CMD, 0x0005);
        assert_eq!(firmware_version_if_ready(&mock).unwrap(), Some(5));
    }

    #[test]
    fn test_identification_is_idempotent() {
        let mock = MockTransport::new();
        mock.set_register(ETP_I2C_OSM_VERSION_CMD, 0x1001);
        mock.set_register(ETP_I2C_PATTERN_CMD, 0x0100);
        mock.set_register(ETP_I2C_FW_VERSION_CMD, 0x0042);
        mock.set_register(ETP_I2C_NEW_IAP_VERSION_CMD, 0x0200);
        mock.set_register(ETP_I2C_FW_CHECKSUM_CMD, 0xBEEF);
        mock.set_register(ETP_I2C_IAP_CHECKSUM_CMD, 0xCAFE);

        let ic = get_ic_type(&mock).unwrap();
        let first = DeviceDescriptor::query(&mock, ic).unwrap();
        let second = DeviceDescriptor::query(&mock, get_ic_type(&mock).unwrap()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.iap_version, 2);
        assert_eq!(first.fw_checksum, 0xBEEF);
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_flim_capable_descriptor_carries_eeprom() {
        let mock = MockTransport::new();
        mock.set_register(ETP_I2C_OSM_VERSION_CMD, 0x1400);
        mock.set_register(ETP_I2C_FLIM_TYPE_CMD, ETP_FLIM_TYPE_ENABLE);
        mock.set_register(ETP_I2C_EEPROM_DRIVER_IC_CMD, 0x0002);
        mock.set_register(ETP_I2C_EEPROM_IAP_VERSION_CMD, 0x0001);

        let descriptor = DeviceDescriptor::query(&mock, 0x14).unwrap();
        let eeprom = descriptor.eeprom.unwrap();
        assert!(eeprom.supports_update());
        assert_eq!(eeprom.flim_type, ETP_FLIM_TYPE_ENABLE);
        assert!(descriptor.to_string().ends_with("flim type: 1"));
    }

    #[test]
    fn test_other_ics_skip_eeprom_registers() {
        let mock = MockTransport::new();
        let descriptor = DeviceDescriptor::query(&mock, 0x10).unwrap();
        assert_eq!(descriptor.eeprom, None);
        assert!(!mock.get_reads().contains(&ETP_I2C_FLIM_TYPE_CMD));
    }

    #[test]
    fn test_geometry_defaults_for_small_parts() {
        let g = PageGeometry::derive(0x06, 5, || unreachable!()).unwrap();
        assert_eq!(g, PageGeometry::default());
        let g = PageGeometry::derive(0x10, 0, || unreachable!()).unwrap();
        assert_eq!(g.page_size, 64);
    }

    #[test]
    fn test_geometry_128_byte_pages() {
        let g = PageGeometry::derive(0x10, 1, || unreachable!()).unwrap();
        assert_eq!((g.page_size, g.section_size, g.sections_per_page), (128, 128, 1));
        // Large-page parts before IAP version 2 stay on 128-byte pages.
        let g = PageGeometry::derive(0x14, 1, || unreachable!()).unwrap();
        assert_eq!(g.page_size, 128);
    }

    #[test]
    fn test_geometry_512_byte_pages() {
        let g = PageGeometry::derive(0x15, 2, || unreachable!()).unwrap();
        assert_eq!((g.page_size, g.section_size, g.sections_per_page), (512, 512, 1));

        let g = PageGeometry::derive(0x14, 3, || Ok(128)).unwrap();
        assert_eq!((g.page_size, g.section_size, g.sections_per_page), (512, 128, 4));
        assert_eq!(g.section_size * g.sections_per_page, g.page_size);
    }

    #[test]
    fn test_geometry_rejects_bad_device_section() {
        for bad in [0usize, 96, 1024] {
            assert!(matches!(
                PageGeometry::derive(0x14, 3, || Ok(bad)),
                Err(IapError::InvalidGeometry { .. })
            ));
        }
    }

    #[test]
    fn test_negotiate_confirms_iap_type() {
        let mock = MockTransport::new();
        let g = PageGeometry::negotiate(&mock, 0x10, 1).unwrap();
        assert_eq!(g.page_size, 128);
        assert_eq!(mock.writes_to(ETP_I2C_IAP_TYPE_CMD), vec![64]);
    }

    #[test]
    fn test_negotiate_retries_iap_type_once() {
        let mock = MockTransport::new();
        mock.queue_read(ETP_I2C_IAP_TYPE_CMD, 0x0000);
        let g = PageGeometry::negotiate(&mock, 0x15, 2).unwrap();
        assert_eq!(g.page_size, 512);
        assert_eq!(mock.writes_to(ETP_I2C_IAP_TYPE_CMD), vec![256, 256]);
    }

    #[test]
    fn test_negotiate_fails_after_second_mismatch() {
        let mock = MockTransport::new();
        mock.set_write_only(ETP_I2C_IAP_TYPE_CMD);
        mock.set_register(ETP_I2C_IAP_TYPE_CMD, 0x0011);
        assert!(matches!(
            PageGeometry::negotiate(&mock, 0x10, 1),
            Err(IapError::IapTypeMismatch {
                expected: 64,
                actual: 0x11
            })
        ));
    }

    #[test]
    fn test_negotiate_sectioned_skips_iap_type_write() {
        let mock = MockTransport::new();
        mock.set_register(ETP_I2C_IAP_TYPE_CMD, 64);
        let g = PageGeometry::negotiate(&mock, 0x14, 3).unwrap();
        assert_eq!(g.section_size, 128);
        assert!(g.is_sectioned());
        assert!(mock.writes_to(ETP_I2C_IAP_TYPE_CMD).is_empty());
    }

    #[test]
    fn test_eeprom_descriptor_support() {
        let d = EepromDescriptor {
            flim_type: ETP_FLIM_TYPE_ENABLE,
            driver_ic: 2,
            iap_version: 1,
        };
        assert!(d.supports_update());
        assert!(!EepromDescriptor { driver_ic: 3, ..d }.supports_update());
        assert!(!EepromDescriptor { iap_version: 2, ..d }.supports_update());
        assert!(!EepromDescriptor { flim_type: 0, ..d }.supports_update());
    }
}
