//! Protocol constants for the ELAN touchpad IAP interface.
//!
//! Register addresses are 16-bit and sent little-endian. Values read back
//! from a register are also 16-bit little-endian words.

use std::time::Duration;

// ============================================================================
// Device Identification
// ============================================================================

/// ELAN Microelectronics Vendor ID
pub const ELAN_VENDOR_ID: u16 = 0x04F3;

/// Default touchpad Product ID (B50)
pub const DEFAULT_PRODUCT_ID: u16 = 0x30C5;

/// Default 7-bit I2C slave address of the touchpad
pub const DEFAULT_I2C_ADDRESS: u16 = 0x15;

// ============================================================================
// Firmware Image Layout
// ============================================================================

/// Page size used to size main-flash images (independent of write granularity)
pub const FW_PAGE_SIZE: usize = 64;

/// Largest page count of any known main-flash part
pub const MAX_FW_PAGE_COUNT: usize = 2048;

/// Largest main-flash image accepted
pub const MAX_FW_SIZE: usize = MAX_FW_PAGE_COUNT * FW_PAGE_SIZE;

/// Trailing signature every main-flash image carries
pub const FW_SIGNATURE: [u8; 6] = [0xAA, 0x55, 0xCC, 0x33, 0xFF, 0xFF];
pub const FW_SIGNATURE_SIZE: usize = FW_SIGNATURE.len();

/// Word offset inside the image holding the IAP start address (in words)
pub const IAP_START_ADDR_WORD: usize = 0x0083;

/// Pages at the top of flash reserved for the flim region when flim type is on
pub const FLIM_RESERVED_PAGES: usize = 128;

/// IC types that may carry a flim region
pub const FLIM_CAPABLE_IC_TYPES: &[u8] = &[0x14, 0x15];

/// Lowest IAP version able to program around the flim region
pub const FLIM_MIN_IAP_VERSION: u16 = 4;

/// IC types using 512-byte pages from IAP version 2
pub const LARGE_PAGE_IC_TYPES: &[u8] = &[0x14, 0x15];

// ============================================================================
// Information Registers
// ============================================================================

pub const ETP_I2C_HARDWARE_ID_CMD: u16 = 0x0100;
/// Pattern register; shares its address with the hardware id
pub const ETP_I2C_PATTERN_CMD: u16 = 0x0100;
pub const ETP_I2C_MODULE_ID_CMD: u16 = 0x0101;
pub const ETP_I2C_FW_VERSION_CMD: u16 = 0x0102;
/// Also carries the IC type in its high byte
pub const ETP_I2C_OSM_VERSION_CMD: u16 = 0x0103;
pub const ETP_I2C_NEW_IAP_VERSION_CMD: u16 = 0x0110;
/// IC body / interface type, read when the OSM version is not yet valid
pub const ETP_I2C_IAP_ICBODY_CMD: u16 = 0x0110;
pub const ETP_I2C_IAP_VERSION_CMD: u16 = 0x0111;
/// Flim type flags (bit 0: flim region present / EEPROM capable)
pub const ETP_I2C_FLIM_TYPE_CMD: u16 = 0x0112;
pub const ETP_I2C_EEPROM_DRIVER_IC_CMD: u16 = 0x0118;
pub const ETP_I2C_EEPROM_IAP_VERSION_CMD: u16 = 0x0119;
pub const ETP_I2C_EEPROM_FW_VERSION_CMD: u16 = 0x011B;

pub const ETP_FLIM_TYPE_ENABLE: u16 = 1 << 0;

/// Value a register answers with when the controller is not readable yet
pub const ETP_REGISTER_NOT_READY: u16 = 0xFFFF;

// ============================================================================
// IAP Control
// ============================================================================

pub const ETP_I2C_IAP_TYPE_CMD: u16 = 0x0304;
pub const ETP_I2C_REPORT_MODE_CMD: u16 = 0x0306;
pub const ETP_I2C_FW_CHECKSUM_CMD: u16 = 0x030F;
pub const ETP_I2C_IAP_CTRL_CMD: u16 = 0x0310;
pub const ETP_I2C_IAP_CMD: u16 = 0x0311;
pub const ETP_I2C_IAP_RESET_CMD: u16 = 0x0314;
pub const ETP_I2C_IAP_CHECKSUM_CMD: u16 = 0x0315;

/// Written to the reset register
pub const ETP_I2C_IAP_RESET: u16 = 0xF0F0;
/// Report control values, written to the reset register
pub const ETP_I2C_ENABLE_REPORT: u16 = 0x0800;
pub const ETP_I2C_DISABLE_REPORT: u16 = 0x0801;
/// Precision touchpad (PTP) report mode
pub const ETP_PTP_MODE: u16 = 0x0003;

pub const ETP_I2C_IAP_PASSWORD: u16 = 0x1EA5;
/// Password for IC type 0x0A parts
pub const ETP_I2C_IAP_0A_PASSWORD: u16 = 0xE15A;
pub const ETP_IC_TYPE_0A: u8 = 0x0A;

/// IAP control register bits
pub const ETP_FW_IAP_LAST_FIT: u16 = 1 << 9;
pub const ETP_FW_IAP_CHECK_PW: u16 = 1 << 7;
pub const ETP_FW_IAP_PAGE_ERR: u16 = 1 << 5;
pub const ETP_FW_IAP_INTF_ERR: u16 = 1 << 4;

/// Register bytes prefixed to a raw I2C block write
pub const ETP_I2C_IAP_REG_L: u8 = 0x01;
pub const ETP_I2C_IAP_REG_H: u8 = 0x06;

// ============================================================================
// EEPROM IAP
// ============================================================================

pub const ETP_I2C_LONG_TX_CMD: u16 = 0x0330;
pub const ETP_I2C_EEPROM_IAP_CMD: u16 = 0x0331;
pub const ETP_I2C_EEPROM_STATUS_CMD: u16 = 0x0332;
pub const ETP_I2C_EEPROM_PAGE_ACK_CMD: u16 = 0x0333;
pub const ETP_I2C_EEPROM_CHECKSUM_CMD: u16 = 0x0334;
/// Checksum record kept in the device information block
pub const ETP_I2C_EEPROM_INFO_CHECKSUM_CMD: u16 = 0x0336;

pub const ETP_LONG_TX_ENABLE: u16 = 0x0001;
pub const ETP_LONG_TX_DISABLE: u16 = 0x0000;
pub const ETP_EEPROM_IAP_PASSWORD: u16 = 0x5AA5;
pub const ETP_EEPROM_IAP_EXIT: u16 = 0x0000;

/// EEPROM status register bits
pub const ETP_EEPROM_STATUS_IAP_READY: u16 = 1 << 0;
pub const ETP_EEPROM_STATUS_CHECKSUM_READY: u16 = 1 << 2;

/// Page acknowledgement codes
pub const ETP_EEPROM_ACK_OK: u16 = 0x0000;
/// Device was busy or saw a transfer error; the page may be resent
pub const ETP_EEPROM_NACK_RETRY: u16 = 0x00A1;

/// Leading byte of an EEPROM page-write block
pub const ETP_EEPROM_PAGE_WRITE_OP: u8 = 0xA2;
pub const EEPROM_PAGE_SIZE: usize = 32;
pub const MAX_EEPROM_SIZE: usize = (u16::MAX as usize + 1) * EEPROM_PAGE_SIZE;

/// The only driver IC / EEPROM IAP version pair that supports EEPROM updates
pub const EEPROM_SUPPORTED_DRIVER_IC: u8 = 2;
pub const EEPROM_SUPPORTED_IAP_VERSION: u8 = 1;

// ============================================================================
// HID Framing
// ============================================================================

/// Feature report carrying register commands
pub const HID_CMD_REPORT_ID: u8 = 0x0D;
/// Feature report carrying firmware blocks
pub const HID_BLOCK_REPORT_ID: u8 = 0x0B;
/// Payload prefix marking a register read in a command report
pub const HID_READ_PREFIX: [u8; 2] = [0x05, 0x03];
/// Bytes ahead of the payload in a command report read back with GET_FEATURE
pub const HID_REPLY_HEADER_LEN: usize = 3;
/// Length of a command report (report id + 4 payload bytes)
pub const HID_CMD_REPORT_LEN: usize = 5;

/// HID-over-I2C command and data registers
pub const I2C_HID_COMMAND_REG: u16 = 0x0005;
pub const I2C_HID_DATA_REG: u16 = 0x0006;
/// HID-over-I2C opcodes
pub const I2C_HID_OPCODE_GET_REPORT: u8 = 0x02;
pub const I2C_HID_OPCODE_SET_REPORT: u8 = 0x03;
/// Report type "feature" in bits 4..5 of the report selector byte
pub const I2C_HID_REPORT_TYPE_FEATURE: u8 = 0x30;
/// Outer tunnel frame carrying one command report
pub const I2C_HID_TUNNEL_FRAME_LEN: usize = 13;
/// Frame requesting the pending feature report
pub const I2C_HID_READ_REQUEST_LEN: usize = 6;
/// Length prefix, report id and echoed register ahead of the payload
pub const I2C_HID_REPLY_HEADER_LEN: usize = 5;

/// Probe written when scanning I2C buses
pub const I2C_PROBE: [u8; 2] = [0x02, 0x01];

// ============================================================================
// Retry Budgets
// ============================================================================

pub const BLOCK_WRITE_ATTEMPTS: usize = 10;
pub const EEPROM_PAGE_WRITE_ATTEMPTS: usize = 10;
pub const EEPROM_MODE_POLL_ATTEMPTS: usize = 10;
pub const EEPROM_CHECKSUM_POLL_ATTEMPTS: usize = 100;
pub const EEPROM_CHECKSUM_READ_ATTEMPTS: usize = 3;
pub const EEPROM_RECORD_ATTEMPTS: usize = 3;
/// Attempts for mode commands that are retried once
pub const MODE_COMMAND_ATTEMPTS: usize = 2;
/// Attempts for the IAP type write/readback
pub const IAP_TYPE_ATTEMPTS: usize = 2;

// ============================================================================
// Settle Times
// ============================================================================
//
// These encode device-side latencies. A target that exposes a ready flag can
// poll it instead, but the waits must not be dropped.

/// Report generation stops after the disable-report command
pub const DISABLE_REPORT_SETTLE: Duration = Duration::from_millis(20);
/// Gap before a failed restore command is resent
pub const RESTORE_RETRY_DELAY: Duration = Duration::from_millis(20);
/// Controller reboot after an IAP reset issued before programming
pub const IAP_RESET_SETTLE: Duration = Duration::from_millis(30);
/// Password check inside the bootloader
pub const PASSWORD_SETTLE: Duration = Duration::from_millis(100);
/// Flash commit of one 64/128-byte page
pub const PAGE_COMMIT_DELAY: Duration = Duration::from_millis(35);
/// Flash commit of one 512-byte page
pub const LARGE_PAGE_COMMIT_DELAY: Duration = Duration::from_millis(50);
/// Backoff between block write attempts
pub const BLOCK_RETRY_BACKOFF: Duration = Duration::from_micros(50);
/// Last page commit plus the automatic reset into the new firmware
pub const FLASH_COMMIT_SETTLE: Duration = Duration::from_millis(1200);
/// Gap after the final reset before re-reading device info
pub const FINAL_RESET_SETTLE: Duration = Duration::from_micros(300);
/// EEPROM mode switches (long transmission, EEPROM IAP)
pub const EEPROM_MODE_SETTLE: Duration = Duration::from_millis(10);
/// EEPROM programming latency of one 32-byte page
pub const EEPROM_PAGE_COMMIT_DELAY: Duration = Duration::from_millis(5);
/// Interval between EEPROM checksum polls
pub const EEPROM_CHECKSUM_POLL_INTERVAL: Duration = Duration::from_millis(30);
/// Information-block write latency for the checksum record
pub const EEPROM_RECORD_SETTLE: Duration = Duration::from_millis(20);
/// Controller reboot after an EEPROM update
pub const EEPROM_REBOOT_SETTLE: Duration = Duration::from_millis(1500);
