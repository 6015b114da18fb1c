//! Event system for UI decoupling.
//!
//! Lets the CLI (or any other front end) follow an update without the
//! core logic knowing how progress is displayed.

use std::fmt;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Coarse phases of an update, as shown to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IapPhase {
    Identify,
    Prepare,
    Write,
    Verify,
    Restore,
    Complete,
    Error,
}

impl fmt::Display for IapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IapPhase::Identify => write!(f, "Identify"),
            IapPhase::Prepare => write!(f, "Prepare"),
            IapPhase::Write => write!(f, "Write"),
            IapPhase::Verify => write!(f, "Verify"),
            IapPhase::Restore => write!(f, "Restore"),
            IapPhase::Complete => write!(f, "Complete"),
            IapPhase::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by an update session.
#[derive(Debug, Clone)]
pub enum IapEvent {
    /// Device identified.
    Identified {
        ic_type: u8,
        iap_version: u16,
        fw_version: u16,
    },
    PhaseChanged { from: IapPhase, to: IapPhase },
    /// Progress in bytes (main flash) or pages (EEPROM).
    Progress {
        phase: IapPhase,
        current: u64,
        total: u64,
    },
    /// A block (main flash) or page (EEPROM) was accepted. `checksum` is the
    /// running total, `section` the number of blocks written so far.
    BlockWritten {
        page: usize,
        checksum: u16,
        section: usize,
    },
    /// A block or page write is being retried.
    Retry {
        offset: usize,
        attempt: usize,
        reason: String,
    },
    Log { level: LogLevel, message: String },
    /// Device and local checksums.
    Checksum { local: u16, remote: u16 },
    Error { message: String },
    Complete,
}

/// Observer trait for receiving update events.
pub trait IapObserver: Send + Sync {
    fn on_event(&self, event: &IapEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl IapObserver for NullObserver {
    fn on_event(&self, _event: &IapEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl IapObserver for TracingObserver {
    fn on_event(&self, event: &IapEvent) {
        match event {
            IapEvent::Identified {
                ic_type,
                iap_version,
                fw_version,
            } => {
                tracing::info!(
                    ic_type = %format!("0x{:02X}", ic_type),
                    iap_version = %format!("0x{:04X}", iap_version),
                    fw_version = %format!("0x{:04X}", fw_version),
                    "Device identified"
                );
            }
            IapEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            IapEvent::Progress {
                phase,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(phase = %phase, progress = %format!("{}%", pct), "Progress");
            }
            IapEvent::BlockWritten {
                page,
                checksum,
                section,
            } => {
                tracing::debug!(page, checksum, section, "Page updated");
            }
            IapEvent::Retry {
                offset,
                attempt,
                reason,
            } => {
                tracing::warn!(offset = %format!("0x{:X}", offset), attempt, "Retrying: {}", reason);
            }
            IapEvent::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            IapEvent::Checksum { local, remote } => {
                tracing::info!(
                    local = %format!("0x{:04X}", local),
                    remote = %format!("0x{:04X}", remote),
                    "Checksum"
                );
            }
            IapEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            IapEvent::Complete => {
                tracing::info!("Update complete");
            }
        }
    }
}
