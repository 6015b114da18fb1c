//! Update session - orchestrates a main-flash update.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::config::{Timing, settle};
use crate::device::{
    DeviceDescriptor, PageGeometry, get_checksum, get_iap_ctrl, get_ic_type, page_count,
};
use crate::error::{IapError, Result};
use crate::events::{IapEvent, IapObserver, IapPhase, LogLevel, TracingObserver};
use crate::firmware::{FirmwareImage, word_checksum};
use crate::mode;
use crate::protocol::RegisterAccess;
use crate::protocol::constants::*;
use crate::state::{SectionTracker, UpdateContext, UpdateState};
use crate::transport::IapTransport;

/// How a main-flash update ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Device checksum matches the written data.
    Completed,
    /// Every block was accepted but the device reports a different checksum.
    /// The pages are already committed, so this is advisory.
    CompletedWithChecksumWarning { local: u16, remote: u16 },
}

/// Update session - owns the transport for the whole update.
pub struct UpdateSession<T: IapTransport, O: IapObserver> {
    transport: T,
    observer: Arc<O>,
    timing: Timing,
    ctx: UpdateContext,
    phase: IapPhase,
    descriptor: Option<DeviceDescriptor>,
    geometry: PageGeometry,
}

impl<T: IapTransport> UpdateSession<T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(transport: T) -> Self {
        Self::with_observer(transport, Arc::new(TracingObserver))
    }
}

impl<T: IapTransport, O: IapObserver> UpdateSession<T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(transport: T, observer: Arc<O>) -> Self {
        Self {
            transport,
            observer,
            timing: Timing::default(),
            ctx: UpdateContext::new(),
            phase: IapPhase::Identify,
            descriptor: None,
            geometry: PageGeometry::default(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn state(&self) -> UpdateState {
        self.ctx.state
    }

    /// Device facts gathered during identification.
    pub fn descriptor(&self) -> Option<&DeviceDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run the complete update.
    ///
    /// Normal reporting is restored on every path once the device has been
    /// written to, including aborts.
    #[instrument(skip_all, fields(interface = %self.transport.interface()))]
    pub fn run(&mut self, image: &FirmwareImage) -> Result<UpdateOutcome> {
        let result = self.update(image);

        if result.is_err() && self.ctx.needs_abort_reset() {
            warn!("Aborting inside IAP mode, resetting IC");
            if let Err(e) = mode::reset(&self.transport) {
                error!("Reset failed: {e}");
            }
            settle(self.timing.final_reset);
        }
        if self.ctx.device_touched {
            self.set_phase(IapPhase::Restore);
            if mode::switch_to_ptp_mode(&self.transport, &self.timing).is_err() {
                self.log(LogLevel::Warn, "Touchpad may stay without reports until reboot");
            }
        }

        match result {
            Ok(outcome) => {
                self.ctx.goto_state(UpdateState::Done);
                self.set_phase(IapPhase::Complete);
                self.observer.on_event(&IapEvent::Complete);
                Ok(outcome)
            }
            Err(e) => {
                self.ctx.goto_state(UpdateState::Aborted);
                self.set_phase(IapPhase::Error);
                self.observer.on_event(&IapEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn update(&mut self, image: &FirmwareImage) -> Result<UpdateOutcome> {
        let (ic_type, flash_size) = self.identify(image)?;
        let iap_version = self.descriptor.as_ref().map_or(0, |d| d.iap_version);

        self.prepare(ic_type, iap_version)?;
        let local = self.write_firmware(image, flash_size)?;

        // Verifying
        self.ctx.goto_state(UpdateState::Verifying);
        self.set_phase(IapPhase::Verify);
        settle(self.timing.flash_commit);
        let remote = get_checksum(&self.transport, true)?;
        self.observer.on_event(&IapEvent::Checksum { local, remote });
        let outcome = if remote == local {
            UpdateOutcome::Completed
        } else {
            warn!(
                "checksum diff local=[{:04X}], remote=[{:04X}]",
                local, remote
            );
            UpdateOutcome::CompletedWithChecksumWarning { local, remote }
        };

        // Finalizing
        self.ctx.goto_state(UpdateState::Finalizing);
        if let Err(e) = mode::reset(&self.transport) {
            warn!("Reset after update failed: {e}");
            self.log(LogLevel::Warn, "New firmware runs after the next power cycle");
        }
        settle(self.timing.final_reset);
        match DeviceDescriptor::query(&self.transport, ic_type) {
            Ok(updated) => self.descriptor = Some(updated),
            Err(e) => warn!("Could not read back device info: {e}"),
        }

        Ok(outcome)
    }

    /// Idle -> Identified. Reads only.
    fn identify(&mut self, image: &FirmwareImage) -> Result<(u8, usize)> {
        self.set_phase(IapPhase::Identify);
        image.check_main_flash_limit()?;

        let ic_type = get_ic_type(&self.transport)?;
        let pages = page_count(ic_type)?;
        info!(ic_type = %format!("0x{:02X}", ic_type), pages, "IC identified");
        let mut flash_size = image.validate_main_flash(pages)?;

        let descriptor = DeviceDescriptor::query(&self.transport, ic_type)?;
        self.observer.on_event(&IapEvent::Identified {
            ic_type,
            iap_version: descriptor.iap_version,
            fw_version: descriptor.fw_version,
        });

        if let Some(eeprom) = descriptor.eeprom {
            flash_size = self.resolve_flim(image, pages, eeprom.flim_type, descriptor.iap_version)?;
        }

        self.descriptor = Some(descriptor);
        self.ctx.goto_state(UpdateState::Identified);
        Ok((ic_type, flash_size))
    }

    /// Flashable size once the flim region is accounted for.
    fn resolve_flim(
        &self,
        image: &FirmwareImage,
        pages: usize,
        flim_type: u16,
        iap_version: u16,
    ) -> Result<usize> {
        if flim_type & ETP_FLIM_TYPE_ENABLE == 0 {
            return Ok(pages * FW_PAGE_SIZE);
        }
        if iap_version < FLIM_MIN_IAP_VERSION {
            return Err(IapError::FlimUnsupported { iap_version });
        }

        let size = pages.saturating_sub(FLIM_RESERVED_PAGES) * FW_PAGE_SIZE;
        image.check_signature(size)?;
        info!(size, "Flim type enabled, flashable range reduced");
        Ok(size)
    }

    /// Identified -> Prepared.
    fn prepare(&mut self, ic_type: u8, iap_version: u16) -> Result<()> {
        self.set_phase(IapPhase::Prepare);
        self.ctx.device_touched = true;
        // Tolerated; the password check below catches a controller that is
        // not listening.
        if let Err(e) = mode::disable_report(&self.transport, &self.timing) {
            self.log(LogLevel::Warn, &format!("Writing with reports enabled: {e}"));
        }

        let ctrl = get_iap_ctrl(&self.transport)?;
        if ctrl != ETP_FW_IAP_LAST_FIT {
            info!(ctrl = %format!("0x{:04X}", ctrl), "In IAP mode, reset IC");
            mode::reset(&self.transport)?;
            settle(self.timing.iap_reset);
        }

        self.geometry = PageGeometry::negotiate(&self.transport, ic_type, iap_version)?;

        let password = if ic_type == ETP_IC_TYPE_0A {
            ETP_I2C_IAP_0A_PASSWORD
        } else {
            ETP_I2C_IAP_PASSWORD
        };
        self.ctx.iap_entered = true;
        self.transport.write_register(ETP_I2C_IAP_CMD, password)?;
        settle(self.timing.password);

        let ctrl = get_iap_ctrl(&self.transport)?;
        if ctrl & ETP_FW_IAP_CHECK_PW == 0 {
            return Err(IapError::PasswordRejected { ctrl });
        }

        self.ctx.goto_state(UpdateState::Prepared);
        Ok(())
    }

    /// Prepared -> Writing. Returns the accumulated checksum.
    fn write_firmware(&mut self, image: &FirmwareImage, flash_size: usize) -> Result<u16> {
        let geometry = self.geometry;
        let range = image.write_range(flash_size, geometry.section_size)?;
        let start = range.start;
        let total = range.len() as u64;
        info!(
            start = %format!("0x{:X}", start),
            end = %format!("0x{:X}", range.end),
            "Writing firmware"
        );

        self.ctx.sections = SectionTracker::new(range.len(), geometry.section_size, geometry.sections_per_page);
        self.ctx.goto_state(UpdateState::Writing);
        self.set_phase(IapPhase::Write);

        let mut checksum = 0u16;
        for (offset, section) in image.sections(range, geometry.section_size) {
            let block_checksum = word_checksum(section);
            let page_final = self.ctx.sections.is_page_final();
            self.write_block_with_retry(offset, section, block_checksum, page_final)?;

            self.ctx.sections.advance();
            checksum = checksum.wrapping_add(block_checksum);
            self.observer.on_event(&IapEvent::BlockWritten {
                page: offset / geometry.page_size,
                checksum,
                section: self.ctx.sections.written,
            });
            self.observer.on_event(&IapEvent::Progress {
                phase: IapPhase::Write,
                current: (offset + section.len() - start) as u64,
                total,
            });
        }

        Ok(checksum)
    }

    fn write_block_with_retry(
        &self,
        offset: usize,
        section: &[u8],
        checksum: u16,
        page_final: bool,
    ) -> Result<()> {
        let mut block = Vec::with_capacity(section.len() + 2);
        block.extend_from_slice(section);
        block.extend_from_slice(&checksum.to_le_bytes());

        let mut attempt = 1;
        loop {
            match self.write_block(offset, &block, page_final) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < BLOCK_WRITE_ATTEMPTS => {
                    self.observer.on_event(&IapEvent::Retry {
                        offset,
                        attempt,
                        reason: e.to_string(),
                    });
                    settle(self.timing.block_retry_backoff);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(IapError::BlockWriteFailed {
                        offset,
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// One block write. The IAP control register is only checked once the
    /// last section of a page is in.
    fn write_block(&self, offset: usize, block: &[u8], page_final: bool) -> Result<()> {
        self.transport.write_block(block)?;
        if page_final {
            settle(self.timing.commit_delay(self.geometry.page_size));
            let ctrl = get_iap_ctrl(&self.transport)?;
            if ctrl & (ETP_FW_IAP_PAGE_ERR | ETP_FW_IAP_INTF_ERR) != 0 {
                return Err(IapError::BlockRejected { offset, ctrl });
            }
        }
        Ok(())
    }

    fn set_phase(&mut self, to: IapPhase) {
        if self.phase != to {
            self.observer.on_event(&IapEvent::PhaseChanged {
                from: self.phase,
                to,
            });
            self.phase = to;
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.observer.on_event(&IapEvent::Log {
            level,
            message: message.to_string(),
        });
    }
}
