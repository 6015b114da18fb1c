//! EEPROM update path.
//!
//! The EEPROM is written through the controller in 32-byte pages while the
//! controller runs in long-transmission and EEPROM IAP modes. Pages are
//! addressed by a 16-bit index and acknowledged one at a time. When all pages
//! are in, the controller computes a byte-wise checksum which, if it matches,
//! is persisted in the information block.
//!
//! On a raw I2C channel these operations go through the HID tunnel, see
//! [`DeviceChannel::promote_for_eeprom`](crate::transport::DeviceChannel::promote_for_eeprom).

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::config::{Timing, settle};
use crate::device::EepromDescriptor;
use crate::error::{IapError, Result};
use crate::events::{IapEvent, IapObserver, IapPhase, LogLevel, TracingObserver};
use crate::firmware::{FirmwareImage, byte_checksum};
use crate::mode::{self, write_with_retry};
use crate::protocol::RegisterAccess;
use crate::protocol::constants::*;
use crate::state::{EepromContext, EepromState};
use crate::transport::{IapTransport, TransportError};

/// How an EEPROM update ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromOutcome {
    /// Checksums matched and the record was persisted.
    Completed { checksum: u16 },
    /// Every page was accepted but the device computed a different checksum.
    /// Nothing is persisted.
    ChecksumMismatch { local: u16, remote: u16 },
}

/// Read the persisted EEPROM checksum record.
pub fn eeprom_checksum<T: RegisterAccess + ?Sized>(t: &T) -> Result<u16> {
    Ok(t.read_register(ETP_I2C_EEPROM_INFO_CHECKSUM_CMD)?)
}

/// Read the EEPROM firmware version.
pub fn eeprom_version<T: RegisterAccess + ?Sized>(t: &T) -> Result<u16> {
    Ok(t.read_register(ETP_I2C_EEPROM_FW_VERSION_CMD)?)
}

/// EEPROM session - owns the transport for the whole update.
pub struct EepromSession<T: IapTransport, O: IapObserver> {
    transport: T,
    observer: Arc<O>,
    timing: Timing,
    ctx: EepromContext,
}

impl<T: IapTransport> EepromSession<T, TracingObserver> {
    pub fn new(transport: T) -> Self {
        Self::with_observer(transport, Arc::new(TracingObserver))
    }
}

impl<T: IapTransport, O: IapObserver> EepromSession<T, O> {
    pub fn with_observer(transport: T, observer: Arc<O>) -> Self {
        Self {
            transport,
            observer,
            timing: Timing::default(),
            ctx: EepromContext::new(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn state(&self) -> EepromState {
        self.ctx.state
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Confirm the controller can take an EEPROM update.
    ///
    /// Reads only. Fails with [`IapError::EepromUnsupported`] unless the
    /// capability bit is set and the driver IC / IAP version pair is
    /// supported.
    pub fn prepare_for_update(&mut self) -> Result<EepromDescriptor> {
        let descriptor = EepromDescriptor::query(&self.transport)?;
        info!(
            flim_type = %format!("0x{:04X}", descriptor.flim_type),
            driver_ic = descriptor.driver_ic,
            iap_version = descriptor.iap_version,
            "EEPROM descriptor"
        );
        if !descriptor.supports_update() {
            return Err(IapError::EepromUnsupported {
                flim_type: descriptor.flim_type,
                driver_ic: descriptor.driver_ic,
                iap_version: descriptor.iap_version,
            });
        }
        self.ctx.goto_state(EepromState::EepromEnabled);
        Ok(descriptor)
    }

    /// Run the complete EEPROM update.
    ///
    /// Once the device has been written to, the controller is always
    /// restarted and returned to PTP mode.
    #[instrument(skip_all, fields(interface = %self.transport.interface()))]
    pub fn run(&mut self, image: &FirmwareImage) -> Result<EepromOutcome> {
        let result = self.update(image);

        if result.is_err() {
            self.leave_modes_after_abort();
        }
        if self.ctx.device_touched {
            self.finalize();
        }

        match result {
            Ok(outcome) => {
                self.ctx.goto_state(EepromState::Done);
                self.observer.on_event(&IapEvent::Complete);
                Ok(outcome)
            }
            Err(e) => {
                self.ctx.goto_state(EepromState::Aborted);
                self.observer.on_event(&IapEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn update(&mut self, image: &FirmwareImage) -> Result<EepromOutcome> {
        self.prepare_for_update()?;
        self.enter_modes()?;
        let local = self.write_pages(image)?;
        self.exit_modes()?;

        self.ctx.goto_state(EepromState::ChecksumPoll);
        self.observer.on_event(&IapEvent::PhaseChanged {
            from: IapPhase::Write,
            to: IapPhase::Verify,
        });
        let remote = self.poll_checksum()?;
        self.observer.on_event(&IapEvent::Checksum { local, remote });
        if remote != local {
            warn!(
                "EEPROM checksum diff local=[{:04X}], remote=[{:04X}]",
                local, remote
            );
            return Ok(EepromOutcome::ChecksumMismatch { local, remote });
        }

        self.persist_checksum(local)?;
        Ok(EepromOutcome::Completed { checksum: local })
    }

    /// EepromEnabled -> LongTxMode -> IapMode.
    fn enter_modes(&mut self) -> Result<()> {
        self.ctx.device_touched = true;
        write_with_retry(
            &self.transport,
            ETP_I2C_LONG_TX_CMD,
            ETP_LONG_TX_ENABLE,
            MODE_COMMAND_ATTEMPTS,
            self.timing.restore_retry,
        )?;
        settle(self.timing.eeprom_mode);
        self.ctx.goto_state(EepromState::LongTxMode);

        write_with_retry(
            &self.transport,
            ETP_I2C_EEPROM_IAP_CMD,
            ETP_EEPROM_IAP_PASSWORD,
            MODE_COMMAND_ATTEMPTS,
            self.timing.restore_retry,
        )?;
        settle(self.timing.eeprom_mode);
        self.ctx.goto_state(EepromState::IapMode);

        for attempt in 1..=EEPROM_MODE_POLL_ATTEMPTS {
            match self.transport.read_register(ETP_I2C_EEPROM_STATUS_CMD) {
                Ok(status) if status & ETP_EEPROM_STATUS_IAP_READY != 0 => return Ok(()),
                Ok(status) => debug!(attempt, status = %format!("0x{:04X}", status), "EEPROM IAP not ready"),
                Err(e) => debug!(attempt, error = %e, "EEPROM status read failed"),
            }
            settle(self.timing.eeprom_mode);
        }
        Err(IapError::EepromNotReady {
            stage: "IAP mode",
            attempts: EEPROM_MODE_POLL_ATTEMPTS,
        })
    }

    /// IapMode -> Writing. Returns the byte-wise checksum of what was sent.
    fn write_pages(&mut self, image: &FirmwareImage) -> Result<u16> {
        self.ctx.goto_state(EepromState::Writing);
        self.observer.on_event(&IapEvent::PhaseChanged {
            from: IapPhase::Prepare,
            to: IapPhase::Write,
        });

        // Clear page 0 before the real data goes in.
        self.write_page_with_retry(0, &[0xFF; EEPROM_PAGE_SIZE])?;

        let total = image.eeprom_page_count() as u64;
        let mut checksum = 0u16;
        for (index, page) in image.eeprom_pages() {
            self.write_page_with_retry(index, &page)?;
            checksum = checksum.wrapping_add(byte_checksum(&page));
            self.ctx.pages_written += 1;
            self.observer.on_event(&IapEvent::BlockWritten {
                page: index as usize,
                checksum,
                section: self.ctx.pages_written,
            });
            self.observer.on_event(&IapEvent::Progress {
                phase: IapPhase::Write,
                current: self.ctx.pages_written as u64,
                total,
            });
        }
        Ok(checksum)
    }

    fn write_page_with_retry(&self, index: u16, page: &[u8; EEPROM_PAGE_SIZE]) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.write_page(index, page) {
                Ok(()) => return Ok(()),
                Err(e @ IapError::EepromPageRejected { code, .. }) if code != ETP_EEPROM_NACK_RETRY => {
                    return Err(e);
                }
                Err(e) if attempt < EEPROM_PAGE_WRITE_ATTEMPTS => {
                    self.observer.on_event(&IapEvent::Retry {
                        offset: index as usize * EEPROM_PAGE_SIZE,
                        attempt,
                        reason: e.to_string(),
                    });
                    attempt += 1;
                }
                Err(e) => {
                    return Err(IapError::EepromPageFailed {
                        page: index,
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    fn write_page(&self, index: u16, page: &[u8; EEPROM_PAGE_SIZE]) -> Result<()> {
        let mut block = Vec::with_capacity(EEPROM_PAGE_SIZE + 3);
        block.push(ETP_EEPROM_PAGE_WRITE_OP);
        block.extend_from_slice(&index.to_be_bytes());
        block.extend_from_slice(page);
        self.transport.write_block(&block)?;

        settle(self.timing.eeprom_page_commit);
        let code = self.transport.read_register(ETP_I2C_EEPROM_PAGE_ACK_CMD)?;
        if code != ETP_EEPROM_ACK_OK {
            return Err(IapError::EepromPageRejected { page: index, code });
        }
        Ok(())
    }

    /// Leave EEPROM IAP mode, then long transmission mode. Both are
    /// attempted; the first failure is returned.
    fn exit_modes(&mut self) -> Result<()> {
        let iap = write_with_retry(
            &self.transport,
            ETP_I2C_EEPROM_IAP_CMD,
            ETP_EEPROM_IAP_EXIT,
            MODE_COMMAND_ATTEMPTS,
            self.timing.restore_retry,
        );
        settle(self.timing.eeprom_mode);
        let long_tx = write_with_retry(
            &self.transport,
            ETP_I2C_LONG_TX_CMD,
            ETP_LONG_TX_DISABLE,
            MODE_COMMAND_ATTEMPTS,
            self.timing.restore_retry,
        );
        settle(self.timing.eeprom_mode);
        Ok(iap.and(long_tx)?)
    }

    fn leave_modes_after_abort(&mut self) {
        let state = self.ctx.state;
        if state.in_eeprom_iap() {
            if let Err(e) = write_with_retry(
                &self.transport,
                ETP_I2C_EEPROM_IAP_CMD,
                ETP_EEPROM_IAP_EXIT,
                MODE_COMMAND_ATTEMPTS,
                self.timing.restore_retry,
            ) {
                error!("Can't leave EEPROM IAP mode: {e}");
            }
        }
        if state.in_long_tx() {
            if let Err(e) = write_with_retry(
                &self.transport,
                ETP_I2C_LONG_TX_CMD,
                ETP_LONG_TX_DISABLE,
                MODE_COMMAND_ATTEMPTS,
                self.timing.restore_retry,
            ) {
                error!("Can't leave long transmission mode: {e}");
            }
        }
    }

    /// Wait for the device-side checksum, then read it.
    fn poll_checksum(&self) -> Result<u16> {
        for poll in 1..=EEPROM_CHECKSUM_POLL_ATTEMPTS {
            settle(self.timing.eeprom_checksum_poll);
            if self.checksum_ready()? {
                debug!(poll, "EEPROM checksum ready");
                return Ok(self.transport.read_register(ETP_I2C_EEPROM_CHECKSUM_CMD)?);
            }
        }
        Err(IapError::EepromNotReady {
            stage: "checksum",
            attempts: EEPROM_CHECKSUM_POLL_ATTEMPTS,
        })
    }

    fn checksum_ready(&self) -> std::result::Result<bool, TransportError> {
        let mut attempt = 1;
        loop {
            match self.transport.read_register(ETP_I2C_EEPROM_STATUS_CMD) {
                Ok(status) => return Ok(status & ETP_EEPROM_STATUS_CHECKSUM_READY != 0),
                Err(e) if attempt < EEPROM_CHECKSUM_READ_ATTEMPTS => {
                    debug!(attempt, error = %e, "EEPROM status read failed");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Store the checksum in the information block and read it back.
    fn persist_checksum(&self, checksum: u16) -> Result<()> {
        let mut last = None;
        for attempt in 1..=EEPROM_RECORD_ATTEMPTS {
            match self.write_checksum_record(checksum) {
                Ok(actual) if actual == checksum => {
                    info!(checksum = %format!("0x{:04X}", checksum), "EEPROM checksum recorded");
                    return Ok(());
                }
                Ok(actual) => {
                    warn!(attempt, actual = %format!("0x{:04X}", actual), "EEPROM checksum record readback mismatch");
                    last = Some(IapError::ChecksumRecordMismatch {
                        expected: checksum,
                        actual,
                    });
                }
                Err(e) => {
                    warn!(attempt, "EEPROM checksum record failed: {e}");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or(IapError::ChecksumRecordMismatch {
            expected: checksum,
            actual: 0,
        }))
    }

    fn write_checksum_record(&self, checksum: u16) -> Result<u16> {
        let t = &self.transport;
        t.write_register(ETP_I2C_EEPROM_IAP_CMD, ETP_EEPROM_IAP_PASSWORD)?;
        settle(self.timing.eeprom_mode);
        t.write_register(ETP_I2C_EEPROM_INFO_CHECKSUM_CMD, checksum)?;
        settle(self.timing.eeprom_record);
        t.write_register(ETP_I2C_EEPROM_IAP_CMD, ETP_EEPROM_IAP_EXIT)?;
        settle(self.timing.eeprom_mode);
        Ok(eeprom_checksum(t)?)
    }

    /// Restart the controller and restore PTP mode.
    fn finalize(&mut self) {
        self.ctx.goto_state(EepromState::Finalize);
        if let Err(e) = mode::reset(&self.transport) {
            error!("Reset failed: {e}");
        }
        if mode::switch_to_ptp_mode(&self.transport, &self.timing).is_err() {
            self.log(LogLevel::Warn, "Touchpad may stay without reports until reboot");
        }
        settle(self.timing.eeprom_reboot);
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.observer.on_event(&IapEvent::Log {
            level,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::NullObserver;
    use crate::transport::{InterfaceKind, MockTransport};

    fn eeprom_device() -> MockTransport {
        let mock = MockTransport::with_interface(InterfaceKind::I2cHid);
        mock.set_register(ETP_I2C_FLIM_TYPE_CMD, ETP_FLIM_TYPE_ENABLE);
        mock.set_register(ETP_I2C_EEPROM_DRIVER_IC_CMD, 2);
        mock.set_register(ETP_I2C_EEPROM_IAP_VERSION_CMD, 1);
        mock.set_register(
            ETP_I2C_EEPROM_STATUS_CMD,
            ETP_EEPROM_STATUS_IAP_READY | ETP_EEPROM_STATUS_CHECKSUM_READY,
        );
        mock
    }

    fn session(mock: &MockTransport) -> EepromSession<&MockTransport, NullObserver> {
        EepromSession::with_observer(mock, Arc::new(NullObserver)).with_timing(Timing::immediate())
    }

    fn image() -> (FirmwareImage, u16) {
        let data: Vec<u8> = (0..40u8).collect();
        let mut padded = data.clone();
        padded.resize(64, 0xFF);
        (FirmwareImage::from_bytes(data).unwrap(), byte_checksum(&padded))
    }

    #[test]
    fn test_supported_combination_prepares() {
        let mock = eeprom_device();
        let mut session = session(&mock);
        let descriptor = session.prepare_for_update().unwrap();
        assert_eq!(descriptor.driver_ic, 2);
        assert_eq!(session.state(), EepromState::EepromEnabled);
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_unsupported_combinations_do_not_enter_iap() {
        for (driver_ic, iap_version, flim) in [(3, 1, 1), (2, 2, 1), (1, 0, 1), (2, 1, 0)] {
            let (image, _) = image();
            let mock = eeprom_device();
            mock.set_register(ETP_I2C_EEPROM_DRIVER_IC_CMD, driver_ic);
            mock.set_register(ETP_I2C_EEPROM_IAP_VERSION_CMD, iap_version);
            mock.set_register(ETP_I2C_FLIM_TYPE_CMD, flim);

            let err = session(&mock).run(&image).unwrap_err();
            assert!(matches!(err, IapError::EepromUnsupported { .. }));
            assert_eq!(err.kind(), ErrorKind::Unsupported);
            assert!(mock.get_writes().is_empty());
            assert!(mock.get_blocks().is_empty());
        }
    }

    #[test]
    fn test_full_update() {
        let (image, expected) = image();
        let mock = eeprom_device();
        mock.set_register(ETP_I2C_EEPROM_CHECKSUM_CMD, expected);

        let mut session = session(&mock);
        assert_eq!(
            session.run(&image).unwrap(),
            EepromOutcome::Completed { checksum: expected }
        );
        assert_eq!(session.state(), EepromState::Done);

        let blocks = mock.get_blocks();
        assert_eq!(blocks.len(), 3);
        let mut clear = vec![ETP_EEPROM_PAGE_WRITE_OP, 0x00, 0x00];
        clear.extend_from_slice(&[0xFF; 32]);
        assert_eq!(blocks[0], clear);
        assert_eq!(&blocks[1][..4], &[ETP_EEPROM_PAGE_WRITE_OP, 0x00, 0x00, 0x00]);
        assert_eq!(&blocks[2][..4], &[ETP_EEPROM_PAGE_WRITE_OP, 0x00, 0x01, 32]);
        assert_eq!(blocks[2].len(), 35);

        assert_eq!(
            mock.get_writes(),
            vec![
                (ETP_I2C_LONG_TX_CMD, ETP_LONG_TX_ENABLE),
                (ETP_I2C_EEPROM_IAP_CMD, ETP_EEPROM_IAP_PASSWORD),
                (ETP_I2C_EEPROM_IAP_CMD, ETP_EEPROM_IAP_EXIT),
                (ETP_I2C_LONG_TX_CMD, ETP_LONG_TX_DISABLE),
                (ETP_I2C_EEPROM_IAP_CMD, ETP_EEPROM_IAP_PASSWORD),
                (ETP_I2C_EEPROM_INFO_CHECKSUM_CMD, expected),
                (ETP_I2C_EEPROM_IAP_CMD, ETP_EEPROM_IAP_EXIT),
                (ETP_I2C_IAP_RESET_CMD, ETP_I2C_IAP_RESET),
                (ETP_I2C_IAP_RESET_CMD, ETP_I2C_ENABLE_REPORT),
                (ETP_I2C_REPORT_MODE_CMD, ETP_PTP_MODE),
            ]
        );
        assert_eq!(eeprom_checksum(&mock).unwrap(), expected);
    }

    #[test]
    fn test_mode_commands_retried_once() {
        let (image, expected) = image();
        let mock = eeprom_device();
        mock.set_register(ETP_I2C_EEPROM_CHECKSUM_CMD, expected);
        mock.fail_next_writes(ETP_I2C_LONG_TX_CMD, 1);

        assert!(session(&mock).run(&image).is_ok());
        assert_eq!(
            mock.writes_to(ETP_I2C_LONG_TX_CMD),
            vec![ETP_LONG_TX_ENABLE, ETP_LONG_TX_DISABLE]
        );
    }

    #[test]
    fn test_iap_mode_never_ready() {
        let (image, _) = image();
        let mock = eeprom_device();
        mock.set_register(ETP_I2C_EEPROM_STATUS_CMD, 0x0000);

        let mut session = session(&mock);
        let err = session.run(&image).unwrap_err();
        assert!(matches!(
            err,
            IapError::EepromNotReady {
                stage: "IAP mode",
                attempts: 10
            }
        ));
        assert_eq!(session.state(), EepromState::Aborted);
        assert!(mock.get_blocks().is_empty());

        let writes = mock.get_writes();
        assert!(writes.contains(&(ETP_I2C_EEPROM_IAP_CMD, ETP_EEPROM_IAP_EXIT)));
        assert!(writes.contains(&(ETP_I2C_LONG_TX_CMD, ETP_LONG_TX_DISABLE)));
        assert_eq!(writes.last(), Some(&(ETP_I2C_REPORT_MODE_CMD, ETP_PTP_MODE)));
    }

    #[test]
    fn test_recoverable_nack_is_retried() {
        let (image, expected) = image();
        let mock = eeprom_device();
        mock.set_register(ETP_I2C_EEPROM_CHECKSUM_CMD, expected);
        mock.queue_read(ETP_I2C_EEPROM_PAGE_ACK_CMD, ETP_EEPROM_NACK_RETRY);
        mock.queue_read(ETP_I2C_EEPROM_PAGE_ACK_CMD, ETP_EEPROM_NACK_RETRY);

        assert!(session(&mock).run(&image).is_ok());
        assert_eq!(mock.get_blocks().len(), 5);
    }

    #[test]
    fn test_recoverable_nack_budget() {
        let (image, _) = image();
        let mock = eeprom_device();
        for _ in 0..EEPROM_PAGE_WRITE_ATTEMPTS {
            mock.queue_read(ETP_I2C_EEPROM_PAGE_ACK_CMD, ETP_EEPROM_NACK_RETRY);
        }

        match session(&mock).run(&image) {
            Err(IapError::EepromPageFailed { page, attempts, .. }) => {
                assert_eq!(page, 0);
                assert_eq!(attempts, 10);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(mock.get_blocks().len(), 10);
    }

    #[test]
    fn test_other_nack_is_fatal() {
        let (image, _) = image();
        let mock = eeprom_device();
        mock.queue_read(ETP_I2C_EEPROM_PAGE_ACK_CMD, 0x00B2);

        let err = session(&mock).run(&image).unwrap_err();
        assert!(matches!(
            err,
            IapError::EepromPageRejected {
                page: 0,
                code: 0x00B2
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Nack);
        assert_eq!(mock.get_blocks().len(), 1);
        assert_eq!(
            mock.writes_to(ETP_I2C_IAP_RESET_CMD),
            vec![ETP_I2C_IAP_RESET, ETP_I2C_ENABLE_REPORT]
        );
    }

    #[test]
    fn test_checksum_mismatch_skips_record() {
        let (image, expected) = image();
        let mock = eeprom_device();
        mock.set_register(ETP_I2C_EEPROM_CHECKSUM_CMD, expected ^ 0x00FF);

        assert_eq!(
            session(&mock).run(&image).unwrap(),
            EepromOutcome::ChecksumMismatch {
                local: expected,
                remote: expected ^ 0x00FF
            }
        );
        assert!(mock.writes_to(ETP_I2C_EEPROM_INFO_CHECKSUM_CMD).is_empty());
        assert_eq!(mock.writes_to(ETP_I2C_REPORT_MODE_CMD), vec![ETP_PTP_MODE]);
    }

    #[test]
    fn test_checksum_never_ready() {
        let (image, _) = image();
        let mock = eeprom_device();
        mock.set_register(ETP_I2C_EEPROM_STATUS_CMD, ETP_EEPROM_STATUS_IAP_READY);

        let err = session(&mock).run(&image).unwrap_err();
        assert!(matches!(
            err,
            IapError::EepromNotReady {
                stage: "checksum",
                attempts: 100
            }
        ));
    }

    #[test]
    fn test_checksum_record_readback_mismatch() {
        let (image, expected) = image();
        let mock = eeprom_device();
        mock.set_register(ETP_I2C_EEPROM_CHECKSUM_CMD, expected);
        mock.set_write_only(ETP_I2C_EEPROM_INFO_CHECKSUM_CMD);

        let err = session(&mock).run(&image).unwrap_err();
        assert!(matches!(err, IapError::ChecksumRecordMismatch { actual: 0, .. }));
        assert_eq!(
            mock.writes_to(ETP_I2C_EEPROM_INFO_CHECKSUM_CMD),
            vec![expected; EEPROM_RECORD_ATTEMPTS]
        );
    }

    #[test]
    fn test_eeprom_version_query() {
        let mock = MockTransport::new();
        mock.set_register(ETP_I2C_EEPROM_FW_VERSION_CMD, 0x0107);
        assert_eq!(eeprom_version(&mock).unwrap(), 0x0107);
        assert!(mock.get_writes().is_empty());
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: std::sync::Mutex<Vec<IapEvent>>,
    }

    impl IapObserver for RecordingObserver {
        fn on_event(&self, event: &IapEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_page_events_carry_running_checksum() {
        let (image, expected) = image();
        let mock = eeprom_device();
        mock.set_register(ETP_I2C_EEPROM_CHECKSUM_CMD, expected);

        let observer = Arc::new(RecordingObserver::default());
        let mut session =
            EepromSession::with_observer(&mock, observer.clone()).with_timing(Timing::immediate());
        session.run(&image).unwrap();

        let first: Vec<u8> = (0..32u8).collect();
        let pages: Vec<(usize, u16, usize)> = observer
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                IapEvent::BlockWritten {
                    page,
                    checksum,
                    section,
                } => Some((*page, *checksum, *section)),
                _ => None,
            })
            .collect();
        assert_eq!(pages, vec![(0, byte_checksum(&first), 1), (1, expected, 2)]);
    }

    #[test]
    fn test_restore_failure_reported_to_observer() {
        let (image, expected) = image();
        let mock = eeprom_device();
        mock.set_register(ETP_I2C_EEPROM_CHECKSUM_CMD, expected);
        mock.fail_next_writes(ETP_I2C_REPORT_MODE_CMD, MODE_COMMAND_ATTEMPTS);

        let observer = Arc::new(RecordingObserver::default());
        let mut session =
            EepromSession::with_observer(&mock, observer.clone()).with_timing(Timing::immediate());
        assert_eq!(
            session.run(&image).unwrap(),
            EepromOutcome::Completed { checksum: expected }
        );
        assert!(observer.events.lock().unwrap().iter().any(|e| matches!(
            e,
            IapEvent::Log {
                level: LogLevel::Warn,
                ..
            }
        )));
    }
}
