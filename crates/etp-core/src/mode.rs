//! Report and operating mode control shared by both update paths.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{Timing, settle};
use crate::protocol::RegisterAccess;
use crate::protocol::constants::*;
use crate::transport::TransportError;

/// Write a register, resending after `delay` until `attempts` are used up.
pub fn write_with_retry<T: RegisterAccess + ?Sized>(
    t: &T,
    reg: u16,
    value: u16,
    attempts: usize,
    delay: Duration,
) -> Result<(), TransportError> {
    let mut attempt = 1;
    loop {
        match t.write_register(reg, value) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                debug!(reg = %format!("0x{:04X}", reg), attempt, error = %e, "Write failed, retrying");
                settle(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Stop input reports so they cannot interleave with IAP traffic.
pub fn disable_report<T: RegisterAccess + ?Sized>(t: &T, timing: &Timing) -> Result<(), TransportError> {
    let result = t.write_register(ETP_I2C_IAP_RESET_CMD, ETP_I2C_DISABLE_REPORT);
    if let Err(e) = &result {
        warn!("Can't disable TP report: {e}");
    }
    settle(timing.disable_report);
    result
}

/// Restart the controller.
pub fn reset<T: RegisterAccess + ?Sized>(t: &T) -> Result<(), TransportError> {
    t.write_register(ETP_I2C_IAP_RESET_CMD, ETP_I2C_IAP_RESET)
}

/// Re-enable input reports and select PTP mode.
///
/// Both commands are attempted even if the first fails; each is resent once.
pub fn switch_to_ptp_mode<T: RegisterAccess + ?Sized>(t: &T, timing: &Timing) -> Result<(), TransportError> {
    let report = write_with_retry(
        t,
        ETP_I2C_IAP_RESET_CMD,
        ETP_I2C_ENABLE_REPORT,
        MODE_COMMAND_ATTEMPTS,
        timing.restore_retry,
    );
    if let Err(e) = &report {
        warn!("Can't enable TP report: {e}");
    }

    let ptp = write_with_retry(
        t,
        ETP_I2C_REPORT_MODE_CMD,
        ETP_PTP_MODE,
        MODE_COMMAND_ATTEMPTS,
        timing.restore_retry,
    );
    if let Err(e) = &ptp {
        warn!("Can't switch to TP PTP mode: {e}");
    }

    report.and(ptp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn test_switch_to_ptp_mode() {
        let mock = MockTransport::new();
        switch_to_ptp_mode(&mock, &Timing::immediate()).unwrap();
        assert_eq!(
            mock.get_writes(),
            vec![
                (ETP_I2C_IAP_RESET_CMD, ETP_I2C_ENABLE_REPORT),
                (ETP_I2C_REPORT_MODE_CMD, ETP_PTP_MODE)
            ]
        );
    }

    #[test]
    fn test_restore_commands_are_resent_once() {
        let mock = MockTransport::new();
        mock.fail_next_writes(ETP_I2C_IAP_RESET_CMD, 1);
        mock.fail_next_writes(ETP_I2C_REPORT_MODE_CMD, 1);
        switch_to_ptp_mode(&mock, &Timing::immediate()).unwrap();
        assert_eq!(mock.writes_to(ETP_I2C_REPORT_MODE_CMD), vec![ETP_PTP_MODE]);
    }

    #[test]
    fn test_ptp_mode_attempted_after_report_failure() {
        let mock = MockTransport::new();
        mock.fail_next_writes(ETP_I2C_IAP_RESET_CMD, 2);
        assert!(switch_to_ptp_mode(&mock, &Timing::immediate()).is_err());
        assert!(mock.writes_to(ETP_I2C_IAP_RESET_CMD).is_empty());
        assert_eq!(mock.writes_to(ETP_I2C_REPORT_MODE_CMD), vec![ETP_PTP_MODE]);
    }

    #[test]
    fn test_disable_report_surfaces_failure() {
        let mock = MockTransport::new();
        mock.fail_next_writes(ETP_I2C_IAP_RESET_CMD, 1);
        assert!(disable_report(&mock, &Timing::immediate()).is_err());
        disable_report(&mock, &Timing::immediate()).unwrap();
        assert_eq!(mock.get_writes(), vec![(ETP_I2C_IAP_RESET_CMD, ETP_I2C_DISABLE_REPORT)]);
    }
}
