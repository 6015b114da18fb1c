//! Update state machines and section bookkeeping.

use std::fmt;

/// State of a main-flash update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateState {
    #[default]
    Idle,
    /// IC type, page count and versions are known; nothing written yet.
    Identified,
    /// Reports disabled, IAP mode entered and password accepted.
    Prepared,
    Writing,
    Verifying,
    Finalizing,
    Done,
    Aborted,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Idle => write!(f, "IDLE"),
            UpdateState::Identified => write!(f, "IDENTIFIED"),
            UpdateState::Prepared => write!(f, "PREPARED"),
            UpdateState::Writing => write!(f, "WRITING"),
            UpdateState::Verifying => write!(f, "VERIFYING"),
            UpdateState::Finalizing => write!(f, "FINALIZING"),
            UpdateState::Done => write!(f, "DONE"),
            UpdateState::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl UpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateState::Done | UpdateState::Aborted)
    }
}

/// State of an EEPROM update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EepromState {
    #[default]
    Idle,
    /// Capability confirmed, main-flash IAP not entered.
    EepromEnabled,
    LongTxMode,
    IapMode,
    Writing,
    ChecksumPoll,
    Finalize,
    Done,
    Aborted,
}

impl fmt::Display for EepromState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EepromState::Idle => write!(f, "IDLE"),
            EepromState::EepromEnabled => write!(f, "EEPROM_ENABLED"),
            EepromState::LongTxMode => write!(f, "LONG_TX_MODE"),
            EepromState::IapMode => write!(f, "EEPROM_IAP_MODE"),
            EepromState::Writing => write!(f, "WRITING"),
            EepromState::ChecksumPoll => write!(f, "CHECKSUM_POLL"),
            EepromState::Finalize => write!(f, "FINALIZE"),
            EepromState::Done => write!(f, "DONE"),
            EepromState::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl EepromState {
    /// Long transmission mode may still be active.
    pub fn in_long_tx(&self) -> bool {
        matches!(
            self,
            EepromState::LongTxMode | EepromState::IapMode | EepromState::Writing
        )
    }

    /// EEPROM IAP mode may still be active.
    pub fn in_eeprom_iap(&self) -> bool {
        matches!(self, EepromState::IapMode | EepromState::Writing)
    }
}

/// Tracks sections of a write range.
///
/// The position only moves after a section is acknowledged, so a retried
/// section is never counted twice.
#[derive(Debug, Default, Clone)]
pub struct SectionTracker {
    /// Sections to write.
    pub total: usize,
    /// Sections written so far.
    pub written: usize,
    /// Sections per flash page.
    pub sections_per_page: usize,
}

impl SectionTracker {
    pub fn new(range_len: usize, section_size: usize, sections_per_page: usize) -> Self {
        Self {
            total: range_len / section_size.max(1),
            written: 0,
            sections_per_page: sections_per_page.max(1),
        }
    }

    /// Record one acknowledged section.
    pub fn advance(&mut self) {
        self.written += 1;
    }

    /// The next section to write closes a flash page.
    pub fn is_page_final(&self) -> bool {
        (self.written + 1) % self.sections_per_page == 0
    }

    pub fn is_done(&self) -> bool {
        self.written >= self.total
    }
}

/// Runtime state of one update session.
#[derive(Debug, Default)]
pub struct UpdateContext {
    pub state: UpdateState,
    pub sections: SectionTracker,
    /// Set once anything has been written to the device.
    pub device_touched: bool,
    /// Set once the IAP password has been sent.
    pub iap_entered: bool,
}

impl UpdateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: UpdateState) {
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    /// The bootloader may still be active and no final reset was issued.
    pub fn needs_abort_reset(&self) -> bool {
        self.iap_entered && !matches!(self.state, UpdateState::Finalizing | UpdateState::Done)
    }
}

/// Runtime state of one EEPROM session.
#[derive(Debug, Default)]
pub struct EepromContext {
    pub state: EepromState,
    /// Pages acknowledged so far.
    pub pages_written: usize,
    /// Set once anything has been written to the device.
    pub device_touched: bool,
}

impl EepromContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: EepromState) {
        tracing::info!(from = %self.state, to = %new_state, "EEPROM state transition");
        self.state = new_state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_tracker_page_boundaries() {
        // 512-byte pages written as 4 x 128-byte sections.
        let mut tracker = SectionTracker::new(2048, 128, 4);
        assert_eq!(tracker.total, 16);

        let mut finals = Vec::new();
        while !tracker.is_done() {
            finals.push(tracker.is_page_final());
            tracker.advance();
        }
        let expected: Vec<bool> = (0..16).map(|i| i % 4 == 3).collect();
        assert_eq!(finals, expected);
    }

    #[test]
    fn test_section_tracker_whole_pages() {
        let tracker = SectionTracker::new(640, 64, 1);
        assert!(tracker.is_page_final());
        assert_eq!(tracker.total, 10);
    }

    #[test]
    fn test_abort_reset_requirements() {
        let mut ctx = UpdateContext::new();
        ctx.goto_state(UpdateState::Identified);
        ctx.device_touched = true;
        assert!(!ctx.needs_abort_reset());

        ctx.iap_entered = true;
        assert!(ctx.needs_abort_reset());
        ctx.goto_state(UpdateState::Writing);
        assert!(ctx.needs_abort_reset());
        ctx.goto_state(UpdateState::Finalizing);
        assert!(!ctx.needs_abort_reset());
        assert!(!UpdateState::Finalizing.is_terminal());
        assert!(UpdateState::Aborted.is_terminal());
    }

    #[test]
    fn test_eeprom_state_modes() {
        assert!(!EepromState::EepromEnabled.in_long_tx());
        assert!(EepromState::LongTxMode.in_long_tx());
        assert!(!EepromState::LongTxMode.in_eeprom_iap());
        assert!(EepromState::Writing.in_eeprom_iap());
        // Both modes are left before the checksum is polled.
        assert!(!EepromState::ChecksumPoll.in_eeprom_iap());
        assert!(!EepromState::ChecksumPoll.in_long_tx());
    }

    #[test]
    fn test_goto_state() {
        let mut ctx = UpdateContext::new();
        assert_eq!(ctx.state, UpdateState::Idle);
        ctx.goto_state(UpdateState::Identified);
        assert_eq!(ctx.state, UpdateState::Identified);
        assert_eq!(ctx.state.to_string(), "IDENTIFIED");
    }
}
