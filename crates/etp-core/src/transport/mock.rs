//! Mock transport simulating a touchpad register file.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::traits::{IapTransport, InterfaceKind, TransportError, split_command};

/// Mock transport for unit testing protocol logic.
///
/// Reads return queued values first, then the register file, then 0.
/// Writes are logged and stored into the register file, so a write followed
/// by a read of the same register reads the written value back.
pub struct MockTransport {
    interface: InterfaceKind,
    registers: Mutex<HashMap<u16, u16>>,
    /// Values returned (in order) before falling back to the register file.
    read_queue: Mutex<HashMap<u16, VecDeque<u16>>>,
    /// Registers whose writes are accepted but not stored.
    write_only: Mutex<Vec<u16>>,
    /// Captured register writes as (register, value).
    write_log: Mutex<Vec<(u16, u16)>>,
    /// Captured register reads.
    read_log: Mutex<Vec<u16>>,
    /// Captured data blocks.
    block_log: Mutex<Vec<Vec<u8>>>,
    /// Number of upcoming block writes that fail at the transport level.
    block_failures: Mutex<usize>,
    /// Number of upcoming writes per register that fail at the transport level.
    write_failures: Mutex<HashMap<u16, usize>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_interface(InterfaceKind::Hid)
    }

    pub fn with_interface(interface: InterfaceKind) -> Self {
        Self {
            interface,
            registers: Mutex::new(HashMap::new()),
            read_queue: Mutex::new(HashMap::new()),
            write_only: Mutex::new(Vec::new()),
            write_log: Mutex::new(Vec::new()),
            read_log: Mutex::new(Vec::new()),
            block_log: Mutex::new(Vec::new()),
            block_failures: Mutex::new(0),
            write_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Set the value a register reads as.
    pub fn set_register(&self, reg: u16, value: u16) {
        self.registers.lock().unwrap().insert(reg, value);
    }

    /// Queue a one-shot read value for a register.
    pub fn queue_read(&self, reg: u16, value: u16) {
        self.read_queue
            .lock()
            .unwrap()
            .entry(reg)
            .or_default()
            .push_back(value);
    }

    /// Accept writes to `reg` without changing what it reads as.
    pub fn set_write_only(&self, reg: u16) {
        self.write_only.lock().unwrap().push(reg);
    }

    /// Make the next `count` block writes fail.
    pub fn fail_next_blocks(&self, count: usize) {
        *self.block_failures.lock().unwrap() = count;
    }

    /// Make the next `count` writes to `reg` fail.
    pub fn fail_next_writes(&self, reg: u16, count: usize) {
        self.write_failures.lock().unwrap().insert(reg, count);
    }

    /// Get all captured register writes.
    pub fn get_writes(&self) -> Vec<(u16, u16)> {
        self.write_log.lock().unwrap().clone()
    }

    /// Get captured writes to one register.
    pub fn writes_to(&self, reg: u16) -> Vec<u16> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Get all captured register reads.
    pub fn get_reads(&self) -> Vec<u16> {
        self.read_log.lock().unwrap().clone()
    }

    /// Get all captured data blocks.
    pub fn get_blocks(&self) -> Vec<Vec<u8>> {
        self.block_log.lock().unwrap().clone()
    }

    /// Clear captured traffic.
    pub fn clear_logs(&self) {
        self.write_log.lock().unwrap().clear();
        self.read_log.lock().unwrap().clear();
        self.block_log.lock().unwrap().clear();
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl IapTransport for MockTransport {
    fn interface(&self) -> InterfaceKind {
        self.interface
    }

    fn send(&self, command: &[u8]) -> Result<(), TransportError> {
        let (reg, value) = split_command(command)?;
        let value = value
            .map(u16::from_le_bytes)
            .ok_or_else(|| TransportError::MalformedCommand("write without value".into()))?;

        if let Some(remaining) = self.write_failures.lock().unwrap().get_mut(&reg)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(TransportError::WriteFailed(format!(
                "injected failure on 0x{reg:04X}"
            )));
        }

        self.write_log.lock().unwrap().push((reg, value));
        if !self.write_only.lock().unwrap().contains(&reg) {
            self.registers.lock().unwrap().insert(reg, value);
        }
        Ok(())
    }

    fn send_receive(&self, command: &[u8], reply_len: usize) -> Result<Vec<u8>, TransportError> {
        let (reg, _) = split_command(command)?;
        self.read_log.lock().unwrap().push(reg);

        let queued = self
            .read_queue
            .lock()
            .unwrap()
            .get_mut(&reg)
            .and_then(|q| q.pop_front());
        let value = queued
            .or_else(|| self.registers.lock().unwrap().get(&reg).copied())
            .unwrap_or(0);

        let mut reply = value.to_le_bytes().to_vec();
        reply.resize(reply_len, 0);
        Ok(reply)
    }

    fn write_block(&self, block: &[u8]) -> Result<(), TransportError> {
        let mut failures = self.block_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(TransportError::WriteFailed("injected block failure".into()));
        }
        self.block_log.lock().unwrap().push(block.to_vec());
        Ok(())
    }
}
