use super::RegisterClient;
use crate::error::FieldbusError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// In-memory register bank for testing without a controller
#[derive(Default)]
pub struct MockRegisterClient {
    registers: Mutex<HashMap<u16, u16>>,
    writes: Mutex<Vec<(u16, u16)>>,
    offline: AtomicBool,
}

impl MockRegisterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the device were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn register(&self, address: u16) -> Option<u16> {
        self.registers.lock().get(&address).copied()
    }

    /// Every accepted write, oldest first
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.writes.lock().clone()
    }

    fn ensure_online(&self) -> Result<(), FieldbusError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(FieldbusError::NotConnected {
                address: "mock".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RegisterClient for MockRegisterClient {
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, FieldbusError> {
        self.ensure_online()?;
        let registers = self.registers.lock();
        Ok((0..count)
            .map(|offset| {
                registers
                    .get(&start.wrapping_add(offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<(), FieldbusError> {
        self.ensure_online()?;
        debug!("Mock register {} <- {}", address, value);
        self.registers.lock().insert(address, value);
        self.writes.lock().push((address, value));
        Ok(())
    }

    fn describe(&self) -> String {
        "mock registers".to_string()
    }
}
