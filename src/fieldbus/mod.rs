//! Holding-register access to the line controller.

pub mod mock;
pub mod modbus;
pub mod signaler;

pub use mock::MockRegisterClient;
pub use modbus::ModbusTcpClient;
pub use signaler::VerdictSignaler;

use crate::error::FieldbusError;
use async_trait::async_trait;

/// Read and write 16-bit holding registers on a remote device
#[async_trait]
pub trait RegisterClient: Send + Sync {
    /// Read `count` consecutive registers starting at `start`
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, FieldbusError>;

    /// Write a single register
    async fn write_register(&self, address: u16, value: u16) -> Result<(), FieldbusError>;

    /// Cheap liveness probe: read one register at address 0
    async fn check_connection(&self) -> Result<(), FieldbusError> {
        self.read_registers(0, 1).await.map(|_| ())
    }

    /// Short label for logs
    fn describe(&self) -> String;
}
