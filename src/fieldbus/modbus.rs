//! Modbus TCP client.
//!
//! ```text
//!  Transaction ID | Protocol ID | Length  | Unit ID | Function | Data
//!  2 bytes        | 2 bytes (0) | 2 bytes | 1 byte  | 1 byte   | ...
//! ```
//!
//! Length counts the unit id plus the PDU. Only function 0x03 (read holding
//! registers) and 0x06 (write single register) are used.

use super::RegisterClient;
use crate::config::FieldbusConfig;
use crate::error::FieldbusError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Largest register count a single read may request
pub const MAX_READ_COUNT: u16 = 125;

const MBAP_HEADER_LEN: usize = 7;
const EXCEPTION_FLAG: u8 = 0x80;

/// Frame a PDU with the MBAP header
pub fn build_frame(transaction: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    bytes.extend(transaction.to_be_bytes());
    bytes.extend(0u16.to_be_bytes());
    bytes.extend(((pdu.len() + 1) as u16).to_be_bytes());
    bytes.push(unit);
    bytes.extend_from_slice(pdu);
    bytes
}

pub fn read_request_pdu(start: u16, count: u16) -> Vec<u8> {
    let mut pdu = vec![READ_HOLDING_REGISTERS];
    pdu.extend(start.to_be_bytes());
    pdu.extend(count.to_be_bytes());
    pdu
}

pub fn write_request_pdu(address: u16, value: u16) -> Vec<u8> {
    let mut pdu = vec![WRITE_SINGLE_REGISTER];
    pdu.extend(address.to_be_bytes());
    pdu.extend(value.to_be_bytes());
    pdu
}

/// Check a response PDU for the expected function and surface device exceptions
pub fn check_response(function: u8, pdu: &[u8]) -> Result<(), FieldbusError> {
    match pdu.first() {
        None => Err(FieldbusError::Protocol {
            details: "empty response".to_string(),
        }),
        Some(&code) if code == function | EXCEPTION_FLAG => Err(FieldbusError::Exception {
            function,
            code: pdu.get(1).copied().unwrap_or(0),
        }),
        Some(&code) if code != function => Err(FieldbusError::Protocol {
            details: format!(
                "expected function 0x{:02X}, got 0x{:02X}",
                function, code
            ),
        }),
        Some(_) => Ok(()),
    }
}

/// Decode the register values of a 0x03 response PDU
pub fn parse_read_response(pdu: &[u8], count: u16) -> Result<Vec<u16>, FieldbusError> {
    check_response(READ_HOLDING_REGISTERS, pdu)?;
    let byte_count = *pdu.get(1).ok_or_else(|| FieldbusError::Protocol {
        details: "missing byte count".to_string(),
    })? as usize;
    let data = &pdu[2..];
    if byte_count != count as usize * 2 || data.len() != byte_count {
        return Err(FieldbusError::Protocol {
            details: format!(
                "expected {} register bytes, got {} (declared {})",
                count as usize * 2,
                data.len(),
                byte_count
            ),
        });
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

pub struct ModbusTcpClient {
    config: FieldbusConfig,
    stream: Mutex<Option<TcpStream>>,
    transaction: AtomicU16,
}

impl ModbusTcpClient {
    pub fn new(config: FieldbusConfig) -> Self {
        Self {
            config,
            stream: Mutex::new(None),
            transaction: AtomicU16::new(0),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn timed_out(&self) -> FieldbusError {
        FieldbusError::Timeout {
            address: self.config.address.clone(),
        }
    }

    async fn connect(&self) -> Result<TcpStream, FieldbusError> {
        let stream = timeout(self.timeout(), TcpStream::connect(&self.config.address))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| FieldbusError::Connection {
                address: self.config.address.clone(),
                details: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        info!("Connected to Modbus device at {}", self.config.address);
        Ok(stream)
    }

    /// Establish the connection up front instead of on first use
    pub async fn ensure_connected(&self) -> Result<(), FieldbusError> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        if self.stream.lock().await.take().is_some() {
            debug!("Disconnected from {}", self.config.address);
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Send one request PDU and return the response PDU.
    ///
    /// Any transport failure drops the connection; the next call reconnects.
    async fn transact(&self, pdu: &[u8]) -> Result<Vec<u8>, FieldbusError> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let stream = guard.as_mut().ok_or_else(|| FieldbusError::NotConnected {
            address: self.config.address.clone(),
        })?;

        let transaction = self.transaction.fetch_add(1, Ordering::Relaxed);
        let frame = build_frame(transaction, self.config.unit_id, pdu);

        let result = timeout(self.timeout(), exchange(stream, &frame, transaction)).await;
        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                warn!("Modbus exchange with {} failed: {}", self.config.address, e);
                *guard = None;
                Err(e)
            }
            Err(_) => {
                warn!("Modbus exchange with {} timed out", self.config.address);
                *guard = None;
                Err(self.timed_out())
            }
        }
    }
}

async fn exchange(
    stream: &mut TcpStream,
    frame: &[u8],
    transaction: u16,
) -> Result<Vec<u8>, FieldbusError> {
    stream.write_all(frame).await?;

    let mut header = [0u8; MBAP_HEADER_LEN];
    stream.read_exact(&mut header).await?;

    let received = u16::from_be_bytes([header[0], header[1]]);
    if received != transaction {
        return Err(FieldbusError::Protocol {
            details: format!(
                "transaction id mismatch: sent {}, received {}",
                transaction, received
            ),
        });
    }
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    if length < 2 {
        return Err(FieldbusError::Protocol {
            details: format!("response length {} too short", length),
        });
    }

    let mut pdu = vec![0u8; length - 1];
    stream.read_exact(&mut pdu).await?;
    Ok(pdu)
}

#[async_trait]
impl RegisterClient for ModbusTcpClient {
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, FieldbusError> {
        if count == 0 || count > MAX_READ_COUNT {
            return Err(FieldbusError::Protocol {
                details: format!("register count {} outside 1..={}", count, MAX_READ_COUNT),
            });
        }
        let response = self.transact(&read_request_pdu(start, count)).await?;
        parse_read_response(&response, count)
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<(), FieldbusError> {
        let request = write_request_pdu(address, value);
        let response = self.transact(&request).await?;
        check_response(WRITE_SINGLE_REGISTER, &response)?;
        if response != request {
            return Err(FieldbusError::Protocol {
                details: "write echo does not match request".to_string(),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("modbus://{} unit {}", self.config.address, self.config.unit_id)
    }
}
