//! Byte-serial adapter used by the monochromator and the telescope mount
//! (`spec.md` §4.A).
//!
//! Grounded on the teacher's `hardware::serial_adapter_v4` builder pattern
//! and `hardware::esp300`'s async serial I/O shape, rebuilt against
//! `tokio-serial` (the crate actually declared in this crate's
//! dependencies) rather than the teacher's `serial2_tokio`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

use crate::error::{PandoraError, Result};

/// Minimal byte-serial transport: open, write, read-exact-n,
/// read-until-delimiter, close.
#[async_trait]
pub trait ByteSerial: Send + Sync {
    /// Write raw bytes to the wire.
    async fn write_bytes(&mut self, buf: &[u8]) -> Result<()>;
    /// Read exactly `n` bytes.
    async fn read_exact_n(&mut self, n: usize) -> Result<Vec<u8>>;
    /// Read bytes until (and including) `delim`.
    async fn read_until(&mut self, delim: u8) -> Result<Vec<u8>>;
    /// Close the transport.
    async fn close(&mut self) -> Result<()>;
}

/// Real serial-port transport. The monochromator intentionally opens a
/// fresh `SerialAdapter` per operation rather than holding the port open
/// across a long completion wait (`spec.md` §5) — that per-operation
/// open/close is the caller's responsibility; this type just wraps one
/// open session.
pub struct SerialAdapter {
    port: tokio_serial::SerialStream,
}

impl SerialAdapter {
    /// Open `port_name` at `baud_rate`.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = tokio_serial::new(port_name, baud_rate)
            .timeout(Duration::from_secs(1))
            .open_native_async()
            .map_err(|e| PandoraError::TransportError(e.to_string()))?;
        Ok(Self { port })
    }
}

#[async_trait]
impl ByteSerial for SerialAdapter {
    async fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.port
            .write_all(buf)
            .await
            .map_err(|e| PandoraError::TransportError(e.to_string()))
    }

    async fn read_exact_n(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.port
            .read_exact(&mut buf)
            .await
            .map_err(|e| PandoraError::TransportError(e.to_string()))?;
        Ok(buf)
    }

    async fn read_until(&mut self, delim: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.port
                .read_exact(&mut byte)
                .await
                .map_err(|e| PandoraError::TransportError(e.to_string()))?;
            buf.push(byte[0]);
            if byte[0] == delim {
                return Ok(buf);
            }
            if buf.len() > 4096 {
                return Err(PandoraError::ProtocolError(
                    "read_until: delimiter not found within 4096 bytes".into(),
                ));
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory mock transport for tests, scripted with a queue of expected
/// writes and canned reads. Grounded on the teacher's
/// `MockSerialPort`/`MockDeviceHarness` pattern (`hardware::mod`).
pub struct MockByteSerial {
    pending_reads: std::collections::VecDeque<u8>,
    pub written: Vec<u8>,
}

impl MockByteSerial {
    /// Create a mock whose reads will be served from `script`, in order.
    pub fn new(script: Vec<u8>) -> Self {
        Self {
            pending_reads: script.into(),
            written: Vec::new(),
        }
    }

    /// Append more bytes to the read queue.
    pub fn push_response(&mut self, bytes: &[u8]) {
        self.pending_reads.extend(bytes.iter().copied());
    }
}

#[async_trait]
impl ByteSerial for MockByteSerial {
    async fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.written.extend_from_slice(buf);
        Ok(())
    }

    async fn read_exact_n(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.pending_reads.len() < n {
            return Err(PandoraError::Timeout(Duration::from_secs(1)));
        }
        Ok((0..n).map(|_| self.pending_reads.pop_front().unwrap()).collect())
    }

    async fn read_until(&mut self, delim: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        while let Some(b) = self.pending_reads.pop_front() {
            buf.push(b);
            if b == delim {
                return Ok(buf);
            }
        }
        Err(PandoraError::Timeout(Duration::from_secs(1)))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_serial_round_trips_scripted_reads() {
        let mut mock = MockByteSerial::new(vec![0x18]);
        mock.write_bytes(&[0xFF, 0xFF, 0xFF]).await.unwrap();
        let reply = mock.read_exact_n(1).await.unwrap();
        assert_eq!(reply, vec![0x18]);
        assert_eq!(mock.written, vec![0xFF, 0xFF, 0xFF]);
    }

    #[tokio::test]
    async fn mock_serial_read_exact_n_times_out_when_starved() {
        let mut mock = MockByteSerial::new(vec![]);
        assert!(matches!(
            mock.read_exact_n(2).await,
            Err(PandoraError::Timeout(_))
        ));
    }
}
