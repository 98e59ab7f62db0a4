//! SCPI-over-TCP adapter used by the electrometers (`spec.md` §4.A, §6).
//!
//! The original (`original_source/pandora/controller/keysight.py`) speaks
//! SCPI over a raw TCP socket to the instrument's HiSLIP port
//! (`TCPIP::{ip}::hislip0,4880::INSTR`), checking port reachability before
//! connecting. This adapter reproduces that raw-socket dialect directly
//! rather than binding a VISA library, matching `spec.md` §4.A's "SCPI
//! adapter (write-line, query-line, query-ascii-vector)" surface. Grounded
//! in shape on the teacher's `instruments_v2::scpi_v3::VisaResource` trait.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{PandoraError, Result};

/// HiSLIP port Keysight B2980-series electrometers listen on.
pub const HISLIP_PORT: u16 = 4880;

/// SCPI transport: write a command line, query and read a line, or query
/// and parse a comma-separated ASCII vector.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Write a command line with no expected reply.
    async fn write_line(&mut self, line: &str) -> Result<()>;
    /// Write a command line and read back one reply line.
    async fn query_line(&mut self, line: &str) -> Result<String>;
    /// Write a command line and parse the reply as a comma-separated
    /// vector of `f64`.
    async fn query_ascii_vector(&mut self, line: &str) -> Result<Vec<f64>> {
        let reply = self.query_line(line).await?;
        reply
            .trim()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|e| PandoraError::ProtocolError(format!("bad ascii vector: {e}")))
            })
            .collect()
    }
}

/// Real TCP-socket SCPI transport.
pub struct TcpScpi {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TcpScpi {
    /// Connect to `ip:port`, checking reachability first (matching the
    /// original's pre-flight TCP check before issuing any SCPI command).
    pub async fn connect(ip: &str, port: u16) -> Result<Self> {
        let stream = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            TcpStream::connect((ip, port)),
        )
        .await
        .map_err(|_| PandoraError::Timeout(std::time::Duration::from_secs(3)))?
        .map_err(|e| PandoraError::TransportError(e.to_string()))?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }
}

#[async_trait]
impl ScpiTransport for TcpScpi {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut frame = line.as_bytes().to_vec();
        frame.push(b'\n');
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| PandoraError::TransportError(e.to_string()))
    }

    async fn query_line(&mut self, line: &str) -> Result<String> {
        self.write_line(line).await?;
        let mut reply = String::new();
        self.reader
            .read_line(&mut reply)
            .await
            .map_err(|e| PandoraError::TransportError(e.to_string()))?;
        Ok(reply.trim_end().to_string())
    }
}

/// In-memory mock SCPI transport, scripted with a `command -> reply` map,
/// grounded on the teacher's `MockVisaResource`.
pub struct MockScpi {
    pub responses: std::collections::HashMap<String, String>,
    pub sent: Vec<String>,
}

impl MockScpi {
    /// Create a mock with the given scripted responses.
    pub fn new(responses: std::collections::HashMap<String, String>) -> Self {
        Self {
            responses,
            sent: Vec::new(),
        }
    }
}

#[async_trait]
impl ScpiTransport for MockScpi {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.sent.push(line.to_string());
        Ok(())
    }

    async fn query_line(&mut self, line: &str) -> Result<String> {
        self.sent.push(line.to_string());
        self.responses
            .get(line)
            .cloned()
            .ok_or_else(|| PandoraError::ProtocolError(format!("no scripted reply for '{line}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn query_ascii_vector_parses_csv_reply() {
        let mut responses = HashMap::new();
        responses.insert(
            ":FETC:ARR:CURR?".to_string(),
            "1.0e-9,2.0e-9,3.0e-9".to_string(),
        );
        let mut mock = MockScpi::new(responses);
        let values = mock.query_ascii_vector(":FETC:ARR:CURR?").await.unwrap();
        assert_eq!(values, vec![1.0e-9, 2.0e-9, 3.0e-9]);
    }

    #[tokio::test]
    async fn query_line_without_script_is_protocol_error() {
        let mut mock = MockScpi::new(HashMap::new());
        assert!(matches!(
            mock.query_line("*IDN?").await,
            Err(PandoraError::ProtocolError(_))
        ));
    }
}
