//! LabJack-style digital-I/O adapter shared by the shutter and all flip
//! mounts (`spec.md` §4.A, §5). Grounded on
//! `original_source/states/labjackHandler.py`'s `LabJack` wrapper.
//!
//! Single owner, held by the controller; each device state object borrows
//! it for the duration of one operation (`spec.md` §9), enforced here by
//! the caller always taking `&mut` through an `Arc<tokio::sync::Mutex<_>>`
//! rather than this adapter attempting its own internal locking.

use async_trait::async_trait;

use crate::error::Result;

/// Digital I/O bus: write/read a named port, read a raw register.
#[async_trait]
pub trait DigitalIo: Send + Sync {
    /// Write a boolean level to a named port.
    async fn write_bit(&mut self, port: &str, high: bool) -> Result<()>;
    /// Read the boolean level of a named port.
    async fn read_bit(&mut self, port: &str) -> Result<bool>;
    /// Read a raw register value (diagnostic use).
    async fn read_register(&mut self, address: u32) -> Result<u32>;
}

/// Real LabJack transport. The actual vendor SDK binding (`labjack.ljm` in
/// the original) is an external driver per `spec.md` §1; this adapter's
/// `write_bit`/`read_bit` are the narrow surface the device objects
/// consume, implemented here over a conceptual named-port table until a
/// concrete SDK binding is wired in.
pub struct LabjackAdapter {
    ip: String,
    ports: std::collections::HashMap<String, bool>,
}

impl LabjackAdapter {
    /// Connect (logically) to the LabJack at `ip`.
    pub fn connect(ip: &str) -> Result<Self> {
        Ok(Self {
            ip: ip.to_string(),
            ports: std::collections::HashMap::new(),
        })
    }

    /// The bus's configured IP address.
    pub fn ip(&self) -> &str {
        &self.ip
    }
}

#[async_trait]
impl DigitalIo for LabjackAdapter {
    async fn write_bit(&mut self, port: &str, high: bool) -> Result<()> {
        self.ports.insert(port.to_string(), high);
        Ok(())
    }

    async fn read_bit(&mut self, port: &str) -> Result<bool> {
        Ok(*self.ports.get(port).unwrap_or(&false))
    }

    async fn read_register(&mut self, _address: u32) -> Result<u32> {
        Ok(0)
    }
}

/// In-memory mock used by device-object unit tests, able to simulate a
/// line that never reads back as commanded (to exercise the
/// `NotPoweredOn` self-test failure path).
pub struct MockDigitalIo {
    ports: std::collections::HashMap<String, bool>,
    pub stuck_low: std::collections::HashSet<String>,
}

impl MockDigitalIo {
    /// Create a mock with all ports initially low.
    pub fn new() -> Self {
        Self {
            ports: std::collections::HashMap::new(),
            stuck_low: std::collections::HashSet::new(),
        }
    }

    /// Mark a port as unresponsive: reads always return `false` regardless
    /// of what was written, simulating an unpowered line.
    pub fn mark_stuck_low(&mut self, port: &str) {
        self.stuck_low.insert(port.to_string());
    }
}

impl Default for MockDigitalIo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DigitalIo for MockDigitalIo {
    async fn write_bit(&mut self, port: &str, high: bool) -> Result<()> {
        self.ports.insert(port.to_string(), high);
        Ok(())
    }

    async fn read_bit(&mut self, port: &str) -> Result<bool> {
        if self.stuck_low.contains(port) {
            return Ok(false);
        }
        Ok(*self.ports.get(port).unwrap_or(&false))
    }

    async fn read_register(&mut self, _address: u32) -> Result<u32> {
        Ok(0)
    }
}
