//! Shared digital-output abstraction underlying the shutter and every flip
//! mount (`SPEC_FULL.md` §4.C.1.FULL): a named port on a shared digital-I/O
//! bus plus an `invert_logic` flag translating a logical on/off state to a
//! physical high/low level.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{PandoraError, Result};
use crate::transport::digital_io::DigitalIo;

/// One logical on/off line on a shared digital-I/O bus.
pub struct DigitalIoLine {
    bus: Arc<Mutex<dyn DigitalIo>>,
    port: String,
    invert_logic: bool,
    activated: bool,
}

impl DigitalIoLine {
    /// Open the line and run the power-on self-test: drive the physical
    /// level low then high, reading back after each, and confirm the
    /// observed level matches what was commanded. Returns
    /// `PandoraError::NotPoweredOn` on any mismatch — the object is never
    /// constructed in a half-verified state.
    pub async fn open(bus: Arc<Mutex<dyn DigitalIo>>, port: &str, invert_logic: bool) -> Result<Self> {
        {
            let mut guard = bus.lock().await;
            guard.write_bit(port, invert_logic).await?;
            let low = guard.read_bit(port).await?;
            if low != invert_logic {
                return Err(PandoraError::NotPoweredOn(format!(
                    "port '{port}' did not read back low during self-test"
                )));
            }
            guard.write_bit(port, !invert_logic).await?;
            let high = guard.read_bit(port).await?;
            if high != !invert_logic {
                return Err(PandoraError::NotPoweredOn(format!(
                    "port '{port}' did not read back high during self-test"
                )));
            }
            guard.write_bit(port, invert_logic).await?;
        }
        Ok(Self {
            bus,
            port: port.to_string(),
            invert_logic,
            activated: false,
        })
    }

    /// Whether this line is currently (logically) activated.
    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// Drive the line to the activated physical level and cache the new
    /// logical state.
    pub async fn activate(&mut self) -> Result<()> {
        self.bus
            .lock()
            .await
            .write_bit(&self.port, !self.invert_logic)
            .await?;
        self.activated = true;
        Ok(())
    }

    /// Drive the line to the deactivated physical level and cache the new
    /// logical state.
    pub async fn deactivate(&mut self) -> Result<()> {
        self.bus
            .lock()
            .await
            .write_bit(&self.port, self.invert_logic)
            .await?;
        self.activated = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::digital_io::MockDigitalIo;

    #[tokio::test]
    async fn self_test_passes_for_healthy_port() {
        let bus: Arc<Mutex<dyn DigitalIo>> = Arc::new(Mutex::new(MockDigitalIo::new()));
        let line = DigitalIoLine::open(bus, "FIO0", false).await.unwrap();
        assert!(!line.is_activated());
    }

    #[tokio::test]
    async fn self_test_fails_for_stuck_low_port() {
        let mut mock = MockDigitalIo::new();
        mock.mark_stuck_low("FIO1");
        let bus: Arc<Mutex<dyn DigitalIo>> = Arc::new(Mutex::new(mock));
        let result = DigitalIoLine::open(bus, "FIO1", false).await;
        assert!(matches!(result, Err(PandoraError::NotPoweredOn(_))));
    }

    #[tokio::test]
    async fn activate_and_deactivate_toggle_cached_state() {
        let bus: Arc<Mutex<dyn DigitalIo>> = Arc::new(Mutex::new(MockDigitalIo::new()));
        let mut line = DigitalIoLine::open(bus, "FIO2", false).await.unwrap();
        line.activate().await.unwrap();
        assert!(line.is_activated());
        line.deactivate().await.unwrap();
        assert!(!line.is_activated());
    }

    #[tokio::test]
    async fn invert_logic_self_test_passes_with_inverted_sense() {
        let bus: Arc<Mutex<dyn DigitalIo>> = Arc::new(Mutex::new(MockDigitalIo::new()));
        let line = DigitalIoLine::open(bus, "FIO3", true).await.unwrap();
        assert!(!line.is_activated());
    }
}
