//! Shutter state object (`SPEC_FULL.md` §4.C.1.FULL).
//!
//! Wraps a [`DigitalIoLine`] in a [`RateLimiter`] ticking at the 100 ms
//! shutter interval (`limits::SHUTTER_RATE_LIMIT`). The public surface is
//! `open_shutter`/`close_shutter`-shaped (un-inverted), mapped onto the
//! line's `activate`/`deactivate` with the inverted sense the original
//! wires at the hardware level: closed is the line's "activated" rest
//! state, open is "deactivated".

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::limits::SHUTTER_RATE_LIMIT;
use crate::model::ShutterState;
use crate::rate_limit::RateLimiter;
use crate::transport::digital_io::DigitalIo;

use super::digital_io_line::DigitalIoLine;

/// The beam shutter.
pub struct Shutter {
    limiter: RateLimiter<DigitalIoLine>,
}

impl Shutter {
    /// Open the shutter's digital line and run its self-test.
    pub async fn open(bus: Arc<Mutex<dyn DigitalIo>>, port: &str, invert_logic: bool) -> Result<Self> {
        let line = DigitalIoLine::open(bus, port, invert_logic).await?;
        Ok(Self {
            limiter: RateLimiter::new(line, SHUTTER_RATE_LIMIT),
        })
    }

    /// Current shutter state.
    pub fn state(&self) -> ShutterState {
        if self.limiter.inner().is_activated() {
            ShutterState::Closed
        } else {
            ShutterState::Open
        }
    }

    /// Open the shutter. Idempotent: a no-op if already open.
    pub async fn open_shutter(&mut self) -> Result<()> {
        if self.state() == ShutterState::Open {
            return Ok(());
        }
        self.limiter.actuate(|line| line.deactivate()).await
    }

    /// Close the shutter. Idempotent: a no-op if already closed.
    pub async fn close_shutter(&mut self) -> Result<()> {
        if self.state() == ShutterState::Closed {
            return Ok(());
        }
        self.limiter.actuate(|line| line.activate()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::digital_io::MockDigitalIo;

    #[tokio::test]
    async fn opens_and_closes() {
        let bus: Arc<Mutex<dyn DigitalIo>> = Arc::new(Mutex::new(MockDigitalIo::new()));
        let mut shutter = Shutter::open(bus, "FIO0", false).await.unwrap();
        assert_eq!(shutter.state(), ShutterState::Open);
        shutter.close_shutter().await.unwrap();
        assert_eq!(shutter.state(), ShutterState::Closed);
        shutter.open_shutter().await.unwrap();
        assert_eq!(shutter.state(), ShutterState::Open);
    }

    #[tokio::test]
    async fn repeated_open_is_idempotent_and_does_not_error() {
        let bus: Arc<Mutex<dyn DigitalIo>> = Arc::new(Mutex::new(MockDigitalIo::new()));
        let mut shutter = Shutter::open(bus, "FIO0", false).await.unwrap();
        shutter.open_shutter().await.unwrap();
        shutter.open_shutter().await.unwrap();
        assert_eq!(shutter.state(), ShutterState::Open);
    }
}
