//! Flip-mount state object (`SPEC_FULL.md` §4.C.1.FULL).
//!
//! Identical shape to [`super::shutter::Shutter`] but ticking at the 500 ms
//! flip-mount interval and with a direct (non-inverted at the logical
//! level) on/off mapping: `On` is the line's "activated" state.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::limits::FLIP_MOUNT_RATE_LIMIT;
use crate::model::FlipMountState;
use crate::rate_limit::RateLimiter;
use crate::transport::digital_io::DigitalIo;

use super::digital_io_line::DigitalIoLine;

/// One flip mount (e.g. a neutral-density filter or the order-blocking
/// filter engaged ahead of the monochromator).
pub struct FlipMount {
    limiter: RateLimiter<DigitalIoLine>,
}

impl FlipMount {
    /// Open the flip mount's digital line and run its self-test.
    pub async fn open(bus: Arc<Mutex<dyn DigitalIo>>, port: &str, invert_logic: bool) -> Result<Self> {
        let line = DigitalIoLine::open(bus, port, invert_logic).await?;
        Ok(Self {
            limiter: RateLimiter::new(line, FLIP_MOUNT_RATE_LIMIT),
        })
    }

    /// Current flip-mount state.
    pub fn state(&self) -> FlipMountState {
        if self.limiter.inner().is_activated() {
            FlipMountState::On
        } else {
            FlipMountState::Off
        }
    }

    /// Engage the mount (filter in beam). Idempotent: a no-op if already on.
    pub async fn activate(&mut self) -> Result<()> {
        if self.state() == FlipMountState::On {
            return Ok(());
        }
        self.limiter.actuate(|line| line.activate()).await
    }

    /// Disengage the mount (filter out of beam). Idempotent: a no-op if
    /// already off.
    pub async fn deactivate(&mut self) -> Result<()> {
        if self.state() == FlipMountState::Off {
            return Ok(());
        }
        self.limiter.actuate(|line| line.deactivate()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::digital_io::MockDigitalIo;

    #[tokio::test]
    async fn activates_and_deactivates() {
        let bus: Arc<Mutex<dyn DigitalIo>> = Arc::new(Mutex::new(MockDigitalIo::new()));
        let mut mount = FlipMount::open(bus, "FIO4", false).await.unwrap();
        assert_eq!(mount.state(), FlipMountState::Off);
        mount.activate().await.unwrap();
        assert_eq!(mount.state(), FlipMountState::On);
        mount.deactivate().await.unwrap();
        assert_eq!(mount.state(), FlipMountState::Off);
    }

    #[tokio::test]
    async fn repeated_deactivate_is_idempotent() {
        let bus: Arc<Mutex<dyn DigitalIo>> = Arc::new(Mutex::new(MockDigitalIo::new()));
        let mut mount = FlipMount::open(bus, "FIO4", false).await.unwrap();
        mount.deactivate().await.unwrap();
        mount.deactivate().await.unwrap();
        assert_eq!(mount.state(), FlipMountState::Off);
    }
}
