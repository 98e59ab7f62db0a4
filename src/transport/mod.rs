//! Transport adapters (`spec.md` §4.A).
//!
//! Each physical transport is abstracted behind a minimal `#[async_trait]`
//! interface, in the idiom of the teacher's `hardware::capabilities`
//! (`Movable`, `Triggerable`) and `instruments_v2::scpi_v3` (`VisaResource`)
//! traits: narrow, `Send + Sync`, returning `Result<_, PandoraError>`.
//!
//! Every trait method is wrapped, at the call site in the owning device
//! object, by [`with_timeout`]; a timeout elapsing maps to
//! [`PandoraError::Timeout`]. [`reconnect_once`] implements the one-shot
//! reconnect-on-transport-error policy shared by every adapter
//! (`spec.md` §4.A, §7), grounded on the retry shape in the teacher's
//! `hardware::esp300` `send_command`/`query` helpers.

pub mod digital_io;
pub mod motion;
pub mod scpi;
pub mod serial;
pub mod spectrometer;

use std::time::Duration;

use crate::error::{PandoraError, Result};

/// Run `fut` under a deadline; map an elapsed deadline to
/// [`PandoraError::Timeout`].
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(PandoraError::Timeout(duration)),
    }
}

/// Attempt `op`; on a [`PandoraError::TransportError`], call `reconnect`
/// once and retry `op` exactly one more time before propagating.
pub async fn reconnect_once<Op, Rec, OpFut, RecFut, T>(mut op: Op, mut reconnect: Rec) -> Result<T>
where
    Op: FnMut() -> OpFut,
    Rec: FnMut() -> RecFut,
    OpFut: std::future::Future<Output = Result<T>>,
    RecFut: std::future::Future<Output = Result<()>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(PandoraError::TransportError(msg)) => {
            tracing::warn!(error = %msg, "transport error, attempting one reconnect");
            reconnect().await?;
            op().await
        }
        Err(other) => Err(other),
    }
}
