//! Centralized error type for the control plane.
//!
//! Every failure surfaced by a transport, device object, the safety layer,
//! or persistence collapses into one of the eight kinds below. Transport
//! failures are mapped at the adapter boundary (`transport::*`); everything
//! above that boundary works with `PandoraError` directly, using `?` to
//! propagate.

use thiserror::Error;

/// Convenience alias for results using the crate's error type.
pub type Result<T> = std::result::Result<T, PandoraError>;

/// The eight failure kinds a Pandora Box operation can surface.
#[derive(Error, Debug)]
pub enum PandoraError {
    /// A transport call did not complete within its configured window.
    #[error("transport timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Socket- or serial-level I/O failure, after the one-shot reconnect
    /// already failed.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Framing or status-byte decode produced something the protocol does
    /// not define.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The device accepted the frame but rejected the command.
    #[error("device rejected command: {0}")]
    DeviceRejected(String),

    /// A safety-interlock precondition failed; caller error, no hardware
    /// side effect occurred.
    #[error("safety violation: {0}")]
    SafetyViolation(String),

    /// A device's power-on self-test, run at construction, failed.
    #[error("device failed power-on self-test: {0}")]
    NotPoweredOn(String),

    /// A sample's magnitude exceeded the overflow sentinel.
    #[error("sample overflow: |mean| exceeded {sentinel:e}")]
    RangeOverflow {
        /// The configured overflow sentinel that was exceeded.
        sentinel: f64,
    },

    /// An internal invariant was violated; considered unrecoverable.
    #[error("internal state invariant violated: {0}")]
    StateInvariant(String),
}

impl PandoraError {
    /// Process exit code convention used by the CLI: distinct non-zero
    /// codes for safety violations vs. transport/hardware failures so
    /// calling scripts can tell operator error from equipment failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            PandoraError::SafetyViolation(_) => 2,
            PandoraError::Timeout(_) | PandoraError::TransportError(_) => 3,
            PandoraError::ProtocolError(_) | PandoraError::DeviceRejected(_) => 4,
            PandoraError::NotPoweredOn(_) => 5,
            PandoraError::RangeOverflow { .. } => 6,
            PandoraError::StateInvariant(_) => 7,
        }
    }
}

impl From<std::io::Error> for PandoraError {
    fn from(err: std::io::Error) -> Self {
        PandoraError::TransportError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_kind() {
        let codes = [
            PandoraError::Timeout(std::time::Duration::from_secs(1)).exit_code(),
            PandoraError::TransportError("x".into()).exit_code(),
            PandoraError::ProtocolError("x".into()).exit_code(),
            PandoraError::DeviceRejected("x".into()).exit_code(),
            PandoraError::SafetyViolation("x".into()).exit_code(),
            PandoraError::NotPoweredOn("x".into()).exit_code(),
            PandoraError::RangeOverflow { sentinel: 1e36 }.exit_code(),
            PandoraError::StateInvariant("x".into()).exit_code(),
        ];
        assert!(codes.iter().all(|c| *c != 0));
    }

    #[test]
    fn io_error_maps_to_transport_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: PandoraError = io.into();
        assert!(matches!(err, PandoraError::TransportError(_)));
    }
}
