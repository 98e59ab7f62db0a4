//! Safety-interlock predicates (`SPEC_FULL.md` §4.D.FULL).
//!
//! Every function here is pure: a state snapshot and a limits value in,
//! `Result<(), PandoraError>` out, no transport, no device object. Grounded
//! on `original_source/pandora/pandora_controller.py`'s `set_wavelength`
//! order-block coupling and `original_source/pandora/controller/ioptron.py`'s
//! inline altitude/azimuth/park checks, relocated here so the interlocks are
//! unit-testable without a mock serial port.

use crate::config::SafetyLimits;
use crate::error::{PandoraError, Result};
use crate::model::Wavelength;

/// Whether the order-blocking flip mount must be engaged for `wavelength`,
/// given the monochromator's configured crossover point. Strict: exactly
/// at the crossover the filter is not yet required.
pub fn order_block_required(wavelength: Wavelength, crossover_nm: f64) -> bool {
    wavelength.0 > crossover_nm
}

/// Validate a `goto_altaz` request against park state and the configured
/// Alt/Az envelope. A parked mount refuses all motion; azimuth is checked
/// against a configured `[az_lower, az_upper]` window rather than a fixed
/// wrap, matching the original's site-specific horizon mask.
pub fn check_goto_altaz(is_parked: bool, alt_deg: f64, az_deg: f64, limits: &SafetyLimits) -> Result<()> {
    if is_parked {
        return Err(PandoraError::SafetyViolation(
            "mount is parked; unpark before commanding a slew".into(),
        ));
    }
    if alt_deg < limits.alt_limit_default {
        return Err(PandoraError::SafetyViolation(format!(
            "requested altitude {alt_deg:.3} is below the configured limit {:.3}",
            limits.alt_limit_default
        )));
    }
    if !(limits.az_lower..=limits.az_upper).contains(&az_deg) {
        return Err(PandoraError::SafetyViolation(format!(
            "requested azimuth {az_deg:.3} is outside the configured window [{:.3}, {:.3}]",
            limits.az_lower, limits.az_upper
        )));
    }
    Ok(())
}

/// Whether an overflowing sample should trigger an autorange-and-retry.
/// `already_retried` enforces the one-retry bound (`spec.md` §4.D, §4.E):
/// a second overflow after the retry is a hard error, not another retry.
pub fn should_retry_overflow(overflow: bool, already_retried: bool) -> bool {
    overflow && !already_retried
}

/// An overflow surviving the one retry is not a hard failure (`spec.md`
/// §4.D): the sample is persisted unchanged and a warning logged, rather
/// than the exposure being discarded.
pub fn log_overflow_exhausted(overflow: bool, already_retried: bool, sentinel: f64) {
    if overflow && already_retried {
        tracing::warn!(sentinel, "electrometer overflow persisted after one autorange retry; persisting sample unchanged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SafetyLimits {
        SafetyLimits {
            alt_limit_default: 15.0,
            az_lower: 60.0,
            az_upper: 300.0,
        }
    }

    #[test]
    fn order_block_engages_strictly_above_crossover() {
        assert!(!order_block_required(Wavelength(700.0), 700.0));
        assert!(order_block_required(Wavelength(700.01), 700.0));
        assert!(!order_block_required(Wavelength(699.99), 700.0));
    }

    #[test]
    fn goto_altaz_rejects_parked_mount() {
        assert!(matches!(
            check_goto_altaz(true, 45.0, 180.0, &limits()),
            Err(PandoraError::SafetyViolation(_))
        ));
    }

    #[test]
    fn goto_altaz_rejects_below_altitude_floor() {
        assert!(matches!(
            check_goto_altaz(false, 10.0, 180.0, &limits()),
            Err(PandoraError::SafetyViolation(_))
        ));
    }

    #[test]
    fn goto_altaz_rejects_azimuth_outside_window() {
        assert!(matches!(
            check_goto_altaz(false, 45.0, 30.0, &limits()),
            Err(PandoraError::SafetyViolation(_))
        ));
    }

    #[test]
    fn goto_altaz_accepts_unparked_within_window() {
        assert!(check_goto_altaz(false, 45.0, 180.0, &limits()).is_ok());
    }

    #[test]
    fn overflow_retries_exactly_once() {
        assert!(should_retry_overflow(true, false));
        assert!(!should_retry_overflow(true, true));
        assert!(!should_retry_overflow(false, false));
    }

    #[test]
    fn overflow_exhausted_after_retry_does_not_panic_or_error() {
        log_overflow_exhausted(true, false, 1e36);
        log_overflow_exhausted(true, true, 1e36);
        log_overflow_exhausted(false, false, 1e36);
    }
}
