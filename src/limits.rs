//! Named constants centralized per the design note in `spec.md` §9:
//! "Overflow sentinel ... is a hardware convention; keep it as a named
//! constant and centralise the detection."

use std::time::Duration;

/// A sample magnitude beyond this is an overflow reading, not a real
/// measurement (§3 ElectrometerSample, §4.D, §4.E, §7 RangeOverflow).
pub const OVERFLOW_SENTINEL: f64 = 1e36;

/// Shutter rate limit: 10 Hz ceiling imposed by the physical solenoid
/// (§4.B).
pub const SHUTTER_RATE_LIMIT: Duration = Duration::from_millis(100);

/// Flip-mount rate limit: 2 Hz (§4.B).
pub const FLIP_MOUNT_RATE_LIMIT: Duration = Duration::from_millis(500);

/// Zaber slot resolution tolerance: a stage's current position resolves to
/// a named slot only within this distance (§3 ZaberSlot).
pub const ZABER_SLOT_TOLERANCE_MM: f64 = 0.1;

/// Settling-time margin applied on top of the published per-decade
/// settling time (§4.C.4, confirmed against `keysight.py`).
pub const SETTLING_TIME_MARGIN: f64 = 1.01;

/// Autoscale upper threshold: step up one rung when `|mean| > ratio * range`.
pub const AUTOSCALE_UP_RATIO: f64 = 0.80;

/// Autoscale lower threshold: step down one rung when `|mean| < ratio * range`.
pub const AUTOSCALE_DOWN_RATIO: f64 = 0.05;

/// Maximum autoscale iterations in current mode.
pub const AUTOSCALE_MAX_ITERS_CURRENT: u32 = 15;

/// Maximum autoscale iterations in charge mode.
pub const AUTOSCALE_MAX_ITERS_CHARGE: u32 = 10;

/// Monochromator completion byte: operation finished.
pub const MONO_COMPLETE: u8 = 0x18;

/// Monochromator in-progress byte: operation still running, keep polling.
pub const MONO_IN_PROGRESS: u8 = 0x22;

/// Telescope slew-completion poll rate.
pub const MOUNT_SLEW_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Telescope park-completion stability window.
pub const MOUNT_PARK_STABLE_WINDOW: Duration = Duration::from_millis(200);

/// Telescope park-completion angular stability threshold, in degrees.
pub const MOUNT_PARK_STABLE_DEG: f64 = 0.0005;

/// Highest valid within-day RunID sequence suffix (`YYYYMMDDNNN`, NNN in
/// 001..=999).
pub const RUN_ID_MAX_SUFFIX: u32 = 999;

/// Settling time in seconds for a given current-mode decade exponent
/// (k in range ladder `2 * 10^k`), confirmed bit-exact against
/// `original_source/pandora/controller/keysight.py`.
pub fn current_settling_time_s(decade_exponent: i8) -> Option<f64> {
    let table: &[(i8, f64)] = &[
        (-12, 16.0),
        (-11, 1.4),
        (-10, 1.4),
        (-9, 0.013),
        (-8, 0.013),
        (-7, 0.0012),
        (-6, 0.00055),
        (-5, 0.00060),
        (-4, 0.00060),
        (-3, 0.00010),
    ];
    table
        .iter()
        .find(|(k, _)| *k == decade_exponent)
        .map(|(_, s)| *s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settling_time_known_decades() {
        assert_eq!(current_settling_time_s(-12), Some(16.0));
        assert_eq!(current_settling_time_s(-3), Some(0.00010));
        assert_eq!(current_settling_time_s(0), None);
    }
}
