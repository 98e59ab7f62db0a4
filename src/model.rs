//! Core data model shared across transports, device objects, and
//! persistence (`spec.md` §3).

use serde::{Deserialize, Serialize};

/// A wavelength in nanometres. The public surface is always nm; wire
/// encodings (e.g. the monochromator's deci-angstrom units) live on the
/// owning device, not here.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Wavelength(pub f64);

impl Wavelength {
    /// Round-trip encoding used by the monochromator's wire protocol:
    /// `hi:lo = round(lambda * 10)` in Angstrom-tenths.
    pub fn to_wire_decidegstroms(self) -> i32 {
        (self.0 * 10.0).round() as i32
    }

    /// Inverse of [`Wavelength::to_wire_decidegstroms`].
    pub fn from_wire_decidegstroms(raw: i32) -> Wavelength {
        Wavelength(raw as f64 / 10.0)
    }
}

/// A discrete electrometer full-scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentRange {
    /// Current-mode range: `2 * 10^k` amps, k in -12..=-3.
    Current(i8),
    /// Charge-mode range: ladder index 0..=3 -> {2nC, 20nC, 200nC, 2uC}.
    Charge(u8),
}

impl InstrumentRange {
    const CHARGE_LADDER: [f64; 4] = [2e-9, 2e-8, 2e-7, 2e-6];

    /// Full-scale magnitude of this range, in amps or coulombs.
    pub fn magnitude(self) -> f64 {
        match self {
            InstrumentRange::Current(k) => 2.0 * 10f64.powi(k as i32),
            InstrumentRange::Charge(idx) => {
                Self::CHARGE_LADDER[idx.clamp(0, 3) as usize]
            }
        }
    }

    /// Step one rung up the ladder (less sensitive, larger full scale).
    /// Returns `None` if already at the top rung.
    pub fn step_up(self) -> Option<Self> {
        match self {
            InstrumentRange::Current(k) if k < -3 => Some(InstrumentRange::Current(k + 1)),
            InstrumentRange::Current(_) => None,
            InstrumentRange::Charge(idx) if idx < 3 => Some(InstrumentRange::Charge(idx + 1)),
            InstrumentRange::Charge(_) => None,
        }
    }

    /// Step one rung down the ladder (more sensitive, smaller full scale).
    /// Returns `None` if already at the bottom rung.
    pub fn step_down(self) -> Option<Self> {
        match self {
            InstrumentRange::Current(k) if k > -12 => Some(InstrumentRange::Current(k - 1)),
            InstrumentRange::Current(_) => None,
            InstrumentRange::Charge(idx) if idx > 0 => Some(InstrumentRange::Charge(idx - 1)),
            InstrumentRange::Charge(_) => None,
        }
    }
}

/// A single (relative-time, value) sample read from an electrometer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ElectrometerSample {
    /// Seconds since the acquisition was armed.
    pub relative_time_s: f64,
    /// Current (amps) or charge (coulombs), depending on device mode.
    pub value: f64,
}

/// Summary statistics plus overflow detection over a batch of samples.
#[derive(Debug, Clone)]
pub struct ElectrometerReadout {
    /// Individual samples, in acquisition order.
    pub samples: Vec<ElectrometerSample>,
    /// Arithmetic mean of `samples[*].value`.
    pub mean: f64,
    /// Sample standard deviation of `samples[*].value`.
    pub stddev: f64,
    /// Whether `|mean|` exceeded the overflow sentinel.
    pub overflow: bool,
}

impl ElectrometerReadout {
    /// Summarize a batch of samples, flagging overflow against the given
    /// sentinel magnitude.
    pub fn summarize(samples: Vec<ElectrometerSample>, overflow_sentinel: f64) -> Self {
        let n = samples.len().max(1) as f64;
        let mean = samples.iter().map(|s| s.value).sum::<f64>() / n;
        let variance = if samples.len() > 1 {
            samples.iter().map(|s| (s.value - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        let overflow = mean.abs() > overflow_sentinel;
        ElectrometerReadout {
            samples,
            mean,
            stddev: variance.sqrt(),
            overflow,
        }
    }
}

/// Electrometer measurement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectrometerMode {
    /// Current (amps), integrating.
    Curr,
    /// Charge (coulombs), integrating.
    Char,
    /// Voltage (volts).
    Volt,
    /// Resistance (ohms).
    Res,
}

impl ElectrometerMode {
    /// SCPI mnemonic for `SENS:FUNCtion:ON "..."`.
    pub fn scpi_mnemonic(self) -> &'static str {
        match self {
            ElectrometerMode::Curr => "CURR",
            ElectrometerMode::Char => "CHAR",
            ElectrometerMode::Volt => "VOLT",
            ElectrometerMode::Res => "RES",
        }
    }
}

/// Flip-mount commanded/observed state. Public surface only; the
/// underlying digital line's active-high/active-low sense is hidden
/// behind each mount's `invert_logic` configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipMountState {
    /// Flip mount is engaged (filter in beam).
    On,
    /// Flip mount is disengaged (filter out of beam).
    Off,
}

/// Shutter commanded/observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutterState {
    /// Shutter is open (beam passes).
    Open,
    /// Shutter is closed (beam blocked).
    Closed,
}

/// Telescope mount operating state (`spec.md` §3 MountState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountState {
    /// Stopped, not at the home position.
    StoppedNonHome,
    /// Actively tracking a target.
    Tracking,
    /// In motion toward a commanded position.
    Slewing,
    /// Auto-guiding on a target.
    AutoGuiding,
    /// Parked at the configured park position.
    Parked,
    /// Stopped at the home position.
    StoppedHome,
    /// State could not be determined.
    Unknown,
}

/// Closest-named-slot resolution for a Zaber stage (`spec.md` §3 ZaberSlot):
/// the current position resolves to the nearest named slot within
/// `tolerance_mm`, or `None` if no slot is that close.
pub fn resolve_slot(
    slots: &indexmap::IndexMap<String, f64>,
    position_mm: f64,
    tolerance_mm: f64,
) -> Option<String> {
    slots
        .iter()
        .map(|(name, pos)| (name, (pos - position_mm).abs()))
        .filter(|(_, dist)| *dist <= tolerance_mm)
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wavelength_wire_round_trip() {
        let w = Wavelength(532.4);
        let wire = w.to_wire_decidegstroms();
        let back = Wavelength::from_wire_decidegstroms(wire);
        assert!((back.0 - 532.4).abs() < 1e-9);
    }

    #[test]
    fn wavelength_round_trip_matches_round_lambda_times_ten_over_ten() {
        let w = Wavelength(500.37);
        let expected = (w.0 * 10.0).round() / 10.0;
        let back = Wavelength::from_wire_decidegstroms(w.to_wire_decidegstroms());
        assert!((back.0 - expected).abs() < 1e-9);
    }

    #[test]
    fn current_range_ladder_bounds() {
        assert_eq!(InstrumentRange::Current(-3).step_up(), None);
        assert_eq!(InstrumentRange::Current(-12).step_down(), None);
        assert_eq!(
            InstrumentRange::Current(-12).step_up(),
            Some(InstrumentRange::Current(-11))
        );
    }

    #[test]
    fn charge_range_ladder_bounds() {
        assert_eq!(InstrumentRange::Charge(3).step_up(), None);
        assert_eq!(InstrumentRange::Charge(0).step_down(), None);
        assert_eq!(InstrumentRange::Charge(0).magnitude(), 2e-9);
        assert_eq!(InstrumentRange::Charge(3).magnitude(), 2e-6);
    }

    #[test]
    fn summarize_flags_overflow() {
        let samples = vec![ElectrometerSample {
            relative_time_s: 0.0,
            value: 1e40,
        }];
        let readout = ElectrometerReadout::summarize(samples, 1e36);
        assert!(readout.overflow);
    }

    #[test]
    fn summarize_no_overflow_for_normal_reading() {
        let samples = vec![
            ElectrometerSample {
                relative_time_s: 0.0,
                value: 1e-9,
            },
            ElectrometerSample {
                relative_time_s: 0.1,
                value: 1.2e-9,
            },
        ];
        let readout = ElectrometerReadout::summarize(samples, 1e36);
        assert!(!readout.overflow);
        assert!((readout.mean - 1.1e-9).abs() < 1e-12);
    }

    #[test]
    fn slot_resolution_within_tolerance() {
        let mut slots = indexmap::IndexMap::new();
        slots.insert("HOME".to_string(), 0.0);
        slots.insert("ND1".to_string(), 25.0);
        slots.insert("ND2".to_string(), 50.0);

        assert_eq!(resolve_slot(&slots, 25.05, 0.1), Some("ND1".to_string()));
        assert_eq!(resolve_slot(&slots, 37.5, 0.1), None);
    }
}
