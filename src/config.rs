//! Typed, validated configuration.
//!
//! Loaded from a TOML document via [`figment`], layered with a `PANDORA_`
//! prefixed environment override, matching the teacher's `config_v4.rs`
//! `V4Config::load`/`load_from` pattern. Every field is parsed and
//! validated once, in [`Config::validate`], immediately after load, so no
//! device object downstream ever receives a missing or mistyped parameter
//! at runtime (`spec.md` §9).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{PandoraError, Result};

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// LabJack digital-I/O bus shared by the shutter and all flip mounts.
    pub labjack: LabjackConfig,
    /// Monochromator serial link and crossover policy.
    pub monochromator: MonochromatorConfig,
    /// Electrometer instances, keyed by a short id (e.g. "k1", "k2").
    pub electrometers: HashMap<String, ElectrometerConfig>,
    /// Zaber stage instances, keyed by a short id.
    pub zaber_stages: HashMap<String, ZaberConfig>,
    /// Telescope mount serial link and safety limits.
    pub mount: MountConfig,
    /// Fiber spectrometer configuration, if one is attached.
    #[serde(default)]
    pub spectrometer: Option<SpectrometerConfig>,
    /// Run/calibration database root.
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// LabJack digital-I/O configuration: the bus address plus a named-port
/// assignment for the shutter and each flip mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabjackConfig {
    /// LabJack device IP address.
    pub ip: String,
    /// Named digital port for the shutter.
    pub shutter_port: String,
    /// Whether the shutter's ON level is inverted relative to "activated".
    #[serde(default)]
    pub shutter_invert_logic: bool,
    /// Named digital port + invert-logic flag for each flip mount, keyed
    /// by flip-mount name (e.g. "f1", "f2", "f3").
    pub flip_mounts: HashMap<String, FlipMountPortConfig>,
}

/// Per-flip-mount digital port assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlipMountPortConfig {
    /// Named digital port driving this flip mount.
    pub port: String,
    /// Whether this mount's ON level is inverted relative to "activated".
    #[serde(default)]
    pub invert_logic: bool,
}

/// Monochromator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonochromatorConfig {
    /// Serial port device path.
    pub serial_port: String,
    /// Baud rate.
    #[serde(default = "default_mono_baud")]
    pub baud_rate: u32,
    /// Wavelength (nm) above which the order-blocking filter must be
    /// engaged. Canonical source per `SPEC_FULL.md` §9.FULL.3 — this
    /// field, nowhere else.
    pub crossover_nm: f64,
    /// Name of the flip mount implementing the order-block filter.
    pub order_block_flip_mount: String,
}

fn default_mono_baud() -> u32 {
    9600
}

/// Per-electrometer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectrometerConfig {
    /// Instrument IP address (SCPI over TCP, HiSLIP-style port).
    pub ip: String,
    /// Per-call transport timeout, milliseconds.
    #[serde(default = "default_electrometer_timeout_ms")]
    pub timeout_ms: u64,
    /// Default measurement mode at start-up: CURR, CHAR, VOLT, or RES.
    #[serde(default = "default_electrometer_mode")]
    pub default_mode: String,
    /// Default range index on the active ladder.
    #[serde(default)]
    pub default_range_index: u8,
    /// Default NPLC, or `None` for AUTO.
    #[serde(default)]
    pub default_nplc: Option<f64>,
    /// Default trigger count.
    #[serde(default = "default_n_samples")]
    pub default_n_samples: u32,
    /// Power-line frequency, 50 or 60 Hz.
    #[serde(default = "default_line_frequency")]
    pub line_frequency_hz: f64,
}

fn default_electrometer_timeout_ms() -> u64 {
    2000
}
fn default_electrometer_mode() -> String {
    "CURR".to_string()
}
fn default_n_samples() -> u32 {
    1
}
fn default_line_frequency() -> f64 {
    60.0
}

/// Per-Zaber-stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZaberConfig {
    /// TCP chain IP address.
    pub ip: String,
    /// Device index within the chain.
    pub device_index: u8,
    /// Axis id on the device.
    pub axis_id: u8,
    /// Named slot -> millimetre offset map, insertion order preserved.
    pub slots: indexmap::IndexMap<String, f64>,
    /// Default travel speed, mm/s.
    #[serde(default = "default_zaber_speed")]
    pub default_speed_mm_s: f64,
}

fn default_zaber_speed() -> f64 {
    5.0
}

/// Telescope mount configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Serial port device path.
    pub serial_port: String,
    /// Baud rate.
    #[serde(default = "default_mount_baud")]
    pub baud_rate: u32,
    /// Safety limits applied before any `goto_altaz`.
    pub safety: SafetyLimits,
}

fn default_mount_baud() -> u32 {
    9600
}

/// Altitude/azimuth safety bounds (`spec.md` §4.C.6, §4.D).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Minimum altitude, degrees.
    pub alt_limit_default: f64,
    /// Minimum azimuth, degrees.
    pub az_lower: f64,
    /// Maximum azimuth, degrees.
    pub az_upper: f64,
}

/// Spectrometer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrometerConfig {
    /// Default integration time, milliseconds.
    #[serde(default = "default_integration_ms")]
    pub integration_ms: u32,
    /// Default number of scans to average.
    #[serde(default = "default_scans_to_average")]
    pub scans_to_average: u32,
    /// Default smoothing window.
    #[serde(default)]
    pub smoothing: u32,
    /// Default x-timing setting (vendor-specific: 1, 2, or 3).
    #[serde(default = "default_xtiming")]
    pub xtiming: u8,
    /// Whether temperature compensation is enabled.
    #[serde(default = "default_true")]
    pub temp_compensation: bool,
}

fn default_integration_ms() -> u32 {
    100
}
fn default_scans_to_average() -> u32 {
    1
}
fn default_xtiming() -> u8 {
    3
}
fn default_true() -> bool {
    true
}

/// Database root location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Root directory containing `.run_cache.csv`, `data/`, `calib/`, and
    /// `lightcurves/`.
    pub root: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log file path; `None` logs to stderr only.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: None,
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the given TOML file, overridable by
    /// `PANDORA_`-prefixed environment variables (double-underscore
    /// separated for nested fields, e.g. `PANDORA_DATABASE__ROOT`).
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("PANDORA_").split("__"))
            .extract()
            .map_err(|e| PandoraError::StateInvariant(format!("config load failed: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants that serde's per-field defaults
    /// cannot express: non-empty paths, sane numeric ranges, and the
    /// order-block flip mount actually existing in the labjack map.
    pub fn validate(&self) -> Result<()> {
        if self.monochromator.serial_port.trim().is_empty() {
            return Err(PandoraError::StateInvariant(
                "monochromator.serial_port must not be empty".into(),
            ));
        }
        if !self
            .labjack
            .flip_mounts
            .contains_key(&self.monochromator.order_block_flip_mount)
        {
            return Err(PandoraError::StateInvariant(format!(
                "monochromator.order_block_flip_mount '{}' is not a configured flip mount",
                self.monochromator.order_block_flip_mount
            )));
        }
        if self.mount.safety.az_lower >= self.mount.safety.az_upper {
            return Err(PandoraError::StateInvariant(
                "mount.safety.az_lower must be less than az_upper".into(),
            ));
        }
        for (name, zaber) in &self.zaber_stages {
            if zaber.ip.trim().is_empty() {
                return Err(PandoraError::StateInvariant(format!(
                    "zaber_stages.{name}.ip must not be empty"
                )));
            }
        }
        for (name, elec) in &self.electrometers {
            if !matches!(elec.default_mode.as_str(), "CURR" | "CHAR" | "VOLT" | "RES") {
                return Err(PandoraError::StateInvariant(format!(
                    "electrometers.{name}.default_mode '{}' is not one of CURR/CHAR/VOLT/RES",
                    elec.default_mode
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[labjack]
ip = "192.168.1.50"
shutter_port = "FIO0"

[labjack.flip_mounts.f1]
port = "FIO1"

[monochromator]
serial_port = "/dev/ttyUSB0"
crossover_nm = 700.0
order_block_flip_mount = "f1"

[mount]
serial_port = "/dev/ttyUSB1"
[mount.safety]
alt_limit_default = 15.0
az_lower = 60.0
az_upper = 300.0

[database]
root = "/tmp/pandora"
"#
    }

    #[test]
    fn loads_and_validates_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", sample_toml()).unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.labjack.ip, "192.168.1.50");
        assert_eq!(config.monochromator.crossover_nm, 700.0);
        assert!(config.electrometers.is_empty());
    }

    #[test]
    fn rejects_order_block_mount_not_configured() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let toml = sample_toml().replace("order_block_flip_mount = \"f1\"", "order_block_flip_mount = \"nope\"");
        write!(file, "{}", toml).unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }

    #[test]
    fn rejects_inverted_azimuth_bounds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let toml = sample_toml().replace("az_lower = 60.0", "az_lower = 400.0");
        write!(file, "{}", toml).unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }
}
