//! Telescope mount state object (`SPEC_FULL.md` §4.C.6.FULL), grounded on
//! `original_source/pandora/controller/ioptron.py`'s `IoptronController`
//! (iOptron HAZ-series Alt-Az mount, Go2Nova 8409 hand-controller command
//! set).

use crate::error::{PandoraError, Result};
use crate::limits::{MOUNT_PARK_STABLE_DEG, MOUNT_PARK_STABLE_WINDOW, MOUNT_SLEW_POLL_INTERVAL};
use crate::model::MountState;
use crate::transport::serial::ByteSerial;

/// ASCII `#`-terminated command framing, angle encode/decode (1/360000°
/// units with a leading sign byte for altitude). Pure and transport-free.
pub mod wire {
    use super::*;

    /// Encode an altitude in `sTTTTTTTT` format (0.01 arcsec units).
    pub fn format_altitude(deg_alt: f64) -> Result<String> {
        if !(-90.0..=90.0).contains(&deg_alt) {
            return Err(PandoraError::DeviceRejected(
                "altitude must be in -90..=90 degrees".into(),
            ));
        }
        let units = (deg_alt * 360_000.0).round() as i64;
        let sign = if units >= 0 { '+' } else { '-' };
        Ok(format!("{sign}{:08}", units.abs()))
    }

    /// Encode an azimuth in `TTTTTTTTT` format (0.01 arcsec units),
    /// wrapped into `[0, 360)`.
    pub fn format_azimuth(deg_az: f64) -> String {
        let wrapped = deg_az.rem_euclid(360.0);
        let units = (wrapped * 360_000.0).round() as i64;
        format!("{units:09}")
    }

    /// Decode a `:GAC#` reply (`±AAAAAAAAZZZZZZZZZ#`, 19 chars) into
    /// `(alt_deg, az_deg)`.
    pub fn parse_altaz(reply: &str) -> Result<(f64, f64)> {
        let trimmed = reply.trim_end_matches('#');
        if trimmed.len() != 18 {
            return Err(PandoraError::ProtocolError(format!(
                "unexpected :GAC# reply length: {reply:?}"
            )));
        }
        let sign = if trimmed.starts_with('-') { -1.0 } else { 1.0 };
        let alt_units: i64 = trimmed[1..9]
            .parse()
            .map_err(|_| PandoraError::ProtocolError(format!("bad altitude field in {reply:?}")))?;
        let az_units: i64 = trimmed[9..18]
            .parse()
            .map_err(|_| PandoraError::ProtocolError(format!("bad azimuth field in {reply:?}")))?;
        Ok((sign * alt_units as f64 / 360_000.0, az_units as f64 / 360_000.0))
    }

    /// Decode the system-status character from a `:GLS#` reply (19th
    /// character, 0-indexed position 18).
    pub fn parse_status_code(reply: &str) -> MountState {
        let trimmed = reply.trim_end_matches('#');
        match trimmed.chars().nth(18) {
            Some('0') => MountState::StoppedNonHome,
            Some('1') => MountState::Tracking,
            Some('2') => MountState::Slewing,
            Some('3') => MountState::AutoGuiding,
            Some('6') => MountState::Parked,
            Some('7') => MountState::StoppedHome,
            _ => MountState::Unknown,
        }
    }
}

/// The telescope mount. `alt_limit_deg` tracks the mount's own configurable
/// altitude floor (`:SAL#`/`:GAL#`), which is independent from — and checked
/// in addition to — the safety-layer limit in [`crate::config::SafetyLimits`].
pub struct TelescopeMount {
    serial_port: String,
    baud_rate: u32,
    alt_limit_deg: f64,
}

impl TelescopeMount {
    /// Bind configuration; the port is opened per-operation like the
    /// monochromator (`SPEC_FULL.md` §5).
    pub fn new(serial_port: String, baud_rate: u32) -> Self {
        Self {
            serial_port,
            baud_rate,
            alt_limit_deg: 0.0,
        }
    }

    async fn cmd_single(port: &mut dyn ByteSerial, payload: &str) -> Result<u8> {
        let mut framed = payload.as_bytes().to_vec();
        if !payload.ends_with('#') {
            framed.push(b'#');
        }
        port.write_bytes(&framed).await?;
        Ok(port.read_exact_n(1).await?[0])
    }

    async fn cmd_reply(port: &mut dyn ByteSerial, payload: &str) -> Result<String> {
        let mut framed = payload.as_bytes().to_vec();
        if !payload.ends_with('#') {
            framed.push(b'#');
        }
        port.write_bytes(&framed).await?;
        let raw = port.read_until(b'#').await?;
        String::from_utf8(raw)
            .map_err(|_| PandoraError::ProtocolError("mount reply was not valid ASCII".into()))
    }

    /// Query current Alt/Az position.
    pub async fn get_altaz(&self, port: &mut dyn ByteSerial) -> Result<(f64, f64)> {
        let reply = Self::cmd_reply(port, ":GAC#").await?;
        wire::parse_altaz(&reply)
    }

    /// Query current Alt/Az position and system state.
    pub async fn get_status(&self, port: &mut dyn ByteSerial) -> Result<(f64, f64, MountState)> {
        let (alt, az) = self.get_altaz(port).await?;
        let reply = Self::cmd_reply(port, ":GLS#").await?;
        Ok((alt, az, wire::parse_status_code(&reply)))
    }

    /// Slew to an absolute Alt/Az target. Safety bounds are checked by the
    /// caller (the controller façade, via `safety::check_goto_altaz`) —
    /// this method issues the command sequence unconditionally.
    pub async fn goto_altaz(&self, port: &mut dyn ByteSerial, alt_deg: f64, az_deg: f64, track_after: bool) -> Result<()> {
        let alt_str = wire::format_altitude(alt_deg)?;
        let az_str = wire::format_azimuth(az_deg);

        if Self::cmd_single(port, &format!(":Sa{alt_str}#")).await? != b'1' {
            return Err(PandoraError::DeviceRejected("mount refused altitude target".into()));
        }
        if Self::cmd_single(port, &format!(":Sz{az_str}#")).await? != b'1' {
            return Err(PandoraError::DeviceRejected("mount refused azimuth target".into()));
        }
        if Self::cmd_single(port, ":MSS#").await? != b'1' {
            return Err(PandoraError::DeviceRejected(
                "mount refused slew (limit hit?)".into(),
            ));
        }
        if track_after {
            let _ = Self::cmd_reply(port, ":ST1#").await?;
        }

        self.wait_for_slew_complete(port).await?;

        if !track_after {
            Self::cmd_single(port, ":ST0#").await?;
        }
        Ok(())
    }

    /// Slew to the mechanical home (zenith) position.
    pub async fn goto_home(&self, port: &mut dyn ByteSerial) -> Result<()> {
        if Self::cmd_single(port, ":MH#").await? != b'1' {
            return Err(PandoraError::DeviceRejected("mount failed to slew home".into()));
        }
        self.wait_for_slew_complete(port).await?;
        Self::cmd_single(port, ":ST0#").await?;
        Ok(())
    }

    /// Move to the stored parking position.
    pub async fn park(&self, port: &mut dyn ByteSerial) -> Result<()> {
        if Self::cmd_single(port, ":MP1#").await? != b'1' {
            return Err(PandoraError::DeviceRejected("park command failed".into()));
        }
        self.wait_for_stop(port).await?;
        Self::cmd_single(port, ":ST0#").await?;
        Ok(())
    }

    /// Unpark the mount.
    pub async fn unpark(&self, port: &mut dyn ByteSerial) -> Result<()> {
        if Self::cmd_single(port, ":MP0#").await? != b'1' {
            return Err(PandoraError::DeviceRejected("unpark command failed".into()));
        }
        Ok(())
    }

    /// Emergency stop: halt all motion and disable tracking.
    pub async fn stop(&self, port: &mut dyn ByteSerial) -> Result<()> {
        port.write_bytes(b":Q#").await?;
        Self::cmd_single(port, ":ST0#").await?;
        Ok(())
    }

    /// Enable or disable sidereal tracking.
    pub async fn enable_tracking(&self, port: &mut dyn ByteSerial, enabled: bool) -> Result<()> {
        let cmd = if enabled { ":ST1#" } else { ":ST0#" };
        Self::cmd_single(port, cmd).await?;
        Ok(())
    }

    /// Store a new parking position (`:SPH#`/`:SPA#`), independent of the
    /// mount's current position.
    pub async fn set_park(&self, port: &mut dyn ByteSerial, alt_deg: f64, az_deg: f64) -> Result<()> {
        let alt_str = wire::format_altitude(alt_deg)?;
        let az_str = wire::format_azimuth(az_deg);
        if Self::cmd_single(port, &format!(":SPH{alt_str}#")).await? != b'1' {
            return Err(PandoraError::DeviceRejected("mount refused park altitude".into()));
        }
        if Self::cmd_single(port, &format!(":SPA{az_str}#")).await? != b'1' {
            return Err(PandoraError::DeviceRejected("mount refused park azimuth".into()));
        }
        Ok(())
    }

    /// Query the stored parking position (`:GPC#`).
    pub async fn get_park(&self, port: &mut dyn ByteSerial) -> Result<(f64, f64)> {
        let reply = Self::cmd_reply(port, ":GPC#").await?;
        wire::parse_altaz(&reply)
    }

    /// Push a new altitude floor to the mount itself (`:SAL±NN#`, whole
    /// degrees) and cache it locally for [`TelescopeMount::get_alt_limit`].
    pub async fn set_alt_limit(&mut self, port: &mut dyn ByteSerial, alt_limit_deg: f64) -> Result<()> {
        if !(-90.0..=90.0).contains(&alt_limit_deg) {
            return Err(PandoraError::DeviceRejected(
                "alt limit must be in -90..=90 degrees".into(),
            ));
        }
        let sign = if alt_limit_deg >= 0.0 { '+' } else { '-' };
        let whole_degrees = alt_limit_deg.abs().round() as i64;
        if Self::cmd_single(port, &format!(":SAL{sign}{whole_degrees:02}#")).await? != b'1' {
            return Err(PandoraError::DeviceRejected("mount refused altitude limit".into()));
        }
        self.alt_limit_deg = alt_limit_deg;
        Ok(())
    }

    /// The last altitude floor pushed via [`TelescopeMount::set_alt_limit`].
    pub fn get_alt_limit(&self) -> f64 {
        self.alt_limit_deg
    }

    /// Whether the mount is currently parked.
    pub async fn is_parked(&self, port: &mut dyn ByteSerial) -> Result<bool> {
        let (_, _, state) = self.get_status(port).await?;
        Ok(state == MountState::Parked)
    }

    async fn wait_for_slew_complete(&self, port: &mut dyn ByteSerial) -> Result<()> {
        loop {
            tokio::time::sleep(MOUNT_SLEW_POLL_INTERVAL).await;
            let (_, _, state) = self.get_status(port).await?;
            if state != MountState::Slewing {
                return Ok(());
            }
        }
    }

    async fn wait_for_stop(&self, port: &mut dyn ByteSerial) -> Result<()> {
        tokio::time::sleep(MOUNT_PARK_STABLE_WINDOW).await;
        let (mut prev_alt, mut prev_az) = self.get_altaz(port).await?;
        loop {
            tokio::time::sleep(MOUNT_PARK_STABLE_WINDOW).await;
            let (alt, az) = self.get_altaz(port).await?;
            if (alt - prev_alt).abs() < MOUNT_PARK_STABLE_DEG && (az - prev_az).abs() < MOUNT_PARK_STABLE_DEG {
                return Ok(());
            }
            prev_alt = alt;
            prev_az = az;
        }
    }

    /// Serial port this mount is configured to open.
    pub fn serial_port(&self) -> &str {
        &self.serial_port
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_altitude_encodes_sign_and_units() {
        assert_eq!(wire::format_altitude(45.0).unwrap(), "+16200000");
        assert_eq!(wire::format_altitude(-10.0).unwrap(), "-03600000");
    }

    #[test]
    fn format_altitude_rejects_out_of_range() {
        assert!(wire::format_altitude(95.0).is_err());
    }

    #[test]
    fn format_azimuth_wraps_negative_and_overflow() {
        assert_eq!(wire::format_azimuth(-10.0), wire::format_azimuth(350.0));
        assert_eq!(wire::format_azimuth(0.0), "000000000");
    }

    #[test]
    fn parse_altaz_round_trips_formatted_values() {
        let alt_str = wire::format_altitude(45.0).unwrap();
        let az_str = wire::format_azimuth(180.0);
        let reply = format!("{alt_str}{az_str}#");
        let (alt, az) = wire::parse_altaz(&reply).unwrap();
        assert!((alt - 45.0).abs() < 1e-6);
        assert!((az - 180.0).abs() < 1e-6);
    }

    #[test]
    fn parse_status_code_maps_known_states() {
        let reply = format!("{}{}{}#", "0".repeat(9), "0".repeat(9), "2");
        assert_eq!(wire::parse_status_code(&reply), MountState::Slewing);
    }

    #[test]
    fn alt_limit_starts_unset_and_reflects_last_pushed_value() {
        let mount = TelescopeMount::new("/dev/ttyUSB1".to_string(), 115200);
        assert_eq!(mount.get_alt_limit(), 0.0);
    }

    #[tokio::test]
    async fn set_alt_limit_rejects_out_of_range() {
        use crate::transport::serial::MockByteSerial;
        let mut mount = TelescopeMount::new("/dev/ttyUSB1".to_string(), 115200);
        let mut port = MockByteSerial::new(vec![]);
        let result = mount.set_alt_limit(&mut port, 95.0).await;
        assert!(matches!(result, Err(PandoraError::DeviceRejected(_))));
    }

    #[tokio::test]
    async fn goto_altaz_rejected_altitude_errors_without_writing_slew() {
        use crate::transport::serial::MockByteSerial;
        let mount = TelescopeMount::new("/dev/ttyUSB1".to_string(), 115200);
        let mut port = MockByteSerial::new(vec![]);
        let result = mount.goto_altaz(&mut port, 95.0, 180.0, false).await;
        assert!(matches!(result, Err(PandoraError::DeviceRejected(_))));
    }
}
