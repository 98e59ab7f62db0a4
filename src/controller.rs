//! Controller façade (`SPEC_FULL.md` §4.H.FULL), grounded on
//! `original_source/pandora/pandora_controller.py`'s `PandoraBox`.
//!
//! Owns every device object, the run database, and the calibration store,
//! and is the only place that builds a [`Sequencer`] — each exposure call
//! borrows the shutter, both electrometers, and the run database for the
//! duration of one call rather than holding them borrowed across awaits.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::calib::CalibrationStore;
use crate::config::Config;
use crate::devices::electrometer::Electrometer;
use crate::devices::flip_mount::FlipMount;
use crate::devices::monochromator::Monochromator;
use crate::devices::shutter::Shutter;
use crate::devices::spectrometer::Spectrometer;
use crate::devices::zaber_stage::ZaberStage;
use crate::error::{PandoraError, Result};
use crate::model::{ElectrometerMode, ElectrometerReadout, FlipMountState, InstrumentRange, MountState, Wavelength};
use crate::rundb::{OpenMode, RunDatabase, RunId};
use crate::safety;
use crate::sequencer::{ExposureContext, Sequencer};
use crate::devices::mount::TelescopeMount;
use crate::transport::digital_io::{DigitalIo, LabjackAdapter};
use crate::transport::motion::{MotionChain, ZaberTcpChain};
use crate::transport::scpi::{ScpiTransport, TcpScpi};
use crate::transport::serial::{ByteSerial, SerialAdapter};
use crate::transport::spectrometer::{Spectrum, SpectrometerTransport, StellarNetSpectrometer};

struct ElectrometerUnit {
    device: Electrometer,
    transport: Box<dyn ScpiTransport>,
}

/// The fully composed instrument. One `Controller` per run.
pub struct Controller {
    config: Config,
    monochromator: Monochromator,
    shutter: Shutter,
    flip_mounts: HashMap<String, FlipMount>,
    electrometer_input: ElectrometerUnit,
    electrometer_output: ElectrometerUnit,
    zaber_stages: HashMap<String, ZaberStage>,
    mount: TelescopeMount,
    mount_port: Box<dyn ByteSerial>,
    spectrometer: Option<(Spectrometer, Box<dyn SpectrometerTransport>)>,
    digital_io_bus: Arc<Mutex<dyn DigitalIo>>,
    rundb: RunDatabase,
    calib: CalibrationStore,
    current_wavelength_nm: f64,
    nd_filter: String,
    pinhole_mask: String,
    focus_position: String,
    last_alt_deg: f64,
    last_az_deg: f64,
}

/// Conventional electrometer ids the controller expects in
/// `config.electrometers`: one feeding the monochromator input beam, one
/// behind the sample under test.
const ELECTROMETER_INPUT_ID: &str = "input";
const ELECTROMETER_OUTPUT_ID: &str = "output";

/// Conventional Zaber stage ids for the two filter-wheel-style roles this
/// controller understands; any other configured stage id is addressable
/// only via its bare slot-move operation.
const ZABER_ND_FILTER_ID: &str = "nd_filter";
const ZABER_PINHOLE_MASK_ID: &str = "pinhole_mask";

impl Controller {
    /// Connect to every configured device and open the run database.
    pub async fn connect(config: Config, run_id: Option<RunId>, mode: OpenMode) -> Result<Self> {
        let digital_io_bus: Arc<Mutex<dyn DigitalIo>> =
            Arc::new(Mutex::new(LabjackAdapter::connect(&config.labjack.ip)?));

        let shutter = Shutter::open(
            digital_io_bus.clone(),
            &config.labjack.shutter_port,
            config.labjack.shutter_invert_logic,
        )
        .await?;

        let mut flip_mounts = HashMap::new();
        for (name, port_cfg) in &config.labjack.flip_mounts {
            let mount = FlipMount::open(digital_io_bus.clone(), &port_cfg.port, port_cfg.invert_logic).await?;
            flip_mounts.insert(name.clone(), mount);
        }

        let electrometer_input = connect_electrometer(&config, ELECTROMETER_INPUT_ID).await?;
        let electrometer_output = connect_electrometer(&config, ELECTROMETER_OUTPUT_ID).await?;

        let mut zaber_stages = HashMap::new();
        for (name, zcfg) in &config.zaber_stages {
            let chain: Arc<Mutex<dyn MotionChain>> = Arc::new(Mutex::new(ZaberTcpChain::connect(&zcfg.ip).await?));
            zaber_stages.insert(name.clone(), ZaberStage::new(chain, zcfg.slots.clone()));
        }

        let monochromator = Monochromator::new(
            config.monochromator.serial_port.clone(),
            config.monochromator.baud_rate,
            config.monochromator.crossover_nm,
        );

        let mount = TelescopeMount::new(config.mount.serial_port.clone(), config.mount.baud_rate);
        let mount_port: Box<dyn ByteSerial> =
            Box::new(SerialAdapter::open(&config.mount.serial_port, config.mount.baud_rate)?);

        let spectrometer = match &config.spectrometer {
            Some(scfg) => {
                let mut device = Spectrometer::new(scfg.temp_compensation);
                let mut transport: Box<dyn SpectrometerTransport> = Box::new(StellarNetSpectrometer::open()?);
                device.set_integration_ms(transport.as_mut(), scfg.integration_ms).await?;
                device.set_scans_to_average(transport.as_mut(), scfg.scans_to_average).await?;
                device.set_smoothing(transport.as_mut(), scfg.smoothing).await?;
                device.set_xtiming(transport.as_mut(), scfg.xtiming as u32).await?;
                Some((device, transport))
            }
            None => None,
        };

        let mut flip_mount_names: Vec<String> = config.labjack.flip_mounts.keys().cloned().collect();
        flip_mount_names.sort();
        let rundb = RunDatabase::open(&config.database.root, None, run_id, mode, flip_mount_names)?;
        let calib = CalibrationStore::open(&config.database.root)?;

        Ok(Self {
            config,
            monochromator,
            shutter,
            flip_mounts,
            electrometer_input,
            electrometer_output,
            zaber_stages,
            mount,
            mount_port,
            spectrometer,
            digital_io_bus,
            rundb,
            calib,
            current_wavelength_nm: 0.0,
            nd_filter: "UNKNOWN".to_string(),
            pinhole_mask: "UNKNOWN".to_string(),
            focus_position: "UNKNOWN".to_string(),
            last_alt_deg: 0.0,
            last_az_deg: 0.0,
        })
    }

    /// This run's database.
    pub fn rundb(&self) -> &RunDatabase {
        &self.rundb
    }

    /// This instrument's calibration store.
    pub fn calib(&self) -> &CalibrationStore {
        &self.calib
    }

    /// Mutable access to the calibration store (for `spectrograph-calib`/
    /// `monochromator-calib`-style commands that record a new artifact).
    pub fn calib_mut(&mut self) -> &mut CalibrationStore {
        &mut self.calib
    }

    /// Move to `wavelength_nm`, automatically flipping the order-blocking
    /// filter in or out of the beam first (`spec.md` §4.D).
    pub async fn set_wavelength(&mut self, wavelength_nm: f64) -> Result<()> {
        let wavelength = Wavelength(wavelength_nm);
        let required_on = safety::order_block_required(wavelength, self.config.monochromator.crossover_nm);
        let mount_name = self.config.monochromator.order_block_flip_mount.clone();
        let order_block = self.flip_mounts.get_mut(&mount_name).ok_or_else(|| {
            PandoraError::StateInvariant(format!("configured order-block flip mount '{mount_name}' is not open"))
        })?;
        if required_on {
            order_block.activate().await?;
        } else {
            order_block.deactivate().await?;
        }

        self.monochromator
            .move_to_wavelength(wavelength, open_serial_port)
            .await?;
        self.current_wavelength_nm = wavelength_nm;
        Ok(())
    }

    /// Query the monochromator's current wavelength.
    pub async fn get_wavelength(&mut self) -> Result<f64> {
        let wavelength = self.monochromator.get_wavelength(open_serial_port).await?;
        self.current_wavelength_nm = wavelength.0;
        Ok(wavelength.0)
    }

    /// Open the beam shutter.
    pub async fn open_shutter(&mut self) -> Result<()> {
        self.shutter.open_shutter().await
    }

    /// Close the beam shutter.
    pub async fn close_shutter(&mut self) -> Result<()> {
        self.shutter.close_shutter().await
    }

    /// Engage or disengage a named flip mount.
    pub async fn flip(&mut self, mount_name: &str, engage: bool) -> Result<()> {
        let mount = self
            .flip_mounts
            .get_mut(mount_name)
            .ok_or_else(|| PandoraError::DeviceRejected(format!("unknown flip mount '{mount_name}'")))?;
        if engage {
            mount.activate().await
        } else {
            mount.deactivate().await
        }
    }

    /// Current state of every configured flip mount.
    pub fn flip_mount_states(&self) -> HashMap<String, FlipMountState> {
        self.flip_mounts.iter().map(|(name, m)| (name.clone(), m.state())).collect()
    }

    /// Move a named Zaber stage to a named slot, updating the tracked
    /// ND-filter/pinhole-mask labels when the stage plays one of those
    /// conventional roles.
    pub async fn zaber_move(&mut self, stage_name: &str, slot_name: &str) -> Result<()> {
        let stage = self
            .zaber_stages
            .get_mut(stage_name)
            .ok_or_else(|| PandoraError::DeviceRejected(format!("unknown zaber stage '{stage_name}'")))?;
        stage.move_to_slot(slot_name).await?;
        match stage_name {
            ZABER_ND_FILTER_ID => self.nd_filter = slot_name.to_string(),
            ZABER_PINHOLE_MASK_ID => self.pinhole_mask = slot_name.to_string(),
            _ => {}
        }
        Ok(())
    }

    /// Arm and read one channel's electrometer (`get-keysight-readout`).
    /// `nplc`, if given, is pushed before acquisition; `exptime_s` sets the
    /// total acquisition time the same way a regular exposure does.
    pub async fn get_electrometer_readout(
        &mut self,
        channel: &str,
        nplc: Option<f64>,
        exptime_s: Option<f64>,
    ) -> Result<ElectrometerReadout> {
        let unit = self.electrometer_unit_mut(channel)?;
        if let Some(nplc) = nplc {
            unit.device.set_nplc(unit.transport.as_mut(), nplc).await?;
        }
        if let Some(exptime_s) = exptime_s {
            unit.device
                .set_acquisition_time(unit.transport.as_mut(), exptime_s)
                .await?;
        }
        unit.device.acquire(unit.transport.as_mut()).await?;
        unit.device.read_data(unit.transport.as_mut(), true).await
    }

    /// Move the ND-filter Zaber stage to a named slot.
    pub async fn set_nd_filter(&mut self, slot_name: &str) -> Result<()> {
        self.zaber_move(ZABER_ND_FILTER_ID, slot_name).await
    }

    /// Move the pinhole-mask Zaber stage to a named slot.
    pub async fn set_pinhole_mask(&mut self, slot_name: &str) -> Result<()> {
        self.zaber_move(ZABER_PINHOLE_MASK_ID, slot_name).await
    }

    /// Set a channel's electrometer range: to `scale` if given; else by
    /// stepping the current range down `scale_down` rungs; else by running
    /// a full open-shutter/autoscale/close-shutter cycle (`spec.md` §4.H —
    /// this controller takes the per-channel variant per §9's open
    /// question, not the original's autoscale-both-channels overload).
    pub async fn set_photodiode_scale(
        &mut self,
        channel: &str,
        scale: Option<InstrumentRange>,
        scale_down: Option<u32>,
    ) -> Result<InstrumentRange> {
        let unit = self.electrometer_unit_mut(channel)?;
        if let Some(range) = scale {
            unit.device.set_range(unit.transport.as_mut(), range).await?;
            return Ok(range);
        }
        if let Some(rungs) = scale_down {
            let mut range = unit.device.range();
            for _ in 0..rungs {
                range = range.step_down().unwrap_or(range);
            }
            unit.device.set_range(unit.transport.as_mut(), range).await?;
            return Ok(range);
        }
        self.shutter.open_shutter().await?;
        let unit = self.electrometer_unit_mut(channel)?;
        let range = unit.device.auto_scale(unit.transport.as_mut()).await?;
        self.shutter.close_shutter().await?;
        Ok(range)
    }

    /// Acquire one spectrum (`get-spectrometer-readout`), pushing the
    /// integration time, scan-averaging count, and x-timing register
    /// before acquiring.
    pub async fn get_spectrometer_readout(
        &mut self,
        exptime_ms: u32,
        scanavg: u32,
        xtiming: u32,
    ) -> Result<Spectrum> {
        let (device, transport) = self
            .spectrometer
            .as_mut()
            .ok_or_else(|| PandoraError::DeviceRejected("no spectrometer is configured".into()))?;
        device.set_integration_ms(transport.as_mut(), exptime_ms).await?;
        device.set_scans_to_average(transport.as_mut(), scanavg).await?;
        device.set_xtiming(transport.as_mut(), xtiming).await?;
        device.acquire_spectrum(transport.as_mut()).await
    }

    /// Wavelength scan (`spec.md` §4.E.4, `measure-pandora-throughput`):
    /// park 10 nm short of `start_nm` and autoscale both electrometers,
    /// then for each wavelength in `start_nm..=end_nm` by `step_nm`, take
    /// one baseline dark followed by `nrepeats` (light, closing-dark)
    /// pairs, all of duration `exptime_s`.
    pub async fn measure_pandora_throughput(
        &mut self,
        start_nm: f64,
        end_nm: f64,
        step_nm: f64,
        exptime_s: f64,
        nrepeats: u32,
    ) -> Result<Vec<u32>> {
        if step_nm <= 0.0 {
            return Err(PandoraError::StateInvariant("step_nm must be positive".into()));
        }
        self.autoscale_both_channels(start_nm - 10.0).await?;

        let mut expids = Vec::new();
        let mut wavelength_nm = start_nm;
        while wavelength_nm <= end_nm + 1e-9 {
            self.set_wavelength(wavelength_nm).await?;
            let flips = self.flip_states();
            {
                let ctx = ExposureContext {
                    wavelength_nm,
                    flip_mounts: &flips,
                    nd_filter: &self.nd_filter,
                    pinhole_mask: &self.pinhole_mask,
                    focus_position: &self.focus_position,
                    alt_deg: self.last_alt_deg,
                    az_deg: self.last_az_deg,
                };
                let mut sequencer = Sequencer {
                    shutter: &mut self.shutter,
                    input_elec: &mut self.electrometer_input.device,
                    input_scpi: self.electrometer_input.transport.as_mut(),
                    output_elec: &mut self.electrometer_output.device,
                    output_scpi: self.electrometer_output.transport.as_mut(),
                    rundb: &mut self.rundb,
                };
                expids.push(sequencer.take_dark(exptime_s, &ctx).await?);
                for _ in 0..nrepeats {
                    expids.push(sequencer.take_exposure(exptime_s, "light", false, &ctx).await?);
                    expids.push(sequencer.take_dark(exptime_s, &ctx).await?);
                }
            }
            wavelength_nm += step_nm;
        }
        Ok(expids)
    }

    /// Charge-mode wavelength scan (`spec.md` §4.E.2, §4.E.4,
    /// `measure-pandora-charge`): same shape as
    /// [`Controller::measure_pandora_throughput`] but every exposure is
    /// taken in charge mode, persisting one row per acquired sample rather
    /// than one row per exposure.
    pub async fn measure_pandora_charge(
        &mut self,
        start_nm: f64,
        end_nm: f64,
        step_nm: f64,
        exptime_s: f64,
        nrepeats: u32,
        discharge_first: bool,
        dark_time_s: Option<f64>,
    ) -> Result<Vec<u32>> {
        if step_nm <= 0.0 {
            return Err(PandoraError::StateInvariant("step_nm must be positive".into()));
        }
        let dark_time_s = dark_time_s.unwrap_or(exptime_s);
        self.autoscale_both_channels(start_nm - 10.0).await?;

        let mut expids = Vec::new();
        let mut wavelength_nm = start_nm;
        while wavelength_nm <= end_nm + 1e-9 {
            self.set_wavelength(wavelength_nm).await?;
            let flips = self.flip_states();
            {
                let ctx = ExposureContext {
                    wavelength_nm,
                    flip_mounts: &flips,
                    nd_filter: &self.nd_filter,
                    pinhole_mask: &self.pinhole_mask,
                    focus_position: &self.focus_position,
                    alt_deg: self.last_alt_deg,
                    az_deg: self.last_az_deg,
                };
                let mut sequencer = Sequencer {
                    shutter: &mut self.shutter,
                    input_elec: &mut self.electrometer_input.device,
                    input_scpi: self.electrometer_input.transport.as_mut(),
                    output_elec: &mut self.electrometer_output.device,
                    output_scpi: self.electrometer_output.transport.as_mut(),
                    rundb: &mut self.rundb,
                };
                expids.extend(sequencer.take_charge_exposure(dark_time_s, true, discharge_first, &ctx).await?);
                for _ in 0..nrepeats {
                    expids.extend(sequencer.take_charge_exposure(exptime_s, false, discharge_first, &ctx).await?);
                    expids.extend(sequencer.take_charge_exposure(dark_time_s, true, discharge_first, &ctx).await?);
                }
            }
            wavelength_nm += step_nm;
        }
        Ok(expids)
    }

    async fn autoscale_both_channels(&mut self, parked_wavelength_nm: f64) -> Result<()> {
        self.set_wavelength(parked_wavelength_nm).await?;
        self.shutter.open_shutter().await?;
        self.electrometer_input
            .device
            .auto_scale(self.electrometer_input.transport.as_mut())
            .await?;
        self.electrometer_output
            .device
            .auto_scale(self.electrometer_output.transport.as_mut())
            .await?;
        self.shutter.close_shutter().await?;
        Ok(())
    }

    /// Slew the telescope mount to an absolute Alt/Az target, checking park
    /// state and the configured safety envelope first.
    pub async fn mount_goto_altaz(&mut self, alt_deg: f64, az_deg: f64, track_after: bool) -> Result<()> {
        let is_parked = self.mount.is_parked(self.mount_port.as_mut()).await?;
        safety::check_goto_altaz(is_parked, alt_deg, az_deg, &self.config.mount.safety)?;
        self.mount.goto_altaz(self.mount_port.as_mut(), alt_deg, az_deg, track_after).await?;
        self.last_alt_deg = alt_deg;
        self.last_az_deg = az_deg;
        Ok(())
    }

    /// Slew the mount to its mechanical home (zenith) position.
    pub async fn mount_goto_home(&mut self) -> Result<()> {
        self.mount.goto_home(self.mount_port.as_mut()).await
    }

    /// Store a new parking position.
    pub async fn mount_set_park(&mut self, alt_deg: f64, az_deg: f64) -> Result<()> {
        self.mount.set_park(self.mount_port.as_mut(), alt_deg, az_deg).await
    }

    /// Query the stored parking position.
    pub async fn mount_get_park(&mut self) -> Result<(f64, f64)> {
        self.mount.get_park(self.mount_port.as_mut()).await
    }

    /// Push a new altitude floor to the mount.
    pub async fn mount_set_alt_limit(&mut self, alt_limit_deg: f64) -> Result<()> {
        self.mount.set_alt_limit(self.mount_port.as_mut(), alt_limit_deg).await
    }

    /// The mount's last-pushed altitude floor.
    pub fn mount_get_alt_limit(&self) -> f64 {
        self.mount.get_alt_limit()
    }

    /// Park the mount.
    pub async fn mount_park(&mut self) -> Result<()> {
        self.mount.park(self.mount_port.as_mut()).await
    }

    /// Unpark the mount.
    pub async fn mount_unpark(&mut self) -> Result<()> {
        self.mount.unpark(self.mount_port.as_mut()).await
    }

    /// Emergency stop: halt motion and disable tracking.
    pub async fn mount_stop(&mut self) -> Result<()> {
        self.mount.stop(self.mount_port.as_mut()).await
    }

    /// Query Alt/Az position and mount state, caching the position for the
    /// next exposure row.
    pub async fn mount_get_status(&mut self) -> Result<(f64, f64, MountState)> {
        let (alt, az, state) = self.mount.get_status(self.mount_port.as_mut()).await?;
        self.last_alt_deg = alt;
        self.last_az_deg = az;
        Ok((alt, az, state))
    }

    /// Best-effort shutdown in the documented order: monochromator (no
    /// persistent connection), shutter, flip mounts, electrometers, Zaber
    /// stages, spectrometer, then the digital-I/O bus last. A failure
    /// closing any one device is logged and does not stop the rest.
    pub async fn close_all_connections(&mut self) {
        tracing::info!("monochromator has no persistent connection to close");

        if let Err(e) = self.shutter.close_shutter().await {
            tracing::warn!(error = %e, "failed to close shutter during shutdown");
        }

        for (name, mount) in self.flip_mounts.iter_mut() {
            if let Err(e) = mount.deactivate().await {
                tracing::warn!(name, error = %e, "failed to disengage flip mount during shutdown");
            }
        }

        if let Err(e) = self
            .electrometer_input
            .device
            .turn_off(self.electrometer_input.transport.as_mut())
            .await
        {
            tracing::warn!(channel = ELECTROMETER_INPUT_ID, error = %e, "failed to turn off electrometer during shutdown");
        }
        if let Err(e) = self
            .electrometer_output
            .device
            .turn_off(self.electrometer_output.transport.as_mut())
            .await
        {
            tracing::warn!(channel = ELECTROMETER_OUTPUT_ID, error = %e, "failed to turn off electrometer during shutdown");
        }

        for name in self.zaber_stages.keys() {
            tracing::info!(name, "zaber stage has no explicit close; leaving at last commanded position");
        }

        if let Some((device, transport)) = self.spectrometer.as_mut() {
            if let Err(e) = device.reset(transport.as_mut()).await {
                tracing::warn!(error = %e, "failed to reset spectrometer during shutdown");
            }
        }

        if let Err(e) = self.mount_port.close().await {
            tracing::warn!(error = %e, "failed to close mount serial port during shutdown");
        }

        tracing::info!("closing digital-I/O bus");
        let _ = self.digital_io_bus.lock().await;
    }

    fn electrometer_unit_mut(&mut self, channel: &str) -> Result<&mut ElectrometerUnit> {
        match channel {
            ELECTROMETER_INPUT_ID => Ok(&mut self.electrometer_input),
            ELECTROMETER_OUTPUT_ID => Ok(&mut self.electrometer_output),
            other => Err(PandoraError::DeviceRejected(format!("unknown electrometer channel '{other}'"))),
        }
    }

    fn flip_states(&self) -> indexmap::IndexMap<String, bool> {
        self.flip_mounts
            .iter()
            .map(|(name, m)| (name.clone(), m.state() == FlipMountState::On))
            .collect()
    }
}

fn open_serial_port(
    port_name: &str,
    baud_rate: u32,
) -> impl std::future::Future<Output = Result<Box<dyn ByteSerial>>> + Send {
    let port_name = port_name.to_string();
    async move { SerialAdapter::open(&port_name, baud_rate).map(|adapter| Box::new(adapter) as Box<dyn ByteSerial>) }
}

async fn connect_electrometer(config: &Config, id: &str) -> Result<ElectrometerUnit> {
    let cfg = config.electrometers.get(id).ok_or_else(|| {
        PandoraError::StateInvariant(format!(
            "config.electrometers is missing the conventional '{id}' channel"
        ))
    })?;
    let mode = match cfg.default_mode.as_str() {
        "CURR" => ElectrometerMode::Curr,
        "CHAR" => ElectrometerMode::Char,
        "VOLT" => ElectrometerMode::Volt,
        "RES" => ElectrometerMode::Res,
        other => {
            return Err(PandoraError::StateInvariant(format!(
                "electrometer '{id}' has an unrecognized default_mode '{other}'"
            )))
        }
    };
    let range = InstrumentRange::Current((cfg.default_range_index as i8) - 12);
    let mut device = Electrometer::new(mode, range, cfg.line_frequency_hz);
    let mut transport: Box<dyn ScpiTransport> = Box::new(
        TcpScpi::connect(&cfg.ip, crate::transport::scpi::HISLIP_PORT).await?,
    );
    device.set_mode(transport.as_mut(), mode).await?;
    device.set_range(transport.as_mut(), range).await?;
    if let Some(nplc) = cfg.default_nplc {
        device.set_nplc(transport.as_mut(), nplc).await?;
    }
    device.set_n_samples(transport.as_mut(), cfg.default_n_samples).await?;
    Ok(ElectrometerUnit { device, transport })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn electrometer_conventional_ids_are_input_and_output() {
        assert_eq!(ELECTROMETER_INPUT_ID, "input");
        assert_eq!(ELECTROMETER_OUTPUT_ID, "output");
    }
}
