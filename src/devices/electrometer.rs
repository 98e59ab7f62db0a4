//! Electrometer state object (`SPEC_FULL.md` §4.C.4.FULL), grounded on
//! `original_source/pandora/controller/keysight.py`'s `KeysightController`
//! (Keysight B2980-series).
//!
//! A single struct gated on a `mode: ElectrometerMode` field rather than
//! two monomorphized types (`DESIGN.md` records the choice): the original
//! freely switches `self.params['mode']` at runtime (`set_mode`), and the
//! device registry this crate's controller façade builds on holds devices
//! behind trait objects, where a generic marker type buys nothing.

use crate::error::{PandoraError, Result};
use crate::limits::{
    current_settling_time_s, AUTOSCALE_DOWN_RATIO, AUTOSCALE_MAX_ITERS_CHARGE,
    AUTOSCALE_MAX_ITERS_CURRENT, AUTOSCALE_UP_RATIO, OVERFLOW_SENTINEL, SETTLING_TIME_MARGIN,
};
use crate::model::{ElectrometerMode, ElectrometerReadout, ElectrometerSample, InstrumentRange};
use crate::transport::scpi::ScpiTransport;

/// The Keysight electrometer.
pub struct Electrometer {
    mode: ElectrometerMode,
    range: InstrumentRange,
    nplc: Option<f64>,
    n_samples: u32,
    interval_s: f64,
    line_frequency_hz: f64,
}

impl Electrometer {
    /// Construct with the device's default measurement configuration. The
    /// caller is responsible for pushing `*` setters to hardware via the
    /// other methods below once connected (mirroring the original's
    /// `set_default_settings` loop over `tracked_properties`).
    pub fn new(mode: ElectrometerMode, range: InstrumentRange, line_frequency_hz: f64) -> Self {
        Self {
            mode,
            range,
            nplc: Some(1.0),
            n_samples: 10,
            interval_s: 2e-3,
            line_frequency_hz,
        }
    }

    /// Current measurement mode.
    pub fn mode(&self) -> ElectrometerMode {
        self.mode
    }

    /// Current range.
    pub fn range(&self) -> InstrumentRange {
        self.range
    }

    /// Switch measurement mode.
    pub async fn set_mode(&mut self, scpi: &mut dyn ScpiTransport, mode: ElectrometerMode) -> Result<()> {
        scpi.write_line(&format!("SENSe:FUNCtion:ON \"{}\"", mode.scpi_mnemonic()))
            .await?;
        self.mode = mode;
        Ok(())
    }

    /// Turn the input amplifier on.
    pub async fn turn_on(&mut self, scpi: &mut dyn ScpiTransport) -> Result<()> {
        scpi.write_line(":INP ON").await
    }

    /// Turn the input amplifier off.
    pub async fn turn_off(&mut self, scpi: &mut dyn ScpiTransport) -> Result<()> {
        scpi.write_line(":INP OFF").await
    }

    /// Set the measurement range, sleeping the published settling time
    /// (current mode only, per `SPEC_FULL.md` §4.C.4.FULL) after the
    /// device accepts the new range.
    pub async fn set_range(&mut self, scpi: &mut dyn ScpiTransport, range: InstrumentRange) -> Result<()> {
        let mode = self.mode.scpi_mnemonic();
        scpi.write_line(&format!("SENS:{mode}:RANG:AUTO OFF")).await?;
        scpi.write_line(&format!("SENS:{mode}:RANG {}", range.magnitude()))
            .await?;
        self.range = range;
        if let InstrumentRange::Current(k) = range {
            if let Some(settle_s) = current_settling_time_s(k) {
                tokio::time::sleep(std::time::Duration::from_secs_f64(
                    settle_s * SETTLING_TIME_MARGIN,
                ))
                .await;
            }
        }
        Ok(())
    }

    /// Set NPLC (integration cycles per measurement), deriving the sample
    /// interval from it (`interval = nplc / line_frequency + 1ms`).
    pub async fn set_nplc(&mut self, scpi: &mut dyn ScpiTransport, nplc: f64) -> Result<()> {
        let mode = self.mode.scpi_mnemonic();
        scpi.write_line(&format!(":SENS:{mode}:NPLC:AUTO OFF")).await?;
        scpi.write_line(&format!(":SENS:{mode}:NPLC {nplc}")).await?;
        self.nplc = Some(nplc);
        let interval = nplc / self.line_frequency_hz + 1e-3;
        self.set_interval(scpi, interval).await
    }

    /// Directly set the trigger interval, seconds.
    pub async fn set_interval(&mut self, scpi: &mut dyn ScpiTransport, interval_s: f64) -> Result<()> {
        scpi.write_line(&format!(":TRIG:ACQ:TIM {interval_s}")).await?;
        self.interval_s = interval_s;
        Ok(())
    }

    /// Set the trigger count.
    pub async fn set_n_samples(&mut self, scpi: &mut dyn ScpiTransport, n_samples: u32) -> Result<()> {
        scpi.write_line(&format!(":TRIG:ACQ:COUN {n_samples}")).await?;
        self.n_samples = n_samples;
        Ok(())
    }

    /// Set the total acquisition time by deriving and setting `n_samples`
    /// from the currently configured interval (`floor(t / interval) + 1`).
    pub async fn set_acquisition_time(&mut self, scpi: &mut dyn ScpiTransport, seconds: f64) -> Result<()> {
        let n_samples = (seconds / self.interval_s).floor() as u32 + 1;
        self.set_n_samples(scpi, n_samples).await
    }

    /// Zero the feedback capacitor (charge mode only).
    pub async fn discharge(&mut self, scpi: &mut dyn ScpiTransport) -> Result<()> {
        scpi.write_line("SENS:CHAR:DISCharge").await
    }

    /// Arm the configured acquisition.
    pub async fn acquire(&mut self, scpi: &mut dyn ScpiTransport) -> Result<()> {
        scpi.write_line(":INIT:ACQ").await
    }

    /// Read back the last acquisition. If `wait`, first blocks on `*OPC?`
    /// (operation-complete) before fetching the parallel time/value arrays.
    pub async fn read_data(&mut self, scpi: &mut dyn ScpiTransport, wait: bool) -> Result<ElectrometerReadout> {
        if wait {
            scpi.query_line("*OPC?").await?;
        }
        let times = scpi.query_ascii_vector(":FETC:ARR:TIME?").await?;
        let mode = self.mode.scpi_mnemonic();
        let values = scpi
            .query_ascii_vector(&format!(":FETC:ARR:{mode}?"))
            .await?;
        if times.len() != values.len() {
            return Err(PandoraError::ProtocolError(format!(
                "electrometer time/value array length mismatch: {} vs {}",
                times.len(),
                values.len()
            )));
        }
        let samples: Vec<ElectrometerSample> = times
            .into_iter()
            .zip(values)
            .map(|(relative_time_s, value)| ElectrometerSample {
                relative_time_s,
                value,
            })
            .collect();
        Ok(ElectrometerReadout::summarize(samples, OVERFLOW_SENTINEL))
    }

    /// Autoscale by repeatedly acquiring at the current range and stepping
    /// up/down the ladder until `|mean|` falls in `(0.05, 0.80) * range`,
    /// bounded to 15 iterations in current mode / 10 in charge mode.
    /// Breaking at either end of the ladder without converging is not an
    /// error — it logs a warning and keeps the extreme range, matching the
    /// original.
    pub async fn auto_scale(&mut self, scpi: &mut dyn ScpiTransport) -> Result<InstrumentRange> {
        let max_iters = if self.mode == ElectrometerMode::Char {
            AUTOSCALE_MAX_ITERS_CHARGE
        } else {
            AUTOSCALE_MAX_ITERS_CURRENT
        };
        self.set_acquisition_time(scpi, 10.0 / self.line_frequency_hz).await?;

        for _ in 0..max_iters {
            self.set_range(scpi, self.range).await?;
            if self.mode == ElectrometerMode::Char {
                self.discharge(scpi).await?;
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            self.acquire(scpi).await?;
            let readout = self.read_data(scpi, true).await?;
            let magnitude = self.range.magnitude();
            let value = readout.mean.abs();

            if value > AUTOSCALE_UP_RATIO * magnitude {
                match self.range.step_up() {
                    Some(next) => {
                        self.range = next;
                        continue;
                    }
                    None => {
                        tracing::warn!("electrometer signal approaching maximum range");
                        break;
                    }
                }
            } else if value < AUTOSCALE_DOWN_RATIO * magnitude {
                match self.range.step_down() {
                    Some(next) => {
                        self.range = next;
                        continue;
                    }
                    None => {
                        tracing::info!("electrometer at minimum range");
                        break;
                    }
                }
            } else {
                break;
            }
        }

        self.set_range(scpi, self.range).await?;
        Ok(self.range)
    }
}
