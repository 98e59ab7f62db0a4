//! Spectrometer state object (`SPEC_FULL.md` §4.C.5.FULL), grounded on
//! `original_source/pandora/controller/stellarnet.py`'s
//! `spectrometerController`.

use crate::error::Result;
use crate::transport::spectrometer::{Spectrum, SpectrometerTransport};

/// The fiber spectrometer.
pub struct Spectrometer {
    temp_compensation: bool,
}

impl Spectrometer {
    /// Construct with the configured default temperature-compensation
    /// flag. Integration/averaging/smoothing/xtiming defaults are pushed
    /// by the caller via the setters below once the transport is open,
    /// mirroring the original's `set_params` push-on-connect pattern.
    pub fn new(temp_compensation: bool) -> Self {
        Self { temp_compensation }
    }

    /// Set integration time in milliseconds.
    pub async fn set_integration_ms(&mut self, transport: &mut dyn SpectrometerTransport, inttime_ms: u32) -> Result<()> {
        transport.set_integration_ms(inttime_ms).await
    }

    /// Set the number of scans to average.
    pub async fn set_scans_to_average(&mut self, transport: &mut dyn SpectrometerTransport, scan_avg: u32) -> Result<()> {
        transport.set_scans_to_average(scan_avg).await
    }

    /// Set the smoothing window size.
    pub async fn set_smoothing(&mut self, transport: &mut dyn SpectrometerTransport, smooth: u32) -> Result<()> {
        transport.set_smoothing(smooth).await
    }

    /// Set the x-timing register.
    pub async fn set_xtiming(&mut self, transport: &mut dyn SpectrometerTransport, xtiming: u32) -> Result<()> {
        transport.set_xtiming(xtiming).await
    }

    /// Enable or disable temperature compensation. Tracked here rather
    /// than on the transport: the StellarNet driver has no analogous
    /// register, this flag instead gates whether the controller façade
    /// applies a temperature correction to acquired spectra downstream.
    pub fn set_temp_compensation(&mut self, enabled: bool) {
        self.temp_compensation = enabled;
    }

    /// Whether temperature compensation is currently enabled.
    pub fn temp_compensation(&self) -> bool {
        self.temp_compensation
    }

    /// Acquire one spectrum.
    pub async fn acquire_spectrum(&mut self, transport: &mut dyn SpectrometerTransport) -> Result<Spectrum> {
        transport.acquire_spectrum().await
    }

    /// Reset the spectrometer.
    pub async fn reset(&mut self, transport: &mut dyn SpectrometerTransport) -> Result<()> {
        transport.reset().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::spectrometer::MockSpectrometer;

    #[tokio::test]
    async fn acquire_spectrum_delegates_to_transport() {
        let mut mock = MockSpectrometer::new(Spectrum {
            wavelengths_nm: vec![400.0, 401.0],
            counts: vec![10.0, 20.0],
        });
        let mut spectrometer = Spectrometer::new(true);
        let spectrum = spectrometer.acquire_spectrum(&mut mock).await.unwrap();
        assert_eq!(spectrum.counts, vec![10.0, 20.0]);
    }

    #[tokio::test]
    async fn temp_compensation_toggles_without_touching_transport() {
        let mut spectrometer = Spectrometer::new(false);
        assert!(!spectrometer.temp_compensation());
        spectrometer.set_temp_compensation(true);
        assert!(spectrometer.temp_compensation());
    }
}
