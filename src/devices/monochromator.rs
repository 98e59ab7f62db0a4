//! Monochromator state object (`SPEC_FULL.md` §4.C.3.FULL), grounded on
//! `original_source/pandora/controller/monochromator.py`'s
//! `MonochromatorController` (Digikröm CM110/CM112).
//!
//! The serial port is opened fresh for each operation rather than held
//! open across the completion wait — carried over intentionally from the
//! original's per-call `connect()`/`close()` pairing (`SPEC_FULL.md` §5).

use crate::error::{PandoraError, Result};
use crate::model::Wavelength;
use crate::transport::serial::ByteSerial;

/// Bit-exact wire encoding for the CM110/CM112 command set. Pure and
/// transport-free so every byte layout is unit-tested without a mock
/// serial port.
pub mod wire {
    /// `<255><255><255>`: RESET / go-home.
    pub fn encode_reset() -> [u8; 3] {
        [255, 255, 255]
    }

    /// `<16><hi><lo>`: GOTO absolute wavelength, deci-angstrom units.
    pub fn encode_goto(wavelength_deciangstroms: i32) -> [u8; 3] {
        let hi = ((wavelength_deciangstroms / 256) & 0xFF) as u8;
        let lo = (wavelength_deciangstroms % 256) as u8;
        [16, hi, lo]
    }

    /// `<12><s_hi><s_lo><e_hi><e_lo>`: SCAN between two wavelengths.
    pub fn encode_scan(start_deciangstroms: i32, end_deciangstroms: i32) -> [u8; 5] {
        let s_hi = ((start_deciangstroms / 256) & 0xFF) as u8;
        let s_lo = (start_deciangstroms % 256) as u8;
        let e_hi = ((end_deciangstroms / 256) & 0xFF) as u8;
        let e_lo = (end_deciangstroms % 256) as u8;
        [12, s_hi, s_lo, e_hi, e_lo]
    }

    /// `<56><0>`: QUERY POSITION (current wavelength).
    pub fn encode_query_wavelength() -> [u8; 2] {
        [56, 0]
    }

    /// Decode a 2-byte `(hi, lo)` wavelength reply into deci-angstroms.
    pub fn decode_wavelength_reply(hi: u8, lo: u8) -> i32 {
        ((hi as i32) << 8) | lo as i32
    }

    /// Monochromator status-byte bitfield, decoded per the original's
    /// `_handle_status_byte`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusBits {
        /// Status byte `>= 128`: command not accepted.
        pub not_accepted: bool,
        /// Bit 5 (`0b0010_0000`): specifier too small.
        pub specifier_too_small: bool,
        /// Bit 4 (`0b0001_0000`): negative-going scan.
        pub negative_going_scan: bool,
        /// Bit 3 (`0b0000_1000`): wavelength out of range.
        pub out_of_range: bool,
    }

    /// Decode a status byte's error bitfield (valid when `status >= 128`).
    pub fn decode_status(status: u8) -> StatusBits {
        StatusBits {
            not_accepted: status >= 128,
            specifier_too_small: status & 0b0010_0000 != 0,
            negative_going_scan: status & 0b0001_0000 != 0,
            out_of_range: status & 0b0000_1000 != 0,
        }
    }
}

/// The monochromator.
pub struct Monochromator {
    serial_port: String,
    baud_rate: u32,
    crossover_nm: f64,
}

impl Monochromator {
    /// Bind configuration without opening any port yet (the port is opened
    /// per-operation).
    pub fn new(serial_port: String, baud_rate: u32, crossover_nm: f64) -> Self {
        Self {
            serial_port,
            baud_rate,
            crossover_nm,
        }
    }

    /// Whether the order-blocking filter must be engaged for `wavelength`
    /// (second-order light above the configured crossover). Strict: exactly
    /// at the crossover the filter is not yet required.
    pub fn order_block_required(&self, wavelength: Wavelength) -> bool {
        wavelength.0 > self.crossover_nm
    }

    fn check_status(status: u8) -> Result<()> {
        let bits = wire::decode_status(status);
        if bits.not_accepted {
            return Err(PandoraError::DeviceRejected(format!(
                "monochromator rejected command: specifier_too_small={} negative_going_scan={} out_of_range={}",
                bits.specifier_too_small, bits.negative_going_scan, bits.out_of_range
            )));
        }
        Ok(())
    }

    async fn poll_completion(port: &mut dyn ByteSerial) -> Result<()> {
        loop {
            let byte = port.read_exact_n(1).await?[0];
            if byte == crate::limits::MONO_COMPLETE {
                return Ok(());
            }
            if byte == crate::limits::MONO_IN_PROGRESS {
                continue;
            }
            return Err(PandoraError::ProtocolError(format!(
                "unexpected byte {byte:#04x} while polling for monochromator completion"
            )));
        }
    }

    /// Move to an absolute wavelength and wait for completion.
    pub async fn move_to_wavelength<F, Fut>(&self, wavelength: Wavelength, open_port: F) -> Result<()>
    where
        F: FnOnce(&str, u32) -> Fut,
        Fut: std::future::Future<Output = Result<Box<dyn ByteSerial>>>,
    {
        let mut port = open_port(&self.serial_port, self.baud_rate).await?;
        let cmd = wire::encode_goto(wavelength.to_wire_decidegstroms());
        port.write_bytes(&cmd).await?;
        let status = port.read_exact_n(1).await?[0];
        Self::check_status(status)?;
        Self::poll_completion(port.as_mut()).await?;
        port.close().await
    }

    /// Scan from `start` to `end` and wait for completion.
    pub async fn scan_wavelength<F, Fut>(
        &self,
        start: Wavelength,
        end: Wavelength,
        open_port: F,
    ) -> Result<()>
    where
        F: FnOnce(&str, u32) -> Fut,
        Fut: std::future::Future<Output = Result<Box<dyn ByteSerial>>>,
    {
        let mut port = open_port(&self.serial_port, self.baud_rate).await?;
        let cmd = wire::encode_scan(
            start.to_wire_decidegstroms(),
            end.to_wire_decidegstroms(),
        );
        port.write_bytes(&cmd).await?;
        let status = port.read_exact_n(1).await?[0];
        Self::check_status(status)?;
        Self::poll_completion(port.as_mut()).await?;
        port.close().await
    }

    /// Query the current wavelength.
    pub async fn get_wavelength<F, Fut>(&self, open_port: F) -> Result<Wavelength>
    where
        F: FnOnce(&str, u32) -> Fut,
        Fut: std::future::Future<Output = Result<Box<dyn ByteSerial>>>,
    {
        let mut port = open_port(&self.serial_port, self.baud_rate).await?;
        let cmd = wire::encode_query_wavelength();
        port.write_bytes(&cmd).await?;
        let reply = port.read_exact_n(2).await?;
        let raw = wire::decode_wavelength_reply(reply[0], reply[1]);
        port.close().await?;
        Ok(Wavelength::from_wire_decidegstroms(raw))
    }

    /// Return to the home (0 nm) position.
    pub async fn go_home<F, Fut>(&self, open_port: F) -> Result<()>
    where
        F: FnOnce(&str, u32) -> Fut,
        Fut: std::future::Future<Output = Result<Box<dyn ByteSerial>>>,
    {
        let mut port = open_port(&self.serial_port, self.baud_rate).await?;
        let cmd = wire::encode_reset();
        port.write_bytes(&cmd).await?;
        let status = port.read_exact_n(1).await?[0];
        if status < 128 {
            Self::poll_completion(port.as_mut()).await?;
        } else {
            Self::check_status(status)?;
        }
        port.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goto_encodes_high_low_bytes() {
        let cmd = wire::encode_goto(5324);
        assert_eq!(cmd, [16, 20, 204]);
    }

    #[test]
    fn wavelength_reply_decodes_round_trip() {
        let raw = wire::decode_wavelength_reply(20, 204);
        assert_eq!(raw, 5324);
    }

    #[test]
    fn status_byte_decodes_rejection_bits() {
        let bits = wire::decode_status(0b1010_1000);
        assert!(bits.not_accepted);
        assert!(bits.specifier_too_small);
        assert!(bits.out_of_range);
        assert!(!bits.negative_going_scan);
    }

    #[test]
    fn status_byte_below_128_is_not_rejection() {
        let bits = wire::decode_status(0x01);
        assert!(!bits.not_accepted);
    }

    #[test]
    fn order_block_required_above_crossover() {
        let mono = Monochromator::new("/dev/ttyUSB0".to_string(), 9600, 700.0);
        assert!(mono.order_block_required(Wavelength(701.0)));
        assert!(!mono.order_block_required(Wavelength(699.0)));
    }

    #[tokio::test]
    async fn move_to_wavelength_runs_full_command_sequence() {
        use crate::transport::serial::MockByteSerial;

        let mono = Monochromator::new("/dev/ttyUSB0".to_string(), 9600, 700.0);
        let result = mono
            .move_to_wavelength(Wavelength(532.4), |_port, _baud| async {
                let mock = MockByteSerial::new(vec![0x00, crate::limits::MONO_COMPLETE]);
                Ok(Box::new(mock) as Box<dyn ByteSerial>)
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn move_to_wavelength_propagates_rejection() {
        use crate::transport::serial::MockByteSerial;

        let mono = Monochromator::new("/dev/ttyUSB0".to_string(), 9600, 700.0);
        let result = mono
            .move_to_wavelength(Wavelength(532.4), |_port, _baud| async {
                let mock = MockByteSerial::new(vec![0b1000_1000]);
                Ok(Box::new(mock) as Box<dyn ByteSerial>)
            })
            .await;
        assert!(matches!(result, Err(PandoraError::DeviceRejected(_))));
    }
}
