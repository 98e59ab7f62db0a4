//! Device state objects (`spec.md` §4.C).
//!
//! Each device owns exactly one transport handle (or a shared,
//! reference-counted one where the physical bus is genuinely shared, e.g.
//! the digital-I/O bus and a Zaber TCP chain) and exposes the operation
//! surface named in `SPEC_FULL.md` §4.C.FULL.

pub mod digital_io_line;
pub mod electrometer;
pub mod flip_mount;
pub mod monochromator;
pub mod mount;
pub mod shutter;
pub mod spectrometer;
pub mod zaber_stage;

pub use digital_io_line::DigitalIoLine;
