//! Control plane for the Pandora Box optical-calibration instrument.
//!
//! Bottom-up module layout mirrors `spec.md` §2's component table:
//! transport adapters (`transport`), the rate limiter (`rate_limit`),
//! device state objects (`devices`), the safety-interlock layer (`safety`),
//! the exposure sequencer (`sequencer`), the run database (`rundb`), the
//! calibration store (`calib`), and the controller façade (`controller`)
//! that composes all of the above for the CLI front end (`cli`).

pub mod calib;
pub mod cli;
pub mod config;
pub mod controller;
pub mod devices;
pub mod error;
pub mod limits;
pub mod logging;
pub mod model;
pub mod rate_limit;
pub mod rundb;
pub mod safety;
pub mod sequencer;
pub mod transport;
