//! Closed-form probability densities entering the svfit likelihood.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

/// Flight-length terms: point of closest approach, allowed flight range, decay probability and
/// vertex pull.
pub mod flight_length;
/// The Gaussian missing-momentum transfer function in its transverse and four-component forms.
pub mod met;
/// Phase-space factors of leptonic and hadronic $`\tau`$ decays.
pub mod phase_space;
/// Response models for the visible momentum of hadronic decays.
pub mod transfer;

pub use flight_length::FlightLengthDensity;
pub use met::{met_residual, met_transfer_function, response_correction};
pub use phase_space::{ps_factor_tau_to_had_decay, ps_factor_tau_to_lep_decay, tau_decay_density};
pub use transfer::{GaussianHadTauTF, HadTauTF};
