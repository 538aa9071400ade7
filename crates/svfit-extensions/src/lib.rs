//! # svfit-extensions
//!
//! The likelihood integrand of a $`\tau`$ pair together with the pieces needed to integrate it:
//! result sinks which turn accepted sample points into mass estimates, a reference Monte-Carlo
//! integrator and a global slot for samplers which only take function pointers.
#![warn(clippy::perf, clippy::style)]

/// The active-integrand slot.
pub mod global;
/// The likelihood integrand and its configuration.
pub mod integrand;
/// Integrators over the unit hypercube.
pub mod integrator;
/// Consumers of accepted sample points.
pub mod sink;

pub use global::{evaluate_active, register_active, take_active};
pub use integrand::{Integrand, IntegrandConfig, IntegrationParameters, IntegrationRanges};
pub use integrator::{
    fit_event, fit_events, EventFit, IntegrationSummary, Integrator, PlainMonteCarlo,
};
pub use sink::{DiTauAccumulator, DiTauSnapshot, DiTauSummary, ResultSink};
