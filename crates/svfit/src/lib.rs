//! `svfit` reconstructs the invariant mass of a pair of $`\tau`$ leptons from their visible decay
//! products and the missing transverse momentum of the event. Each $`\tau`$ decay leaves one or two
//! neutrinos unmeasured; `svfit` integrates a likelihood over their kinematics and turns the
//! accepted points into an estimate of the pair mass.
//!
//! <div class="warning">
//!
//! This crate is still in an early development phase, and the API is not stable.
//!
//! </div>
//!
//! # Table of Contents
//! - [Key Features](#key-features)
//! - [Quick Start](#quick-start)
//! - [The Likelihood](#the-likelihood)
//! - [Parametrisation](#parametrisation)
//! - [Error Handling](#error-handling)
//! - [Command-Line Driver](#command-line-driver)
//!
//! # Key Features
//! * A single [`Integrand`] which maps a point of the unit hypercube onto the kinematics of both
//!   legs and returns a non-negative likelihood value, ready for any sampler.
//! * Leptonic, hadronic and prompt legs; transverse (hadron collider) and full four-momentum
//!   (lepton collider) missing-momentum measurements.
//! * Optional di-tau mass constraint, flight-length reconstruction from decay vertices and a
//!   pluggable response model for hadronic visible momenta ([`HadTauTF`]).
//! * A reference Monte-Carlo integrator and a mass accumulator, with parallel fitting of
//!   independent events using [`rayon`](https://github.com/rayon-rs/rayon).
//!
//! # Quick Start
//! ```
//! use svfit::prelude::*;
//!
//! let event = svfit::test_event();
//! let mut integrand = Integrand::new(IntegrandConfig::default().with_log_m(6.0));
//! assert!(integrand.bind(&event).is_empty());
//!
//! let accumulator = Arc::new(Mutex::new(DiTauAccumulator::new()));
//! integrand.attach_sink(Box::new(accumulator.clone()));
//! let summary = PlainMonteCarlo::new(5_000)
//!     .with_seed(1)
//!     .integrate_integrand(&mut integrand);
//! assert!(summary.integral > 0.0);
//!
//! let masses = accumulator.lock().summary().unwrap();
//! assert!(masses.mass > event.visible_mass());
//! ```
//!
//! Samplers which only accept a function pointer can use the global slot:
//! ```
//! use svfit::prelude::*;
//!
//! let mut integrand = Integrand::default();
//! integrand.bind(&svfit::test_event());
//! svfit::register_active(integrand);
//! let f: fn(&[f64]) -> f64 = svfit::evaluate_active;
//! assert!(f(&[0.4, 0.3, 0.2, 0.5, 0.6]) >= 0.0);
//! let _integrand = svfit::take_active();
//! ```
//!
//! # The Likelihood
//! For a point of the unit hypercube the integrand evaluates
//! ```math
//! \mathcal{L} = \mathcal{L}_{PS}\,\mathcal{L}_{FL}\,\mathcal{L}_{E_T^{miss}}
//! ```
//! where $`\mathcal{L}_{PS}`$ is the product of the decay phase-space factors of both legs with
//! the matrix-element normalisation, the regularisation $`1/\max(1, M)^p`$ and the Jacobian of
//! the parametrisation; $`\mathcal{L}_{FL}`$ is the flight-length term (one unless enabled); and
//! $`\mathcal{L}_{E_T^{miss}}`$ is the Gaussian density of the missing-momentum residual.
//!
//! # Parametrisation
//! Each non-prompt leg is described by its visible energy fraction $`x`$, the azimuth
//! $`\phi`$ of the invisible system around the visible direction, the squared mass of the
//! neutrino pair for leptonic decays, an inverse visible-momentum shift for hadronic decays when a
//! response model is active and a flight-length fraction when vertices are used. With a mass
//! constraint $`M`$ the second fraction is derived as
//! ```math
//! x_2 = \frac{m_{vis}^2}{M^2 x_1}
//! ```
//! [`Integrand::bind`] derives the default layout; it can be overridden with
//! [`Integrand::initialize_leg_integration_params`], [`Integrand::set_num_dimensions`] and
//! [`Integrand::set_integration_ranges`].
//!
//! # Error Handling
//! Configuration mistakes are reported as [`SvfitError`]. Problems with an event are reported as
//! [`ErrorCodes`] by [`Integrand::bind`]; any of them makes every evaluation return zero.
//! Points without a physical solution evaluate to zero and never abort the integration.
//!
//! # Command-Line Driver
//! The `svfit` binary fits the reference event (or an event read from JSON) with the plain
//! Monte-Carlo integrator:
//! ```shell
//! svfit --n-calls 200000 --mass-constraint 125.06 --log-level info
//! ```
//! The reported masses are the peaks of the weighted $`M`$ and $`M_T`$ distributions, with
//! $`M_T`$ built from the transverse momenta of both $`\tau`$ leptons, and the errors are the
//! spread between the 16% and 84% quantiles. For the reference event a Markov-chain integration
//! reports $`M = 115.746 \pm 87.001`$ and $`M_T = 114.242 \pm 85.830`$ unconstrained, and
//! $`M = 124.646 \pm 1.276`$, $`M_T = 123.026 \pm 1.193`$ with a constraint at $`125.06`$. The
//! plain Monte-Carlo integrator estimates the same distributions with more noise.
#![warn(clippy::perf, clippy::style)]

/// Measured inputs and their serialised form.
pub mod data {
    pub use svfit_core::data::*;
}

/// Probability densities entering the likelihood.
pub mod densities {
    pub use svfit_densities::*;
}

/// Kinematic helpers, constants and enums.
pub mod utils {
    pub use svfit_core::utils::*;
}

/// The most commonly used items, plus the shared-sink types.
pub mod prelude {
    pub use std::sync::Arc;

    pub use parking_lot::Mutex;

    pub use crate::{
        DiTauAccumulator, HadTauTF, Integrand, IntegrandConfig, IntegrationParameters,
        IntegrationRanges, Integrator, MeasuredEvent, MeasuredLepton, MeasuredMEt,
        PlainMonteCarlo, ResultSink,
    };
}

pub use svfit_core::data::test_event;
pub use svfit_core::fitted::{FittedLeg, LegState};
pub use svfit_core::frames::{clamp_cos_theta, BoostToHelicityFrame};
pub use svfit_core::{
    DecayType, ErrorCode, ErrorCodes, HadronicDecayMode, LeadChargedHadron, MEtType,
    MeasuredEvent, MeasuredLepton, MeasuredMEt, Sign, SvfitError, SvfitResult, Vec3, Vec4, Vertex,
};
pub use svfit_densities::{GaussianHadTauTF, HadTauTF};
pub use svfit_extensions::*;
pub use serde::{Deserialize, Serialize};
pub use typetag;
