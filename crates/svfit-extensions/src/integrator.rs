use std::sync::Arc;

use accurate::{sum::Klein, traits::*};
use parking_lot::Mutex;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use svfit_core::{ErrorCodes, MeasuredEvent};
use tracing::debug;

use crate::{
    integrand::{Integrand, IntegrandConfig},
    sink::{DiTauAccumulator, DiTauSummary},
};

/// The outcome of integrating a function over the unit hypercube.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSummary {
    /// Estimate of the integral
    pub integral: f64,
    /// Standard error of the estimate
    pub error: f64,
    /// Number of function calls
    pub n_calls: usize,
    /// Number of calls which returned a non-zero value
    pub n_nonzero: usize,
}

/// Anything which integrates a function over $`[0, 1]^n`$.
pub trait Integrator {
    fn integrate(
        &mut self,
        f: &mut dyn FnMut(&[f64]) -> f64,
        num_dimensions: usize,
    ) -> IntegrationSummary;

    /// Integrate a bound [`Integrand`] over its own number of dimensions.
    fn integrate_integrand(&mut self, integrand: &mut Integrand) -> IntegrationSummary {
        let num_dimensions = integrand.num_dimensions();
        self.integrate(&mut |q| integrand.evaluate(q), num_dimensions)
    }
}

/// Uniform Monte-Carlo sampling with a seeded generator, so repeated runs give identical results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlainMonteCarlo {
    n_calls: usize,
    seed: u64,
}

impl Default for PlainMonteCarlo {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl PlainMonteCarlo {
    pub fn new(n_calls: usize) -> Self {
        Self { n_calls, seed: 0 }
    }
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
    pub fn n_calls(&self) -> usize {
        self.n_calls
    }
}

impl Integrator for PlainMonteCarlo {
    fn integrate(
        &mut self,
        f: &mut dyn FnMut(&[f64]) -> f64,
        num_dimensions: usize,
    ) -> IntegrationSummary {
        let mut rng = fastrand::Rng::with_seed(self.seed);
        let mut q = vec![0.0; num_dimensions];
        let values: Vec<f64> = (0..self.n_calls)
            .map(|_| {
                q.iter_mut().for_each(|qi| *qi = rng.f64());
                f(&q)
            })
            .collect();
        let n = values.len();
        let n_nonzero = values.iter().filter(|&&v| v != 0.0).count();
        if n == 0 {
            return IntegrationSummary {
                integral: 0.0,
                error: 0.0,
                n_calls: 0,
                n_nonzero: 0,
            };
        }
        let mean = values
            .iter()
            .copied()
            .sum_with_accumulator::<Klein<f64>>()
            / n as f64;
        let error = if n > 1 {
            let var = values
                .iter()
                .map(|v| (v - mean) * (v - mean))
                .sum_with_accumulator::<Klein<f64>>()
                / (n - 1) as f64;
            (var / n as f64).sqrt()
        } else {
            0.0
        };
        debug!(n_calls = n, n_nonzero, integral = mean, error, "plain Monte-Carlo");
        IntegrationSummary {
            integral: mean,
            error,
            n_calls: n,
            n_nonzero,
        }
    }
}

/// The result of fitting one event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventFit {
    pub error_codes: ErrorCodes,
    pub integration: IntegrationSummary,
    /// Mass estimates, absent if no point was accepted
    pub masses: Option<DiTauSummary>,
}

/// Fit a single event with its own [`Integrand`] and a probability-weighted
/// [`DiTauAccumulator`].
pub fn fit_event(
    event: &MeasuredEvent,
    config: &IntegrandConfig,
    integrator: &PlainMonteCarlo,
) -> EventFit {
    let accumulator = Arc::new(Mutex::new(DiTauAccumulator::new()));
    let mut integrand = Integrand::new(config.clone());
    let error_codes = integrand.bind(event);
    integrand.attach_sink(Box::new(accumulator.clone()));
    let mut integrator = *integrator;
    let integration = integrator.integrate_integrand(&mut integrand);
    let masses = accumulator.lock().summary();
    EventFit {
        error_codes,
        integration,
        masses,
    }
}

/// Fit independent events, each with its own [`Integrand`].
#[cfg(feature = "rayon")]
pub fn fit_events(
    events: &[MeasuredEvent],
    config: &IntegrandConfig,
    integrator: &PlainMonteCarlo,
) -> Vec<EventFit> {
    events
        .par_iter()
        .map(|event| fit_event(event, config, integrator))
        .collect()
}

/// Fit independent events, each with its own [`Integrand`].
#[cfg(not(feature = "rayon"))]
pub fn fit_events(
    events: &[MeasuredEvent],
    config: &IntegrandConfig,
    integrator: &PlainMonteCarlo,
) -> Vec<EventFit> {
    events
        .iter()
        .map(|event| fit_event(event, config, integrator))
        .collect()
}
