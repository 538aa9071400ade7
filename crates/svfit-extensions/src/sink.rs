use std::sync::Arc;

use accurate::{sum::Klein, traits::*};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use svfit_core::{
    utils::{functions::transverse_mass, Histogram},
    FittedLeg, Vec4,
};

/// A consumer of accepted sample points.
///
/// The integrand calls [`notify`](ResultSink::notify) with both fitted legs and the integrand
/// value whenever the value is above the numerical floor. What is accumulated is up to the sink.
pub trait ResultSink: Send {
    fn notify(&mut self, legs: &[FittedLeg; 2], prob: f64);
}

/// A shared sink, so the caller can keep a handle to the accumulated state while the integrand
/// owns the other.
impl<S: ResultSink> ResultSink for Arc<Mutex<S>> {
    fn notify(&mut self, legs: &[FittedLeg; 2], prob: f64) {
        self.lock().notify(legs, prob);
    }
}

/// The fitted state with the largest integrand value seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiTauSnapshot {
    pub prob: f64,
    pub tau1_p4: Vec4,
    pub tau2_p4: Vec4,
    pub mass: f64,
    pub transverse_mass: f64,
}

/// Point estimates of the di-tau mass and transverse mass.
///
/// Each value is the peak of its weighted distribution; the error is the RMS of the distances
/// from the peak to the 16% and 84% quantiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiTauSummary {
    pub mass: f64,
    pub mass_err: f64,
    pub transverse_mass: f64,
    pub transverse_mass_err: f64,
    pub n_samples: usize,
}

/// Range in GeV covered by the mass histograms.
pub const MASS_RANGE: (f64, f64) = (10.0, 1.0e4);
/// Ratio of consecutive bin edges of the mass histograms.
pub const MASS_BIN_RATIO: f64 = 1.025;

/// Histograms the di-tau mass $`M`$ and the transverse mass
/// $`M_T = \sqrt{(p_{T,1} + p_{T,2})^2 - (\vec{p}_{T,1} + \vec{p}_{T,2})^2}`$ of every accepted
/// sample point.
///
/// With [`DiTauAccumulator::new`] each point is weighted by its integrand value, which turns
/// uniformly drawn points into a posterior distribution. [`DiTauAccumulator::unweighted`] gives
/// every point unit weight, for samplers which already draw from the integrand. Storage is fixed
/// by the binning and does not grow with the number of points.
#[derive(Debug, Clone)]
pub struct DiTauAccumulator {
    unweighted: bool,
    mass: Histogram,
    transverse_mass: Histogram,
    sum_of_weights: Klein<f64>,
    n_samples: usize,
    best: Option<DiTauSnapshot>,
}

impl Default for DiTauAccumulator {
    fn default() -> Self {
        Self {
            unweighted: false,
            mass: Histogram::log_binned(MASS_RANGE, MASS_BIN_RATIO),
            transverse_mass: Histogram::log_binned(MASS_RANGE, MASS_BIN_RATIO),
            sum_of_weights: Klein::zero(),
            n_samples: 0,
            best: None,
        }
    }
}

fn peak_and_width(hist: &Histogram) -> Option<(f64, f64)> {
    let peak = hist.peak()?;
    let low = hist.quantile(0.16)?;
    let high = hist.quantile(0.84)?;
    Some((
        peak,
        (0.5 * ((peak - low).powi(2) + (high - peak).powi(2))).sqrt(),
    ))
}

impl DiTauAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unweighted() -> Self {
        Self {
            unweighted: true,
            ..Default::default()
        }
    }

    /// Number of accepted points.
    pub fn len(&self) -> usize {
        self.n_samples
    }

    pub fn is_empty(&self) -> bool {
        self.n_samples == 0
    }

    /// Sum of the weights of all accepted points, including those outside the histogram range.
    pub fn sum_of_weights(&self) -> f64 {
        self.sum_of_weights.sum()
    }

    pub fn mass_histogram(&self) -> &Histogram {
        &self.mass
    }

    pub fn transverse_mass_histogram(&self) -> &Histogram {
        &self.transverse_mass
    }

    pub fn best(&self) -> Option<&DiTauSnapshot> {
        self.best.as_ref()
    }

    /// Peak and quantile width of both distributions, or `None` if nothing landed in range.
    pub fn summary(&self) -> Option<DiTauSummary> {
        let (mass, mass_err) = peak_and_width(&self.mass)?;
        let (transverse_mass, transverse_mass_err) = peak_and_width(&self.transverse_mass)?;
        Some(DiTauSummary {
            mass,
            mass_err,
            transverse_mass,
            transverse_mass_err,
            n_samples: self.n_samples,
        })
    }

    pub fn clear(&mut self) {
        self.mass.counts.iter_mut().for_each(|c| *c = 0.0);
        self.transverse_mass.counts.iter_mut().for_each(|c| *c = 0.0);
        self.sum_of_weights = Klein::zero();
        self.n_samples = 0;
        self.best = None;
    }
}

impl ResultSink for DiTauAccumulator {
    fn notify(&mut self, legs: &[FittedLeg; 2], prob: f64) {
        let (tau1_p4, tau2_p4) = (legs[0].tau_p4(), legs[1].tau_p4());
        let mass = (tau1_p4 + tau2_p4).m();
        let transverse_mass = transverse_mass(&tau1_p4, &tau2_p4);
        let weight = if self.unweighted { 1.0 } else { prob };
        self.mass.fill(mass, weight);
        self.transverse_mass.fill(transverse_mass, weight);
        self.sum_of_weights += weight;
        self.n_samples += 1;
        if self.best.map_or(true, |best| prob > best.prob) {
            self.best = Some(DiTauSnapshot {
                prob,
                tau1_p4,
                tau2_p4,
                mass,
                transverse_mass,
            });
        }
    }
}
