use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use svfit_core::{
    utils::functions::{lerp, square, CONST_FACTOR, MATRIX_ELEMENT_NORM, TAU_MASS2},
    DecayType, ErrorCode, ErrorCodes, FittedLeg, MeasuredEvent, SvfitError, SvfitResult,
};
use svfit_densities::{
    met_residual, met_transfer_function, response_correction, tau_decay_density,
    FlightLengthDensity, HadTauTF,
};
use tracing::{debug, error, trace};

use crate::sink::ResultSink;

/// Visible-momentum shifts below this value are rejected.
const MIN_VIS_PT_SHIFT: f64 = 1.0e-2;
/// Smallest accepted visible energy fraction.
const MIN_X: f64 = 1.0e-5;
/// Integrand values at or below this floor count as zero.
const PROB_FLOOR: f64 = 1.0e-300;

/// Options which shape the likelihood, fixed before integration starts.
///
/// ```
/// use svfit_extensions::IntegrandConfig;
///
/// let config = IntegrandConfig::default()
///     .with_log_m(6.0)
///     .with_di_tau_mass_constraint(125.06)
///     .with_verbosity(1);
/// assert_eq!(config.di_tau_mass_constraint(), Some(125.06));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrandConfig {
    log_m_power: Option<f64>,
    di_tau_mass_constraint: Option<f64>,
    tau_flight_length: bool,
    had_tau_tf_correlation: f64,
    verbosity: u8,
}

impl Default for IntegrandConfig {
    fn default() -> Self {
        Self {
            log_m_power: Some(6.0),
            di_tau_mass_constraint: None,
            tau_flight_length: false,
            had_tau_tf_correlation: 0.0,
            verbosity: 0,
        }
    }
}

impl IntegrandConfig {
    /// Multiply the integrand by $`1/\max(1, M)^{p}`$ with $`p`$ = `power`.
    pub fn with_log_m(mut self, power: f64) -> Self {
        self.log_m_power = Some(power);
        self
    }
    /// Drop the $`1/M^{p}`$ factor.
    pub fn without_log_m(mut self) -> Self {
        self.log_m_power = None;
        self
    }
    /// Fix the di-tau mass to `mass`. The energy fraction of the second leg is then derived from
    /// the first instead of being sampled. Non-positive masses disable the constraint.
    pub fn with_di_tau_mass_constraint(mut self, mass: f64) -> Self {
        self.di_tau_mass_constraint = (mass > 0.0).then_some(mass);
        self
    }
    /// Sample both energy fractions freely.
    pub fn without_di_tau_mass_constraint(mut self) -> Self {
        self.di_tau_mass_constraint = None;
        self
    }
    /// Use the decay vertices to constrain the flight length of each leg.
    pub fn with_tau_flight_length(mut self, enabled: bool) -> Self {
        self.tau_flight_length = enabled;
        self
    }
    /// Correlation between the hadronic visible-momentum response and the missing-momentum
    /// residual.
    pub fn with_had_tau_tf_correlation(mut self, rho: f64) -> Self {
        self.had_tau_tf_correlation = rho;
        self
    }
    /// Diagnostic verbosity: 1 logs a summary per bound event, 2 logs every evaluation.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }
    /// The power $`p`$ of the mass regularisation, `None` if it is off.
    pub fn log_m_power(&self) -> Option<f64> {
        self.log_m_power
    }
    /// The constrained di-tau mass in GeV.
    pub fn di_tau_mass_constraint(&self) -> Option<f64> {
        self.di_tau_mass_constraint
    }
    /// Whether decay vertices enter the likelihood.
    pub fn tau_flight_length(&self) -> bool {
        self.tau_flight_length
    }
    /// Correlation $`\rho`$ used by the missing-momentum response correction.
    pub fn had_tau_tf_correlation(&self) -> f64 {
        self.had_tau_tf_correlation
    }
    /// Diagnostic verbosity, see [`with_verbosity`](IntegrandConfig::with_verbosity).
    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }
}

/// Positions of one leg's quantities in the sampled point. `None` marks a quantity which is not
/// sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationParameters {
    /// Visible energy fraction
    pub idx_x: Option<usize>,
    /// Azimuth of the invisible system around the visible direction
    pub idx_phi: Option<usize>,
    /// Inverse of the visible transverse-momentum shift
    pub idx_vis_pt_shift: Option<usize>,
    /// Squared invariant mass of the invisible system
    pub idx_m_nunu: Option<usize>,
    /// Position of the decay within its allowed flight range
    pub idx_flight_length: Option<usize>,
}

impl IntegrationParameters {
    fn indices(&self) -> impl Iterator<Item = usize> {
        [
            self.idx_x,
            self.idx_phi,
            self.idx_vis_pt_shift,
            self.idx_m_nunu,
            self.idx_flight_length,
        ]
        .into_iter()
        .flatten()
    }
}

/// The physical interval $`[x_{min,i}, x_{max,i}]`$ each unit coordinate is mapped onto.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationRanges {
    x_min: Vec<f64>,
    x_max: Vec<f64>,
}

impl IntegrationRanges {
    pub fn new(x_min: Vec<f64>, x_max: Vec<f64>) -> SvfitResult<Self> {
        if x_min.len() != x_max.len() {
            return Err(SvfitError::DimensionError(format!(
                "{} lower bounds but {} upper bounds",
                x_min.len(),
                x_max.len()
            )));
        }
        if let Some(i) = x_min
            .iter()
            .zip(&x_max)
            .position(|(lo, hi)| !(lo.is_finite() && hi.is_finite() && lo <= hi))
        {
            return Err(SvfitError::DimensionError(format!(
                "invalid range [{}, {}] for dimension {i}",
                x_min[i], x_max[i]
            )));
        }
        Ok(Self { x_min, x_max })
    }
    pub fn len(&self) -> usize {
        self.x_min.len()
    }
    pub fn is_empty(&self) -> bool {
        self.x_min.is_empty()
    }
    pub fn x_min(&self) -> &[f64] {
        &self.x_min
    }
    pub fn x_max(&self) -> &[f64] {
        &self.x_max
    }
    /// Map unit coordinates `q` onto the physical ranges, writing into `x`.
    pub fn rescale_into(&self, q: &[f64], x: &mut [f64]) {
        for (((x, q), lo), hi) in x.iter_mut().zip(q).zip(&self.x_min).zip(&self.x_max) {
            *x = lerp(*q, *lo, *hi);
        }
    }
    /// Map unit coordinates `q` onto the physical ranges.
    pub fn rescale(&self, q: &[f64]) -> Vec<f64> {
        let mut x = vec![0.0; self.len()];
        self.rescale_into(q, &mut x);
        x
    }
    /// The inverse of [`rescale`](IntegrationRanges::rescale). Degenerate ranges map to zero.
    pub fn unscale(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(&self.x_min)
            .zip(&self.x_max)
            .map(|((x, lo), hi)| if hi > lo { (x - lo) / (hi - lo) } else { 0.0 })
            .collect()
    }
}

/// The likelihood of a pair of $`\tau`$ decays as a function of a point in the unit hypercube.
///
/// An [`Integrand`] is bound to one event at a time with [`Integrand::bind`]. Each call to
/// [`Integrand::evaluate`] maps the point onto the physical parameters of both legs, rebuilds the
/// fitted legs in place and multiplies the phase-space, flight-length and missing-momentum terms.
/// Points without a physical solution evaluate to zero; so does every point of an event with a
/// setup error.
///
/// Evaluation mutates the fitted legs and the cached terms, so an instance must only be used by one
/// sampler at a time. Independent events are integrated with independent instances.
pub struct Integrand {
    config: IntegrandConfig,
    event: Option<MeasuredEvent>,
    legs: [FittedLeg; 2],
    decay_types: [DecayType; 2],
    leg_params: [IntegrationParameters; 2],
    ranges: IntegrationRanges,
    num_dimensions: usize,
    x: Vec<f64>,
    had_tau_tfs: Option<[Box<dyn HadTauTF>; 2]>,
    flight_lengths: [Option<FlightLengthDensity>; 2],
    mvis2: f64,
    systematic: Option<usize>,
    prob_ps: f64,
    prob_flight_length: f64,
    error_codes: ErrorCodes,
    sink: Option<Box<dyn ResultSink>>,
}

impl Default for Integrand {
    fn default() -> Self {
        Self::new(IntegrandConfig::default())
    }
}

impl Integrand {
    pub fn new(config: IntegrandConfig) -> Self {
        Self {
            config,
            event: None,
            legs: [FittedLeg::new(0), FittedLeg::new(1)],
            decay_types: [DecayType::Prompt; 2],
            leg_params: Default::default(),
            ranges: IntegrationRanges::default(),
            num_dimensions: 0,
            x: Vec::new(),
            had_tau_tfs: None,
            flight_lengths: [None, None],
            mvis2: 0.0,
            systematic: None,
            prob_ps: 0.0,
            prob_flight_length: 1.0,
            error_codes: ErrorCodes::empty(),
            sink: None,
        }
    }

    pub fn config(&self) -> &IntegrandConfig {
        &self.config
    }

    /// Bind an event, check that it can be integrated and derive the default layout of the
    /// sampled point from it.
    ///
    /// The returned codes are also kept on the integrand; any of them makes every evaluation
    /// return zero until the next bind.
    pub fn bind(&mut self, event: &MeasuredEvent) -> ErrorCodes {
        self.error_codes.clear();
        self.event = None;
        self.flight_lengths = [None, None];
        self.systematic = None;
        self.prob_ps = 0.0;
        self.prob_flight_length = 1.0;

        let leptons = event.leptons();
        if leptons.len() != 2 {
            error!(n_leptons = leptons.len(), "an event must contain exactly two legs");
            self.error_codes.insert(ErrorCode::LeptonCountMismatch);
            return self.error_codes;
        }
        for (i, lepton) in leptons.iter().enumerate() {
            self.legs[i].set_measured_lepton(lepton);
            self.decay_types[i] = lepton.decay_type();
        }
        self.mvis2 = square(event.visible_mass());
        if let Some(tfs) = &mut self.had_tau_tfs {
            for (tf, lepton) in tfs.iter_mut().zip(leptons) {
                tf.set_decay_mode(lepton.decay_mode());
            }
        }
        if let Some(i) = event.met().iter().position(|met| !met.cov_inv_is_valid()) {
            error!(met_index = i, "missing-momentum covariance is not invertible");
            self.error_codes.insert(ErrorCode::SingularMEtCovariance);
        }
        if self.config.tau_flight_length {
            self.bind_flight_lengths(event);
        }
        self.event = Some(event.clone());
        self.set_default_layout();

        if self.config.verbosity >= 1 {
            debug!(
                mvis = self.mvis2.sqrt(),
                leg1 = %self.decay_types[0],
                leg2 = %self.decay_types[1],
                num_dimensions = self.num_dimensions,
                error_codes = %self.error_codes,
                "bound event"
            );
        }
        self.error_codes
    }

    fn bind_flight_lengths(&mut self, event: &MeasuredEvent) {
        let Some(primary_vertex) = event.primary_vertex() else {
            error!("flight-length reconstruction needs a primary vertex");
            self.error_codes
                .insert(ErrorCode::MissingPrimaryOrDecayVertex);
            return;
        };
        if !primary_vertex.cov_inv_is_valid() {
            error!("primary-vertex covariance is not invertible");
            self.error_codes.insert(ErrorCode::SingularVertexCovariance);
        }
        for (i, lepton) in event.leptons().iter().enumerate() {
            if lepton.is_prompt() {
                continue;
            }
            let Some(decay_vertex) = lepton.decay_vertex() else {
                error!(leg = i, "flight-length reconstruction needs a decay vertex");
                self.error_codes
                    .insert(ErrorCode::MissingPrimaryOrDecayVertex);
                continue;
            };
            if !decay_vertex.cov_inv_is_valid() {
                error!(leg = i, "decay-vertex covariance is not invertible");
                self.error_codes.insert(ErrorCode::SingularVertexCovariance);
            }
            let Some(lead_track) = lepton.lead_charged_hadron() else {
                error!(leg = i, "no leading charged daughter to anchor the decay vertex");
                self.error_codes
                    .insert(ErrorCode::MissingLeadingChargedDaughter);
                continue;
            };
            match FlightLengthDensity::new(decay_vertex, primary_vertex, &lead_track) {
                Some(density) => self.flight_lengths[i] = Some(density),
                None => {
                    error!(leg = i, "summed vertex covariance is not invertible");
                    self.error_codes.insert(ErrorCode::SingularVertexCovariance);
                }
            }
        }
    }

    fn set_default_layout(&mut self) {
        let mut x_min = Vec::new();
        let mut x_max = Vec::new();
        let mut push = |lo: f64, hi: f64| {
            x_min.push(lo);
            x_max.push(hi);
            Some(x_min.len() - 1)
        };
        let constrained = self.config.di_tau_mass_constraint.is_some();
        let with_tf = self.had_tau_tfs.is_some();
        for (i, decay_type) in self.decay_types.iter().enumerate() {
            let mut params = IntegrationParameters::default();
            if !decay_type.is_prompt() {
                if !(i == 1 && constrained) {
                    params.idx_x = push(0.0, 1.0);
                }
                params.idx_phi = push(0.0, 2.0 * PI);
                if decay_type.is_leptonic() {
                    params.idx_m_nunu = push(0.0, TAU_MASS2);
                }
                if decay_type.is_hadronic() && with_tf {
                    params.idx_vis_pt_shift = push(0.5, 2.0);
                }
                if self.config.tau_flight_length {
                    params.idx_flight_length = push(0.0, 1.0);
                }
            }
            self.leg_params[i] = params;
        }
        self.num_dimensions = x_min.len();
        self.x = vec![0.0; self.num_dimensions];
        self.ranges = IntegrationRanges { x_min, x_max };
    }

    /// Override the sampled-point layout of leg `leg`. Every index must lie below
    /// [`num_dimensions`](Integrand::num_dimensions); grow the point with
    /// [`set_num_dimensions`](Integrand::set_num_dimensions) first if needed.
    pub fn initialize_leg_integration_params(
        &mut self,
        leg: usize,
        params: IntegrationParameters,
    ) -> SvfitResult<()> {
        if let Some(index) = params.indices().find(|&index| index >= self.num_dimensions) {
            return Err(SvfitError::DimensionError(format!(
                "dimension index {index} of leg {leg} does not fit into {} dimensions",
                self.num_dimensions
            )));
        }
        let slot = self
            .leg_params
            .get_mut(leg)
            .ok_or_else(|| SvfitError::IndexError {
                index: leg,
                object: "legs".to_string(),
                length: 2,
            })?;
        *slot = params;
        Ok(())
    }

    pub fn leg_integration_params(&self, leg: usize) -> Option<&IntegrationParameters> {
        self.leg_params.get(leg)
    }

    /// Set the number of sampled dimensions. Every index of both legs must fit. If the number
    /// changes, the ranges are reset to $`[0, 1]`$ until
    /// [`set_integration_ranges`](Integrand::set_integration_ranges) replaces them.
    pub fn set_num_dimensions(&mut self, num_dimensions: usize) -> SvfitResult<()> {
        if let Some(index) = self
            .leg_params
            .iter()
            .flat_map(|params| params.indices())
            .find(|&index| index >= num_dimensions)
        {
            return Err(SvfitError::DimensionError(format!(
                "dimension index {index} does not fit into {num_dimensions} dimensions"
            )));
        }
        if self.ranges.len() != num_dimensions {
            self.ranges = IntegrationRanges {
                x_min: vec![0.0; num_dimensions],
                x_max: vec![1.0; num_dimensions],
            };
        }
        self.num_dimensions = num_dimensions;
        self.x = vec![0.0; num_dimensions];
        Ok(())
    }

    pub fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    /// Replace the physical ranges. Their number must match the number of dimensions.
    pub fn set_integration_ranges(&mut self, ranges: IntegrationRanges) -> SvfitResult<()> {
        if ranges.len() != self.num_dimensions {
            return Err(SvfitError::DimensionError(format!(
                "{} ranges for {} dimensions",
                ranges.len(),
                self.num_dimensions
            )));
        }
        self.ranges = ranges;
        Ok(())
    }

    pub fn integration_ranges(&self) -> &IntegrationRanges {
        &self.ranges
    }

    /// Map a unit-hypercube point onto the physical ranges.
    pub fn rescale(&self, q: &[f64]) -> Vec<f64> {
        self.ranges.rescale(q)
    }

    /// Sample the visible transverse momentum of hadronic legs and weight it with `tf`. One clone
    /// of the model is kept per leg. Takes effect at the next [`bind`](Integrand::bind).
    pub fn enable_had_tau_tf(&mut self, tf: Box<dyn HadTauTF>, rho: f64) {
        self.had_tau_tfs = Some([tf.clone(), tf]);
        self.config.had_tau_tf_correlation = rho;
    }

    /// Takes effect at the next [`bind`](Integrand::bind).
    pub fn disable_had_tau_tf(&mut self) {
        self.had_tau_tfs = None;
        self.config.had_tau_tf_correlation = 0.0;
    }

    pub fn had_tau_tf_enabled(&self) -> bool {
        self.had_tau_tfs.is_some()
    }

    /// Evaluate against the central missing-momentum measurement.
    pub fn set_central(&mut self) {
        self.systematic = None;
    }

    /// Evaluate against the systematic alternative `index`, which is entry `index + 1` of the
    /// bound event's missing-momentum measurements.
    ///
    /// Alternative 0 recomputes the phase-space and flight-length terms; later alternatives reuse
    /// them, so for each sample point alternative 0 must be evaluated first.
    pub fn set_met_systematic(&mut self, index: usize) -> SvfitResult<()> {
        let event = self.event.as_ref().ok_or(SvfitError::NotBound)?;
        let n_systematics = event.met().len() - 1;
        if index >= n_systematics {
            return Err(SvfitError::IndexError {
                index,
                object: "missing-momentum systematics".to_string(),
                length: n_systematics,
            });
        }
        self.systematic = Some(index);
        Ok(())
    }

    pub fn error_codes(&self) -> ErrorCodes {
        self.error_codes
    }

    pub fn legs(&self) -> &[FittedLeg; 2] {
        &self.legs
    }

    /// Report every accepted point to `sink`.
    pub fn attach_sink(&mut self, sink: Box<dyn ResultSink>) {
        self.sink = Some(sink);
    }

    pub fn detach_sink(&mut self) -> Option<Box<dyn ResultSink>> {
        self.sink.take()
    }

    /// The integrand value at unit-hypercube point `q`.
    ///
    /// Never negative and never NaN. Returns zero for points without a physical solution, for
    /// events with a setup error, before any event is bound and for points of the wrong length.
    pub fn evaluate(&mut self, q: &[f64]) -> f64 {
        if self.event.is_none() || self.error_codes.is_fatal() {
            return 0.0;
        }
        if q.len() != self.num_dimensions {
            error!(
                expected = self.num_dimensions,
                got = q.len(),
                "sample point has the wrong number of dimensions"
            );
            return 0.0;
        }
        self.ranges.rescale_into(q, &mut self.x);
        if self.systematic.map_or(true, |index| index == 0) {
            self.prob_ps = self.eval_ps().unwrap_or_else(|err| {
                error!(%err, "phase-space term");
                0.0
            });
            if self.error_codes.contains(ErrorCode::UnphysicalKinematics) {
                return 0.0;
            }
            self.prob_flight_length = self.eval_flight_length().unwrap_or_else(|err| {
                error!(%err, "flight-length term");
                0.0
            });
        }
        if !(self.prob_ps * self.prob_flight_length > PROB_FLOOR) {
            return 0.0;
        }
        let met_index = self.systematic.map_or(0, |index| index + 1);
        let prob_met = self.eval_met_tf(met_index);
        let mut prob = self.prob_ps * self.prob_flight_length * prob_met;
        if prob.is_nan() {
            prob = 0.0;
        }
        if self.config.verbosity >= 2 {
            trace!(
                ps = self.prob_ps,
                flight_length = self.prob_flight_length,
                met = prob_met,
                prob,
                "evaluated"
            );
        }
        if prob > PROB_FLOOR {
            if let Some(sink) = &mut self.sink {
                sink.notify(&self.legs, prob);
            }
        }
        prob
    }

    fn sampled(&self, index: Option<usize>, leg: usize, what: &str) -> SvfitResult<f64> {
        index
            .and_then(|i| self.x.get(i).copied())
            .ok_or_else(|| {
                SvfitError::DimensionError(format!("no sampled dimension for {what} of leg {leg}"))
            })
    }

    fn vis_pt_shifts(&self) -> SvfitResult<[f64; 2]> {
        let mut shifts = [1.0; 2];
        if self.had_tau_tfs.is_none() {
            return Ok(shifts);
        }
        for (i, shift) in shifts.iter_mut().enumerate() {
            let index = self.leg_params[i].idx_vis_pt_shift;
            if index.is_some() && !self.decay_types[i].is_leptonic() {
                *shift = 1.0 / self.sampled(index, i, "visible-pt shift")?;
            }
        }
        Ok(shifts)
    }

    fn update_leg(&mut self, leg: usize, x: f64) -> SvfitResult<bool> {
        let params = self.leg_params[leg];
        let phi = self.sampled(params.idx_phi, leg, "phi")?;
        let nu_mass = match params.idx_m_nunu {
            Some(_) => self.sampled(params.idx_m_nunu, leg, "m_nunu")?.sqrt(),
            None => 0.0,
        };
        self.legs[leg].update_tau_momentum(x, phi, nu_mass)?;
        if self.legs[leg].is_error() {
            self.error_codes.insert(ErrorCode::UnphysicalKinematics);
            return Ok(false);
        }
        Ok(true)
    }

    fn eval_ps(&mut self) -> SvfitResult<f64> {
        self.error_codes.remove(ErrorCode::UnphysicalKinematics);

        let shifts = self.vis_pt_shifts()?;
        if !shifts.iter().all(|&shift| shift >= MIN_VIS_PT_SHIFT) {
            return Ok(0.0);
        }
        for (leg, shift) in self.legs.iter_mut().zip(shifts) {
            leg.update_vis_momentum(shift)?;
        }

        let x1_dash = if self.decay_types[0].is_prompt() {
            1.0
        } else {
            self.sampled(self.leg_params[0].idx_x, 0, "x")?
        };
        let x1 = x1_dash / shifts[0];
        if !(MIN_X..=1.0).contains(&x1) {
            return Ok(0.0);
        }
        if !self.decay_types[0].is_prompt() && !self.update_leg(0, x1)? {
            return Ok(0.0);
        }

        let x2_dash = if self.decay_types[1].is_prompt() {
            1.0
        } else {
            match (self.leg_params[1].idx_x, self.config.di_tau_mass_constraint) {
                (Some(i), _) => self.sampled(Some(i), 1, "x")?,
                (None, Some(mass)) => (self.mvis2 / square(mass)) / x1_dash,
                (None, None) => self.sampled(None, 1, "x")?,
            }
        };
        let x2 = x2_dash / shifts[1];
        if !(MIN_X..=1.0).contains(&x2) {
            return Ok(0.0);
        }
        if !self.decay_types[1].is_prompt() && !self.update_leg(1, x2)? {
            return Ok(0.0);
        }

        if self.config.verbosity >= 2 {
            for leg in &self.legs {
                trace!(
                    leg = leg.index(),
                    x = leg.x(),
                    vis = %leg.vis_p4(),
                    nu = %leg.nu_p4(),
                    tau = %leg.tau_p4(),
                    "fitted leg"
                );
            }
        }

        let mut prob_decay = 1.0;
        let mut prob_tf = 1.0;
        for (i, leg) in self.legs.iter().enumerate() {
            prob_decay *= tau_decay_density(leg);
            let Some(tfs) = &self.had_tau_tfs else {
                continue;
            };
            if self.leg_params[i].idx_vis_pt_shift.is_some() && self.decay_types[i].is_hadronic() {
                let measured = leg.measured_lepton().ok_or(SvfitError::NotBound)?;
                let vis_p4 = leg.vis_p4();
                let prob = tfs[i].density(measured.pt(), vis_p4.pt(), vis_p4.eta());
                if self.config.verbosity >= 2 {
                    trace!(leg = i, rec_pt = measured.pt(), gen_pt = vis_p4.pt(), prob, "TF");
                }
                prob_tf *= prob;
            }
        }
        let prob_ps_and_decay = CONST_FACTOR * prob_decay * MATRIX_ELEMENT_NORM;

        let mass = (self.legs[0].tau_p4() + self.legs[1].tau_p4()).m();
        let prob_log_m = self
            .config
            .log_m_power
            .map_or(1.0, |power| 1.0 / mass.max(1.0).powf(power));

        let mut jacobian = 1.0 / (shifts[0] * shifts[1]);
        if let Some(constraint) = self.config.di_tau_mass_constraint {
            jacobian *= 2.0 * x2 / constraint;
        }

        let prob = prob_ps_and_decay * prob_tf * prob_log_m * jacobian;
        if self.config.verbosity >= 2 {
            trace!(
                mass,
                ps_and_decay = prob_ps_and_decay,
                tf = prob_tf,
                log_m = prob_log_m,
                jacobian,
                prob,
                "phase-space term"
            );
        }
        Ok(if prob.is_nan() { 0.0 } else { prob })
    }

    fn eval_flight_length(&self) -> SvfitResult<f64> {
        if !self.config.tau_flight_length {
            return Ok(1.0);
        }
        let event = self.event.as_ref().ok_or(SvfitError::NotBound)?;
        let primary_vertex = event
            .primary_vertex()
            .ok_or(SvfitError::NotBound)?
            .position();
        let mut prob = 1.0;
        for (i, leg) in self.legs.iter().enumerate() {
            if self.decay_types[i].is_prompt() {
                continue;
            }
            let density = self.flight_lengths[i]
                .as_ref()
                .ok_or(SvfitError::NotBound)?;
            let q = self.sampled(self.leg_params[i].idx_flight_length, i, "flight length")?;
            let prob_i = density.probability(&leg.tau_p4(), &primary_vertex, q);
            if self.config.verbosity >= 2 {
                trace!(leg = i, prob = prob_i, "flight-length term");
            }
            prob *= prob_i;
        }
        Ok(prob)
    }

    fn eval_met_tf(&self, met_index: usize) -> f64 {
        let Some(met) = self.event.as_ref().and_then(|e| e.met().get(met_index)) else {
            return 0.0;
        };
        let nu_sum = self.legs[0].nu_p4() + self.legs[1].nu_p4();
        let mut residual = met_residual(met, &nu_sum);
        let rho = self.config.had_tau_tf_correlation;
        if self.had_tau_tfs.is_some() && rho != 0.0 {
            for (i, leg) in self.legs.iter().enumerate() {
                let (Some(index), Some(measured)) =
                    (self.leg_params[i].idx_vis_pt_shift, leg.measured_lepton())
                else {
                    continue;
                };
                if !measured.is_hadronic() {
                    continue;
                }
                let Some(&sampled) = self.x.get(index) else {
                    continue;
                };
                let shift = 1.0 / sampled;
                if shift < MIN_VIS_PT_SHIFT {
                    continue;
                }
                residual = residual + response_correction(rho, shift, &measured.p4());
            }
        }
        let prob = met_transfer_function(met, &residual);
        if self.config.verbosity >= 2 {
            trace!(met_index, nu_sum = %nu_sum, prob, "missing-momentum term");
        }
        prob
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{Matrix2, Matrix3, Matrix4};
    use svfit_core::{
        data::test_event, LeadChargedHadron, MeasuredLepton, MeasuredMEt, Vec3, Vertex,
    };
    use svfit_densities::GaussianHadTauTF;

    use super::*;

    fn bound(config: IntegrandConfig) -> Integrand {
        let mut integrand = Integrand::new(config);
        assert!(integrand.bind(&test_event()).is_empty());
        integrand
    }

    #[test]
    fn test_config_builders() {
        let config = IntegrandConfig::default();
        assert_eq!(config.log_m_power(), Some(6.0));
        assert_eq!(config.di_tau_mass_constraint(), None);
        let config = config
            .without_log_m()
            .with_di_tau_mass_constraint(125.06)
            .with_tau_flight_length(true)
            .with_had_tau_tf_correlation(0.3)
            .with_verbosity(2);
        assert_eq!(config.log_m_power(), None);
        assert_eq!(config.di_tau_mass_constraint(), Some(125.06));
        assert!(config.tau_flight_length());
        assert_eq!(config.had_tau_tf_correlation(), 0.3);
        assert_eq!(config.verbosity(), 2);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: IntegrandConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(
            config.with_di_tau_mass_constraint(-1.0).di_tau_mass_constraint(),
            None
        );
    }

    #[test]
    fn test_ranges_validation() {
        assert!(IntegrationRanges::new(vec![0.0], vec![1.0, 2.0]).is_err());
        assert!(IntegrationRanges::new(vec![1.0], vec![0.0]).is_err());
        assert!(IntegrationRanges::new(vec![f64::NAN], vec![0.0]).is_err());
        let ranges = IntegrationRanges::new(vec![0.0, -1.0, 2.0], vec![1.0, 1.0, 2.0]).unwrap();
        let x = ranges.rescale(&[0.25, 0.5, 0.7]);
        assert_eq!(x, vec![0.25, 0.0, 2.0]);
        assert_eq!(ranges.unscale(&x), vec![0.25, 0.5, 0.0]);
    }

    #[test]
    fn test_default_layout() {
        let integrand = bound(IntegrandConfig::default());
        // electron leg: x, phi, m_nunu; hadronic leg: x, phi
        assert_eq!(integrand.num_dimensions(), 5);
        let leg1 = integrand.leg_integration_params(0).unwrap();
        assert_eq!(leg1.idx_m_nunu, Some(2));
        let leg2 = integrand.leg_integration_params(1).unwrap();
        assert_eq!(leg2.idx_x, Some(3));
        assert_eq!(leg2.idx_vis_pt_shift, None);
        assert_relative_eq!(integrand.integration_ranges().x_max()[4], 2.0 * PI);

        let constrained = bound(IntegrandConfig::default().with_di_tau_mass_constraint(125.0));
        assert_eq!(constrained.num_dimensions(), 4);
        assert_eq!(constrained.leg_integration_params(1).unwrap().idx_x, None);

        let mut with_tf = Integrand::default();
        with_tf.enable_had_tau_tf(Box::new(GaussianHadTauTF::default()), 0.0);
        with_tf.bind(&test_event());
        assert_eq!(with_tf.num_dimensions(), 6);
        let leg2 = with_tf.leg_integration_params(1).unwrap();
        assert_eq!(leg2.idx_vis_pt_shift, Some(5));
        assert_eq!(with_tf.integration_ranges().x_min()[5], 0.5);
    }

    #[test]
    fn test_layout_overrides() {
        let mut integrand = bound(IntegrandConfig::default());
        assert!(integrand
            .initialize_leg_integration_params(2, IntegrationParameters::default())
            .is_err());
        assert!(integrand.set_num_dimensions(3).is_err());
        assert!(integrand
            .set_integration_ranges(IntegrationRanges::new(vec![0.0], vec![1.0]).unwrap())
            .is_err());
        let params = IntegrationParameters {
            idx_x: Some(0),
            idx_phi: Some(1),
            ..Default::default()
        };
        integrand
            .initialize_leg_integration_params(0, params)
            .unwrap();
        integrand
            .initialize_leg_integration_params(
                1,
                IntegrationParameters {
                    idx_x: Some(2),
                    idx_phi: Some(3),
                    ..Default::default()
                },
            )
            .unwrap();
        integrand.set_num_dimensions(4).unwrap();
        integrand
            .set_integration_ranges(
                IntegrationRanges::new(vec![0.0; 4], vec![1.0, 2.0 * PI, 1.0, 2.0 * PI]).unwrap(),
            )
            .unwrap();
        let value = integrand.evaluate(&[0.5, 0.5, 0.5, 0.5]);
        assert!(value.is_finite() && value >= 0.0);
    }

    #[test]
    fn test_override_indices_must_fit() {
        let mut integrand = bound(IntegrandConfig::default());
        let before = *integrand.leg_integration_params(0).unwrap();
        let out_of_range = IntegrationParameters {
            idx_x: Some(0),
            idx_phi: Some(1),
            idx_m_nunu: Some(9),
            ..Default::default()
        };
        assert!(matches!(
            integrand.initialize_leg_integration_params(0, out_of_range),
            Err(SvfitError::DimensionError(_))
        ));
        assert_eq!(integrand.leg_integration_params(0), Some(&before));

        integrand.set_num_dimensions(10).unwrap();
        assert_eq!(integrand.integration_ranges().len(), 10);
        assert_eq!(integrand.integration_ranges().x_max(), &[1.0; 10]);
        integrand
            .initialize_leg_integration_params(0, out_of_range)
            .unwrap();
        assert!(integrand.set_num_dimensions(5).is_err());
        let value = integrand.evaluate(&[0.5; 10]);
        assert!(value.is_finite() && value >= 0.0);
    }

    #[test]
    fn test_missing_dimension_evaluates_to_zero() {
        let mut integrand = bound(IntegrandConfig::default());
        // electron leg without its invisible-mass dimension is still evaluated with m_nunu = 0
        let no_m_nunu = IntegrationParameters {
            idx_x: Some(0),
            idx_phi: Some(1),
            ..Default::default()
        };
        integrand
            .initialize_leg_integration_params(0, no_m_nunu)
            .unwrap();
        assert!(integrand.evaluate(&[0.4, 0.3, 0.2, 0.5, 0.6]).is_finite());
        let no_phi = IntegrationParameters {
            idx_x: Some(0),
            ..Default::default()
        };
        integrand
            .initialize_leg_integration_params(0, no_phi)
            .unwrap();
        assert_eq!(integrand.evaluate(&[0.4, 0.3, 0.2, 0.5, 0.6]), 0.0);
    }

    #[test]
    fn test_mass_constraint_jacobian() {
        let mass = 125.06;
        let mvis2 = square(test_event().visible_mass());
        let mut constrained = bound(IntegrandConfig::default().with_di_tau_mass_constraint(mass));
        let mut free = bound(IntegrandConfig::default());
        let mut rng = fastrand::Rng::with_seed(11);
        let mut n_compared = 0;
        for _ in 0..500 {
            let q: Vec<f64> = (0..4).map(|_| rng.f64()).collect();
            let x2 = (mvis2 / square(mass)) / q[0];
            if x2 > 1.0 {
                continue;
            }
            let value = constrained.evaluate(&q);
            let reference = free.evaluate(&[q[0], q[1], q[2], x2, q[3]]);
            assert_relative_eq!(
                value,
                reference * 2.0 * x2 / mass,
                max_relative = 1e-10
            );
            if value > 0.0 {
                n_compared += 1;
            }
        }
        assert!(n_compared > 0);
    }

    #[test]
    fn test_four_dimensional_missing_momentum() {
        let event = test_event();
        let (pz, energy) = (20.0, 90.0);
        let cov = Matrix4::new(
            787.352, -178.63, 0.0, 0.0, -178.63, 179.545, 0.0, 0.0, 0.0, 0.0, 1.0e4, 0.0, 0.0, 0.0,
            0.0, 1.0e4,
        );
        let met = MeasuredMEt::new_4d(event.met()[0].px(), event.met()[0].py(), pz, energy, cov);
        let full = MeasuredEvent::new(event.leptons().to_vec(), vec![met]).unwrap();
        let mut integrand = Integrand::default();
        assert!(integrand.bind(&full).is_empty());
        let mut transverse = bound(IntegrandConfig::default());

        let mut rng = fastrand::Rng::with_seed(3);
        let mut n_compared = 0;
        for _ in 0..500 {
            let q: Vec<f64> = (0..5).map(|_| rng.f64()).collect();
            let value = integrand.evaluate(&q);
            let reference = transverse.evaluate(&q);
            if reference == 0.0 {
                assert_eq!(value, 0.0);
                continue;
            }
            let nu_sum = integrand.legs()[0].nu_p4() + integrand.legs()[1].nu_p4();
            let pull2 = (square(pz - nu_sum.pz()) + square(energy - nu_sum.e())) / 1.0e4;
            let factor = (-0.5 * pull2).exp() / (2.0 * PI * 1.0e4);
            assert_relative_eq!(value, reference * factor, max_relative = 1e-9);
            n_compared += 1;
        }
        assert!(n_compared > 0);
    }

    fn displaced_vertex(lepton: &MeasuredLepton, length: f64) -> Vertex {
        let u = lepton.p3().unit();
        let tilt = u.cross(&Vec3::new(0.0, 0.0, 1.0)).unit();
        Vertex::new((u + tilt * 0.01).unit() * length, Matrix3::identity() * 1.0e-4)
    }

    fn event_with_vertices() -> MeasuredEvent {
        let event = test_event();
        let [electron, hadron] = [&event.leptons()[0], &event.leptons()[1]];
        let leptons = vec![
            electron
                .clone()
                .with_decay_vertex(displaced_vertex(electron, 0.3)),
            hadron
                .clone()
                .with_decay_vertex(displaced_vertex(hadron, 0.2))
                .with_lead_charged_hadron(LeadChargedHadron::new(
                    -1, 25.7322, 0.618228, 2.79362, 0.13957,
                )),
        ];
        MeasuredEvent::new(leptons, event.met().to_vec())
            .unwrap()
            .with_primary_vertex(Vertex::new(Vec3::zero(), Matrix3::identity() * 1.0e-4))
    }

    #[test]
    fn test_flight_length_term() {
        let event = event_with_vertices();
        let mut integrand = Integrand::new(IntegrandConfig::default().with_tau_flight_length(true));
        assert!(integrand.bind(&event).is_empty());
        // electron leg: x, phi, m_nunu, flight; hadronic leg: x, phi, flight
        assert_eq!(integrand.num_dimensions(), 7);
        assert_eq!(
            integrand.leg_integration_params(1).unwrap().idx_flight_length,
            Some(6)
        );
        let mut plain = bound(IntegrandConfig::default());
        assert!(plain.bind(&event).is_empty());

        let primary_vertex = event.primary_vertex().unwrap();
        let densities: Vec<FlightLengthDensity> = event
            .leptons()
            .iter()
            .map(|lepton| {
                FlightLengthDensity::new(
                    lepton.decay_vertex().unwrap(),
                    primary_vertex,
                    &lepton.lead_charged_hadron().unwrap(),
                )
                .unwrap()
            })
            .collect();

        let mut rng = fastrand::Rng::with_seed(17);
        let mut n_nonzero = 0;
        for _ in 0..2000 {
            let q: Vec<f64> = (0..7).map(|_| rng.f64()).collect();
            let value = integrand.evaluate(&q);
            assert!(value.is_finite() && value >= 0.0, "q = {q:?}");
            if value == 0.0 {
                continue;
            }
            n_nonzero += 1;
            let without = plain.evaluate(&[q[0], q[1], q[2], q[4], q[5]]);
            let legs = integrand.legs();
            let flight = densities[0].probability(
                &legs[0].tau_p4(),
                &primary_vertex.position(),
                q[3],
            ) * densities[1].probability(&legs[1].tau_p4(), &primary_vertex.position(), q[6]);
            assert_relative_eq!(value, without * flight, max_relative = 1e-12);
        }
        assert!(n_nonzero > 0);
    }

    #[test]
    fn test_setup_errors() {
        let event = test_event();
        let mut integrand = Integrand::default();
        let one_leg = MeasuredEvent::new(vec![event.leptons()[0].clone()], event.met().to_vec())
            .unwrap();
        let codes = integrand.bind(&one_leg);
        assert!(codes.contains(ErrorCode::LeptonCountMismatch));
        assert_eq!(integrand.evaluate(&[0.5; 5]), 0.0);

        let singular = MeasuredEvent::new(
            event.leptons().to_vec(),
            vec![MeasuredMEt::new(10.0, 10.0, Matrix2::zeros())],
        )
        .unwrap();
        let codes = integrand.bind(&singular);
        assert!(codes.contains(ErrorCode::SingularMEtCovariance));
        assert!(codes.is_fatal());
        assert_eq!(integrand.evaluate(&[0.5; 5]), 0.0);

        let mut flight = Integrand::new(IntegrandConfig::default().with_tau_flight_length(true));
        let codes = flight.bind(&event);
        assert!(codes.contains(ErrorCode::MissingPrimaryOrDecayVertex));
    }

    #[test]
    fn test_unbound_and_wrong_length() {
        let mut integrand = Integrand::default();
        assert_eq!(integrand.evaluate(&[0.5; 5]), 0.0);
        let mut integrand = bound(IntegrandConfig::default());
        assert_eq!(integrand.evaluate(&[0.5; 3]), 0.0);
    }

    #[test]
    fn test_evaluate_is_finite_and_non_negative() {
        let mut integrand = bound(IntegrandConfig::default());
        let mut rng = fastrand::Rng::with_seed(7);
        let mut n_nonzero = 0;
        for _ in 0..2000 {
            let q: Vec<f64> = (0..5).map(|_| rng.f64()).collect();
            let value = integrand.evaluate(&q);
            assert!(value.is_finite() && value >= 0.0, "q = {q:?}");
            if value > 0.0 {
                n_nonzero += 1;
                for leg in integrand.legs() {
                    assert!(leg.x() > 0.0 && leg.x() <= 1.0);
                }
            }
        }
        assert!(n_nonzero > 0);
    }

    #[test]
    fn test_unphysical_point_is_transient() {
        let mut integrand = bound(IntegrandConfig::default());
        // largest invisible mass at the largest visible fraction has no solution
        assert_eq!(integrand.evaluate(&[0.999, 0.3, 1.0, 0.5, 0.3]), 0.0);
        assert!(integrand
            .error_codes()
            .contains(ErrorCode::UnphysicalKinematics));
        assert!(!integrand.error_codes().is_fatal());
        integrand.evaluate(&[0.4, 0.3, 0.01, 0.5, 0.3]);
        assert!(!integrand
            .error_codes()
            .contains(ErrorCode::UnphysicalKinematics));
    }

    #[test]
    fn test_met_systematics() {
        let event = test_event();
        let cov = Matrix2::new(787.352, -178.63, -178.63, 179.545);
        let mut met = event.met().to_vec();
        met.push(MeasuredMEt::new(14.0, -49.0, cov));
        met.push(MeasuredMEt::new(9.0, -55.0, cov));
        let event = MeasuredEvent::new(event.leptons().to_vec(), met).unwrap();

        let mut integrand = Integrand::default();
        assert!(matches!(
            integrand.set_met_systematic(0),
            Err(SvfitError::NotBound)
        ));
        integrand.bind(&event);
        assert!(integrand.set_met_systematic(2).is_err());

        let q = [0.4, 0.3, 0.2, 0.5, 0.6];
        let central = integrand.evaluate(&q);
        assert!(central > 0.0);
        integrand.set_met_systematic(0).unwrap();
        let up = integrand.evaluate(&q);
        integrand.set_met_systematic(1).unwrap();
        let down = integrand.evaluate(&q);

        let mut reference = bound(IntegrandConfig::default());
        let shifted = MeasuredEvent::new(event.leptons().to_vec(), vec![event.met()[2].clone()])
            .unwrap();
        reference.bind(&shifted);
        assert_relative_eq!(down, reference.evaluate(&q), max_relative = 1e-12);
        assert!(up != central && down != central);
        integrand.set_central();
        assert_relative_eq!(integrand.evaluate(&q), central, max_relative = 1e-14);
    }

    #[test]
    fn test_had_tau_tf_weights_the_point() {
        let mut integrand = Integrand::default();
        integrand.enable_had_tau_tf(Box::new(GaussianHadTauTF::new(1.0, 0.1)), 0.0);
        assert!(integrand.had_tau_tf_enabled());
        integrand.bind(&test_event());
        // q = 1/3 maps to an inverse shift of 1
        let base = [0.4, 0.3, 0.2, 0.5, 0.6];
        let mut q = base.to_vec();
        q.push(1.0 / 3.0);
        let with_tf = integrand.evaluate(&q);

        let mut plain = bound(IntegrandConfig::default());
        let without_tf = plain.evaluate(&base);
        let vis_pt = test_event().leptons()[1].pt();
        let peak = GaussianHadTauTF::new(1.0, 0.1).density(vis_pt, vis_pt, 0.0);
        assert_relative_eq!(with_tf, without_tf * peak, max_relative = 1e-9);

        integrand.disable_had_tau_tf();
        integrand.bind(&test_event());
        assert_eq!(integrand.num_dimensions(), 5);
    }

    #[test]
    fn test_sink_receives_accepted_points() {
        use std::sync::Arc;

        use parking_lot::Mutex;

        use crate::sink::DiTauAccumulator;

        let shared = Arc::new(Mutex::new(DiTauAccumulator::new()));
        let mut integrand = bound(IntegrandConfig::default());
        integrand.attach_sink(Box::new(shared.clone()));
        let value = integrand.evaluate(&[0.4, 0.3, 0.2, 0.5, 0.6]);
        assert!(value > 0.0);
        integrand.evaluate(&[0.999, 0.3, 1.0, 0.5, 0.3]);
        assert_eq!(shared.lock().len(), 1);
        assert_eq!(shared.lock().sum_of_weights(), value);
        assert!(integrand.detach_sink().is_some());
    }
}
