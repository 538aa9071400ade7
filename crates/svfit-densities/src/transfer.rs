use std::{f64::consts::PI, fmt::Debug};

use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};
use svfit_core::HadronicDecayMode;

/// A detector response model for the visible transverse momentum of a hadronic decay.
///
/// Implementors give the density of measuring `rec_pt` when the true visible momentum is
/// `gen_pt` at pseudorapidity `gen_eta`. The integrand keeps one clone of the model per leg and
/// tells each clone the reconstructed decay mode of its leg with
/// [`set_decay_mode`](HadTauTF::set_decay_mode) when an event is bound, so a model may keep
/// mode-dependent state.
///
/// Models are serialized with their type name under the `type` key, so a boxed model can be
/// round-tripped through a configuration file.
#[typetag::serde(tag = "type")]
pub trait HadTauTF: DynClone + Debug + Send + Sync {
    /// Select the decay mode used by subsequent calls to [`density`](HadTauTF::density).
    fn set_decay_mode(&mut self, mode: HadronicDecayMode);
    /// Density of the measured transverse momentum given the true one.
    fn density(&self, rec_pt: f64, gen_pt: f64, gen_eta: f64) -> f64;
}

dyn_clone::clone_trait_object!(HadTauTF);

/// A Gaussian response with a relative resolution, optionally specialised per decay mode:
///
/// ```math
/// f(p_T^{rec} | p_T^{gen}) = \frac{1}{\sqrt{2\pi}\sigma}
/// \exp\left(-\frac{(p_T^{rec} - s\,p_T^{gen})^2}{2\sigma^2}\right),\quad \sigma = r\,p_T^{gen}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianHadTauTF {
    scale: f64,
    resolution: f64,
    mode_resolutions: Vec<(HadronicDecayMode, f64)>,
    #[serde(skip)]
    decay_mode: HadronicDecayMode,
}

impl Default for GaussianHadTauTF {
    fn default() -> Self {
        Self::new(1.0, 0.1)
    }
}

impl GaussianHadTauTF {
    /// A response with mean `scale * gen_pt` and width `resolution * gen_pt` for all modes.
    pub fn new(scale: f64, resolution: f64) -> Self {
        Self {
            scale,
            resolution,
            mode_resolutions: Vec::new(),
            decay_mode: HadronicDecayMode::Unknown,
        }
    }

    /// Use a different relative resolution for one decay mode.
    pub fn with_mode_resolution(mut self, mode: HadronicDecayMode, resolution: f64) -> Self {
        match self.mode_resolutions.iter_mut().find(|(m, _)| *m == mode) {
            Some(entry) => entry.1 = resolution,
            None => self.mode_resolutions.push((mode, resolution)),
        }
        self
    }

    /// The relative resolution applied to the current decay mode.
    pub fn resolution(&self) -> f64 {
        self.mode_resolutions
            .iter()
            .find(|(m, _)| *m == self.decay_mode)
            .map_or(self.resolution, |(_, r)| *r)
    }

    pub fn decay_mode(&self) -> HadronicDecayMode {
        self.decay_mode
    }
}

#[typetag::serde]
impl HadTauTF for GaussianHadTauTF {
    fn set_decay_mode(&mut self, mode: HadronicDecayMode) {
        self.decay_mode = mode;
    }

    fn density(&self, rec_pt: f64, gen_pt: f64, _gen_eta: f64) -> f64 {
        let sigma = self.resolution() * gen_pt;
        if !(sigma > 0.0) {
            return 0.0;
        }
        let pull = (rec_pt - self.scale * gen_pt) / sigma;
        (-0.5 * pull * pull).exp() / ((2.0 * PI).sqrt() * sigma)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_gaussian_peak() {
        let tf = GaussianHadTauTF::new(1.0, 0.1);
        let peak = tf.density(40.0, 40.0, 0.3);
        assert_relative_eq!(peak, 1.0 / ((2.0 * PI).sqrt() * 4.0), max_relative = 1e-12);
        assert!(tf.density(44.0, 40.0, 0.3) < peak);
        assert_relative_eq!(
            tf.density(44.0, 40.0, 0.3),
            peak * (-0.5_f64).exp(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_mode_override() {
        let mut tf = GaussianHadTauTF::new(1.0, 0.1)
            .with_mode_resolution(HadronicDecayMode::ThreeProng0Pi0, 0.2)
            .with_mode_resolution(HadronicDecayMode::ThreeProng0Pi0, 0.25);
        assert_eq!(tf.resolution(), 0.1);
        tf.set_decay_mode(HadronicDecayMode::ThreeProng0Pi0);
        assert_eq!(tf.resolution(), 0.25);
        tf.set_decay_mode(HadronicDecayMode::OneProng1Pi0);
        assert_eq!(tf.resolution(), 0.1);
    }

    #[test]
    fn test_degenerate_width() {
        let tf = GaussianHadTauTF::new(1.0, 0.1);
        assert_eq!(tf.density(10.0, 0.0, 0.0), 0.0);
        assert_eq!(tf.density(10.0, f64::NAN, 0.0), 0.0);
    }

    #[test]
    fn test_boxed_clones_are_independent() {
        let boxed: Box<dyn HadTauTF> = Box::new(GaussianHadTauTF::new(1.0, 0.1).with_mode_resolution(
            HadronicDecayMode::OneProng0Pi0,
            0.05,
        ));
        let mut a = boxed.clone();
        let b = boxed.clone();
        a.set_decay_mode(HadronicDecayMode::OneProng0Pi0);
        assert!(a.density(40.0, 40.0, 0.0) > b.density(40.0, 40.0, 0.0));
    }

    #[test]
    fn test_serde_tagged() {
        let boxed: Box<dyn HadTauTF> = Box::new(GaussianHadTauTF::new(0.98, 0.12));
        let json = serde_json::to_string(&boxed).unwrap();
        assert!(json.contains("GaussianHadTauTF"));
        let back: Box<dyn HadTauTF> = serde_json::from_str(&json).unwrap();
        assert_relative_eq!(
            back.density(30.0, 31.0, 1.0),
            boxed.density(30.0, 31.0, 1.0),
            max_relative = 1e-14
        );
    }
}
