use crate::{
    fitted::FittedLeg,
    utils::{
        enums::Sign,
        vectors::{Vec3, Vec4},
    },
    SvfitError, SvfitResult,
};

/// Beam energy in GeV used to define the beam axis.
const BEAM_ENERGY: f64 = 7.0e3;
/// Proton mass in GeV
const BEAM_PARTICLE_MASS: f64 = 0.938272;
/// Largest excess of $`|\cos\theta|`$ over one which is treated as rounding.
const COS_THETA_TOLERANCE: f64 = 0.01;

/// Clamp a cosine into $`[-1, 1]`$, absorbing rounding errors up to
/// [`COS_THETA_TOLERANCE`].
///
/// # Panics
///
/// Panics if the cosine lies further outside the physical range, which means the inputs were not
/// unit vectors.
pub fn clamp_cos_theta(cos_theta: f64) -> f64 {
    assert!(
        (-1.0 - COS_THETA_TOLERANCE..=1.0 + COS_THETA_TOLERANCE).contains(&cos_theta),
        "cos(theta) = {cos_theta} is outside the physical range"
    );
    cos_theta.clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Copy)]
struct HelicityBasis {
    ditau_beta: Vec3,
    r: Vec3,
    n: Vec3,
    k: Vec3,
    tau_plus_beta: Vec3,
    tau_minus_beta: Vec3,
}

impl HelicityBasis {
    fn rotate(&self, p4: &Vec4) -> Vec4 {
        let p3 = p4.vec3();
        Vec4::new(p3.dot(&self.r), p3.dot(&self.n), p3.dot(&self.k), p4.e())
    }
}

/// Transforms laboratory four-momenta into the rest frame of either $`\tau`$ of a pair, with axes
/// fixed by the helicity basis $`\{\hat{r}, \hat{n}, \hat{k}\}`$.
///
/// $`\hat{k}`$ is the $`\tau^-`$ direction in the pair rest frame, $`\hat{r}`$ lies in the plane of
/// $`\hat{k}`$ and the beam and $`\hat{n} = \hat{r}\times\hat{k}`$. A momentum is first boosted into
/// the pair rest frame, then rotated onto this basis and finally boosted into the rest frame of the
/// chosen $`\tau`$.
#[derive(Debug, Clone)]
pub struct BoostToHelicityFrame {
    beam_p4: Vec4,
    basis: Option<HelicityBasis>,
}

impl Default for BoostToHelicityFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl BoostToHelicityFrame {
    pub fn new() -> Self {
        let pz = (BEAM_ENERGY * BEAM_ENERGY - BEAM_PARTICLE_MASS * BEAM_PARTICLE_MASS).sqrt();
        Self {
            beam_p4: Vec4::new(0.0, 0.0, pz, BEAM_ENERGY),
            basis: None,
        }
    }

    /// Configure the transform from two fitted legs of opposite charge.
    pub fn set_fitted_legs(&mut self, leg1: &FittedLeg, leg2: &FittedLeg) -> SvfitResult<()> {
        let mut tau_plus = None;
        let mut tau_minus = None;
        for leg in [leg1, leg2] {
            let lepton = leg.measured_lepton().ok_or(SvfitError::NotBound)?;
            if lepton.charge() > 0 {
                tau_plus = Some(leg.tau_p4());
            } else if lepton.charge() < 0 {
                tau_minus = Some(leg.tau_p4());
            }
        }
        match (tau_plus, tau_minus) {
            (Some(plus), Some(minus)) => {
                self.set_tau_momenta(&plus, &minus);
                Ok(())
            }
            _ => Err(SvfitError::Custom(
                "the helicity frame needs one positive and one negative leg".to_string(),
            )),
        }
    }

    /// Configure the transform from the laboratory momenta of the $`\tau^+`$ and $`\tau^-`$.
    pub fn set_tau_momenta(&mut self, tau_plus_p4: &Vec4, tau_minus_p4: &Vec4) {
        let ditau_beta = (tau_plus_p4 + tau_minus_p4).beta();
        let to_ditau = |p4: &Vec4| p4.boost(&-ditau_beta);

        let k = to_ditau(tau_minus_p4).vec3().unit();
        let h = to_ditau(&self.beam_p4).vec3().unit();
        let cos_theta = clamp_cos_theta(k.dot(&h));
        let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
        let r = (h - k * cos_theta) / sin_theta;
        let n = r.cross(&k);

        let mut basis = HelicityBasis {
            ditau_beta,
            r,
            n,
            k,
            tau_plus_beta: Vec3::zero(),
            tau_minus_beta: Vec3::zero(),
        };
        basis.tau_plus_beta = basis.rotate(&to_ditau(tau_plus_p4)).beta();
        basis.tau_minus_beta = basis.rotate(&to_ditau(tau_minus_p4)).beta();
        self.basis = Some(basis);
    }

    /// Express a laboratory four-momentum in the rest frame of the $`\tau`$ with the given sign.
    pub fn transform(&self, p4: &Vec4, tau: Sign) -> SvfitResult<Vec4> {
        let basis = self.basis.as_ref().ok_or(SvfitError::NotBound)?;
        let p4_hf = basis.rotate(&p4.boost(&-basis.ditau_beta));
        let beta = match tau {
            Sign::Positive => basis.tau_plus_beta,
            Sign::Negative => basis.tau_minus_beta,
        };
        Ok(p4_hf.boost(&-beta))
    }

    /// The helicity basis vectors $`(\hat{r}, \hat{n}, \hat{k})`$ in the pair rest frame.
    pub fn basis(&self) -> Option<(Vec3, Vec3, Vec3)> {
        self.basis.map(|b| (b.r, b.n, b.k))
    }
}
