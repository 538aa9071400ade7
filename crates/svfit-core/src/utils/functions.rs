use std::f64::consts::PI;

use super::vectors::Vec4;

/// Electron mass in GeV
pub const ELECTRON_MASS: f64 = 0.51100e-3;
/// Muon mass in GeV
pub const MUON_MASS: f64 = 0.10566;
/// Charged pion mass in GeV
pub const CHARGED_PION_MASS: f64 = 0.13957;
/// Neutral pion mass in GeV
pub const NEUTRAL_PION_MASS: f64 = 0.13498;
/// Tau lepton mass in GeV
pub const TAU_MASS: f64 = 1.77685;
pub const TAU_MASS2: f64 = TAU_MASS * TAU_MASS;
/// Mean decay length $`c\tau`$ of the tau lepton in cm
pub const C_TAU_LIFETIME: f64 = 8.711e-3;
/// Total decay width of the tau lepton in GeV
pub const TAU_WIDTH: f64 = 2.27e-12;
/// Fermi constant in GeV$`^{-2}`$
pub const GF: f64 = 1.166e-5;
/// Lower edge of the accepted range of $`\cos\theta_{\nu\nu}`$ is $`-1 + \epsilon`$.
pub const EPSILON: f64 = 1.0e-6;

/// Hadronic visible mass bounds in GeV, used when the decay contains more than one pion.
pub const HADRONIC_MASS_MIN: f64 = 0.3;
pub const HADRONIC_MASS_MAX: f64 = 1.5;

const TWO_PI: f64 = 2.0 * PI;

/// Global constant of the two-tau phase-space element, $`2 G_F^2 / \pi^2 / (2\pi)^5`$.
pub const CONST_FACTOR: f64 = 2.0 * GF * GF / (PI * PI) / (TWO_PI * TWO_PI * TWO_PI * TWO_PI * TWO_PI);

/// Narrow-width normalisation of the tau propagators, $`(\pi / (m_\tau \Gamma_\tau))^2`$.
pub const MATRIX_ELEMENT_NORM: f64 =
    (PI / (TAU_MASS * TAU_WIDTH)) * (PI / (TAU_MASS * TAU_WIDTH));

#[inline]
pub fn square(x: f64) -> f64 {
    x * x
}

/// Cosine of the opening angle between the visible and invisible systems of a tau decay, fixed
/// by requiring the pair to have the tau mass:
///
/// ```math
/// \cos\theta_{\nu\nu} = \frac{E_{vis} E_{\nu\nu} - \frac{1}{2}(m_\tau^2 - m_{vis}^2 - m_{\nu\nu}^2)}{|\vec{p}_{vis}||\vec{p}_{\nu\nu}|}
/// ```
pub fn cos_theta_nunu(
    vis_energy: f64,
    vis_p: f64,
    vis_mass2: f64,
    nunu_energy: f64,
    nunu_p: f64,
    nunu_mass2: f64,
) -> f64 {
    (vis_energy * nunu_energy - 0.5 * (TAU_MASS2 - (vis_mass2 + nunu_mass2))) / (vis_p * nunu_p)
}

/// Transverse mass of a pair, built from the transverse momenta only:
///
/// ```math
/// M_T^2 = (p_{T,1} + p_{T,2})^2 - (\vec{p}_{T,1} + \vec{p}_{T,2})^2
/// ```
///
/// It never exceeds the invariant mass of the pair.
pub fn transverse_mass(p1: &Vec4, p2: &Vec4) -> f64 {
    let pt_sum = p1.pt() + p2.pt();
    let px = p1.px() + p2.px();
    let py = p1.py() + p2.py();
    (pt_sum * pt_sum - px * px - py * py).max(0.0).sqrt()
}

/// Linear map of `q` in `[0, 1]` onto `[low, high]`.
#[inline]
pub fn lerp(q: f64, low: f64, high: f64) -> f64 {
    (1.0 - q) * low + q * high
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_constants() {
        assert_relative_eq!(TAU_MASS2, 3.1571959225, epsilon = 1e-12);
        assert_relative_eq!(
            CONST_FACTOR,
            2.0 * GF.powi(2) / PI.powi(2) / (2.0 * PI).powi(5),
            max_relative = 1e-14
        );
        assert_relative_eq!(
            MATRIX_ELEMENT_NORM,
            (PI / (TAU_MASS * TAU_WIDTH)).powi(2),
            max_relative = 1e-14
        );
    }

    #[test]
    fn test_cos_theta_nunu_at_rest() {
        // massless products of a tau at rest are back to back
        let e = TAU_MASS / 2.0;
        let cos = cos_theta_nunu(e, e, 0.0, e, e, 0.0);
        assert_relative_eq!(cos, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_transverse_mass() {
        let p1 = Vec4::new(3.0, 4.0, 12.0, 20.0);
        let p2 = Vec4::new(-3.0, -4.0, -2.0, 9.0);
        // back to back in the transverse plane: M_T = pT1 + pT2
        assert_relative_eq!(transverse_mass(&p1, &p2), 10.0, epsilon = 1e-12);
        assert!(transverse_mass(&p1, &p2) <= (p1 + p2).m());
        // collinear massless pair
        let q1 = Vec4::new(1.0, 0.0, 0.0, 1.0);
        let q2 = Vec4::new(2.0, 0.0, 0.0, 2.0);
        assert_eq!(transverse_mass(&q1, &q2), 0.0);
        // longitudinal momentum does not enter
        let r1 = Vec4::new(0.0, 5.0, 100.0, 101.0);
        let r2 = Vec4::new(0.0, -5.0, -40.0, 41.0);
        assert_relative_eq!(transverse_mass(&r1, &r2), 10.0, epsilon = 1e-12);
        assert!(transverse_mass(&r1, &r2) <= (r1 + r2).m());
    }

    #[test]
    fn test_lerp() {
        assert_eq!(lerp(0.0, 2.0, 4.0), 2.0);
        assert_eq!(lerp(1.0, 2.0, 4.0), 4.0);
        assert_eq!(lerp(0.25, 2.0, 4.0), 2.5);
    }
}
