use svfit_core::{
    fitted::FittedLeg,
    utils::functions::{cos_theta_nunu, square, EPSILON, TAU_MASS, TAU_MASS2},
    DecayType,
};

/// Phase-space factor of a leptonic decay $`\tau \to \ell \nu \bar{\nu}`$, integrated over the
/// internal angles of the two-neutrino system[^1]:
///
/// ```math
/// \frac{d\Gamma}{dx\,d\phi\,dm_{\nu\nu}^2} \propto
/// \frac{(E_{vis} + E_{\nu\nu})\,I(m_{\nu\nu})}{8\,|\vec{p}_{vis}|\,x^2\,
/// \sqrt{|\vec{p}_{vis}|^2 + |\vec{p}_{\nu\nu}|^2 + 2|\vec{p}_{vis}||\vec{p}_{\nu\nu}|\cos\theta_{\nu\nu} + m_\tau^2}}
/// ```
///
/// where $`I`$ is the matrix element integrated in the $`\nu\bar{\nu}`$ rest frame. Points
/// outside the physical region
/// $`m_{vis}^2/m_\tau^2 \le x \le 1`$, $`m_{\nu\nu}^2 < (1 - x) m_\tau^2`$ return zero.
///
/// [^1]: Bianchini, L., Calpas, B., Conway, J., Fowlie, A., Marzola, L., Perrini, L., & Veelken, C. (2017). Reconstruction of the Higgs mass in events with Higgs bosons decaying into a pair of τ leptons using matrix element techniques. _Nucl. Instrum. Meth. A_, **862**, 54.
pub fn ps_factor_tau_to_lep_decay(
    x: f64,
    vis_energy: f64,
    vis_p: f64,
    vis_mass: f64,
    nunu_energy: f64,
    nunu_p: f64,
    nunu_mass: f64,
) -> f64 {
    let vis_mass2 = square(vis_mass);
    let nunu_mass2 = square(nunu_mass);
    if !(x >= vis_mass2 / TAU_MASS2 && x <= 1.0 && nunu_mass2 < (1.0 - x) * TAU_MASS2) {
        return 0.0;
    }
    let tau_energy_rf = (TAU_MASS2 + nunu_mass2 - vis_mass2) / (2.0 * nunu_mass);
    let vis_energy_rf = tau_energy_rf - nunu_mass;
    if !(tau_energy_rf >= TAU_MASS && vis_energy_rf >= vis_mass) {
        return 0.0;
    }
    let integral = nunu_mass2
        * (2.0 * tau_energy_rf * vis_energy_rf
            - (2.0 / 3.0)
                * ((square(tau_energy_rf) - TAU_MASS2) * (square(vis_energy_rf) - vis_mass2))
                    .sqrt());
    let cos_theta = cos_theta_nunu(
        vis_energy,
        vis_p,
        vis_mass2,
        nunu_energy,
        nunu_p,
        nunu_mass2,
    );
    if !(cos_theta >= -1.0 + EPSILON && cos_theta <= 1.0) {
        return 0.0;
    }
    (vis_energy + nunu_energy) * integral
        / (8.0
            * vis_p
            * square(x)
            * (square(vis_p) + square(nunu_p) + 2.0 * vis_p * nunu_p * cos_theta + TAU_MASS2)
                .sqrt())
}

/// Phase-space factor of a hadronic decay $`\tau \to \text{hadrons} + \nu`$ with a constant matrix
/// element:
///
/// ```math
/// \frac{d\Gamma}{dx\,d\phi} \propto \frac{1}{m_\tau^2 - m_{vis}^2}
/// \frac{E_{vis} + E_{\nu}}{8\,|\vec{p}_{vis}|\,x^2\,
/// \sqrt{|\vec{p}_{vis}|^2 + |\vec{p}_{\nu}|^2 + 2|\vec{p}_{vis}||\vec{p}_{\nu}|\cos\theta_{\nu} + m_\tau^2}}
/// ```
pub fn ps_factor_tau_to_had_decay(
    x: f64,
    vis_energy: f64,
    vis_p: f64,
    vis_mass: f64,
    nu_energy: f64,
    nu_p: f64,
) -> f64 {
    let vis_mass2 = square(vis_mass);
    if !(x >= vis_mass2 / TAU_MASS2 && x <= 1.0) {
        return 0.0;
    }
    let cos_theta = cos_theta_nunu(vis_energy, vis_p, vis_mass2, nu_energy, nu_p, 0.0);
    if !(cos_theta >= -1.0 + EPSILON && cos_theta <= 1.0) {
        return 0.0;
    }
    (vis_energy + nu_energy)
        / (8.0
            * vis_p
            * square(x)
            * (square(vis_p) + square(nu_p) + 2.0 * vis_p * nu_p * cos_theta + TAU_MASS2).sqrt())
        / (TAU_MASS2 - vis_mass2)
}

/// Decay density of a fitted leg, dispatched on its decay category. Prompt legs contribute a
/// factor of one, as does an unbound leg.
pub fn tau_decay_density(leg: &FittedLeg) -> f64 {
    let Some(lepton) = leg.measured_lepton() else {
        return 1.0;
    };
    let vis_p4 = leg.vis_p4();
    let nu_p4 = leg.nu_p4();
    match lepton.decay_type() {
        DecayType::TauToElec | DecayType::TauToMu => ps_factor_tau_to_lep_decay(
            leg.x(),
            vis_p4.e(),
            vis_p4.p(),
            lepton.mass(),
            nu_p4.e(),
            nu_p4.p(),
            leg.nu_mass(),
        ),
        DecayType::TauToHad => ps_factor_tau_to_had_decay(
            leg.x(),
            vis_p4.e(),
            vis_p4.p(),
            lepton.mass(),
            nu_p4.e(),
            nu_p4.p(),
        ),
        DecayType::Prompt => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use svfit_core::{data::test_event, MeasuredLepton};

    use super::*;

    fn fitted(lepton: &MeasuredLepton, x: f64, phi: f64, nu_mass: f64) -> FittedLeg {
        let mut leg = FittedLeg::new(0);
        leg.set_measured_lepton(lepton);
        leg.update_tau_momentum(x, phi, nu_mass).unwrap();
        leg
    }

    #[test]
    fn test_hadronic_factor_closed_form() {
        let event = test_event();
        let lepton = &event.leptons()[1];
        let leg = fitted(lepton, 0.5, 0.3, 0.0);
        let (vis, nu) = (leg.vis_p4(), leg.nu_p4());
        let cos = cos_theta_nunu(vis.e(), vis.p(), square(lepton.mass()), nu.e(), nu.p(), 0.0);
        // the tau three-momentum squared plus its mass is the tau energy squared
        let expected = (vis.e() + nu.e())
            / (8.0 * vis.p() * 0.25 * leg.tau_p4().e())
            / (TAU_MASS2 - square(lepton.mass()));
        assert!(cos > -1.0 && cos < 1.0);
        assert_relative_eq!(tau_decay_density(&leg), expected, max_relative = 1e-8);
    }

    #[test]
    fn test_leptonic_factor_positive_inside_region() {
        let event = test_event();
        let lepton = &event.leptons()[0];
        for &(x, nu_mass) in &[(0.3, 0.5), (0.6, 1.0), (0.8, 0.3)] {
            let leg = fitted(lepton, x, 1.0, nu_mass);
            assert!(!leg.is_error());
            let density = tau_decay_density(&leg);
            assert!(density.is_finite() && density > 0.0, "x = {x}, m = {nu_mass}");
        }
    }

    #[test]
    fn test_leptonic_factor_zero_outside_region() {
        // invisible mass beyond (1 - x) m_tau^2
        let x: f64 = 0.9;
        let nu_mass = ((1.0 - x) * TAU_MASS2).sqrt() * 1.01;
        assert_eq!(
            ps_factor_tau_to_lep_decay(x, 40.0, 40.0, 0.000511, 4.4, 4.0, nu_mass),
            0.0
        );
        assert_eq!(
            ps_factor_tau_to_lep_decay(1.2, 40.0, 40.0, 0.000511, 0.0, 0.0, 0.2),
            0.0
        );
        // opening angle outside the physical range
        assert_eq!(
            ps_factor_tau_to_lep_decay(0.5, 40.0, 40.0, 0.000511, 40.0, 1.0, 0.2),
            0.0
        );
    }

    #[test]
    fn test_hadronic_factor_zero_below_mass_threshold() {
        // x below m_vis^2 / m_tau^2
        assert_eq!(ps_factor_tau_to_had_decay(0.01, 10.0, 9.9, 1.2, 990.0, 990.0), 0.0);
    }

    #[test]
    fn test_prompt_leg_is_neutral() {
        let lepton = MeasuredLepton::new(DecayType::Prompt, 1, 30.0, 0.1, 0.2, 0.1);
        let mut leg = FittedLeg::new(0);
        leg.set_measured_lepton(&lepton);
        assert_eq!(tau_decay_density(&leg), 1.0);
        assert_eq!(tau_decay_density(&FittedLeg::new(1)), 1.0);
    }
}
