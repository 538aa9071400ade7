use svfit_core::{MEtType, MeasuredMEt, Vec4};

/// Residual between a missing-momentum measurement and the summed invisible momenta. Transverse
/// measurements only fill the $`x`$ and $`y`$ components.
pub fn met_residual(met: &MeasuredMEt, nu_sum: &Vec4) -> Vec4 {
    match met.met_type() {
        MEtType::ProtonProton => Vec4::new(met.px() - nu_sum.px(), met.py() - nu_sum.py(), 0.0, 0.0),
        MEtType::ElectronPositron => Vec4::new(
            met.px() - nu_sum.px(),
            met.py() - nu_sum.py(),
            met.pz() - nu_sum.pz(),
            met.energy() - nu_sum.e(),
        ),
    }
}

/// Shift of the missing-momentum residual caused by a mis-measured hadronic leg: a visible
/// momentum scaled by `shift` moves the recoil by $`\rho\,(\text{shift} - 1)\,p_{vis}`$.
pub fn response_correction(rho: f64, shift: f64, measured_vis_p4: &Vec4) -> Vec4 {
    *measured_vis_p4 * (rho * (shift - 1.0))
}

/// Multivariate Gaussian density of a residual against the measurement's resolution:
///
/// ```math
/// \mathcal{L} = \frac{1}{(2\pi)^{k/2}\sqrt{|\Sigma|}}\exp\left(-\frac{1}{2} r^T \Sigma^{-1} r\right)
/// ```
///
/// with $`k = 2`$ for transverse and $`k = 4`$ for full four-momentum measurements. A measurement
/// with a singular covariance has density zero.
///
/// # Panics
///
/// Panics if the quadratic form is negative, which cannot happen for a covariance that passed the
/// positive-definiteness check.
pub fn met_transfer_function(met: &MeasuredMEt, residual: &Vec4) -> f64 {
    let Some(cov_inv) = met.cov_inv() else {
        return 0.0;
    };
    let r = [residual.x, residual.y, residual.z, residual.t];
    let k = met.met_type().dimension();
    let mut pull2 = 0.0;
    for i in 0..k {
        for j in 0..k {
            pull2 += r[i] * cov_inv[(i, j)] * r[j];
        }
    }
    assert!(
        !(pull2 < -1e-9),
        "negative quadratic form {pull2} from a positive definite covariance"
    );
    met.const_met() * (-0.5 * pull2).exp()
}
