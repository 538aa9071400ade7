use std::f64::consts::PI;

use nalgebra::Matrix3;
use svfit_core::{
    data::invert_covariance,
    utils::functions::{lerp, C_TAU_LIFETIME, TAU_MASS},
    LeadChargedHadron, Vec3, Vec4, Vertex,
};
use tracing::warn;

/// Number of standard deviations of the vertex resolution spanned around the measured flight
/// distance.
const N_SIGMA: f64 = 5.0;

/// Point on the line $`\vec{x}_{PV} + s\,\hat{e}_\tau`$ closest to the line through the decay
/// vertex along the leading charged track. Parallel lines fall back to the projection of the
/// decay vertex onto the $`\tau`$ line.
pub fn point_of_closest_approach(
    tau_dir: &Vec3,
    primary_vertex: &Vec3,
    track_dir: &Vec3,
    decay_vertex: &Vec3,
) -> Vec3 {
    let e = tau_dir.unit();
    let u = track_dir.unit();
    let w0 = primary_vertex - decay_vertex;
    let b = e.dot(&u);
    let d = e.dot(&w0);
    let f = u.dot(&w0);
    let denom = 1.0 - b * b;
    let s = if denom < 1e-12 {
        (decay_vertex - primary_vertex).dot(&e)
    } else {
        (b * f - d) / denom
    };
    primary_vertex + e * s
}

/// Allowed range $`[d_{min}, d_{max}]`$ of the flight distance along `tau_dir`, spanning
/// [`N_SIGMA`] vertex resolutions around the measured flight distance and clipped at zero.
pub fn flight_length_range(tau_dir: &Vec3, flight: &Vec3, cov: &Matrix3<f64>) -> (f64, f64) {
    let e = tau_dir.unit();
    let ev = e.to_vector3();
    let sigma = (ev.transpose() * cov * ev)[(0, 0)].max(0.0).sqrt();
    let d0 = flight.dot(&e);
    let dmin = (d0 - N_SIGMA * sigma).max(0.0);
    let dmax = d0.max(0.0) + N_SIGMA * sigma;
    (dmin, dmax)
}

/// Exponential decay density $`\exp(-d/(\gamma c\tau))/(\gamma c\tau)`$ of a $`\tau`$ with
/// momentum `tau_p4` travelling a distance `d`. Boosts below one are clipped to one.
pub fn exp_decay_probability(d: f64, tau_p4: &Vec4) -> f64 {
    let mut gamma = tau_p4.e() / TAU_MASS;
    if gamma < 1.0 {
        warn!(gamma, "unphysical boost, setting it to 1");
        gamma = 1.0;
    }
    let decay_length = gamma * C_TAU_LIFETIME;
    (-d / decay_length).exp() / decay_length
}

/// The flight-length term of one leg: decay-vertex resolution (decay plus primary vertex
/// covariance), its inverse and Gaussian normalisation, and the leading charged track.
#[derive(Debug, Clone)]
pub struct FlightLengthDensity {
    decay_vertex: Vec3,
    cov: Matrix3<f64>,
    cov_inv: Matrix3<f64>,
    norm: f64,
    track_dir: Vec3,
}

impl FlightLengthDensity {
    /// Returns `None` if the summed covariance is not positive definite.
    pub fn new(
        decay_vertex: &Vertex,
        primary_vertex: &Vertex,
        lead_track: &LeadChargedHadron,
    ) -> Option<Self> {
        let cov = decay_vertex.cov() + primary_vertex.cov();
        let (cov_inv, det) = invert_covariance(&cov)?;
        Some(Self {
            decay_vertex: decay_vertex.position(),
            cov,
            cov_inv,
            norm: 1.0 / ((2.0 * PI).powf(1.5) * det.abs().sqrt()),
            track_dir: lead_track.p3(),
        })
    }

    /// Gaussian normalisation $`1/((2\pi)^{3/2}\sqrt{|\Sigma|})`$.
    pub fn norm(&self) -> f64 {
        self.norm
    }

    /// Evaluate the term for a $`\tau`$ with momentum `tau_p4` produced at `primary_vertex`,
    /// with the flight distance placed at fraction `q` of the allowed range. The result includes
    /// the Jacobian $`d_{max} - d_{min}`$ of that mapping.
    ///
    /// # Panics
    ///
    /// Panics if the allowed range is empty or the vertex pull is negative.
    pub fn probability(&self, tau_p4: &Vec4, primary_vertex: &Vec3, q: f64) -> f64 {
        let tau_dir = tau_p4.vec3().unit();
        let pca =
            point_of_closest_approach(&tau_dir, primary_vertex, &self.track_dir, &self.decay_vertex);
        let flight = pca - primary_vertex;
        let (dmin, dmax) = flight_length_range(&tau_dir, &flight, &self.cov);
        let d = lerp(q, dmin, dmax);
        let prob_decay = exp_decay_probability(d, tau_p4);

        let residual = (self.decay_vertex - primary_vertex - tau_dir * d).to_vector3();
        let pull2 = (residual.transpose() * self.cov_inv * residual)[(0, 0)];
        assert!(
            !(pull2 < -1e-9),
            "negative quadratic form {pull2} from a positive definite vertex covariance"
        );
        let prob_vertex = self.norm * (-0.5 * pull2).exp();

        let jacobian = dmax - dmin;
        assert!(jacobian > 0.0, "empty flight-length range [{dmin}, {dmax}]");
        prob_decay * prob_vertex * jacobian
    }
}
