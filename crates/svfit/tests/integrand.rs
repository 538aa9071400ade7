use std::f64::consts::PI;

use approx::assert_relative_eq;
use svfit::prelude::*;
use svfit::utils::functions::transverse_mass;
use svfit::{clamp_cos_theta, fit_event, test_event, ErrorCode, FittedLeg};

fn random_points(n: usize, dims: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..n)
        .map(|_| (0..dims).map(|_| rng.f64()).collect())
        .collect()
}

fn bound(config: IntegrandConfig, event: &MeasuredEvent) -> Integrand {
    let mut integrand = Integrand::new(config);
    assert!(integrand.bind(event).is_empty());
    integrand
}

#[test]
fn test_values_are_finite_and_non_negative() {
    let event = test_event();
    let configs = [
        IntegrandConfig::default(),
        IntegrandConfig::default().without_log_m(),
        IntegrandConfig::default().with_di_tau_mass_constraint(125.06),
    ];
    for config in configs {
        let mut integrand = bound(config, &event);
        let dims = integrand.num_dimensions();
        for q in random_points(1000, dims, 5) {
            let value = integrand.evaluate(&q);
            assert!(value.is_finite() && value >= 0.0, "q = {q:?}");
        }
    }
}

#[test]
fn test_setup_errors_give_zero_everywhere() {
    let event = test_event();
    let one_leg = MeasuredEvent::new(vec![event.leptons()[1].clone()], event.met().to_vec())
        .unwrap();
    let mut integrand = Integrand::default();
    let codes = integrand.bind(&one_leg);
    assert!(codes.contains(ErrorCode::LeptonCountMismatch));
    for q in random_points(100, 5, 2) {
        assert_eq!(integrand.evaluate(&q), 0.0);
    }
}

#[test]
fn test_rescale_inverts_unscale() {
    let integrand = bound(IntegrandConfig::default(), &test_event());
    let ranges = integrand.integration_ranges();
    for q in random_points(50, integrand.num_dimensions(), 9) {
        let x = integrand.rescale(&q);
        for (xi, (lo, hi)) in x
            .iter()
            .zip(ranges.x_min().iter().zip(ranges.x_max()))
        {
            assert!(lo <= xi && xi <= hi);
        }
        let back = ranges.unscale(&x);
        for (a, b) in back.iter().zip(&q) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }
    assert_relative_eq!(ranges.x_max()[1], 2.0 * PI);
}

#[test]
fn test_mass_constraint_fixes_visible_fractions() {
    let event = test_event();
    let mass = 125.06;
    let mut integrand = bound(
        IntegrandConfig::default().with_di_tau_mass_constraint(mass),
        &event,
    );
    let mvis2 = event.visible_mass().powi(2);
    let mut n_accepted = 0;
    for q in random_points(2000, integrand.num_dimensions(), 13) {
        if integrand.evaluate(&q) == 0.0 {
            continue;
        }
        n_accepted += 1;
        let [leg1, leg2] = integrand.legs();
        assert_relative_eq!(
            mvis2 / (leg1.x() * leg2.x()),
            mass * mass,
            max_relative = 1e-10
        );
        let full = (leg1.tau_p4() + leg2.tau_p4()).m();
        assert_relative_eq!(full, mass, max_relative = 0.1);
    }
    assert!(n_accepted > 0);
}

#[test]
fn test_leg_order_does_not_matter() {
    let event = test_event();
    let swapped = MeasuredEvent::new(
        vec![event.leptons()[1].clone(), event.leptons()[0].clone()],
        event.met().to_vec(),
    )
    .unwrap();
    let mut forward = bound(IntegrandConfig::default(), &event);
    let mut backward = bound(IntegrandConfig::default(), &swapped);
    // electron leg: x, phi, m_nunu; hadronic leg: x, phi
    for q in random_points(500, 5, 21) {
        let q_swapped = [q[3], q[4], q[0], q[1], q[2]];
        assert_relative_eq!(
            forward.evaluate(&q),
            backward.evaluate(&q_swapped),
            max_relative = 1e-12
        );
    }
}

#[test]
fn test_cos_theta_rounding_is_absorbed() {
    assert_eq!(clamp_cos_theta(1.005), 1.0);
    assert_eq!(clamp_cos_theta(-1.009), -1.0);
    assert_eq!(clamp_cos_theta(0.3), 0.3);
}

#[test]
#[should_panic]
fn test_cos_theta_far_outside_panics() {
    clamp_cos_theta(1.5);
}

#[test]
fn test_reference_event_fit() {
    let event = test_event();
    let mc = PlainMonteCarlo::new(1_000_000).with_seed(42);

    let fit = fit_event(&event, &IntegrandConfig::default(), &mc);
    assert!(fit.error_codes.is_empty());
    assert!(fit.integration.integral > 0.0);
    let masses = fit.masses.unwrap();
    assert!(masses.mass > event.visible_mass());
    assert!(masses.transverse_mass <= masses.mass);
    assert_relative_eq!(masses.mass, 115.746, max_relative = 0.1);
    assert_relative_eq!(masses.transverse_mass, 114.242, max_relative = 0.15);
    assert_relative_eq!(masses.mass_err, 87.0, max_relative = 0.35);

    let config = IntegrandConfig::default().with_di_tau_mass_constraint(125.06);
    let constrained = fit_event(&event, &config, &mc).masses.unwrap();
    assert_relative_eq!(constrained.mass, 124.646, max_relative = 0.03);
    assert_relative_eq!(constrained.transverse_mass, 123.026, max_relative = 0.1);
    assert!(constrained.transverse_mass <= constrained.mass);
    assert!(constrained.mass_err < masses.mass_err);
}

struct TransverseMassBound {
    n_checked: usize,
}

impl ResultSink for TransverseMassBound {
    fn notify(&mut self, legs: &[FittedLeg; 2], _prob: f64) {
        let (tau1, tau2) = (legs[0].tau_p4(), legs[1].tau_p4());
        let mass = (tau1 + tau2).m();
        assert!(transverse_mass(&tau1, &tau2) <= mass * (1.0 + 1e-12));
        self.n_checked += 1;
    }
}

#[test]
fn test_transverse_mass_never_exceeds_mass() {
    let checker = Arc::new(Mutex::new(TransverseMassBound { n_checked: 0 }));
    for config in [
        IntegrandConfig::default(),
        IntegrandConfig::default().with_di_tau_mass_constraint(125.06),
    ] {
        let mut integrand = bound(config, &test_event());
        integrand.attach_sink(Box::new(checker.clone()));
        let dims = integrand.num_dimensions();
        for q in random_points(2000, dims, 31) {
            integrand.evaluate(&q);
        }
    }
    assert!(checker.lock().n_checked > 0);
}

#[test]
fn test_shared_sink_and_global_slot_agree() {
    let event = test_event();
    let accumulator = Arc::new(Mutex::new(DiTauAccumulator::unweighted()));
    let mut integrand = bound(IntegrandConfig::default(), &event);
    integrand.attach_sink(Box::new(accumulator.clone()));
    let points = random_points(200, 5, 4);
    let direct: Vec<f64> = points.iter().map(|q| integrand.evaluate(q)).collect();
    let n_direct = accumulator.lock().len();
    assert_eq!(n_direct, direct.iter().filter(|&&v| v > 0.0).count());

    svfit::register_active(integrand);
    let via_slot: Vec<f64> = points.iter().map(|q| svfit::evaluate_active(q)).collect();
    let _ = svfit::take_active();
    assert_eq!(direct, via_slot);
    assert_eq!(accumulator.lock().len(), 2 * n_direct);
}
