//! A process-wide slot holding one [`Integrand`], for samplers which only accept a plain
//! `fn(&[f64]) -> f64`.
//!
//! The slot is not reentrant: register one integrand, run one integration, then take it back.
//! Concurrent integrations must pass closures over their own integrands instead.
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::integrand::Integrand;

static ACTIVE: OnceLock<Mutex<Option<Integrand>>> = OnceLock::new();

fn active() -> &'static Mutex<Option<Integrand>> {
    ACTIVE.get_or_init(|| Mutex::new(None))
}

/// Make `integrand` the target of [`evaluate_active`], returning the previous one.
pub fn register_active(integrand: Integrand) -> Option<Integrand> {
    active().lock().replace(integrand)
}

/// Evaluate the registered integrand, or return zero if none is registered.
pub fn evaluate_active(q: &[f64]) -> f64 {
    active()
        .lock()
        .as_mut()
        .map_or(0.0, |integrand| integrand.evaluate(q))
}

/// Remove and return the registered integrand.
pub fn take_active() -> Option<Integrand> {
    active().lock().take()
}

pub fn has_active() -> bool {
    active().lock().is_some()
}
