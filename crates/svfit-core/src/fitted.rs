use std::fmt::Display;

use tracing::trace;

use crate::{
    data::MeasuredLepton,
    utils::{
        functions::{cos_theta_nunu, square},
        vectors::{Vec3, Vec4},
    },
    SvfitError, SvfitResult,
};

/// The lifecycle of a [`FittedLeg`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum LegState {
    /// No measured lepton has been bound.
    #[default]
    Uninitialized,
    /// The visible momentum is set; the invisible system has not been solved yet.
    VisibleSet,
    /// The invisible and total momenta hold a physical solution.
    TauMomentumSet,
    /// The last requested point had no physical solution. The invisible and total momenta are
    /// stale and must not be read.
    Error,
}

impl Display for LegState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegState::Uninitialized => write!(f, "uninitialized"),
            LegState::VisibleSet => write!(f, "visible set"),
            LegState::TauMomentumSet => write!(f, "tau momentum set"),
            LegState::Error => write!(f, "invalid kinematics"),
        }
    }
}

/// The reconstructed state of one decaying leg.
///
/// A leg is bound once per event and then updated in place for every sample point: the visible
/// momentum is rescaled with [`FittedLeg::update_vis_momentum`] and the invisible system is solved
/// from the visible energy fraction $`x`$, its azimuth $`\phi`$ around the visible direction and its
/// mass with [`FittedLeg::update_tau_momentum`].
#[derive(Debug, Clone, Default)]
pub struct FittedLeg {
    index: usize,
    measured: Option<MeasuredLepton>,
    state: LegState,
    vis_shift: f64,
    vis_p4: Vec4,
    x: f64,
    nu_mass: f64,
    nu_p4: Vec4,
    tau_p4: Vec4,
    e_x: Vec3,
    e_y: Vec3,
    e_z: Vec3,
}

impl FittedLeg {
    /// An unbound leg at position `index` of the pair.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            vis_shift: 1.0,
            ..Default::default()
        }
    }

    /// Bind a measured lepton, resetting any previous error. The visible momentum starts
    /// unshifted.
    pub fn set_measured_lepton(&mut self, lepton: &MeasuredLepton) {
        self.measured = Some(lepton.clone());
        self.state = LegState::VisibleSet;
        self.x = 1.0;
        self.nu_mass = 0.0;
        self.nu_p4 = Vec4::zero();
        self.set_visible(lepton.p4(), 1.0);
        self.tau_p4 = self.vis_p4;
    }

    fn set_visible(&mut self, vis_p4: Vec4, shift: f64) {
        self.vis_shift = shift;
        self.vis_p4 = vis_p4;
        // local frame: e_z along the visible momentum, e_y transverse to the beam axis
        self.e_z = vis_p4.vec3().unit();
        self.e_y = Vec3::new(0.0, 0.0, 1.0).cross(&self.e_z).unit();
        self.e_x = self.e_y.cross(&self.e_z);
    }

    /// Scale the measured visible three-momentum by `shift`, keeping the visible mass.
    pub fn update_vis_momentum(&mut self, shift: f64) -> SvfitResult<()> {
        let lepton = self.measured.as_ref().ok_or(SvfitError::NotBound)?;
        let p4 = lepton.p4();
        let vis_p4 = if shift == 1.0 {
            p4
        } else {
            (p4.vec3() * shift).with_mass(lepton.mass())
        };
        self.set_visible(vis_p4, shift);
        self.state = LegState::VisibleSet;
        Ok(())
    }

    /// Solve the two-body kinematics of the decay for visible energy fraction `x`, azimuth `phi`
    /// of the invisible system around the visible direction and invisible mass `nu_mass`.
    ///
    /// The opening angle is fixed by requiring the visible and invisible systems to add up to the
    /// tau mass. If no such angle exists the leg moves to [`LegState::Error`].
    pub fn update_tau_momentum(&mut self, x: f64, phi: f64, nu_mass: f64) -> SvfitResult<()> {
        let vis_mass = self.measured.as_ref().ok_or(SvfitError::NotBound)?.mass();
        self.x = x;
        self.nu_mass = nu_mass;

        let vis_energy = self.vis_p4.e();
        let vis_p = self.vis_p4.p();
        let nu_energy = vis_energy * (1.0 - x) / x;
        if !(nu_energy >= nu_mass) {
            trace!(leg = self.index, x, nu_energy, nu_mass, "invisible energy below its mass");
            self.state = LegState::Error;
            return Ok(());
        }
        let nu_p = (square(nu_energy) - square(nu_mass)).sqrt();
        let cos_theta = cos_theta_nunu(
            vis_energy,
            vis_p,
            square(vis_mass),
            nu_energy,
            nu_p,
            square(nu_mass),
        );
        if !(cos_theta >= -1.0 && cos_theta <= 1.0) {
            trace!(leg = self.index, x, cos_theta, "no physical opening angle");
            self.state = LegState::Error;
            return Ok(());
        }
        let sin_theta = (1.0 - square(cos_theta)).sqrt();
        let nu_p3 = (self.e_x * (sin_theta * phi.cos())
            + self.e_y * (sin_theta * phi.sin())
            + self.e_z * cos_theta)
            * nu_p;
        self.nu_p4 = nu_p3.with_energy(nu_energy);
        self.tau_p4 = self.vis_p4 + self.nu_p4;
        self.state = LegState::TauMomentumSet;
        Ok(())
    }

    pub fn index(&self) -> usize {
        self.index
    }
    pub fn state(&self) -> LegState {
        self.state
    }
    pub fn is_error(&self) -> bool {
        self.state == LegState::Error
    }
    pub fn measured_lepton(&self) -> Option<&MeasuredLepton> {
        self.measured.as_ref()
    }
    /// Visible energy fraction.
    pub fn x(&self) -> f64 {
        self.x
    }
    pub fn nu_mass(&self) -> f64 {
        self.nu_mass
    }
    pub fn vis_shift(&self) -> f64 {
        self.vis_shift
    }
    pub fn vis_p4(&self) -> Vec4 {
        self.vis_p4
    }
    pub fn nu_p4(&self) -> Vec4 {
        self.nu_p4
    }
    pub fn tau_p4(&self) -> Vec4 {
        self.tau_p4
    }
}
