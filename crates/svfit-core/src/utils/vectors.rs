use std::fmt::Display;
use std::iter::Sum;

use auto_ops::{impl_op_ex, impl_op_ex_commutative};
use serde::{Deserialize, Serialize};

/// A three-vector of `f64` components.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// The $`x`$-component
    pub x: f64,
    /// The $`y`$-component
    pub y: f64,
    /// The $`z`$-component
    pub z: f64,
}

impl Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:6.3}, {:6.3}, {:6.3}]", self.x, self.y, self.z)
    }
}

impl Vec3 {
    /// Create a new [`Vec3`] from its components.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
    /// The zero vector.
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
    pub fn x(&self) -> f64 {
        self.x
    }
    pub fn y(&self) -> f64 {
        self.y
    }
    pub fn z(&self) -> f64 {
        self.z
    }

    /// Promote to a [`Vec4`] with the energy fixed by the given invariant mass.
    pub fn with_mass(&self, mass: f64) -> Vec4 {
        let e = f64::sqrt(mass.powi(2) + self.mag2());
        Vec4::new(self.x, self.y, self.z, e)
    }

    /// Promote to a [`Vec4`] with the given energy.
    pub fn with_energy(&self, energy: f64) -> Vec4 {
        Vec4::new(self.x, self.y, self.z, energy)
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }
    pub fn cross(&self, other: &Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }
    pub fn mag2(&self) -> f64 {
        self.dot(self)
    }
    pub fn mag(&self) -> f64 {
        self.mag2().sqrt()
    }
    /// The magnitude of the component transverse to the $`z`$-axis.
    pub fn perp(&self) -> f64 {
        f64::hypot(self.x, self.y)
    }
    pub fn costheta(&self) -> f64 {
        self.z / self.mag()
    }
    pub fn theta(&self) -> f64 {
        self.costheta().acos()
    }
    pub fn phi(&self) -> f64 {
        self.y.atan2(self.x)
    }
    /// The pseudorapidity $`\eta = \sinh^{-1}(p_z / p_T)`$.
    pub fn eta(&self) -> f64 {
        (self.z / self.perp()).asinh()
    }
    /// The unit vector along this direction. A zero vector is returned unchanged.
    pub fn unit(&self) -> Self {
        let mag2 = self.mag2();
        if mag2 <= 0.0 {
            return *self;
        }
        *self / mag2.sqrt()
    }
    pub fn add(&self, other: &Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
    pub fn sub(&self, other: &Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
    pub fn mul(&self, other: f64) -> Self {
        Self::new(self.x * other, self.y * other, self.z * other)
    }
    pub fn div(&self, other: f64) -> Self {
        Self::new(self.x / other, self.y / other, self.z / other)
    }
    pub fn neg(&self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
    /// Components as a [`nalgebra::Vector3`], for use with covariance matrices.
    pub fn to_vector3(&self) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.x, self.y, self.z)
    }
}

impl_op_ex!(+ |a: &Vec3, b: &Vec3| -> Vec3 { a.add(b) });
impl_op_ex!(-|a: &Vec3, b: &Vec3| -> Vec3 { a.sub(b) });
impl_op_ex!(-|a: &Vec3| -> Vec3 { a.neg() });
impl_op_ex_commutative!(*|a: &Vec3, b: &f64| -> Vec3 { a.mul(*b) });
impl_op_ex!(/ |a: &Vec3, b: &f64| -> Vec3 { a.div(*b) });

/// A four-momentum $`(p_x, p_y, p_z, E)`$ with metric $`(-, -, -, +)`$.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec4 {
    /// The $`p_x`$-component
    pub x: f64,
    /// The $`p_y`$-component
    pub y: f64,
    /// The $`p_z`$-component
    pub z: f64,
    /// The energy
    pub t: f64,
}

impl Display for Vec4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_p4_string())
    }
}

impl Vec4 {
    /// Create a new [`Vec4`] from momentum components and energy.
    pub const fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Self {
            x: px,
            y: py,
            z: pz,
            t: e,
        }
    }
    /// The zero four-vector.
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    /// Build a four-momentum from collider coordinates, using $`|\vec{p}| = p_T\cosh\eta`$.
    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        Vec3::new(pt * phi.cos(), pt * phi.sin(), pt * eta.sinh()).with_mass(mass)
    }

    pub fn px(&self) -> f64 {
        self.x
    }
    pub fn py(&self) -> f64 {
        self.y
    }
    pub fn pz(&self) -> f64 {
        self.z
    }
    pub fn e(&self) -> f64 {
        self.t
    }
    pub fn vec3(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
    /// The magnitude of the three-momentum.
    pub fn p(&self) -> f64 {
        self.vec3().mag()
    }
    pub fn pt(&self) -> f64 {
        self.vec3().perp()
    }
    pub fn eta(&self) -> f64 {
        self.vec3().eta()
    }
    pub fn phi(&self) -> f64 {
        self.vec3().phi()
    }
    pub fn beta(&self) -> Vec3 {
        self.vec3() / self.t
    }
    pub fn gamma(&self) -> f64 {
        self.t / self.mag()
    }
    pub fn mag2(&self) -> f64 {
        self.t * self.t - self.vec3().mag2()
    }
    /// The invariant mass. Slightly space-like vectors from rounding give a negative mass
    /// of the same magnitude instead of `NaN`.
    pub fn mag(&self) -> f64 {
        let m2 = self.mag2();
        if m2 < 0.0 {
            -(-m2).sqrt()
        } else {
            m2.sqrt()
        }
    }
    pub fn m2(&self) -> f64 {
        self.mag2()
    }
    pub fn m(&self) -> f64 {
        self.mag()
    }
    /// Boost by the velocity `beta`. A vanishing `beta` is the identity.
    pub fn boost(&self, beta: &Vec3) -> Self {
        let b2 = beta.dot(beta);
        if b2 <= 0.0 {
            return *self;
        }
        let gamma = 1.0 / f64::sqrt(1.0 - b2);
        let p3 = self.vec3()
            + beta * ((gamma - 1.0) * self.vec3().dot(beta) / b2 + gamma * self.t);
        p3.with_energy(gamma * (self.t + beta.dot(&self.vec3())))
    }
    /// Boost into the rest frame of `frame`.
    pub fn boost_to_rest_frame_of(&self, frame: &Vec4) -> Self {
        self.boost(&-frame.beta())
    }
    pub fn to_p4_string(&self) -> String {
        format!(
            "[e = {:.5}; p = ({:.5}, {:.5}, {:.5}); m = {:.5}]",
            self.t,
            self.x,
            self.y,
            self.z,
            self.m()
        )
    }
    pub fn add(&self, other: &Self) -> Self {
        Self::new(
            self.x + other.x,
            self.y + other.y,
            self.z + other.z,
            self.t + other.t,
        )
    }
    pub fn sub(&self, other: &Self) -> Self {
        Self::new(
            self.x - other.x,
            self.y - other.y,
            self.z - other.z,
            self.t - other.t,
        )
    }
    pub fn mul(&self, other: f64) -> Self {
        Self::new(self.x * other, self.y * other, self.z * other, self.t * other)
    }
    pub fn neg(&self) -> Self {
        Self::new(-self.x, -self.y, -self.z, -self.t)
    }
}

impl_op_ex!(+ |a: &Vec4, b: &Vec4| -> Vec4 { a.add(b) });
impl_op_ex!(-|a: &Vec4, b: &Vec4| -> Vec4 { a.sub(b) });
impl_op_ex!(-|a: &Vec4| -> Vec4 { a.neg() });
impl_op_ex_commutative!(*|a: &Vec4, b: &f64| -> Vec4 { a.mul(*b) });

impl Sum for Vec4 {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Vec4::zero(), |a, b| a + b)
    }
}

impl<'a> Sum<&'a Vec4> for Vec4 {
    fn sum<I: Iterator<Item = &'a Vec4>>(iter: I) -> Self {
        iter.fold(Vec4::zero(), |a, b| a + b)
    }
}
