use std::f64::consts::PI;
use std::fmt::Display;

use nalgebra::{
    allocator::Allocator, DMatrix, DVector, DefaultAllocator, Dim, Matrix3, OMatrix,
};
use serde::{Deserialize, Serialize};

use crate::{
    utils::{
        enums::{DecayType, HadronicDecayMode, MEtType},
        functions::{
            CHARGED_PION_MASS, ELECTRON_MASS, HADRONIC_MASS_MAX, HADRONIC_MASS_MIN, MUON_MASS,
        },
        vectors::{Vec3, Vec4},
    },
    SvfitError, SvfitResult,
};

/// Invert a covariance matrix through its Cholesky factorisation, returning the inverse and the
/// determinant. Returns `None` unless the matrix is symmetric positive definite.
pub fn invert_covariance<D: Dim>(cov: &OMatrix<f64, D, D>) -> Option<(OMatrix<f64, D, D>, f64)>
where
    DefaultAllocator: Allocator<D, D>,
{
    let chol = cov.clone().cholesky()?;
    let l = chol.l_dirty();
    let det = (0..cov.nrows())
        .map(|i| l[(i, i)] * l[(i, i)])
        .product::<f64>();
    if !det.is_finite() || det <= 0.0 {
        return None;
    }
    Some((chol.inverse(), det))
}

fn matrix_from_rows(rows: &[Vec<f64>], expected: usize) -> SvfitResult<DMatrix<f64>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, |row| row.len());
    if n_rows != expected || rows.iter().any(|row| row.len() != expected) {
        return Err(SvfitError::InvalidCovariance {
            expected,
            rows: n_rows,
            cols: n_cols,
        });
    }
    Ok(DMatrix::from_fn(expected, expected, |i, j| rows[i][j]))
}

fn matrix_to_rows(n: usize, entry: impl Fn(usize, usize) -> f64) -> Vec<Vec<f64>> {
    (0..n).map(|i| (0..n).map(|j| entry(i, j)).collect()).collect()
}

/// A reconstructed vertex position with its $`3\times 3`$ covariance.
///
/// The inverse covariance is computed once at construction; a covariance which is not positive
/// definite leaves the vertex flagged as invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VertexRecord", into = "VertexRecord")]
pub struct Vertex {
    position: Vec3,
    cov: Matrix3<f64>,
    cov_inv: Option<Matrix3<f64>>,
}

#[derive(Serialize, Deserialize)]
struct VertexRecord {
    position: Vec3,
    cov: Vec<Vec<f64>>,
}

impl TryFrom<VertexRecord> for Vertex {
    type Error = SvfitError;

    fn try_from(record: VertexRecord) -> Result<Self, Self::Error> {
        let cov = matrix_from_rows(&record.cov, 3)?;
        Ok(Vertex::new(record.position, Matrix3::from_fn(|i, j| cov[(i, j)])))
    }
}

impl From<Vertex> for VertexRecord {
    fn from(vertex: Vertex) -> Self {
        Self {
            position: vertex.position,
            cov: matrix_to_rows(3, |i, j| vertex.cov[(i, j)]),
        }
    }
}

impl Vertex {
    pub fn new(position: Vec3, cov: Matrix3<f64>) -> Self {
        let cov_inv = invert_covariance(&cov).map(|(inv, _)| inv);
        Self {
            position,
            cov,
            cov_inv,
        }
    }
    pub fn position(&self) -> Vec3 {
        self.position
    }
    pub fn cov(&self) -> &Matrix3<f64> {
        &self.cov
    }
    /// The inverse covariance, present only when the covariance is positive definite.
    pub fn cov_inv(&self) -> Option<&Matrix3<f64>> {
        self.cov_inv.as_ref()
    }
    pub fn cov_inv_is_valid(&self) -> bool {
        self.cov_inv.is_some()
    }
}

/// The leading charged daughter of a decay, used to anchor the decay-vertex line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DaughterRecord", into = "DaughterRecord")]
pub struct LeadChargedHadron {
    charge: i32,
    pt: f64,
    eta: f64,
    phi: f64,
    mass: f64,
    p4: Vec4,
}

#[derive(Serialize, Deserialize)]
struct DaughterRecord {
    charge: i32,
    pt: f64,
    eta: f64,
    phi: f64,
    mass: f64,
}

impl From<DaughterRecord> for LeadChargedHadron {
    fn from(r: DaughterRecord) -> Self {
        LeadChargedHadron::new(r.charge, r.pt, r.eta, r.phi, r.mass)
    }
}

impl From<LeadChargedHadron> for DaughterRecord {
    fn from(h: LeadChargedHadron) -> Self {
        Self {
            charge: h.charge,
            pt: h.pt,
            eta: h.eta,
            phi: h.phi,
            mass: h.mass,
        }
    }
}

impl LeadChargedHadron {
    pub fn new(charge: i32, pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        Self {
            charge,
            pt,
            eta,
            phi,
            mass,
            p4: Vec4::from_pt_eta_phi_m(pt, eta, phi, mass),
        }
    }
    pub fn charge(&self) -> i32 {
        self.charge
    }
    pub fn pt(&self) -> f64 {
        self.pt
    }
    pub fn eta(&self) -> f64 {
        self.eta
    }
    pub fn phi(&self) -> f64 {
        self.phi
    }
    pub fn mass(&self) -> f64 {
        self.mass
    }
    pub fn p4(&self) -> Vec4 {
        self.p4
    }
    pub fn p3(&self) -> Vec3 {
        self.p4.vec3()
    }
}

/// One observed decay leg.
///
/// The visible mass is replaced by a value appropriate for the decay category: the electron or
/// muon mass for leptonic decays, the charged pion mass for one-prong hadronic decays without
/// neutral pions, and otherwise the measured mass clamped to the range allowed for multi-pion
/// systems. Prompt legs keep the mass they were given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "LeptonRecord", into = "LeptonRecord")]
pub struct MeasuredLepton {
    decay_type: DecayType,
    charge: i32,
    pt: f64,
    eta: f64,
    phi: f64,
    measured_mass: f64,
    mass: f64,
    decay_mode: HadronicDecayMode,
    p4: Vec4,
    decay_vertex: Option<Vertex>,
    lead_charged_hadron: Option<LeadChargedHadron>,
}

#[derive(Serialize, Deserialize)]
struct LeptonRecord {
    decay_type: DecayType,
    charge: i32,
    pt: f64,
    eta: f64,
    phi: f64,
    mass: f64,
    #[serde(default)]
    decay_mode: HadronicDecayMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decay_vertex: Option<Vertex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lead_charged_hadron: Option<LeadChargedHadron>,
}

impl From<LeptonRecord> for MeasuredLepton {
    fn from(r: LeptonRecord) -> Self {
        let mut lepton = MeasuredLepton::new(r.decay_type, r.charge, r.pt, r.eta, r.phi, r.mass)
            .with_decay_mode(r.decay_mode);
        lepton.decay_vertex = r.decay_vertex;
        lepton.lead_charged_hadron = r.lead_charged_hadron;
        lepton
    }
}

impl From<MeasuredLepton> for LeptonRecord {
    fn from(l: MeasuredLepton) -> Self {
        Self {
            decay_type: l.decay_type,
            charge: l.charge,
            pt: l.pt,
            eta: l.eta,
            phi: l.phi,
            mass: l.measured_mass,
            decay_mode: l.decay_mode,
            decay_vertex: l.decay_vertex,
            lead_charged_hadron: l.lead_charged_hadron,
        }
    }
}

fn visible_mass(decay_type: DecayType, decay_mode: HadronicDecayMode, mass: f64) -> f64 {
    match decay_type {
        DecayType::TauToElec => ELECTRON_MASS,
        DecayType::TauToMu => MUON_MASS,
        DecayType::TauToHad => match decay_mode {
            HadronicDecayMode::OneProng0Pi0 => CHARGED_PION_MASS,
            HadronicDecayMode::Unknown => mass.clamp(CHARGED_PION_MASS, HADRONIC_MASS_MAX),
            _ => mass.clamp(HADRONIC_MASS_MIN, HADRONIC_MASS_MAX),
        },
        DecayType::Prompt => mass,
    }
}

impl Display for MeasuredLepton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (charge {:+}): pt = {:.4}, eta = {:.4}, phi = {:.4}, mass = {:.5}",
            self.decay_type, self.charge, self.pt, self.eta, self.phi, self.mass
        )
    }
}

impl MeasuredLepton {
    /// Build a leg from collider coordinates. Hadronic legs default to an unknown decay mode,
    /// see [`MeasuredLepton::with_decay_mode`].
    pub fn new(decay_type: DecayType, charge: i32, pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        let decay_mode = HadronicDecayMode::Unknown;
        let clamped = visible_mass(decay_type, decay_mode, mass);
        Self {
            decay_type,
            charge,
            pt,
            eta,
            phi,
            measured_mass: mass,
            mass: clamped,
            decay_mode,
            p4: Vec4::from_pt_eta_phi_m(pt, eta, phi, clamped),
            decay_vertex: None,
            lead_charged_hadron: None,
        }
    }
    /// Set the hadronic decay mode, which fixes the visible mass used for hadronic legs.
    pub fn with_decay_mode(mut self, decay_mode: HadronicDecayMode) -> Self {
        self.decay_mode = decay_mode;
        self.mass = visible_mass(self.decay_type, decay_mode, self.measured_mass);
        self.p4 = Vec4::from_pt_eta_phi_m(self.pt, self.eta, self.phi, self.mass);
        self
    }
    pub fn with_decay_vertex(mut self, vertex: Vertex) -> Self {
        self.decay_vertex = Some(vertex);
        self
    }
    pub fn with_lead_charged_hadron(mut self, hadron: LeadChargedHadron) -> Self {
        self.lead_charged_hadron = Some(hadron);
        self
    }

    pub fn decay_type(&self) -> DecayType {
        self.decay_type
    }
    pub fn decay_mode(&self) -> HadronicDecayMode {
        self.decay_mode
    }
    pub fn charge(&self) -> i32 {
        self.charge
    }
    pub fn pt(&self) -> f64 {
        self.pt
    }
    pub fn eta(&self) -> f64 {
        self.eta
    }
    pub fn phi(&self) -> f64 {
        self.phi
    }
    /// The visible mass after the per-category replacement.
    pub fn mass(&self) -> f64 {
        self.mass
    }
    pub fn p4(&self) -> Vec4 {
        self.p4
    }
    pub fn p3(&self) -> Vec3 {
        self.p4.vec3()
    }
    pub fn energy(&self) -> f64 {
        self.p4.e()
    }
    pub fn p(&self) -> f64 {
        self.p4.p()
    }
    pub fn is_leptonic(&self) -> bool {
        self.decay_type.is_leptonic()
    }
    pub fn is_hadronic(&self) -> bool {
        self.decay_type.is_hadronic()
    }
    pub fn is_prompt(&self) -> bool {
        self.decay_type.is_prompt()
    }
    pub fn decay_vertex(&self) -> Option<&Vertex> {
        self.decay_vertex.as_ref()
    }
    /// The leading charged daughter. A leptonic leg without an explicit daughter is its own
    /// leading charged track.
    pub fn lead_charged_hadron(&self) -> Option<LeadChargedHadron> {
        match &self.lead_charged_hadron {
            Some(hadron) => Some(hadron.clone()),
            None if self.is_leptonic() => Some(LeadChargedHadron::new(
                self.charge,
                self.pt,
                self.eta,
                self.phi,
                self.mass,
            )),
            None => None,
        }
    }
}

/// A missing-momentum measurement with its Gaussian resolution.
///
/// Hadron-collider measurements carry $`(p_x, p_y)`$ and a $`2\times 2`$ covariance; lepton-collider
/// measurements carry $`(p_x, p_y, p_z, E)`$ and a $`4\times 4`$ covariance. The normalisation
/// $`1/((2\pi)^{k/2}\sqrt{|\Sigma|})`$ is precomputed with the inverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MEtRecord", into = "MEtRecord")]
pub struct MeasuredMEt {
    met_type: MEtType,
    value: DVector<f64>,
    cov: DMatrix<f64>,
    cov_inv: Option<DMatrix<f64>>,
    const_met: f64,
}

#[derive(Serialize, Deserialize)]
struct MEtRecord {
    #[serde(default)]
    met_type: MEtType,
    value: Vec<f64>,
    cov: Vec<Vec<f64>>,
}

impl TryFrom<MEtRecord> for MeasuredMEt {
    type Error = SvfitError;

    fn try_from(r: MEtRecord) -> Result<Self, Self::Error> {
        let cov = matrix_from_rows(&r.cov, r.met_type.dimension())?;
        MeasuredMEt::from_components(r.met_type, &r.value, cov)
    }
}

impl From<MeasuredMEt> for MEtRecord {
    fn from(m: MeasuredMEt) -> Self {
        Self {
            met_type: m.met_type,
            value: m.value.iter().copied().collect(),
            cov: matrix_to_rows(m.cov.nrows(), |i, j| m.cov[(i, j)]),
        }
    }
}

impl MeasuredMEt {
    /// A transverse measurement, as at a hadron collider.
    pub fn new(px: f64, py: f64, cov: nalgebra::Matrix2<f64>) -> Self {
        Self::build(
            MEtType::ProtonProton,
            DVector::from_vec(vec![px, py]),
            DMatrix::from_fn(2, 2, |i, j| cov[(i, j)]),
        )
    }
    /// A full four-momentum measurement, as at a lepton collider.
    pub fn new_4d(px: f64, py: f64, pz: f64, energy: f64, cov: nalgebra::Matrix4<f64>) -> Self {
        Self::build(
            MEtType::ElectronPositron,
            DVector::from_vec(vec![px, py, pz, energy]),
            DMatrix::from_fn(4, 4, |i, j| cov[(i, j)]),
        )
    }
    /// Build from a flat component list, validating the dimensions against `met_type`.
    pub fn from_components(
        met_type: MEtType,
        value: &[f64],
        cov: DMatrix<f64>,
    ) -> SvfitResult<Self> {
        let k = met_type.dimension();
        if value.len() != k {
            return Err(SvfitError::DimensionError(format!(
                "{} missing momentum needs {} components, got {}",
                met_type,
                k,
                value.len()
            )));
        }
        if cov.nrows() != k || cov.ncols() != k {
            return Err(SvfitError::InvalidCovariance {
                expected: k,
                rows: cov.nrows(),
                cols: cov.ncols(),
            });
        }
        Ok(Self::build(met_type, DVector::from_column_slice(value), cov))
    }

    fn build(met_type: MEtType, value: DVector<f64>, cov: DMatrix<f64>) -> Self {
        let k = met_type.dimension() as f64;
        let (cov_inv, const_met) = match invert_covariance(&cov) {
            Some((inv, det)) => (
                Some(inv),
                1.0 / ((2.0 * PI).powf(0.5 * k) * det.abs().sqrt()),
            ),
            None => (None, 0.0),
        };
        Self {
            met_type,
            value,
            cov,
            cov_inv,
            const_met,
        }
    }

    pub fn met_type(&self) -> MEtType {
        self.met_type
    }
    pub fn px(&self) -> f64 {
        self.value[0]
    }
    pub fn py(&self) -> f64 {
        self.value[1]
    }
    /// Longitudinal component; zero for transverse measurements.
    pub fn pz(&self) -> f64 {
        match self.met_type {
            MEtType::ProtonProton => 0.0,
            MEtType::ElectronPositron => self.value[2],
        }
    }
    /// Energy component; the transverse magnitude for transverse measurements.
    pub fn energy(&self) -> f64 {
        match self.met_type {
            MEtType::ProtonProton => f64::hypot(self.value[0], self.value[1]),
            MEtType::ElectronPositron => self.value[3],
        }
    }
    pub fn value(&self) -> &DVector<f64> {
        &self.value
    }
    pub fn cov(&self) -> &DMatrix<f64> {
        &self.cov
    }
    pub fn cov_inv(&self) -> Option<&DMatrix<f64>> {
        self.cov_inv.as_ref()
    }
    pub fn cov_inv_is_valid(&self) -> bool {
        self.cov_inv.is_some()
    }
    /// Gaussian normalisation constant, zero when the covariance is not invertible.
    pub fn const_met(&self) -> f64 {
        self.const_met
    }
}

/// The measured inputs of one event: the two visible legs, the central missing-momentum
/// measurement followed by any systematic alternatives, and an optional primary vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EventRecord")]
pub struct MeasuredEvent {
    leptons: Vec<MeasuredLepton>,
    met: Vec<MeasuredMEt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    primary_vertex: Option<Vertex>,
}

#[derive(Deserialize)]
struct EventRecord {
    leptons: Vec<MeasuredLepton>,
    met: Vec<MeasuredMEt>,
    #[serde(default)]
    primary_vertex: Option<Vertex>,
}

impl TryFrom<EventRecord> for MeasuredEvent {
    type Error = SvfitError;

    fn try_from(r: EventRecord) -> Result<Self, Self::Error> {
        let event = MeasuredEvent::new(r.leptons, r.met)?;
        Ok(match r.primary_vertex {
            Some(vertex) => event.with_primary_vertex(vertex),
            None => event,
        })
    }
}

impl Display for MeasuredEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Event:")?;
        writeln!(f, "  legs:")?;
        for lepton in &self.leptons {
            writeln!(f, "    {}", lepton)?;
        }
        writeln!(f, "  MEt:")?;
        for (idx, met) in self.met.iter().enumerate() {
            writeln!(
                f,
                "    met[{idx}] ({}): px = {:.4}, py = {:.4}",
                met.met_type(),
                met.px(),
                met.py()
            )?;
        }
        if let Some(vertex) = &self.primary_vertex {
            writeln!(f, "  primary vertex: {}", vertex.position())?;
        }
        Ok(())
    }
}

impl MeasuredEvent {
    /// Create an event. The first missing-momentum entry is the central measurement; at least
    /// one is required.
    pub fn new(leptons: Vec<MeasuredLepton>, met: Vec<MeasuredMEt>) -> SvfitResult<Self> {
        if met.is_empty() {
            return Err(SvfitError::DimensionError(
                "an event needs at least one missing-momentum measurement".to_string(),
            ));
        }
        Ok(Self {
            leptons,
            met,
            primary_vertex: None,
        })
    }
    pub fn with_primary_vertex(mut self, vertex: Vertex) -> Self {
        self.primary_vertex = Some(vertex);
        self
    }
    pub fn leptons(&self) -> &[MeasuredLepton] {
        &self.leptons
    }
    pub fn met(&self) -> &[MeasuredMEt] {
        &self.met
    }
    pub fn primary_vertex(&self) -> Option<&Vertex> {
        self.primary_vertex.as_ref()
    }
    /// Invariant mass of the sum of the visible legs.
    pub fn visible_mass(&self) -> f64 {
        self.leptons.iter().map(|l| l.p4()).sum::<Vec4>().m()
    }
    /// Read an event from a JSON string.
    pub fn from_json(json: &str) -> SvfitResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
    pub fn to_json(&self) -> SvfitResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// An event that can be used to test the integrand. It contains a $`\tau \to e`$ leg and a
/// one-prong hadronic leg recoiling against a transverse missing-momentum measurement.
pub fn test_event() -> MeasuredEvent {
    let cov = nalgebra::Matrix2::new(787.352, -178.63, -178.63, 179.545);
    MeasuredEvent {
        leptons: vec![
            MeasuredLepton::new(DecayType::TauToElec, 1, 33.7393, 0.9409, -0.541458, 0.51100e-3),
            MeasuredLepton::new(DecayType::TauToHad, -1, 25.7322, 0.618228, 2.79362, 0.13957)
                .with_decay_mode(HadronicDecayMode::OneProng0Pi0),
        ],
        met: vec![MeasuredMEt::new(11.7491, -51.9172, cov)],
        primary_vertex: None,
    }
}
