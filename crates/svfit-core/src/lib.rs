//! # svfit-core
//!
//! This is an internal crate used by `svfit`. It holds the kinematic primitives, the measured
//! inputs of an event and the per-leg fitted state which the likelihood integrand mutates.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Measured inputs of a single event: visible legs, missing momentum and vertices.
pub mod data;
/// The reconstructed state of one decaying leg.
pub mod fitted;
/// Boosts from the laboratory frame into the helicity frame of a $`\tau`$ pair.
pub mod frames;
/// Utility functions, enums, and constants
pub mod utils;

pub use crate::data::{LeadChargedHadron, MeasuredEvent, MeasuredLepton, MeasuredMEt, Vertex};
pub use crate::fitted::{FittedLeg, LegState};
pub use crate::frames::BoostToHelicityFrame;
pub use crate::utils::enums::{DecayType, HadronicDecayMode, MEtType, Sign};
pub use crate::utils::vectors::{Vec3, Vec4};

pub type SvfitResult<T> = Result<T, SvfitError>;

/// The error type used by all `svfit` internal methods
#[derive(Error, Debug)]
pub enum SvfitError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`serde_json::Error`].
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// An error which occurs when the integration layout does not fit together, for instance
    /// when the range vectors do not match the number of dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionError(String),
    /// An error which occurs when a leg or missing-momentum alternative is selected which does
    /// not exist.
    #[error("Index {index} is out of range for {object} (length {length})")]
    IndexError {
        /// The requested index
        index: usize,
        /// The container which was indexed
        object: String,
        /// The length of the container
        length: usize,
    },
    /// An error which occurs when an operation needs a bound event but none is present.
    #[error("No event has been bound to the integrand!")]
    NotBound,
    /// An error which occurs when a covariance matrix of the wrong shape is supplied.
    #[error("Invalid covariance matrix: expected {expected}x{expected}, got {rows}x{cols}")]
    InvalidCovariance {
        /// Expected dimension
        expected: usize,
        /// Number of rows supplied
        rows: usize,
        /// Number of columns supplied
        cols: usize,
    },
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}

impl Clone for SvfitError {
    // error sources are rarely cloneable, so clones carry the message only
    fn clone(&self) -> Self {
        let err_string = self.to_string();
        SvfitError::Custom(err_string)
    }
}

/// The reasons an event (or a single sample point) cannot be integrated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The event does not contain exactly two legs.
    LeptonCountMismatch,
    /// A missing-momentum covariance is not positive definite.
    SingularMEtCovariance,
    /// Flight-length reconstruction was requested but a vertex is missing.
    MissingPrimaryOrDecayVertex,
    /// A vertex covariance is not positive definite.
    SingularVertexCovariance,
    /// Flight-length reconstruction was requested but a leg has no leading charged daughter.
    MissingLeadingChargedDaughter,
    /// The current sample point has no physical solution. Raised and cleared per evaluation.
    UnphysicalKinematics,
}

impl ErrorCode {
    const ALL: [ErrorCode; 6] = [
        ErrorCode::LeptonCountMismatch,
        ErrorCode::SingularMEtCovariance,
        ErrorCode::MissingPrimaryOrDecayVertex,
        ErrorCode::SingularVertexCovariance,
        ErrorCode::MissingLeadingChargedDaughter,
        ErrorCode::UnphysicalKinematics,
    ];

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }

    /// Returns `true` for codes detected when an event is bound. These are sticky until the next
    /// bind and make every evaluation return zero.
    pub fn is_setup(&self) -> bool {
        !matches!(self, ErrorCode::UnphysicalKinematics)
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::LeptonCountMismatch => write!(f, "lepton count mismatch"),
            ErrorCode::SingularMEtCovariance => write!(f, "singular MEt covariance"),
            ErrorCode::MissingPrimaryOrDecayVertex => write!(f, "missing primary or decay vertex"),
            ErrorCode::SingularVertexCovariance => write!(f, "singular vertex covariance"),
            ErrorCode::MissingLeadingChargedDaughter => {
                write!(f, "missing leading charged daughter")
            }
            ErrorCode::UnphysicalKinematics => write!(f, "unphysical kinematics"),
        }
    }
}

/// A small set of [`ErrorCode`]s.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCodes(u8);

impl ErrorCodes {
    pub const fn empty() -> Self {
        Self(0)
    }
    pub fn insert(&mut self, code: ErrorCode) {
        self.0 |= code.bit();
    }
    pub fn remove(&mut self, code: ErrorCode) {
        self.0 &= !code.bit();
    }
    pub fn contains(&self, code: ErrorCode) -> bool {
        self.0 & code.bit() != 0
    }
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
    /// Returns `true` if any setup-time code is present.
    pub fn is_fatal(&self) -> bool {
        self.iter().any(|code| code.is_setup())
    }
    pub fn clear(&mut self) {
        self.0 = 0;
    }
    /// Iterate over the codes present in the set.
    pub fn iter(&self) -> impl Iterator<Item = ErrorCode> + '_ {
        ErrorCode::ALL
            .iter()
            .copied()
            .filter(move |code| self.contains(*code))
    }
}

impl FromIterator<ErrorCode> for ErrorCodes {
    fn from_iter<T: IntoIterator<Item = ErrorCode>>(iter: T) -> Self {
        let mut codes = Self::empty();
        for code in iter {
            codes.insert(code);
        }
        codes
    }
}

impl Display for ErrorCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<String> = self.iter().map(|code| code.to_string()).collect();
        write!(f, "{}", names.join(" | "))
    }
}
