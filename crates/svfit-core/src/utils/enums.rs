use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::SvfitError;

/// The decay category of a measured leg.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecayType {
    /// $`\tau \to e \nu \bar{\nu}`$
    TauToElec,
    /// $`\tau \to \mu \nu \bar{\nu}`$
    TauToMu,
    /// $`\tau \to \text{hadrons} + \nu`$
    TauToHad,
    /// A stable particle produced directly at the primary vertex, with no invisible daughters.
    Prompt,
}

impl DecayType {
    /// Returns `true` for the two three-body leptonic decays.
    pub fn is_leptonic(&self) -> bool {
        matches!(self, Self::TauToElec | Self::TauToMu)
    }
    pub fn is_hadronic(&self) -> bool {
        matches!(self, Self::TauToHad)
    }
    pub fn is_prompt(&self) -> bool {
        matches!(self, Self::Prompt)
    }
}

impl Display for DecayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecayType::TauToElec => write!(f, "tau -> e"),
            DecayType::TauToMu => write!(f, "tau -> mu"),
            DecayType::TauToHad => write!(f, "tau -> had"),
            DecayType::Prompt => write!(f, "prompt"),
        }
    }
}

impl FromStr for DecayType {
    type Err = SvfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(' ', "").as_str() {
            "tautoelec" | "tau->e" | "e" | "elec" | "electron" => Ok(Self::TauToElec),
            "tautomu" | "tau->mu" | "mu" | "muon" => Ok(Self::TauToMu),
            "tautohad" | "tau->had" | "had" | "hadronic" => Ok(Self::TauToHad),
            "prompt" | "stable" => Ok(Self::Prompt),
            _ => Err(SvfitError::ParseError {
                name: s.to_string(),
                object: "DecayType".to_string(),
            }),
        }
    }
}

/// Reconstructed hadronic decay mode, labelled by the number of charged prongs and neutral pions.
///
/// The integer codes follow the usual convention `5 * (n_prongs - 1) + n_pi0`, with `-1` for an
/// undetermined mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HadronicDecayMode {
    /// One charged pion, no neutral pions
    OneProng0Pi0,
    /// One charged pion, one neutral pion
    OneProng1Pi0,
    /// One charged pion, two neutral pions
    OneProng2Pi0,
    /// Three charged pions, no neutral pions
    ThreeProng0Pi0,
    /// Three charged pions, one neutral pion
    ThreeProng1Pi0,
    /// No decay mode was reconstructed
    #[default]
    Unknown,
}

impl HadronicDecayMode {
    /// The integer code of this mode.
    pub fn code(&self) -> i32 {
        match self {
            Self::OneProng0Pi0 => 0,
            Self::OneProng1Pi0 => 1,
            Self::OneProng2Pi0 => 2,
            Self::ThreeProng0Pi0 => 10,
            Self::ThreeProng1Pi0 => 11,
            Self::Unknown => -1,
        }
    }
}

impl TryFrom<i32> for HadronicDecayMode {
    type Error = SvfitError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::OneProng0Pi0),
            1 => Ok(Self::OneProng1Pi0),
            2 => Ok(Self::OneProng2Pi0),
            10 => Ok(Self::ThreeProng0Pi0),
            11 => Ok(Self::ThreeProng1Pi0),
            -1 => Ok(Self::Unknown),
            _ => Err(SvfitError::ParseError {
                name: value.to_string(),
                object: "HadronicDecayMode".to_string(),
            }),
        }
    }
}

impl Display for HadronicDecayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HadronicDecayMode::OneProng0Pi0 => write!(f, "1-prong 0pi0"),
            HadronicDecayMode::OneProng1Pi0 => write!(f, "1-prong 1pi0"),
            HadronicDecayMode::OneProng2Pi0 => write!(f, "1-prong 2pi0"),
            HadronicDecayMode::ThreeProng0Pi0 => write!(f, "3-prong 0pi0"),
            HadronicDecayMode::ThreeProng1Pi0 => write!(f, "3-prong 1pi0"),
            HadronicDecayMode::Unknown => write!(f, "unknown"),
        }
    }
}

/// The collider environment, which fixes how many components of the missing momentum are
/// measured.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MEtType {
    /// Hadron collider: only $`(p_x, p_y)`$ of the missing momentum is known.
    #[default]
    ProtonProton,
    /// Lepton collider: the full missing four-momentum $`(p_x, p_y, p_z, E)`$ is known.
    ElectronPositron,
}

impl MEtType {
    /// Number of measured components.
    pub fn dimension(&self) -> usize {
        match self {
            MEtType::ProtonProton => 2,
            MEtType::ElectronPositron => 4,
        }
    }
}

impl Display for MEtType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MEtType::ProtonProton => write!(f, "pp"),
            MEtType::ElectronPositron => write!(f, "ee"),
        }
    }
}

impl FromStr for MEtType {
    type Err = SvfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pp" | "protonproton" | "proton-proton" | "hadron" => Ok(Self::ProtonProton),
            "ee" | "electronpositron" | "electron-positron" | "lepton" => {
                Ok(Self::ElectronPositron)
            }
            _ => Err(SvfitError::ParseError {
                name: s.to_string(),
                object: "MEtType".to_string(),
            }),
        }
    }
}

/// A simple enum describing a binary sign, used to pick the $`\tau^+`$ or $`\tau^-`$ of a pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    /// A positive indicator.
    Positive,
    /// A negative indicator.
    Negative,
}

impl Display for Sign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sign::Positive => write!(f, "+"),
            Sign::Negative => write!(f, "-"),
        }
    }
}

impl FromStr for Sign {
    type Err = SvfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "+" | "plus" | "pos" | "positive" => Ok(Self::Positive),
            "-" | "minus" | "neg" | "negative" => Ok(Self::Negative),
            _ => Err(SvfitError::ParseError {
                name: s.to_string(),
                object: "Sign".to_string(),
            }),
        }
    }
}
