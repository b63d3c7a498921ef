use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// The kind of object a reconstructed [`Particle`](crate::data::Particle) was built from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticleSource {
    /// A charged track.
    Track,
    /// A calorimeter cluster.
    ECLCluster,
    /// A muon/K-long detector cluster.
    KLMCluster,
    /// A reconstructed V0 (two-track displaced vertex).
    V0,
    /// A generated particle promoted to a reconstructed one.
    MCParticle,
    /// A combination of daughters.
    Composite,
    /// Unknown origin.
    #[default]
    Undefined,
}
impl ParticleSource {
    /// `true` for sources which refer to an object in another array.
    pub fn has_source_object(&self) -> bool {
        !matches!(self, ParticleSource::Composite | ParticleSource::Undefined)
    }
}
impl Display for ParticleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticleSource::Track => write!(f, "Track"),
            ParticleSource::ECLCluster => write!(f, "ECLCluster"),
            ParticleSource::KLMCluster => write!(f, "KLMCluster"),
            ParticleSource::V0 => write!(f, "V0"),
            ParticleSource::MCParticle => write!(f, "MCParticle"),
            ParticleSource::Composite => write!(f, "Composite"),
            ParticleSource::Undefined => write!(f, "Undefined"),
        }
    }
}

/// Whether a particle is its own antiparticle for bookkeeping purposes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlavorType {
    /// Self-conjugate (or treated as such).
    #[default]
    Unflavored,
    /// Distinct from its antiparticle.
    Flavored,
}
impl Display for FlavorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlavorType::Unflavored => write!(f, "unflavored"),
            FlavorType::Flavored => write!(f, "flavored"),
        }
    }
}

/// Subdetectors which provide particle identification likelihoods.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Detector {
    /// Silicon vertex detector (dE/dx).
    SVD,
    /// Central drift chamber (dE/dx).
    CDC,
    /// Time-of-propagation counter.
    TOP,
    /// Aerogel ring-imaging Cherenkov detector.
    ARICH,
    /// Electromagnetic calorimeter.
    ECL,
    /// K-long and muon detector.
    KLM,
}
impl Detector {
    /// Every detector, in storage order.
    pub const ALL: [Detector; 6] = [
        Detector::SVD,
        Detector::CDC,
        Detector::TOP,
        Detector::ARICH,
        Detector::ECL,
        Detector::KLM,
    ];
    /// Position of the detector in [`Detector::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }
    /// Parse a detector name into a set of detectors. `"ALL"` expands to every detector.
    pub fn parse_set(s: &str) -> Result<Vec<Detector>, String> {
        match s.trim().to_lowercase().as_str() {
            "all" | "default" => Ok(Detector::ALL.to_vec()),
            other => other.parse::<Detector>().map(|d| vec![d]),
        }
    }
}
impl Display for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Detector::SVD => write!(f, "SVD"),
            Detector::CDC => write!(f, "CDC"),
            Detector::TOP => write!(f, "TOP"),
            Detector::ARICH => write!(f, "ARICH"),
            Detector::ECL => write!(f, "ECL"),
            Detector::KLM => write!(f, "KLM"),
        }
    }
}
impl FromStr for Detector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "svd" => Ok(Self::SVD),
            "cdc" => Ok(Self::CDC),
            "top" => Ok(Self::TOP),
            "arich" => Ok(Self::ARICH),
            "ecl" => Ok(Self::ECL),
            "klm" => Ok(Self::KLM),
            _ => Err("Invalid detector".to_string()),
        }
    }
}

/// Charged-particle hypotheses for which PID likelihoods are stored.
///
/// The declaration order is the fixed order used for tie-breaking.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hypothesis {
    /// $`e`$
    Electron,
    /// $`\mu`$
    Muon,
    /// $`\pi`$
    Pion,
    /// $`K`$
    Kaon,
    /// $`p`$
    Proton,
    /// $`d`$
    Deuteron,
}
impl Hypothesis {
    /// Every hypothesis, in tie-breaking order.
    pub const ALL: [Hypothesis; 6] = [
        Hypothesis::Electron,
        Hypothesis::Muon,
        Hypothesis::Pion,
        Hypothesis::Kaon,
        Hypothesis::Proton,
        Hypothesis::Deuteron,
    ];
    /// Position of the hypothesis in [`Hypothesis::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }
    /// The (positive) PDG code of the hypothesis.
    pub fn pdg(&self) -> i32 {
        match self {
            Hypothesis::Electron => 11,
            Hypothesis::Muon => 13,
            Hypothesis::Pion => 211,
            Hypothesis::Kaon => 321,
            Hypothesis::Proton => 2212,
            Hypothesis::Deuteron => 1000010020,
        }
    }
    /// The hypothesis matching a PDG code, ignoring its sign.
    pub fn from_pdg(pdg: i32) -> Option<Hypothesis> {
        Hypothesis::ALL.into_iter().find(|h| h.pdg() == pdg.abs())
    }
}
impl Display for Hypothesis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hypothesis::Electron => write!(f, "electron"),
            Hypothesis::Muon => write!(f, "muon"),
            Hypothesis::Pion => write!(f, "pion"),
            Hypothesis::Kaon => write!(f, "kaon"),
            Hypothesis::Proton => write!(f, "proton"),
            Hypothesis::Deuteron => write!(f, "deuteron"),
        }
    }
}
impl FromStr for Hypothesis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "electron" | "e" | "11" => Ok(Self::Electron),
            "muon" | "mu" | "13" => Ok(Self::Muon),
            "pion" | "pi" | "211" => Ok(Self::Pion),
            "kaon" | "k" | "321" => Ok(Self::Kaon),
            "proton" | "p" | "2212" => Ok(Self::Proton),
            "deuteron" | "d" | "1000010020" => Ok(Self::Deuteron),
            _ => Err("Invalid hypothesis".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_displays() {
        assert_eq!(format!("{}", ParticleSource::ECLCluster), "ECLCluster");
        assert_eq!(format!("{}", FlavorType::Flavored), "flavored");
        assert_eq!(format!("{}", Detector::ARICH), "ARICH");
        assert_eq!(format!("{}", Hypothesis::Deuteron), "deuteron");
    }

    #[test]
    fn enum_from_str() {
        assert_eq!("top".parse::<Detector>(), Ok(Detector::TOP));
        assert_eq!(" KLM ".parse::<Detector>(), Ok(Detector::KLM));
        assert!("PXD".parse::<Detector>().is_err());
        assert_eq!(Detector::parse_set("ALL"), Ok(Detector::ALL.to_vec()));
        assert_eq!("mu".parse::<Hypothesis>(), Ok(Hypothesis::Muon));
        assert_eq!("2212".parse::<Hypothesis>(), Ok(Hypothesis::Proton));
    }

    #[test]
    fn hypothesis_pdg_codes() {
        assert_eq!(Hypothesis::from_pdg(-211), Some(Hypothesis::Pion));
        assert_eq!(Hypothesis::from_pdg(22), None);
        for (i, h) in Hypothesis::ALL.iter().enumerate() {
            assert_eq!(h.index(), i);
        }
        assert!(!ParticleSource::Composite.has_source_object());
        assert!(ParticleSource::Track.has_source_object());
    }
}
