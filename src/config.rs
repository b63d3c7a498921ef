use std::path::Path;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::{
    utils::{
        pdg,
        vectors::{FourMomentum, ThreeMomentum, Vec3, Vec4},
    },
    VarmanResult,
};

/// Collider and interaction-point parameters used by the CMS frame and by beam-constrained
/// variables like `Mbc`, `deltaE` and the recoil quantities.
///
/// The high-energy ring (HER, electrons) travels along $`+z`$ and the low-energy ring (LER,
/// positrons) along $`-z`$, both tilted towards $`+x`$ by half of the crossing angle.
///
/// # Examples
///
/// ```ignore
/// let beam = BeamParameters::from_json(r#"{"her_energy": 7.0, "ler_energy": 4.0,
///     "crossing_angle": 0.0415}"#)?;
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamParameters {
    /// Energy of the electron beam in GeV
    pub her_energy: f64,
    /// Energy of the positron beam in GeV
    pub ler_energy: f64,
    /// Half of the full crossing angle in radians
    pub crossing_angle: f64,
    /// Nominal interaction point in cm
    pub ip: Vec3,
    /// Covariance of the interaction point (beam spot size) in cm²
    pub ip_covariance: Matrix3<f64>,
}

impl Default for BeamParameters {
    fn default() -> Self {
        Self {
            her_energy: 7.0,
            ler_energy: 4.0,
            crossing_angle: 0.0415,
            ip: Vec3::zeros(),
            ip_covariance: Matrix3::from_diagonal(&Vec3::new(1.0e-6, 3.6e-11, 1.225e-3)),
        }
    }
}

impl BeamParameters {
    /// Parse parameters from a JSON document. Missing fields take their default values.
    pub fn from_json(json: &str) -> VarmanResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read parameters from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> VarmanResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Four-momentum of the electron beam.
    pub fn her(&self) -> Vec4 {
        let p = (self.her_energy.powi(2) - self.electron_mass().powi(2)).sqrt();
        Vec3::new(
            p * self.crossing_angle.sin(),
            0.0,
            p * self.crossing_angle.cos(),
        )
        .with_energy(self.her_energy)
    }

    /// Four-momentum of the positron beam.
    pub fn ler(&self) -> Vec4 {
        let p = (self.ler_energy.powi(2) - self.electron_mass().powi(2)).sqrt();
        Vec3::new(
            p * self.crossing_angle.sin(),
            0.0,
            -p * self.crossing_angle.cos(),
        )
        .with_energy(self.ler_energy)
    }

    /// Four-momentum of the colliding system in the lab frame.
    pub fn beam_momentum(&self) -> Vec4 {
        self.her() + self.ler()
    }

    /// Invariant mass of the colliding system.
    pub fn cms_energy(&self) -> f64 {
        self.beam_momentum().m()
    }

    /// Velocity of the center-of-mass system in the lab frame.
    pub fn boost_vector(&self) -> Vec3 {
        self.beam_momentum().beta()
    }

    fn electron_mass(&self) -> f64 {
        pdg::mass(pdg::ELECTRON).unwrap_or(0.000510998950)
    }
}
