use nalgebra::{Matrix3, SMatrix, SVector};

use crate::{
    data::Particle,
    manager::Manager,
    utils::{pdg, vectors::Vec3},
    VarmanResult,
};

/// Flight distance and flight time of decaying particles, and vertex separations.
pub mod flight;
/// Momentum, energy, angle and mass variables, and their uncertainties.
pub mod kinematics;
/// Aggregation over named particle lists and list membership.
pub mod lists;
/// Meta-variables which combine, transform or cache other variables.
pub mod meta;
/// Traversal of the generated decay graph and truth matching.
pub mod mc_truth;
/// Particle identification from combined detector likelihoods.
pub mod pid;
/// Vertex positions and their uncertainties.
pub mod vertex;

/// Register every built-in variable and meta-variable.
///
/// # Errors
///
/// Fails if any two variables share a name.
pub fn register_all(manager: &mut Manager) -> VarmanResult<()> {
    kinematics::register(manager)?;
    vertex::register(manager)?;
    flight::register(manager)?;
    mc_truth::register(manager)?;
    pid::register(manager)?;
    lists::register(manager)?;
    meta::register(manager)?;
    Ok(())
}

/// The uncertainty $`\sqrt{J \Sigma J^T}`$ of a scalar function with gradient `jacobian`, or
/// zero if the variance is not positive.
pub(crate) fn propagate<const N: usize>(
    covariance: &SMatrix<f64, N, N>,
    jacobian: &SVector<f64, N>,
) -> f64 {
    let variance = jacobian.dot(&(covariance * jacobian));
    if variance > 0.0 {
        variance.sqrt()
    } else {
        0.0
    }
}

/// Square root of a diagonal covariance entry, or zero if it is not positive.
pub(crate) fn diagonal_error(covariance: &Matrix3<f64>, i: usize) -> f64 {
    let variance = covariance[(i, i)];
    if variance > 0.0 {
        variance.sqrt()
    } else {
        0.0
    }
}

/// Cosine of the angle between two vectors (NaN if either is null).
pub(crate) fn cos_angle(a: &Vec3, b: &Vec3) -> f64 {
    a.dot(b) / (a.norm() * b.norm())
}

/// Opening angle between two vectors, exact at `0` and $`\pi`$ (zero if either is null).
pub(crate) fn opening_angle(a: &Vec3, b: &Vec3) -> f64 {
    a.cross(b).norm().atan2(a.dot(b))
}

/// Nominal mass of the particle's species, or NaN if the species is unknown.
pub(crate) fn nominal_mass(particle: &Particle) -> f64 {
    pdg::mass(particle.pdg).unwrap_or(f64::NAN)
}
