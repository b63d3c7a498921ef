//! Flight information is always computed from lab-frame quantities, whatever frame is current.
use nalgebra::{Matrix3, SMatrix, SVector};

use super::{nominal_mass, propagate, vertex::production_vertex};
use crate::{
    data::{Event, MCParticle, Matrix7, Particle},
    manager::{var_function, Manager, VarFunction, VarValue},
    parser::Arguments,
    utils::{
        pdg,
        vectors::{FourMomentum, Vec3},
        SPEED_OF_LIGHT,
    },
    VarmanError, VarmanResult,
};

/// A measured quantity and its propagated uncertainty.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Measurement {
    /// Central value
    pub value: f64,
    /// Uncertainty
    pub error: f64,
}

/// A decay vertex together with its covariance.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VertexPoint {
    /// Position in the lab frame
    pub position: Vec3,
    /// Covariance of the position
    pub covariance: Matrix3<f64>,
}

impl VertexPoint {
    /// The vertex of a particle.
    pub fn of(particle: &Particle) -> Self {
        Self {
            position: particle.vertex,
            covariance: particle.vertex_error_matrix(),
        }
    }

    /// The production vertex of a particle from its extra info. Covariance entries which were
    /// not stored fall back to the particle's own vertex covariance.
    pub fn production(particle: &Particle) -> Option<Self> {
        let position = production_vertex(particle)?;
        let own = particle.vertex_error_matrix();
        let axes = ["x", "y", "z"];
        let covariance = Matrix3::from_fn(|i, j| {
            particle
                .extra_info
                .get(&format!("prodVertS{}{}", axes[i], axes[j]))
                .unwrap_or(own[(i, j)])
        });
        Some(Self {
            position,
            covariance,
        })
    }
}

/// Assemble the covariance of `(px, py, pz, E, x, y, z)` of the daughter followed by `(x, y, z)`
/// of the mother vertex. The two blocks are uncorrelated.
fn flight_covariance(daughter: &Matrix7, mother: &Matrix3<f64>) -> SMatrix<f64, 10, 10> {
    let mut covariance = SMatrix::<f64, 10, 10>::zeros();
    covariance
        .fixed_view_mut::<7, 7>(0, 0)
        .copy_from(daughter);
    covariance.fixed_view_mut::<3, 3>(7, 7).copy_from(mother);
    covariance
}

/// Signed distance between the mother vertex and the daughter's decay vertex projected on the
/// daughter's momentum.
pub fn flight_distance(mother: &VertexPoint, daughter: &Particle) -> Measurement {
    let momentum = daughter.p4.momentum();
    let p = momentum.norm();
    let n = momentum / p;
    let l = daughter.vertex - mother.position;
    let value = l.dot(&n);
    let dp = (l - n * value) / p;
    let jacobian = SVector::<f64, 10>::from_column_slice(&[
        dp.x, dp.y, dp.z, 0.0, n.x, n.y, n.z, -n.x, -n.y, -n.z,
    ]);
    Measurement {
        value,
        error: propagate(
            &flight_covariance(&daughter.error_matrix, &mother.covariance),
            &jacobian,
        ),
    }
}

/// Proper decay time in ns of the daughter, $`t = m\,d / (c\,p)`$, using the nominal mass of the
/// daughter's species.
pub fn flight_time(mother: &VertexPoint, daughter: &Particle) -> Measurement {
    let momentum = daughter.p4.momentum();
    let p = momentum.norm();
    let n = momentum / p;
    let l = daughter.vertex - mother.position;
    let scale = nominal_mass(daughter) / SPEED_OF_LIGHT;
    let value = scale * l.dot(&n) / p;
    let p2 = p * p;
    let dp = (l * scale - momentum * (2.0 * value)) / p2;
    let dv = momentum * (scale / p2);
    let jacobian = SVector::<f64, 10>::from_column_slice(&[
        dp.x, dp.y, dp.z, 0.0, dv.x, dv.y, dv.z, -dv.x, -dv.y, -dv.z,
    ]);
    Measurement {
        value,
        error: propagate(
            &flight_covariance(&daughter.error_matrix, &mother.covariance),
            &jacobian,
        ),
    }
}

/// Distance between two vertices, with uncorrelated uncertainties.
pub fn vertex_distance(from: &VertexPoint, to: &VertexPoint) -> Measurement {
    let l = to.position - from.position;
    let value = l.norm();
    let u = l / value;
    let mut covariance = SMatrix::<f64, 6, 6>::zeros();
    covariance
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&from.covariance);
    covariance.fixed_view_mut::<3, 3>(3, 3).copy_from(&to.covariance);
    let jacobian = SVector::<f64, 6>::from_column_slice(&[-u.x, -u.y, -u.z, u.x, u.y, u.z]);
    Measurement {
        value,
        error: propagate(&covariance, &jacobian),
    }
}

fn own_flight<F>(particle: &Particle, f: F) -> f64
where
    F: Fn(&VertexPoint, &Particle) -> f64,
{
    VertexPoint::production(particle).map_or(f64::NAN, |origin| f(&origin, particle))
}

fn own_vertex_distance(particle: &Particle) -> Option<Measurement> {
    VertexPoint::production(particle)
        .map(|origin| vertex_distance(&origin, &VertexPoint::of(particle)))
}

/// The daughter `i` of `particle`, or its daughter `j` if given.
fn descendant<'a>(
    particle: &'a Particle,
    event: &'a Event,
    i: usize,
    j: Option<usize>,
) -> Option<&'a Particle> {
    let daughter = particle.daughter(event, i)?;
    match j {
        Some(j) => daughter.daughter(event, j),
        None => Some(daughter),
    }
}

fn daughter_indices(args: &Arguments) -> VarmanResult<(usize, Option<usize>)> {
    args.expect_range(1, 2)?;
    let i = args.index(0)?;
    let j = if args.len() == 2 {
        Some(args.index(1)?)
    } else {
        None
    };
    Ok((i, j))
}

/// Build a meta-variable function measuring between a particle's vertex and its daughter `i`
/// (or granddaughter `i:j`).
fn daughter_flight<F>(args: &Arguments, f: F) -> VarmanResult<VarFunction>
where
    F: Fn(&VertexPoint, &Particle) -> f64 + Send + Sync + 'static,
{
    let (i, j) = daughter_indices(args)?;
    Ok(var_function(move |event, particle| {
        VarValue::Double(
            particle
                .and_then(|p| {
                    descendant(p, event, i, j).map(|d| f(&VertexPoint::of(p), d))
                })
                .unwrap_or(f64::NAN),
        )
    }))
}

fn mc_flight_distance(mother: &MCParticle, daughter: &MCParticle) -> f64 {
    let l = daughter.decay_vertex - mother.decay_vertex;
    l.dot(&daughter.momentum.normalize())
}

fn mc_daughter_flight<F>(args: &Arguments, f: F) -> VarmanResult<VarFunction>
where
    F: Fn(&MCParticle, &MCParticle) -> f64 + Send + Sync + 'static,
{
    let (i, j) = daughter_indices(args)?;
    Ok(var_function(move |event, particle| {
        let value = particle.and_then(|p| {
            let mother = event.mc_match(p)?;
            let daughter = event.mc_match(descendant(p, event, i, j)?)?;
            Some(f(mother, daughter))
        });
        VarValue::Double(value.unwrap_or(f64::NAN))
    }))
}

fn daughter_vertex_distance<F>(
    manager: &Manager,
    args: &Arguments,
    f: F,
) -> VarmanResult<VarFunction>
where
    F: Fn(Measurement) -> f64 + Send + Sync + 'static,
{
    args.expect_range(1, 2)?;
    let i = args.index(0)?;
    let use_ip = match args.len() {
        1 => true,
        _ if args.get(1) == "noIP" => false,
        _ => {
            return Err(VarmanError::InvalidArgument {
                name: args.name.to_string(),
                reason: format!("the only option is \"noIP\", got \"{}\"", args.get(1)),
            })
        }
    };
    let beam = manager.beam();
    Ok(var_function(move |event, particle| {
        let value = particle.and_then(|p| {
            let daughter = p.daughter(event, i)?;
            let reference = if use_ip && p.pdg.abs() == pdg::UPSILON_4S {
                VertexPoint {
                    position: beam.ip,
                    covariance: beam.ip_covariance,
                }
            } else {
                VertexPoint::of(p)
            };
            Some(f(vertex_distance(&reference, &VertexPoint::of(daughter))))
        });
        VarValue::Double(value.unwrap_or(f64::NAN))
    }))
}

/// Register every flight information variable.
///
/// # Errors
///
/// Fails if a name is already registered.
pub fn register(manager: &mut Manager) -> VarmanResult<()> {
    manager.register_double(
        "flightDistance",
        "flight distance from the production vertex stored in extra info",
        |_, p| own_flight(p, |o, d| flight_distance(o, d).value),
    )?;
    manager.register_double(
        "flightDistanceErr",
        "uncertainty of flightDistance",
        |_, p| own_flight(p, |o, d| flight_distance(o, d).error),
    )?;
    manager.register_double(
        "flightTime",
        "flight time in ns from the production vertex stored in extra info",
        |_, p| own_flight(p, |o, d| flight_time(o, d).value),
    )?;
    manager.register_double("flightTimeErr", "uncertainty of flightTime", |_, p| {
        own_flight(p, |o, d| flight_time(o, d).error)
    })?;
    manager.register_meta(
        "flightDistanceOfDaughter",
        "flightDistanceOfDaughter(i[, j]): flight distance of daughter i (or its daughter j) from this particle's vertex",
        |_, args| daughter_flight(args, |o, d| flight_distance(o, d).value),
    )?;
    manager.register_meta(
        "flightDistanceOfDaughterErr",
        "uncertainty of flightDistanceOfDaughter",
        |_, args| daughter_flight(args, |o, d| flight_distance(o, d).error),
    )?;
    manager.register_meta(
        "flightTimeOfDaughter",
        "flightTimeOfDaughter(i[, j]): flight time of daughter i (or its daughter j) from this particle's vertex",
        |_, args| daughter_flight(args, |o, d| flight_time(o, d).value),
    )?;
    manager.register_meta(
        "flightTimeOfDaughterErr",
        "uncertainty of flightTimeOfDaughter",
        |_, args| daughter_flight(args, |o, d| flight_time(o, d).error),
    )?;
    manager.register_meta(
        "mcFlightDistanceOfDaughter",
        "generated flight distance between the matches of this particle and of daughter i (or its daughter j)",
        |_, args| mc_daughter_flight(args, mc_flight_distance),
    )?;
    manager.register_meta(
        "mcFlightTimeOfDaughter",
        "generated flight time between the matches of this particle and of daughter i (or its daughter j)",
        |_, args| {
            mc_daughter_flight(args, |mother, daughter| {
                daughter.mass / SPEED_OF_LIGHT * mc_flight_distance(mother, daughter)
                    / daughter.momentum.norm()
            })
        },
    )?;
    manager.register_double(
        "vertexDistance",
        "distance between the production and decay vertex",
        |_, p| own_vertex_distance(p).map_or(f64::NAN, |m| m.value),
    )?;
    manager.register_double(
        "vertexDistanceErr",
        "uncertainty of vertexDistance",
        |_, p| own_vertex_distance(p).map_or(f64::NAN, |m| m.error),
    )?;
    manager.register_double(
        "vertexDistanceSignificance",
        "vertexDistance over its uncertainty",
        |_, p| own_vertex_distance(p).map_or(f64::NAN, |m| m.value / m.error),
    )?;
    manager.register_meta(
        "vertexDistanceOfDaughter",
        "vertexDistanceOfDaughter(i[, noIP]): distance between this particle's vertex (the IP for an Upsilon(4S) unless noIP is given) and the vertex of daughter i",
        |manager, args| daughter_vertex_distance(manager, args, |m| m.value),
    )?;
    manager.register_meta(
        "vertexDistanceOfDaughterErr",
        "uncertainty of vertexDistanceOfDaughter",
        |manager, args| daughter_vertex_distance(manager, args, |m| m.error),
    )?;
    manager.register_meta(
        "vertexDistanceOfDaughterSignificance",
        "vertexDistanceOfDaughter over its uncertainty",
        |manager, args| daughter_vertex_distance(manager, args, |m| m.value / m.error),
    )?;
    Ok(())
}
