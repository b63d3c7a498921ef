use nalgebra::Matrix3;

use super::diagonal_error;
use crate::{
    data::{Event, Particle},
    frame,
    manager::{var_function, Manager, VarValue},
    utils::vectors::{ThreeMomentum, Vec3},
    VarmanError, VarmanResult,
};

const AXES: [&str; 3] = ["x", "y", "z"];

fn vertex(particle: &Particle) -> Vec3 {
    frame::current().vertex(particle)
}

fn vertex_covariance(particle: &Particle) -> Matrix3<f64> {
    frame::current().vertex_error_matrix(particle)
}

/// The production vertex stored in the `prodVertX`, `prodVertY` and `prodVertZ` extra info,
/// if all three are present.
pub fn production_vertex(particle: &Particle) -> Option<Vec3> {
    Some(Vec3::new(
        particle.extra_info.get("prodVertX")?,
        particle.extra_info.get("prodVertY")?,
        particle.extra_info.get("prodVertZ")?,
    ))
}

/// The production vertex covariance stored in the `prodVertSxx` ... `prodVertSzz` extra info.
/// Missing entries are zero, so `prodVertexCov` reports only what was stored. Flight
/// variables fill the gaps from the particle's own vertex covariance instead (see
/// [`VertexPoint::production`](super::flight::VertexPoint::production)).
pub fn production_vertex_covariance(particle: &Particle) -> Matrix3<f64> {
    Matrix3::from_fn(|i, j| {
        particle
            .extra_info
            .get(&format!("prodVertS{}{}", AXES[i], AXES[j]))
            .unwrap_or(0.0)
    })
}

fn production_vertex_component(particle: &Particle, i: usize) -> f64 {
    particle
        .extra_info
        .get(&format!("prodVert{}", AXES[i].to_uppercase()))
        .unwrap_or(f64::NAN)
}

fn production_vertex_error(particle: &Particle, i: usize) -> f64 {
    let key = format!("prodVertS{}{}", AXES[i], AXES[i]);
    particle
        .extra_info
        .get(&key)
        .map_or(f64::NAN, |variance| variance.sqrt())
}

/// Distance of the vertex from the origin of the current frame over its uncertainty.
pub fn distance_significance(_: &Event, particle: &Particle) -> f64 {
    let v = vertex(particle);
    let denominator = v.dot(&(vertex_covariance(particle) * v)).sqrt();
    if denominator > 0.0 {
        v.norm_squared() / denominator
    } else {
        f64::NAN
    }
}

fn mc_decay_vertex(event: &Event, particle: &Particle) -> Option<Vec3> {
    event.mc_match(particle).map(|mc| mc.decay_vertex)
}

/// Register every vertex variable.
///
/// # Errors
///
/// Fails if a name is already registered.
pub fn register(manager: &mut Manager) -> VarmanResult<()> {
    manager.register_double(
        "dx",
        "x coordinate of the vertex (decay vertex of composites, POCA of tracks)",
        |_, p| vertex(p).x,
    )?;
    manager.register_double("dy", "y coordinate of the vertex", |_, p| vertex(p).y)?;
    manager.register_double("dz", "z coordinate of the vertex", |_, p| vertex(p).z)?;
    manager.register_alias("x", "dx")?;
    manager.register_alias("y", "dy")?;
    manager.register_alias("z", "dz")?;
    manager.register_double("dr", "transverse distance of the vertex", |_, p| {
        vertex(p).rho()
    })?;
    manager.register_alias("dRho", "dr")?;
    manager.register_double("distance", "3D distance of the vertex", |_, p| {
        vertex(p).norm()
    })?;
    manager.register_double(
        "significanceOfDistance",
        "distance of the vertex over its uncertainty",
        distance_significance,
    )?;
    manager.register_double("dxErr", "uncertainty of the vertex x coordinate", |_, p| {
        diagonal_error(&vertex_covariance(p), 0)
    })?;
    manager.register_double("dyErr", "uncertainty of the vertex y coordinate", |_, p| {
        diagonal_error(&vertex_covariance(p), 1)
    })?;
    manager.register_double("dzErr", "uncertainty of the vertex z coordinate", |_, p| {
        diagonal_error(&vertex_covariance(p), 2)
    })?;

    manager.register_double("prodVertexX", "x of the production vertex", |_, p| {
        production_vertex_component(p, 0)
    })?;
    manager.register_double("prodVertexY", "y of the production vertex", |_, p| {
        production_vertex_component(p, 1)
    })?;
    manager.register_double("prodVertexZ", "z of the production vertex", |_, p| {
        production_vertex_component(p, 2)
    })?;
    manager.register_double(
        "prodVertexXErr",
        "uncertainty of x of the production vertex",
        |_, p| production_vertex_error(p, 0),
    )?;
    manager.register_double(
        "prodVertexYErr",
        "uncertainty of y of the production vertex",
        |_, p| production_vertex_error(p, 1),
    )?;
    manager.register_double(
        "prodVertexZErr",
        "uncertainty of z of the production vertex",
        |_, p| production_vertex_error(p, 2),
    )?;
    manager.register_meta(
        "prodVertexCov",
        "element (i, j) of the production vertex covariance, with 0, 1, 2 for x, y, z",
        |_, args| {
            args.expect(2)?;
            let (i, j) = (args.index(0)?, args.index(1)?);
            if i > 2 || j > 2 {
                return Err(VarmanError::InvalidArgument {
                    name: args.name.to_string(),
                    reason: format!("indices must be 0, 1 or 2, got ({i}, {j})"),
                });
            }
            let key = format!("prodVertS{}{}", AXES[i], AXES[j]);
            Ok(var_function(move |_, particle| {
                VarValue::Double(
                    particle
                        .and_then(|p| p.extra_info.get(&key))
                        .unwrap_or(f64::NAN),
                )
            }))
        },
    )?;

    manager.register_double("mcX", "x of the generated decay vertex", |e, p| {
        mc_decay_vertex(e, p).map_or(f64::NAN, |v| v.x)
    })?;
    manager.register_double("mcY", "y of the generated decay vertex", |e, p| {
        mc_decay_vertex(e, p).map_or(f64::NAN, |v| v.y)
    })?;
    manager.register_double("mcZ", "z of the generated decay vertex", |e, p| {
        mc_decay_vertex(e, p).map_or(f64::NAN, |v| v.z)
    })?;
    manager.register_double(
        "mcDistance",
        "distance of the generated decay vertex from the origin",
        |e, p| mc_decay_vertex(e, p).map_or(f64::NAN, |v| v.norm()),
    )?;
    manager.register_double(
        "mcRho",
        "transverse distance of the generated decay vertex",
        |e, p| mc_decay_vertex(e, p).map_or(f64::NAN, |v| v.rho()),
    )?;
    manager.register_double(
        "mcProdVertexX",
        "x of the generated production vertex",
        |e, p| e.mc_match(p).map_or(f64::NAN, |mc| mc.production_vertex.x),
    )?;
    manager.register_double(
        "mcProdVertexY",
        "y of the generated production vertex",
        |e, p| e.mc_match(p).map_or(f64::NAN, |mc| mc.production_vertex.y),
    )?;
    manager.register_double(
        "mcProdVertexZ",
        "z of the generated production vertex",
        |e, p| e.mc_match(p).map_or(f64::NAN, |mc| mc.production_vertex.z),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{MCParticle, MCStatus, Matrix7},
        utils::vectors::Vec4,
    };
    use approx::assert_relative_eq;

    fn kshort_event() -> Event {
        let mut event = Event::new();
        let mc = MCParticle::new(310)
            .with_decay_vertex(Vec3::new(4.0, 5.0, 0.0))
            .with_production_vertex(Vec3::new(1.0, 2.0, 3.0))
            .with_momentum(Vec3::new(1.164, 1.552, 0.0))
            .with_status(MCStatus::Primary.bit());
        event.set_mc_particles(vec![mc]);
        let ks = Particle::new(Vec4::new(2.0, 1.164, 1.552, 0.0), 310)
            .with_vertex(Vec3::new(4.0, 5.0, 0.0));
        for (key, value) in [
            ("prodVertX", 1.0),
            ("prodVertY", 2.0),
            ("prodVertZ", 3.0),
            ("prodVertSxx", 0.1),
            ("prodVertSxy", 0.2),
            ("prodVertSxz", 0.3),
            ("prodVertSyx", 0.4),
            ("prodVertSyy", 0.5),
            ("prodVertSyz", 0.6),
            ("prodVertSzx", 0.7),
            ("prodVertSzy", 0.8),
            ("prodVertSzz", 0.9),
        ] {
            ks.extra_info.set(key, value);
        }
        let index = event.add_particle(ks);
        event.add_mc_relation(index, 0, 1.0);
        event
    }

    #[test]
    fn vertex_position() {
        let manager = Manager::default();
        let mut error = Matrix7::zeros();
        error[(4, 4)] = 0.04;
        error[(5, 5)] = 0.09;
        error[(6, 6)] = 0.16;
        let mut event = Event::new();
        let i = event.add_particle(
            Particle::new(Vec4::new(1.0, 0.0, 0.0, 0.5), 22)
                .with_vertex(Vec3::new(1.0, 2.0, 2.0))
                .with_error_matrix(error),
        );
        let p = event.particles.get(i);
        assert_eq!(manager.evaluate("dx", &event, p), 1.0);
        assert_eq!(manager.evaluate("y", &event, p), 2.0);
        assert_eq!(manager.evaluate("z", &event, p), 2.0);
        assert_relative_eq!(manager.evaluate("distance", &event, p), 3.0, epsilon = 1e-12);
        assert_relative_eq!(manager.evaluate("dRho", &event, p), 5.0_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(manager.evaluate("dxErr", &event, p), 0.2, epsilon = 1e-12);
        assert_relative_eq!(manager.evaluate("dzErr", &event, p), 0.4, epsilon = 1e-12);
        // r^2 / sqrt(x V x) = 9 / sqrt(0.04 + 0.36 + 0.64)
        assert_relative_eq!(
            manager.evaluate("significanceOfDistance", &event, p),
            9.0 / 1.04_f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn production_vertex_extra_info() {
        let manager = Manager::default();
        let event = kshort_event();
        let ks = event.particles.first();
        assert_eq!(manager.evaluate("prodVertexX", &event, ks), 1.0);
        assert_eq!(manager.evaluate("prodVertexY", &event, ks), 2.0);
        assert_eq!(manager.evaluate("prodVertexZ", &event, ks), 3.0);
        let expected = [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6], [0.7, 0.8, 0.9]];
        for (i, row) in expected.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                assert_eq!(
                    manager.evaluate(&format!("prodVertexCov({i},{j})"), &event, ks),
                    *value
                );
            }
        }
        assert_relative_eq!(manager.evaluate("prodVertexXErr", &event, ks), 0.1_f64.sqrt());
        assert_relative_eq!(manager.evaluate("prodVertexYErr", &event, ks), 0.5_f64.sqrt());
        assert_relative_eq!(manager.evaluate("prodVertexZErr", &event, ks), 0.9_f64.sqrt());
        assert_eq!(
            production_vertex(&event.particles[0]),
            Some(Vec3::new(1.0, 2.0, 3.0))
        );
        assert_eq!(production_vertex_covariance(&event.particles[0])[(2, 1)], 0.8);

        let partial = Particle::new(Vec4::new(1.0, 0.0, 0.0, 0.0), 22)
            .with_error_matrix(Matrix7::identity());
        partial.extra_info.set("prodVertSxx", 0.25);
        let covariance = production_vertex_covariance(&partial);
        assert_eq!(covariance[(0, 0)], 0.25);
        assert_eq!(covariance[(1, 1)], 0.0);
        assert_eq!(covariance[(2, 0)], 0.0);

        let (bare, _) = crate::variables::fixtures::single(Particle::new(
            Vec4::new(1.0, 0.0, 0.0, 0.0),
            22,
        ));
        assert!(manager.evaluate("prodVertexX", &bare, bare.particles.first()).is_nan());
        assert!(manager.evaluate("prodVertexCov(0,0)", &bare, bare.particles.first()).is_nan());
        assert!(manager.try_get_variable("prodVertexCov(0,3)").is_err());
        assert!(manager.try_get_variable("prodVertexCov(0)").is_err());
    }

    #[test]
    fn generated_vertices() {
        let manager = Manager::default();
        let event = kshort_event();
        let ks = event.particles.first();
        assert_eq!(manager.evaluate("mcX", &event, ks), 4.0);
        assert_eq!(manager.evaluate("mcY", &event, ks), 5.0);
        assert_eq!(manager.evaluate("mcZ", &event, ks), 0.0);
        assert_relative_eq!(manager.evaluate("mcDistance", &event, ks), 41.0_f64.sqrt());
        assert_relative_eq!(manager.evaluate("mcRho", &event, ks), 41.0_f64.sqrt());
        assert_eq!(manager.evaluate("mcProdVertexX", &event, ks), 1.0);
        assert_eq!(manager.evaluate("mcProdVertexY", &event, ks), 2.0);
        assert_eq!(manager.evaluate("mcProdVertexZ", &event, ks), 3.0);

        let (unmatched, _) = crate::variables::fixtures::single(Particle::new(
            Vec4::new(1.0, 0.0, 0.0, 0.0),
            22,
        ));
        assert!(manager.evaluate("mcX", &unmatched, unmatched.particles.first()).is_nan());
    }
}
