use log::{error, warn};
use nalgebra::{Matrix3, Matrix4, Vector4};

use super::{cos_angle, diagonal_error, nominal_mass, propagate};
use crate::{
    config::BeamParameters,
    data::{Event, Particle},
    frame::{self, CMSFrame, ReferenceFrame},
    manager::{var_function, Manager, VarValue},
    utils::{
        pdg,
        vectors::{FourMomentum, ThreeMomentum, Vec3, Vec4},
    },
    VarmanResult,
};

fn p4(particle: &Particle) -> Vec4 {
    frame::current().momentum(particle)
}

fn momentum_covariance(particle: &Particle) -> Matrix3<f64> {
    frame::current()
        .momentum_error_matrix(particle)
        .fixed_view::<3, 3>(0, 0)
        .into_owned()
}

/// Magnitude of the momentum in the current frame.
pub fn momentum(_: &Event, particle: &Particle) -> f64 {
    p4(particle).p()
}

/// Energy in the current frame.
pub fn energy(_: &Event, particle: &Particle) -> f64 {
    p4(particle).e()
}

/// Transverse momentum in the current frame.
pub fn transverse_momentum(_: &Event, particle: &Particle) -> f64 {
    p4(particle).pt()
}

/// Polar angle of the momentum in the current frame.
pub fn theta(_: &Event, particle: &Particle) -> f64 {
    p4(particle).momentum().theta()
}

/// Cosine of the polar angle of the momentum in the current frame.
pub fn cos_theta(_: &Event, particle: &Particle) -> f64 {
    p4(particle).momentum().costheta()
}

/// Azimuthal angle of the momentum in the current frame.
pub fn phi(_: &Event, particle: &Particle) -> f64 {
    p4(particle).momentum().phi()
}

/// Uncertainty of the momentum magnitude.
pub fn momentum_error(_: &Event, particle: &Particle) -> f64 {
    let p = p4(particle).momentum();
    let (cos_phi, sin_phi) = (p.phi().cos(), p.phi().sin());
    let cos_theta = p.costheta();
    let sin_theta = cos_theta.acos().sin();
    let jacobian = Vec3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta);
    propagate(&momentum_covariance(particle), &jacobian)
}

/// Uncertainty of the energy.
pub fn energy_error(_: &Event, particle: &Particle) -> f64 {
    let variance = frame::current().momentum_error_matrix(particle)[(3, 3)];
    if variance > 0.0 {
        variance.sqrt()
    } else {
        0.0
    }
}

/// Uncertainty of the transverse momentum.
pub fn transverse_momentum_error(_: &Event, particle: &Particle) -> f64 {
    let p = p4(particle);
    let pt = p.pt();
    let jacobian = Vec3::new(p.px() / pt, p.py() / pt, 0.0);
    propagate(&momentum_covariance(particle), &jacobian)
}

/// Uncertainty of the polar angle.
pub fn theta_error(_: &Event, particle: &Particle) -> f64 {
    let p = p4(particle).momentum();
    let (cos_phi, sin_phi) = (p.phi().cos(), p.phi().sin());
    let cos_theta = p.costheta();
    let sin_theta = cos_theta.acos().sin();
    let mag = p.norm();
    let jacobian = Vec3::new(
        cos_theta * cos_phi / mag,
        cos_theta * sin_phi / mag,
        -sin_theta / mag,
    );
    propagate(&momentum_covariance(particle), &jacobian)
}

/// Uncertainty of the cosine of the polar angle.
pub fn cos_theta_error(event: &Event, particle: &Particle) -> f64 {
    (theta_error(event, particle) * theta(event, particle).sin()).abs()
}

/// Uncertainty of the azimuthal angle.
pub fn phi_error(_: &Event, particle: &Particle) -> f64 {
    let p = p4(particle);
    let pt2 = p.pt().powi(2);
    let jacobian = Vec3::new(-p.py() / pt2, p.px() / pt2, 0.0);
    propagate(&momentum_covariance(particle), &jacobian)
}

/// Invariant mass of the summed daughter momenta, or the particle's mass if it has no
/// daughters.
pub fn invariant_mass(event: &Event, particle: &Particle) -> f64 {
    if particle.daughters.is_empty() {
        return particle.mass;
    }
    particle
        .daughter_particles(event)
        .iter()
        .map(|d| d.p4)
        .sum::<Vec4>()
        .m()
}

/// Uncertainty of the mass, from the summed momentum covariances of the daughters.
pub fn mass_error(event: &Event, particle: &Particle) -> f64 {
    let covariance: Matrix4<f64> = particle
        .daughter_particles(event)
        .iter()
        .map(|d| d.momentum_error_matrix())
        .sum();
    let m = particle.mass;
    let jacobian = Vector4::new(
        -particle.p4.px() / m,
        -particle.p4.py() / m,
        -particle.p4.pz() / m,
        particle.p4.e() / m,
    );
    propagate(&covariance, &jacobian)
}

/// Deviation of the mass from the nominal mass, in units of [`mass_error`].
pub fn mass_significance(event: &Event, particle: &Particle) -> f64 {
    (particle.mass - nominal_mass(particle)) / mass_error(event, particle)
}

/// Energy released in the decay, $`M - \sum_i m_i`$.
pub fn released_energy(event: &Event, particle: &Particle) -> f64 {
    particle.mass
        - particle
            .daughter_particles(event)
            .iter()
            .map(|d| d.mass)
            .sum::<f64>()
}

/// Released energy relative to the nominal masses of the mother and the daughters.
pub fn released_energy_deviation(event: &Event, particle: &Particle) -> f64 {
    particle.mass
        - nominal_mass(particle)
        - particle
            .daughter_particles(event)
            .iter()
            .map(|d| d.mass - nominal_mass(d))
            .sum::<f64>()
}

/// Cosine of the helicity angle: the angle between the particle's momentum and the daughter
/// axis (two daughters) or the decay-plane normal (three daughters) in its rest frame.
/// Returns zero for other decays.
pub fn cos_helicity_angle(event: &Event, particle: &Particle) -> f64 {
    let frame = frame::current();
    let mother = frame.momentum(particle);
    let mother_boost = -mother.beta();
    let mother_momentum = mother.momentum();
    let daughters = particle.daughter_particles(event);
    let rest = |d: &Particle| frame.momentum(d).boost(&mother_boost);
    match *daughters.as_slice() {
        [d1, d2] => {
            let is_conversion = |d: &Particle| {
                d.daughters.len() == 2
                    && d.daughter(event, 0)
                        .is_some_and(|e| e.pdg.abs() == pdg::ELECTRON)
            };
            if is_conversion(d1) || is_conversion(d2) {
                let photon = if d2.daughters.len() == 2 { d1 } else { d2 };
                return cos_angle(&mother_momentum, &rest(photon).momentum());
            }
            let axis = (rest(d2) - rest(d1)).momentum();
            cos_angle(&mother_momentum, &axis)
        }
        [d1, d2, d3] => {
            let p12 = (rest(d2) - rest(d1)).momentum();
            let p13 = (rest(d3) - rest(d1)).momentum();
            cos_angle(&mother_momentum, &p12.cross(&p13))
        }
        _ => 0.0,
    }
}

fn recoil(beam: &BeamParameters, particle: &Particle) -> Vec4 {
    beam.beam_momentum() - particle.p4
}

/// Half the Upsilon(4S) mass, the beam energy assumed when the beams are below the B pair
/// threshold.
const NOMINAL_BEAM_ENERGY: f64 = 10.5794 / 2.0;

/// Cosine of the center-of-mass angle between a B meson with four-momentum `p4` and a B of
/// nominal mass carrying the beam energy, assuming only massless particles were lost.
///
/// Returns NaN, with an error, for anything but a charged or neutral B.
pub(crate) fn cos_theta_to_nominal_b(beam: &BeamParameters, pdg_code: i32, p4: &Vec4) -> f64 {
    if !matches!(pdg_code.abs(), 511 | 521) {
        error!(
            "cosThetaBetweenParticleAndNominalB is only meant for B mesons, not PDG {}",
            pdg_code
        );
        return f64::NAN;
    }
    let m_b = pdg::mass(pdg_code).unwrap_or(f64::NAN);
    let mut e_beam = beam.cms_energy() / 2.0;
    if e_beam < m_b {
        e_beam = NOMINAL_BEAM_ENERGY;
    }
    let p_b = (e_beam * e_beam - m_b * m_b).sqrt();
    let cms = CMSFrame::new(beam).transform_momentum(p4);
    (2.0 * e_beam * cms.e() - m_b * m_b - cms.m().powi(2)) / (2.0 * p_b * cms.p())
}

/// Cosine of the angle between daughter `i` and the beam, both seen from the rest frame of the
/// particle.
fn cos_helicity_angle_to_beam(beam: &Vec4, event: &Event, particle: &Particle, i: usize) -> f64 {
    let Some(daughter) = particle.daughter(event, i) else {
        warn!("cosHelicityAngleIfCMSIsTheMother: no daughter {}", i);
        return f64::NAN;
    };
    let boost = -particle.p4.beta();
    cos_angle(
        &beam.boost(&boost).momentum(),
        &daughter.p4.boost(&boost).momentum(),
    )
}

fn back_to_back(beam: &BeamParameters, particle: &Particle) -> Vec3 {
    let cms = CMSFrame::new(beam).transform_momentum(&particle.p4);
    let flipped = Vec4::new(cms.e(), -cms.px(), -cms.py(), -cms.pz());
    flipped.boost(&beam.boost_vector()).momentum()
}

/// Register every kinematic variable.
///
/// # Errors
///
/// Fails if a name is already registered.
pub fn register(manager: &mut Manager) -> VarmanResult<()> {
    manager.register_double("p", "momentum magnitude", momentum)?;
    manager.register_double("E", "energy", energy)?;
    manager.register_double("px", "momentum component x", |_, p| p4(p).px())?;
    manager.register_double("py", "momentum component y", |_, p| p4(p).py())?;
    manager.register_double("pz", "momentum component z", |_, p| p4(p).pz())?;
    manager.register_double("pt", "transverse momentum", transverse_momentum)?;
    manager.register_double("pErr", "error of momentum magnitude", momentum_error)?;
    manager.register_double("EErr", "error of energy", energy_error)?;
    manager.register_double("pxErr", "error of momentum component x", |_, p| {
        diagonal_error(&momentum_covariance(p), 0)
    })?;
    manager.register_double("pyErr", "error of momentum component y", |_, p| {
        diagonal_error(&momentum_covariance(p), 1)
    })?;
    manager.register_double("pzErr", "error of momentum component z", |_, p| {
        diagonal_error(&momentum_covariance(p), 2)
    })?;
    manager.register_double(
        "ptErr",
        "error of transverse momentum",
        transverse_momentum_error,
    )?;
    manager.register_double("theta", "polar angle", theta)?;
    manager.register_double("thetaErr", "error of polar angle", theta_error)?;
    manager.register_double("cosTheta", "cosine of the polar angle", cos_theta)?;
    manager.register_double(
        "cosThetaErr",
        "error of the cosine of the polar angle",
        cos_theta_error,
    )?;
    manager.register_double("phi", "azimuthal angle", phi)?;
    manager.register_double("phiErr", "error of azimuthal angle", phi_error)?;

    manager.register_double(
        "M",
        "mass (determined from the particle's momentum unless set otherwise)",
        |_, p| p.mass,
    )?;
    manager.register_double("M2", "squared invariant mass of the momentum", |_, p| {
        p.p4.m2()
    })?;
    manager.register_double(
        "InvM",
        "invariant mass of the summed daughter momenta",
        invariant_mass,
    )?;
    manager.register_double("ErrM", "uncertainty of the invariant mass", mass_error)?;
    manager.register_double(
        "SigM",
        "signed deviation of the mass from the nominal mass in units of ErrM",
        mass_significance,
    )?;
    manager.register_double("dM", "mass minus nominal mass", |_, p| {
        p.mass - nominal_mass(p)
    })?;
    manager.register_double("Q", "released energy in decay", released_energy)?;
    manager.register_double(
        "dQ",
        "released energy in decay minus the nominal one",
        released_energy_deviation,
    )?;

    let beam = manager.beam();
    manager.register_double(
        "xp",
        "scaled momentum: CMS momentum over its kinematic limit",
        move |_, p| {
            let s = beam.cms_energy();
            CMSFrame::new(&beam).transform_momentum(&p.p4).p()
                / (s * s / 4.0 - p.mass * p.mass).sqrt()
        },
    )?;
    let beam = manager.beam();
    manager.register_double("Mbc", "beam-constrained mass", move |_, p| {
        let e = beam.cms_energy() / 2.0;
        let m2 = e * e - CMSFrame::new(&beam).transform_momentum(&p.p4).momentum().norm_squared();
        if m2 > 0.0 {
            m2.sqrt()
        } else {
            0.0
        }
    })?;
    let beam = manager.beam();
    manager.register_double("deltaE", "CMS energy minus the beam energy", move |_, p| {
        CMSFrame::new(&beam).transform_momentum(&p.p4).e() - beam.cms_energy() / 2.0
    })?;

    let beam = manager.beam();
    manager.register_double("mRecoil", "invariant mass of the recoiling system", move |_, p| {
        recoil(&beam, p).m()
    })?;
    let beam = manager.beam();
    manager.register_double(
        "m2Recoil",
        "squared invariant mass of the recoiling system",
        move |_, p| recoil(&beam, p).m2(),
    )?;
    let beam = manager.beam();
    manager.register_double("eRecoil", "energy of the recoiling system", move |_, p| {
        frame::current().transform_momentum(&recoil(&beam, p)).e()
    })?;
    let beam = manager.beam();
    manager.register_double("pRecoil", "momentum of the recoiling system", move |_, p| {
        frame::current().transform_momentum(&recoil(&beam, p)).p()
    })?;
    let beam = manager.beam();
    manager.register_double(
        "pxRecoil",
        "momentum component x of the recoiling system",
        move |_, p| frame::current().transform_momentum(&recoil(&beam, p)).px(),
    )?;
    let beam = manager.beam();
    manager.register_double(
        "pyRecoil",
        "momentum component y of the recoiling system",
        move |_, p| frame::current().transform_momentum(&recoil(&beam, p)).py(),
    )?;
    let beam = manager.beam();
    manager.register_double(
        "pzRecoil",
        "momentum component z of the recoiling system",
        move |_, p| frame::current().transform_momentum(&recoil(&beam, p)).pz(),
    )?;

    let beam = manager.beam();
    manager.register_double(
        "pRecoilTheta",
        "polar angle of the recoiling system",
        move |_, p| {
            frame::current()
                .transform_momentum(&recoil(&beam, p))
                .momentum()
                .theta()
        },
    )?;
    let beam = manager.beam();
    manager.register_double(
        "pRecoilPhi",
        "azimuthal angle of the recoiling system",
        move |_, p| {
            frame::current()
                .transform_momentum(&recoil(&beam, p))
                .momentum()
                .phi()
        },
    )?;

    let beam = manager.beam();
    manager.register_double(
        "b2bTheta",
        "polar angle in the lab of the direction back-to-back in the CMS",
        move |_, p| back_to_back(&beam, p).theta(),
    )?;
    let beam = manager.beam();
    manager.register_double(
        "b2bPhi",
        "azimuthal angle in the lab of the direction back-to-back in the CMS",
        move |_, p| back_to_back(&beam, p).phi(),
    )?;

    let beam = manager.beam();
    manager.register_double(
        "cosAngleBetweenMomentumAndVertexVector",
        "cosine of the angle between the momentum and the vertex displacement from the IP",
        move |_, p| cos_angle(&(p.vertex - beam.ip), &p.p4.momentum()),
    )?;
    let beam = manager.beam();
    manager.register_double(
        "cosAngleBetweenMomentumAndVertexVectorInXYPlane",
        "cosine of the transverse angle between the momentum and the vertex displacement from the IP",
        move |_, p| {
            let displacement = p.vertex - beam.ip;
            let x = displacement.x;
            let y = displacement.y;
            (p.p4.px() * x + p.p4.py() * y) / (p.p4.pt() * x.hypot(y))
        },
    )?;
    manager.register_double(
        "cosHelicityAngle",
        "cosine of the helicity angle of the particle's decay",
        cos_helicity_angle,
    )?;
    manager.register_meta(
        "cosHelicityAngleIfCMSIsTheMother",
        "cosHelicityAngleIfCMSIsTheMother(i): cosine of the angle between daughter i and the beam in the rest frame of the particle",
        |manager, args| {
            args.expect(1)?;
            let i = args.index(0)?;
            let beam = manager.beam().beam_momentum();
            Ok(var_function(move |event, particle| {
                VarValue::Double(particle.map_or(f64::NAN, |p| {
                    cos_helicity_angle_to_beam(&beam, event, p, i)
                }))
            }))
        },
    )?;
    let beam = manager.beam();
    manager.register_double(
        "cosThetaBetweenParticleAndNominalB",
        "cosine of the center-of-mass angle between the B candidate and a nominal B",
        move |_, p| cos_theta_to_nominal_b(&beam, p.pdg, &p.p4),
    )?;

    manager.register_int("PDG", "PDG code", |_, p| i64::from(p.pdg))?;
    manager.register_double("charge", "charge of particle", |_, p| p.charge())?;
    manager.register_int("flavor", "flavor type of decay (0=unflavored, 1=flavored)", |_, p| {
        p.flavor as i64
    })?;
    manager.register_int("nDaughters", "number of daughter particles", |_, p| {
        p.daughters.len() as i64
    })?;
    manager.register_double("chiProb", "chi^2 probability of the fit", |_, p| p.pvalue)?;
    manager.register_alias("pValue", "chiProb")?;
    manager.register(
        "True",
        "returns always 1, used for testing and debugging",
        var_function(|_, _| VarValue::Bool(true)),
    )?;
    manager.register(
        "False",
        "returns always 0, used for testing and debugging",
        var_function(|_, _| VarValue::Bool(false)),
    )?;
    manager.register(
        "infinity",
        "returns std::numeric_limits<double>::infinity()",
        var_function(|_, _| VarValue::Double(f64::INFINITY)),
    )?;
    Ok(())
}
