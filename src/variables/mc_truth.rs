use std::fmt::Display;

use log::warn;

use super::{kinematics::cos_theta_to_nominal_b, lists::lists_and_generation, opening_angle};
use crate::{
    data::{Event, MCParticle, MCStatus, Particle},
    frame,
    manager::{missing_list, var_function, Manager, Var, VarValue},
    utils::{
        pdg,
        vectors::{FourMomentum, ThreeMomentum, Vec4},
    },
    VarmanResult,
};

/// Reasons a reconstructed particle differs from its matched generated particle, as reported by
/// the `mcErrors` bit word. A correctly reconstructed particle has no bit set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MCError {
    /// A final-state radiation photon was not reconstructed
    MissFSR = 1,
    /// An intermediate resonance of the generated decay was skipped
    MissingResonance = 2,
    /// A final-state particle was reconstructed from a secondary decay product
    DecayInFlight = 4,
    /// A neutrino was not reconstructed
    MissNeutrino = 8,
    /// A photon was not reconstructed
    MissGamma = 16,
    /// A massive particle other than a $`K_L^0`$ was not reconstructed
    MissMassiveParticle = 32,
    /// A $`K_L^0`$ was not reconstructed
    MissKlong = 64,
    /// The PDG code of the match differs from the reconstructed hypothesis
    MisID = 128,
    /// A daughter is matched to a generated particle outside of the decay
    AddedWrongParticle = 256,
    /// No match available
    InternalError = 512,
    /// A photon added by PHOTOS was not reconstructed
    MissPHOTOS = 1024,
    /// A bremsstrahlung photon was added during reconstruction
    AddedRecoBremsPhoton = 2048,
}

impl MCError {
    /// Every flag, in bit order.
    pub const ALL: [MCError; 12] = [
        MCError::MissFSR,
        MCError::MissingResonance,
        MCError::DecayInFlight,
        MCError::MissNeutrino,
        MCError::MissGamma,
        MCError::MissMassiveParticle,
        MCError::MissKlong,
        MCError::MisID,
        MCError::AddedWrongParticle,
        MCError::InternalError,
        MCError::MissPHOTOS,
        MCError::AddedRecoBremsPhoton,
    ];
    /// The bit value of the flag.
    pub fn bit(&self) -> u32 {
        *self as u32
    }
    /// Bits which only report particles missing from the reconstruction.
    pub fn missing_bits() -> u32 {
        MCError::MissGamma.bit()
            | MCError::MissMassiveParticle.bit()
            | MCError::MissKlong.bit()
            | MCError::MissNeutrino.bit()
    }
}

impl Display for MCError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MCError::MissFSR => write!(f, "MissFSR"),
            MCError::MissingResonance => write!(f, "MissingResonance"),
            MCError::DecayInFlight => write!(f, "DecayInFlight"),
            MCError::MissNeutrino => write!(f, "MissNeutrino"),
            MCError::MissGamma => write!(f, "MissGamma"),
            MCError::MissMassiveParticle => write!(f, "MissMassiveParticle"),
            MCError::MissKlong => write!(f, "MissKlong"),
            MCError::MisID => write!(f, "MisID"),
            MCError::AddedWrongParticle => write!(f, "AddedWrongParticle"),
            MCError::InternalError => write!(f, "InternalError"),
            MCError::MissPHOTOS => write!(f, "MissPHOTOS"),
            MCError::AddedRecoBremsPhoton => write!(f, "AddedRecoBremsPhoton"),
        }
    }
}

/// Number of generations from `ancestor` down to `descendant` (1 for a daughter), or [`None`]
/// if `descendant` does not descend from `ancestor`.
pub fn generations_between(event: &Event, descendant: usize, ancestor: usize) -> Option<usize> {
    let mut steps = 0;
    let mut current = event.mc_particles.get(descendant)?;
    while let Some(mother) = current.mother {
        steps += 1;
        if mother == ancestor {
            return Some(steps);
        }
        current = event.mc_particles.get(mother)?;
    }
    None
}

/// The mother of a generated particle.
pub fn mc_mother<'a>(event: &'a Event, mc: &MCParticle) -> Option<&'a MCParticle> {
    mc.mother.and_then(|m| event.mc_particles.get(m))
}

/// The `n`th ancestor of a generated particle (0 is the mother).
fn nth_mother<'a>(event: &'a Event, mc: &'a MCParticle, n: usize) -> Option<&'a MCParticle> {
    let mut current = mc;
    for _ in 0..=n {
        current = mc_mother(event, current)?;
    }
    Some(current)
}

fn collect_matches(event: &Event, particle: &Particle, matches: &mut Vec<usize>) {
    for daughter in particle.daughter_particles(event) {
        if let Some(m) = daughter.mc_match() {
            matches.push(m);
        }
        collect_matches(event, daughter, matches);
    }
}

fn missing_leaf(mc: &MCParticle) -> u32 {
    let pdg = mc.pdg.abs();
    if pdg == pdg::PHOTON {
        if mc.has_status(MCStatus::IsFSR) {
            MCError::MissFSR.bit()
        } else if mc.has_status(MCStatus::IsPHOTOS) {
            MCError::MissPHOTOS.bit()
        } else {
            MCError::MissGamma.bit()
        }
    } else if pdg::is_neutrino(pdg) {
        MCError::MissNeutrino.bit()
    } else if pdg == pdg::K_LONG {
        MCError::MissKlong.bit()
    } else {
        MCError::MissMassiveParticle.bit()
    }
}

fn missing_subtree(event: &Event, mc: &MCParticle) -> u32 {
    if mc.daughters.is_empty() {
        return missing_leaf(mc);
    }
    mc.daughters
        .iter()
        .filter_map(|&d| event.mc_particles.get(d))
        .fold(0, |status, d| status | missing_subtree(event, d))
}

fn missing_flags(event: &Event, mc: &MCParticle, matches: &[usize]) -> u32 {
    let mut status = 0;
    for generated in mc.daughters.iter().filter_map(|&d| event.mc_particles.get(d)) {
        if matches.contains(&generated.index) {
            continue;
        }
        if matches
            .iter()
            .any(|&m| generations_between(event, m, generated.index).is_some())
        {
            if !generated.has_status(MCStatus::IsVirtual) {
                status |= MCError::MissingResonance.bit();
            }
            status |= missing_flags(event, generated, matches);
        } else {
            status |= missing_subtree(event, generated);
        }
    }
    status
}

/// The `mcErrors` bit word of a particle (see [`MCError`]).
///
/// A stored `MCErrors` extra-info value takes precedence over the computation.
pub fn mc_errors(event: &Event, particle: &Particle) -> u32 {
    if let Some(stored) = particle.extra_info.get("MCErrors") {
        return stored as u32;
    }
    let Some(mc) = event.mc_match(particle) else {
        return MCError::InternalError.bit();
    };
    let mut status = 0;
    if particle.pdg.abs() != mc.pdg.abs() {
        status |= MCError::MisID.bit();
    }
    let daughters = particle.daughter_particles(event);
    if daughters.is_empty() {
        if mc.mother.is_some() && !mc.has_status(MCStatus::Primary) {
            status |= MCError::DecayInFlight.bit();
        }
        return status;
    }
    for daughter in daughters {
        status |= mc_errors(event, daughter);
        if let Some(m) = daughter.mc_match() {
            if generations_between(event, m, mc.index).is_none() {
                status |= MCError::AddedWrongParticle.bit();
            }
        }
    }
    let mut matches = Vec::new();
    collect_matches(event, particle, &mut matches);
    status | missing_flags(event, mc, &matches)
}

fn is_signal_ignoring(event: &Event, particle: &Particle, ignored: u32) -> f64 {
    if event.mc_match(particle).is_none() {
        return f64::NAN;
    }
    if mc_errors(event, particle) & !ignored == 0 {
        1.0
    } else {
        0.0
    }
}

/// Summed four-momentum of the neutrinos among the final-state descendants of `mc`.
fn invisible_p4(event: &Event, mc: &MCParticle) -> Vec4 {
    if mc.daughters.is_empty() {
        return if pdg::is_neutrino(mc.pdg) {
            mc.p4()
        } else {
            Vec4::zeros()
        };
    }
    mc.daughters
        .iter()
        .filter_map(|&d| event.mc_particles.get(d))
        .map(|d| invisible_p4(event, d))
        .sum()
}

/// Number of primary generated descendants of `mc` with one of the absolute PDG `codes` which
/// are not the match of any reconstructed descendant of the particle.
fn missing_daughters(event: &Event, particle: &Particle, mc: &MCParticle, codes: &[i32]) -> usize {
    fn count(event: &Event, mc: &MCParticle, codes: &[i32], matches: &[usize]) -> usize {
        mc.daughters
            .iter()
            .filter_map(|&d| event.mc_particles.get(d))
            .map(|generated| {
                let missing = generated.has_status(MCStatus::Primary)
                    && codes.contains(&generated.pdg.abs())
                    && !matches.contains(&generated.index);
                usize::from(missing) + count(event, generated, codes, matches)
            })
            .sum()
    }
    let mut matches = Vec::new();
    collect_matches(event, particle, &mut matches);
    count(event, mc, codes, &matches)
}

/// Mass recoiling against the generated matches of the daughters, from the first generated
/// particle of the event.
fn mc_recoil_mass(event: &Event, particle: &Particle) -> f64 {
    let Some(initial) = event.mc_particles.first() else {
        return f64::NAN;
    };
    let mut daughters = Vec4::zeros();
    for daughter in particle.daughter_particles(event) {
        let Some(mc) = event.mc_match(daughter) else {
            return f64::NAN;
        };
        daughters += mc.p4();
    }
    (initial.p4() - daughters).m()
}

/// Evaluate a variable on a particle view of a generated particle, or NaN without one.
pub fn on_generated(var: &Var, event: &Event, mc: Option<&MCParticle>) -> VarValue {
    match mc {
        Some(mc) => var.evaluate(event, Some(&Particle::from_mc(mc))),
        None => VarValue::Double(f64::NAN),
    }
}

fn register_matched<F>(
    manager: &mut Manager,
    name: &str,
    description: &str,
    f: F,
) -> VarmanResult<()>
where
    F: Fn(&MCParticle) -> f64 + Send + Sync + 'static,
{
    manager.register_double(name, description, move |event, particle| {
        event.mc_match(particle).map_or(f64::NAN, &f)
    })
}

fn register_status(manager: &mut Manager, name: &str, status: MCStatus) -> VarmanResult<()> {
    register_matched(
        manager,
        name,
        &format!("1 if the generated match has the {status:?} status bit, 0 if not"),
        move |mc| f64::from(u8::from(mc.has_status(status))),
    )
}

fn mc_momentum_in_frame(mc: &MCParticle) -> Vec4 {
    frame::current().transform_momentum(&mc.p4())
}

fn matched_ancestor_of_lists(
    event: &Event,
    particle: &Particle,
    lists: &[String],
    generation: Option<usize>,
) -> bool {
    let lists: Vec<_> = lists
        .iter()
        .map(|name| event.list(name).unwrap_or_else(|| missing_list(name)))
        .collect();
    let Some(mc) = particle.mc_match() else {
        return false;
    };
    lists.iter().flat_map(|list| list.iter(event)).any(|member| {
        member.mc_match().is_some_and(|ancestor| {
            match (generations_between(event, mc, ancestor), generation) {
                (Some(steps), Some(wanted)) => steps == wanted,
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
    })
}

/// Register every MC truth variable.
///
/// # Errors
///
/// Fails if a name is already registered.
pub fn register(manager: &mut Manager) -> VarmanResult<()> {
    manager.register(
        "mcPDG",
        "PDG code of the generated match",
        var_function(|event, particle| {
            match particle.and_then(|p| event.mc_match(p)) {
                Some(mc) => VarValue::Int(i64::from(mc.pdg)),
                None => VarValue::Double(f64::NAN),
            }
        }),
    )?;
    manager.register_int(
        "mcErrors",
        "bit word of MC matching errors (0 for a correct reconstruction)",
        |event, particle| i64::from(mc_errors(event, particle)),
    )?;
    manager.register_double(
        "isSignal",
        "1 if the particle is correctly reconstructed, 0 if not, NaN without a match",
        |e, p| is_signal_ignoring(e, p, 0),
    )?;
    manager.register_double(
        "isSignalAcceptMissingNeutrino",
        "isSignal, but missing neutrinos are accepted",
        |e, p| is_signal_ignoring(e, p, MCError::MissNeutrino.bit()),
    )?;
    manager.register_double(
        "isSignalAcceptMissingMassive",
        "isSignal, but missing massive particles are accepted",
        |e, p| {
            is_signal_ignoring(
                e,
                p,
                MCError::MissMassiveParticle.bit() | MCError::MissKlong.bit(),
            )
        },
    )?;
    manager.register_double(
        "isSignalAcceptMissingGamma",
        "isSignal, but missing photons are accepted",
        |e, p| is_signal_ignoring(e, p, MCError::MissGamma.bit()),
    )?;
    manager.register_double(
        "isSignalAcceptMissing",
        "isSignal, but any missing particle is accepted",
        |e, p| is_signal_ignoring(e, p, MCError::missing_bits()),
    )?;
    manager.register_double(
        "isSignalAcceptWrongFSPs",
        "isSignal, but misidentified and wrongly added final-state particles are accepted",
        |e, p| {
            is_signal_ignoring(
                e,
                p,
                MCError::MisID.bit() | MCError::AddedWrongParticle.bit(),
            )
        },
    )?;
    manager.register_double(
        "isPrimarySignal",
        "1 if the particle is correctly reconstructed and its match is primary, 0 if not, NaN without a match",
        |e, p| match e.mc_match(p) {
            Some(mc) if !mc.has_status(MCStatus::Primary) => 0.0,
            _ => is_signal_ignoring(e, p, 0),
        },
    )?;
    manager.register_double(
        "isMisidentified",
        "1 if the particle is misidentified, NaN without a match",
        |e, p| {
            if e.mc_match(p).is_none() {
                return f64::NAN;
            }
            f64::from(u8::from(mc_errors(e, p) & MCError::MisID.bit() != 0))
        },
    )?;
    manager.register_double(
        "isWrongCharge",
        "1 if the charge differs from the charge of the generated match, NaN without a match",
        |e, p| {
            e.mc_match(p)
                .map_or(f64::NAN, |mc| f64::from(u8::from(p.charge() != mc.charge)))
        },
    )?;
    manager.register_double(
        "mcMatchWeight",
        "weight of the best generated match",
        |_, p| p.mc_match_weight().unwrap_or(f64::NAN),
    )?;
    manager.register_int("nMCMatches", "number of generated matches", |_, p| {
        p.mc_relations.len() as i64
    })?;
    register_matched(manager, "mcDecayTime", "decay time of the generated match", |mc| {
        mc.decay_time
    })?;
    register_matched(manager, "mcLifeTime", "lifetime of the generated match", |mc| {
        mc.lifetime()
    })?;
    register_matched(manager, "mcPX", "momentum x of the generated match", |mc| {
        mc_momentum_in_frame(mc).px()
    })?;
    register_matched(manager, "mcPY", "momentum y of the generated match", |mc| {
        mc_momentum_in_frame(mc).py()
    })?;
    register_matched(manager, "mcPZ", "momentum z of the generated match", |mc| {
        mc_momentum_in_frame(mc).pz()
    })?;
    register_matched(
        manager,
        "mcPT",
        "transverse momentum of the generated match",
        |mc| mc_momentum_in_frame(mc).pt(),
    )?;
    register_matched(manager, "mcE", "energy of the generated match", |mc| {
        mc_momentum_in_frame(mc).e()
    })?;
    register_matched(manager, "mcP", "momentum of the generated match", |mc| {
        mc_momentum_in_frame(mc).p()
    })?;
    register_matched(manager, "mcPhi", "azimuthal angle of the generated match", |mc| {
        mc_momentum_in_frame(mc).momentum().phi()
    })?;
    register_matched(manager, "mcTheta", "polar angle of the generated match", |mc| {
        mc_momentum_in_frame(mc).momentum().theta()
    })?;
    register_matched(
        manager,
        "mcParticleStatus",
        "status bits of the generated match",
        |mc| f64::from(mc.status),
    )?;
    register_status(manager, "mcPrimary", MCStatus::Primary)?;
    register_status(manager, "mcVirtual", MCStatus::IsVirtual)?;
    register_status(manager, "mcInitial", MCStatus::Initial)?;
    register_status(manager, "mcISR", MCStatus::IsISR)?;
    register_status(manager, "mcFSR", MCStatus::IsFSR)?;
    register_status(manager, "mcPhotos", MCStatus::IsPHOTOS)?;

    manager.register_int(
        "genMotherPDG",
        "PDG code of the mother of the generated match (0 if there is none)",
        |e, p| {
            e.mc_match(p)
                .and_then(|mc| mc_mother(e, mc))
                .map_or(0, |m| i64::from(m.pdg))
        },
    )?;
    manager.register_int(
        "genMotherID",
        "index of the mother of the generated match (0 if there is none)",
        |e, p| {
            e.mc_match(p)
                .and_then(|mc| mc_mother(e, mc))
                .map_or(0, |m| m.index as i64)
        },
    )?;
    manager.register_meta(
        "genMotherPDG",
        "genMotherPDG(i): PDG code of the i-th ancestor of the generated match (0 is the mother)",
        |_, args| {
            args.expect(1)?;
            let n = args.index(0)?;
            Ok(var_function(move |event, particle| {
                VarValue::Int(
                    particle
                        .and_then(|p| event.mc_match(p))
                        .and_then(|mc| nth_mother(event, mc, n))
                        .map_or(0, |m| i64::from(m.pdg)),
                )
            }))
        },
    )?;
    manager.register_meta(
        "genMotherID",
        "genMotherID(i): index of the i-th ancestor of the generated match (0 is the mother)",
        |_, args| {
            args.expect(1)?;
            let n = args.index(0)?;
            Ok(var_function(move |event, particle| {
                VarValue::Int(
                    particle
                        .and_then(|p| event.mc_match(p))
                        .and_then(|mc| nth_mother(event, mc, n))
                        .map_or(0, |m| m.index as i64),
                )
            }))
        },
    )?;
    manager.register_double(
        "genMotherP",
        "momentum of the mother of the generated match",
        |e, p| {
            e.mc_match(p)
                .and_then(|mc| mc_mother(e, mc))
                .map_or(f64::NAN, |m| m.momentum.norm())
        },
    )?;
    manager.register(
        "genParticleID",
        "index of the generated match",
        var_function(|event, particle| {
            match particle.and_then(|p| event.mc_match(p)) {
                Some(mc) => VarValue::Int(mc.index as i64),
                None => VarValue::Double(f64::NAN),
            }
        }),
    )?;
    manager.register_meta(
        "genNStepsToDaughter",
        "genNStepsToDaughter(i): generations between the generated matches of the particle and of its daughter i",
        |_, args| {
            args.expect(1)?;
            let i = args.index(0)?;
            Ok(var_function(move |event, particle| {
                let steps = particle.and_then(|p| {
                    let mc = event.mc_match(p)?;
                    let daughter = event.mc_match(p.daughter(event, i)?)?;
                    if p.daughters.len() == 1 {
                        return Some(1);
                    }
                    generations_between(event, daughter.index, mc.index)
                });
                match steps {
                    Some(steps) => VarValue::Int(steps as i64),
                    None => VarValue::Double(f64::NAN),
                }
            }))
        },
    )?;

    manager.register_meta(
        "genNMissingDaughter",
        "genNMissingDaughter(PDG, ...): number of generated descendants with one of the absolute PDG codes that were not reconstructed",
        |_, args| {
            args.expect_at_least(1)?;
            let codes = (0..args.len())
                .map(|i| args.pdg(i).map(i32::abs))
                .collect::<VarmanResult<Vec<_>>>()?;
            Ok(var_function(move |event, particle| {
                let Some((particle, mc)) =
                    particle.and_then(|p| Some((p, event.mc_match(p)?)))
                else {
                    warn!("genNMissingDaughter: the particle has no generated match");
                    return VarValue::Double(f64::NAN);
                };
                VarValue::Int(missing_daughters(event, particle, mc, &codes) as i64)
            }))
        },
    )?;
    manager.register_double(
        "mcRecoilMass",
        "mass recoiling against the generated matches of the daughters",
        mc_recoil_mass,
    )?;
    let beam = manager.beam();
    manager.register_double(
        "mcCosThetaBetweenParticleAndNominalB",
        "cosThetaBetweenParticleAndNominalB of the generated B match with its neutrinos removed",
        move |e, p| {
            if !matches!(p.pdg.abs(), 511 | 521) {
                return cos_theta_to_nominal_b(&beam, p.pdg, &p.p4);
            }
            match e.mc_match(p) {
                Some(mc) if matches!(mc.pdg.abs(), 511 | 521) => {
                    cos_theta_to_nominal_b(&beam, p.pdg, &(mc.p4() - invisible_p4(e, mc)))
                }
                _ => f64::NAN,
            }
        },
    )?;

    let beam = manager.beam();
    manager.register_event("Eher", "energy of the electron beam", move |_| beam.her().e())?;
    let beam = manager.beam();
    manager.register_event("Eler", "energy of the positron beam", move |_| beam.ler().e())?;
    let beam = manager.beam();
    manager.register_event("XAngle", "angle between the two beams", move |_| {
        beam.her()
            .momentum()
            .angle(&-beam.ler().momentum())
    })?;

    manager.register_meta(
        "matchedMC",
        "matchedMC(X): X evaluated on the generated match",
        |manager, args| {
            args.expect(1)?;
            let var = manager.try_get_variable(args.get(0))?;
            Ok(var_function(move |event, particle| {
                on_generated(&var, event, particle.and_then(|p| event.mc_match(p)))
            }))
        },
    )?;
    manager.register_meta(
        "mcMother",
        "mcMother(X): X evaluated on the mother of the generated match",
        |manager, args| {
            args.expect(1)?;
            let var = manager.try_get_variable(args.get(0))?;
            Ok(var_function(move |event, particle| {
                let mother = particle
                    .and_then(|p| event.mc_match(p))
                    .and_then(|mc| mc_mother(event, mc));
                on_generated(&var, event, mother)
            }))
        },
    )?;
    manager.register_meta(
        "mcDaughter",
        "mcDaughter(i, X): X evaluated on daughter i of the generated match",
        |manager, args| {
            args.expect(2)?;
            let i = args.index(0)?;
            let var = manager.try_get_variable(args.get(1))?;
            Ok(var_function(move |event, particle| {
                let daughter = particle
                    .and_then(|p| event.mc_match(p))
                    .and_then(|mc| mc.daughters.get(i))
                    .and_then(|&d| event.mc_particles.get(d));
                on_generated(&var, event, daughter)
            }))
        },
    )?;
    manager.register_meta(
        "genParticle",
        "genParticle(i, X): X evaluated on generated particle i of the event",
        |manager, args| {
            args.expect(2)?;
            let i = args.index(0)?;
            let var = manager.try_get_variable(args.get(1))?;
            Ok(var_function(move |event, _| {
                on_generated(&var, event, event.mc_particles.get(i))
            }))
        },
    )?;
    manager.register_meta(
        "genUpsilon4S",
        "genUpsilon4S(X): X evaluated on the generated Upsilon(4S)",
        |manager, args| {
            args.expect(1)?;
            let var = manager.try_get_variable(args.get(0))?;
            Ok(var_function(move |event, _| {
                let root = event
                    .mc_particles
                    .first()
                    .filter(|mc| mc.pdg == pdg::UPSILON_4S);
                on_generated(&var, event, root)
            }))
        },
    )?;
    manager.register_meta(
        "varForFirstMCAncestorOfType",
        "varForFirstMCAncestorOfType(type, X): X evaluated on the nearest generated ancestor of the given PDG code or name",
        |manager, args| {
            args.expect(2)?;
            let wanted = args.pdg(0)?.abs();
            let var = manager.try_get_variable(args.get(1))?;
            Ok(var_function(move |event, particle| {
                let mut ancestor = particle
                    .and_then(|p| event.mc_match(p))
                    .and_then(|mc| mc_mother(event, mc));
                while let Some(mc) = ancestor {
                    if mc.pdg.abs() == wanted {
                        break;
                    }
                    ancestor = mc_mother(event, mc);
                }
                on_generated(&var, event, ancestor)
            }))
        },
    )?;
    manager.register_meta(
        "isMCDescendantOfList",
        "isMCDescendantOfList(list, ..., [generation]): true if the generated match descends from the match of a list member",
        |_, args| {
            let (lists, generation) = lists_and_generation(args)?;
            Ok(var_function(move |event, particle| {
                VarValue::Bool(
                    particle.is_some_and(|p| {
                        matched_ancestor_of_lists(event, p, &lists, generation)
                    }),
                )
            }))
        },
    )?;
    manager.register_meta(
        "mcDaughterAngle",
        "mcDaughterAngle(a, b[, c]): angle between the generated matches of two daughters (or between the third and the sum of the first two)",
        |_, args| {
            args.expect_range(2, 3)?;
            let paths = (0..args.len())
                .map(|i| args.daughter_path(i))
                .collect::<VarmanResult<Vec<_>>>()?;
            Ok(var_function(move |event, particle| {
                let Some(particle) = particle else {
                    return VarValue::Double(f64::NAN);
                };
                let frame = frame::current();
                let mut momenta = Vec::with_capacity(paths.len());
                for path in &paths {
                    let Some(mc) = path
                        .resolve(particle, event)
                        .and_then(|d| event.mc_match(d))
                    else {
                        return VarValue::Double(f64::NAN);
                    };
                    momenta.push(frame.transform_momentum(&mc.p4()).momentum());
                }
                VarValue::Double(match momenta.as_slice() {
                    [a, b] => opening_angle(a, b),
                    [a, b, c] => opening_angle(c, &(a + b)),
                    _ => f64::NAN,
                })
            }))
        },
    )?;
    manager.register_meta(
        "matchedMCHasPDG",
        "matchedMCHasPDG(pdg): true if the generated match has the given absolute PDG code",
        |_, args| {
            args.expect(1)?;
            let wanted = args.pdg(0)?.abs();
            Ok(var_function(move |event, particle| {
                match particle.and_then(|p| event.mc_match(p)) {
                    Some(mc) => VarValue::Bool(mc.pdg.abs() == wanted),
                    None => VarValue::Double(f64::NAN),
                }
            }))
        },
    )?;
    manager.register_meta(
        "varForMCGen",
        "varForMCGen(X): X if the generated match is a primary, real, non-initial particle, else NaN",
        |manager, args| {
            args.expect(1)?;
            let var = manager.try_get_variable(args.get(0))?;
            Ok(var_function(move |event, particle| {
                let generated = particle
                    .and_then(|p| event.mc_match(p))
                    .is_some_and(|mc| {
                        mc.has_status(MCStatus::Primary)
                            && !mc.has_status(MCStatus::IsVirtual)
                            && !mc.has_status(MCStatus::Initial)
                    });
                if generated {
                    var.evaluate(event, particle)
                } else {
                    VarValue::Double(f64::NAN)
                }
            }))
        },
    )?;
    Ok(())
}
