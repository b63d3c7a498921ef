//! Variables which look at named particle lists of the event.
//!
//! A list which does not exist is a configuration error and aborts evaluation through
//! [`missing_list`]. Aggregates over an empty list are NaN, counts are zero.

use log::info;

use super::opening_angle;
use crate::{
    data::{Event, Particle, ParticleList},
    frame,
    manager::{missing_list, var_function, Manager, VarValue},
    parser::Arguments,
    utils::vectors::{FourMomentum, Vec3, Vec4},
    VarmanError, VarmanResult,
};

fn list<'a>(event: &'a Event, name: &str) -> &'a ParticleList {
    event.list(name).unwrap_or_else(|| missing_list(name))
}

/// Split arguments into list names and a trailing generation (`-1` or absent means any depth).
pub(crate) fn lists_and_generation(
    args: &Arguments,
) -> VarmanResult<(Vec<String>, Option<usize>)> {
    args.expect_at_least(1)?;
    let mut lists = args.args.to_vec();
    let mut generation = None;
    if lists.len() > 1 {
        if let Ok(g) = args.get(args.len() - 1).parse::<i64>() {
            lists.pop();
            generation = usize::try_from(g).ok().filter(|&g| g > 0);
        }
    }
    Ok((lists, generation))
}

/// Sum of a current-frame momentum component over a list, or NaN if the list is empty.
fn list_total<F>(event: &Event, name: &str, component: F) -> f64
where
    F: Fn(&Vec4) -> f64,
{
    let list = list(event, name);
    if list.is_empty() {
        return f64::NAN;
    }
    let frame = frame::current();
    list.iter(event)
        .map(|p| component(&frame.momentum(p)))
        .sum()
}

fn register_total<F>(
    manager: &mut Manager,
    name: &str,
    quantity: &str,
    component: F,
) -> VarmanResult<()>
where
    F: Fn(&Vec4) -> f64 + Copy + Send + Sync + 'static,
{
    manager.register_meta(
        name,
        &format!("{name}(list): total {quantity} of the particles in the list"),
        move |_, args| {
            args.expect(1)?;
            let name = args.get(0).to_string();
            Ok(var_function(move |event, _| {
                VarValue::Double(list_total(event, &name, component))
            }))
        },
    )
}

/// The list member whose current-frame momentum has the smallest (or, with `largest`, the
/// largest) opening angle to the particle, paired with that angle.
fn extreme_angle<'a>(
    event: &'a Event,
    particle: &Particle,
    name: &str,
    largest: bool,
) -> Option<(&'a Particle, f64)> {
    let list = list(event, name);
    let frame = frame::current();
    let reference: Vec3 = frame.momentum(particle).momentum();
    let mut best: Option<(&Particle, f64)> = None;
    for member in list.iter(event) {
        let angle = opening_angle(&frame.momentum(member).momentum(), &reference);
        let better = match best {
            None => true,
            Some((_, current)) if largest => angle > current,
            Some((_, current)) => angle < current,
        };
        if better {
            best = Some((member, angle));
        }
    }
    best
}

/// `true` if the particle appears among the descendants of a member of one of the lists,
/// at exactly `generation` steps below it when a generation is given.
fn is_descendant_of_lists(
    event: &Event,
    particle: &Particle,
    lists: &[String],
    generation: Option<usize>,
) -> bool {
    fn search(
        event: &Event,
        mother: &Particle,
        target: usize,
        depth: usize,
        wanted: Option<usize>,
    ) -> bool {
        mother.daughter_particles(event).into_iter().any(|daughter| {
            let here = daughter.index == Some(target) && wanted.map_or(true, |g| g == depth);
            let deeper = wanted.map_or(true, |g| depth < g);
            here || (deeper && search(event, daughter, target, depth + 1, wanted))
        })
    }
    let lists: Vec<_> = lists.iter().map(|name| list(event, name)).collect();
    let Some(target) = particle.index else {
        return false;
    };
    lists
        .iter()
        .flat_map(|list| list.iter(event))
        .any(|member| search(event, member, target, 1, generation))
}

fn register_descendant(
    manager: &mut Manager,
    name: &str,
    generation: Option<usize>,
) -> VarmanResult<()> {
    let description = match generation {
        Some(1) => format!("{name}(list, ...): 1 if the particle is a daughter of a list member"),
        Some(_) => format!(
            "{name}(list, ...): 1 if the particle is a granddaughter of a list member"
        ),
        None => format!(
            "{name}(list, ..., [generation]): 1 if the particle descends from a list member (generation -1 means any depth)"
        ),
    };
    manager.register_meta(name, &description, move |_, args| {
        let (lists, generation) = match generation {
            Some(g) => {
                args.expect_at_least(1)?;
                (args.args.to_vec(), Some(g))
            }
            None => lists_and_generation(args)?,
        };
        Ok(var_function(move |event, particle| match particle {
            Some(p) => VarValue::Bool(is_descendant_of_lists(event, p, &lists, generation)),
            None => VarValue::Double(f64::NAN),
        }))
    })
}

/// Register every list-scoped variable.
///
/// # Errors
///
/// Fails if a name is already registered.
pub fn register(manager: &mut Manager) -> VarmanResult<()> {
    manager.register_meta(
        "countInList",
        "countInList(list[, cut]): number of particles in the list passing the cut",
        |manager, args| {
            args.expect_range(1, 2)?;
            let name = args.get(0).to_string();
            let cut = manager.compile_cut(args.get(1))?;
            Ok(var_function(move |event, _| {
                VarValue::Int(
                    list(event, &name)
                        .iter(event)
                        .filter(|p| cut.check(event, Some(*p)))
                        .count() as i64,
                )
            }))
        },
    )?;
    manager.register_meta(
        "nParticlesInList",
        "nParticlesInList(list): number of particles in the list",
        |_, args| {
            args.expect(1)?;
            let name = args.get(0).to_string();
            Ok(var_function(move |event, _| {
                VarValue::Int(list(event, &name).len() as i64)
            }))
        },
    )?;
    register_total(manager, "totalEnergyOfParticlesInList", "energy", |p| p.e())?;
    register_total(manager, "totalPxOfParticlesInList", "momentum x", |p| p.px())?;
    register_total(manager, "totalPyOfParticlesInList", "momentum y", |p| p.py())?;
    register_total(manager, "totalPzOfParticlesInList", "momentum z", |p| p.pz())?;
    manager.register_meta(
        "invMassInLists",
        "invMassInLists(list, ...): invariant mass of the non-overlapping particles of all lists",
        |_, args| {
            args.expect_at_least(1)?;
            let names = args.args.to_vec();
            Ok(var_function(move |event, _| {
                let mut pool: Vec<&Particle> = Vec::new();
                for name in &names {
                    for member in list(event, name).iter(event) {
                        let taken = pool.iter().any(|other| {
                            other.index == member.index || other.overlaps(member, event)
                        });
                        if !taken {
                            pool.push(member);
                        }
                    }
                }
                if pool.is_empty() {
                    return VarValue::Double(f64::NAN);
                }
                let total: Vec4 = pool.iter().map(|p| p.p4).sum();
                VarValue::Double(total.m())
            }))
        },
    )?;
    manager.register_meta(
        "maxPtInList",
        "maxPtInList(list): largest transverse momentum in the list",
        |_, args| {
            args.expect(1)?;
            let name = args.get(0).to_string();
            Ok(var_function(move |event, _| {
                let frame = frame::current();
                VarValue::Double(
                    list(event, &name)
                        .iter(event)
                        .map(|p| frame.momentum(p).pt())
                        .fold(f64::NAN, f64::max),
                )
            }))
        },
    )?;
    manager.register_meta(
        "averageValueInList",
        "averageValueInList(list, X): mean of X over the list",
        |manager, args| {
            args.expect(2)?;
            let name = args.get(0).to_string();
            let var = manager.try_get_variable(args.get(1))?;
            Ok(var_function(move |event, _| {
                let list = list(event, &name);
                if list.is_empty() {
                    return VarValue::Double(f64::NAN);
                }
                let sum: f64 = list.iter(event).map(|p| var.value(event, Some(p))).sum();
                VarValue::Double(sum / list.len() as f64)
            }))
        },
    )?;
    manager.register_meta(
        "medianValueInList",
        "medianValueInList(list, X): median of X over the list members where X is not NaN",
        |manager, args| {
            args.expect(2)?;
            let name = args.get(0).to_string();
            let var = manager.try_get_variable(args.get(1))?;
            Ok(var_function(move |event, _| {
                let mut values: Vec<f64> = list(event, &name)
                    .iter(event)
                    .map(|p| var.value(event, Some(p)))
                    .filter(|v| !v.is_nan())
                    .collect();
                if values.is_empty() {
                    return VarValue::Double(f64::NAN);
                }
                values.sort_by(f64::total_cmp);
                let n = values.len();
                VarValue::Double(if n % 2 == 1 {
                    values[n / 2]
                } else {
                    0.5 * (values[n / 2 - 1] + values[n / 2])
                })
            }))
        },
    )?;
    manager.register_meta(
        "closestInList",
        "closestInList(list, X): X of the list member with the smallest opening angle to the particle",
        |manager, args| {
            args.expect(2)?;
            let name = args.get(0).to_string();
            let var = manager.try_get_variable(args.get(1))?;
            Ok(var_function(move |event, particle| {
                match particle.and_then(|p| extreme_angle(event, p, &name, false)) {
                    Some((closest, _)) => var.evaluate(event, Some(closest)),
                    None => VarValue::Double(f64::NAN),
                }
            }))
        },
    )?;
    manager.register_meta(
        "angleToClosestInList",
        "angleToClosestInList(list): smallest opening angle between the particle and a list member",
        |_, args| {
            args.expect(1)?;
            let name = args.get(0).to_string();
            Ok(var_function(move |event, particle| {
                VarValue::Double(
                    particle
                        .and_then(|p| extreme_angle(event, p, &name, false))
                        .map_or(f64::NAN, |(_, angle)| angle),
                )
            }))
        },
    )?;
    manager.register_meta(
        "mostB2BInList",
        "mostB2BInList(list, X): X of the list member with the largest opening angle to the particle",
        |manager, args| {
            args.expect(2)?;
            let name = args.get(0).to_string();
            let var = manager.try_get_variable(args.get(1))?;
            Ok(var_function(move |event, particle| {
                match particle.and_then(|p| extreme_angle(event, p, &name, true)) {
                    Some((opposite, _)) => var.evaluate(event, Some(opposite)),
                    None => VarValue::Double(f64::NAN),
                }
            }))
        },
    )?;
    manager.register_meta(
        "angleToMostB2BInList",
        "angleToMostB2BInList(list): largest opening angle between the particle and a list member",
        |_, args| {
            args.expect(1)?;
            let name = args.get(0).to_string();
            Ok(var_function(move |event, particle| {
                VarValue::Double(
                    particle
                        .and_then(|p| extreme_angle(event, p, &name, true))
                        .map_or(f64::NAN, |(_, angle)| angle),
                )
            }))
        },
    )?;
    manager.register_meta(
        "isInList",
        "isInList(list): 1 if the particle is in the list",
        |_, args| {
            args.expect(1)?;
            let name = args.get(0).to_string();
            Ok(var_function(move |event, particle| {
                let list = list(event, &name);
                match particle {
                    Some(p) => VarValue::Bool(p.index.is_some_and(|i| list.contains(i))),
                    None => VarValue::Double(f64::NAN),
                }
            }))
        },
    )?;
    manager.register_meta(
        "sourceObjectIsInList",
        "sourceObjectIsInList(list): 1 if a list member was built from the same detector object, -1 for composite or undefined particles",
        |_, args| {
            args.expect(1)?;
            let name = args.get(0).to_string();
            Ok(var_function(move |event, particle| {
                let list = list(event, &name);
                let Some(particle) = particle else {
                    return VarValue::Double(f64::NAN);
                };
                if !particle.source.has_source_object() {
                    return VarValue::Int(-1);
                }
                let found = list.iter(event).any(|member| {
                    member.source == particle.source && member.mdst_index == particle.mdst_index
                });
                VarValue::Int(i64::from(found))
            }))
        },
    )?;
    manager.register_meta(
        "veto",
        "veto(list, cut[, pdg]): 1 if combining the particle with a non-overlapping list member passes the cut",
        |manager, args| {
            args.expect_range(2, 3)?;
            let name = args.get(0).to_string();
            let cut = manager.compile_cut(args.get(1))?;
            let pdg = if args.len() == 3 {
                args.pdg(2)?
            } else {
                info!(
                    "Using PDG code 11 for the combined particle of veto({}, {})",
                    args.get(0),
                    args.get(1)
                );
                11
            };
            Ok(var_function(move |event, particle| {
                let list = list(event, &name);
                let Some(particle) = particle else {
                    return VarValue::Double(f64::NAN);
                };
                let vetoed = list
                    .iter(event)
                    .filter(|member| {
                        member.index != particle.index && !particle.overlaps(member, event)
                    })
                    .any(|member| {
                        let daughters = particle.index.into_iter().chain(member.index).collect();
                        let combined =
                            Particle::composite(particle.p4 + member.p4, pdg, daughters);
                        cut.check(event, Some(&combined))
                    });
                VarValue::Bool(vetoed)
            }))
        },
    )?;
    register_descendant(manager, "isDescendantOfList", None)?;
    register_descendant(manager, "isDaughterOfList", Some(1))?;
    register_descendant(manager, "isGrandDaughterOfList", Some(2))?;
    manager.register_meta(
        "numberOfNonOverlappingParticles",
        "numberOfNonOverlappingParticles(list, ...): number of list members sharing no detector object with the particle",
        |_, args| {
            args.expect_at_least(1)?;
            let names = args.args.to_vec();
            Ok(var_function(move |event, particle| {
                let lists: Vec<_> = names.iter().map(|name| list(event, name)).collect();
                let Some(particle) = particle else {
                    return VarValue::Double(f64::NAN);
                };
                VarValue::Int(
                    lists
                        .iter()
                        .flat_map(|list| list.iter(event))
                        .filter(|member| !particle.overlaps(member, event))
                        .count() as i64,
                )
            }))
        },
    )?;
    manager.register_meta(
        "getVariableByRank",
        "getVariableByRank(list, rankedVariable, X, rank): X of the list member whose rank in rankedVariable is the given one",
        |manager, args| {
            args.expect(4)?;
            let name = args.get(0).to_string();
            let key = format!("{}_rank", args.get(1));
            let var = manager.try_get_variable(args.get(2))?;
            let rank = args.int(3)?;
            if rank < 1 {
                return Err(VarmanError::InvalidArgument {
                    name: args.name.to_string(),
                    reason: format!("rank {rank} is not positive"),
                });
            }
            let rank = rank as f64;
            Ok(var_function(move |event, _| {
                list(event, &name)
                    .iter(event)
                    .find(|p| p.extra_info.get(&key) == Some(rank))
                    .map_or(VarValue::Double(f64::NAN), |p| var.evaluate(event, Some(p)))
            }))
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::enums::ParticleSource;
    use approx::assert_relative_eq;

    /// Five photons with E = 4.3, px = 2.2, py = 1.5 and pz = 3.1 in total.
    fn photon_event() -> Event {
        let mut event = Event::new();
        let momenta = [
            Vec4::new(0.5, 0.3, 0.1, 0.4),
            Vec4::new(0.8, 0.5, 0.4, 0.5),
            Vec4::new(0.9, 0.5, 0.3, 0.7),
            Vec4::new(1.0, 0.6, 0.2, 0.8),
            Vec4::new(1.1, 0.3, 0.5, 0.7),
        ];
        let indices = momenta
            .into_iter()
            .enumerate()
            .map(|(i, p4)| {
                event.add_particle(Particle::new(p4, 22).with_source(ParticleSource::ECLCluster, i))
            })
            .collect();
        event.add_list("gamma:all", indices);
        event.add_list("gamma:empty", Vec::new());
        event
    }

    #[test]
    fn totals() {
        let manager = Manager::default();
        let event = photon_event();
        let value = |expr: &str| manager.evaluate(expr, &event, None);
        assert_relative_eq!(value("totalEnergyOfParticlesInList(gamma:all)"), 4.3, epsilon = 1e-12);
        assert_relative_eq!(value("totalPxOfParticlesInList(gamma:all)"), 2.2, epsilon = 1e-12);
        assert_relative_eq!(value("totalPyOfParticlesInList(gamma:all)"), 1.5, epsilon = 1e-12);
        assert_relative_eq!(value("totalPzOfParticlesInList(gamma:all)"), 3.1, epsilon = 1e-12);
        assert_relative_eq!(value("maxPtInList(gamma:all)"), 0.41_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(value("invMassInLists(gamma:all)"), 1.79_f64.sqrt(), epsilon = 1e-12);
        // the same photons twice are not double counted
        assert_relative_eq!(
            value("invMassInLists(gamma:all, gamma:all)"),
            1.79_f64.sqrt(),
            epsilon = 1e-12
        );
        assert_eq!(value("countInList(gamma:all)"), 5.0);
        assert_eq!(value("countInList(gamma:all, E < 0.85)"), 2.0);
        assert_eq!(value("countInList(gamma:empty)"), 0.0);
        assert_eq!(value("nParticlesInList(gamma:all)"), 5.0);
        assert_eq!(value("nParticlesInList(gamma:empty)"), 0.0);
        assert!(manager.try_get_variable("nParticlesInList(gamma:all, E < 1)").is_err());
        assert!(value("totalEnergyOfParticlesInList(gamma:empty)").is_nan());
        assert!(value("maxPtInList(gamma:empty)").is_nan());
        assert!(value("invMassInLists(gamma:empty)").is_nan());
    }

    #[test]
    fn averages() {
        let manager = Manager::default();
        let event = photon_event();
        let value = |expr: &str| manager.evaluate(expr, &event, None);
        assert_relative_eq!(value("averageValueInList(gamma:all, px)"), 0.44, epsilon = 1e-12);
        assert_relative_eq!(value("medianValueInList(gamma:all, px)"), 0.5, epsilon = 1e-12);
        assert_relative_eq!(value("medianValueInList(gamma:all, E)"), 0.9, epsilon = 1e-12);
        assert!(value("averageValueInList(gamma:empty, px)").is_nan());
        assert!(value("medianValueInList(gamma:empty, px)").is_nan());

        let mut even = photon_event();
        even.add_list("gamma:four", vec![0, 1, 2, 3]);
        assert_relative_eq!(
            manager.evaluate("medianValueInList(gamma:four, E)", &even, None),
            0.85,
            epsilon = 1e-12
        );
        assert!(manager
            .try_get_variable("averageValueInList(gamma:all, NONEXISTANTVARIABLE)")
            .is_err());
        assert!(manager.try_get_variable("averageValueInList(gamma:all)").is_err());
    }

    #[test]
    fn median_skips_missing_values() {
        let manager = Manager::default();
        let mut event = photon_event();
        let weights = [Some(0.5), None, Some(0.1), Some(0.3), Some(0.2)];
        for (i, weight) in weights.into_iter().enumerate() {
            if let Some(weight) = weight {
                event.particles[i].extra_info.set("weight", weight);
            }
        }
        event.add_list("gamma:forward", vec![0, 1, 2, 3, 4]);
        event.add_list("gamma:backward", vec![4, 3, 2, 1, 0]);
        event.add_list("gamma:unweighted", vec![1]);
        let value = |expr: &str| manager.evaluate(expr, &event, None);
        assert_relative_eq!(
            value("medianValueInList(gamma:forward, extraInfo(weight))"),
            0.25,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("medianValueInList(gamma:backward, extraInfo(weight))"),
            0.25,
            epsilon = 1e-12
        );
        assert!(value("medianValueInList(gamma:unweighted, extraInfo(weight))").is_nan());
    }

    #[test]
    #[should_panic(expected = "gamma:nothere")]
    fn missing_list_size_is_fatal() {
        let manager = Manager::default();
        manager.evaluate("nParticlesInList(gamma:nothere)", &photon_event(), None);
    }

    #[test]
    #[should_panic(expected = "gamma:nothere")]
    fn missing_list_is_fatal() {
        let manager = Manager::default();
        manager.evaluate("countInList(gamma:nothere)", &photon_event(), None);
    }

    #[test]
    fn angles_to_list_members() {
        let manager = Manager::default();
        let mut event = Event::new();
        let a = event.add_particle(Particle::new(Vec4::new(1.0, 1.0, 0.0, 0.0), 22));
        let b = event.add_particle(Particle::new(Vec4::new(2.0, 0.0, 1.0, 0.0), 22));
        let c = event.add_particle(Particle::new(Vec4::new(3.0, -1.0, 0.1, 0.0), 22));
        event.add_list("gamma:test", vec![a, b, c]);
        let probe = Particle::new(Vec4::new(1.0, 1.0, 0.1, 0.0), 11);
        let value = |expr: &str| manager.evaluate(expr, &event, Some(&probe));
        assert_eq!(value("closestInList(gamma:test, E)"), 1.0);
        assert_relative_eq!(
            value("angleToClosestInList(gamma:test)"),
            0.1_f64.atan(),
            epsilon = 1e-12
        );
        assert_eq!(value("mostB2BInList(gamma:test, E)"), 3.0);
        assert_relative_eq!(
            value("angleToMostB2BInList(gamma:test)"),
            std::f64::consts::PI - 2.0 * 0.1_f64.atan(),
            epsilon = 1e-12
        );
        event.add_list("gamma:empty", Vec::new());
        assert!(manager
            .evaluate("closestInList(gamma:empty, E)", &event, Some(&probe))
            .is_nan());
        assert!(manager
            .evaluate("angleToMostB2BInList(gamma:empty)", &event, Some(&probe))
            .is_nan());
    }

    #[test]
    fn closest_member_is_found_in_the_current_frame() {
        let manager = Manager::default();
        let mut event = Event::new();
        let forward = event.add_particle(Particle::new(Vec4::new(2.0, 0.0, 0.0, 2.0), 22));
        let side = event.add_particle(Particle::new(Vec4::new(1.0, 1.0, 0.0, 0.0), 22));
        let backward = event.add_particle(Particle::new(Vec4::new(3.0, 0.0, 0.0, -3.0), 22));
        event.add_list("gamma:test", vec![forward, side, backward]);
        let probe = Particle::new(Vec4::new(1.0, 0.1, 0.0, 1.0), 11);
        let value = |expr: &str| manager.evaluate(expr, &event, Some(&probe));

        assert_eq!(value("closestInList(gamma:test, E)"), 2.0);
        assert_relative_eq!(
            value("useCMSFrame(closestInList(gamma:test, useLabFrame(E)))"),
            2.0,
            epsilon = 1e-12
        );
        let cms_energy = manager.evaluate("useCMSFrame(E)", &event, event.particles.get(forward));
        assert_relative_eq!(
            value("useCMSFrame(closestInList(gamma:test, E))"),
            cms_energy,
            epsilon = 1e-12
        );
        assert!((cms_energy - 2.0).abs() > 0.1);
    }

    #[test]
    fn membership() {
        let manager = Manager::default();
        let mut event = photon_event();
        let track = event.add_particle(
            Particle::new(Vec4::new(1.0, 0.5, 0.0, 0.0), 211).with_source(ParticleSource::Track, 0),
        );
        let copy = event.add_particle(
            Particle::new(Vec4::new(1.0, 0.5, 0.0, 0.0), 321).with_source(ParticleSource::Track, 0),
        );
        let other = event.add_particle(
            Particle::new(Vec4::new(1.0, 0.5, 0.0, 0.0), 211).with_source(ParticleSource::Track, 1),
        );
        let composite = event.add_particle(Particle::composite(
            Vec4::new(2.0, 1.0, 0.0, 0.0),
            310,
            vec![track, other],
        ));
        event.add_list("pi+:all", vec![track, other]);
        let value = |expr: &str, i: usize| manager.evaluate(expr, &event, event.particles.get(i));
        assert_eq!(value("isInList(pi+:all)", track), 1.0);
        assert_eq!(value("isInList(pi+:all)", copy), 0.0);
        assert_eq!(value("sourceObjectIsInList(pi+:all)", copy), 1.0);
        assert_eq!(value("sourceObjectIsInList(gamma:all)", copy), 0.0);
        assert_eq!(value("sourceObjectIsInList(pi+:all)", composite), -1.0);
        assert_eq!(value("numberOfNonOverlappingParticles(pi+:all)", copy), 1.0);
        assert_eq!(value("numberOfNonOverlappingParticles(pi+:all, gamma:all)", copy), 6.0);
    }

    #[test]
    fn descendants_of_lists() {
        let manager = Manager::default();
        let mut event = Event::new();
        let p4 = Vec4::new(1.0, 0.0, 0.0, 0.5);
        let pi1 = event.add_particle(Particle::new(p4, 211));
        let pi2 = event.add_particle(Particle::new(p4, -211));
        let k = event.add_particle(Particle::new(p4, 321));
        let ks = event.add_particle(Particle::composite(p4, 310, vec![pi1, pi2]));
        let d = event.add_particle(Particle::composite(p4, 421, vec![ks, k]));
        let lonely = event.add_particle(Particle::new(p4, 211));
        event.add_list("D0:sig", vec![d]);
        event.add_list("K_S0:sig", vec![ks]);
        let value = |expr: &str, i: usize| manager.evaluate(expr, &event, event.particles.get(i));
        assert_eq!(value("isDaughterOfList(D0:sig)", ks), 1.0);
        assert_eq!(value("isDaughterOfList(D0:sig)", pi1), 0.0);
        assert_eq!(value("isDaughterOfList(K_S0:sig, D0:sig)", pi1), 1.0);
        assert_eq!(value("isGrandDaughterOfList(D0:sig)", pi1), 1.0);
        assert_eq!(value("isGrandDaughterOfList(D0:sig)", k), 0.0);
        assert_eq!(value("isDescendantOfList(D0:sig)", pi2), 1.0);
        assert_eq!(value("isDescendantOfList(D0:sig, 1)", pi2), 0.0);
        assert_eq!(value("isDescendantOfList(D0:sig, 2)", pi2), 1.0);
        assert_eq!(value("isDescendantOfList(D0:sig, -1)", k), 1.0);
        assert_eq!(value("isDescendantOfList(D0:sig)", lonely), 0.0);
        assert_eq!(value("isDescendantOfList(D0:sig)", d), 0.0);
    }

    #[test]
    fn veto_and_rank() {
        let manager = Manager::default();
        let mut event = photon_event();
        let electron = event.add_particle(
            Particle::new(Vec4::new(1.0, -0.5, -0.4, -0.5), 11)
                .with_source(ParticleSource::Track, 0),
        );
        let electron = event.particles.get(electron);
        let value = |expr: &str| manager.evaluate(expr, &event, electron);
        // the combination with the second photon has no momentum left
        assert_eq!(value("veto(gamma:all, 1.79 < E < 1.81 and abs(px) < 1e-9)"), 1.0);
        assert_eq!(value("veto(gamma:all, 1.79 < E < 1.81 and abs(px) < 1e-9, 111)"), 1.0);
        assert_eq!(value("veto(gamma:all, PDG == 111, 111)"), 1.0);
        assert_eq!(value("veto(gamma:all, PDG == 111)"), 0.0);
        assert_eq!(value("veto(gamma:all, E > 10)"), 0.0);

        for (i, rank) in [3.0, 1.0, 5.0, 2.0, 4.0].into_iter().enumerate() {
            event.particles[i].extra_info.set("E_rank", rank);
        }
        let by_rank = |rank: usize| {
            manager.evaluate(&format!("getVariableByRank(gamma:all, E, px, {rank})"), &event, None)
        };
        assert_relative_eq!(by_rank(1), 0.5, epsilon = 1e-12);
        assert_relative_eq!(by_rank(4), 0.3, epsilon = 1e-12);
        assert!(by_rank(6).is_nan());
        assert!(manager
            .try_get_variable("getVariableByRank(gamma:all, E, px, first)")
            .is_err());
        assert!(manager
            .try_get_variable("getVariableByRank(gamma:all, E, px, 0)")
            .is_err());
    }
}
