//! Meta-variables which evaluate other variables in a different frame, on daughters, through
//! cuts and formulas, or through the extra-info caches.
use log::{error, warn};

use super::opening_angle;
use crate::{
    data::{Event, Particle},
    frame::{self, CMSFrame, LabFrame, RestFrame, UseReferenceFrame},
    manager::{var_function, Manager, Var, VarValue},
    parser::{encode_name, Arguments, DaughterPath},
    utils::{
        pdg,
        vectors::{FourMomentum, ThreeMomentum, Vec3, Vec4},
        wrap_angle,
    },
    VarmanError, VarmanResult,
};

/// Evaluate `var` on every daughter of the particle.
fn daughter_values(var: &Var, event: &Event, particle: &Particle) -> Vec<f64> {
    particle
        .daughter_particles(event)
        .into_iter()
        .map(|d| var.value(event, Some(d)))
        .collect()
}

fn resolve_all<'a>(
    event: &'a Event,
    particle: &'a Particle,
    paths: &[DaughterPath],
) -> Option<Vec<&'a Particle>> {
    paths.iter().map(|path| path.resolve(particle, event)).collect()
}

fn daughter_paths(args: &Arguments, from: usize) -> VarmanResult<Vec<DaughterPath>> {
    (from..args.len()).map(|i| args.daughter_path(i)).collect()
}

fn register_frames(manager: &mut Manager) -> VarmanResult<()> {
    manager.register_meta(
        "useRestFrame",
        "useRestFrame(X): X in the rest frame of the particle",
        |manager, args| {
            args.expect(1)?;
            let var = manager.try_get_variable(args.get(0))?;
            Ok(var_function(move |event, particle| {
                let _frame = particle.map(|p| UseReferenceFrame::new(RestFrame::new(p)));
                var.evaluate(event, particle)
            }))
        },
    )?;
    manager.register_meta(
        "useCMSFrame",
        "useCMSFrame(X): X in the center-of-mass frame of the colliding beams",
        |manager, args| {
            args.expect(1)?;
            let var = manager.try_get_variable(args.get(0))?;
            let cms = CMSFrame::new(&manager.beam());
            Ok(var_function(move |event, particle| {
                let _frame = UseReferenceFrame::new(cms.clone());
                var.evaluate(event, particle)
            }))
        },
    )?;
    manager.register_meta(
        "useLabFrame",
        "useLabFrame(X): X in the lab frame",
        |manager, args| {
            args.expect(1)?;
            let var = manager.try_get_variable(args.get(0))?;
            Ok(var_function(move |event, particle| {
                let _frame = UseReferenceFrame::new(LabFrame);
                var.evaluate(event, particle)
            }))
        },
    )?;
    manager.register_meta(
        "useTagSideRecoilRestFrame",
        "useTagSideRecoilRestFrame(X, i): X on an Upsilon(4S) in the rest frame recoiling against its i-th daughter",
        |manager, args| {
            args.expect(2)?;
            let var = manager.try_get_variable(args.get(0))?;
            let tag_index = args.index(1)?;
            let beam = manager.beam().beam_momentum();
            Ok(var_function(move |event, particle| {
                let Some(particle) = particle else {
                    return VarValue::Double(f64::NAN);
                };
                if particle.pdg != 300553 {
                    error!("useTagSideRecoilRestFrame can only be used on an Upsilon(4S)");
                    return VarValue::Double(f64::NAN);
                }
                let Some(tag) = particle.daughter(event, tag_index) else {
                    warn!("Upsilon(4S) has no daughter {}", tag_index);
                    return VarValue::Double(f64::NAN);
                };
                let _frame = UseReferenceFrame::new(RestFrame::from_momentum(
                    &(beam - tag.p4),
                    Vec3::zeros(),
                ));
                var.evaluate(event, Some(particle))
            }))
        },
    )
}

fn register_info(manager: &mut Manager) -> VarmanResult<()> {
    manager.register_meta(
        "extraInfo",
        "extraInfo(name): extra-info value stored on the particle",
        |_, args| {
            args.expect(1)?;
            let key = args.get(0).to_string();
            Ok(var_function(move |_, particle| {
                let Some(particle) = particle else {
                    warn!(
                        "extraInfo({}) needs a particle, use eventExtraInfo for event values",
                        key
                    );
                    return VarValue::Double(f64::NAN);
                };
                VarValue::Double(particle.extra_info.get(&key).unwrap_or(f64::NAN))
            }))
        },
    )?;
    manager.register_meta(
        "eventExtraInfo",
        "eventExtraInfo(name): extra-info value stored on the event",
        |_, args| {
            args.expect(1)?;
            let key = args.get(0).to_string();
            Ok(var_function(move |event, _| {
                VarValue::Double(event.extra_info.get(&key).unwrap_or(f64::NAN))
            }))
        },
    )?;
    manager.register_meta(
        "eventCached",
        "eventCached(X): X evaluated once per event and stored in the event extra info",
        |manager, args| {
            args.expect(1)?;
            let var = manager.try_get_variable(args.get(0))?;
            let key = format!("__{}", encode_name(args.get(0)));
            Ok(var_function(move |event, _| {
                if let Some(value) = event.extra_info.get(&key) {
                    return VarValue::Double(value);
                }
                let value = var.value(event, None);
                event.extra_info.set(&key, value);
                VarValue::Double(value)
            }))
        },
    )?;
    manager.register_meta(
        "particleCached",
        "particleCached(X): X evaluated once per particle and stored in the particle extra info",
        |manager, args| {
            args.expect(1)?;
            let var = manager.try_get_variable(args.get(0))?;
            let key = format!("__{}", encode_name(args.get(0)));
            Ok(var_function(move |event, particle| {
                let Some(particle) = particle else {
                    return VarValue::Double(f64::NAN);
                };
                if let Some(value) = particle.extra_info.get(&key) {
                    return VarValue::Double(value);
                }
                let value = var.value(event, Some(particle));
                particle.extra_info.set(&key, value);
                VarValue::Double(value)
            }))
        },
    )
}

fn register_expressions(manager: &mut Manager) -> VarmanResult<()> {
    manager.register_meta(
        "formula",
        "formula(expression): arithmetic expression of variables",
        |manager, args| {
            args.expect(1)?;
            let formula = manager.compile_formula(args.get(0))?;
            Ok(var_function(move |event, particle| {
                VarValue::Double(formula.evaluate(event, particle))
            }))
        },
    )?;
    manager.register_meta(
        "passesCut",
        "passesCut(cut): 1 if the particle passes the cut",
        |manager, args| {
            args.expect(1)?;
            let cut = manager.compile_cut(args.get(0))?;
            Ok(var_function(move |event, particle| match particle {
                Some(p) => VarValue::Bool(cut.check(event, Some(p))),
                None => VarValue::Double(f64::NAN),
            }))
        },
    )?;
    manager.register_meta(
        "passesEventCut",
        "passesEventCut(cut): 1 if the event passes the cut",
        |manager, args| {
            args.expect(1)?;
            let cut = manager.compile_cut(args.get(0))?;
            Ok(var_function(move |event, _| VarValue::Bool(cut.check(event, None))))
        },
    )?;
    manager.register_meta(
        "conditionalVariableSelector",
        "conditionalVariableSelector(cut, X, Y): X if the particle passes the cut, else Y",
        |manager, args| {
            args.expect(3)?;
            let cut = manager.compile_cut(args.get(0))?;
            let if_true = manager.try_get_variable(args.get(1))?;
            let if_false = manager.try_get_variable(args.get(2))?;
            Ok(var_function(move |event, particle| match particle {
                Some(p) if cut.check(event, Some(p)) => if_true.evaluate(event, Some(p)),
                Some(p) => if_false.evaluate(event, Some(p)),
                None => VarValue::Double(f64::NAN),
            }))
        },
    )?;
    manager.register_meta(
        "varFor",
        "varFor(pdg, X): X if the particle's |PDG| matches, else NaN",
        |manager, args| {
            args.expect(2)?;
            let pdg = args.pdg(0)?.abs();
            let var = manager.try_get_variable(args.get(1))?;
            Ok(var_function(move |event, particle| match particle {
                Some(p) if p.pdg.abs() == pdg => var.evaluate(event, Some(p)),
                _ => VarValue::Double(f64::NAN),
            }))
        },
    )
}

/// Register `name(X)` which applies `f` to the value of X.
fn register_unary<F>(manager: &mut Manager, name: &str, description: &str, f: F) -> VarmanResult<()>
where
    F: Fn(f64) -> VarValue + Copy + Send + Sync + 'static,
{
    manager.register_meta(name, description, move |manager, args| {
        args.expect(1)?;
        let var = manager.try_get_variable(args.get(0))?;
        Ok(var_function(move |event, particle| f(var.value(event, particle))))
    })
}

fn register_binary<F>(
    manager: &mut Manager,
    name: &str,
    description: &str,
    f: F,
) -> VarmanResult<()>
where
    F: Fn(f64, f64) -> f64 + Copy + Send + Sync + 'static,
{
    manager.register_meta(name, description, move |manager, args| {
        args.expect(2)?;
        let a = manager.try_get_variable(args.get(0))?;
        let b = manager.try_get_variable(args.get(1))?;
        Ok(var_function(move |event, particle| {
            VarValue::Double(f(a.value(event, particle), b.value(event, particle)))
        }))
    })
}

/// Combined p-value of independent tests, $`P \sum_{i=0}^{n-1} (-\ln P)^i / i!`$ with $`P`$ the
/// product of the individual p-values, or `-1` if any of them is negative.
pub fn combine_pvalues(pvalues: &[f64]) -> f64 {
    if pvalues.iter().any(|&p| p < 0.0) {
        return -1.0;
    }
    let product: f64 = pvalues.iter().product();
    let log = -product.ln();
    let mut term = 1.0;
    let mut sum = 1.0;
    for i in 1..pvalues.len() {
        term *= log / i as f64;
        sum += term;
    }
    product * sum
}

fn register_math(manager: &mut Manager) -> VarmanResult<()> {
    register_unary(manager, "abs", "abs(X): absolute value of X", |x| {
        VarValue::Double(x.abs())
    })?;
    register_unary(manager, "sin", "sin(X): sine of X", |x| VarValue::Double(x.sin()))?;
    register_unary(manager, "cos", "cos(X): cosine of X", |x| VarValue::Double(x.cos()))?;
    register_unary(manager, "log10", "log10(X): decimal logarithm of X", |x| {
        VarValue::Double(x.log10())
    })?;
    register_unary(manager, "isNAN", "isNAN(X): 1 if X is NaN", |x| {
        VarValue::Bool(x.is_nan())
    })?;
    register_unary(manager, "isInfinity", "isInfinity(X): 1 if X is infinite", |x| {
        VarValue::Bool(x.is_infinite())
    })?;
    register_binary(manager, "max", "max(X, Y): larger of X and Y", f64::max)?;
    register_binary(manager, "min", "min(X, Y): smaller of X and Y", f64::min)?;
    manager.register_meta("constant", "constant(v): the number v", |_, args| {
        args.expect(1)?;
        let value = args.float(0)?;
        Ok(var_function(move |_, _| VarValue::Double(value)))
    })?;
    manager.register_meta(
        "ifNANgiveX",
        "ifNANgiveX(X, v): X, or the number v if X is NaN",
        |manager, args| {
            args.expect(2)?;
            let var = manager.try_get_variable(args.get(0))?;
            let fallback = args.float(1)?;
            Ok(var_function(move |event, particle| {
                let value = var.value(event, particle);
                VarValue::Double(if value.is_nan() { fallback } else { value })
            }))
        },
    )?;
    manager.register_meta(
        "modulo",
        "modulo(X, n): X truncated to an integer, modulo the integer n",
        |manager, args| {
            args.expect(2)?;
            let var = manager.try_get_variable(args.get(0))?;
            let n = args.int(1)?;
            if n == 0 {
                return Err(VarmanError::InvalidArgument {
                    name: args.name.to_string(),
                    reason: "division by zero".to_string(),
                });
            }
            Ok(var_function(move |event, particle| {
                VarValue::Int(var.evaluate(event, particle).as_int() % n)
            }))
        },
    )?;
    manager.register_meta(
        "unmask",
        "unmask(X, flag, ...): the integer X with the given bit flags cleared",
        |manager, args| {
            args.expect_at_least(2)?;
            let var = manager.try_get_variable(args.get(0))?;
            let mut mask = 0;
            for i in 1..args.len() {
                mask |= args.int(i)?;
            }
            Ok(var_function(move |event, particle| {
                VarValue::Int(var.evaluate(event, particle).as_int() & !mask)
            }))
        },
    )?;
    manager.register_meta(
        "pValueCombination",
        "pValueCombination(X, ...): combined p-value of independent p-values, -1 if any is negative",
        |manager, args| {
            args.expect_at_least(1)?;
            let vars = manager.try_get_variables(args.args)?;
            Ok(var_function(move |event, particle| {
                let pvalues: Vec<f64> = vars.iter().map(|v| v.value(event, particle)).collect();
                VarValue::Double(combine_pvalues(&pvalues))
            }))
        },
    )
}

/// Register `name(X)` which reduces the values of X on all daughters.
fn register_daughter_reduction<F>(
    manager: &mut Manager,
    name: &str,
    description: &str,
    reduce: F,
) -> VarmanResult<()>
where
    F: Fn(Vec<f64>) -> f64 + Copy + Send + Sync + 'static,
{
    manager.register_meta(name, description, move |manager, args| {
        args.expect(1)?;
        let var = manager.try_get_variable(args.get(0))?;
        Ok(var_function(move |event, particle| {
            VarValue::Double(particle.map_or(f64::NAN, |p| reduce(daughter_values(&var, event, p))))
        }))
    })
}

fn lowest_or_highest(values: Vec<f64>, highest: bool) -> f64 {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |best, v| {
            if best.is_nan() || (highest && v > best) || (!highest && v < best) {
                v
            } else {
                best
            }
        })
}

/// Register `name(i, j, X)` which combines X on two daughters.
fn register_daughter_pair<F>(
    manager: &mut Manager,
    name: &str,
    description: &str,
    f: F,
) -> VarmanResult<()>
where
    F: Fn(f64, f64) -> f64 + Copy + Send + Sync + 'static,
{
    manager.register_meta(name, description, move |manager, args| {
        args.expect(3)?;
        let first = args.daughter_path(0)?;
        let second = args.daughter_path(1)?;
        let var = manager.try_get_variable(args.get(2))?;
        Ok(var_function(move |event, particle| {
            let value = particle
                .and_then(|p| Some((first.resolve(p, event)?, second.resolve(p, event)?)))
                .map_or(f64::NAN, |(i, j)| {
                    f(var.value(event, Some(i)), var.value(event, Some(j)))
                });
            VarValue::Double(value)
        }))
    })
}

/// Register `name(i, X)` which combines X on a daughter (first) and on the mother (second).
fn register_daughter_mother<F>(
    manager: &mut Manager,
    name: &str,
    description: &str,
    f: F,
) -> VarmanResult<()>
where
    F: Fn(f64, f64) -> f64 + Copy + Send + Sync + 'static,
{
    manager.register_meta(name, description, move |manager, args| {
        args.expect(2)?;
        let path = args.daughter_path(0)?;
        let var = manager.try_get_variable(args.get(1))?;
        Ok(var_function(move |event, particle| {
            let value = particle
                .and_then(|p| Some((path.resolve(p, event)?, p)))
                .map_or(f64::NAN, |(daughter, mother)| {
                    f(var.value(event, Some(daughter)), var.value(event, Some(mother)))
                });
            VarValue::Double(value)
        }))
    })
}

fn register_daughters(manager: &mut Manager) -> VarmanResult<()> {
    manager.register_meta(
        "daughter",
        "daughter(N, X): X on the N-th daughter",
        |manager, args| {
            args.expect(2)?;
            let n = args.index(0)?;
            let var = manager.try_get_variable(args.get(1))?;
            Ok(var_function(move |event, particle| {
                match particle.and_then(|p| p.daughter(event, n)) {
                    Some(daughter) => var.evaluate(event, Some(daughter)),
                    None => VarValue::Double(f64::NAN),
                }
            }))
        },
    )?;
    manager.register_meta(
        "countDaughters",
        "countDaughters(cut): number of daughters passing the cut",
        |manager, args| {
            args.expect(1)?;
            let cut = manager.compile_cut(args.get(0))?;
            Ok(var_function(move |event, particle| match particle {
                Some(p) => VarValue::Int(
                    p.daughter_particles(event)
                        .into_iter()
                        .filter(|d| cut.check(event, Some(*d)))
                        .count() as i64,
                ),
                None => VarValue::Double(f64::NAN),
            }))
        },
    )?;
    register_daughter_reduction(
        manager,
        "daughterProductOf",
        "daughterProductOf(X): product of X over all daughters",
        |values| values.into_iter().product(),
    )?;
    register_daughter_reduction(
        manager,
        "daughterSumOf",
        "daughterSumOf(X): sum of X over all daughters",
        |values| values.into_iter().sum(),
    )?;
    register_daughter_reduction(
        manager,
        "daughterLowest",
        "daughterLowest(X): lowest value of X among the daughters",
        |values| lowest_or_highest(values, false),
    )?;
    register_daughter_reduction(
        manager,
        "daughterHighest",
        "daughterHighest(X): highest value of X among the daughters",
        |values| lowest_or_highest(values, true),
    )?;
    register_daughter_pair(
        manager,
        "daughterDiffOf",
        "daughterDiffOf(i, j, X): X(j) - X(i) of two daughters",
        |i, j| j - i,
    )?;
    register_daughter_pair(
        manager,
        "daughterNormDiffOf",
        "daughterNormDiffOf(i, j, X): (X(j) - X(i)) / (X(j) + X(i)) of two daughters",
        |i, j| (j - i) / (j + i),
    )?;
    register_daughter_mother(
        manager,
        "daughterMotherDiffOf",
        "daughterMotherDiffOf(i, X): X of the mother minus X of the i-th daughter",
        |daughter, mother| mother - daughter,
    )?;
    register_daughter_mother(
        manager,
        "daughterMotherNormDiffOf",
        "daughterMotherNormDiffOf(i, X): (X(mother) - X(daughter)) / (X(mother) + X(daughter))",
        |daughter, mother| (mother - daughter) / (mother + daughter),
    )?;
    manager.register_meta(
        "daughterDiffOfPhi",
        "daughterDiffOfPhi(i, j): azimuthal angle of daughter j minus that of daughter i, in [-pi, pi]",
        |manager, args| {
            args.expect(2)?;
            let first = args.daughter_path(0)?;
            let second = args.daughter_path(1)?;
            let phi = manager.try_get_variable("phi")?;
            Ok(var_function(move |event, particle| {
                let value = particle
                    .and_then(|p| Some((first.resolve(p, event)?, second.resolve(p, event)?)))
                    .map_or(f64::NAN, |(i, j)| {
                        wrap_angle(phi.value(event, Some(j)) - phi.value(event, Some(i)))
                    });
                VarValue::Double(value)
            }))
        },
    )?;
    manager.register_meta(
        "daughterDiffOfPhiCMS",
        "daughterDiffOfPhiCMS(i, j): daughterDiffOfPhi(i, j) in the center-of-mass frame",
        |manager, args| {
            args.expect(2)?;
            manager.try_get_variable(&format!(
                "useCMSFrame(daughterDiffOfPhi({}, {}))",
                args.get(0),
                args.get(1)
            ))
            .map(|var| var_function(move |event, particle| var.evaluate(event, particle)))
        },
    )?;
    register_daughter_angle(manager, "daughterAngle")?;
    register_daughter_angle(manager, "daughterAngleInBetween")?;
    register_daughter_mass(manager, "daughterInvM")?;
    register_daughter_mass(manager, "daughterInvariantMass")?;
    manager.register_meta(
        "daughterCombination",
        "daughterCombination(X, i, j, ...): X on the sum of the current-frame momenta of the given (generalized index) daughters",
        |manager, args| {
            args.expect_at_least(2)?;
            let var = manager.try_get_variable(args.get(0))?;
            let paths = daughter_paths(args, 1)?;
            Ok(var_function(move |event, particle| {
                let Some(daughters) = particle.and_then(|p| resolve_all(event, p, &paths)) else {
                    return VarValue::Double(f64::NAN);
                };
                let frame = frame::current();
                let total: Vec4 = daughters.iter().map(|d| frame.momentum(d)).sum();
                let combination = Particle::new(total, 100);
                var.evaluate(event, Some(&combination))
            }))
        },
    )
}

fn register_daughter_angle(manager: &mut Manager, name: &str) -> VarmanResult<()> {
    manager.register_meta(
        name,
        &format!(
            "{name}(i, j[, k]): angle between two daughters, or between the third and the sum of the first two (generalized indices, current frame)"
        ),
        |_, args| {
            args.expect_range(2, 3)?;
            let paths = daughter_paths(args, 0)?;
            Ok(var_function(move |event, particle| {
                let Some(daughters) = particle.and_then(|p| resolve_all(event, p, &paths)) else {
                    return VarValue::Double(f64::NAN);
                };
                let frame = frame::current();
                let momenta: Vec<Vec3> = daughters
                    .iter()
                    .map(|d| frame.momentum(d).momentum())
                    .collect();
                let angle = match momenta.as_slice() {
                    [a, b] => opening_angle(a, b),
                    [a, b, c] => opening_angle(&(a + b), c),
                    _ => f64::NAN,
                };
                VarValue::Double(angle)
            }))
        },
    )
}

fn register_daughter_mass(manager: &mut Manager, name: &str) -> VarmanResult<()> {
    manager.register_meta(
        name,
        &format!("{name}(i, j, ...): invariant mass of the sum of the given daughters"),
        |_, args| {
            args.expect_at_least(2)?;
            let indices = (0..args.len())
                .map(|i| args.index(i))
                .collect::<VarmanResult<Vec<usize>>>()?;
            Ok(var_function(move |event, particle| {
                let Some(particle) = particle else {
                    return VarValue::Double(f64::NAN);
                };
                let frame = frame::current();
                let mut total = Vec4::zeros();
                for &i in &indices {
                    match particle.daughter(event, i) {
                        Some(daughter) => total += frame.momentum(daughter),
                        None => return VarValue::Double(f64::NAN),
                    }
                }
                VarValue::Double(total.m())
            }))
        },
    )
}

/// Parse a `daughter:particle` pair into the daughter index and the nominal mass of the
/// particle.
fn mass_hypothesis(args: &Arguments, i: usize) -> VarmanResult<(usize, f64)> {
    let invalid = |reason: String| VarmanError::InvalidArgument {
        name: args.name.to_string(),
        reason,
    };
    let arg = args.get(i);
    let Some((index, name)) = arg.split_once(':') else {
        return Err(invalid(format!(
            "\"{arg}\" is not of the form daughter:particle, e.g. 0:K+"
        )));
    };
    if name.contains(':') {
        return Err(invalid(format!(
            "\"{arg}\" has more than one colon, generalized indices are not supported"
        )));
    }
    let index = index.trim().parse::<usize>().map_err(|_| VarmanError::ParseError {
        name: index.to_string(),
        object: format!("daughter index for {}", args.name),
    })?;
    let mass = pdg::code(name.trim())
        .and_then(pdg::mass)
        .ok_or_else(|| VarmanError::ParseError {
            name: name.to_string(),
            object: format!("particle name for {}", args.name),
        })?;
    Ok((index, mass))
}

fn register_hypotheses(manager: &mut Manager) -> VarmanResult<()> {
    manager.register_meta(
        "useAlternativeDaughterHypothesis",
        "useAlternativeDaughterHypothesis(X, i:particle, ...): X on the sum of the daughters, with daughter i given the mass of particle",
        |manager, args| {
            args.expect_at_least(2)?;
            let var = manager.try_get_variable(args.get(0))?;
            let hypotheses = (1..args.len())
                .map(|i| mass_hypothesis(args, i))
                .collect::<VarmanResult<Vec<_>>>()?;
            Ok(var_function(move |event, particle| {
                let Some(particle) = particle else {
                    return VarValue::Double(f64::NAN);
                };
                let mut total = Vec4::zeros();
                for (i, daughter) in particle.daughter_particles(event).into_iter().enumerate() {
                    total += match hypotheses.iter().find(|(index, _)| *index == i) {
                        Some(&(_, mass)) => daughter.p4.momentum().with_mass(mass),
                        None => daughter.p4,
                    };
                }
                var.evaluate(event, Some(&Particle::new(total, 100)))
            }))
        },
    )
}

/// Register the generic meta-variables.
pub fn register(manager: &mut Manager) -> VarmanResult<()> {
    register_frames(manager)?;
    register_info(manager)?;
    register_expressions(manager)?;
    register_math(manager)?;
    register_daughters(manager)?;
    register_hypotheses(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BeamParameters,
        frame::ReferenceFrame,
        variables::fixtures::{logged, single},
    };
    use approx::assert_relative_eq;
    use log::Level;
    use std::f64::consts::PI;

    /// A D+ with four daughters of energies 1 to 4, alternating PDG codes `a` and `b`.
    fn four_daughters(a: i32, b: i32) -> (Event, usize) {
        let mut event = Event::new();
        let mut total = Vec4::zeros();
        let mut daughters = Vec::new();
        for i in 0..4 {
            let p4 = Vec4::new(i as f64 + 1.0, 1.0, 1.0, 1.0);
            total += p4;
            daughters.push(event.add_particle(Particle::new(p4, if i % 2 == 1 { b } else { a })));
        }
        let mother = event.add_particle(Particle::composite(total, 411, daughters));
        (event, mother)
    }

    #[test]
    fn frames() {
        let manager = Manager::default();
        let (event, i) = single(
            Particle::new(Vec4::new(1.0, 0.1, -0.4, 0.8), 11).with_vertex(Vec3::new(1.0, 2.0, 2.0)),
        );
        let p = Some(&event.particles[i]);
        assert_relative_eq!(manager.evaluate("p", &event, p), 0.9, epsilon = 1e-12);
        assert_relative_eq!(manager.evaluate("useLabFrame(p)", &event, p), 0.9, epsilon = 1e-12);
        assert_relative_eq!(
            manager.evaluate("useLabFrame(distance)", &event, p),
            3.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(manager.evaluate("useRestFrame(p)", &event, p), 0.0, epsilon = 1e-9);
        assert_relative_eq!(
            manager.evaluate("useRestFrame(E)", &event, p),
            0.4358899,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            manager.evaluate("useRestFrame(distance)", &event, p),
            0.0,
            epsilon = 1e-12
        );
        let cms = CMSFrame::new(&BeamParameters::default());
        let expected = cms.transform_momentum(&event.particles[i].p4);
        assert_relative_eq!(
            manager.evaluate("useCMSFrame(p)", &event, p),
            expected.p(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            manager.evaluate("useCMSFrame(E)", &event, p),
            expected.e(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            manager.evaluate("useCMSFrame(useLabFrame(E))", &event, p),
            1.0,
            epsilon = 1e-12
        );
        assert_eq!(frame::depth(), 0);
    }

    #[test]
    fn tag_side_recoil_frame() {
        let manager = Manager::default();
        let beam = BeamParameters::default().beam_momentum();
        let mut event = Event::new();
        let tag = Vec4::new(5.4, 0.3, 0.1, 1.0);
        let sig = Vec4::new(5.6, -0.2, 0.1, 2.0);
        let b_tag = event.add_particle(Particle::new(tag, 511));
        let b_sig = event.add_particle(Particle::new(sig, -511));
        let upsilon = event.add_particle(Particle::composite(
            tag + sig,
            300553,
            vec![b_tag, b_sig],
        ));
        let expected =
            RestFrame::from_momentum(&(beam - tag), Vec3::zeros()).transform_momentum(&sig);
        let value = |p| manager.evaluate("useTagSideRecoilRestFrame(daughter(1, p), 0)", &event, p);
        assert_relative_eq!(
            value(event.particles.get(upsilon)),
            expected.p(),
            epsilon = 1e-12
        );
        assert!(value(event.particles.get(b_tag)).is_nan());
        assert!(manager.try_get_variable("useTagSideRecoilRestFrame(p, NOTINT)").is_err());
    }

    #[test]
    fn extra_info_and_caching() {
        let manager = Manager::default();
        let (event, i) = single(Particle::new(Vec4::new(2.0, 0.1, -0.4, 0.8), 11));
        let p = &event.particles[i];
        p.extra_info.set("pi", 3.14);
        event.extra_info.set("pi", 3.15);
        assert_relative_eq!(manager.evaluate("extraInfo(pi)", &event, Some(p)), 3.14);
        assert!(manager.evaluate("extraInfo(pi)", &event, None).is_nan());
        assert!(manager.evaluate("extraInfo(e)", &event, Some(p)).is_nan());
        assert_relative_eq!(manager.evaluate("eventExtraInfo(pi)", &event, None), 3.15);

        assert_relative_eq!(manager.evaluate("eventCached(constant(3.14))", &event, None), 3.14);
        assert_eq!(event.extra_info.get("__constant__bo3__pt14__bc"), Some(3.14));
        event.extra_info.set("__eventExtraInfo__bopi__bc", 2.0);
        assert_relative_eq!(manager.evaluate("eventCached(eventExtraInfo(pi))", &event, None), 2.0);

        assert_relative_eq!(manager.evaluate("particleCached(px)", &event, Some(p)), 0.1);
        assert_eq!(p.extra_info.get("__px"), Some(0.1));
        p.extra_info.set("__py", -0.5);
        assert_relative_eq!(manager.evaluate("particleCached(py)", &event, Some(p)), -0.5);
    }

    #[test]
    fn formulas_and_cuts() {
        let manager = Manager::default();
        let mut event = Event::new();
        let a = event.add_particle(Particle::new(Vec4::new(2.0, 0.1, -0.4, 0.8), 11));
        let b = event.add_particle(Particle::new(Vec4::new(4.0, 0.1, -0.4, 0.8), 11));
        let (a, b) = (Some(&event.particles[a]), Some(&event.particles[b]));
        assert_relative_eq!(manager.evaluate("formula(px + py)", &event, a), -0.3, epsilon = 1e-12);
        assert_relative_eq!(manager.evaluate("formula(py / px)", &event, a), -4.0, epsilon = 1e-12);
        assert_relative_eq!(manager.evaluate("formula(PDG * charge)", &event, a), -11.0);
        assert_relative_eq!(
            manager.evaluate("formula(10.58 - (px + py + pz - E)**2)", &event, a),
            8.33,
            epsilon = 1e-12
        );
        assert_relative_eq!(manager.evaluate("passesCut(E < 3)", &event, a), 1.0);
        assert_relative_eq!(manager.evaluate("passesCut(E < 3)", &event, b), 0.0);
        assert!(manager.evaluate("passesCut(E < 3)", &event, None).is_nan());
        event.extra_info.set("nTracks", 4.0);
        assert_relative_eq!(
            manager.evaluate("passesEventCut(eventExtraInfo(nTracks) > 3)", &event, None),
            1.0
        );
        assert_relative_eq!(
            manager.evaluate("conditionalVariableSelector(E > 3, px, py)", &event, a),
            -0.4
        );
        assert_relative_eq!(
            manager.evaluate("conditionalVariableSelector(E > 3, px, py)", &event, b),
            0.1
        );
        assert_relative_eq!(manager.evaluate("varFor(e-, E)", &event, a), 2.0);
        assert_relative_eq!(manager.evaluate("varFor(-11, E)", &event, b), 4.0);
        assert!(manager.evaluate("varFor(211, E)", &event, a).is_nan());
    }

    #[test]
    fn math() {
        let manager = Manager::default();
        let mut event = Event::new();
        let a = event.add_particle(Particle::new(Vec4::new(1.0, PI / 2.0, -0.4, 0.8), 11));
        let b = event.add_particle(Particle::new(Vec4::new(1.0, -0.1, -0.4, 0.8), -11));
        let (a, b) = (Some(&event.particles[a]), Some(&event.particles[b]));
        assert_relative_eq!(manager.evaluate("abs(px)", &event, b), 0.1);
        assert_relative_eq!(manager.evaluate("sin(px)", &event, a), 1.0, epsilon = 1e-12);
        assert_relative_eq!(manager.evaluate("cos(px)", &event, a), 0.0, epsilon = 1e-12);
        assert_relative_eq!(manager.evaluate("log10(constant(100))", &event, None), 2.0);
        assert_relative_eq!(manager.evaluate("max(px, py)", &event, b), -0.1);
        assert_relative_eq!(manager.evaluate("min(px, py)", &event, b), -0.4);
        assert_relative_eq!(manager.evaluate("constant(0)", &event, None), 0.0);
        assert_relative_eq!(manager.evaluate("modulo(PDG, 4)", &event, a), 3.0);
        assert_relative_eq!(manager.evaluate("isNAN(extraInfo(x))", &event, a), 1.0);
        assert_relative_eq!(manager.evaluate("isNAN(px)", &event, a), 0.0);
        assert_relative_eq!(manager.evaluate("ifNANgiveX(extraInfo(x), 5)", &event, a), 5.0);
        assert_relative_eq!(manager.evaluate("ifNANgiveX(px, 5)", &event, b), -0.1);
        assert_relative_eq!(manager.evaluate("isInfinity(infinity)", &event, a), 1.0);
        assert!(manager.try_get_variable("modulo(PDG, 0)").is_err());
    }

    #[test]
    fn unmasking() {
        let manager = Manager::default();
        let (event, i) = single(Particle::new(Vec4::new(1.0, 0.0, 0.0, 0.5), 11));
        let p = &event.particles[i];
        p.extra_info.set("flags", 2.0 + 8.0 + 16.0);
        assert_relative_eq!(manager.evaluate("unmask(extraInfo(flags), 8)", &event, Some(p)), 18.0);
        assert_relative_eq!(
            manager.evaluate("unmask(extraInfo(flags), 8, 16)", &event, Some(p)),
            2.0
        );
        assert_relative_eq!(manager.evaluate("unmask(extraInfo(flags), 1)", &event, Some(p)), 26.0);
    }

    #[test]
    #[should_panic(expected = "unmask(mcErrors)")]
    fn unmask_needs_a_flag() {
        Manager::default().get_variable("unmask(mcErrors)");
    }

    #[test]
    #[should_panic(expected = "NOTINT")]
    fn unmask_needs_integer_flags() {
        Manager::default().get_variable("unmask(mcErrors, NOTINT)");
    }

    #[test]
    fn pvalue_combination() {
        assert_relative_eq!(combine_pvalues(&[0.5]), 0.5);
        let product: f64 = 0.5 * 0.2;
        assert_relative_eq!(
            combine_pvalues(&[0.5, 0.2]),
            product * (1.0 - product.ln()),
            epsilon = 1e-12
        );
        assert_relative_eq!(combine_pvalues(&[0.5, -1.0, 0.2]), -1.0);
        let manager = Manager::default();
        let mut event = Event::new();
        let pion = Vec4::new(1.0, 0.0, 0.0, 0.5);
        let d = event.add_particle(Particle::new(pion, 211).with_pvalue(0.5));
        let e = event.add_particle(Particle::new(pion, 211).with_pvalue(0.2));
        let mother = event
            .add_particle(Particle::composite(Vec4::zeros(), 310, vec![d, e]).with_pvalue(0.1));
        let value = manager.evaluate(
            "pValueCombination(chiProb, daughter(0, chiProb), daughter(1, chiProb))",
            &event,
            event.particles.get(mother),
        );
        assert_relative_eq!(value, combine_pvalues(&[0.1, 0.5, 0.2]), epsilon = 1e-12);
    }

    #[test]
    #[should_panic(expected = "pValueCombination()")]
    fn pvalue_combination_needs_arguments() {
        Manager::default().get_variable("pValueCombination()");
    }

    #[test]
    #[should_panic(expected = "NONEXISTANTVARIABLE")]
    fn pvalue_combination_of_unknown_variable() {
        Manager::default().get_variable("pValueCombination(chiProb, NONEXISTANTVARIABLE)");
    }

    #[test]
    fn daughter_access() {
        let manager = Manager::default();
        let mut event = Event::new();
        let mut daughters = Vec::new();
        for i in 0..6 {
            let pdg = if i % 2 == 1 { 211 } else { -211 };
            let p4 = Vec4::new(1.0, i as f64, 1.0, 1.0);
            daughters.push(event.add_particle(Particle::new(p4, pdg)));
        }
        let mother = event.add_particle(Particle::composite(Vec4::zeros(), 411, daughters));
        let p = event.particles.get(mother);
        assert!(manager.evaluate("daughter(6, px)", &event, p).is_nan());
        assert_relative_eq!(manager.evaluate("daughter(0, px)", &event, p), 0.0);
        assert_relative_eq!(manager.evaluate("daughter(2, px)", &event, p), 2.0);
        assert_relative_eq!(manager.evaluate("countDaughters(charge > 0)", &event, p), 3.0);
        assert_relative_eq!(manager.evaluate("countDaughters(abs(charge) > 0)", &event, p), 6.0);
        assert_relative_eq!(manager.evaluate("daughterLowest(px)", &event, p), 0.0);
        assert_relative_eq!(manager.evaluate("daughterHighest(px)", &event, p), 5.0);
        assert!(manager.evaluate("daughterHighest(px)", &event, event.particles.first()).is_nan());
    }

    #[test]
    fn daughter_reductions() {
        let manager = Manager::default();
        let (event, mother) = four_daughters(-211, 211);
        let p = event.particles.get(mother);
        assert_relative_eq!(manager.evaluate("daughterProductOf(E)", &event, p), 24.0);
        assert_relative_eq!(manager.evaluate("daughterSumOf(E)", &event, p), 10.0);
    }

    #[test]
    fn daughter_differences() {
        let manager = Manager::default();
        let (event, mother) = four_daughters(211, -11);
        let p = event.particles.get(mother);
        assert_relative_eq!(manager.evaluate("daughterDiffOf(0, 1, PDG)", &event, p), -222.0);
        assert_relative_eq!(manager.evaluate("daughterDiffOf(1, 0, PDG)", &event, p), 222.0);
        assert_relative_eq!(manager.evaluate("daughterDiffOf(0, 1, abs(PDG))", &event, p), -200.0);
        assert_relative_eq!(manager.evaluate("daughterDiffOf(1, 3, abs(PDG))", &event, p), 0.0);
        assert!(manager.evaluate("daughterDiffOf(0, 4, PDG)", &event, p).is_nan());
        assert_relative_eq!(
            manager.evaluate("daughterNormDiffOf(0, 1, PDG)", &event, p),
            -222.0 / 200.0
        );
        assert_relative_eq!(
            manager.evaluate("daughterNormDiffOf(0, 1, abs(PDG))", &event, p),
            -200.0 / 222.0
        );
        assert_relative_eq!(manager.evaluate("daughterMotherDiffOf(1, PDG)", &event, p), 422.0);
        assert_relative_eq!(manager.evaluate("daughterMotherDiffOf(0, PDG)", &event, p), 200.0);
        assert_relative_eq!(
            manager.evaluate("daughterMotherNormDiffOf(1, abs(PDG))", &event, p),
            400.0 / 422.0
        );
        assert_relative_eq!(
            manager.evaluate("daughterMotherNormDiffOf(0, PDG)", &event, p),
            200.0 / 622.0
        );
    }

    #[test]
    #[should_panic(expected = "NOTINT")]
    fn daughter_difference_needs_indices() {
        Manager::default().get_variable("daughterDiffOf(0, NOTINT, PDG)");
    }

    /// An omega decaying to a rho (itself decaying to two charged pions) and a neutral pion.
    fn omega_decay() -> (Event, usize) {
        let mut event = Event::new();
        let a = event.add_particle(Particle::new(Vec4::new(2.0, 1.0, 0.0, 0.0), 211));
        let b = event.add_particle(Particle::new(Vec4::new(2.0, 0.0, 1.0, 0.0), -211));
        let c = event.add_particle(Particle::new(Vec4::new(2.0, -1.0, -1.0, 0.0), 111));
        let rho = event.add_particle(Particle::composite(
            Vec4::new(4.0, 1.0, 1.0, 0.0),
            113,
            vec![a, b],
        ));
        let top = event.add_particle(Particle::composite(
            Vec4::new(6.0, 0.0, 0.0, 0.0),
            223,
            vec![rho, c],
        ));
        (event, top)
    }

    #[test]
    fn daughter_kinematics() {
        let manager = Manager::default();
        let (event, top) = omega_decay();
        let p = event.particles.get(top);
        let value = |expr: &str| manager.evaluate(expr, &event, p);
        assert_relative_eq!(value("daughterAngle(0:0, 0:1)"), PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(
            value("daughterAngleInBetween(0:0, 0:1, 1)"),
            PI,
            epsilon = 1e-12
        );
        assert!(value("daughterAngle(0, 2)").is_nan());
        assert!(value("daughterAngle(1, 0:1:0:0:1)").is_nan());
        assert_relative_eq!(value("daughterDiffOfPhi(0:0, 0:1)"), PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(
            value("daughterDiffOfPhi(0:1, 1)"),
            3.0 * PI / 4.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(value("daughterInvM(0, 1)"), 6.0, epsilon = 1e-12);
        assert!(value("daughterInvariantMass(0, 2)").is_nan());
        assert!(manager.try_get_variable("daughterInvM(0)").is_err());
        let mass = (16.0_f64 - 2.0).sqrt();
        assert_relative_eq!(
            value("daughterCombination(M, 0:0, 0:1)"),
            mass,
            epsilon = 1e-12
        );
        assert_relative_eq!(value("daughterCombination(PDG, 0:0, 1)"), 100.0);
        assert!(value("daughterCombination(M, 1, 0:1:0:0:1)").is_nan());
        assert!(manager.try_get_variable("daughterCombination(M)").is_err());
    }

    #[test]
    fn malformed_daughter_paths_are_reported() {
        let manager = Manager::default();
        let (event, top) = omega_decay();
        let p = event.particles.get(top);
        let (value, records) =
            logged(|| manager.evaluate("daughterAngle(1, 0:1:0:0:1)", &event, p));
        assert!(value.is_nan());
        assert!(records
            .iter()
            .any(|(level, message)| *level == Level::Warn && message.contains("0:1:0:0:1")));

        let (value, records) = logged(|| manager.evaluate("daughterAngle(0:-1, 1)", &event, p));
        assert!(value.is_nan());
        assert!(records
            .iter()
            .any(|(level, message)| *level == Level::Warn && message.contains("malformed")));

        let (_, records) = logged(|| manager.evaluate("daughterAngle(0:0, 0:1)", &event, p));
        assert!(records.iter().all(|(level, _)| *level != Level::Warn));
    }

    #[test]
    fn daughter_differences_follow_the_frame() {
        let manager = Manager::default();
        let (event, top) = omega_decay();
        let p = event.particles.get(top);
        let value = |expr: &str| manager.evaluate(expr, &event, p);
        let lab = value("daughterDiffOf(0:0, 0:1, phi)");
        assert_relative_eq!(lab, PI / 2.0, epsilon = 1e-12);
        let cms = value("useCMSFrame(daughterDiffOf(0:0, 0:1, phi))");
        assert_relative_eq!(
            cms,
            value("daughterDiffOf(0:0, 0:1, useCMSFrame(phi))"),
            epsilon = 1e-12
        );
        assert!((cms - lab).abs() > 0.05);
        assert_relative_eq!(
            value("useCMSFrame(daughterDiffOfPhi(0:0, 0:1))"),
            cms,
            epsilon = 1e-12
        );
        assert_relative_eq!(value("daughterDiffOfPhiCMS(0:0, 0:1)"), cms, epsilon = 1e-12);
        assert!(value("daughterDiffOfPhiCMS(0, 2)").is_nan());
        assert!(manager.try_get_variable("daughterDiffOfPhiCMS(0)").is_err());
    }

    #[test]
    fn alternative_daughter_hypotheses() {
        let manager = Manager::default();
        let mut event = Event::new();
        let pion = pdg::mass(211).unwrap();
        let kaon = pdg::mass(321).unwrap();
        let a = Vec3::new(0.5, 0.0, 0.1);
        let b = Vec3::new(-0.3, 0.4, 0.2);
        let first = event.add_particle(Particle::new(a.with_mass(pion), -211));
        let second = event.add_particle(Particle::new(b.with_mass(pion), 211));
        let total = event.particles[first].p4 + event.particles[second].p4;
        let mother = event.add_particle(Particle::composite(total, 421, vec![first, second]));
        let p = event.particles.get(mother);
        let value = |expr: &str| manager.evaluate(expr, &event, p);

        assert_relative_eq!(
            value("useAlternativeDaughterHypothesis(M, 0:K-)"),
            (a.with_mass(kaon) + b.with_mass(pion)).m(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("useAlternativeDaughterHypothesis(M, 0:K-, 1:p+)"),
            (a.with_mass(kaon) + b.with_mass(pdg::mass(2212).unwrap())).m(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("useAlternativeDaughterHypothesis(M, 0:pi-)"),
            value("M"),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("useAlternativeDaughterHypothesis(p, 0:K-)"),
            (a + b).norm(),
            epsilon = 1e-12
        );
        // hypotheses for daughters that do not exist change nothing
        assert_relative_eq!(
            value("useAlternativeDaughterHypothesis(M, 5:K-)"),
            value("M"),
            epsilon = 1e-12
        );
        for bad in [
            "useAlternativeDaughterHypothesis(M)",
            "useAlternativeDaughterHypothesis(M, 0)",
            "useAlternativeDaughterHypothesis(M, 0:1:K+)",
            "useAlternativeDaughterHypothesis(M, x:K+)",
            "useAlternativeDaughterHypothesis(M, 0:notAParticle)",
        ] {
            assert!(manager.try_get_variable(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn nested_functions() {
        let manager = Manager::default();
        let (event, mother) = four_daughters(-211, 211);
        let p = event.particles.get(mother);
        let highest = manager.evaluate("useCMSFrame(daughterHighest(E))", &event, p);
        assert_relative_eq!(highest, manager.evaluate("useCMSFrame(daughter(3, E))", &event, p));
        assert!(highest < manager.evaluate("daughterHighest(E)", &event, p));
    }
}
