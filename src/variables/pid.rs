//! Particle identification variables built on [`PIDLikelihood`].
//!
//! Log-likelihoods are summed over the requested detectors and turned into probabilities by a
//! plain softmax over the six charged hypotheses. Every variable gives NaN for a particle
//! without a likelihood object or when none of the requested detectors contributed.
use crate::{
    data::{Event, PIDLikelihood, Particle},
    manager::{var_function, Manager, VarValue},
    parser::Arguments,
    utils::enums::{Detector, Hypothesis},
    VarmanError, VarmanResult,
};

fn hypothesis(args: &Arguments, i: usize) -> VarmanResult<Hypothesis> {
    let pdg = args.pdg(i)?;
    Hypothesis::from_pdg(pdg).ok_or_else(|| VarmanError::InvalidArgument {
        name: args.name.to_string(),
        reason: format!("{pdg} is not a charged particle hypothesis"),
    })
}

fn with_likelihood<F>(event: &Event, particle: Option<&Particle>, f: F) -> VarValue
where
    F: FnOnce(&PIDLikelihood) -> f64,
{
    VarValue::Double(
        particle
            .and_then(|p| event.likelihood(p))
            .map_or(f64::NAN, f),
    )
}

fn register_global_id(
    manager: &mut Manager,
    name: &str,
    hypothesis: Hypothesis,
) -> VarmanResult<()> {
    manager.register_double(
        name,
        &format!("{hypothesis} probability from all detectors"),
        move |event, particle| {
            event
                .likelihood(particle)
                .map_or(f64::NAN, |l| l.probability(hypothesis, &Detector::ALL))
        },
    )
}

/// Register the particle identification variables.
///
/// # Errors
///
/// Fails if a name is already registered.
pub fn register(manager: &mut Manager) -> VarmanResult<()> {
    register_global_id(manager, "electronID", Hypothesis::Electron)?;
    register_global_id(manager, "muonID", Hypothesis::Muon)?;
    register_global_id(manager, "pionID", Hypothesis::Pion)?;
    register_global_id(manager, "kaonID", Hypothesis::Kaon)?;
    register_global_id(manager, "protonID", Hypothesis::Proton)?;
    register_global_id(manager, "deuteronID", Hypothesis::Deuteron)?;
    manager.register_double(
        "particleID",
        "probability of the particle's own hypothesis from all detectors",
        |event, particle| {
            let Some(h) = Hypothesis::from_pdg(particle.pdg) else {
                return f64::NAN;
            };
            event
                .likelihood(particle)
                .map_or(f64::NAN, |l| l.probability(h, &Detector::ALL))
        },
    )?;

    manager.register_meta(
        "pidLogLikelihoodValueExpert",
        "pidLogLikelihoodValueExpert(pdg, detector, ...): summed log-likelihood of one hypothesis",
        |_, args| {
            args.expect_at_least(2)?;
            let h = hypothesis(args, 0)?;
            let detectors = args.detectors(1)?;
            Ok(var_function(move |event, particle| {
                with_likelihood(event, particle, |l| {
                    if l.any_available(&detectors) {
                        l.sum(h, &detectors)
                    } else {
                        f64::NAN
                    }
                })
            }))
        },
    )?;
    manager.register_meta(
        "pidProbabilityExpert",
        "pidProbabilityExpert(pdg, detector, ...): probability of one hypothesis against all others",
        |_, args| {
            args.expect_at_least(2)?;
            let h = hypothesis(args, 0)?;
            let detectors = args.detectors(1)?;
            Ok(var_function(move |event, particle| {
                with_likelihood(event, particle, |l| l.probability(h, &detectors))
            }))
        },
    )?;
    manager.register_meta(
        "pidPairProbabilityExpert",
        "pidPairProbabilityExpert(pdgA, pdgB, detector, ...): probability of hypothesis A against hypothesis B",
        |_, args| {
            args.expect_at_least(3)?;
            let a = hypothesis(args, 0)?;
            let b = hypothesis(args, 1)?;
            let detectors = args.detectors(2)?;
            Ok(var_function(move |event, particle| {
                with_likelihood(event, particle, |l| l.pair_probability(a, b, &detectors))
            }))
        },
    )?;
    manager.register_meta(
        "pidMissingProbabilityExpert",
        "pidMissingProbabilityExpert(detector, ...): 1 if none of the detectors contributed, 0 otherwise",
        |_, args| {
            args.expect_at_least(1)?;
            let detectors = args.detectors(0)?;
            Ok(var_function(move |event, particle| {
                with_likelihood(event, particle, |l| {
                    if l.any_available(&detectors) {
                        0.0
                    } else {
                        1.0
                    }
                })
            }))
        },
    )?;
    manager.register_meta(
        "pidMostLikelyPDG",
        "pidMostLikelyPDG([e, mu, pi, K, p, d]): absolute PDG code of the hypothesis with the largest prior-weighted likelihood",
        |_, args| {
            let priors = match args.len() {
                0 => [1.0; 6],
                6 => {
                    let mut priors = [0.0; 6];
                    for (i, prior) in priors.iter_mut().enumerate() {
                        *prior = args.float(i)?;
                        if *prior < 0.0 {
                            return Err(VarmanError::InvalidArgument {
                                name: args.name.to_string(),
                                reason: format!("prior {} is negative", args.get(i)),
                            });
                        }
                    }
                    priors
                }
                _ => {
                    return Err(VarmanError::ArgumentCountError {
                        name: args.name.to_string(),
                        expected: "0 or 6".to_string(),
                        found: args.len(),
                    })
                }
            };
            Ok(var_function(move |event, particle| {
                match particle.and_then(|p| event.likelihood(p)) {
                    Some(l) => VarValue::Int(i64::from(l.most_likely(&priors).pdg())),
                    None => VarValue::Double(f64::NAN),
                }
            }))
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::vectors::Vec4;
    use approx::assert_relative_eq;

    // log-likelihood sums over all detectors: e 0.71, mu 3.5, pi 1.4, K 1.9, p 2.22, d 3.22
    fn all_detectors() -> PIDLikelihood {
        PIDLikelihood::new()
            .with_detector(Detector::TOP, [0.18, 0.50, 0.20, 0.30, 0.40, 0.60])
            .with_detector(Detector::ARICH, [0.16, 0.52, 0.22, 0.32, 0.42, 0.62])
            .with_detector(Detector::ECL, [0.14, 0.54, 0.24, 0.34, 0.44, 0.64])
            .with_detector(Detector::CDC, [0.12, 0.56, 0.26, 0.36, 0.46, 0.66])
            .with_detector(Detector::SVD, [0.10, 0.58, 0.28, 0.38, 0.48, 0.68])
            .with_detector(Detector::KLM, [0.01, 0.80, 0.20, 0.20, 0.02, 0.02])
    }

    fn dedx_only() -> PIDLikelihood {
        PIDLikelihood::new()
            .with_detector(Detector::CDC, [0.12, 0.56, 0.26, 0.36, 0.46, 0.66])
            .with_detector(Detector::SVD, [0.10, 0.58, 0.28, 0.38, 0.48, 0.68])
    }

    /// Tracks with hypotheses pi (all), pi (dE/dx), pi (no PID), mu (all), K (all), d (all).
    fn pid_event() -> Event {
        let mut event = Event::new();
        let p4 = Vec4::new(1.0, 0.2, 0.3, 0.5);
        for (i, (pdg, likelihood)) in [
            (211, Some(all_detectors())),
            (211, Some(dedx_only())),
            (211, None),
            (13, Some(all_detectors())),
            (-321, Some(all_detectors())),
            (1000010020, Some(all_detectors())),
        ]
        .into_iter()
        .enumerate()
        {
            let index = event.add_particle(Particle::track(p4, pdg, i));
            if let Some(likelihood) = likelihood {
                event.add_likelihood(index, likelihood);
            }
        }
        event
    }

    fn norm() -> f64 {
        [0.71_f64, 3.5, 1.4, 1.9, 2.22, 3.22]
            .iter()
            .map(|l| l.exp())
            .sum()
    }

    #[test]
    fn global_probabilities() {
        let manager = Manager::default();
        let event = pid_event();
        let all = event.particles.first();
        let value = |expr: &str, p| manager.evaluate(expr, &event, p);
        assert_relative_eq!(value("electronID", all), 0.71_f64.exp() / norm(), epsilon = 1e-12);
        assert_relative_eq!(value("muonID", all), 3.5_f64.exp() / norm(), epsilon = 1e-12);
        assert_relative_eq!(value("pionID", all), 1.4_f64.exp() / norm(), epsilon = 1e-12);
        assert_relative_eq!(value("kaonID", all), 1.9_f64.exp() / norm(), epsilon = 1e-12);
        assert_relative_eq!(value("protonID", all), 2.22_f64.exp() / norm(), epsilon = 1e-12);
        assert_relative_eq!(value("deuteronID", all), 3.22_f64.exp() / norm(), epsilon = 1e-12);
        let total: f64 = ["electronID", "muonID", "pionID", "kaonID", "protonID", "deuteronID"]
            .iter()
            .map(|name| value(name, all))
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);

        let none = event.particles.get(2);
        for name in ["electronID", "muonID", "pionID", "kaonID", "protonID", "deuteronID"] {
            assert!(value(name, none).is_nan());
        }
    }

    #[test]
    fn own_hypothesis() {
        let manager = Manager::default();
        let event = pid_event();
        let value = |i: usize| manager.evaluate("particleID", &event, event.particles.get(i));
        assert_relative_eq!(value(0), 1.4_f64.exp() / norm(), epsilon = 1e-12);
        assert_relative_eq!(value(3), 3.5_f64.exp() / norm(), epsilon = 1e-12);
        assert_relative_eq!(value(4), 1.9_f64.exp() / norm(), epsilon = 1e-12);
        assert_relative_eq!(value(5), 3.22_f64.exp() / norm(), epsilon = 1e-12);
        assert!(value(2).is_nan());
    }

    #[test]
    fn expert_values() {
        let manager = Manager::default();
        let event = pid_event();
        let [all, dedx, none] = [0, 1, 2].map(|i| event.particles.get(i));
        let value = |expr: &str, p| manager.evaluate(expr, &event, p);
        assert_relative_eq!(
            value("pidLogLikelihoodValueExpert(11, TOP)", all),
            0.18,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("pidLogLikelihoodValueExpert(11, ALL)", all),
            0.71,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("pidLogLikelihoodValueExpert(2212, TOP, CDC)", all),
            0.86,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("pidLogLikelihoodValueExpert(e-, TOP)", all),
            0.18,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("pidProbabilityExpert(211, ALL)", dedx),
            value("pidProbabilityExpert(211, CDC, SVD)", all),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("pidProbabilityExpert(211, CDC)", dedx),
            value("pidProbabilityExpert(211, CDC)", all),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("pidPairProbabilityExpert(321, 2212, ALL)", all),
            1.0 / (1.0 + 0.32_f64.exp()),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            value("pidPairProbabilityExpert(321, 2212, CDC, SVD)", all),
            1.0 / (1.0 + 0.2_f64.exp()),
            epsilon = 1e-12
        );
        assert!(value("pidPairProbabilityExpert(321, 2212, KLM)", dedx).is_nan());
        assert!(value("pidPairProbabilityExpert(321, 2212, ECL, TOP, ARICH)", dedx).is_nan());
        assert!(!value("pidPairProbabilityExpert(321, 2212, ECL, TOP, ARICH, SVD)", dedx).is_nan());
        assert!(value("pidLogLikelihoodValueExpert(11, TOP, CDC, SVD)", none).is_nan());
        assert!(value("pidLogLikelihoodValueExpert(11, TOP)", dedx).is_nan());
    }

    #[test]
    fn missing_detectors() {
        let manager = Manager::default();
        let mut event = Event::new();
        let p4 = Vec4::new(1.0, 0.2, 0.3, 0.5);
        let likelihoods = [
            PIDLikelihood::new()
                .with_detector(Detector::TOP, [0.18, 0.0, 0.0, 0.0, 0.0, 0.0])
                .with_detector(Detector::ECL, [0.14, 0.0, 0.0, 0.0, 0.0, 0.0]),
            PIDLikelihood::new()
                .with_detector(Detector::TOP, [0.0, 0.0, 0.2, 0.0, 0.0, 0.0])
                .with_detector(Detector::ARICH, [0.0, 0.0, 0.22, 0.0, 0.0, 0.0])
                .with_detector(Detector::ECL, [0.0, 0.0, 0.24, 0.0, 0.0, 0.0]),
            PIDLikelihood::new()
                .with_detector(Detector::TOP, [0.0, 0.0, 0.0, 0.3, 0.0, 0.0])
                .with_detector(Detector::ARICH, [0.0, 0.0, 0.0, 0.32, 0.0, 0.0]),
            PIDLikelihood::new()
                .with_detector(Detector::ARICH, [0.0, 0.0, 0.0, 0.0, 0.42, 0.0])
                .with_detector(Detector::ECL, [0.0, 0.0, 0.0, 0.0, 0.44, 0.0]),
        ];
        let hypotheses = [11, 211, 321, 2212].into_iter().zip(likelihoods);
        for (i, (pdg, likelihood)) in hypotheses.enumerate() {
            let index = event.add_particle(Particle::track(p4, pdg, i));
            event.add_likelihood(index, likelihood);
        }
        let missing = |det: &str| {
            let var = manager.get_variable(&format!("pidMissingProbabilityExpert({det})"));
            (0..4)
                .map(|i| var.value(&event, event.particles.get(i)))
                .collect::<Vec<_>>()
        };
        assert_eq!(missing("TOP"), vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(missing("ARICH"), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(missing("ECL"), vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(missing("ECL, TOP"), vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn most_likely_hypothesis() {
        let manager = Manager::default();
        let event = pid_event();
        let [all, dedx, none] = [0, 1, 2].map(|i| event.particles.get(i));
        let value = |expr: &str, p| manager.evaluate(expr, &event, p);
        assert_eq!(value("pidMostLikelyPDG()", all), 13.0);
        assert_eq!(value("pidMostLikelyPDG(1, 0.001, 1, 1, 1, 0.001)", all), 2212.0);
        assert_eq!(value("pidMostLikelyPDG(1, 0, 0, 0, 0, 0)", dedx), 11.0);
        assert!(value("pidMostLikelyPDG()", none).is_nan());
    }

    #[test]
    fn bad_arguments() {
        let manager = Manager::default();
        assert!(manager.try_get_variable("pidProbabilityExpert(22, ALL)").is_err());
        assert!(manager.try_get_variable("pidProbabilityExpert(211, XYZ)").is_err());
        assert!(manager.try_get_variable("pidProbabilityExpert(notAParticle, ALL)").is_err());
        assert!(manager.try_get_variable("pidPairProbabilityExpert(211, 321)").is_err());
        assert!(manager.try_get_variable("pidMissingProbabilityExpert()").is_err());
        assert!(manager.try_get_variable("pidMostLikelyPDG(1, 2)").is_err());
        assert!(manager.try_get_variable("pidMostLikelyPDG(1, 1, 1, 1, 1, -1)").is_err());
    }
}
