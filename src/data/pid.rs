use crate::utils::enums::{Detector, Hypothesis};

/// Per-detector log-likelihoods of the charged-particle hypotheses for a single track.
///
/// Only detectors for which a value was set are considered available; sums over a detector set
/// silently skip unavailable detectors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PIDLikelihood {
    log_l: [[f64; 6]; 6],
    available: [bool; 6],
}

impl PIDLikelihood {
    /// Create a likelihood object with no available detectors.
    pub fn new() -> Self {
        Self::default()
    }
    /// Set a log-likelihood and mark the detector as available.
    pub fn set_log_likelihood(&mut self, detector: Detector, hypothesis: Hypothesis, value: f64) {
        self.log_l[detector.index()][hypothesis.index()] = value;
        self.available[detector.index()] = true;
    }
    /// Builder form of [`PIDLikelihood::set_log_likelihood`] for all hypotheses of one
    /// detector, given in [`Hypothesis::ALL`] order.
    pub fn with_detector(mut self, detector: Detector, values: [f64; 6]) -> Self {
        for (hypothesis, value) in Hypothesis::ALL.iter().zip(values) {
            self.set_log_likelihood(detector, *hypothesis, value);
        }
        self
    }
    /// Check if a detector contributed.
    pub fn is_available(&self, detector: Detector) -> bool {
        self.available[detector.index()]
    }
    /// `true` if at least one of the detectors contributed.
    pub fn any_available(&self, detectors: &[Detector]) -> bool {
        detectors.iter().any(|d| self.is_available(*d))
    }
    /// The stored log-likelihood of one detector (zero if never set).
    pub fn log_likelihood(&self, detector: Detector, hypothesis: Hypothesis) -> f64 {
        self.log_l[detector.index()][hypothesis.index()]
    }
    /// Sum of log-likelihoods over the available detectors in the set.
    pub fn sum(&self, hypothesis: Hypothesis, detectors: &[Detector]) -> f64 {
        detectors
            .iter()
            .filter(|d| self.is_available(**d))
            .map(|d| self.log_likelihood(*d, hypothesis))
            .sum()
    }
    /// Probability of a hypothesis normalized over all hypotheses,
    /// $`e^{L_h} / \sum_{h'} e^{L_{h'}}`$, or NaN if no requested detector is available.
    pub fn probability(&self, hypothesis: Hypothesis, detectors: &[Detector]) -> f64 {
        if !self.any_available(detectors) {
            return f64::NAN;
        }
        let norm: f64 = Hypothesis::ALL
            .iter()
            .map(|h| self.sum(*h, detectors).exp())
            .sum();
        self.sum(hypothesis, detectors).exp() / norm
    }
    /// Probability of `a` against `b` alone, $`1/(1 + e^{L_b - L_a})`$, or NaN if no requested
    /// detector is available.
    pub fn pair_probability(&self, a: Hypothesis, b: Hypothesis, detectors: &[Detector]) -> f64 {
        if !self.any_available(detectors) {
            return f64::NAN;
        }
        1.0 / (1.0 + (self.sum(b, detectors) - self.sum(a, detectors)).exp())
    }
    /// The hypothesis with the largest posterior $`\pi_h e^{L_h}`$ over all detectors. Ties go to
    /// the first hypothesis in [`Hypothesis::ALL`].
    pub fn most_likely(&self, priors: &[f64; 6]) -> Hypothesis {
        let mut best = Hypothesis::Electron;
        let mut best_posterior = f64::NEG_INFINITY;
        for h in Hypothesis::ALL {
            let posterior = priors[h.index()] * self.sum(h, &Detector::ALL).exp();
            if posterior > best_posterior {
                best = h;
                best_posterior = posterior;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // (e, mu, pi, K, p, d)
    fn all_detectors() -> PIDLikelihood {
        PIDLikelihood::new()
            .with_detector(Detector::TOP, [0.18, 0.50, 0.20, 0.30, 0.40, 0.60])
            .with_detector(Detector::ARICH, [0.16, 0.52, 0.22, 0.32, 0.42, 0.62])
            .with_detector(Detector::ECL, [0.14, 0.54, 0.24, 0.34, 0.44, 0.64])
            .with_detector(Detector::CDC, [0.12, 0.56, 0.26, 0.36, 0.46, 0.66])
            .with_detector(Detector::SVD, [0.10, 0.58, 0.28, 0.38, 0.48, 0.68])
            .with_detector(Detector::KLM, [0.01, 0.80, 0.20, 0.20, 0.02, 0.02])
    }

    #[test]
    fn sums_over_available_detectors() {
        let l = all_detectors();
        assert_relative_eq!(l.sum(Hypothesis::Electron, &Detector::ALL), 0.71, epsilon = 1e-12);
        assert_relative_eq!(l.sum(Hypothesis::Muon, &Detector::ALL), 3.5, epsilon = 1e-12);
        assert_relative_eq!(l.sum(Hypothesis::Pion, &Detector::ALL), 1.4, epsilon = 1e-12);
        assert_relative_eq!(l.sum(Hypothesis::Kaon, &Detector::ALL), 1.9, epsilon = 1e-12);
        assert_relative_eq!(l.sum(Hypothesis::Proton, &Detector::ALL), 2.22, epsilon = 1e-12);
        assert_relative_eq!(l.sum(Hypothesis::Deuteron, &Detector::ALL), 3.22, epsilon = 1e-12);
        assert_relative_eq!(
            l.sum(Hypothesis::Proton, &[Detector::TOP, Detector::CDC]),
            0.86,
            epsilon = 1e-12
        );
    }

    #[test]
    fn probability_is_not_recentered() {
        let l = all_detectors();
        let norm = 0.71_f64.exp()
            + 3.5_f64.exp()
            + 1.4_f64.exp()
            + 1.9_f64.exp()
            + 2.22_f64.exp()
            + 3.22_f64.exp();
        assert_relative_eq!(
            l.probability(Hypothesis::Electron, &Detector::ALL),
            0.71_f64.exp() / norm,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            l.pair_probability(Hypothesis::Kaon, Hypothesis::Proton, &Detector::ALL),
            1.0 / (1.0 + 0.32_f64.exp()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn partial_coverage() {
        let dedx = PIDLikelihood::new()
            .with_detector(Detector::CDC, [0.12, 0.56, 0.26, 0.36, 0.46, 0.66])
            .with_detector(Detector::SVD, [0.10, 0.58, 0.28, 0.38, 0.48, 0.68]);
        assert!(dedx
            .probability(Hypothesis::Pion, &[Detector::KLM])
            .is_nan());
        assert!(dedx
            .pair_probability(
                Hypothesis::Kaon,
                Hypothesis::Proton,
                &[Detector::ECL, Detector::TOP, Detector::ARICH]
            )
            .is_nan());
        assert!(!dedx
            .pair_probability(
                Hypothesis::Kaon,
                Hypothesis::Proton,
                &[Detector::ECL, Detector::TOP, Detector::ARICH, Detector::SVD]
            )
            .is_nan());
        assert_relative_eq!(dedx.sum(Hypothesis::Electron, &Detector::ALL), 0.22, epsilon = 1e-12);
    }

    #[test]
    fn most_likely_hypothesis() {
        let l = all_detectors();
        assert_eq!(l.most_likely(&[1.0; 6]), Hypothesis::Muon);
        assert_eq!(
            l.most_likely(&[0.0, 0.0, 0.0, 0.0, 0.0, 1.0]),
            Hypothesis::Deuteron
        );
        // all posteriors zero: the first hypothesis wins the tie
        assert_eq!(l.most_likely(&[0.0; 6]), Hypothesis::Electron);
    }
}
