//! Incremental Gaussian naive Bayes over raw feature values.
//!
//! Class statistics and the global feature statistics both learn one sample
//! at a time using Welford's algorithm, so memory is fixed regardless of how
//! many samples have been seen. The global per-feature variance only sets the
//! variance floor for each class-conditional Gaussian, which keeps
//! single-sample classes from collapsing to a spike. Features are never
//! rescaled before classification.

use super::features::{FeatureVector, FEATURE_COUNT};
use crate::decision::Action;

use serde::{Deserialize, Serialize};

/// Fraction of the global feature variance added to every class variance.
const VAR_SMOOTHING: f64 = 1e-2;

/// Absolute variance floor for features that have never varied.
const MIN_VARIANCE: f64 = 1e-6;

const CLASS_COUNT: usize = Action::ALL.len();

// ---------------------------------------------------------------------------
// Running statistics
// ---------------------------------------------------------------------------

/// Welford running mean and variance for every feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    count: u64,
    mean: [f64; FEATURE_COUNT],
    m2: [f64; FEATURE_COUNT],
}

impl RunningStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: [0.0; FEATURE_COUNT],
            m2: [0.0; FEATURE_COUNT],
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Fold one sample in. Returns false, leaving the stats untouched, when
    /// the sample would make any mean or variance non-finite.
    pub fn update(&mut self, values: &[f64; FEATURE_COUNT]) -> bool {
        match self.updated(values) {
            Some(next) => {
                *self = next;
                true
            }
            None => false,
        }
    }

    fn updated(&self, values: &[f64; FEATURE_COUNT]) -> Option<Self> {
        let mut next = self.clone();
        next.count += 1;
        let n = next.count as f64;
        for (index, value) in values.iter().enumerate() {
            let delta = value - next.mean[index];
            next.mean[index] += delta / n;
            let delta2 = value - next.mean[index];
            next.m2[index] += delta * delta2;
            if !next.mean[index].is_finite() || !next.m2[index].is_finite() {
                return None;
            }
        }
        Some(next)
    }

    pub fn mean(&self, index: usize) -> f64 {
        self.mean[index]
    }

    /// Population variance; zero until two samples have been seen.
    pub fn variance(&self, index: usize) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2[index] / self.count as f64
        }
    }
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Probability per action, ordered by `Action::index`.
pub type ClassProbabilities = Vec<(Action, f64)>;

/// Online classifier from feature vectors to actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineClassifier {
    /// Statistics over every sample regardless of label.
    global: RunningStats,
    classes: Vec<RunningStats>,
    total: u64,
}

impl OnlineClassifier {
    pub fn new() -> Self {
        Self {
            global: RunningStats::new(),
            classes: (0..CLASS_COUNT).map(|_| RunningStats::new()).collect(),
            total: 0,
        }
    }

    /// Samples this classifier has learned from.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Learn one labelled sample. Returns false and learns nothing when the
    /// sample would overflow the running statistics.
    pub fn learn_one(&mut self, features: &FeatureVector, label: Action) -> bool {
        let values = features.values();
        let (Some(global), Some(class)) = (
            self.global.updated(values),
            self.classes[label.index()].updated(values),
        ) else {
            return false;
        };
        self.global = global;
        self.classes[label.index()] = class;
        self.total += 1;
        true
    }

    /// Posterior over the classes seen so far.
    ///
    /// Empty before the first `learn_one`. Classes never seen are omitted,
    /// matching an incremental learner that only knows labels it was shown.
    pub fn predict_proba_one(&self, features: &FeatureVector) -> ClassProbabilities {
        if self.total == 0 {
            return Vec::new();
        }

        let values = features.values();
        let floors: [f64; FEATURE_COUNT] = std::array::from_fn(|index| {
            (self.global.variance(index) * VAR_SMOOTHING).max(MIN_VARIANCE)
        });

        let mut log_posteriors: Vec<(Action, f64)> = Vec::with_capacity(CLASS_COUNT);
        for (class_index, stats) in self.classes.iter().enumerate() {
            if stats.count() == 0 {
                continue;
            }
            let mut log_posterior = (stats.count() as f64 / self.total as f64).ln();
            for (feature_index, value) in values.iter().enumerate() {
                let variance = stats.variance(feature_index) + floors[feature_index];
                let diff = value - stats.mean(feature_index);
                log_posterior += -0.5 * (2.0 * std::f64::consts::PI * variance).ln()
                    - (diff * diff) / (2.0 * variance);
            }
            log_posteriors.push((Action::from_index(class_index), log_posterior));
        }

        let max_log = log_posteriors
            .iter()
            .map(|(_, log_p)| *log_p)
            .fold(f64::NEG_INFINITY, f64::max);
        if !max_log.is_finite() {
            return Vec::new();
        }

        let normalizer: f64 = log_posteriors
            .iter()
            .map(|(_, log_p)| (log_p - max_log).exp())
            .sum();

        log_posteriors
            .into_iter()
            .map(|(action, log_p)| (action, (log_p - max_log).exp() / normalizer))
            .collect()
    }

    /// Highest-probability action and its probability. Ties resolve to the
    /// lowest action index so prediction is deterministic.
    pub fn predict_one(&self, features: &FeatureVector) -> Option<(Action, f64)> {
        self.predict_proba_one(features)
            .into_iter()
            .fold(None, |best: Option<(Action, f64)>, (action, probability)| match best {
                Some((_, best_probability)) if best_probability >= probability => best,
                _ => Some((action, probability)),
            })
    }
}

impl Default for OnlineClassifier {
    fn default() -> Self {
        Self::new()
    }
}
