//! The student: an online learner that decides inline once it is trusted.
//!
//! Every council decision is replayed into the learner as a label for each
//! buffered failure, so the share of failures the student can handle on its
//! own grows over time.

mod classifier;
pub mod features;
mod learner;

pub use classifier::{ClassProbabilities, OnlineClassifier};
pub use features::{extract as extract_features, FeatureVector};
pub use learner::{OnlineLearner, StudentSnapshot, StudentStats, TrainingRecord};
