//! OnlineLearner: the confidence-gated student.
//!
//! Wraps the online classifier with the bookkeeping the router needs: how much
//! it has been trained, how often its own prior prediction agreed with the
//! council's label, and rolling windows of recent confidences and training
//! outcomes. All windows are bounded so `learn` can run indefinitely.

use super::classifier::OnlineClassifier;
use super::features;
use crate::config::StudentConfig;
use crate::decision::{Action, AgentSource, Decision, DecisionSource, ProposalInput};
use crate::error::{EventError, StoreError};
use crate::transaction::Transaction;

use serde::{Deserialize, Serialize};

use std::collections::VecDeque;
use std::path::Path;

/// Recent training outcomes returned by `get_stats`.
const STATS_RECENT_DECISIONS: usize = 5;

/// One training step as seen from the student's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub transaction_id: String,
    pub council_action: Action,
    pub student_would_predict: Action,
    pub confidence: f64,
}

/// Read-only view of the learner for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentStats {
    pub samples_seen: u64,
    pub correct_predictions: u64,
    pub accuracy: f64,
    pub average_confidence: f64,
    pub confidence_threshold: f64,
    pub min_warmup_samples: u64,
    pub is_ready: bool,
    pub recent_decisions: Vec<TrainingRecord>,
}

/// Serializable learner state. Opaque to everything but the learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSnapshot {
    pub classifier: OnlineClassifier,
    pub samples_seen: u64,
    pub correct_predictions: u64,
    pub confidence_history: Vec<f64>,
}

impl StudentSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Incrementally trained classifier with a dual confidence gate.
#[derive(Debug, Clone)]
pub struct OnlineLearner {
    config: StudentConfig,
    model: OnlineClassifier,
    samples_seen: u64,
    correct_predictions: u64,
    confidence_history: VecDeque<f64>,
    recent_decisions: VecDeque<TrainingRecord>,
}

impl OnlineLearner {
    pub fn new(config: StudentConfig) -> Self {
        let confidence_history = VecDeque::with_capacity(config.confidence_window);
        let recent_decisions = VecDeque::with_capacity(config.recent_decisions_window);
        Self {
            config,
            model: OnlineClassifier::new(),
            samples_seen: 0,
            correct_predictions: 0,
            confidence_history,
            recent_decisions,
        }
    }

    /// Rebuild a learner from a snapshot under the given runtime config.
    pub fn from_snapshot(config: StudentConfig, snapshot: StudentSnapshot) -> Self {
        let mut learner = Self::new(config);
        learner.restore(snapshot);
        learner
    }

    pub fn config(&self) -> &StudentConfig {
        &self.config
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn correct_predictions(&self) -> u64 {
        self.correct_predictions
    }

    /// Predict the action for a transaction and the model's confidence in it.
    ///
    /// Returns `(NoAction, 0.0)` while the model has no distribution to offer,
    /// and for any transaction the feature encoder cannot accept.
    pub fn predict(&mut self, transaction: &Transaction) -> (Action, f64) {
        let Some((action, confidence)) = self.raw_predict(transaction) else {
            return (Action::NoAction, 0.0);
        };
        push_bounded(
            &mut self.confidence_history,
            confidence,
            self.config.confidence_window,
        );
        (action, confidence)
    }

    /// Train on one council-labelled transaction.
    ///
    /// Before updating, re-predicts to tally whether the student would have
    /// agreed with the label.
    pub fn learn(
        &mut self,
        transaction: &Transaction,
        decision: &Decision,
    ) -> Result<(), EventError> {
        transaction.validate()?;
        let features = features::extract(transaction);

        let (predicted_action, confidence) = self.predict(transaction);
        if !self.model.learn_one(&features, decision.action) {
            tracing::warn!(
                transaction_id = %transaction.id,
                "student skipped sample that would overflow model statistics"
            );
            return Err(EventError::UnusableFeatures {
                id: transaction.id.clone(),
            });
        }
        if predicted_action == decision.action {
            self.correct_predictions += 1;
        }
        self.samples_seen += 1;

        push_bounded(
            &mut self.recent_decisions,
            TrainingRecord {
                transaction_id: transaction.id.clone(),
                council_action: decision.action,
                student_would_predict: predicted_action,
                confidence,
            },
            self.config.recent_decisions_window,
        );

        tracing::trace!(
            transaction_id = %transaction.id,
            label = %decision.action,
            predicted = %predicted_action,
            samples_seen = self.samples_seen,
            "student learned from council label"
        );
        Ok(())
    }

    /// Whether the student may decide this transaction on its own.
    ///
    /// Confident only when the top-class probability clears the threshold and
    /// the model has seen at least `min_warmup_samples` labels. A sparse model
    /// can be locally certain and still untrustworthy, so both must hold.
    pub fn is_confident(&mut self, transaction: &Transaction) -> (bool, Action, f64) {
        let (action, confidence) = self.predict(transaction);
        let confident = confidence >= self.config.confidence_threshold && self.is_ready();
        (confident, action, confidence)
    }

    pub fn is_ready(&self) -> bool {
        self.samples_seen >= self.config.min_warmup_samples
    }

    /// Fraction of training calls where the prior prediction matched the label.
    pub fn accuracy(&self) -> f64 {
        if self.samples_seen == 0 {
            return 0.0;
        }
        self.correct_predictions as f64 / self.samples_seen as f64
    }

    /// Rolling mean of recent prediction confidences.
    pub fn average_confidence(&self) -> f64 {
        if self.confidence_history.is_empty() {
            return 0.0;
        }
        self.confidence_history.iter().sum::<f64>() / self.confidence_history.len() as f64
    }

    pub fn get_stats(&self) -> StudentStats {
        let skip = self
            .recent_decisions
            .len()
            .saturating_sub(STATS_RECENT_DECISIONS);
        StudentStats {
            samples_seen: self.samples_seen,
            correct_predictions: self.correct_predictions,
            accuracy: self.accuracy(),
            average_confidence: self.average_confidence(),
            confidence_threshold: self.config.confidence_threshold,
            min_warmup_samples: self.config.min_warmup_samples,
            is_ready: self.is_ready(),
            recent_decisions: self.recent_decisions.iter().skip(skip).cloned().collect(),
        }
    }

    /// Autonomous decision if the confidence gate passes, otherwise `None`.
    pub fn make_decision(&mut self, transaction: &Transaction) -> Option<Decision> {
        self.decide(transaction).0
    }

    /// Like `make_decision`, also returning the confidence the gate saw,
    /// including the 0.0 of an untrained or absorbed prediction.
    pub fn decide(&mut self, transaction: &Transaction) -> (Option<Decision>, f64) {
        let (confident, action, confidence) = self.is_confident(transaction);
        if !confident {
            return (None, confidence);
        }
        let decision = Decision::new(
            action,
            format!(
                "Student model confident ({:.1}%) based on {} samples",
                confidence * 100.0,
                self.samples_seen
            ),
            confidence,
            AgentSource::Student,
        );
        (Some(decision), confidence)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> StudentSnapshot {
        StudentSnapshot {
            classifier: self.model.clone(),
            samples_seen: self.samples_seen,
            correct_predictions: self.correct_predictions,
            confidence_history: self.confidence_history.iter().copied().collect(),
        }
    }

    /// Replace model state with a snapshot. The recent-decisions log is not
    /// part of a snapshot and starts empty.
    pub fn restore(&mut self, snapshot: StudentSnapshot) {
        self.model = snapshot.classifier;
        self.samples_seen = snapshot.samples_seen;
        self.correct_predictions = snapshot.correct_predictions;
        let window = self.config.confidence_window;
        let skip = snapshot.confidence_history.len().saturating_sub(window);
        self.confidence_history = snapshot.confidence_history.into_iter().skip(skip).collect();
        self.recent_decisions.clear();
    }

    /// Write a snapshot to `path`.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        std::fs::write(path, self.snapshot().to_bytes()?)?;
        Ok(())
    }

    /// Load a snapshot from `path`. Returns `false` when the file is missing
    /// or unreadable, leaving the current state untouched.
    pub fn load(&mut self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        let snapshot = std::fs::read(path)
            .map_err(StoreError::from)
            .and_then(|bytes| StudentSnapshot::from_bytes(&bytes));
        match snapshot {
            Ok(snapshot) => {
                self.restore(snapshot);
                true
            }
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "failed to load student snapshot");
                false
            }
        }
    }

    fn raw_predict(&self, transaction: &Transaction) -> Option<(Action, f64)> {
        if transaction.validate().is_err() {
            return None;
        }
        let features = features::extract(transaction);
        let (action, confidence) = self.model.predict_one(&features)?;
        if !confidence.is_finite() {
            tracing::warn!(transaction_id = %transaction.id, "student produced non-finite confidence");
            return None;
        }
        Some((action, confidence.clamp(0.0, 1.0)))
    }
}

#[async_trait::async_trait]
impl DecisionSource for OnlineLearner {
    fn agent_source(&self) -> AgentSource {
        AgentSource::Student
    }

    async fn propose(&mut self, input: ProposalInput<'_>) -> Option<Decision> {
        match input {
            ProposalInput::Event(transaction) => self.make_decision(transaction),
            ProposalInput::Batch(_) => None,
        }
    }
}

fn push_bounded<T>(window: &mut VecDeque<T>, value: T, capacity: usize) {
    while window.len() >= capacity.max(1) {
        window.pop_front();
    }
    window.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{PaymentMethod, ERROR_FRAUD_SUSPECTED, ERROR_TIMEOUT};

    fn config(threshold: f64, warmup: u64) -> StudentConfig {
        StudentConfig {
            confidence_threshold: threshold,
            min_warmup_samples: warmup,
            ..StudentConfig::default()
        }
    }

    fn teacher(action: Action) -> Decision {
        Decision::new(action, "council label", 0.85, AgentSource::Teacher)
    }

    fn timeout(amount: f64) -> Transaction {
        Transaction::failed(amount, "HDFC", PaymentMethod::Upi, ERROR_TIMEOUT, 3000)
    }

    #[test]
    fn untrained_learner_returns_no_action() {
        let mut learner = OnlineLearner::new(StudentConfig::default());
        assert_eq!(learner.predict(&timeout(100.0)), (Action::NoAction, 0.0));
        let (confident, action, confidence) = learner.is_confident(&timeout(100.0));
        assert!(!confident);
        assert_eq!(action, Action::NoAction);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn warmup_floor_blocks_confident_model() {
        let mut learner = OnlineLearner::new(config(0.9, 20));
        for step in 0..19 {
            learner
                .learn(&timeout(100.0 + step as f64), &teacher(Action::SwitchGateway))
                .unwrap();
        }

        // A single-class model is fully certain, but the floor is not met.
        let (confident, action, confidence) = learner.is_confident(&timeout(110.0));
        assert_eq!(action, Action::SwitchGateway);
        assert!(confidence >= 0.9);
        assert!(!confident);

        learner
            .learn(&timeout(120.0), &teacher(Action::SwitchGateway))
            .unwrap();
        let (confident, _, _) = learner.is_confident(&timeout(110.0));
        assert!(confident);
    }

    #[test]
    fn learn_tallies_prior_agreement() {
        let mut learner = OnlineLearner::new(StudentConfig::default());
        learner
            .learn(&timeout(100.0), &teacher(Action::SwitchGateway))
            .unwrap();
        // First call predicted NoAction against a SwitchGateway label.
        assert_eq!(learner.correct_predictions(), 0);

        learner
            .learn(&timeout(105.0), &teacher(Action::SwitchGateway))
            .unwrap();
        assert_eq!(learner.correct_predictions(), 1);
        assert_eq!(learner.samples_seen(), 2);
        assert!((learner.accuracy() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn untrained_no_action_label_counts_as_correct() {
        let mut learner = OnlineLearner::new(StudentConfig::default());
        learner.learn(&timeout(100.0), &teacher(Action::NoAction)).unwrap();
        assert_eq!(learner.correct_predictions(), 1);
    }

    #[test]
    fn predict_and_stats_do_not_touch_counters() {
        let mut learner = OnlineLearner::new(StudentConfig::default());
        learner
            .learn(&timeout(100.0), &teacher(Action::IncreaseRetry))
            .unwrap();
        let before = (learner.samples_seen(), learner.correct_predictions());

        for _ in 0..10 {
            learner.predict(&timeout(200.0));
            learner.get_stats();
            learner.is_confident(&timeout(300.0));
        }

        assert_eq!(before, (learner.samples_seen(), learner.correct_predictions()));
    }

    #[test]
    fn windows_stay_bounded() {
        let student_config = StudentConfig {
            confidence_window: 4,
            recent_decisions_window: 3,
            ..StudentConfig::default()
        };
        let mut learner = OnlineLearner::new(student_config);
        for step in 0..25 {
            learner
                .learn(&timeout(100.0 + step as f64), &teacher(Action::ReduceLoad))
                .unwrap();
        }

        assert_eq!(learner.snapshot().confidence_history.len(), 4);
        let stats = learner.get_stats();
        assert_eq!(stats.recent_decisions.len(), 3);
        assert_eq!(stats.samples_seen, 25);
        assert!(stats.is_ready);
    }

    #[test]
    fn stats_expose_last_five_decisions() {
        let mut learner = OnlineLearner::new(StudentConfig::default());
        let transactions: Vec<Transaction> = (0..8).map(|step| timeout(100.0 + step as f64)).collect();
        for transaction in &transactions {
            learner
                .learn(transaction, &teacher(Action::IncreaseRetry))
                .unwrap();
        }

        let stats = learner.get_stats();
        assert_eq!(stats.recent_decisions.len(), 5);
        assert_eq!(
            stats.recent_decisions.last().map(|record| record.transaction_id.as_str()),
            Some(transactions[7].id.as_str())
        );
    }

    #[test]
    fn malformed_transaction_is_rejected_by_learn() {
        let mut learner = OnlineLearner::new(StudentConfig::default());
        let mut bad = timeout(100.0);
        bad.amount = -5.0;

        assert!(learner.learn(&bad, &teacher(Action::NoAction)).is_err());
        assert_eq!(learner.samples_seen(), 0);
        // predict absorbs the same input into the untrained response.
        assert_eq!(learner.predict(&bad), (Action::NoAction, 0.0));
    }

    #[test]
    fn extreme_amount_does_not_break_model_or_snapshot() {
        let mut learner = OnlineLearner::new(config(0.9, 5));
        for step in 0..5 {
            learner
                .learn(&timeout(100.0 + step as f64), &teacher(Action::SwitchGateway))
                .unwrap();
        }
        let before = learner.predict(&timeout(102.0));
        assert_eq!(before.0, Action::SwitchGateway);

        let extreme = timeout(1e160);
        assert!(matches!(
            learner.learn(&extreme, &teacher(Action::BlockMerchant)),
            Err(EventError::AmountOutOfRange { .. })
        ));
        assert_eq!(learner.samples_seen(), 5);

        for step in 0..50 {
            learner
                .learn(&timeout(100.0 + step as f64), &teacher(Action::SwitchGateway))
                .unwrap();
        }
        let (confident, action, confidence) = learner.is_confident(&timeout(102.0));
        assert!(confident);
        assert_eq!(action, Action::SwitchGateway);
        assert!(confidence >= 0.9);

        let bytes = learner.snapshot().to_bytes().unwrap();
        let mut restored = OnlineLearner::from_snapshot(
            StudentConfig::default(),
            StudentSnapshot::from_bytes(&bytes).unwrap(),
        );
        assert_eq!(restored.predict(&timeout(102.0)), learner.predict(&timeout(102.0)));
    }

    #[test]
    fn decide_reports_gate_confidence_when_abstaining() {
        let mut learner = OnlineLearner::new(config(0.9, 20));
        assert_eq!(learner.decide(&timeout(100.0)), (None, 0.0));

        learner.learn(&timeout(100.0), &teacher(Action::ReduceLoad)).unwrap();
        let (decision, confidence) = learner.decide(&timeout(100.0));
        // Fully certain, but below the warm-up floor.
        assert!(decision.is_none());
        assert!((confidence - 1.0).abs() < 1e-12);
    }

    #[test]
    fn snapshot_roundtrip_preserves_predictions() {
        let mut learner = OnlineLearner::new(StudentConfig::default());
        for step in 0..15 {
            let amount = 100.0 + step as f64 * 10.0;
            learner.learn(&timeout(amount), &teacher(Action::SwitchGateway)).unwrap();
            let fraud = Transaction::failed(
                amount * 50.0,
                "Axis",
                PaymentMethod::CreditCard,
                ERROR_FRAUD_SUSPECTED,
                800,
            );
            learner.learn(&fraud, &teacher(Action::BlockMerchant)).unwrap();
        }

        let bytes = learner.snapshot().to_bytes().unwrap();
        let mut restored = OnlineLearner::from_snapshot(
            StudentConfig::default(),
            StudentSnapshot::from_bytes(&bytes).unwrap(),
        );

        assert_eq!(restored.samples_seen(), learner.samples_seen());
        assert_eq!(restored.correct_predictions(), learner.correct_predictions());

        let samples = [
            timeout(175.0),
            Transaction::failed(9000.0, "Axis", PaymentMethod::CreditCard, ERROR_FRAUD_SUSPECTED, 700),
            Transaction::failed(42.0, "BOB", PaymentMethod::Wallet, "E003_BANK_DECLINED", 2500),
        ];
        for sample in &samples {
            assert_eq!(learner.predict(sample), restored.predict(sample));
        }
    }

    #[test]
    fn save_and_load_file() {
        let path = std::env::temp_dir().join(format!(
            "payops_test_student_{}.json",
            uuid::Uuid::new_v4()
        ));
        let mut learner = OnlineLearner::new(StudentConfig::default());
        learner.learn(&timeout(100.0), &teacher(Action::ReduceLoad)).unwrap();
        learner.save(&path).unwrap();

        let mut restored = OnlineLearner::new(StudentConfig::default());
        assert!(restored.load(&path));
        assert_eq!(restored.samples_seen(), 1);

        let missing = path.with_extension("missing");
        assert!(!restored.load(&missing));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn proposes_only_for_single_events() {
        let mut learner = OnlineLearner::new(config(0.5, 1));
        learner.learn(&timeout(100.0), &teacher(Action::IncreaseRetry)).unwrap();

        let transaction = timeout(100.0);
        let decision = learner
            .propose(ProposalInput::Event(&transaction))
            .await
            .unwrap();
        assert_eq!(decision.agent_source, AgentSource::Student);
        assert_eq!(decision.action, Action::IncreaseRetry);

        let batch = vec![timeout(100.0)];
        assert!(learner.propose(ProposalInput::Batch(&batch)).await.is_none());
    }
}
