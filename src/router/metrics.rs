//! Live counters for the routing loop.

use crate::student::OnlineLearner;
use crate::transaction::{Transaction, TransactionStatus};

use serde::{Deserialize, Serialize};

/// Point-in-time view of the router, broadcast after every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub total_transactions: u64,
    pub successful_transactions: u64,
    pub failed_transactions: u64,
    /// Successful share of all transactions, in [0, 1].
    pub success_rate: f64,
    pub student_decisions: u64,
    pub teacher_decisions: u64,
    /// Confidence of the student's latest prediction on a failure.
    pub student_confidence: f64,
    pub student_accuracy: f64,
    pub student_samples_seen: u64,
    pub chaos_active: bool,
    pub chaos_bank: Option<String>,
}

impl SystemMetrics {
    pub(crate) fn record_transaction(&mut self, transaction: &Transaction) {
        self.total_transactions += 1;
        match transaction.status {
            TransactionStatus::Success => self.successful_transactions += 1,
            TransactionStatus::Failed => self.failed_transactions += 1,
            TransactionStatus::Pending => {}
        }
        self.success_rate = self.successful_transactions as f64 / self.total_transactions as f64;
    }

    pub(crate) fn refresh_student(&mut self, learner: &OnlineLearner) {
        self.student_accuracy = learner.accuracy();
        self.student_samples_seen = learner.samples_seen();
    }

    pub(crate) fn set_chaos(&mut self, bank: Option<String>) {
        self.chaos_active = bank.is_some();
        self.chaos_bank = bank;
    }

    /// Share of all decisions the student made on its own.
    pub fn student_share(&self) -> f64 {
        let total = self.student_decisions + self.teacher_decisions;
        if total == 0 {
            return 0.0;
        }
        self.student_decisions as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{PaymentMethod, ERROR_TIMEOUT};

    #[test]
    fn success_rate_tracks_outcomes() {
        let mut metrics = SystemMetrics::default();
        metrics.record_transaction(&Transaction::succeeded(10.0, "SBI", PaymentMethod::Upi, 80));
        metrics.record_transaction(&Transaction::succeeded(10.0, "SBI", PaymentMethod::Upi, 80));
        metrics.record_transaction(&Transaction::failed(
            10.0,
            "SBI",
            PaymentMethod::Upi,
            ERROR_TIMEOUT,
            900,
        ));
        metrics.record_transaction(&Transaction::failed(
            10.0,
            "SBI",
            PaymentMethod::Upi,
            ERROR_TIMEOUT,
            900,
        ));

        assert_eq!(metrics.total_transactions, 4);
        assert_eq!(metrics.failed_transactions, 2);
        assert!((metrics.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn chaos_flags_follow_bank() {
        let mut metrics = SystemMetrics::default();
        metrics.set_chaos(Some("HDFC".into()));
        assert!(metrics.chaos_active);
        metrics.set_chaos(None);
        assert!(!metrics.chaos_active);
        assert_eq!(metrics.chaos_bank, None);
    }

    #[test]
    fn student_share_handles_no_decisions() {
        let mut metrics = SystemMetrics::default();
        assert_eq!(metrics.student_share(), 0.0);
        metrics.student_decisions = 3;
        metrics.teacher_decisions = 1;
        assert!((metrics.student_share() - 0.75).abs() < f64::EPSILON);
    }
}
