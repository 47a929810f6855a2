//! Escalation buffer: failures the student could not handle, waiting for the
//! council.

use crate::transaction::Transaction;

/// Ordered, bounded collection of failed transactions.
///
/// Holds at most `threshold` entries; the router drains it the moment it
/// fills.
#[derive(Debug, Clone)]
pub struct EscalationBuffer {
    pending: Vec<Transaction>,
    threshold: usize,
}

impl EscalationBuffer {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            pending: Vec::with_capacity(threshold),
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Append a failure. Returns true when the buffer has reached the
    /// escalation threshold.
    pub fn push(&mut self, transaction: Transaction) -> bool {
        self.pending.push(transaction);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.threshold
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    /// Take every buffered failure in arrival order, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Transaction> {
        std::mem::replace(&mut self.pending, Vec::with_capacity(self.threshold))
    }
}
