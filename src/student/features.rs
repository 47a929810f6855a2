//! Numeric projection of a transaction for the online classifier.

use crate::transaction::{
    PaymentMethod, Transaction, ERROR_CODES, ERROR_FRAUD_SUSPECTED, ERROR_TIMEOUT,
};

/// Banks with a dedicated category code. Anything else shares the last code.
pub const BANKS: [&str; 8] = ["HDFC", "ICICI", "SBI", "Axis", "Kotak", "Yes Bank", "PNB", "BOB"];

/// Amounts strictly above this are flagged as high value.
const HIGH_VALUE_AMOUNT: f64 = 10_000.0;

pub const FEATURE_COUNT: usize = 9;

/// Feature names in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "amount",
    "amount_sqrt",
    "bank",
    "method",
    "error",
    "latency",
    "is_high_value",
    "is_timeout",
    "is_fraud_suspect",
];

/// Derived, never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .map(|index| self.0[index])
    }
}

/// Project a transaction into feature space.
///
/// The transaction must already satisfy `Transaction::validate`.
pub fn extract(transaction: &Transaction) -> FeatureVector {
    let amount = transaction.amount;
    let error_code = transaction.error_code.as_deref();

    FeatureVector([
        amount,
        amount.max(1.0).sqrt(),
        bank_code(&transaction.bank_name),
        method_code(transaction.payment_method),
        error_code.map(error_code_index).unwrap_or(-1.0),
        transaction.latency_ms as f64,
        flag(amount > HIGH_VALUE_AMOUNT),
        flag(error_code == Some(ERROR_TIMEOUT)),
        flag(error_code == Some(ERROR_FRAUD_SUSPECTED)),
    ])
}

fn bank_code(bank_name: &str) -> f64 {
    BANKS
        .iter()
        .position(|bank| *bank == bank_name)
        .unwrap_or(BANKS.len() - 1) as f64
}

fn method_code(method: PaymentMethod) -> f64 {
    PaymentMethod::ALL
        .iter()
        .position(|candidate| *candidate == method)
        .unwrap_or(PaymentMethod::ALL.len() - 1) as f64
}

fn error_code_index(code: &str) -> f64 {
    ERROR_CODES
        .iter()
        .position(|candidate| *candidate == code)
        .unwrap_or(ERROR_CODES.len() - 1) as f64
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_on_known_bank() {
        let txn = Transaction::failed(400.0, "ICICI", PaymentMethod::Upi, ERROR_TIMEOUT, 1200);
        let features = extract(&txn);

        assert_eq!(features.get("amount"), Some(400.0));
        assert_eq!(features.get("amount_sqrt"), Some(20.0));
        assert_eq!(features.get("bank"), Some(1.0));
        assert_eq!(features.get("method"), Some(2.0));
        assert_eq!(features.get("error"), Some(0.0));
        assert_eq!(features.get("latency"), Some(1200.0));
        assert_eq!(features.get("is_timeout"), Some(1.0));
        assert_eq!(features.get("is_fraud_suspect"), Some(0.0));
        assert_eq!(features.get("is_high_value"), Some(0.0));
    }

    #[test]
    fn unknown_categories_fall_back_to_last_code() {
        let txn = Transaction::failed(
            25_000.0,
            "Unknown Bank",
            PaymentMethod::Wallet,
            "E999_MYSTERY",
            600,
        );
        let features = extract(&txn);

        assert_eq!(features.get("bank"), Some(7.0));
        assert_eq!(features.get("method"), Some(4.0));
        assert_eq!(features.get("error"), Some(5.0));
        assert_eq!(features.get("is_high_value"), Some(1.0));
    }

    #[test]
    fn success_has_no_error_code() {
        let txn = Transaction::succeeded(0.5, "SBI", PaymentMethod::CreditCard, 80);
        let features = extract(&txn);

        assert_eq!(features.get("error"), Some(-1.0));
        // sqrt is floored at 1 for sub-unit amounts.
        assert_eq!(features.get("amount_sqrt"), Some(1.0));
    }
}
