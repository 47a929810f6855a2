//! Payment transactions: the events flowing into the router.

use crate::error::EventError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error code for a gateway or bank timeout.
pub const ERROR_TIMEOUT: &str = "E001_TIMEOUT";
/// Error code for an issuer-side fraud flag.
pub const ERROR_FRAUD_SUSPECTED: &str = "E005_FRAUD_SUSPECTED";

/// Largest amount the router accepts. Far above any real payment, and small
/// enough that squared deviations in the learner's running statistics stay
/// finite.
pub const MAX_AMOUNT: f64 = 1e12;

/// All error codes the simulator emits and the feature encoder knows.
pub const ERROR_CODES: [&str; 6] = [
    ERROR_TIMEOUT,
    "E002_INSUFFICIENT_FUNDS",
    "E003_BANK_DECLINED",
    "E004_NETWORK_ERROR",
    ERROR_FRAUD_SUSPECTED,
    "E006_LIMIT_EXCEEDED",
];

/// Outcome status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
    Pending,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// Payment instrument used for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    Upi,
    NetBanking,
    Wallet,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 5] = [
        Self::CreditCard,
        Self::DebitCard,
        Self::Upi,
        Self::NetBanking,
        Self::Wallet,
    ];

    /// Stable wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "credit_card",
            Self::DebitCard => "debit_card",
            Self::Upi => "upi",
            Self::NetBanking => "net_banking",
            Self::Wallet => "wallet",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single payment attempt. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub merchant_id: String,
    pub bank_name: String,
    pub payment_method: PaymentMethod,
    pub status: TransactionStatus,
    pub error_code: Option<String>,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Build a transaction with a fresh id and the current timestamp.
    pub fn new(
        amount: f64,
        merchant_id: impl Into<String>,
        bank_name: impl Into<String>,
        payment_method: PaymentMethod,
        status: TransactionStatus,
        error_code: Option<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            amount,
            currency: "INR".into(),
            merchant_id: merchant_id.into(),
            bank_name: bank_name.into(),
            payment_method,
            status,
            error_code,
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    /// Shorthand for a failed transaction with the given error code.
    pub fn failed(
        amount: f64,
        bank_name: impl Into<String>,
        payment_method: PaymentMethod,
        error_code: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self::new(
            amount,
            "test-merchant",
            bank_name,
            payment_method,
            TransactionStatus::Failed,
            Some(error_code.into()),
            latency_ms,
        )
    }

    /// Shorthand for a successful transaction.
    pub fn succeeded(
        amount: f64,
        bank_name: impl Into<String>,
        payment_method: PaymentMethod,
        latency_ms: u64,
    ) -> Self {
        Self::new(
            amount,
            "test-merchant",
            bank_name,
            payment_method,
            TransactionStatus::Success,
            None,
            latency_ms,
        )
    }

    pub fn is_failed(&self) -> bool {
        self.status == TransactionStatus::Failed
    }

    /// Check the structural contract the feature encoder relies on.
    pub fn validate(&self) -> Result<(), EventError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(EventError::InvalidAmount {
                id: self.id.clone(),
                amount: self.amount,
            });
        }
        if self.amount > MAX_AMOUNT {
            return Err(EventError::AmountOutOfRange {
                id: self.id.clone(),
                amount: self.amount,
                max: MAX_AMOUNT,
            });
        }
        if self.bank_name.trim().is_empty() {
            return Err(EventError::MissingBank {
                id: self.id.clone(),
            });
        }
        match (&self.status, &self.error_code) {
            (TransactionStatus::Failed, None) => Err(EventError::MissingErrorCode {
                id: self.id.clone(),
            }),
            (TransactionStatus::Success | TransactionStatus::Pending, Some(code)) => {
                Err(EventError::UnexpectedErrorCode {
                    id: self.id.clone(),
                    code: code.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_transaction_validates() {
        let txn = Transaction::failed(500.0, "HDFC", PaymentMethod::Upi, ERROR_TIMEOUT, 900);
        assert!(txn.validate().is_ok());
        assert!(txn.is_failed());
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let txn = Transaction::succeeded(0.0, "SBI", PaymentMethod::Wallet, 100);
        assert!(matches!(
            txn.validate(),
            Err(EventError::InvalidAmount { .. })
        ));

        let nan = Transaction::succeeded(f64::NAN, "SBI", PaymentMethod::Wallet, 100);
        assert!(matches!(
            nan.validate(),
            Err(EventError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn extreme_amount_is_rejected() {
        let txn = Transaction::failed(1e160, "HDFC", PaymentMethod::Upi, ERROR_TIMEOUT, 900);
        assert!(matches!(
            txn.validate(),
            Err(EventError::AmountOutOfRange { .. })
        ));

        let ceiling = Transaction::failed(MAX_AMOUNT, "HDFC", PaymentMethod::Upi, ERROR_TIMEOUT, 900);
        assert!(ceiling.validate().is_ok());
    }

    #[test]
    fn failed_without_error_code_is_rejected() {
        let mut txn = Transaction::failed(10.0, "PNB", PaymentMethod::Upi, ERROR_TIMEOUT, 10);
        txn.error_code = None;
        assert!(matches!(
            txn.validate(),
            Err(EventError::MissingErrorCode { .. })
        ));
    }

    #[test]
    fn success_with_error_code_is_rejected() {
        let mut txn = Transaction::succeeded(10.0, "PNB", PaymentMethod::Upi, 10);
        txn.error_code = Some("E003_BANK_DECLINED".into());
        assert!(matches!(
            txn.validate(),
            Err(EventError::UnexpectedErrorCode { .. })
        ));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
        let method = serde_json::to_string(&PaymentMethod::NetBanking).unwrap();
        assert_eq!(method, "\"net_banking\"");
    }
}
