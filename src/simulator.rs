//! Synthetic transaction source with per-bank chaos injection.

use crate::config::SimulatorConfig;
use crate::error::{Error, Result};
use crate::student::features::BANKS;
use crate::transaction::{PaymentMethod, Transaction, TransactionStatus, ERROR_CODES};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use std::collections::BTreeMap;

pub const MERCHANTS: [&str; 8] = [
    "Amazon", "Flipkart", "Swiggy", "Zomato", "Uber", "Ola", "BigBasket", "Myntra",
];

/// Share of transactions drawn from the small-amount band.
const SMALL_AMOUNT_SHARE: f64 = 0.7;

/// Generates random payment traffic. Chaos raises the failure rate of a
/// single bank so the router has a pattern to learn.
#[derive(Debug)]
pub struct TransactionSimulator {
    base_failure_rate: f64,
    chaos: BTreeMap<String, f64>,
    rng: StdRng,
}

impl TransactionSimulator {
    pub fn new(config: &SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            base_failure_rate: clamp_rate(config.base_failure_rate),
            chaos: BTreeMap::new(),
            rng,
        }
    }

    /// Force `bank_name` to fail at `failure_rate`, clamped to [0, 1].
    ///
    /// Only banks the simulator generates traffic for are accepted.
    pub fn inject_chaos(&mut self, bank_name: impl Into<String>, failure_rate: f64) -> Result<()> {
        let bank_name = bank_name.into();
        if !BANKS.contains(&bank_name.as_str()) {
            return Err(Error::UnknownBank {
                bank: bank_name,
                known: BANKS.join(", "),
            });
        }
        let failure_rate = clamp_rate(failure_rate);
        tracing::info!(bank = %bank_name, failure_rate, "chaos injected");
        self.chaos.insert(bank_name, failure_rate);
        Ok(())
    }

    /// Remove chaos from one bank, or from every bank when `None`.
    pub fn remove_chaos(&mut self, bank_name: Option<&str>) {
        match bank_name {
            Some(bank_name) => {
                self.chaos.remove(bank_name);
            }
            None => self.chaos.clear(),
        }
    }

    pub fn chaos_status(&self) -> &BTreeMap<String, f64> {
        &self.chaos
    }

    /// First bank under chaos, in name order.
    pub fn chaos_bank(&self) -> Option<&str> {
        self.chaos.keys().next().map(String::as_str)
    }

    pub fn failure_rate(&self, bank_name: &str) -> f64 {
        self.chaos
            .get(bank_name)
            .copied()
            .unwrap_or(self.base_failure_rate)
    }

    pub fn generate_transaction(&mut self) -> Transaction {
        let bank_name = pick(&mut self.rng, &BANKS);
        let failure_rate = self.failure_rate(bank_name);
        let failed = self.rng.gen_bool(failure_rate);
        let error_code = failed.then(|| pick(&mut self.rng, &ERROR_CODES).to_string());

        let amount = self.amount();
        let merchant_id = pick(&mut self.rng, &MERCHANTS);
        let payment_method = *PaymentMethod::ALL
            .choose(&mut self.rng)
            .unwrap_or(&PaymentMethod::Upi);
        let latency_ms = if failed {
            self.rng.gen_range(500..=5000)
        } else {
            self.rng.gen_range(50..=500)
        };

        Transaction::new(
            amount,
            merchant_id,
            bank_name,
            payment_method,
            if failed {
                TransactionStatus::Failed
            } else {
                TransactionStatus::Success
            },
            error_code,
            latency_ms,
        )
    }

    pub fn generate_batch(&mut self, size: usize) -> Vec<Transaction> {
        (0..size).map(|_| self.generate_transaction()).collect()
    }

    /// `count` transactions, or an endless stream when `None`.
    pub fn stream(&mut self, count: Option<usize>) -> impl Iterator<Item = Transaction> + '_ {
        let mut generated = 0usize;
        std::iter::from_fn(move || {
            if count.is_some_and(|count| generated >= count) {
                return None;
            }
            generated += 1;
            Some(self.generate_transaction())
        })
    }

    fn amount(&mut self) -> f64 {
        let raw = if self.rng.gen_bool(SMALL_AMOUNT_SHARE) {
            self.rng.gen_range(50.0..=2000.0)
        } else {
            self.rng.gen_range(2000.0..=50_000.0)
        };
        (raw * 100.0_f64).round() / 100.0
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

fn pick<'a>(rng: &mut StdRng, choices: &[&'a str]) -> &'a str {
    choices.choose(rng).copied().unwrap_or_default()
}
