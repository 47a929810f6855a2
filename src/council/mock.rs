//! Backend-free council for local runs and tests.

use super::prompt::Role;
use super::Council;
use crate::decision::{Action, AgentArgument, AgentSource, CouncilDebate, Decision, Stance};
use crate::transaction::Transaction;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Council that fabricates a plausible debate without calling any backend.
///
/// By default the final action is drawn at random with confidence in
/// [0.6, 0.95]. `MockCouncil::fixed` always answers with the same action,
/// which keeps routing tests deterministic.
pub struct MockCouncil {
    rng: Mutex<StdRng>,
    fixed: Option<(Action, f64)>,
    debates_held: AtomicU64,
}

impl MockCouncil {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
            fixed: None,
            debates_held: AtomicU64::new(0),
        }
    }

    /// Always decide `action` with `confidence`.
    pub fn fixed(action: Action, confidence: f64) -> Self {
        Self {
            fixed: Some((action, confidence)),
            ..Self::new(Some(0))
        }
    }

    pub fn debates_held(&self) -> u64 {
        self.debates_held.load(Ordering::Relaxed)
    }

    fn draw(&self) -> (Action, f64, u64) {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let duration_ms = rng.gen_range(500..=2000);
        if let Some((action, confidence)) = self.fixed {
            return (action, confidence, duration_ms);
        }
        let action = Action::ALL
            .choose(&mut *rng)
            .copied()
            .unwrap_or(Action::NoAction);
        (action, rng.gen_range(0.6..=0.95), duration_ms)
    }
}

#[async_trait::async_trait]
impl Council for MockCouncil {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn debate(&self, failed_transactions: &[Transaction]) -> CouncilDebate {
        let (action, confidence, duration_ms) = self.draw();
        self.debates_held.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            failed = failed_transactions.len(),
            %action,
            confidence,
            "mock council reached decision"
        );

        CouncilDebate {
            risk_argument: AgentArgument {
                agent_name: Role::Risk.agent_name().into(),
                stance: Stance::Conservative,
                argument: "High failure rate detected. Recommend blocking to prevent fraud."
                    .into(),
                suggested_action: Action::BlockMerchant,
            },
            growth_argument: AgentArgument {
                agent_name: Role::Growth.agent_name().into(),
                stance: Stance::Aggressive,
                argument: "Revenue at risk. Retry these transactions immediately.".into(),
                suggested_action: Action::IncreaseRetry,
            },
            manager_synthesis:
                "Balanced approach: recover revenue while monitoring for fraud.".into(),
            final_decision: Decision::new(
                action,
                "Synthesized decision based on risk-reward analysis",
                confidence,
                AgentSource::Teacher,
            ),
            debate_duration_ms: duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{PaymentMethod, ERROR_TIMEOUT};

    fn batch() -> Vec<Transaction> {
        vec![Transaction::failed(
            300.0,
            "PNB",
            PaymentMethod::NetBanking,
            ERROR_TIMEOUT,
            4200,
        )]
    }

    #[tokio::test]
    async fn random_debates_stay_in_range() {
        let council = MockCouncil::new(Some(7));
        for _ in 0..50 {
            let debate = council.debate(&batch()).await;
            let confidence = debate.final_decision.confidence_score;
            assert!((0.6..=0.95).contains(&confidence));
            assert!((500..=2000).contains(&debate.debate_duration_ms));
            assert_eq!(debate.final_decision.agent_source, AgentSource::Teacher);
        }
        assert_eq!(council.debates_held(), 50);
    }

    #[tokio::test]
    async fn seeded_councils_agree() {
        let first = MockCouncil::new(Some(42));
        let second = MockCouncil::new(Some(42));
        for _ in 0..10 {
            let a = first.debate(&batch()).await;
            let b = second.debate(&batch()).await;
            assert_eq!(a.final_decision.action, b.final_decision.action);
            assert_eq!(a.final_decision.confidence_score, b.final_decision.confidence_score);
        }
    }

    #[tokio::test]
    async fn fixed_council_always_answers_the_same() {
        let council = MockCouncil::fixed(Action::SwitchGateway, 0.8);
        for _ in 0..5 {
            let debate = council.debate(&batch()).await;
            assert_eq!(debate.final_decision.action, Action::SwitchGateway);
            assert_eq!(debate.final_decision.confidence_score, 0.8);
        }
    }
}
