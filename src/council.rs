//! The teacher: a three-seat council that deliberates over buffered failures.
//!
//! The council is slow and never abstains. Every deliberation returns a full
//! [`CouncilDebate`] even when some or all of its seats fail, so the router can
//! always label the batch and move on.

pub mod backend;
mod deliberation;
mod mock;
pub mod prompt;

pub use backend::{ChatCompletionsBackend, ReasoningBackend};
pub use deliberation::{fallback_argument, neutral_debate, LlmCouncil, NEUTRAL_CONFIDENCE};
pub use mock::MockCouncil;
pub use prompt::{BatchSummary, Role, RolePrompts};

use crate::config::CouncilConfig;
use crate::decision::{AgentSource, CouncilDebate, Decision, DecisionSource, ProposalInput};
use crate::transaction::Transaction;

use std::sync::Arc;

/// Anything that can deliberate over a batch of failures.
#[async_trait::async_trait]
pub trait Council: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Deliberate over `failed_transactions`. Infallible: failures inside the
    /// deliberation are absorbed into neutral fallbacks.
    async fn debate(&self, failed_transactions: &[Transaction]) -> CouncilDebate;
}

/// Build the council described by `config`.
///
/// Falls back to [`MockCouncil`] when a mock is requested or when the chat
/// backend cannot be constructed (usually a missing API key).
pub fn build_council(config: &CouncilConfig) -> Arc<dyn Council> {
    if config.use_mock {
        tracing::info!("using mock council");
        return Arc::new(MockCouncil::new(config.mock_seed));
    }

    match ChatCompletionsBackend::new(config) {
        Ok(backend) => {
            tracing::info!(model = %config.model, "using llm council");
            Arc::new(LlmCouncil::new(
                Arc::new(backend),
                config.prompts.clone(),
                config.context_limit,
            ))
        }
        Err(error) => {
            tracing::warn!(%error, "llm council unavailable, falling back to mock council");
            Arc::new(MockCouncil::new(config.mock_seed))
        }
    }
}

#[async_trait::async_trait]
impl DecisionSource for Arc<dyn Council> {
    fn agent_source(&self) -> AgentSource {
        AgentSource::Teacher
    }

    async fn propose(&mut self, input: ProposalInput<'_>) -> Option<Decision> {
        let debate = match input {
            ProposalInput::Batch(batch) => self.debate(batch).await,
            ProposalInput::Event(transaction) => {
                self.debate(std::slice::from_ref(transaction)).await
            }
        };
        Some(debate.final_decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Action;
    use crate::transaction::{PaymentMethod, ERROR_TIMEOUT};

    #[test]
    fn missing_key_falls_back_to_mock() {
        let config = CouncilConfig {
            use_mock: false,
            api_key: None,
            ..CouncilConfig::default()
        };
        assert_eq!(build_council(&config).name(), "mock");
    }

    #[test]
    fn key_present_builds_llm_council() {
        let config = CouncilConfig {
            use_mock: false,
            api_key: Some("test-key".into()),
            ..CouncilConfig::default()
        };
        assert_eq!(build_council(&config).name(), "llm");
    }

    #[tokio::test]
    async fn council_never_abstains() {
        let mut council: Arc<dyn Council> = Arc::new(MockCouncil::fixed(Action::ReduceLoad, 0.7));
        let batch = vec![Transaction::failed(
            900.0,
            "Yes Bank",
            PaymentMethod::DebitCard,
            ERROR_TIMEOUT,
            2600,
        )];

        let decision = council.propose(ProposalInput::Batch(&batch)).await.unwrap();
        assert_eq!(decision.agent_source, AgentSource::Teacher);
        assert_eq!(decision.action, Action::ReduceLoad);
        assert_eq!(council.agent_source(), AgentSource::Teacher);
    }
}
