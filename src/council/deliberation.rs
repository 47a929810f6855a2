//! Three-seat deliberation: risk, then growth, then the manager's synthesis.
//!
//! Each seat is called in sequence because the manager needs both arguments.
//! A seat that fails (backend down, garbage reply) is replaced by a neutral
//! fallback so the deliberation always yields a usable decision.

use super::backend::{parse_json_object, ReasoningBackend};
use super::prompt::{BatchSummary, Role, RolePrompts};
use super::Council;
use crate::decision::{Action, AgentArgument, AgentSource, CouncilDebate, Decision, Stance};
use crate::error::CouncilError;
use crate::transaction::Transaction;

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Confidence reported when the manager seat could not be heard.
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

const FALLBACK_ARGUMENT: &str = "Unable to analyze due to backend error";
const FALLBACK_SYNTHESIS: &str =
    "Unable to synthesize a decision due to backend error; holding current configuration";

/// Council backed by a reasoning backend.
pub struct LlmCouncil {
    backend: Arc<dyn ReasoningBackend>,
    prompts: RolePrompts,
    context_limit: usize,
}

/// What the manager seat returns.
#[derive(Debug, Clone, PartialEq)]
struct Synthesis {
    synthesis: String,
    final_action: Action,
    confidence: f64,
}

impl LlmCouncil {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        prompts: RolePrompts,
        context_limit: usize,
    ) -> Self {
        Self {
            backend,
            prompts,
            context_limit,
        }
    }

    async fn argue(&self, role: Role, context: &str) -> AgentArgument {
        let reply = self
            .backend
            .complete(self.prompts.system_prompt(role), context)
            .await
            .and_then(|reply| parse_json_object(&reply));

        match reply {
            Ok(fields) => AgentArgument {
                agent_name: role.agent_name().into(),
                stance: fields
                    .get("stance")
                    .and_then(|value| value.as_str())
                    .map(Stance::from_str_lossy)
                    .unwrap_or(Stance::Moderate),
                argument: fields
                    .get("argument")
                    .and_then(|value| value.as_str())
                    .unwrap_or("No argument provided")
                    .to_string(),
                suggested_action: fields
                    .get("suggested_action")
                    .and_then(|value| value.as_str())
                    .map(Action::from_str_lossy)
                    .unwrap_or(Action::NoAction),
            },
            Err(error) => {
                tracing::warn!(%error, %role, backend = self.backend.name(), "council role call failed, using fallback");
                fallback_argument(role)
            }
        }
    }

    async fn synthesize(&self, system_prompt: &str, context: &str) -> Synthesis {
        match self.try_synthesize(system_prompt, context).await {
            Ok(synthesis) => synthesis,
            Err(error) => {
                tracing::warn!(%error, backend = self.backend.name(), "council manager call failed, using fallback");
                fallback_synthesis()
            }
        }
    }

    async fn try_synthesize(
        &self,
        system_prompt: &str,
        context: &str,
    ) -> Result<Synthesis, CouncilError> {
        let reply = self.backend.complete(system_prompt, context).await?;
        let fields = parse_json_object(&reply)?;

        let confidence = match fields.get("confidence") {
            None => NEUTRAL_CONFIDENCE,
            Some(value) => value
                .as_f64()
                .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
                .filter(|confidence: &f64| confidence.is_finite())
                .ok_or_else(|| {
                    CouncilError::Malformed(format!("unreadable confidence: {value}"))
                })?,
        };

        Ok(Synthesis {
            synthesis: fields
                .get("synthesis")
                .and_then(|value| value.as_str())
                .unwrap_or("No synthesis provided")
                .to_string(),
            final_action: fields
                .get("final_action")
                .and_then(|value| value.as_str())
                .map(Action::from_str_lossy)
                .unwrap_or(Action::NoAction),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

#[async_trait::async_trait]
impl Council for LlmCouncil {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn debate(&self, failed_transactions: &[Transaction]) -> CouncilDebate {
        let started = Instant::now();
        let summary = BatchSummary::from_transactions(failed_transactions, self.context_limit);
        let context = summary.render();

        let risk_argument = self.argue(Role::Risk, &context).await;
        let growth_argument = self.argue(Role::Growth, &context).await;

        let manager_prompt = self
            .prompts
            .manager_prompt(&risk_argument, &growth_argument, &summary);
        let synthesis = self.synthesize(&manager_prompt, &context).await;

        let final_decision = Decision::new(
            synthesis.final_action,
            synthesis.synthesis.clone(),
            synthesis.confidence,
            AgentSource::Teacher,
        );

        let debate = CouncilDebate {
            risk_argument,
            growth_argument,
            manager_synthesis: synthesis.synthesis,
            final_decision,
            debate_duration_ms: elapsed_ms(started.elapsed()),
        };

        tracing::info!(
            failed = failed_transactions.len(),
            action = %debate.final_decision.action,
            confidence = debate.final_decision.confidence_score,
            duration_ms = debate.debate_duration_ms,
            "council reached decision"
        );
        debate
    }
}

/// Neutral stand-in for a seat that could not be heard.
pub fn fallback_argument(role: Role) -> AgentArgument {
    AgentArgument {
        agent_name: role.agent_name().into(),
        stance: Stance::Moderate,
        argument: FALLBACK_ARGUMENT.into(),
        suggested_action: Action::NoAction,
    }
}

fn fallback_synthesis() -> Synthesis {
    Synthesis {
        synthesis: FALLBACK_SYNTHESIS.into(),
        final_action: Action::NoAction,
        confidence: NEUTRAL_CONFIDENCE,
    }
}

/// A complete debate made only of fallbacks, used when the whole
/// deliberation could not finish in time.
pub fn neutral_debate(elapsed: Duration) -> CouncilDebate {
    let synthesis = fallback_synthesis();
    CouncilDebate {
        risk_argument: fallback_argument(Role::Risk),
        growth_argument: fallback_argument(Role::Growth),
        manager_synthesis: synthesis.synthesis.clone(),
        final_decision: Decision::new(
            synthesis.final_action,
            synthesis.synthesis,
            synthesis.confidence,
            AgentSource::Teacher,
        ),
        debate_duration_ms: elapsed_ms(elapsed),
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
