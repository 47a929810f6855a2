//! Decisions, deliberation artifacts, and the shared decision-source seam.

use crate::transaction::Transaction;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Remediation the system can take in response to failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    SwitchGateway,
    IncreaseRetry,
    BlockMerchant,
    ReduceLoad,
    NoAction,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Self::SwitchGateway,
        Self::IncreaseRetry,
        Self::BlockMerchant,
        Self::ReduceLoad,
        Self::NoAction,
    ];

    /// Dense class index used by the classifier.
    pub fn index(&self) -> usize {
        match self {
            Self::SwitchGateway => 0,
            Self::IncreaseRetry => 1,
            Self::BlockMerchant => 2,
            Self::ReduceLoad => 3,
            Self::NoAction => 4,
        }
    }

    /// Inverse of `index`; out-of-range indices map to `NoAction`.
    pub fn from_index(index: usize) -> Self {
        Self::ALL.get(index).copied().unwrap_or(Self::NoAction)
    }

    /// Parse from a string, defaulting to NoAction.
    pub fn from_str_lossy(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "switch_gateway" => Self::SwitchGateway,
            "increase_retry" => Self::IncreaseRetry,
            "block_merchant" => Self::BlockMerchant,
            "reduce_load" => Self::ReduceLoad,
            _ => Self::NoAction,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SwitchGateway => "switch_gateway",
            Self::IncreaseRetry => "increase_retry",
            Self::BlockMerchant => "block_merchant",
            Self::ReduceLoad => "reduce_load",
            Self::NoAction => "no_action",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Source and stance
// ---------------------------------------------------------------------------

/// Which decision-maker produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSource {
    Student,
    Teacher,
}

impl std::fmt::Display for AgentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Student => write!(f, "student"),
            Self::Teacher => write!(f, "teacher"),
        }
    }
}

/// Posture a council role takes in its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Conservative,
    Moderate,
    Aggressive,
}

impl Stance {
    /// Parse from a string, defaulting to Moderate.
    pub fn from_str_lossy(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "conservative" => Self::Conservative,
            "aggressive" => Self::Aggressive,
            _ => Self::Moderate,
        }
    }
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Moderate => write!(f, "moderate"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// A remediation decision from either the student or the teacher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reasoning: String,
    /// Self-reported confidence, clamped to [0.0, 1.0].
    pub confidence_score: f64,
    pub agent_source: AgentSource,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn new(
        action: Action,
        reasoning: impl Into<String>,
        confidence_score: f64,
        agent_source: AgentSource,
    ) -> Self {
        let confidence_score = if confidence_score.is_finite() {
            confidence_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            action,
            reasoning: reasoning.into(),
            confidence_score,
            agent_source,
            timestamp: Utc::now(),
        }
    }
}

/// One council role's contribution to a deliberation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentArgument {
    pub agent_name: String,
    pub stance: Stance,
    pub argument: String,
    pub suggested_action: Action,
}

/// Full record of one council deliberation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilDebate {
    pub risk_argument: AgentArgument,
    pub growth_argument: AgentArgument,
    pub manager_synthesis: String,
    pub final_decision: Decision,
    pub debate_duration_ms: u64,
}

// ---------------------------------------------------------------------------
// DecisionSource
// ---------------------------------------------------------------------------

/// What a decision source is asked to decide on.
#[derive(Debug, Clone, Copy)]
pub enum ProposalInput<'a> {
    /// A single failure, answered inline by the student.
    Event(&'a Transaction),
    /// A buffered batch of failures, answered by the council.
    Batch(&'a [Transaction]),
}

/// A "brain" that can propose a decision.
///
/// The student answers single events and abstains below its confidence gate;
/// the council answers batches and never abstains.
#[async_trait::async_trait]
pub trait DecisionSource: Send {
    /// The tag stamped on every decision this source produces.
    fn agent_source(&self) -> AgentSource;

    /// Propose a decision, or `None` to abstain.
    async fn propose(&mut self, input: ProposalInput<'_>) -> Option<Decision>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_index_roundtrips() {
        for action in Action::ALL {
            assert_eq!(Action::from_index(action.index()), action);
        }
        assert_eq!(Action::from_index(99), Action::NoAction);
    }

    #[test]
    fn action_parses_lossy() {
        assert_eq!(Action::from_str_lossy("block_merchant"), Action::BlockMerchant);
        assert_eq!(Action::from_str_lossy(" Switch_Gateway "), Action::SwitchGateway);
        assert_eq!(Action::from_str_lossy("launch_rockets"), Action::NoAction);
    }

    #[test]
    fn stance_defaults_to_moderate() {
        assert_eq!(Stance::from_str_lossy("AGGRESSIVE"), Stance::Aggressive);
        assert_eq!(Stance::from_str_lossy("panicked"), Stance::Moderate);
    }

    #[test]
    fn decision_confidence_is_clamped() {
        let high = Decision::new(Action::NoAction, "x", 1.7, AgentSource::Teacher);
        assert_eq!(high.confidence_score, 1.0);
        let low = Decision::new(Action::NoAction, "x", -0.2, AgentSource::Teacher);
        assert_eq!(low.confidence_score, 0.0);
        let nan = Decision::new(Action::NoAction, "x", f64::NAN, AgentSource::Teacher);
        assert_eq!(nan.confidence_score, 0.0);
    }
}
