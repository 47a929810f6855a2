//! Role identities, their fixed instructions, and the batch summary they see.
//!
//! Role text is configuration data: swapping backends or tuning a role's
//! personality never touches deliberation control flow.

use crate::decision::AgentArgument;
use crate::transaction::Transaction;

use serde::{Deserialize, Serialize};

use std::collections::HashMap;

/// A seat at the council.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Risk,
    Growth,
    Manager,
}

impl Role {
    pub fn agent_name(&self) -> &'static str {
        match self {
            Self::Risk => "Risk Agent",
            Self::Growth => "Growth Agent",
            Self::Manager => "Manager Agent",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Risk => write!(f, "risk"),
            Self::Growth => write!(f, "growth"),
            Self::Manager => write!(f, "manager"),
        }
    }
}

const ACTION_CHOICES: &str =
    "switch_gateway|increase_retry|block_merchant|reduce_load|no_action";

const RISK_PROMPT: &str = "You are the RISK AGENT in a payment operations council.
Your personality: Paranoid, security-focused, hates fraud.
Your priority: Protect the system from fraud and abuse at all costs.
You would rather block a legitimate transaction than let a fraudulent one through.

Analyze the failed transactions and argue for the most CONSERVATIVE action.
Consider: fraud patterns, unusual amounts, bank reliability, error patterns.

Respond in JSON format:
{
    \"stance\": \"conservative/moderate/aggressive\",
    \"argument\": \"Your reasoning in 2-3 sentences\",
    \"suggested_action\": \"{actions}\"
}";

const GROWTH_PROMPT: &str = "You are the GROWTH AGENT in a payment operations council.
Your personality: Revenue-obsessed, hates lost sales, aggressive optimizer.
Your priority: Maximize successful transactions and revenue recovery.
Every failed transaction is lost money that must be recovered.

Analyze the failed transactions and argue for the most AGGRESSIVE recovery action.
Consider: revenue impact, retry success probability, customer experience.

Respond in JSON format:
{
    \"stance\": \"conservative/moderate/aggressive\",
    \"argument\": \"Your reasoning in 2-3 sentences\",
    \"suggested_action\": \"{actions}\"
}";

const MANAGER_PROMPT: &str = "You are the MANAGER AGENT in a payment operations council.
You must synthesize the arguments from the Risk Agent and Growth Agent.
Make a balanced decision that optimizes for both security AND revenue.

Risk Agent's position:
{risk_argument}

Growth Agent's position:
{growth_argument}

Failed transaction context:
- Total failed: {failed_count}
- Common error: {common_error}
- Affected banks: {affected_banks}
- Total amount at risk: INR {total_amount}

Make the FINAL decision. Respond in JSON format:
{
    \"synthesis\": \"Your balanced reasoning in 2-3 sentences\",
    \"final_action\": \"{actions}\",
    \"confidence\": 0.0-1.0
}";

/// System instructions for each role.
///
/// The manager text is a template; `{risk_argument}`, `{growth_argument}`,
/// `{failed_count}`, `{common_error}`, `{affected_banks}` and `{total_amount}`
/// are filled in per deliberation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolePrompts {
    pub risk: String,
    pub growth: String,
    pub manager: String,
}

impl Default for RolePrompts {
    fn default() -> Self {
        Self {
            risk: RISK_PROMPT.replace("{actions}", ACTION_CHOICES),
            growth: GROWTH_PROMPT.replace("{actions}", ACTION_CHOICES),
            manager: MANAGER_PROMPT.replace("{actions}", ACTION_CHOICES),
        }
    }
}

impl RolePrompts {
    /// Raw system instruction for a seat. The manager's is still a template.
    pub fn system_prompt(&self, role: Role) -> &str {
        match role {
            Role::Risk => &self.risk,
            Role::Growth => &self.growth,
            Role::Manager => &self.manager,
        }
    }

    /// Manager instruction with both arguments and the batch summary filled in.
    pub fn manager_prompt(
        &self,
        risk: &AgentArgument,
        growth: &AgentArgument,
        summary: &BatchSummary,
    ) -> String {
        self.manager
            .replace(
                "{risk_argument}",
                &format!("{}: {}", risk.stance, risk.argument),
            )
            .replace(
                "{growth_argument}",
                &format!("{}: {}", growth.stance, growth.argument),
            )
            .replace("{failed_count}", &summary.failed_count.to_string())
            .replace("{common_error}", &summary.common_error)
            .replace("{affected_banks}", &summary.affected_banks.join(", "))
            .replace("{total_amount}", &format!("{:.2}", summary.total_amount))
    }
}

// ---------------------------------------------------------------------------
// Batch summary
// ---------------------------------------------------------------------------

/// One line of the per-transaction listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryLine {
    pub bank_name: String,
    pub amount: f64,
    pub error_code: Option<String>,
    pub payment_method: String,
}

/// What every role is told about the batch under deliberation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub failed_count: usize,
    pub total_amount: f64,
    /// Banks in order of first appearance.
    pub affected_banks: Vec<String>,
    /// Most frequent error code, or "Unknown" when none is present.
    pub common_error: String,
    /// At most `context_limit` transactions, in buffer order.
    pub lines: Vec<SummaryLine>,
}

impl BatchSummary {
    pub fn from_transactions(transactions: &[Transaction], context_limit: usize) -> Self {
        let total_amount = transactions.iter().map(|txn| txn.amount).sum();

        let mut affected_banks: Vec<String> = Vec::new();
        for txn in transactions {
            if !affected_banks.contains(&txn.bank_name) {
                affected_banks.push(txn.bank_name.clone());
            }
        }

        let lines = transactions
            .iter()
            .take(context_limit)
            .map(|txn| SummaryLine {
                bank_name: txn.bank_name.clone(),
                amount: txn.amount,
                error_code: txn.error_code.clone(),
                payment_method: txn.payment_method.to_string(),
            })
            .collect();

        Self {
            failed_count: transactions.len(),
            total_amount,
            affected_banks,
            common_error: dominant_error(transactions),
            lines,
        }
    }

    /// Render the user-turn context shared by all three roles.
    pub fn render(&self) -> String {
        if self.failed_count == 0 {
            return "No failed transactions to analyze.".into();
        }

        let mut parts = vec!["Failed Transaction Analysis:".to_string()];
        for (index, line) in self.lines.iter().enumerate() {
            parts.push(format!(
                "{}. Bank: {}, Amount: INR {:.2}, Error: {}, Method: {}",
                index + 1,
                line.bank_name,
                line.amount,
                line.error_code.as_deref().unwrap_or("none"),
                line.payment_method,
            ));
        }
        if self.failed_count > self.lines.len() {
            parts.push(format!(
                "  … and {} more",
                self.failed_count - self.lines.len()
            ));
        }

        parts.push(format!(
            "\nSummary: {} failures, INR {:.2} at risk, Banks: {}, Most common error: {}",
            self.failed_count,
            self.total_amount,
            self.affected_banks.join(", "),
            self.common_error,
        ));
        parts.join("\n")
    }
}

/// Highest count wins; ties go to the code seen first.
fn dominant_error(transactions: &[Transaction]) -> String {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, txn) in transactions.iter().enumerate() {
        if let Some(code) = txn.error_code.as_deref() {
            counts.entry(code).or_insert((0, position)).0 += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(code, _)| code.to_string())
        .unwrap_or_else(|| "Unknown".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{Action, Stance};
    use crate::transaction::{PaymentMethod, ERROR_TIMEOUT};

    fn batch() -> Vec<Transaction> {
        vec![
            Transaction::failed(100.0, "HDFC", PaymentMethod::Upi, "E004_NETWORK_ERROR", 900),
            Transaction::failed(250.5, "SBI", PaymentMethod::Wallet, ERROR_TIMEOUT, 4000),
            Transaction::failed(49.5, "HDFC", PaymentMethod::Upi, ERROR_TIMEOUT, 3100),
        ]
    }

    #[test]
    fn summary_aggregates_batch() {
        let summary = BatchSummary::from_transactions(&batch(), 10);
        assert_eq!(summary.failed_count, 3);
        assert!((summary.total_amount - 400.0).abs() < 1e-9);
        assert_eq!(summary.affected_banks, vec!["HDFC", "SBI"]);
        assert_eq!(summary.common_error, ERROR_TIMEOUT);
        assert_eq!(summary.lines.len(), 3);
    }

    #[test]
    fn dominant_error_ties_go_to_first_seen() {
        let transactions = vec![
            Transaction::failed(1.0, "HDFC", PaymentMethod::Upi, "E003_BANK_DECLINED", 1),
            Transaction::failed(1.0, "HDFC", PaymentMethod::Upi, ERROR_TIMEOUT, 1),
        ];
        assert_eq!(dominant_error(&transactions), "E003_BANK_DECLINED");
        assert_eq!(dominant_error(&[]), "Unknown");
    }

    #[test]
    fn summary_listing_respects_limit() {
        let summary = BatchSummary::from_transactions(&batch(), 2);
        assert_eq!(summary.lines.len(), 2);
        let rendered = summary.render();
        assert!(rendered.contains("and 1 more"));
        assert!(rendered.contains("3 failures"));
    }

    #[test]
    fn empty_batch_renders_placeholder() {
        let summary = BatchSummary::from_transactions(&[], 10);
        assert_eq!(summary.render(), "No failed transactions to analyze.");
    }

    #[test]
    fn manager_prompt_fills_every_placeholder() {
        let prompts = RolePrompts::default();
        let summary = BatchSummary::from_transactions(&batch(), 10);
        let risk = AgentArgument {
            agent_name: Role::Risk.agent_name().into(),
            stance: Stance::Conservative,
            argument: "block it".into(),
            suggested_action: Action::BlockMerchant,
        };
        let growth = AgentArgument {
            agent_name: Role::Growth.agent_name().into(),
            stance: Stance::Aggressive,
            argument: "retry it".into(),
            suggested_action: Action::IncreaseRetry,
        };

        let prompt = prompts.manager_prompt(&risk, &growth, &summary);
        assert!(prompt.contains("conservative: block it"));
        assert!(prompt.contains("aggressive: retry it"));
        assert!(prompt.contains("Total failed: 3"));
        assert!(prompt.contains("Affected banks: HDFC, SBI"));
        assert!(prompt.contains("INR 400.00"));
        assert!(!prompt.contains("{risk_argument}"));
    }

    #[test]
    fn advocate_prompts_list_every_action() {
        let prompts = RolePrompts::default();
        for action in Action::ALL {
            assert!(prompts.system_prompt(Role::Risk).contains(action.as_str()));
            assert!(prompts.system_prompt(Role::Growth).contains(action.as_str()));
        }
    }
}
