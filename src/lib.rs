//! Payment-failure remediation with a fast online student and a slow council.
//!
//! Failed transactions are routed to a confidence-gated [`OnlineLearner`].
//! When it is unsure, failures accumulate in an escalation buffer until a
//! [`Council`] deliberates over the batch; its decision labels every buffered
//! failure so the student takes over a growing share of the traffic.

pub mod config;
pub mod council;
pub mod decision;
pub mod error;
pub mod router;
pub mod simulator;
pub mod store;
pub mod student;
pub mod transaction;

pub use config::Config;
pub use council::{build_council, Council, LlmCouncil, MockCouncil};
pub use decision::{
    Action, AgentArgument, AgentSource, CouncilDebate, Decision, DecisionSource, ProposalInput,
    Stance,
};
pub use error::{Error, Result};
pub use router::{spawn_router_loop, RouteOutcome, Router, RouterEvent, RouterHandle, SystemMetrics};
pub use simulator::TransactionSimulator;
pub use store::PayopsStore;
pub use student::{OnlineLearner, StudentSnapshot, StudentStats};
pub use transaction::{PaymentMethod, Transaction, TransactionStatus};
