//! Router: routes each transaction to the student or, in batches, the council.
//!
//! The router owns all mutable state (learner, buffer, metrics) and is driven
//! by a single task. Producers submit through a [`RouterHandle`]; observers
//! subscribe to the [`RouterEvent`] broadcast bus. Side outputs (events,
//! persistence) are fail-open: a missing subscriber or a failed write is
//! logged and never blocks routing.

use super::buffer::EscalationBuffer;
use super::metrics::SystemMetrics;
use crate::config::{Config, RouterConfig};
use crate::council::{neutral_debate, Council};
use crate::decision::{CouncilDebate, Decision};
use crate::error::{CouncilError, Error, Result};
use crate::store::PayopsStore;
use crate::student::{OnlineLearner, StudentStats};
use crate::transaction::Transaction;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};

use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Events and outcomes
// ---------------------------------------------------------------------------

/// Everything the router announces to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RouterEvent {
    Transaction(Transaction),
    Decision {
        decision: Decision,
        /// The failure that triggered the decision.
        transaction_id: String,
    },
    CouncilDebate(CouncilDebate),
    Metrics(SystemMetrics),
}

/// What happened to one submitted transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Not a failure; counted and forgotten.
    Ignored,
    /// The student decided inline.
    Student(Decision),
    /// Buffered for the council; `pending` failures are now waiting.
    Buffered { pending: usize },
    /// This failure filled the buffer and the council ruled on the batch.
    Escalated(CouncilDebate),
}

/// Combined view returned by [`RouterHandle::status`].
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub metrics: SystemMetrics,
    pub student: StudentStats,
    pub buffered_failures: usize,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    config: RouterConfig,
    learner: OnlineLearner,
    council: Arc<dyn Council>,
    buffer: EscalationBuffer,
    metrics: SystemMetrics,
    store: Option<Arc<PayopsStore>>,
    event_tx: broadcast::Sender<RouterEvent>,
    deliberation_timeout: Duration,
    escalations: u64,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        learner: OnlineLearner,
        council: Arc<dyn Council>,
        deliberation_timeout: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_bus_capacity.max(1));
        let buffer = EscalationBuffer::new(config.failure_threshold);
        let mut metrics = SystemMetrics::default();
        metrics.refresh_student(&learner);
        Self {
            config,
            learner,
            council,
            buffer,
            metrics,
            store: None,
            event_tx,
            deliberation_timeout,
            escalations: 0,
        }
    }

    /// Router for a loaded configuration with a fresh learner.
    pub fn from_config(config: &Config, council: Arc<dyn Council>) -> Self {
        Self::new(
            config.router.clone(),
            OnlineLearner::new(config.student.clone()),
            council,
            Duration::from_secs(config.council.deliberation_timeout_secs),
        )
    }

    /// Persist decisions, metrics and snapshots to `store`.
    pub fn with_store(mut self, store: Arc<PayopsStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.event_tx.subscribe()
    }

    pub fn learner(&self) -> &OnlineLearner {
        &self.learner
    }

    pub fn metrics(&self) -> &SystemMetrics {
        &self.metrics
    }

    pub fn buffered_failures(&self) -> usize {
        self.buffer.len()
    }

    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            metrics: self.metrics.clone(),
            student: self.learner.get_stats(),
            buffered_failures: self.buffer.len(),
        }
    }

    /// Record which bank, if any, is currently under chaos.
    pub fn set_chaos(&mut self, bank: Option<String>) {
        self.metrics.set_chaos(bank);
        self.emit(RouterEvent::Metrics(self.metrics.clone()));
    }

    /// Route one transaction.
    ///
    /// Malformed transactions are rejected before any state changes. Every
    /// other outcome, including a council that failed or timed out, is `Ok`.
    pub async fn process_transaction(&mut self, transaction: Transaction) -> Result<RouteOutcome> {
        transaction.validate()?;

        self.metrics.record_transaction(&transaction);
        self.emit(RouterEvent::Transaction(transaction.clone()));

        if !transaction.is_failed() {
            self.emit_metrics();
            return Ok(RouteOutcome::Ignored);
        }

        let (proposal, confidence) = self.learner.decide(&transaction);
        self.metrics.student_confidence = confidence;

        if let Some(decision) = proposal {
            self.metrics.student_decisions += 1;
            tracing::debug!(
                transaction_id = %transaction.id,
                action = %decision.action,
                confidence = decision.confidence_score,
                "student decided inline"
            );
            self.emit(RouterEvent::Decision {
                decision: decision.clone(),
                transaction_id: transaction.id.clone(),
            });
            self.persist_decision(&decision, std::slice::from_ref(&transaction.id), None)
                .await;
            self.emit_metrics();
            return Ok(RouteOutcome::Student(decision));
        }

        let trigger_id = transaction.id.clone();
        if !self.buffer.push(transaction) {
            let pending = self.buffer.len();
            tracing::trace!(pending, threshold = self.buffer.threshold(), "failure buffered");
            self.emit_metrics();
            return Ok(RouteOutcome::Buffered { pending });
        }

        let debate = self.escalate(trigger_id).await;
        self.emit_metrics();
        Ok(RouteOutcome::Escalated(debate))
    }

    /// Hand the full buffer to the council, then train the student on every
    /// buffered failure with the council's single decision.
    async fn escalate(&mut self, trigger_id: String) -> CouncilDebate {
        let batch = self.buffer.drain();
        let started = Instant::now();

        let debate = match tokio::time::timeout(
            self.deliberation_timeout,
            self.council.debate(&batch),
        )
        .await
        {
            Ok(debate) => debate,
            Err(_) => {
                let error = CouncilError::Timeout(self.deliberation_timeout.as_secs());
                tracing::warn!(
                    %error,
                    council = self.council.name(),
                    batch = batch.len(),
                    "using neutral decision"
                );
                let mut debate = neutral_debate(started.elapsed());
                debate.manager_synthesis = format!("{error}. {}", debate.manager_synthesis);
                debate
            }
        };

        let decision = debate.final_decision.clone();
        self.metrics.teacher_decisions += 1;
        self.emit(RouterEvent::CouncilDebate(debate.clone()));
        self.emit(RouterEvent::Decision {
            decision: decision.clone(),
            transaction_id: trigger_id,
        });

        for transaction in &batch {
            if let Err(error) = self.learner.learn(transaction, &decision) {
                tracing::warn!(%error, "student rejected council label");
            }
        }
        self.metrics.refresh_student(&self.learner);
        self.escalations += 1;

        tracing::info!(
            batch = batch.len(),
            action = %decision.action,
            confidence = decision.confidence_score,
            samples_seen = self.learner.samples_seen(),
            "council decision applied"
        );

        let transaction_ids: Vec<String> = batch.iter().map(|txn| txn.id.clone()).collect();
        self.persist_decision(&decision, &transaction_ids, Some(&debate))
            .await;
        self.persist_progress().await;

        debate
    }

    async fn persist_decision(
        &self,
        decision: &Decision,
        transaction_ids: &[String],
        debate: Option<&CouncilDebate>,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(error) = store.log_decision(decision, transaction_ids, debate).await {
            tracing::warn!(%error, "failed to log decision");
        }
    }

    /// Metrics after every escalation, a snapshot every
    /// `snapshot_every_escalations`.
    async fn persist_progress(&self) {
        let Some(store) = &self.store else {
            return;
        };

        for (name, value) in [
            ("success_rate", self.metrics.success_rate),
            ("student_accuracy", self.metrics.student_accuracy),
            ("student_share", self.metrics.student_share()),
        ] {
            if let Err(error) = store.record_metric(name, value).await {
                tracing::warn!(%error, metric = name, "failed to record metric");
            }
        }

        let every = self.config.snapshot_every_escalations;
        if every > 0 && self.escalations % every == 0 {
            self.save_snapshot().await;
        }
    }

    /// Persist the learner now, then prune down to `snapshot_retention`.
    /// No-op without a store.
    pub async fn save_snapshot(&self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.save_snapshot(&self.learner.snapshot()).await {
            Ok(id) => tracing::debug!(id, samples_seen = self.learner.samples_seen(), "student snapshot saved"),
            Err(error) => {
                tracing::warn!(%error, "failed to save student snapshot");
                return;
            }
        }

        let keep = self.config.snapshot_retention;
        if keep == 0 {
            return;
        }
        match store.prune_snapshots(keep).await {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!(pruned, keep, "pruned old student snapshots"),
            Err(error) => tracing::warn!(%error, "failed to prune student snapshots"),
        }
    }

    fn emit_metrics(&self) {
        self.emit(RouterEvent::Metrics(self.metrics.clone()));
    }

    fn emit(&self, event: RouterEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("council", &self.council.name())
            .field("buffered_failures", &self.buffer.len())
            .field("samples_seen", &self.learner.samples_seen())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Loop and handle
// ---------------------------------------------------------------------------

enum RouterCommand {
    Submit(Transaction),
    SetChaos(Option<String>),
    Status(oneshot::Sender<RouterStatus>),
}

/// Cloneable producer side of the router loop.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    command_tx: mpsc::Sender<RouterCommand>,
    event_tx: broadcast::Sender<RouterEvent>,
}

impl RouterHandle {
    /// Queue a transaction for routing. Malformed transactions are rejected
    /// here, before they reach the loop.
    pub async fn submit(&self, transaction: Transaction) -> Result<()> {
        transaction.validate()?;
        self.send(RouterCommand::Submit(transaction)).await
    }

    pub async fn set_chaos(&self, bank: Option<String>) -> Result<()> {
        self.send(RouterCommand::SetChaos(bank)).await
    }

    /// Metrics and student stats as of every command queued before this one.
    pub async fn status(&self) -> Result<RouterStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RouterCommand::Status(reply_tx)).await?;
        reply_rx.await.map_err(|_| Error::RouterClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.event_tx.subscribe()
    }

    async fn send(&self, command: RouterCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::RouterClosed)
    }
}

/// Spawn the router as a background task.
///
/// The loop exits once every [`RouterHandle`] is dropped, saves a final
/// snapshot, and hands the router back through the join handle.
pub fn spawn_router_loop(router: Router) -> (RouterHandle, tokio::task::JoinHandle<Router>) {
    let (command_tx, command_rx) = mpsc::channel(router.config.inbound_capacity.max(1));
    let handle = RouterHandle {
        command_tx,
        event_tx: router.event_tx.clone(),
    };
    let task = tokio::spawn(run_router_loop(router, command_rx));
    (handle, task)
}

async fn run_router_loop(
    mut router: Router,
    mut command_rx: mpsc::Receiver<RouterCommand>,
) -> Router {
    tracing::info!(
        council = router.council.name(),
        threshold = router.buffer.threshold(),
        samples_seen = router.learner.samples_seen(),
        "router started"
    );

    while let Some(command) = command_rx.recv().await {
        match command {
            RouterCommand::Submit(transaction) => {
                if let Err(error) = router.process_transaction(transaction).await {
                    tracing::warn!(%error, "router rejected transaction");
                }
            }
            RouterCommand::SetChaos(bank) => router.set_chaos(bank),
            RouterCommand::Status(reply_tx) => {
                let _ = reply_tx.send(router.status());
            }
        }
    }

    router.save_snapshot().await;
    tracing::info!(
        total = router.metrics.total_transactions,
        student_decisions = router.metrics.student_decisions,
        teacher_decisions = router.metrics.teacher_decisions,
        "router stopped"
    );
    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StudentConfig;
    use crate::council::MockCouncil;
    use crate::decision::{Action, AgentSource};
    use crate::transaction::{PaymentMethod, ERROR_TIMEOUT};

    fn router(threshold: usize, council: Arc<dyn Council>) -> Router {
        Router::new(
            RouterConfig {
                failure_threshold: threshold,
                ..RouterConfig::default()
            },
            OnlineLearner::new(StudentConfig::default()),
            council,
            Duration::from_secs(5),
        )
    }

    fn failure(amount: f64) -> Transaction {
        Transaction::failed(amount, "HDFC", PaymentMethod::Upi, ERROR_TIMEOUT, 3500)
    }

    struct StalledCouncil;

    #[async_trait::async_trait]
    impl Council for StalledCouncil {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn debate(&self, _failed: &[Transaction]) -> CouncilDebate {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            neutral_debate(Duration::ZERO)
        }
    }

    #[tokio::test]
    async fn malformed_transaction_is_rejected_without_side_effects() {
        let mut router = router(5, Arc::new(MockCouncil::fixed(Action::NoAction, 0.8)));
        let mut bad = failure(100.0);
        bad.error_code = None;

        let result = router.process_transaction(bad).await;
        assert!(matches!(result, Err(Error::Event(_))));
        assert_eq!(router.metrics().total_transactions, 0);
        assert_eq!(router.buffered_failures(), 0);
    }

    #[tokio::test]
    async fn events_are_broadcast_in_order() {
        let mut router = router(1, Arc::new(MockCouncil::fixed(Action::ReduceLoad, 0.8)));
        let mut events = router.subscribe();

        router.process_transaction(failure(100.0)).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), RouterEvent::Transaction(_)));
        assert!(matches!(events.recv().await.unwrap(), RouterEvent::CouncilDebate(_)));
        match events.recv().await.unwrap() {
            RouterEvent::Decision { decision, .. } => {
                assert_eq!(decision.action, Action::ReduceLoad);
                assert_eq!(decision.agent_source, AgentSource::Teacher);
            }
            other => panic!("expected decision, got {other:?}"),
        }
        assert!(matches!(events.recv().await.unwrap(), RouterEvent::Metrics(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_council_times_out_to_neutral_decision() {
        let mut router = router(2, Arc::new(StalledCouncil));
        router.process_transaction(failure(100.0)).await.unwrap();
        let outcome = router.process_transaction(failure(200.0)).await.unwrap();

        let RouteOutcome::Escalated(debate) = outcome else {
            panic!("expected escalation, got {outcome:?}");
        };
        assert_eq!(debate.final_decision.action, Action::NoAction);
        assert!(debate
            .manager_synthesis
            .starts_with("council deliberation timed out after 5s"));
        assert_eq!(router.buffered_failures(), 0);
        assert_eq!(router.learner().samples_seen(), 2);
        assert_eq!(router.metrics().teacher_decisions, 1);
    }

    #[tokio::test]
    async fn student_confidence_tracks_latest_failure() {
        let mut router = router(1, Arc::new(MockCouncil::fixed(Action::ReduceLoad, 0.8)));
        router.process_transaction(failure(100.0)).await.unwrap();
        // Scored before the model had any label.
        assert_eq!(router.metrics().student_confidence, 0.0);

        router.process_transaction(failure(120.0)).await.unwrap();
        let (_, _, expected) = router.learner.is_confident(&failure(120.0));
        assert!(expected > 0.9);
        assert_eq!(router.metrics().student_confidence, expected);

        // A success is never scored and leaves the reading alone.
        router
            .process_transaction(Transaction::succeeded(50.0, "SBI", PaymentMethod::Upi, 80))
            .await
            .unwrap();
        assert_eq!(router.metrics().student_confidence, expected);
    }

    #[tokio::test]
    async fn chaos_is_reflected_in_metrics() {
        let mut router = router(5, Arc::new(MockCouncil::new(Some(1))));
        router.set_chaos(Some("Axis".into()));
        assert!(router.metrics().chaos_active);
        assert_eq!(router.metrics().chaos_bank.as_deref(), Some("Axis"));
    }

    #[tokio::test]
    async fn loop_serializes_submissions() {
        let council = Arc::new(MockCouncil::fixed(Action::SwitchGateway, 0.9));
        let (handle, task) = spawn_router_loop(router(5, council.clone()));

        let mut producers = Vec::new();
        for producer in 0..4 {
            let handle = handle.clone();
            producers.push(tokio::spawn(async move {
                for step in 0..5 {
                    let amount = 100.0 + (producer * 10 + step) as f64;
                    handle.submit(failure(amount)).await.unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let status = handle.status().await.unwrap();
        assert_eq!(status.metrics.failed_transactions, 20);
        assert_eq!(
            status.metrics.student_decisions + status.student.samples_seen + status.buffered_failures as u64,
            20
        );

        drop(handle);
        let router = task.await.unwrap();
        assert!(router.buffered_failures() < 5);
        assert_eq!(council.debates_held(), router.metrics().teacher_decisions);
    }

    #[tokio::test]
    async fn submit_rejects_malformed_transaction() {
        let (handle, _task) = spawn_router_loop(router(5, Arc::new(MockCouncil::new(Some(2)))));
        let mut bad = failure(10.0);
        bad.amount = f64::NAN;
        assert!(matches!(handle.submit(bad).await, Err(Error::Event(_))));
    }
}
