//! Mission coordinator
//!
//! `execute_mission` takes a plan from validation to a submitted (or failed)
//! escrow:
//!
//! 1. Validate the plan and record the mission, its assignments and one
//!    pending execution per assignment
//! 2. Lock the budget in escrow and start it
//! 3. Run the mode's strategy
//! 4. All agents completed: post the aggregate deliverable (`Submitted`).
//!    Otherwise fail the escrow, which refunds the budget (`Failed`)
//!
//! Agent payments made during the handshake are never clawed back.

use std::sync::Arc;

use missionpay_escrow::{CreateEscrowRequest, EscrowLedger, EscrowPayee, EscrowReceipt};
use missionpay_protocol::{hash_sha256, AgentCaller};
use missionpay_types::{
    total_paid, ExecutionOutcome, ExecutionRecord, ExecutionStatus, Mission, MissionError,
    MissionExecution, MissionId, MissionMode, MissionPlan, MissionStatus, Result,
};
use tracing::{info, warn};

use crate::config::MissionConfig;
use crate::sink::{ExecutionSink, StoreSink};
use crate::store::{MissionSnapshot, MissionStore};
use crate::strategy::{strategy_for, MissionContext};

pub struct Coordinator {
    store: Arc<dyn MissionStore>,
    sink: Arc<dyn ExecutionSink>,
    escrow: Arc<dyn EscrowLedger>,
    caller: Arc<dyn AgentCaller>,
    config: MissionConfig,
    callback_url: Option<String>,
}

impl Coordinator {
    /// Coordinator writing status straight through to `store`
    pub fn new(
        store: Arc<dyn MissionStore>,
        escrow: Arc<dyn EscrowLedger>,
        caller: Arc<dyn AgentCaller>,
        config: MissionConfig,
    ) -> Self {
        let sink = Arc::new(StoreSink::new(store.clone()));
        Self {
            store,
            sink,
            escrow,
            caller,
            config,
            callback_url: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ExecutionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Where agents should post status callbacks
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn config(&self) -> &MissionConfig {
        &self.config
    }

    pub async fn execute_mission(&self, plan: MissionPlan) -> Result<MissionExecution> {
        plan.validate()?;

        let mission_id = self.register(&plan).await?;
        let records = self.store.init_executions(&mission_id).await?;
        info!(
            mission_id = %mission_id,
            mode = %plan.mode,
            agents = records.len(),
            budget = %plan.total_budget,
            "Mission registered"
        );

        if let Err(err) = self.fund(&mission_id, &plan).await {
            warn!(mission_id = %mission_id, error = %err, "Mission could not be funded");
            self.sink
                .record_mission_status(&mission_id, MissionStatus::Pending, Some(err.to_string()))
                .await;
            return Err(err);
        }

        let mission = self.store.mission(&mission_id).await?.mission;
        let ctx = MissionContext {
            mission: &mission,
            caller: self.caller.as_ref(),
            sink: self.sink.as_ref(),
            callback_url: self.callback_url.as_deref(),
        };
        let records = strategy_for(plan.mode).run(&ctx, records).await;
        let paid = total_paid(&records);
        if paid > plan.total_budget {
            warn!(mission_id = %mission_id, paid = %paid, budget = %plan.total_budget, "Payments exceed budget");
        }

        let (outcome, status, deliverable, error) = match failure_message(plan.mode, &records) {
            None => {
                let reference = aggregate_deliverable(&records);
                match self.escrow.submit_deliverable(&mission_id, &reference).await {
                    Ok(receipt) => {
                        self.mirror(&mission_id, &receipt).await;
                        (ExecutionOutcome::Completed, receipt.status, Some(reference), None)
                    }
                    Err(err) => {
                        let message = MissionError::from(err).to_string();
                        let status = self.fail(&mission_id, &message).await;
                        (ExecutionOutcome::Failed, status, None, Some(message))
                    }
                }
            }
            Some(message) => {
                let status = self.fail(&mission_id, &message).await;
                (ExecutionOutcome::Failed, status, None, Some(message))
            }
        };

        info!(
            mission_id = %mission_id,
            outcome = ?outcome,
            status = %status,
            total_paid = %paid,
            "Mission orchestration finished"
        );

        Ok(MissionExecution {
            mission_id,
            mode: plan.mode,
            outcome,
            executions: records,
            total_paid: paid,
            status,
            deliverable,
            error,
        })
    }

    async fn register(&self, plan: &MissionPlan) -> Result<MissionId> {
        let mut mission = Mission::from_plan(plan);
        let assignments = std::mem::take(&mut mission.assignments);
        let mission_id = mission.id.clone();

        self.store.create_mission(mission).await?;
        for assignment in assignments {
            self.store.attach_assignment(&mission_id, assignment).await?;
        }
        Ok(mission_id)
    }

    async fn fund(&self, mission_id: &MissionId, plan: &MissionPlan) -> Result<()> {
        let payees = plan
            .assignments
            .iter()
            .map(|a| EscrowPayee {
                agent_id: a.agent_id.clone(),
                account: a.account.clone(),
                amount: a.payment,
            })
            .collect();

        self.escrow
            .create_mission(CreateEscrowRequest {
                mission_id: mission_id.clone(),
                client: plan.client.clone(),
                token: self.config.token_id(),
                budget: plan.total_budget,
                payees,
            })
            .await?;
        let receipt = self.escrow.start_mission(mission_id).await?;
        self.mirror(mission_id, &receipt).await;
        Ok(())
    }

    /// Fail the escrow and record why; returns the resulting status
    async fn fail(&self, mission_id: &MissionId, message: &str) -> MissionStatus {
        let status = match self.escrow.fail_mission(mission_id, message).await {
            Ok(receipt) => receipt.status,
            Err(err) => {
                warn!(mission_id = %mission_id, error = %err, "Escrow refused to fail mission");
                self.escrow
                    .mission_status(mission_id)
                    .await
                    .unwrap_or(MissionStatus::InProgress)
            }
        };
        self.sink
            .record_mission_status(mission_id, status, Some(message.to_string()))
            .await;
        status
    }

    async fn mirror(&self, mission_id: &MissionId, receipt: &EscrowReceipt) {
        self.sink
            .record_mission_status(mission_id, receipt.status, None)
            .await;
    }

    /// Client approves the submitted deliverable
    pub async fn approve_deliverable(&self, mission_id: &MissionId) -> Result<EscrowReceipt> {
        let receipt = self.escrow.approve_deliverable(mission_id).await?;
        info!(mission_id = %mission_id, "Deliverable approved");
        self.mirror(mission_id, &receipt).await;
        Ok(receipt)
    }

    /// Release funds after client inaction; fails before the window elapses
    pub async fn auto_release(&self, mission_id: &MissionId) -> Result<EscrowReceipt> {
        let receipt = self.escrow.auto_release(mission_id).await?;
        info!(mission_id = %mission_id, "Escrow auto-released");
        self.mirror(mission_id, &receipt).await;
        Ok(receipt)
    }

    pub async fn cancel_mission(&self, mission_id: &MissionId) -> Result<EscrowReceipt> {
        let receipt = self.escrow.cancel_mission(mission_id).await?;
        self.mirror(mission_id, &receipt).await;
        Ok(receipt)
    }

    /// Bring the stored status up to the escrow's, e.g. after a dispute
    /// or validation was settled elsewhere
    pub async fn sync_status(&self, mission_id: &MissionId) -> Result<MissionStatus> {
        let escrow_status = self.escrow.mission_status(mission_id).await?;
        let stored = self.store.mission(mission_id).await?.mission.status;

        let path = status_path(stored, escrow_status);
        if path.is_empty() && stored != escrow_status {
            warn!(mission_id = %mission_id, stored = %stored, escrow = %escrow_status, "No legal path to escrow status");
        }
        for status in path {
            self.sink.record_mission_status(mission_id, status, None).await;
        }
        Ok(escrow_status)
    }

    /// Mission with its execution records as stored
    pub async fn mission_status(&self, mission_id: &MissionId) -> Result<MissionSnapshot> {
        self.store.mission(mission_id).await
    }
}

/// Why a run failed, or `None` when every agent completed
fn failure_message(mode: MissionMode, records: &[ExecutionRecord]) -> Option<String> {
    if records.iter().all(ExecutionRecord::is_completed) {
        return None;
    }
    let completed = records.iter().filter(|r| r.is_completed()).count();
    let failed: Vec<&ExecutionRecord> = records
        .iter()
        .filter(|r| r.status == ExecutionStatus::Failed)
        .collect();
    let first_error = failed
        .first()
        .and_then(|r| r.error.clone())
        .unwrap_or_else(|| "agent did not complete".to_string());

    match mode {
        MissionMode::Parallel if completed > 0 => Some(
            MissionError::PartialMissionFailure {
                completed,
                failed: failed.len(),
                first_error,
            }
            .to_string(),
        ),
        _ => Some(first_error),
    }
}

/// Content reference over every agent's deliverable, in plan order
fn aggregate_deliverable(records: &[ExecutionRecord]) -> String {
    let manifest: Vec<String> = records
        .iter()
        .map(|r| {
            let part = r
                .deliverable
                .clone()
                .or_else(|| r.output.as_deref().map(|o| hash_sha256(o.as_bytes())))
                .unwrap_or_default();
            format!("{}={}", r.agent_id, part)
        })
        .collect();
    format!("sha256:{}", hash_sha256(manifest.join("\n").as_bytes()))
}

/// Legal steps from the stored status to the escrow's, at most one hop
/// through an intermediate state
fn status_path(from: MissionStatus, to: MissionStatus) -> Vec<MissionStatus> {
    use MissionStatus::*;

    if from == to {
        return vec![];
    }
    if from.can_transition_to(to) {
        return vec![to];
    }
    [InProgress, Submitted, Validating, Disputed]
        .into_iter()
        .find(|mid| from.can_transition_to(*mid) && mid.can_transition_to(to))
        .map(|mid| vec![mid, to])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use missionpay_types::{AgentId, Amount};

    fn record(status: ExecutionStatus, error: Option<&str>) -> ExecutionRecord {
        let mut record = ExecutionRecord::pending(MissionId::new(), AgentId::new());
        record.status = status;
        record.error = error.map(str::to_string);
        if status == ExecutionStatus::Completed {
            record.paid = Amount(3);
        }
        record
    }

    #[test]
    fn test_all_completed_is_not_a_failure() {
        let records = vec![
            record(ExecutionStatus::Completed, None),
            record(ExecutionStatus::Completed, None),
        ];
        assert_eq!(failure_message(MissionMode::Parallel, &records), None);
    }

    #[test]
    fn test_parallel_partial_failure_is_reported() {
        let records = vec![
            record(ExecutionStatus::Completed, None),
            record(ExecutionStatus::Failed, Some("Budget exceeded: agent requested 9, ceiling is 5")),
            record(ExecutionStatus::Completed, None),
        ];
        let message = failure_message(MissionMode::Parallel, &records).unwrap();
        assert!(message.starts_with("Partial mission failure: 2 agent(s) completed, 1 agent(s) failed"));
        assert!(message.contains("Budget exceeded"));
    }

    #[test]
    fn test_sequential_failure_keeps_cause() {
        let records = vec![
            record(ExecutionStatus::Completed, None),
            record(ExecutionStatus::Failed, Some("Agent x task failed: boom")),
            record(ExecutionStatus::Pending, None),
        ];
        assert_eq!(
            failure_message(MissionMode::Sequential, &records).as_deref(),
            Some("Agent x task failed: boom")
        );
    }

    #[test]
    fn test_status_path_through_intermediate() {
        use MissionStatus::*;
        assert_eq!(status_path(Submitted, Resolved), vec![Disputed, Resolved]);
        assert_eq!(status_path(Submitted, Refunded), vec![Validating, Refunded]);
        assert_eq!(status_path(InProgress, Submitted), vec![Submitted]);
        assert!(status_path(Completed, Completed).is_empty());
        assert!(status_path(Completed, Pending).is_empty());
    }

    #[test]
    fn test_aggregate_deliverable_is_stable() {
        let records = vec![record(ExecutionStatus::Completed, None)];
        let first = aggregate_deliverable(&records);
        assert_eq!(first, aggregate_deliverable(&records));
        assert!(first.starts_with("sha256:"));
    }
}
