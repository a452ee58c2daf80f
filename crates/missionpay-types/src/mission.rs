//! Missions, agent assignments and execution records

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MissionError, Result};
use crate::{
    AccountId, AgentId, Amount, ExecutionId, MissionId, MissionStatus, StatusCallback, TxHash,
};

/// How a mission drives its agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionMode {
    /// One agent at a time, in position order, with context chaining
    Sequential,
    /// All agents at once, joined on completion
    Parallel,
}

impl fmt::Display for MissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Parallel => f.write_str("parallel"),
        }
    }
}

/// One agent's part in a mission. Immutable after mission creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAssignment {
    pub agent_id: AgentId,
    /// Capability tag the agent is hired for
    pub capability: String,
    /// Contracted payment; also the ceiling for the agent's payment request
    pub payment: Amount,
    /// Ordering in sequential mode
    #[serde(default)]
    pub position: Option<u32>,
    /// Where the agent accepts task calls
    pub endpoint: String,
    /// Ledger account that receives escrow releases
    pub account: AccountId,
}

/// A client's mission plan before it is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionPlan {
    pub client: AccountId,
    pub mode: MissionMode,
    pub total_budget: Amount,
    pub description: String,
    /// Reference to the requirements document
    #[serde(default)]
    pub requirements: String,
    pub assignments: Vec<AgentAssignment>,
}

impl MissionPlan {
    /// Sum of contracted payments
    pub fn contracted_total(&self) -> Option<Amount> {
        Amount::sum(self.assignments.iter().map(|a| &a.payment))
    }

    /// Reject plans that could break the budget invariant or are not executable
    pub fn validate(&self) -> Result<()> {
        if self.assignments.is_empty() {
            return Err(MissionError::InvalidPlan {
                reason: "mission has no agent assignments".to_string(),
            });
        }

        if self.total_budget.is_zero() {
            return Err(MissionError::InvalidPlan {
                reason: "mission budget must be greater than zero".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for assignment in &self.assignments {
            if !seen.insert(&assignment.agent_id) {
                return Err(MissionError::InvalidPlan {
                    reason: format!("agent {} is assigned more than once", assignment.agent_id),
                });
            }
        }

        let contracted = self.contracted_total().ok_or_else(|| MissionError::InvalidPlan {
            reason: "contracted payments overflow".to_string(),
        })?;
        if contracted > self.total_budget {
            return Err(MissionError::InvalidPlan {
                reason: format!(
                    "contracted payments {} exceed total budget {}",
                    contracted, self.total_budget
                ),
            });
        }

        Ok(())
    }
}

/// Assignments in execution order: by position, unpositioned last, stable otherwise
pub fn ordered_assignments(assignments: &[AgentAssignment]) -> Vec<AgentAssignment> {
    let mut ordered = assignments.to_vec();
    ordered.sort_by_key(|a| a.position.unwrap_or(u32::MAX));
    ordered
}

/// A funded mission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub client: AccountId,
    pub mode: MissionMode,
    pub total_budget: Amount,
    pub description: String,
    pub requirements: String,
    pub status: MissionStatus,
    pub assignments: Vec<AgentAssignment>,
    /// Error that failed the mission, if any
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    /// Create a pending mission from an accepted plan
    pub fn from_plan(plan: &MissionPlan) -> Self {
        let now = Utc::now();
        Self {
            id: MissionId::new(),
            client: plan.client.clone(),
            mode: plan.mode,
            total_budget: plan.total_budget,
            description: plan.description.clone(),
            requirements: plan.requirements.clone(),
            status: MissionStatus::Pending,
            assignments: plan.assignments.clone(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of one agent's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Executing) | (Pending, Failed) | (Executing, Completed) | (Executing, Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Exactly one per agent assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub mission_id: MissionId,
    pub agent_id: AgentId,
    pub status: ExecutionStatus,
    /// Deliverable reference returned by the agent
    pub deliverable: Option<String>,
    /// Text output, used for context chaining
    pub output: Option<String>,
    /// Amount actually paid to the agent
    pub paid: Amount,
    /// Ledger transaction of the payment
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Create a pending record at mission initialization
    pub fn pending(mission_id: MissionId, agent_id: AgentId) -> Self {
        Self {
            id: ExecutionId::new(),
            mission_id,
            agent_id,
            status: ExecutionStatus::Pending,
            deliverable: None,
            output: None,
            paid: Amount::zero(),
            tx_hash: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    fn advance(&mut self, next: ExecutionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MissionError::InvalidExecutionTransition {
                execution_id: self.id.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.advance(ExecutionStatus::Executing)
    }

    pub fn complete(
        &mut self,
        output: String,
        deliverable: Option<String>,
        paid: Amount,
        tx_hash: Option<TxHash>,
    ) -> Result<()> {
        self.advance(ExecutionStatus::Completed)?;
        self.output = Some(output);
        self.deliverable = deliverable;
        self.paid = paid;
        self.tx_hash = tx_hash;
        Ok(())
    }

    /// Failed records contribute nothing to the paid total, but keep any
    /// payment already recorded on them
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.advance(ExecutionStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Fail after the agent was paid but did not deliver
    pub fn fail_after_payment(
        &mut self,
        error: impl Into<String>,
        paid: Amount,
        tx_hash: TxHash,
    ) -> Result<()> {
        self.fail(error)?;
        self.paid = paid;
        self.tx_hash = Some(tx_hash);
        Ok(())
    }

    /// Fold an agent's status report into this record
    ///
    /// A repeated status only fills in missing details and a report this
    /// record has already moved past is ignored. Anything else must be a legal
    /// transition. Payment fields are never touched.
    pub fn merge_report(&mut self, report: &StatusCallback) -> Result<()> {
        if self.agent_id != report.agent_id {
            return Err(MissionError::ExecutionAgentMismatch {
                execution_id: self.id.to_string(),
                owner: self.agent_id.to_string(),
            });
        }
        if report.status.can_transition_to(self.status) {
            return Ok(());
        }
        if self.status != report.status {
            self.advance(report.status)?;
        }

        if self.deliverable.is_none() {
            self.deliverable = report.deliverable.clone();
        }
        if self.output.is_none() {
            self.output = report
                .result
                .as_ref()
                .and_then(|r| r.get("output"))
                .and_then(|o| o.as_str())
                .map(str::to_string);
        }
        if report.status == ExecutionStatus::Failed && self.error.is_none() {
            self.error = report.error.clone();
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Check that `next` may replace this record in storage
    ///
    /// Rejects writes that move the record backwards or drop a recorded
    /// payment. A write carrying the first payment receipt always lands, even
    /// over an outcome the agent reported on its own.
    pub fn check_replacement(&self, next: &ExecutionRecord) -> Result<()> {
        let first_payment = self.tx_hash.is_none() && next.tx_hash.is_some();
        if self.status != next.status
            && !self.status.can_transition_to(next.status)
            && !first_payment
        {
            return Err(MissionError::InvalidExecutionTransition {
                execution_id: self.id.to_string(),
                from: self.status.to_string(),
                to: next.status.to_string(),
            });
        }
        if next.paid < self.paid || (self.tx_hash.is_some() && next.tx_hash.is_none()) {
            return Err(MissionError::PaymentAlreadyRecorded {
                execution_id: self.id.to_string(),
                paid: self.paid,
            });
        }
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// Sum of `paid` over completed executions
pub fn total_paid(records: &[ExecutionRecord]) -> Amount {
    records
        .iter()
        .filter(|r| r.is_completed())
        .fold(Amount::zero(), |acc, r| Amount(acc.0.saturating_add(r.paid.0)))
}

/// Orchestration outcome of a mission run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Completed,
    Failed,
}

/// Result of `execute_mission`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionExecution {
    pub mission_id: MissionId,
    pub mode: MissionMode,
    pub outcome: ExecutionOutcome,
    /// One record per assignment, in plan order
    pub executions: Vec<ExecutionRecord>,
    pub total_paid: Amount,
    /// Escrow status after orchestration
    pub status: MissionStatus,
    /// Aggregate deliverable reference posted to escrow
    pub deliverable: Option<String>,
    pub error: Option<String>,
}

impl MissionExecution {
    pub fn is_completed(&self) -> bool {
        self.outcome == ExecutionOutcome::Completed
    }

    pub fn execution_for(&self, agent_id: &AgentId) -> Option<&ExecutionRecord> {
        self.executions.iter().find(|e| &e.agent_id == agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(payment: u64, position: Option<u32>) -> AgentAssignment {
        AgentAssignment {
            agent_id: AgentId::new(),
            capability: "research".to_string(),
            payment: Amount(payment),
            position,
            endpoint: "http://localhost:9000/task".to_string(),
            account: AccountId::new("0xagent"),
        }
    }

    fn plan(assignments: Vec<AgentAssignment>, budget: u64) -> MissionPlan {
        MissionPlan {
            client: AccountId::new("0xclient"),
            mode: MissionMode::Sequential,
            total_budget: Amount(budget),
            description: "Write a market report".to_string(),
            requirements: "ipfs://requirements".to_string(),
            assignments,
        }
    }

    #[test]
    fn test_plan_validation() {
        assert!(plan(vec![assignment(8, None), assignment(8, None)], 20).validate().is_ok());
        assert!(plan(vec![], 20).validate().is_err());
        assert!(plan(vec![assignment(8, None)], 0).validate().is_err());

        let err = plan(vec![assignment(15, None), assignment(8, None)], 20)
            .validate()
            .unwrap_err();
        assert!(matches!(err, MissionError::InvalidPlan { .. }));

        let dup = assignment(1, None);
        assert!(plan(vec![dup.clone(), dup], 20).validate().is_err());
    }

    #[test]
    fn test_ordering_by_position() {
        let a = assignment(1, Some(2));
        let b = assignment(1, None);
        let c = assignment(1, Some(1));
        let ordered = ordered_assignments(&[a.clone(), b.clone(), c.clone()]);
        assert_eq!(ordered, vec![c, a, b]);
    }

    #[test]
    fn test_execution_transitions() {
        let mut record = ExecutionRecord::pending(MissionId::new(), AgentId::new());
        assert!(record
            .complete("x".into(), None, Amount(1), None)
            .is_err());

        record.start().unwrap();
        record.fail("agent unreachable").unwrap();
        assert_eq!(record.paid, Amount::zero());
        assert!(record.start().is_err());
    }

    #[test]
    fn test_failure_after_payment_keeps_receipt() {
        let mut record = ExecutionRecord::pending(MissionId::new(), AgentId::new());
        record.start().unwrap();
        record
            .fail_after_payment("Agent returned 500: crashed", Amount(4), TxHash("0xabc".into()))
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.paid, Amount(4));
        assert_eq!(record.tx_hash, Some(TxHash("0xabc".into())));
        assert_eq!(total_paid(&[record]), Amount::zero());
    }

    fn report(record: &ExecutionRecord, status: ExecutionStatus) -> StatusCallback {
        StatusCallback {
            execution_id: record.id.clone(),
            agent_id: record.agent_id.clone(),
            status,
            deliverable: Some("ipfs://draft".to_string()),
            result: Some(serde_json::json!({ "output": "draft" })),
            error: None,
        }
    }

    #[test]
    fn test_merge_report_never_touches_payment() {
        let mut record = ExecutionRecord::pending(MissionId::new(), AgentId::new());
        record.start().unwrap();
        record
            .complete("final".into(), None, Amount(6), Some(TxHash("0x01".into())))
            .unwrap();

        record.merge_report(&report(&record, ExecutionStatus::Completed)).unwrap();
        assert_eq!(record.paid, Amount(6));
        assert_eq!(record.output.as_deref(), Some("final"));
        assert_eq!(record.deliverable.as_deref(), Some("ipfs://draft"));

        // executing is behind completed
        record.merge_report(&report(&record, ExecutionStatus::Executing)).unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);

        let mut stranger = report(&record, ExecutionStatus::Completed);
        stranger.agent_id = AgentId::new();
        assert!(matches!(
            record.merge_report(&stranger),
            Err(MissionError::ExecutionAgentMismatch { .. })
        ));
    }

    #[test]
    fn test_replacement_guard() {
        let mut stored = ExecutionRecord::pending(MissionId::new(), AgentId::new());
        stored.start().unwrap();
        let stale = stored.clone();
        stored
            .complete("done".into(), None, Amount(6), Some(TxHash("0x02".into())))
            .unwrap();

        assert!(matches!(
            stored.check_replacement(&stale),
            Err(MissionError::InvalidExecutionTransition { .. })
        ));

        let mut unpaid = stored.clone();
        unpaid.paid = Amount::zero();
        unpaid.tx_hash = None;
        assert!(matches!(
            stored.check_replacement(&unpaid),
            Err(MissionError::PaymentAlreadyRecorded { .. })
        ));

        let mut refreshed = stored.clone();
        refreshed.output = Some("done, revised".into());
        assert!(stored.check_replacement(&refreshed).is_ok());
        assert!(stale.check_replacement(&stored).is_ok());

        // agent reported failure before the paid outcome was written
        let mut reported = stale.clone();
        reported.fail("agent says it crashed").unwrap();
        assert!(reported.check_replacement(&stored).is_ok());
        assert!(matches!(
            reported.check_replacement(&stale),
            Err(MissionError::InvalidExecutionTransition { .. })
        ));
    }

    #[test]
    fn test_total_paid_ignores_failures() {
        let mission = MissionId::new();
        let mut done = ExecutionRecord::pending(mission.clone(), AgentId::new());
        done.start().unwrap();
        done.complete("ok".into(), None, Amount(8), None).unwrap();

        let mut failed = ExecutionRecord::pending(mission, AgentId::new());
        failed.start().unwrap();
        failed.fail("boom").unwrap();

        assert_eq!(total_paid(&[done, failed]), Amount(8));
    }
}
