//! Execution strategies
//!
//! A mission's mode selects one [`ExecutionStrategy`]. Both strategies run
//! each agent through the same [`run_agent`] step: mark executing, call
//! through the handshake with the contracted payment as ceiling, then
//! complete or fail the record. Errors never escape a strategy; they end up
//! in the failed record's message.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::join_all;
use missionpay_protocol::AgentCaller;
use missionpay_types::{
    ordered_assignments, AgentAssignment, AgentId, ExecutionRecord, Mission, MissionMode,
    TaskRequest,
};
use tracing::{debug, info, warn};

use crate::sink::ExecutionSink;

/// Everything a strategy needs to run one mission
pub struct MissionContext<'a> {
    pub mission: &'a Mission,
    pub caller: &'a dyn AgentCaller,
    pub sink: &'a dyn ExecutionSink,
    /// Passed to agents so they can report status
    pub callback_url: Option<&'a str>,
}

impl MissionContext<'_> {
    fn task_request(&self, assignment: &AgentAssignment, record: &ExecutionRecord, task: String) -> TaskRequest {
        TaskRequest {
            mission_id: self.mission.id.clone(),
            agent_id: assignment.agent_id.clone(),
            execution_id: record.id.clone(),
            task,
            capability: assignment.capability.clone(),
            payment: assignment.payment,
            requirements: self.mission.requirements.clone(),
            callback_url: self.callback_url.map(str::to_string),
        }
    }
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn mode(&self) -> MissionMode;

    /// Run the mission's agents; returns the records in plan order
    async fn run(
        &self,
        ctx: &MissionContext<'_>,
        records: Vec<ExecutionRecord>,
    ) -> Vec<ExecutionRecord>;
}

/// Pick the strategy for a mode
pub fn strategy_for(mode: MissionMode) -> Box<dyn ExecutionStrategy> {
    match mode {
        MissionMode::Sequential => Box::new(SequentialStrategy),
        MissionMode::Parallel => Box::new(ParallelStrategy),
    }
}

/// Drive one agent from pending to completed or failed
pub async fn run_agent(
    ctx: &MissionContext<'_>,
    assignment: &AgentAssignment,
    mut record: ExecutionRecord,
    task: String,
) -> ExecutionRecord {
    if let Err(err) = record.start() {
        warn!(execution_id = %record.id, error = %err, "Execution cannot start");
        return record;
    }
    ctx.sink.record_execution(&record).await;

    let request = ctx.task_request(assignment, &record, task);
    let agent = assignment.agent_id.to_string();
    let transition = match ctx
        .caller
        .call_agent(assignment, request, assignment.payment)
        .await
    {
        Ok(outcome) => {
            let paid = outcome.paid();
            let tx_hash = outcome.payment.map(|proof| proof.tx_hash);
            info!(
                mission_id = %ctx.mission.id,
                agent_id = %assignment.agent_id,
                paid = %paid,
                "Agent completed"
            );
            record.complete(outcome.result.output, outcome.result.deliverable, paid, tx_hash)
        }
        Err(err) => {
            let payment = err.payment().map(|p| (p.amount, p.tx_hash.clone()));
            let err = err.into_mission_error(&agent);
            warn!(
                mission_id = %ctx.mission.id,
                agent_id = %assignment.agent_id,
                error = %err,
                "Agent failed"
            );
            match payment {
                Some((paid, tx_hash)) => record.fail_after_payment(err.to_string(), paid, tx_hash),
                None => record.fail(err.to_string()),
            }
        }
    };
    if let Err(err) = transition {
        warn!(execution_id = %record.id, error = %err, "Execution record rejected transition");
    }

    ctx.sink.record_execution(&record).await;
    record
}

fn with_context(description: &str, outputs: &[(String, String)]) -> String {
    if outputs.is_empty() {
        return description.to_string();
    }
    let mut task = format!("{description}\n\nContext from previous agents:");
    for (capability, output) in outputs {
        task.push_str(&format!("\n\n[{capability}]\n{output}"));
    }
    task
}

/// Plan-ordered records from a map keyed by agent
fn in_plan_order(
    mission: &Mission,
    mut by_agent: HashMap<AgentId, ExecutionRecord>,
) -> Vec<ExecutionRecord> {
    mission
        .assignments
        .iter()
        .filter_map(|a| by_agent.remove(&a.agent_id))
        .collect()
}

/// One agent at a time in position order, each seeing prior outputs
///
/// Stops at the first failure. Agents after it are never called and keep
/// their pending records.
pub struct SequentialStrategy;

#[async_trait]
impl ExecutionStrategy for SequentialStrategy {
    fn mode(&self) -> MissionMode {
        MissionMode::Sequential
    }

    async fn run(
        &self,
        ctx: &MissionContext<'_>,
        records: Vec<ExecutionRecord>,
    ) -> Vec<ExecutionRecord> {
        let mut by_agent: HashMap<AgentId, ExecutionRecord> = records
            .into_iter()
            .map(|r| (r.agent_id.clone(), r))
            .collect();
        let mut outputs: Vec<(String, String)> = Vec::new();

        for assignment in ordered_assignments(&ctx.mission.assignments) {
            let Some(record) = by_agent.remove(&assignment.agent_id) else {
                continue;
            };
            let task = with_context(&ctx.mission.description, &outputs);
            let record = run_agent(ctx, &assignment, record, task).await;

            let completed = record.is_completed();
            if let Some(output) = record.output.clone().filter(|_| completed) {
                outputs.push((assignment.capability.clone(), output));
            }
            by_agent.insert(assignment.agent_id.clone(), record);

            if !completed {
                debug!(mission_id = %ctx.mission.id, agent_id = %assignment.agent_id, "Stopping sequential mission");
                break;
            }
        }

        in_plan_order(ctx.mission, by_agent)
    }
}

/// Every agent at once, joined when all have finished
pub struct ParallelStrategy;

#[async_trait]
impl ExecutionStrategy for ParallelStrategy {
    fn mode(&self) -> MissionMode {
        MissionMode::Parallel
    }

    async fn run(
        &self,
        ctx: &MissionContext<'_>,
        records: Vec<ExecutionRecord>,
    ) -> Vec<ExecutionRecord> {
        let mut by_agent: HashMap<AgentId, ExecutionRecord> = records
            .into_iter()
            .map(|r| (r.agent_id.clone(), r))
            .collect();

        let branches = ctx.mission.assignments.iter().filter_map(|assignment| {
            let record = by_agent.remove(&assignment.agent_id)?;
            let task = ctx.mission.description.clone();
            Some(run_agent(ctx, assignment, record, task))
        });
        let finished = join_all(branches).await;

        let by_agent = finished
            .into_iter()
            .map(|r| (r.agent_id.clone(), r))
            .collect();
        in_plan_order(ctx.mission, by_agent)
    }
}
