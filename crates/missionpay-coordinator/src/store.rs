//! Mission store collaborator
//!
//! The store keeps the queryable view of missions: status, assignments and
//! one execution record per assignment. `InMemoryMissionStore` backs tests,
//! the demo and the status-callback surface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use missionpay_types::{
    AgentAssignment, ExecutionId, ExecutionRecord, Mission, MissionError, MissionId,
    MissionStatus, Result, StatusCallback,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A mission with its execution records, in assignment order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionSnapshot {
    pub mission: Mission,
    pub executions: Vec<ExecutionRecord>,
}

#[async_trait]
pub trait MissionStore: Send + Sync {
    async fn create_mission(&self, mission: Mission) -> Result<()>;

    async fn attach_assignment(
        &self,
        mission_id: &MissionId,
        assignment: AgentAssignment,
    ) -> Result<()>;

    /// Create one pending record per assignment; only allowed once
    async fn init_executions(&self, mission_id: &MissionId) -> Result<Vec<ExecutionRecord>>;

    /// Replace a record; writes that move it backwards or drop a recorded
    /// payment are rejected
    async fn update_execution(&self, record: ExecutionRecord) -> Result<()>;

    /// Merge an agent's status report into the stored record atomically
    async fn apply_report(&self, report: &StatusCallback) -> Result<ExecutionRecord>;

    /// Mirror an escrow status; illegal transitions are rejected
    async fn update_mission_status(
        &self,
        mission_id: &MissionId,
        status: MissionStatus,
        error: Option<String>,
    ) -> Result<()>;

    async fn mission(&self, mission_id: &MissionId) -> Result<MissionSnapshot>;

    async fn execution(&self, execution_id: &ExecutionId) -> Result<ExecutionRecord>;
}

#[derive(Default)]
struct StoreState {
    missions: HashMap<MissionId, Mission>,
    executions: HashMap<ExecutionId, ExecutionRecord>,
    by_mission: HashMap<MissionId, Vec<ExecutionId>>,
}

impl StoreState {
    fn mission_mut(&mut self, mission_id: &MissionId) -> Result<&mut Mission> {
        self.missions
            .get_mut(mission_id)
            .ok_or_else(|| MissionError::MissionNotFound {
                mission_id: mission_id.to_string(),
            })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMissionStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryMissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mission_count(&self) -> usize {
        self.state.read().await.missions.len()
    }
}

#[async_trait]
impl MissionStore for InMemoryMissionStore {
    async fn create_mission(&self, mission: Mission) -> Result<()> {
        let mut state = self.state.write().await;
        if state.missions.contains_key(&mission.id) {
            return Err(MissionError::Store {
                message: format!("mission {} already exists", mission.id),
            });
        }
        state.missions.insert(mission.id.clone(), mission);
        Ok(())
    }

    async fn attach_assignment(
        &self,
        mission_id: &MissionId,
        assignment: AgentAssignment,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if state.by_mission.contains_key(mission_id) {
            return Err(MissionError::Store {
                message: format!("mission {mission_id} is already initialized"),
            });
        }
        let mission = state.mission_mut(mission_id)?;
        if mission
            .assignments
            .iter()
            .any(|a| a.agent_id == assignment.agent_id)
        {
            return Err(MissionError::Store {
                message: format!(
                    "agent {} is already assigned to mission {mission_id}",
                    assignment.agent_id
                ),
            });
        }
        mission.assignments.push(assignment);
        mission.updated_at = Utc::now();
        Ok(())
    }

    async fn init_executions(&self, mission_id: &MissionId) -> Result<Vec<ExecutionRecord>> {
        let mut state = self.state.write().await;
        if state.by_mission.contains_key(mission_id) {
            return Err(MissionError::Store {
                message: format!("executions for mission {mission_id} already exist"),
            });
        }
        let mission = state.mission_mut(mission_id)?;
        let records: Vec<ExecutionRecord> = mission
            .assignments
            .iter()
            .map(|a| ExecutionRecord::pending(mission_id.clone(), a.agent_id.clone()))
            .collect();

        state
            .by_mission
            .insert(mission_id.clone(), records.iter().map(|r| r.id.clone()).collect());
        for record in &records {
            state.executions.insert(record.id.clone(), record.clone());
        }
        Ok(records)
    }

    async fn update_execution(&self, record: ExecutionRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let existing = state
            .executions
            .get_mut(&record.id)
            .ok_or_else(|| MissionError::ExecutionNotFound {
                execution_id: record.id.to_string(),
            })?;
        if existing.mission_id != record.mission_id || existing.agent_id != record.agent_id {
            return Err(MissionError::Store {
                message: format!("execution {} belongs to another assignment", record.id),
            });
        }
        existing.check_replacement(&record)?;
        *existing = record;
        Ok(())
    }

    async fn apply_report(&self, report: &StatusCallback) -> Result<ExecutionRecord> {
        let mut state = self.state.write().await;
        let existing = state
            .executions
            .get_mut(&report.execution_id)
            .ok_or_else(|| MissionError::ExecutionNotFound {
                execution_id: report.execution_id.to_string(),
            })?;
        let mut merged = existing.clone();
        merged.merge_report(report)?;
        *existing = merged.clone();
        Ok(merged)
    }

    async fn update_mission_status(
        &self,
        mission_id: &MissionId,
        status: MissionStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let mission = state.mission_mut(mission_id)?;
        if mission.status != status {
            mission.status = mission.status.transition(status)?;
        }
        if error.is_some() {
            mission.error = error;
        }
        mission.updated_at = Utc::now();
        Ok(())
    }

    async fn mission(&self, mission_id: &MissionId) -> Result<MissionSnapshot> {
        let state = self.state.read().await;
        let mission = state
            .missions
            .get(mission_id)
            .cloned()
            .ok_or_else(|| MissionError::MissionNotFound {
                mission_id: mission_id.to_string(),
            })?;
        let executions = state
            .by_mission
            .get(mission_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.executions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(MissionSnapshot {
            mission,
            executions,
        })
    }

    async fn execution(&self, execution_id: &ExecutionId) -> Result<ExecutionRecord> {
        self.state
            .read()
            .await
            .executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| MissionError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            })
    }
}
