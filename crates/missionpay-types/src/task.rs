//! Agent-facing task call and status callback payloads

use serde::{Deserialize, Serialize};

use crate::{AgentId, Amount, ExecutionId, ExecutionStatus, MissionId};

/// Body of a task call to an agent endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub mission_id: MissionId,
    pub agent_id: AgentId,
    pub execution_id: ExecutionId,
    /// Task description, possibly augmented with prior agents' outputs
    pub task: String,
    pub capability: String,
    pub payment: Amount,
    pub requirements: String,
    /// Where the performer reports execution status
    pub callback_url: Option<String>,
}

/// Success payload of a task call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub output: String,
    #[serde(default)]
    pub deliverable: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Status report from a task performer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCallback {
    pub execution_id: ExecutionId,
    pub agent_id: AgentId,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub deliverable: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}
