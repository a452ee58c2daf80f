//! Error types for missionpay
//!
//! Every failure is explicit and carries a human-readable message; nothing is
//! reduced to an opaque code.

use thiserror::Error;

use crate::{Amount, MissionStatus};

/// Result type for missionpay operations
pub type Result<T> = std::result::Result<T, MissionError>;

/// missionpay error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissionError {
    // ========================================================================
    // Payment Errors
    // ========================================================================

    /// Requested payment exceeds the authorized ceiling
    #[error("Budget exceeded: agent requested {requested}, ceiling is {ceiling}")]
    BudgetExceeded { requested: Amount, ceiling: Amount },

    /// A payment proof failed verification
    #[error("Invalid payment proof: {reason}")]
    InvalidPaymentProof { reason: String },

    /// A ledger transaction reverted, timed out or could not be funded
    #[error("Ledger transaction failed: {reason}")]
    LedgerTransactionFailure { reason: String },

    // ========================================================================
    // Execution Errors
    // ========================================================================

    /// The agent did not deliver within the bounded handshake
    #[error("Agent {agent} task failed: {reason}")]
    AgentTaskFailure { agent: String, reason: String },

    /// Some parallel branches were paid and succeeded while others failed
    #[error("Partial mission failure: {completed} agent(s) completed, {failed} agent(s) failed: {first_error}")]
    PartialMissionFailure {
        completed: usize,
        failed: usize,
        first_error: String,
    },

    /// A call exceeded its fixed timeout
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    // ========================================================================
    // Mission Errors
    // ========================================================================

    /// The submitted mission plan is not executable
    #[error("Invalid mission plan: {reason}")]
    InvalidPlan { reason: String },

    /// Split shares do not sum to 10000 basis points
    #[error("Invalid split: client {client_bps} bps + agent {agent_bps} bps != 10000")]
    InvalidSplit { client_bps: u16, agent_bps: u16 },

    /// Illegal status transition
    #[error("Illegal transition from {from} to {to}")]
    InvalidTransition { from: MissionStatus, to: MissionStatus },

    /// Illegal execution record transition
    #[error("Execution {execution_id} cannot move from {from} to {to}")]
    InvalidExecutionTransition {
        execution_id: String,
        from: String,
        to: String,
    },

    /// A status report names a different agent than the record's owner
    #[error("Execution {execution_id} belongs to agent {owner}")]
    ExecutionAgentMismatch { execution_id: String, owner: String },

    /// A write would drop a payment already recorded on the execution
    #[error("Execution {execution_id} already records payment {paid}")]
    PaymentAlreadyRecorded { execution_id: String, paid: Amount },

    /// Mission not found
    #[error("Mission {mission_id} not found")]
    MissionNotFound { mission_id: String },

    /// Execution record not found
    #[error("Execution {execution_id} not found")]
    ExecutionNotFound { execution_id: String },

    /// Mission store failure
    #[error("Mission store error: {message}")]
    Store { message: String },
}

impl MissionError {
    /// Whether this error came from the ledger side
    pub fn is_ledger_failure(&self) -> bool {
        matches!(self, Self::LedgerTransactionFailure { .. })
    }
}
