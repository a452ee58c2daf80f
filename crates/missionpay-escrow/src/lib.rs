//! missionpay Escrow - Mission funds held until approval, validation or dispute
//!
//! The escrow ledger is the authority on mission status once a mission is
//! funded. Every write is submitted and confirmed before it returns an
//! [`EscrowReceipt`], and every money movement is recorded as a
//! [`Distribution`] on the mission's [`EscrowRecord`].
//!
//! Funds leave escrow only from terminal transitions:
//!
//! - approval, validator confirmation and auto-release pay each agent its
//!   contracted amount and return any surplus to the client
//! - failure, cancellation and validator rejection refund the client
//! - dispute resolution splits the escrow in basis points

pub mod record;
pub mod memory;

pub use record::*;
pub use memory::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use missionpay_ledger::LedgerError;
use missionpay_types::{MissionError, MissionId, MissionStatus};
use thiserror::Error;

/// Escrow errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    #[error("Escrow for mission {mission_id} not found")]
    NotFound { mission_id: String },

    #[error("Escrow for mission {mission_id} already exists")]
    AlreadyExists { mission_id: String },

    #[error("Illegal escrow transition from {from} to {to}")]
    InvalidTransition { from: MissionStatus, to: MissionStatus },

    #[error("Auto-release not due until {due_at}")]
    AutoReleaseNotDue { due_at: DateTime<Utc> },

    #[error("Challenge period active until {ends_at}")]
    ChallengePeriodActive { ends_at: DateTime<Utc> },

    #[error("Invalid escrow request: {message}")]
    InvalidRequest { message: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, EscrowError>;

impl From<EscrowError> for MissionError {
    fn from(err: EscrowError) -> Self {
        match err {
            EscrowError::Ledger(inner) => inner.into(),
            EscrowError::InvalidTransition { from, to } => {
                MissionError::InvalidTransition { from, to }
            }
            EscrowError::NotFound { mission_id } => MissionError::MissionNotFound { mission_id },
            other => MissionError::LedgerTransactionFailure {
                reason: other.to_string(),
            },
        }
    }
}

/// The escrow ledger as consumed by the coordinator and dispute manager
#[async_trait]
pub trait EscrowLedger: Send + Sync {
    /// Lock the mission budget from the client (`Pending`)
    async fn create_mission(&self, request: CreateEscrowRequest) -> Result<EscrowReceipt>;

    /// `Pending -> InProgress`
    async fn start_mission(&self, mission_id: &MissionId) -> Result<EscrowReceipt>;

    /// `InProgress -> Submitted`
    async fn submit_deliverable(&self, mission_id: &MissionId, reference: &str)
        -> Result<EscrowReceipt>;

    /// `InProgress -> Failed`, refunding the escrow
    async fn fail_mission(&self, mission_id: &MissionId, reason: &str) -> Result<EscrowReceipt>;

    /// `Submitted -> Completed`
    async fn approve_deliverable(&self, mission_id: &MissionId) -> Result<EscrowReceipt>;

    /// `Submitted -> Validating`, locking the client's stake
    async fn request_validation(
        &self,
        mission_id: &MissionId,
        request: ValidationStake,
    ) -> Result<EscrowReceipt>;

    /// `Validating -> Completed | Refunded`
    async fn resolve_validation(&self, mission_id: &MissionId, approved: bool)
        -> Result<EscrowReceipt>;

    /// `Submitted -> Disputed`, locking the client's bond
    async fn dispute_deliverable(&self, mission_id: &MissionId, claim: DisputeClaim)
        -> Result<EscrowReceipt>;

    /// `Disputed -> Resolved`, only after the challenge period
    async fn resolve_dispute(
        &self,
        mission_id: &MissionId,
        outcome: DisputeOutcome,
    ) -> Result<EscrowReceipt>;

    /// `Submitted -> AutoReleased`, only once the release window has elapsed
    async fn auto_release(&self, mission_id: &MissionId) -> Result<EscrowReceipt>;

    /// `Pending -> Cancelled`, refunding the escrow
    async fn cancel_mission(&self, mission_id: &MissionId) -> Result<EscrowReceipt>;

    async fn mission_status(&self, mission_id: &MissionId) -> Result<MissionStatus>;

    async fn mission_details(&self, mission_id: &MissionId) -> Result<EscrowRecord>;
}
