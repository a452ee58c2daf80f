//! missionpay Disputes - Validation and bonded disputes
//!
//! Invoked only when the client escalates a submitted deliverable instead of
//! approving it. Every outcome ends as a basis-point split of the escrow that
//! sums to 10000.

pub mod case;
pub mod manager;

pub use case::{DisputeCase, ValidationRequest, ValidationState};
pub use manager::{DisputeManager, DEFAULT_RETENTION_HOURS};

use chrono::{DateTime, Utc};
use missionpay_escrow::EscrowError;
use missionpay_types::MissionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisputeError {
    #[error("Validation {validation_id} not found")]
    ValidationNotFound { validation_id: String },

    #[error("Validation {validation_id} was already answered")]
    AlreadyAnswered { validation_id: String },

    #[error("No dispute for mission {mission_id}")]
    DisputeNotFound { mission_id: String },

    #[error("Assertion {assertion_id} is already settled")]
    AlreadySettled { assertion_id: String },

    #[error("Mission {mission_id} has no deliverable to check")]
    NoDeliverable { mission_id: String },

    #[error("Challenge period for mission {mission_id} runs until {ends_at}")]
    ChallengePeriodActive {
        mission_id: String,
        ends_at: DateTime<Utc>,
    },

    #[error("Escrow error: {0}")]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    Mission(#[from] MissionError),
}

pub type Result<T> = std::result::Result<T, DisputeError>;
