//! Validation requests and dispute cases tracked by the manager

use chrono::{DateTime, Utc};
use missionpay_escrow::DisputeOutcome;
use missionpay_types::{Amount, AssertionId, MissionId, Split, ValidationId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    /// Waiting for the validator
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Approved => f.write_str("approved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// A staked request for a third party to check a deliverable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub validation_id: ValidationId,
    pub mission_id: MissionId,
    pub validator: String,
    pub stake: Amount,
    /// SHA-256 of the deliverable reference the validator is asked about
    pub deliverable_hash: String,
    pub state: ValidationState,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    /// Set once the answer has been applied to the escrow
    pub finalized_at: Option<DateTime<Utc>>,
}

impl ValidationRequest {
    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }
}

/// A bonded assertion against a deliverable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeCase {
    pub assertion_id: AssertionId,
    pub mission_id: MissionId,
    pub reason: String,
    pub proposed_split: Split,
    pub bond: Amount,
    pub raised_at: DateTime<Utc>,
    pub challenge_ends_at: DateTime<Utc>,
    /// Outcome reported by the arbitration process, if the assertion was challenged
    pub settlement: Option<DisputeOutcome>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DisputeCase {
    /// The outcome `resolve` applies: the settlement, or the assertion as
    /// stated when nobody challenged it
    pub fn effective_outcome(&self) -> DisputeOutcome {
        self.settlement.unwrap_or(DisputeOutcome {
            upheld: true,
            split: self.proposed_split,
        })
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        now >= self.challenge_ends_at
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
