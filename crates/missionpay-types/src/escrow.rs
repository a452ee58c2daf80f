//! Mission escrow status machine
//!
//! ```text
//! Pending ──► InProgress ──► Submitted ──► Completed
//!    │            │              ├──────► Validating ──► Completed | Refunded
//!    ▼            ▼              ├──────► Disputed ────► Resolved
//! Cancelled     Failed           └──────► AutoReleased
//! ```
//!
//! The escrow ledger owns the authoritative copy; the coordinator mirrors it
//! client-side and both sides check transitions with the same table.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MissionError, Result};

/// Status of a mission and its escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    /// Funds locked, orchestration not started
    Pending,
    /// Agents are being driven by the coordinator
    InProgress,
    /// A deliverable reference has been posted
    Submitted,
    /// Client approved (or validator confirmed); funds released
    Completed,
    /// Independent validation requested with a stake
    Validating,
    /// Bonded dispute raised, awaiting resolution
    Disputed,
    /// Client inaction past the release window; funds released
    AutoReleased,
    /// Cancelled before orchestration began; funds refunded
    Cancelled,
    /// Orchestration failed; unspent escrow refunded
    Failed,
    /// Validator rejected the deliverable; escrow and stake refunded
    Refunded,
    /// Dispute resolved by proportional split
    Resolved,
}

impl MissionStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::AutoReleased
                | Self::Cancelled
                | Self::Failed
                | Self::Refunded
                | Self::Resolved
        )
    }

    /// Check if escrowed funds are still locked
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::InProgress | Self::Submitted | Self::Validating | Self::Disputed
        )
    }

    /// Legal transitions
    pub fn can_transition_to(&self, next: MissionStatus) -> bool {
        use MissionStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (InProgress, Submitted)
                | (InProgress, Failed)
                | (Submitted, Completed)
                | (Submitted, Validating)
                | (Submitted, Disputed)
                | (Submitted, AutoReleased)
                | (Validating, Completed)
                | (Validating, Refunded)
                | (Disputed, Resolved)
        )
    }

    /// Return `next` if the transition is legal
    pub fn transition(&self, next: MissionStatus) -> Result<MissionStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(MissionError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Validating => "validating",
            Self::Disputed => "disputed",
            Self::AutoReleased => "auto_released",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
