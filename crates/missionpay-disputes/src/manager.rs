//! Dispute / validation manager
//!
//! Escalations after a deliverable is submitted:
//!
//! - Validation: the client stakes on an independent check of the deliverable
//!   hash. The validator answers later; `poll_validation` applies the answer to
//!   the escrow once it is in.
//! - Dispute: the client posts a bonded assertion with a proposed split. After
//!   the challenge period `resolve` applies the arbitration settlement, or the
//!   assertion as stated when it went unchallenged.
//!
//! Finished cases stay queryable for a retention window and are pruned when
//! new escalations arrive.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use missionpay_escrow::{
    DisputeClaim, DisputeOutcome, EscrowLedger, EscrowReceipt, ValidationStake,
};
use missionpay_types::{
    hash_sha256, Amount, AssertionId, MissionId, SharedClock, Split, ValidationId,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::case::{DisputeCase, ValidationRequest, ValidationState};
use crate::{DisputeError, Result};

/// How long finalized validations and resolved disputes are kept
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

pub struct DisputeManager {
    escrow: Arc<dyn EscrowLedger>,
    clock: SharedClock,
    retention: Duration,
    validations: RwLock<HashMap<ValidationId, ValidationRequest>>,
    disputes: RwLock<HashMap<MissionId, DisputeCase>>,
}

impl DisputeManager {
    pub fn new(escrow: Arc<dyn EscrowLedger>, clock: SharedClock) -> Self {
        Self {
            escrow,
            clock,
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
            validations: RwLock::new(HashMap::new()),
            disputes: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Drop cases that finished longer ago than the retention window
    ///
    /// Pending validations and unresolved disputes are never pruned.
    pub async fn prune_finished(&self) -> usize {
        let cutoff = self.clock.now() - self.retention;
        let expired = |finished: Option<chrono::DateTime<chrono::Utc>>| {
            finished.map_or(false, |at| at <= cutoff)
        };

        let mut validations = self.validations.write().await;
        let before = validations.len();
        validations.retain(|_, request| !expired(request.finalized_at));
        let mut pruned = before - validations.len();
        drop(validations);

        let mut disputes = self.disputes.write().await;
        let before = disputes.len();
        disputes.retain(|_, case| !expired(case.resolved_at));
        pruned += before - disputes.len();

        if pruned > 0 {
            debug!(pruned, "Pruned finished escalations");
        }
        pruned
    }

    /// Stake on an independent check of the submitted deliverable
    pub async fn request_validation(
        &self,
        mission_id: &MissionId,
        validator: impl Into<String>,
        stake: Amount,
    ) -> Result<ValidationId> {
        self.prune_finished().await;
        let details = self.escrow.mission_details(mission_id).await?;
        let reference = details
            .deliverable
            .ok_or_else(|| DisputeError::NoDeliverable {
                mission_id: mission_id.to_string(),
            })?;

        let validation_id = ValidationId::new();
        let validator = validator.into();
        let deliverable_hash = hash_sha256(reference.as_bytes());
        self.escrow
            .request_validation(
                mission_id,
                ValidationStake {
                    validation_id: validation_id.clone(),
                    validator: validator.clone(),
                    stake,
                    deliverable_hash: deliverable_hash.clone(),
                },
            )
            .await?;

        info!(
            mission_id = %mission_id,
            validation_id = %validation_id,
            validator = %validator,
            stake = %stake,
            "Validation requested"
        );
        self.validations.write().await.insert(
            validation_id.clone(),
            ValidationRequest {
                validation_id: validation_id.clone(),
                mission_id: mission_id.clone(),
                validator,
                stake,
                deliverable_hash,
                state: ValidationState::Pending,
                requested_at: self.clock.now(),
                responded_at: None,
                finalized_at: None,
            },
        );
        Ok(validation_id)
    }

    /// The validator's answer; applied to the escrow on the next poll
    pub async fn record_validation_response(
        &self,
        validation_id: &ValidationId,
        approved: bool,
    ) -> Result<()> {
        let mut validations = self.validations.write().await;
        let request = validations
            .get_mut(validation_id)
            .ok_or_else(|| DisputeError::ValidationNotFound {
                validation_id: validation_id.to_string(),
            })?;
        if request.state != ValidationState::Pending {
            return Err(DisputeError::AlreadyAnswered {
                validation_id: validation_id.to_string(),
            });
        }

        request.state = if approved {
            ValidationState::Approved
        } else {
            ValidationState::Rejected
        };
        request.responded_at = Some(self.clock.now());
        Ok(())
    }

    /// Current state of a validation, applying an arrived answer to the escrow
    pub async fn poll_validation(&self, validation_id: &ValidationId) -> Result<ValidationState> {
        let mut validations = self.validations.write().await;
        let request = validations
            .get_mut(validation_id)
            .ok_or_else(|| DisputeError::ValidationNotFound {
                validation_id: validation_id.to_string(),
            })?;

        if request.state == ValidationState::Pending || request.is_finalized() {
            return Ok(request.state);
        }

        let approved = request.state == ValidationState::Approved;
        let receipt = self
            .escrow
            .resolve_validation(&request.mission_id, approved)
            .await?;
        request.finalized_at = Some(self.clock.now());
        info!(
            mission_id = %request.mission_id,
            validation_id = %validation_id,
            outcome = %request.state,
            status = %receipt.status,
            "Validation applied"
        );
        Ok(request.state)
    }

    pub async fn validation(&self, validation_id: &ValidationId) -> Option<ValidationRequest> {
        self.validations.read().await.get(validation_id).cloned()
    }

    /// Post a bonded assertion; resolution waits out the challenge period
    pub async fn dispute_deliverable(
        &self,
        mission_id: &MissionId,
        reason: impl Into<String>,
        proposed_split: Split,
        bond: Amount,
    ) -> Result<AssertionId> {
        self.prune_finished().await;
        let proposed_split = Split::new(proposed_split.client_bps, proposed_split.agent_bps)?;
        let assertion_id = AssertionId::new();
        let reason = reason.into();
        self.escrow
            .dispute_deliverable(
                mission_id,
                DisputeClaim {
                    assertion_id: assertion_id.clone(),
                    reason: reason.clone(),
                    proposed_split,
                    bond,
                },
            )
            .await?;

        let details = self.escrow.mission_details(mission_id).await?;
        let (raised_at, challenge_ends_at) = match details.dispute {
            Some(record) => (record.raised_at, record.challenge_ends_at),
            None => {
                return Err(DisputeError::DisputeNotFound {
                    mission_id: mission_id.to_string(),
                })
            }
        };

        info!(
            mission_id = %mission_id,
            assertion_id = %assertion_id,
            bond = %bond,
            challenge_ends_at = %challenge_ends_at,
            "Dispute asserted"
        );
        self.disputes.write().await.insert(
            mission_id.clone(),
            DisputeCase {
                assertion_id: assertion_id.clone(),
                mission_id: mission_id.clone(),
                reason,
                proposed_split,
                bond,
                raised_at,
                challenge_ends_at,
                settlement: None,
                resolved_at: None,
            },
        );
        Ok(assertion_id)
    }

    /// Outcome of the arbitration process for a challenged assertion
    pub async fn settle_assertion(
        &self,
        mission_id: &MissionId,
        outcome: DisputeOutcome,
    ) -> Result<()> {
        Split::new(outcome.split.client_bps, outcome.split.agent_bps)?;

        let mut disputes = self.disputes.write().await;
        let case = disputes
            .get_mut(mission_id)
            .ok_or_else(|| DisputeError::DisputeNotFound {
                mission_id: mission_id.to_string(),
            })?;
        if case.is_resolved() || case.settlement.is_some() {
            return Err(DisputeError::AlreadySettled {
                assertion_id: case.assertion_id.to_string(),
            });
        }
        case.settlement = Some(outcome);
        Ok(())
    }

    /// Whether `resolve` can run now
    pub async fn resolution_ready(&self, mission_id: &MissionId) -> bool {
        let now = self.clock.now();
        self.disputes
            .read()
            .await
            .get(mission_id)
            .map(|case| !case.is_resolved() && case.is_ready(now))
            .unwrap_or(false)
    }

    /// Apply the dispute outcome to the escrow
    pub async fn resolve(&self, mission_id: &MissionId) -> Result<EscrowReceipt> {
        let mut disputes = self.disputes.write().await;
        let case = disputes
            .get_mut(mission_id)
            .ok_or_else(|| DisputeError::DisputeNotFound {
                mission_id: mission_id.to_string(),
            })?;
        if case.is_resolved() {
            return Err(DisputeError::AlreadySettled {
                assertion_id: case.assertion_id.to_string(),
            });
        }
        if !case.is_ready(self.clock.now()) {
            return Err(DisputeError::ChallengePeriodActive {
                mission_id: mission_id.to_string(),
                ends_at: case.challenge_ends_at,
            });
        }

        let outcome = case.effective_outcome();
        let receipt = match self.escrow.resolve_dispute(mission_id, outcome).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(mission_id = %mission_id, error = %err, "Dispute resolution failed");
                return Err(err.into());
            }
        };
        case.resolved_at = Some(self.clock.now());
        info!(
            mission_id = %mission_id,
            upheld = outcome.upheld,
            client_bps = outcome.split.client_bps,
            agent_bps = outcome.split.agent_bps,
            "Dispute resolved"
        );
        Ok(receipt)
    }

    pub async fn dispute(&self, mission_id: &MissionId) -> Option<DisputeCase> {
        self.disputes.read().await.get(mission_id).cloned()
    }
}
