//! Escrow records, requests and receipts

use chrono::{DateTime, Utc};
use missionpay_types::{
    AccountId, AgentId, Amount, AssertionId, MissionId, MissionStatus, Split, TokenId, TxHash,
    ValidationId,
};
use serde::{Deserialize, Serialize};

/// An agent entitled to a share of the escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowPayee {
    pub agent_id: AgentId,
    pub account: AccountId,
    /// Contracted payment; weights the agent's share of splits
    pub amount: Amount,
}

/// Request to fund a mission's escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEscrowRequest {
    pub mission_id: MissionId,
    pub client: AccountId,
    pub token: TokenId,
    pub budget: Amount,
    pub payees: Vec<EscrowPayee>,
}

/// Confirmation of an escrow write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowReceipt {
    pub tx_hash: TxHash,
    /// Status after the write
    pub status: MissionStatus,
    pub confirmed_at: DateTime<Utc>,
}

/// Validation stake posted by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStake {
    pub validation_id: ValidationId,
    pub validator: String,
    pub stake: Amount,
    /// Hash of the deliverable under validation
    pub deliverable_hash: String,
}

/// A bonded claim against a submitted deliverable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeClaim {
    pub assertion_id: AssertionId,
    pub reason: String,
    /// Split the client asserts is fair
    pub proposed_split: Split,
    pub bond: Amount,
}

/// Dispute as recorded on the escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub claim: DisputeClaim,
    pub raised_at: DateTime<Utc>,
    pub challenge_ends_at: DateTime<Utc>,
}

/// Result of the external resolution process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeOutcome {
    /// Whether the client's claim stands
    pub upheld: bool,
    pub split: Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    AgentRelease,
    ClientRefund,
    StakeReturn,
    StakeForfeit,
    BondReturn,
    BondForfeit,
}

/// A payout made from escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub account: AccountId,
    pub amount: Amount,
    pub kind: DistributionKind,
}

/// Full escrow state of one mission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub mission_id: MissionId,
    pub client: AccountId,
    pub token: TokenId,
    pub budget: Amount,
    pub payees: Vec<EscrowPayee>,
    pub status: MissionStatus,
    pub deliverable: Option<String>,
    pub failure_reason: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub validation: Option<ValidationStake>,
    pub dispute: Option<DisputeRecord>,
    pub distributions: Vec<Distribution>,
    pub receipts: Vec<EscrowReceipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowRecord {
    /// Sum of contracted payments
    pub fn contracted_total(&self) -> Amount {
        Amount(self.payees.iter().map(|p| p.amount.0).sum())
    }

    /// Total paid out to `account` so far
    pub fn distributed_to(&self, account: &AccountId) -> Amount {
        Amount(
            self.distributions
                .iter()
                .filter(|d| &d.account == account)
                .map(|d| d.amount.0)
                .sum(),
        )
    }

    /// Total paid out of escrow, stakes and bonds included
    pub fn distributed_total(&self) -> Amount {
        Amount(self.distributions.iter().map(|d| d.amount.0).sum())
    }
}
