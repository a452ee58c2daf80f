//! In-memory escrow ledger over the double-entry token ledger
//!
//! All escrowed budgets, stakes and bonds sit in a single vault account;
//! each mission's record tracks what it owns and what it has paid out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use missionpay_ledger::{EntryReason, Ledger, LedgerError};
use missionpay_types::{
    pro_rata, AccountId, Amount, MissionId, MissionStatus, SharedClock, Split, TxHash,
    BPS_DENOMINATOR,
};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::{
    CreateEscrowRequest, DisputeClaim, DisputeOutcome, DisputeRecord, Distribution,
    DistributionKind, EscrowError, EscrowLedger, EscrowReceipt, EscrowRecord, Result,
    ValidationStake,
};

/// Default window after submission before funds auto-release
pub const DEFAULT_AUTO_RELEASE_WINDOW_HOURS: i64 = 48;

/// Default challenge period for bonded disputes
pub const DEFAULT_CHALLENGE_PERIOD_HOURS: i64 = 2;

/// Escrow ledger backed by [`Ledger`]
#[derive(Clone)]
pub struct InMemoryEscrowLedger {
    ledger: Ledger,
    clock: SharedClock,
    vault: AccountId,
    auto_release_window: Duration,
    challenge_period: Duration,
    records: Arc<RwLock<HashMap<MissionId, EscrowRecord>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryEscrowLedger {
    pub fn new(ledger: Ledger, clock: SharedClock) -> Self {
        Self {
            ledger,
            clock,
            vault: AccountId::new("escrow-vault"),
            auto_release_window: Duration::hours(DEFAULT_AUTO_RELEASE_WINDOW_HOURS),
            challenge_period: Duration::hours(DEFAULT_CHALLENGE_PERIOD_HOURS),
            records: Arc::new(RwLock::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_auto_release_window(mut self, window: Duration) -> Self {
        self.auto_release_window = window;
        self
    }

    pub fn with_challenge_period(mut self, period: Duration) -> Self {
        self.challenge_period = period;
        self
    }

    pub fn with_vault(mut self, vault: AccountId) -> Self {
        self.vault = vault;
        self
    }

    /// Account holding all escrowed funds
    pub fn vault(&self) -> &AccountId {
        &self.vault
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Stamp a confirmed write on the record
    fn confirm(&self, record: &mut EscrowRecord, operation: &str) -> EscrowReceipt {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(record.mission_id.to_string().as_bytes());
        hasher.update(operation.as_bytes());
        hasher.update(seq.to_be_bytes());

        let now = self.clock.now();
        let receipt = EscrowReceipt {
            tx_hash: TxHash::from_digest(&hasher.finalize().into()),
            status: record.status,
            confirmed_at: now,
        };
        record.updated_at = now;
        record.receipts.push(receipt.clone());

        info!(
            mission_id = %record.mission_id,
            status = %record.status,
            tx_hash = %receipt.tx_hash,
            operation,
            "Escrow write confirmed"
        );
        receipt
    }

    /// Move funds from the client into the vault
    async fn lock(
        &self,
        record: &EscrowRecord,
        amount: Amount,
        reason: EntryReason,
    ) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.ledger
            .transfer(
                &record.client,
                &self.vault,
                &record.token,
                amount,
                reason,
                record.mission_id.to_string(),
            )
            .await?;
        Ok(())
    }

    /// Pay every planned distribution out of the vault, or none of them
    ///
    /// The vault must cover the whole plan before the first transfer. If a
    /// later leg still fails, the legs already paid are moved back.
    async fn distribute(&self, record: &mut EscrowRecord, plan: Vec<Distribution>) -> Result<()> {
        let plan: Vec<Distribution> = plan.into_iter().filter(|d| !d.amount.is_zero()).collect();
        let total = Amount::sum(plan.iter().map(|d| &d.amount)).ok_or_else(|| {
            EscrowError::InvalidRequest {
                message: "payout total overflows".to_string(),
            }
        })?;
        let available = self.ledger.balance(&self.vault, &record.token).await;
        if available < total {
            return Err(LedgerError::InsufficientBalance {
                available: available.0,
                required: total.0,
            }
            .into());
        }

        for (index, payout) in plan.iter().enumerate() {
            let moved = self
                .ledger
                .transfer(
                    &self.vault,
                    &payout.account,
                    &record.token,
                    payout.amount,
                    entry_reason(record, payout.kind),
                    record.mission_id.to_string(),
                )
                .await;
            if let Err(err) = moved {
                warn!(
                    mission_id = %record.mission_id,
                    account = %payout.account,
                    amount = %payout.amount,
                    error = %err,
                    "Escrow payout failed, reversing earlier legs"
                );
                self.reverse(record, &plan[..index]).await;
                return Err(err.into());
            }
        }
        record.distributions.extend(plan);
        Ok(())
    }

    async fn reverse(&self, record: &EscrowRecord, paid: &[Distribution]) {
        for payout in paid.iter().rev() {
            let reversed = self
                .ledger
                .transfer(
                    &payout.account,
                    &self.vault,
                    &record.token,
                    payout.amount,
                    EntryReason::PayoutReversal {
                        mission_id: record.mission_id.to_string(),
                    },
                    record.mission_id.to_string(),
                )
                .await;
            if let Err(err) = reversed {
                error!(
                    mission_id = %record.mission_id,
                    account = %payout.account,
                    amount = %payout.amount,
                    error = %err,
                    "Could not reverse escrow payout"
                );
            }
        }
    }
}

fn entry_reason(record: &EscrowRecord, kind: DistributionKind) -> EntryReason {
    let mission_id = record.mission_id.to_string();
    match kind {
        DistributionKind::AgentRelease => EntryReason::EscrowRelease { mission_id },
        DistributionKind::ClientRefund => EntryReason::EscrowRefund { mission_id },
        DistributionKind::StakeReturn | DistributionKind::BondReturn => {
            EntryReason::StakeReturn { mission_id }
        }
        DistributionKind::StakeForfeit | DistributionKind::BondForfeit => {
            EntryReason::StakeForfeit { mission_id }
        }
    }
}

fn payout(account: &AccountId, amount: Amount, kind: DistributionKind) -> Distribution {
    Distribution {
        account: account.clone(),
        amount,
        kind,
    }
}

/// Share `total` across agents pro rata to their contracted payments
fn agent_shares(record: &EscrowRecord, total: Amount, kind: DistributionKind) -> Vec<Distribution> {
    let mut weights: Vec<Amount> = record.payees.iter().map(|p| p.amount).collect();
    if weights.iter().all(|w| w.is_zero()) {
        weights = vec![Amount(1); weights.len()];
    }
    record
        .payees
        .iter()
        .zip(pro_rata(total, &weights))
        .map(|(p, share)| payout(&p.account, share, kind))
        .collect()
}

/// Contracted amounts to agents, surplus back to the client
fn release_plan(record: &EscrowRecord) -> Vec<Distribution> {
    let mut plan: Vec<Distribution> = record
        .payees
        .iter()
        .map(|p| payout(&p.account, p.amount, DistributionKind::AgentRelease))
        .collect();
    let surplus = record.budget.saturating_sub(record.contracted_total());
    plan.push(payout(&record.client, surplus, DistributionKind::ClientRefund));
    plan
}

fn refund_plan(record: &EscrowRecord) -> Vec<Distribution> {
    vec![payout(&record.client, record.budget, DistributionKind::ClientRefund)]
}

fn check_transition(record: &EscrowRecord, next: MissionStatus) -> Result<()> {
    if record.status.can_transition_to(next) {
        Ok(())
    } else {
        warn!(
            mission_id = %record.mission_id,
            from = %record.status,
            to = %next,
            "Rejected escrow transition"
        );
        Err(EscrowError::InvalidTransition {
            from: record.status,
            to: next,
        })
    }
}

fn not_found(mission_id: &MissionId) -> EscrowError {
    EscrowError::NotFound {
        mission_id: mission_id.to_string(),
    }
}

#[async_trait]
impl EscrowLedger for InMemoryEscrowLedger {
    async fn create_mission(&self, request: CreateEscrowRequest) -> Result<EscrowReceipt> {
        if request.budget.is_zero() {
            return Err(EscrowError::InvalidRequest {
                message: "budget must be greater than zero".to_string(),
            });
        }
        if request.payees.is_empty() {
            return Err(EscrowError::InvalidRequest {
                message: "escrow needs at least one payee".to_string(),
            });
        }
        let contracted = Amount::sum(request.payees.iter().map(|p| &p.amount));
        if contracted.map_or(true, |c| c > request.budget) {
            return Err(EscrowError::InvalidRequest {
                message: format!("contracted payments exceed budget {}", request.budget),
            });
        }

        let mut records = self.records.write().await;
        if records.contains_key(&request.mission_id) {
            return Err(EscrowError::AlreadyExists {
                mission_id: request.mission_id.to_string(),
            });
        }

        let now = self.clock.now();
        let mut record = EscrowRecord {
            mission_id: request.mission_id.clone(),
            client: request.client,
            token: request.token,
            budget: request.budget,
            payees: request.payees,
            status: MissionStatus::Pending,
            deliverable: None,
            failure_reason: None,
            submitted_at: None,
            validation: None,
            dispute: None,
            distributions: Vec::new(),
            receipts: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.lock(
            &record,
            record.budget,
            EntryReason::EscrowLock {
                mission_id: record.mission_id.to_string(),
            },
        )
        .await?;

        let receipt = self.confirm(&mut record, "create");
        records.insert(request.mission_id, record);
        Ok(receipt)
    }

    async fn start_mission(&self, mission_id: &MissionId) -> Result<EscrowReceipt> {
        let mut records = self.records.write().await;
        let record = records.get_mut(mission_id).ok_or_else(|| not_found(mission_id))?;
        check_transition(record, MissionStatus::InProgress)?;
        record.status = MissionStatus::InProgress;
        Ok(self.confirm(record, "start"))
    }

    async fn submit_deliverable(
        &self,
        mission_id: &MissionId,
        reference: &str,
    ) -> Result<EscrowReceipt> {
        let mut records = self.records.write().await;
        let record = records.get_mut(mission_id).ok_or_else(|| not_found(mission_id))?;
        check_transition(record, MissionStatus::Submitted)?;
        record.status = MissionStatus::Submitted;
        record.deliverable = Some(reference.to_string());
        record.submitted_at = Some(self.clock.now());
        Ok(self.confirm(record, "submit"))
    }

    async fn fail_mission(&self, mission_id: &MissionId, reason: &str) -> Result<EscrowReceipt> {
        let mut records = self.records.write().await;
        let record = records.get_mut(mission_id).ok_or_else(|| not_found(mission_id))?;
        check_transition(record, MissionStatus::Failed)?;
        self.distribute(record, refund_plan(record)).await?;
        record.status = MissionStatus::Failed;
        record.failure_reason = Some(reason.to_string());
        Ok(self.confirm(record, "fail"))
    }

    async fn approve_deliverable(&self, mission_id: &MissionId) -> Result<EscrowReceipt> {
        let mut records = self.records.write().await;
        let record = records.get_mut(mission_id).ok_or_else(|| not_found(mission_id))?;
        check_transition(record, MissionStatus::Completed)?;
        self.distribute(record, release_plan(record)).await?;
        record.status = MissionStatus::Completed;
        Ok(self.confirm(record, "approve"))
    }

    async fn request_validation(
        &self,
        mission_id: &MissionId,
        request: ValidationStake,
    ) -> Result<EscrowReceipt> {
        let mut records = self.records.write().await;
        let record = records.get_mut(mission_id).ok_or_else(|| not_found(mission_id))?;
        check_transition(record, MissionStatus::Validating)?;
        self.lock(
            record,
            request.stake,
            EntryReason::StakeLock {
                mission_id: mission_id.to_string(),
            },
        )
        .await?;
        record.status = MissionStatus::Validating;
        record.validation = Some(request);
        Ok(self.confirm(record, "request_validation"))
    }

    async fn resolve_validation(
        &self,
        mission_id: &MissionId,
        approved: bool,
    ) -> Result<EscrowReceipt> {
        let mut records = self.records.write().await;
        let record = records.get_mut(mission_id).ok_or_else(|| not_found(mission_id))?;
        let next = if approved {
            MissionStatus::Completed
        } else {
            MissionStatus::Refunded
        };
        check_transition(record, next)?;

        let stake = record
            .validation
            .as_ref()
            .map(|v| v.stake)
            .unwrap_or(Amount::zero());
        let mut plan;
        if approved {
            plan = release_plan(record);
            plan.extend(agent_shares(record, stake, DistributionKind::StakeForfeit));
        } else {
            plan = refund_plan(record);
            plan.push(payout(&record.client, stake, DistributionKind::StakeReturn));
        }
        self.distribute(record, plan).await?;
        record.status = next;
        Ok(self.confirm(record, "resolve_validation"))
    }

    async fn dispute_deliverable(
        &self,
        mission_id: &MissionId,
        claim: DisputeClaim,
    ) -> Result<EscrowReceipt> {
        let mut records = self.records.write().await;
        let record = records.get_mut(mission_id).ok_or_else(|| not_found(mission_id))?;
        check_transition(record, MissionStatus::Disputed)?;
        self.lock(
            record,
            claim.bond,
            EntryReason::StakeLock {
                mission_id: mission_id.to_string(),
            },
        )
        .await?;

        let raised_at = self.clock.now();
        record.status = MissionStatus::Disputed;
        record.dispute = Some(DisputeRecord {
            claim,
            raised_at,
            challenge_ends_at: raised_at + self.challenge_period,
        });
        Ok(self.confirm(record, "dispute"))
    }

    async fn resolve_dispute(
        &self,
        mission_id: &MissionId,
        outcome: DisputeOutcome,
    ) -> Result<EscrowReceipt> {
        let Split {
            client_bps,
            agent_bps,
        } = outcome.split;
        if u32::from(client_bps) + u32::from(agent_bps) != u32::from(BPS_DENOMINATOR) {
            return Err(EscrowError::InvalidRequest {
                message: format!("split {client_bps}/{agent_bps} does not sum to 10000 bps"),
            });
        }

        let mut records = self.records.write().await;
        let record = records.get_mut(mission_id).ok_or_else(|| not_found(mission_id))?;
        check_transition(record, MissionStatus::Resolved)?;

        let (bond, challenge_ends_at) = match &record.dispute {
            Some(dispute) => (dispute.claim.bond, dispute.challenge_ends_at),
            None => {
                return Err(EscrowError::InvalidRequest {
                    message: "disputed escrow has no dispute record".to_string(),
                })
            }
        };
        if self.clock.now() < challenge_ends_at {
            return Err(EscrowError::ChallengePeriodActive {
                ends_at: challenge_ends_at,
            });
        }

        let mut plan;
        if outcome.upheld {
            let (client_share, agent_share) = outcome.split.apply(record.budget);
            plan = vec![
                payout(&record.client, bond, DistributionKind::BondReturn),
                payout(&record.client, client_share, DistributionKind::ClientRefund),
            ];
            plan.extend(agent_shares(record, agent_share, DistributionKind::AgentRelease));
        } else {
            plan = agent_shares(record, bond, DistributionKind::BondForfeit);
            plan.extend(agent_shares(record, record.budget, DistributionKind::AgentRelease));
        }
        self.distribute(record, plan).await?;

        info!(
            mission_id = %mission_id,
            upheld = outcome.upheld,
            client_bps,
            agent_bps,
            "Dispute resolved"
        );
        record.status = MissionStatus::Resolved;
        Ok(self.confirm(record, "resolve_dispute"))
    }

    async fn auto_release(&self, mission_id: &MissionId) -> Result<EscrowReceipt> {
        let mut records = self.records.write().await;
        let record = records.get_mut(mission_id).ok_or_else(|| not_found(mission_id))?;
        check_transition(record, MissionStatus::AutoReleased)?;

        let submitted_at = record.submitted_at.ok_or_else(|| EscrowError::InvalidRequest {
            message: "submitted escrow has no submission time".to_string(),
        })?;
        let due_at = submitted_at + self.auto_release_window;
        if self.clock.now() < due_at {
            return Err(EscrowError::AutoReleaseNotDue { due_at });
        }

        self.distribute(record, release_plan(record)).await?;
        record.status = MissionStatus::AutoReleased;
        Ok(self.confirm(record, "auto_release"))
    }

    async fn cancel_mission(&self, mission_id: &MissionId) -> Result<EscrowReceipt> {
        let mut records = self.records.write().await;
        let record = records.get_mut(mission_id).ok_or_else(|| not_found(mission_id))?;
        check_transition(record, MissionStatus::Cancelled)?;
        self.distribute(record, refund_plan(record)).await?;
        record.status = MissionStatus::Cancelled;
        Ok(self.confirm(record, "cancel"))
    }

    async fn mission_status(&self, mission_id: &MissionId) -> Result<MissionStatus> {
        let records = self.records.read().await;
        records
            .get(mission_id)
            .map(|r| r.status)
            .ok_or_else(|| not_found(mission_id))
    }

    async fn mission_details(&self, mission_id: &MissionId) -> Result<EscrowRecord> {
        let records = self.records.read().await;
        records
            .get(mission_id)
            .cloned()
            .ok_or_else(|| not_found(mission_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EscrowPayee;
    use missionpay_types::{AgentId, AssertionId, ManualClock, TokenId, ValidationId};

    struct Fixture {
        escrow: InMemoryEscrowLedger,
        clock: Arc<ManualClock>,
        client: AccountId,
        agents: Vec<AccountId>,
    }

    impl Fixture {
        async fn balance(&self, account: &AccountId) -> Amount {
            self.escrow.ledger().balance(account, &TokenId::usdc()).await
        }
    }

    async fn fixture() -> Fixture {
        let ledger = Ledger::new();
        let client = AccountId::new("0xclient");
        ledger
            .deposit(&client, &TokenId::usdc(), Amount(1_000), "faucet")
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::default());
        let escrow = InMemoryEscrowLedger::new(ledger, clock.clone());
        Fixture {
            escrow,
            clock,
            client,
            agents: vec![AccountId::new("0xagent-a"), AccountId::new("0xagent-b")],
        }
    }

    fn request(f: &Fixture, budget: u64, payments: [u64; 2]) -> CreateEscrowRequest {
        CreateEscrowRequest {
            mission_id: MissionId::new(),
            client: f.client.clone(),
            token: TokenId::usdc(),
            budget: Amount(budget),
            payees: f
                .agents
                .iter()
                .zip(payments)
                .map(|(account, amount)| EscrowPayee {
                    agent_id: AgentId::new(),
                    account: account.clone(),
                    amount: Amount(amount),
                })
                .collect(),
        }
    }

    async fn submitted(f: &Fixture, budget: u64, payments: [u64; 2]) -> MissionId {
        let req = request(f, budget, payments);
        let id = req.mission_id.clone();
        f.escrow.create_mission(req).await.unwrap();
        f.escrow.start_mission(&id).await.unwrap();
        f.escrow.submit_deliverable(&id, "ipfs://deliverable").await.unwrap();
        id
    }

    fn claim(client_bps: u16, agent_bps: u16, bond: u64) -> DisputeClaim {
        DisputeClaim {
            assertion_id: AssertionId::new(),
            reason: "deliverable incomplete".to_string(),
            proposed_split: Split::new(client_bps, agent_bps).unwrap(),
            bond: Amount(bond),
        }
    }

    #[tokio::test]
    async fn test_create_locks_budget() {
        let f = fixture().await;
        let req = request(&f, 20, [8, 8]);
        let id = req.mission_id.clone();

        let receipt = f.escrow.create_mission(req).await.unwrap();
        assert_eq!(receipt.status, MissionStatus::Pending);
        assert_eq!(f.balance(&f.client).await, Amount(980));
        assert_eq!(f.balance(f.escrow.vault()).await, Amount(20));
        assert_eq!(f.escrow.mission_status(&id).await.unwrap(), MissionStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_rejects_unfunded_client() {
        let f = fixture().await;
        let req = request(&f, 5_000, [8, 8]);
        let id = req.mission_id.clone();

        let result = f.escrow.create_mission(req).await;
        assert!(matches!(result, Err(EscrowError::Ledger(_))));
        assert!(matches!(
            f.escrow.mission_status(&id).await,
            Err(EscrowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_approve_releases_contracted_and_returns_surplus() {
        let f = fixture().await;
        let id = submitted(&f, 20, [8, 8]).await;

        f.escrow.approve_deliverable(&id).await.unwrap();

        assert_eq!(f.balance(&f.agents[0]).await, Amount(8));
        assert_eq!(f.balance(&f.agents[1]).await, Amount(8));
        assert_eq!(f.balance(&f.client).await, Amount(984));
        assert_eq!(f.balance(f.escrow.vault()).await, Amount::zero());
        assert_eq!(
            f.escrow.mission_status(&id).await.unwrap(),
            MissionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_failed_release_leg_reverses_earlier_legs() {
        let f = fixture().await;
        let id = submitted(&f, 100, [60, 40]).await;
        f.escrow
            .ledger()
            .deposit(&f.agents[1], &TokenId::usdc(), Amount(u64::MAX - 10), "whale")
            .await
            .unwrap();

        let result = f.escrow.approve_deliverable(&id).await;
        assert!(matches!(
            result,
            Err(EscrowError::Ledger(LedgerError::InvalidAmount { .. }))
        ));

        assert_eq!(f.balance(&f.agents[0]).await, Amount::zero());
        assert_eq!(f.balance(&f.agents[1]).await, Amount(u64::MAX - 10));
        assert_eq!(f.balance(f.escrow.vault()).await, Amount(100));
        let record = f.escrow.mission_details(&id).await.unwrap();
        assert_eq!(record.status, MissionStatus::Submitted);
        assert!(record.distributions.is_empty());

        let entries = f.escrow.ledger().account_entries(&f.agents[0]).await;
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[1].reason, EntryReason::PayoutReversal { .. }));

        // a retry neither double pays nor changes state
        assert!(f.escrow.approve_deliverable(&id).await.is_err());
        assert_eq!(f.balance(&f.agents[0]).await, Amount::zero());
        assert_eq!(f.balance(f.escrow.vault()).await, Amount(100));
    }

    #[tokio::test]
    async fn test_no_illegal_jumps() {
        let f = fixture().await;
        let req = request(&f, 20, [8, 8]);
        let id = req.mission_id.clone();
        f.escrow.create_mission(req).await.unwrap();

        let result = f.escrow.approve_deliverable(&id).await;
        assert!(matches!(result, Err(EscrowError::InvalidTransition { .. })));
        let result = f.escrow.submit_deliverable(&id, "early").await;
        assert!(matches!(result, Err(EscrowError::InvalidTransition { .. })));

        f.escrow.start_mission(&id).await.unwrap();
        let result = f.escrow.cancel_mission(&id).await;
        assert!(matches!(result, Err(EscrowError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_auto_release_only_after_window() {
        let f = fixture().await;
        let id = submitted(&f, 16, [8, 8]).await;

        f.clock.advance(Duration::hours(47));
        let result = f.escrow.auto_release(&id).await;
        assert!(matches!(result, Err(EscrowError::AutoReleaseNotDue { .. })));

        f.clock.advance(Duration::hours(2));
        let receipt = f.escrow.auto_release(&id).await.unwrap();
        assert_eq!(receipt.status, MissionStatus::AutoReleased);
        assert_eq!(f.balance(&f.agents[0]).await, Amount(8));
        assert_eq!(f.balance(&f.agents[1]).await, Amount(8));
    }

    #[tokio::test]
    async fn test_auto_release_requires_submitted() {
        let f = fixture().await;
        let req = request(&f, 16, [8, 8]);
        let id = req.mission_id.clone();
        f.escrow.create_mission(req).await.unwrap();
        f.escrow.start_mission(&id).await.unwrap();

        f.clock.advance(Duration::hours(100));
        let result = f.escrow.auto_release(&id).await;
        assert!(matches!(result, Err(EscrowError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_upheld_dispute_splits_and_returns_bond() {
        let f = fixture().await;
        let id = submitted(&f, 100, [50, 50]).await;

        f.escrow
            .dispute_deliverable(&id, claim(7_000, 3_000, 10))
            .await
            .unwrap();
        assert_eq!(f.balance(&f.client).await, Amount(890));

        let outcome = DisputeOutcome {
            upheld: true,
            split: Split::new(7_000, 3_000).unwrap(),
        };
        let result = f.escrow.resolve_dispute(&id, outcome).await;
        assert!(matches!(result, Err(EscrowError::ChallengePeriodActive { .. })));

        f.clock.advance(Duration::hours(2));
        f.escrow.resolve_dispute(&id, outcome).await.unwrap();

        assert_eq!(f.balance(&f.client).await, Amount(970));
        assert_eq!(f.balance(&f.agents[0]).await, Amount(15));
        assert_eq!(f.balance(&f.agents[1]).await, Amount(15));
        assert_eq!(f.balance(f.escrow.vault()).await, Amount::zero());

        let record = f.escrow.mission_details(&id).await.unwrap();
        assert_eq!(record.status, MissionStatus::Resolved);
        assert_eq!(record.distributed_total(), Amount(110));
    }

    #[tokio::test]
    async fn test_rejected_dispute_forfeits_bond() {
        let f = fixture().await;
        let id = submitted(&f, 100, [50, 50]).await;

        f.escrow
            .dispute_deliverable(&id, claim(10_000, 0, 10))
            .await
            .unwrap();
        f.clock.advance(Duration::hours(3));
        f.escrow
            .resolve_dispute(
                &id,
                DisputeOutcome {
                    upheld: false,
                    split: Split::all_to_agents(),
                },
            )
            .await
            .unwrap();

        assert_eq!(f.balance(&f.client).await, Amount(890));
        assert_eq!(f.balance(&f.agents[0]).await, Amount(55));
        assert_eq!(f.balance(&f.agents[1]).await, Amount(55));
    }

    #[tokio::test]
    async fn test_invalid_split_is_rejected() {
        let f = fixture().await;
        let id = submitted(&f, 100, [50, 50]).await;
        f.escrow
            .dispute_deliverable(&id, claim(5_000, 5_000, 0))
            .await
            .unwrap();
        f.clock.advance(Duration::hours(3));

        let outcome = DisputeOutcome {
            upheld: true,
            split: Split {
                client_bps: 6_000,
                agent_bps: 6_000,
            },
        };
        let result = f.escrow.resolve_dispute(&id, outcome).await;
        assert!(matches!(result, Err(EscrowError::InvalidRequest { .. })));
        assert_eq!(
            f.escrow.mission_status(&id).await.unwrap(),
            MissionStatus::Disputed
        );
    }

    fn stake(amount: u64) -> ValidationStake {
        ValidationStake {
            validation_id: ValidationId::new(),
            validator: "validator-1".to_string(),
            stake: Amount(amount),
            deliverable_hash: "0xabc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_validation_approved_forfeits_stake() {
        let f = fixture().await;
        let id = submitted(&f, 16, [8, 8]).await;

        f.escrow.request_validation(&id, stake(4)).await.unwrap();
        let receipt = f.escrow.resolve_validation(&id, true).await.unwrap();

        assert_eq!(receipt.status, MissionStatus::Completed);
        assert_eq!(f.balance(&f.agents[0]).await, Amount(10));
        assert_eq!(f.balance(&f.agents[1]).await, Amount(10));
    }

    #[tokio::test]
    async fn test_validation_rejected_refunds_escrow_and_stake() {
        let f = fixture().await;
        let id = submitted(&f, 16, [8, 8]).await;

        f.escrow.request_validation(&id, stake(4)).await.unwrap();
        let receipt = f.escrow.resolve_validation(&id, false).await.unwrap();

        assert_eq!(receipt.status, MissionStatus::Refunded);
        assert_eq!(f.balance(&f.client).await, Amount(1_000));
        assert_eq!(f.balance(&f.agents[0]).await, Amount::zero());
    }

    #[tokio::test]
    async fn test_fail_and_cancel_refund() {
        let f = fixture().await;

        let req = request(&f, 20, [8, 8]);
        let cancelled = req.mission_id.clone();
        f.escrow.create_mission(req).await.unwrap();
        f.escrow.cancel_mission(&cancelled).await.unwrap();

        let req = request(&f, 20, [8, 8]);
        let failed = req.mission_id.clone();
        f.escrow.create_mission(req).await.unwrap();
        f.escrow.start_mission(&failed).await.unwrap();
        f.escrow.fail_mission(&failed, "agent b unreachable").await.unwrap();

        assert_eq!(f.balance(&f.client).await, Amount(1_000));
        let record = f.escrow.mission_details(&failed).await.unwrap();
        assert_eq!(record.status, MissionStatus::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("agent b unreachable"));
        assert_eq!(record.receipts.len(), 3);
    }
}
