//! Chain interface - transaction submission, confirmation and receipts
//!
//! `TokenLedger` is the narrow view of the external ledger the payment
//! protocol consumes: submit a nonce-sequenced transfer, block until it is
//! confirmed, and re-fetch its receipt later for independent verification.
//! `InMemoryChain` implements it over the double-entry [`Ledger`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use missionpay_types::{AccountId, Amount, SharedClock, SystemClock, TokenId, TxHash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{EntryReason, Ledger, LedgerError, Result};

/// How often `wait_for_confirmation` re-checks for a receipt
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A token transfer to be signed and submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTx {
    pub from: AccountId,
    pub to: AccountId,
    pub token: TokenId,
    pub amount: Amount,
    /// Per-sender sequence number; must equal the ledger's next nonce
    pub nonce: u64,
}

impl TransferTx {
    /// Deterministic transaction hash (sender + nonce make it unique)
    pub fn hash(&self) -> TxHash {
        let mut hasher = Sha256::new();
        hasher.update(self.from.as_str().as_bytes());
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.to.as_str().as_bytes());
        hasher.update(self.token.as_str().as_bytes());
        hasher.update(self.amount.0.to_be_bytes());
        TxHash::from_digest(&hasher.finalize().into())
    }
}

/// Execution status of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Success,
    Reverted { reason: String },
}

/// Decoded token transfer event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub token: TokenId,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub status: TxStatus,
    /// Block timestamp
    pub timestamp: DateTime<Utc>,
    pub nonce: u64,
    pub events: Vec<TransferEvent>,
}

impl TxReceipt {
    pub fn is_success(&self) -> bool {
        self.status == TxStatus::Success
    }
}

/// The token ledger as seen by payers and payees
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Next nonce the ledger will accept from `account`
    async fn next_nonce(&self, account: &AccountId) -> Result<u64>;

    /// Submit a transfer; returns its hash once accepted into the pool
    async fn submit_transfer(&self, tx: TransferTx) -> Result<TxHash>;

    /// Block until the transaction is mined; reverted transactions are errors
    async fn wait_for_confirmation(&self, tx_hash: &TxHash, timeout: Duration) -> Result<TxReceipt>;

    /// Re-fetch a receipt, if the transaction exists
    async fn transaction(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>>;

    async fn balance(&self, account: &AccountId, token: &TokenId) -> Result<Amount>;
}

/// In-memory chain over the double-entry ledger
///
/// Transactions mine immediately on submission. A transfer the sender cannot
/// fund still consumes its nonce and produces a reverted receipt.
#[derive(Clone)]
pub struct InMemoryChain {
    ledger: Ledger,
    clock: SharedClock,
    nonces: Arc<RwLock<HashMap<AccountId, u64>>>,
    receipts: Arc<RwLock<HashMap<TxHash, TxReceipt>>>,
    submitted: Arc<AtomicUsize>,
}

impl InMemoryChain {
    pub fn new(ledger: Ledger) -> Self {
        Self::with_clock(ledger, Arc::new(SystemClock))
    }

    pub fn with_clock(ledger: Ledger, clock: SharedClock) -> Self {
        Self {
            ledger,
            clock,
            nonces: Arc::new(RwLock::new(HashMap::new())),
            receipts: Arc::new(RwLock::new(HashMap::new())),
            submitted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The underlying ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Number of transfers accepted so far
    pub fn submitted_count(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Overwrite a stored receipt (for simulating reorgs and forged receipts)
    pub async fn replace_receipt(&self, receipt: TxReceipt) {
        self.receipts
            .write()
            .await
            .insert(receipt.tx_hash.clone(), receipt);
    }
}

#[async_trait]
impl TokenLedger for InMemoryChain {
    async fn next_nonce(&self, account: &AccountId) -> Result<u64> {
        Ok(self.nonces.read().await.get(account).copied().unwrap_or(0))
    }

    async fn submit_transfer(&self, tx: TransferTx) -> Result<TxHash> {
        {
            let mut nonces = self.nonces.write().await;
            let expected = nonces.get(&tx.from).copied().unwrap_or(0);
            if tx.nonce != expected {
                warn!(
                    account = %tx.from,
                    expected,
                    got = tx.nonce,
                    "Rejected out-of-sequence transfer"
                );
                return Err(LedgerError::NonceMismatch {
                    account: tx.from.0.clone(),
                    expected,
                    got: tx.nonce,
                });
            }
            nonces.insert(tx.from.clone(), expected + 1);
        }

        let tx_hash = tx.hash();
        let outcome = self
            .ledger
            .transfer(
                &tx.from,
                &tx.to,
                &tx.token,
                tx.amount,
                EntryReason::Transfer {
                    tx_hash: tx_hash.clone(),
                },
                tx_hash.0.clone(),
            )
            .await;

        let (status, events) = match outcome {
            Ok(_) => (
                TxStatus::Success,
                vec![TransferEvent {
                    token: tx.token.clone(),
                    from: tx.from.clone(),
                    to: tx.to.clone(),
                    amount: tx.amount,
                }],
            ),
            Err(err) => (
                TxStatus::Reverted {
                    reason: err.to_string(),
                },
                vec![],
            ),
        };

        let receipt = TxReceipt {
            tx_hash: tx_hash.clone(),
            status,
            timestamp: self.clock.now(),
            nonce: tx.nonce,
            events,
        };

        info!(
            tx_hash = %tx_hash,
            from = %tx.from,
            to = %tx.to,
            amount = %tx.amount,
            success = receipt.is_success(),
            "Transfer mined"
        );

        self.receipts.write().await.insert(tx_hash.clone(), receipt);
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: &TxHash, timeout: Duration) -> Result<TxReceipt> {
        let wait = async {
            loop {
                if let Some(receipt) = self.receipts.read().await.get(tx_hash).cloned() {
                    return receipt;
                }
                debug!(tx_hash = %tx_hash, "Waiting for confirmation");
                tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
            }
        };

        let receipt = tokio::time::timeout(timeout, wait).await.map_err(|_| {
            LedgerError::ConfirmationTimeout {
                tx_hash: tx_hash.0.clone(),
                seconds: timeout.as_secs(),
            }
        })?;

        match &receipt.status {
            TxStatus::Success => Ok(receipt),
            TxStatus::Reverted { reason } => Err(LedgerError::Reverted {
                tx_hash: tx_hash.0.clone(),
                reason: reason.clone(),
            }),
        }
    }

    async fn transaction(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>> {
        Ok(self.receipts.read().await.get(tx_hash).cloned())
    }

    async fn balance(&self, account: &AccountId, token: &TokenId) -> Result<Amount> {
        Ok(self.ledger.balance(account, token).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn funded_chain(account: &AccountId, amount: u64) -> InMemoryChain {
        let ledger = Ledger::new();
        ledger
            .deposit(account, &TokenId::usdc(), Amount(amount), "faucet")
            .await
            .unwrap();
        InMemoryChain::new(ledger)
    }

    fn transfer(from: &AccountId, amount: u64, nonce: u64) -> TransferTx {
        TransferTx {
            from: from.clone(),
            to: AccountId::new("0xagent"),
            token: TokenId::usdc(),
            amount: Amount(amount),
            nonce,
        }
    }

    #[tokio::test]
    async fn test_submit_and_confirm() {
        let payer = AccountId::new("0xpayer");
        let chain = funded_chain(&payer, 100).await;

        let tx_hash = chain.submit_transfer(transfer(&payer, 40, 0)).await.unwrap();
        let receipt = chain
            .wait_for_confirmation(&tx_hash, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(receipt.is_success());
        assert_eq!(receipt.events.len(), 1);
        assert_eq!(chain.next_nonce(&payer).await.unwrap(), 1);
        assert_eq!(
            chain.balance(&AccountId::new("0xagent"), &TokenId::usdc()).await.unwrap(),
            Amount(40)
        );
    }

    #[tokio::test]
    async fn test_nonce_must_be_sequential() {
        let payer = AccountId::new("0xpayer");
        let chain = funded_chain(&payer, 100).await;

        chain.submit_transfer(transfer(&payer, 1, 0)).await.unwrap();
        let replayed = chain.submit_transfer(transfer(&payer, 1, 0)).await;
        assert!(matches!(replayed, Err(LedgerError::NonceMismatch { expected: 1, .. })));

        let skipped = chain.submit_transfer(transfer(&payer, 1, 5)).await;
        assert!(matches!(skipped, Err(LedgerError::NonceMismatch { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_same_nonce_submissions_collide() {
        let payer = AccountId::new("0xpayer");
        let chain = funded_chain(&payer, 100).await;

        let results = futures::future::join_all(
            (0..4).map(|_| chain.submit_transfer(transfer(&payer, 1, 0))),
        )
        .await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[tokio::test]
    async fn test_underfunded_transfer_reverts() {
        let payer = AccountId::new("0xpayer");
        let chain = funded_chain(&payer, 10).await;

        let tx_hash = chain.submit_transfer(transfer(&payer, 50, 0)).await.unwrap();
        let result = chain
            .wait_for_confirmation(&tx_hash, Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(LedgerError::Reverted { .. })));
        assert_eq!(chain.next_nonce(&payer).await.unwrap(), 1);
        let receipt = chain.transaction(&tx_hash).await.unwrap().unwrap();
        assert!(!receipt.is_success());
    }

    #[tokio::test]
    async fn test_unknown_transaction_times_out() {
        let chain = InMemoryChain::new(Ledger::new());
        let result = chain
            .wait_for_confirmation(&TxHash::from_digest(&[9; 32]), Duration::from_millis(30))
            .await;
        assert!(matches!(result, Err(LedgerError::ConfirmationTimeout { .. })));
    }
}
