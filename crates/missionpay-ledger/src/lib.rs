//! missionpay Ledger - Double-entry token ledger
//!
//! The ledger is:
//! - Token-scoped (balances per `TokenId`)
//! - Account-keyed by `AccountId`
//! - Double-entry (every credit has a corresponding debit)
//! - Immutable (entries are append-only)
//!
//! # Invariants
//!
//! 1. No negative balances
//! 2. Every entry has a reason
//! 3. Transfers are atomic: both legs or neither
//!
//! The [`chain`] module layers a transaction interface (nonces, receipts,
//! confirmations) on top of this ledger.

pub mod chain;

pub use chain::*;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use missionpay_types::{AccountId, Amount, MissionError, TokenId, TxHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors that can occur in ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Account not found: {account}")]
    AccountNotFound { account: String },

    #[error("Insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: u64, required: u64 },

    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    #[error("Transaction not found: {tx_hash}")]
    TransactionNotFound { tx_hash: String },

    #[error("Nonce mismatch for {account}: expected {expected}, got {got}")]
    NonceMismatch {
        account: String,
        expected: u64,
        got: u64,
    },

    #[error("Transaction {tx_hash} reverted: {reason}")]
    Reverted { tx_hash: String, reason: String },

    #[error("Transaction {tx_hash} not confirmed within {seconds}s")]
    ConfirmationTimeout { tx_hash: String, seconds: u64 },

    #[error("Ledger unavailable: {message}")]
    Unavailable { message: String },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<LedgerError> for MissionError {
    fn from(err: LedgerError) -> Self {
        MissionError::LedgerTransactionFailure {
            reason: err.to_string(),
        }
    }
}

/// Unique identifier for a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn new() -> Self {
        Self(format!("entry_{}", Uuid::new_v4()))
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// Type of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Credit (increase) to an account
    Credit,
    /// Debit (decrease) from an account
    Debit,
}

/// Reason for a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    /// External deposit (faucet, bridge)
    Deposit { reference: String },
    /// Signed token transfer
    Transfer { tx_hash: TxHash },
    /// Mission budget locked into escrow
    EscrowLock { mission_id: String },
    /// Escrow paid out to an agent
    EscrowRelease { mission_id: String },
    /// Escrow returned to the client
    EscrowRefund { mission_id: String },
    /// Validation stake or dispute bond posted
    StakeLock { mission_id: String },
    /// Stake or bond returned to its poster
    StakeReturn { mission_id: String },
    /// Stake or bond forfeited to the counterparty
    StakeForfeit { mission_id: String },
    /// Escrow payout returned to the vault after a later leg failed
    PayoutReversal { mission_id: String },
}

/// A single ledger entry (one side of a double-entry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub account: AccountId,
    pub token: TokenId,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub balance_after: Amount,
    pub reason: EntryReason,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

/// Account state in the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    pub balances: HashMap<TokenId, Amount>,
    pub entry_count: u64,
}

impl AccountState {
    pub fn balance(&self, token: &TokenId) -> Amount {
        self.balances.get(token).copied().unwrap_or(Amount::zero())
    }
}

#[derive(Default)]
struct LedgerBook {
    accounts: HashMap<AccountId, AccountState>,
    entries: Vec<LedgerEntry>,
}

impl LedgerBook {
    fn post(
        &mut self,
        account: &AccountId,
        token: &TokenId,
        entry_type: EntryType,
        amount: Amount,
        reason: &EntryReason,
        correlation_id: &str,
    ) -> Result<(Amount, EntryId)> {
        let current = self
            .accounts
            .get(account)
            .map(|a| a.balance(token))
            .unwrap_or(Amount::zero());

        let new_balance = match entry_type {
            EntryType::Credit => current.checked_add(amount).ok_or_else(|| {
                LedgerError::InvalidAmount {
                    message: "Balance overflow".to_string(),
                }
            })?,
            EntryType::Debit => {
                if !self.accounts.contains_key(account) {
                    return Err(LedgerError::AccountNotFound {
                        account: account.0.clone(),
                    });
                }
                current
                    .checked_sub(amount)
                    .ok_or(LedgerError::InsufficientBalance {
                        available: current.0,
                        required: amount.0,
                    })?
            }
        };

        let entry = LedgerEntry {
            entry_id: EntryId::new(),
            account: account.clone(),
            token: token.clone(),
            entry_type,
            amount,
            balance_after: new_balance,
            reason: reason.clone(),
            correlation_id: correlation_id.to_string(),
            created_at: Utc::now(),
        };

        let state = self.accounts.entry(account.clone()).or_default();
        state.balances.insert(token.clone(), new_balance);
        state.entry_count += 1;

        let entry_id = entry.entry_id.clone();
        self.entries.push(entry);
        Ok((new_balance, entry_id))
    }
}

/// The missionpay Ledger
///
/// A double-entry ledger for tracking all token movements.
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct Ledger {
    book: Arc<RwLock<LedgerBook>>,
}

impl Ledger {
    /// Create a new in-memory ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the balance of an account for a specific token
    pub async fn balance(&self, account: &AccountId, token: &TokenId) -> Amount {
        let book = self.book.read().await;
        book.accounts
            .get(account)
            .map(|a| a.balance(token))
            .unwrap_or(Amount::zero())
    }

    /// Credit an account (increase balance)
    ///
    /// Returns the new balance and the entry ID.
    pub async fn credit(
        &self,
        account: &AccountId,
        token: &TokenId,
        amount: Amount,
        reason: EntryReason,
        correlation_id: String,
    ) -> Result<(Amount, EntryId)> {
        ensure_positive(amount)?;
        let mut book = self.book.write().await;
        book.post(account, token, EntryType::Credit, amount, &reason, &correlation_id)
    }

    /// Debit an account (decrease balance)
    ///
    /// Fails if balance would go negative (invariant: no negative balances).
    pub async fn debit(
        &self,
        account: &AccountId,
        token: &TokenId,
        amount: Amount,
        reason: EntryReason,
        correlation_id: String,
    ) -> Result<(Amount, EntryId)> {
        ensure_positive(amount)?;
        let mut book = self.book.write().await;
        book.post(account, token, EntryType::Debit, amount, &reason, &correlation_id)
    }

    /// Execute a transfer between two accounts
    ///
    /// Atomic: both legs are posted under one lock, and the debit is checked
    /// before anything is written.
    pub async fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        token: &TokenId,
        amount: Amount,
        reason: EntryReason,
        correlation_id: String,
    ) -> Result<(EntryId, EntryId)> {
        ensure_positive(amount)?;
        let mut book = self.book.write().await;

        let to_balance = book
            .accounts
            .get(to)
            .map(|a| a.balance(token))
            .unwrap_or(Amount::zero());
        if to_balance.checked_add(amount).is_none() {
            return Err(LedgerError::InvalidAmount {
                message: "Balance overflow".to_string(),
            });
        }

        let (_, debit_entry) =
            book.post(from, token, EntryType::Debit, amount, &reason, &correlation_id)?;
        let (_, credit_entry) =
            book.post(to, token, EntryType::Credit, amount, &reason, &correlation_id)?;

        Ok((debit_entry, credit_entry))
    }

    /// Record an external deposit
    pub async fn deposit(
        &self,
        to: &AccountId,
        token: &TokenId,
        amount: Amount,
        reference: impl Into<String>,
    ) -> Result<Amount> {
        let reference = reference.into();
        let (balance, _) = self
            .credit(
                to,
                token,
                amount,
                EntryReason::Deposit {
                    reference: reference.clone(),
                },
                reference,
            )
            .await?;
        Ok(balance)
    }

    /// Get all entries for an account
    pub async fn account_entries(&self, account: &AccountId) -> Vec<LedgerEntry> {
        let book = self.book.read().await;
        book.entries
            .iter()
            .filter(|e| &e.account == account)
            .cloned()
            .collect()
    }

    /// Get entries sharing a correlation id
    pub async fn correlated_entries(&self, correlation_id: &str) -> Vec<LedgerEntry> {
        let book = self.book.read().await;
        book.entries
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    /// Get the total number of entries
    pub async fn entry_count(&self) -> usize {
        self.book.read().await.entries.len()
    }

    /// Get account state
    pub async fn account_state(&self, account: &AccountId) -> Option<AccountState> {
        self.book.read().await.accounts.get(account).cloned()
    }
}

fn ensure_positive(amount: Amount) -> Result<()> {
    if amount.is_zero() {
        return Err(LedgerError::InvalidAmount {
            message: "Amount must be greater than zero".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> TokenId {
        TokenId::usdc()
    }

    #[tokio::test]
    async fn test_credit_and_balance() {
        let ledger = Ledger::new();
        let account = AccountId::new("0xclient");

        assert_eq!(ledger.balance(&account, &usdc()).await, Amount::zero());

        let balance = ledger
            .deposit(&account, &usdc(), Amount::new(1000), "faucet")
            .await
            .unwrap();

        assert_eq!(balance, Amount::new(1000));
        assert_eq!(ledger.balance(&account, &usdc()).await, Amount::new(1000));
    }

    #[tokio::test]
    async fn test_no_negative_balance() {
        let ledger = Ledger::new();
        let account = AccountId::new("0xclient");
        ledger
            .deposit(&account, &usdc(), Amount::new(100), "faucet")
            .await
            .unwrap();

        let result = ledger
            .debit(
                &account,
                &usdc(),
                Amount::new(200),
                EntryReason::EscrowLock {
                    mission_id: "m".to_string(),
                },
                "m".to_string(),
            )
            .await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert_eq!(ledger.balance(&account, &usdc()).await, Amount::new(100));
    }

    #[tokio::test]
    async fn test_transfer_is_double_entry() {
        let ledger = Ledger::new();
        let from = AccountId::new("0xfrom");
        let to = AccountId::new("0xto");
        ledger
            .deposit(&from, &usdc(), Amount::new(1000), "faucet")
            .await
            .unwrap();

        let tx_hash = TxHash::from_digest(&[7; 32]);
        ledger
            .transfer(
                &from,
                &to,
                &usdc(),
                Amount::new(400),
                EntryReason::Transfer {
                    tx_hash: tx_hash.clone(),
                },
                tx_hash.0.clone(),
            )
            .await
            .unwrap();

        assert_eq!(ledger.balance(&from, &usdc()).await, Amount::new(600));
        assert_eq!(ledger.balance(&to, &usdc()).await, Amount::new(400));
        assert_eq!(ledger.correlated_entries(&tx_hash.0).await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_transfer_writes_nothing() {
        let ledger = Ledger::new();
        let from = AccountId::new("0xfrom");
        let to = AccountId::new("0xto");
        ledger
            .deposit(&from, &usdc(), Amount::new(10), "faucet")
            .await
            .unwrap();
        let before = ledger.entry_count().await;

        let result = ledger
            .transfer(
                &from,
                &to,
                &usdc(),
                Amount::new(11),
                EntryReason::Deposit {
                    reference: "x".to_string(),
                },
                "x".to_string(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(ledger.entry_count().await, before);
        assert_eq!(ledger.balance(&to, &usdc()).await, Amount::zero());
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let ledger = Ledger::new();
        let result = ledger
            .deposit(&AccountId::new("0xa"), &usdc(), Amount::zero(), "faucet")
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount { .. })));
    }
}
