//! Payee-side proof verification
//!
//! A proof is only trusted after the referenced transaction is re-fetched
//! from the ledger. Verification reads but never writes, so verifying the
//! same proof twice gives the same answer; replay protection lives in the
//! paywall's session store.

use std::sync::Arc;

use chrono::Duration;
use missionpay_ledger::TokenLedger;
use missionpay_types::{PaymentProof, PaymentRequest, SharedClock};
use tracing::debug;

use crate::crypto::verify_signature;
use crate::error::ProofError;

/// Default proof freshness window
pub const DEFAULT_FRESHNESS_SECS: i64 = 300;

pub struct ProofVerifier {
    ledger: Arc<dyn TokenLedger>,
    clock: SharedClock,
    freshness: Duration,
}

impl ProofVerifier {
    pub fn new(ledger: Arc<dyn TokenLedger>, clock: SharedClock) -> Self {
        Self {
            ledger,
            clock,
            freshness: Duration::seconds(DEFAULT_FRESHNESS_SECS),
        }
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Accept `proof` as payment of `expected`, or say why not
    pub async fn verify(
        &self,
        proof: &PaymentProof,
        expected: &PaymentRequest,
    ) -> Result<(), ProofError> {
        if let Some(reason) = proof.mismatch_against(expected) {
            return Err(ProofError::Mismatch { reason });
        }

        verify_signature(
            &proof.signer_public_key,
            &proof.signable_bytes(),
            &proof.signature,
        )
        .map_err(|e| ProofError::BadSignature {
            reason: e.to_string(),
        })?;

        let receipt = self
            .ledger
            .transaction(&proof.tx_hash)
            .await
            .map_err(|e| ProofError::LedgerUnavailable {
                message: e.to_string(),
            })?
            .ok_or_else(|| ProofError::TransactionNotFound {
                tx_hash: proof.tx_hash.to_string(),
            })?;

        if !receipt.is_success() {
            return Err(ProofError::TransactionFailed {
                tx_hash: proof.tx_hash.to_string(),
            });
        }

        self.check_fresh(proof.timestamp)?;
        self.check_fresh(receipt.timestamp)?;

        let event = receipt
            .events
            .iter()
            .find(|e| e.from == proof.payer && e.to == proof.payee)
            .ok_or_else(|| ProofError::EventMismatch {
                reason: format!("no transfer from {} to {}", proof.payer, proof.payee),
            })?;
        if event.token != proof.token {
            return Err(ProofError::EventMismatch {
                reason: format!("token {} transferred, proof claims {}", event.token, proof.token),
            });
        }
        if event.amount != proof.amount {
            return Err(ProofError::EventMismatch {
                reason: format!(
                    "amount {} transferred, proof claims {}",
                    event.amount, proof.amount
                ),
            });
        }

        debug!(tx_hash = %proof.tx_hash, payer = %proof.payer, "Payment proof verified");
        Ok(())
    }

    fn check_fresh(&self, timestamp: chrono::DateTime<chrono::Utc>) -> Result<(), ProofError> {
        let age = self.clock.now() - timestamp;
        if age > self.freshness {
            return Err(ProofError::Stale {
                age_secs: age.num_seconds(),
                window_secs: self.freshness.num_seconds(),
            });
        }
        if -age > self.freshness {
            return Err(ProofError::FromTheFuture {
                ahead_secs: (-age).num_seconds(),
            });
        }
        Ok(())
    }
}
