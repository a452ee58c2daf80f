//! Payment requests and proofs for the payment-gated handshake
//!
//! An agent that wants to be paid before acting answers a task call with a
//! `PaymentRequest`. The payer transfers on the ledger, waits for
//! confirmation and retries the call once with a signed `PaymentProof`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, Amount, NetworkId, TokenId, TxHash};

/// Header carrying a base64 JSON `PaymentRequest` on a payment-required response
pub const PAYMENT_REQUEST_HEADER: &str = "x-payment-request";

/// Header carrying a base64 JSON `PaymentProof` on the paid retry
pub const PAYMENT_PROOF_HEADER: &str = "x-payment-proof";

/// What an agent wants before it will act
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Amount,
    pub token: TokenId,
    pub recipient: AccountId,
    pub network: NetworkId,
    pub description: String,
}

/// Evidence of a confirmed transfer answering a `PaymentRequest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof {
    pub tx_hash: TxHash,
    pub payer: AccountId,
    pub payee: AccountId,
    pub amount: Amount,
    pub token: TokenId,
    pub network: NetworkId,
    pub timestamp: DateTime<Utc>,
    /// Hex ed25519 signature over `signable_bytes`
    pub signature: String,
    /// Hex public key of the payer's signing credential
    pub signer_public_key: String,
}

#[derive(Serialize)]
struct SignablePaymentProof<'a> {
    tx_hash: &'a TxHash,
    payer: &'a AccountId,
    payee: &'a AccountId,
    amount: Amount,
    token: &'a TokenId,
    network: &'a NetworkId,
    timestamp: DateTime<Utc>,
}

impl PaymentProof {
    /// Canonical bytes covered by the signature
    pub fn signable_bytes(&self) -> Vec<u8> {
        let signable = SignablePaymentProof {
            tx_hash: &self.tx_hash,
            payer: &self.payer,
            payee: &self.payee,
            amount: self.amount,
            token: &self.token,
            network: &self.network,
            timestamp: self.timestamp,
        };
        // Serializing plain field structs cannot fail
        serde_json::to_vec(&signable).unwrap_or_default()
    }

    /// First field that does not match the request, if any
    pub fn mismatch_against(&self, request: &PaymentRequest) -> Option<String> {
        if self.payee != request.recipient {
            return Some(format!(
                "payee {} does not match requested recipient {}",
                self.payee, request.recipient
            ));
        }
        if self.amount != request.amount {
            return Some(format!(
                "amount {} does not match requested amount {}",
                self.amount, request.amount
            ));
        }
        if self.token != request.token {
            return Some(format!(
                "token {} does not match requested token {}",
                self.token, request.token
            ));
        }
        if self.network != request.network {
            return Some(format!(
                "network {} does not match requested network {}",
                self.network, request.network
            ));
        }
        None
    }
}
