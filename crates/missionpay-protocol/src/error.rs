//! Protocol errors
//!
//! Every variant maps onto the mission error taxonomy through
//! [`ProtocolError::into_mission_error`], which attaches the agent the
//! failure belongs to.

use missionpay_ledger::LedgerError;
use missionpay_types::{Amount, MissionError, PaymentProof};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Why a payment proof was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("proof does not match request: {reason}")]
    Mismatch { reason: String },

    #[error("bad proof signature: {reason}")]
    BadSignature { reason: String },

    #[error("transaction {tx_hash} not found on ledger")]
    TransactionNotFound { tx_hash: String },

    #[error("transaction {tx_hash} did not succeed")]
    TransactionFailed { tx_hash: String },

    #[error("proof is {age_secs}s old, freshness window is {window_secs}s")]
    Stale { age_secs: i64, window_secs: i64 },

    #[error("proof timestamp is {ahead_secs}s in the future")]
    FromTheFuture { ahead_secs: i64 },

    #[error("no transfer event matches the proof: {reason}")]
    EventMismatch { reason: String },

    #[error("ledger unavailable during verification: {message}")]
    LedgerUnavailable { message: String },
}

/// Proof session failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("payment proof for {key} was already redeemed")]
    ProofAlreadyRedeemed { key: String },

    #[error("session store full ({capacity} live entries)")]
    StoreFull { capacity: usize },
}

/// Agent transport failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },

    #[error("payment required without a usable payment request: {message}")]
    MalformedPaymentRequest { message: String },

    #[error("unreadable agent response: {message}")]
    Decode { message: String },

    #[error("no agent registered at {endpoint}")]
    UnknownEndpoint { endpoint: String },
}

/// Payment-gated task protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Agent requested {requested}, ceiling is {ceiling}")]
    BudgetExceeded { requested: Amount, ceiling: Amount },

    #[error("Invalid payment proof: {0}")]
    InvalidProof(#[from] ProofError),

    #[error("Proof session rejected: {0}")]
    Session(#[from] SessionError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Agent returned {status}: {message}")]
    AgentFailure { status: u16, message: String },

    #[error("Agent asked for payment again after being paid")]
    PaymentRequiredAfterPayment,

    /// The agent was paid but the retry did not deliver
    #[error("{error} (paid {} in {})", .proof.amount, .proof.tx_hash)]
    FailedAfterPayment {
        proof: Box<PaymentProof>,
        error: Box<ProtocolError>,
    },

    #[error("Task call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Payment network {requested} is not supported by this signer ({supported})")]
    UnsupportedNetwork { requested: String, supported: String },

    #[error("Payment signer is not running")]
    SignerUnavailable,

    #[error("Crypto error: {message}")]
    Crypto { message: String },

    #[error("Encoding error: {message}")]
    Encoding { message: String },
}

impl ProtocolError {
    /// The confirmed payment this failure happened after, if any
    pub fn payment(&self) -> Option<&PaymentProof> {
        match self {
            Self::FailedAfterPayment { proof, .. } => Some(proof),
            _ => None,
        }
    }

    /// Convert into the mission taxonomy, attributing the failure to `agent`
    pub fn into_mission_error(self, agent: &str) -> MissionError {
        match self {
            Self::BudgetExceeded { requested, ceiling } => {
                MissionError::BudgetExceeded { requested, ceiling }
            }
            Self::InvalidProof(err) => MissionError::InvalidPaymentProof {
                reason: err.to_string(),
            },
            Self::Ledger(err) => err.into(),
            Self::Timeout { seconds } => MissionError::Timeout {
                operation: format!("Task call to agent {agent}"),
                seconds,
            },
            Self::FailedAfterPayment { proof, error } => match error.into_mission_error(agent) {
                MissionError::AgentTaskFailure { agent, reason } => MissionError::AgentTaskFailure {
                    agent,
                    reason: format!("{reason} (paid {} in {})", proof.amount, proof.tx_hash),
                },
                other => other,
            },
            other => MissionError::AgentTaskFailure {
                agent: agent.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
