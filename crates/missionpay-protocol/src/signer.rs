//! Payment signer - the single queue for the shared payment credential
//!
//! One signing credential pays every agent, across parallel branches and
//! across missions. Transfers from one account must carry strictly
//! sequential nonces, so all payments go through one background task that
//! handles a single command at a time. Callers hold a cheap [`SignerHandle`].

use std::sync::Arc;
use std::time::Duration;

use missionpay_ledger::{TokenLedger, TransferTx};
use missionpay_types::{AccountId, NetworkId, PaymentProof, PaymentRequest};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::crypto::Keypair;
use crate::error::{ProtocolError, Result};

/// Queue depth before callers wait for the signer
const SIGNER_QUEUE_DEPTH: usize = 256;

pub(crate) enum SignerCommand {
    Pay {
        request: PaymentRequest,
        reply: oneshot::Sender<Result<PaymentProof>>,
    },
}

/// Owns the payment credential; consumed by [`PaymentSigner::spawn`]
pub struct PaymentSigner {
    keypair: Keypair,
    account: AccountId,
    network: NetworkId,
    ledger: Arc<dyn TokenLedger>,
    confirmation_timeout: Duration,
    /// Locally tracked next nonce; `None` forces a re-sync from the ledger
    next_nonce: Option<u64>,
}

impl PaymentSigner {
    pub fn new(
        keypair: Keypair,
        account: AccountId,
        network: NetworkId,
        ledger: Arc<dyn TokenLedger>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            keypair,
            account,
            network,
            ledger,
            confirmation_timeout,
            next_nonce: None,
        }
    }

    /// Start the signer task and return a handle to it
    pub fn spawn(self) -> SignerHandle {
        let (tx, rx) = mpsc::channel(SIGNER_QUEUE_DEPTH);
        let handle = SignerHandle {
            tx,
            account: self.account.clone(),
            public_key: self.keypair.public_key_hex(),
        };
        tokio::spawn(self.run(rx));
        handle
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SignerCommand>) {
        info!(account = %self.account, "Payment signer started");
        while let Some(command) = rx.recv().await {
            match command {
                SignerCommand::Pay { request, reply } => {
                    let result = self.pay(request).await;
                    let _ = reply.send(result);
                }
            }
        }
        debug!(account = %self.account, "Payment signer stopped");
    }

    async fn pay(&mut self, request: PaymentRequest) -> Result<PaymentProof> {
        if request.network != self.network {
            return Err(ProtocolError::UnsupportedNetwork {
                requested: request.network.to_string(),
                supported: self.network.to_string(),
            });
        }

        let nonce = match self.next_nonce {
            Some(nonce) => nonce,
            None => self.ledger.next_nonce(&self.account).await?,
        };

        let tx = TransferTx {
            from: self.account.clone(),
            to: request.recipient.clone(),
            token: request.token.clone(),
            amount: request.amount,
            nonce,
        };

        let tx_hash = match self.ledger.submit_transfer(tx).await {
            Ok(tx_hash) => {
                self.next_nonce = Some(nonce + 1);
                tx_hash
            }
            Err(err) => {
                warn!(account = %self.account, nonce, error = %err, "Transfer rejected, re-syncing nonce");
                self.next_nonce = None;
                return Err(err.into());
            }
        };

        debug!(tx_hash = %tx_hash, nonce, "Awaiting confirmation");
        let receipt = self
            .ledger
            .wait_for_confirmation(&tx_hash, self.confirmation_timeout)
            .await?;

        let mut proof = PaymentProof {
            tx_hash,
            payer: self.account.clone(),
            payee: request.recipient,
            amount: request.amount,
            token: request.token,
            network: request.network,
            timestamp: receipt.timestamp,
            signature: String::new(),
            signer_public_key: self.keypair.public_key_hex(),
        };
        proof.signature = self.keypair.sign(&proof.signable_bytes());

        info!(
            tx_hash = %proof.tx_hash,
            payee = %proof.payee,
            amount = %proof.amount,
            "Payment confirmed"
        );
        Ok(proof)
    }
}

/// Clonable handle to the payment signer
#[derive(Clone)]
pub struct SignerHandle {
    tx: mpsc::Sender<SignerCommand>,
    account: AccountId,
    public_key: String,
}

impl SignerHandle {
    /// Pay a request and wait for the confirmed, signed proof
    pub async fn pay(&self, request: PaymentRequest) -> Result<PaymentProof> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(SignerCommand::Pay { request, reply })
            .await
            .map_err(|_| ProtocolError::SignerUnavailable)?;
        response.await.map_err(|_| ProtocolError::SignerUnavailable)?
    }

    /// The paying ledger account
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}
