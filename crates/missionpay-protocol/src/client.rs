//! Payment-gated task client
//!
//! ```text
//! call ──► 2xx ───────────────────────────────► result (unpaid)
//!   │
//!   └────► 402 + PaymentRequest
//!             │ amount > ceiling ─────────────► BudgetExceeded
//!             ▼
//!          transfer, await confirmation, sign proof
//!             ▼
//!          retry once with proof ──► 2xx ─────► result (paid)
//!                                └─► anything else ► failure carrying the proof
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use missionpay_types::{AgentAssignment, Amount, PaymentProof, TaskRequest, TaskResult};
use tracing::{debug, info, warn};

use crate::error::{ProtocolError, Result};
use crate::signer::SignerHandle;
use crate::transport::{AgentReply, AgentTransport};

/// Default per-call timeout
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// A finished task call
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub result: TaskResult,
    /// Present when the agent was paid
    pub payment: Option<PaymentProof>,
}

impl TaskOutcome {
    pub fn paid(&self) -> Amount {
        self.payment.as_ref().map(|p| p.amount).unwrap_or(Amount::zero())
    }
}

/// Calls one agent through the payment-gated handshake
#[async_trait]
pub trait AgentCaller: Send + Sync {
    async fn call_agent(
        &self,
        assignment: &AgentAssignment,
        request: TaskRequest,
        max_payment: Amount,
    ) -> Result<TaskOutcome>;
}

pub struct TaskClient {
    transport: Arc<dyn AgentTransport>,
    signer: SignerHandle,
    timeout: Duration,
}

impl TaskClient {
    pub fn new(transport: Arc<dyn AgentTransport>, signer: SignerHandle) -> Self {
        Self {
            transport,
            signer,
            timeout: DEFAULT_TASK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send(
        &self,
        endpoint: &str,
        request: &TaskRequest,
        proof: Option<&PaymentProof>,
    ) -> Result<AgentReply> {
        let reply = tokio::time::timeout(self.timeout, self.transport.send(endpoint, request, proof))
            .await
            .map_err(|_| ProtocolError::Timeout {
                seconds: self.timeout.as_secs(),
            })??;
        Ok(reply)
    }
}

#[async_trait]
impl AgentCaller for TaskClient {
    async fn call_agent(
        &self,
        assignment: &AgentAssignment,
        request: TaskRequest,
        max_payment: Amount,
    ) -> Result<TaskOutcome> {
        let endpoint = assignment.endpoint.as_str();
        debug!(agent_id = %assignment.agent_id, endpoint, "Calling agent");

        let payment_request = match self.send(endpoint, &request, None).await? {
            AgentReply::Success(result) => {
                return Ok(TaskOutcome {
                    result,
                    payment: None,
                })
            }
            AgentReply::Failure { status, message } => {
                return Err(ProtocolError::AgentFailure { status, message })
            }
            AgentReply::PaymentRequired(payment_request) => payment_request,
        };

        if payment_request.amount > max_payment {
            warn!(
                agent_id = %assignment.agent_id,
                requested = %payment_request.amount,
                ceiling = %max_payment,
                "Agent payment request exceeds ceiling"
            );
            return Err(ProtocolError::BudgetExceeded {
                requested: payment_request.amount,
                ceiling: max_payment,
            });
        }

        let proof = self.signer.pay(payment_request).await?;
        info!(
            agent_id = %assignment.agent_id,
            tx_hash = %proof.tx_hash,
            amount = %proof.amount,
            "Agent paid, retrying with proof"
        );

        let error = match self.send(endpoint, &request, Some(&proof)).await {
            Ok(AgentReply::Success(result)) => {
                return Ok(TaskOutcome {
                    result,
                    payment: Some(proof),
                })
            }
            Ok(AgentReply::PaymentRequired(_)) => ProtocolError::PaymentRequiredAfterPayment,
            Ok(AgentReply::Failure { status, message }) => {
                ProtocolError::AgentFailure { status, message }
            }
            Err(err) => err,
        };
        warn!(
            agent_id = %assignment.agent_id,
            tx_hash = %proof.tx_hash,
            error = %error,
            "Paid agent did not deliver"
        );
        Err(ProtocolError::FailedAfterPayment {
            proof: Box::new(proof),
            error: Box::new(error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::error::TransportError;
    use crate::signer::PaymentSigner;
    use missionpay_ledger::{InMemoryChain, Ledger, TokenLedger};
    use missionpay_types::{
        AccountId, AgentId, ExecutionId, MissionId, NetworkId, PaymentRequest, TokenId,
    };
    use parking_lot::Mutex;

    /// Replays canned replies and records whether each call carried a proof
    struct ScriptedTransport {
        replies: Mutex<Vec<AgentReply>>,
        calls: Mutex<Vec<bool>>,
    }

    impl ScriptedTransport {
        fn new(mut replies: Vec<AgentReply>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentTransport for ScriptedTransport {
        async fn send(
            &self,
            endpoint: &str,
            _request: &TaskRequest,
            proof: Option<&PaymentProof>,
        ) -> std::result::Result<AgentReply, TransportError> {
            self.calls.lock().push(proof.is_some());
            self.replies
                .lock()
                .pop()
                .ok_or_else(|| TransportError::UnknownEndpoint {
                    endpoint: endpoint.to_string(),
                })
        }
    }

    fn price(amount: u64) -> AgentReply {
        AgentReply::PaymentRequired(PaymentRequest {
            amount: Amount(amount),
            token: TokenId::usdc(),
            recipient: AccountId::new("0xagent"),
            network: NetworkId::new("base-sepolia"),
            description: "research".to_string(),
        })
    }

    fn done(output: &str) -> AgentReply {
        AgentReply::Success(TaskResult {
            output: output.to_string(),
            deliverable: None,
            data: serde_json::Value::Null,
        })
    }

    fn assignment() -> AgentAssignment {
        AgentAssignment {
            agent_id: AgentId::new(),
            capability: "research".to_string(),
            payment: Amount(8),
            position: None,
            endpoint: "http://agent.local/task".to_string(),
            account: AccountId::new("0xagent"),
        }
    }

    fn task(a: &AgentAssignment) -> TaskRequest {
        TaskRequest {
            mission_id: MissionId::new(),
            agent_id: a.agent_id.clone(),
            execution_id: ExecutionId::new(),
            task: "Summarize the market".to_string(),
            capability: a.capability.clone(),
            payment: a.payment,
            requirements: String::new(),
            callback_url: None,
        }
    }

    async fn setup(replies: Vec<AgentReply>) -> (TaskClient, Arc<ScriptedTransport>, InMemoryChain) {
        let ledger = Ledger::new();
        let payer = AccountId::new("0xcoordinator");
        ledger
            .deposit(&payer, &TokenId::usdc(), Amount(100), "faucet")
            .await
            .unwrap();
        let chain = InMemoryChain::new(ledger);
        let signer = PaymentSigner::new(
            Keypair::generate(),
            payer,
            NetworkId::new("base-sepolia"),
            Arc::new(chain.clone()),
            Duration::from_secs(5),
        )
        .spawn();
        let transport = Arc::new(ScriptedTransport::new(replies));
        (TaskClient::new(transport.clone(), signer), transport, chain)
    }

    #[tokio::test]
    async fn test_free_agent_is_not_paid() {
        let (client, transport, chain) = setup(vec![done("free")]).await;
        let a = assignment();

        let outcome = client.call_agent(&a, task(&a), Amount(8)).await.unwrap();

        assert_eq!(outcome.result.output, "free");
        assert_eq!(outcome.paid(), Amount::zero());
        assert_eq!(*transport.calls.lock(), vec![false]);
        assert_eq!(chain.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_handshake_pays_once_and_retries_once() {
        let (client, transport, chain) = setup(vec![price(8), done("paid")]).await;
        let a = assignment();

        let outcome = client.call_agent(&a, task(&a), Amount(8)).await.unwrap();

        assert_eq!(outcome.paid(), Amount(8));
        assert_eq!(*transport.calls.lock(), vec![false, true]);
        assert_eq!(chain.submitted_count(), 1);
        assert_eq!(
            chain.balance(&AccountId::new("0xagent"), &TokenId::usdc()).await.unwrap(),
            Amount(8)
        );
    }

    #[tokio::test]
    async fn test_over_ceiling_request_is_never_paid() {
        let (client, transport, chain) = setup(vec![price(12)]).await;
        let a = assignment();

        let err = client.call_agent(&a, task(&a), Amount(8)).await.unwrap_err();

        assert!(matches!(err, ProtocolError::BudgetExceeded { .. }));
        assert_eq!(transport.calls.lock().len(), 1);
        assert_eq!(chain.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_second_payment_request_is_fatal() {
        let (client, transport, chain) = setup(vec![price(8), price(8)]).await;
        let a = assignment();

        let err = client.call_agent(&a, task(&a), Amount(8)).await.unwrap_err();

        assert!(matches!(
            &err,
            ProtocolError::FailedAfterPayment { error, .. }
                if **error == ProtocolError::PaymentRequiredAfterPayment
        ));
        assert_eq!(err.payment().map(|p| p.amount), Some(Amount(8)));
        assert_eq!(transport.calls.lock().len(), 2);
        assert_eq!(chain.submitted_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_after_payment_is_not_retried() {
        let failure = AgentReply::Failure {
            status: 500,
            message: "crashed".to_string(),
        };
        let (client, transport, chain) = setup(vec![price(8), failure, done("late")]).await;
        let a = assignment();

        let err = client.call_agent(&a, task(&a), Amount(8)).await.unwrap_err();

        let ProtocolError::FailedAfterPayment { proof, error } = &err else {
            panic!("expected a post-payment failure, got {err:?}");
        };
        assert!(matches!(**error, ProtocolError::AgentFailure { status: 500, .. }));
        assert_eq!(proof.amount, Amount(8));
        let receipt = chain.transaction(&proof.tx_hash).await.unwrap();
        assert!(receipt.is_some());
        assert_eq!(transport.calls.lock().len(), 2);
    }
}
