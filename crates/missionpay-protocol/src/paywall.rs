//! Payee-side paywall middleware
//!
//! Requests without a proof get `402 Payment Required` with the price in the
//! `x-payment-request` header. Requests with a proof run only after the proof
//! verifies against the ledger and its transaction has not bought a task
//! before. The verified proof is put in the request extensions.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use missionpay_types::{PaymentProof, PaymentRequest, PAYMENT_PROOF_HEADER, PAYMENT_REQUEST_HEADER};
use serde_json::json;
use tracing::{info, warn};

use crate::codec::{decode_header, encode_header};
use crate::error::SessionError;
use crate::session::SessionStore;
use crate::verify::ProofVerifier;

/// What an agent charges and how it checks payment
pub struct PaymentGate {
    price: PaymentRequest,
    verifier: Arc<ProofVerifier>,
    sessions: Arc<dyn SessionStore>,
}

impl PaymentGate {
    pub fn new(
        price: PaymentRequest,
        verifier: Arc<ProofVerifier>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            price,
            verifier,
            sessions,
        }
    }

    pub fn price(&self) -> &PaymentRequest {
        &self.price
    }

    fn payment_required(&self) -> Response {
        match encode_header(&self.price) {
            Ok(header) => (
                StatusCode::PAYMENT_REQUIRED,
                [(PAYMENT_REQUEST_HEADER, header)],
                Json(json!({
                    "error": "payment required",
                    "payment": self.price,
                })),
            )
                .into_response(),
            Err(err) => reject(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

fn reject(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Middleware guarding a route behind payment
pub async fn require_payment(
    State(gate): State<Arc<PaymentGate>>,
    mut req: Request,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get(PAYMENT_PROOF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(header) = header else {
        return gate.payment_required();
    };

    let proof: PaymentProof = match decode_header(&header) {
        Ok(proof) => proof,
        Err(err) => {
            warn!(error = %err, "Undecodable payment proof");
            return reject(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    if let Err(err) = gate.verifier.verify(&proof, &gate.price).await {
        warn!(tx_hash = %proof.tx_hash, reason = %err, "Rejected payment proof");
        return reject(StatusCode::FORBIDDEN, format!("Invalid payment proof: {err}"));
    }

    if let Err(err) = gate.sessions.redeem(proof.tx_hash.as_str()) {
        warn!(tx_hash = %proof.tx_hash, reason = %err, "Rejected payment proof");
        let status = match err {
            SessionError::ProofAlreadyRedeemed { .. } => StatusCode::CONFLICT,
            SessionError::StoreFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        return reject(status, err.to_string());
    }

    info!(tx_hash = %proof.tx_hash, payer = %proof.payer, "Payment accepted");
    req.extensions_mut().insert(proof);
    next.run(req).await
}

/// Put every route of `router` behind `gate`
pub fn paywall(router: Router, gate: Arc<PaymentGate>) -> Router {
    router.route_layer(middleware::from_fn_with_state(gate, require_payment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::session::BoundedSessionStore;
    use crate::signer::{PaymentSigner, SignerHandle};
    use axum::{body::Body, routing::post, Extension};
    use chrono::Duration;
    use missionpay_ledger::{InMemoryChain, Ledger};
    use missionpay_types::{AccountId, Amount, ManualClock, NetworkId, TokenId};
    use tower::ServiceExt;

    fn price() -> PaymentRequest {
        PaymentRequest {
            amount: Amount(8),
            token: TokenId::usdc(),
            recipient: AccountId::new("0xagent"),
            network: NetworkId::new("base-sepolia"),
            description: "analysis".to_string(),
        }
    }

    async fn setup(capacity: usize) -> (Router, SignerHandle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let ledger = Ledger::new();
        let payer = AccountId::new("0xcoordinator");
        ledger
            .deposit(&payer, &TokenId::usdc(), Amount(100), "faucet")
            .await
            .unwrap();
        let chain = InMemoryChain::with_clock(ledger, clock.clone());
        let signer = PaymentSigner::new(
            Keypair::generate(),
            payer,
            NetworkId::new("base-sepolia"),
            Arc::new(chain.clone()),
            std::time::Duration::from_secs(5),
        )
        .spawn();

        let verifier = Arc::new(ProofVerifier::new(Arc::new(chain), clock.clone()));
        let sessions = Arc::new(BoundedSessionStore::new(
            capacity,
            Duration::seconds(300),
            clock.clone(),
        ));
        let gate = Arc::new(PaymentGate::new(price(), verifier, sessions));

        let router = Router::new().route(
            "/task",
            post(|Extension(proof): Extension<PaymentProof>| async move {
                Json(json!({ "output": format!("paid by {}", proof.payer) }))
            }),
        );
        (paywall(router, gate), signer, clock)
    }

    fn call(proof: Option<&PaymentProof>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().method("POST").uri("/task");
        if let Some(proof) = proof {
            builder = builder.header(PAYMENT_PROOF_HEADER, encode_header(proof).unwrap());
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_unpaid_call_gets_price() {
        let (app, _, _) = setup(10).await;

        let response = app.oneshot(call(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let header = response.headers().get(PAYMENT_REQUEST_HEADER).unwrap();
        let request: PaymentRequest = decode_header(header.to_str().unwrap()).unwrap();
        assert_eq!(request, price());
    }

    #[tokio::test]
    async fn test_paid_call_runs_once() {
        let (app, signer, _) = setup(10).await;
        let proof = signer.pay(price()).await.unwrap();

        let response = app.clone().oneshot(call(Some(&proof))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let replay = app.oneshot(call(Some(&proof))).await.unwrap();
        assert_eq!(replay.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_underpaid_proof_is_forbidden() {
        let (app, signer, _) = setup(10).await;
        let mut cheap = price();
        cheap.amount = Amount(1);
        let proof = signer.pay(cheap).await.unwrap();

        let response = app.oneshot(call(Some(&proof))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_stale_proof_is_forbidden() {
        let (app, signer, clock) = setup(10).await;
        let proof = signer.pay(price()).await.unwrap();
        clock.advance(Duration::minutes(6));

        let response = app.oneshot(call(Some(&proof))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_full_session_store_fails_closed() {
        let (app, signer, _) = setup(1).await;
        let first = signer.pay(price()).await.unwrap();
        let second = signer.pay(price()).await.unwrap();

        let response = app.clone().oneshot(call(Some(&first))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(call(Some(&second))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_garbage_header_is_bad_request() {
        let (app, _, _) = setup(10).await;
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/task")
            .header(PAYMENT_PROOF_HEADER, "!!!")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
