//! Agent transports
//!
//! A transport delivers one task call and classifies the answer. It never
//! pays and never retries; the handshake lives in [`crate::TaskClient`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::Router;
use missionpay_types::{
    PaymentProof, PaymentRequest, TaskRequest, TaskResult, PAYMENT_PROOF_HEADER,
    PAYMENT_REQUEST_HEADER,
};
use tower::ServiceExt;
use tracing::debug;

use crate::codec::{decode_header, encode_header};
use crate::error::TransportError;

/// Classified agent answer
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    Success(TaskResult),
    PaymentRequired(PaymentRequest),
    Failure { status: u16, message: String },
}

#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        request: &TaskRequest,
        proof: Option<&PaymentProof>,
    ) -> Result<AgentReply, TransportError>;
}

fn classify(
    status: u16,
    payment_header: Option<&str>,
    body: &[u8],
) -> Result<AgentReply, TransportError> {
    if status == 402 {
        let header = payment_header.ok_or_else(|| TransportError::MalformedPaymentRequest {
            message: format!("missing {PAYMENT_REQUEST_HEADER} header"),
        })?;
        let request = decode_header::<PaymentRequest>(header).map_err(|e| {
            TransportError::MalformedPaymentRequest {
                message: e.to_string(),
            }
        })?;
        return Ok(AgentReply::PaymentRequired(request));
    }

    if (200..300).contains(&status) {
        let result = serde_json::from_slice::<TaskResult>(body).map_err(|e| {
            TransportError::Decode {
                message: e.to_string(),
            }
        })?;
        return Ok(AgentReply::Success(result));
    }

    Ok(AgentReply::Failure {
        status,
        message: String::from_utf8_lossy(body).into_owned(),
    })
}

fn proof_header(proof: Option<&PaymentProof>) -> Result<Option<String>, TransportError> {
    proof
        .map(encode_header)
        .transpose()
        .map_err(|e| TransportError::Decode {
            message: e.to_string(),
        })
}

/// HTTP transport: POST JSON to the agent endpoint
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                endpoint: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn send(
        &self,
        endpoint: &str,
        request: &TaskRequest,
        proof: Option<&PaymentProof>,
    ) -> Result<AgentReply, TransportError> {
        let request_error = |e: reqwest::Error| TransportError::Request {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        };

        let mut call = self.client.post(endpoint).json(request);
        if let Some(header) = proof_header(proof)? {
            call = call.header(PAYMENT_PROOF_HEADER, header);
        }

        let response = call.send().await.map_err(request_error)?;
        let status = response.status().as_u16();
        let payment_header = response
            .headers()
            .get(PAYMENT_REQUEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(request_error)?;

        debug!(endpoint, status, paid = proof.is_some(), "Agent responded");
        classify(status, payment_header.as_deref(), &body)
    }
}

/// In-process transport dispatching to `axum` routers by endpoint
///
/// Lets agents behind the paywall run without sockets.
#[derive(Clone, Default)]
pub struct RouterTransport {
    routes: HashMap<String, Router>,
}

impl RouterTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `endpoint` with `router`; the request path is `/task`
    pub fn with_agent(mut self, endpoint: impl Into<String>, router: Router) -> Self {
        self.routes.insert(endpoint.into(), router);
        self
    }
}

#[async_trait]
impl AgentTransport for RouterTransport {
    async fn send(
        &self,
        endpoint: &str,
        request: &TaskRequest,
        proof: Option<&PaymentProof>,
    ) -> Result<AgentReply, TransportError> {
        let router = self
            .routes
            .get(endpoint)
            .cloned()
            .ok_or_else(|| TransportError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
            })?;

        let body = serde_json::to_vec(request).map_err(|e| TransportError::Decode {
            message: e.to_string(),
        })?;
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri("/task")
            .header("content-type", "application/json");
        if let Some(header) = proof_header(proof)? {
            builder = builder.header(PAYMENT_PROOF_HEADER, header);
        }
        let http_request = builder
            .body(Body::from(body))
            .map_err(|e| TransportError::Request {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let response = router
            .oneshot(http_request)
            .await
            .map_err(|e| TransportError::Request {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let payment_header = response
            .headers()
            .get(PAYMENT_REQUEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| TransportError::Decode {
                message: e.to_string(),
            })?;

        classify(status, payment_header.as_deref(), &body)
    }
}
