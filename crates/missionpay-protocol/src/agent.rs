//! Task performer service
//!
//! Serves `POST /task` for one agent, optionally behind a [`PaymentGate`],
//! and reports execution status to the caller's callback URL when one is
//! given.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use missionpay_types::{ExecutionStatus, StatusCallback, TaskRequest, TaskResult};
use serde_json::json;
use tracing::{debug, warn};

use crate::paywall::{paywall, PaymentGate};

/// The work an agent performs once it has been paid
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn perform(&self, request: &TaskRequest) -> Result<TaskResult, String>;
}

/// Adapts a plain function into a [`TaskHandler`]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(&TaskRequest) -> Result<TaskResult, String> + Send + Sync,
{
    async fn perform(&self, request: &TaskRequest) -> Result<TaskResult, String> {
        (self.0)(request)
    }
}

struct AgentState {
    handler: Arc<dyn TaskHandler>,
    callbacks: reqwest::Client,
}

impl AgentState {
    fn report(
        &self,
        request: &TaskRequest,
        status: ExecutionStatus,
        outcome: Option<&Result<TaskResult, String>>,
    ) {
        let Some(url) = request.callback_url.clone() else {
            return;
        };

        let (deliverable, result, error) = match outcome {
            Some(Ok(result)) => (
                result.deliverable.clone(),
                Some(json!({ "output": result.output, "data": result.data })),
                None,
            ),
            Some(Err(message)) => (None, None, Some(message.clone())),
            None => (None, None, None),
        };
        let callback = StatusCallback {
            execution_id: request.execution_id.clone(),
            agent_id: request.agent_id.clone(),
            status,
            deliverable,
            result,
            error,
        };

        let client = self.callbacks.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&callback).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %url, status = %callback.status, "Status callback delivered");
                }
                Ok(response) => {
                    warn!(url = %url, code = response.status().as_u16(), "Status callback refused");
                }
                Err(err) => warn!(url = %url, error = %err, "Status callback failed"),
            }
        });
    }
}

async fn handle_task(
    State(state): State<Arc<AgentState>>,
    Json(request): Json<TaskRequest>,
) -> Response {
    state.report(&request, ExecutionStatus::Executing, None);

    let outcome = state.handler.perform(&request).await;
    match &outcome {
        Ok(result) => {
            state.report(&request, ExecutionStatus::Completed, Some(&outcome));
            Json(result.clone()).into_response()
        }
        Err(message) => {
            state.report(&request, ExecutionStatus::Failed, Some(&outcome));
            (StatusCode::INTERNAL_SERVER_ERROR, message.clone()).into_response()
        }
    }
}

/// Router for one agent; paywalled when `gate` is given
pub fn agent_router(handler: Arc<dyn TaskHandler>, gate: Option<Arc<PaymentGate>>) -> Router {
    let state = Arc::new(AgentState {
        handler,
        callbacks: reqwest::Client::new(),
    });
    let router = Router::new()
        .route("/task", post(handle_task))
        .with_state(state);

    match gate {
        Some(gate) => paywall(router, gate),
        None => router,
    }
}
