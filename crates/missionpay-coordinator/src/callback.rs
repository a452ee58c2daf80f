//! Status callback surface
//!
//! Task performers report execution progress on `POST /callbacks/executions`.
//! Each report is merged into the stored record inside the store, so it can
//! never overwrite payment fields the coordinator wrote concurrently.
//! `GET /missions/:mission_id` returns the mission with its executions so
//! status is queryable while a mission runs.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use missionpay_types::{ExecutionRecord, MissionError, MissionId, StatusCallback};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{MissionSnapshot, MissionStore};

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Invalid mission id: {0}")]
    InvalidMissionId(String),

    #[error(transparent)]
    Mission(#[from] MissionError),
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidMissionId(_) => StatusCode::BAD_REQUEST,
            Self::Mission(MissionError::MissionNotFound { .. })
            | Self::Mission(MissionError::ExecutionNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Mission(MissionError::ExecutionAgentMismatch { .. })
            | Self::Mission(MissionError::InvalidExecutionTransition { .. }) => {
                StatusCode::CONFLICT
            }
            Self::Mission(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct CallbackState {
    pub store: Arc<dyn MissionStore>,
}

async fn receive_callback(
    State(state): State<CallbackState>,
    Json(callback): Json<StatusCallback>,
) -> Result<Json<ExecutionRecord>, CallbackError> {
    let merged = state.store.apply_report(&callback).await.map_err(|err| {
        warn!(execution_id = %callback.execution_id, error = %err, "Rejected status callback");
        err
    })?;
    debug!(execution_id = %merged.id, status = %merged.status, "Status callback applied");
    Ok(Json(merged))
}

async fn mission_snapshot(
    State(state): State<CallbackState>,
    Path(mission_id): Path<String>,
) -> Result<Json<MissionSnapshot>, CallbackError> {
    let id = MissionId::parse(&mission_id)
        .map_err(|_| CallbackError::InvalidMissionId(mission_id.clone()))?;
    Ok(Json(state.store.mission(&id).await?))
}

pub fn callback_router(state: CallbackState) -> Router {
    Router::new()
        .route("/callbacks/executions", post(receive_callback))
        .route("/missions/:mission_id", get(mission_snapshot))
        .with_state(state)
}
