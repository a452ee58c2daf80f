//! Execution sink
//!
//! The coordinator reports execution and mission status through an
//! [`ExecutionSink`] instead of calling storage directly. Storage failures
//! are logged and never fail a mission.
//!
//! - [`StoreSink`] writes through to a [`MissionStore`] inline
//! - [`ChannelSink`] hands messages to a dedicated worker task, so the
//!   coordinator never waits on storage

use std::sync::Arc;

use async_trait::async_trait;
use missionpay_types::{ExecutionRecord, MissionError, MissionId, MissionStatus};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::store::MissionStore;

#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn record_execution(&self, record: &ExecutionRecord);

    async fn record_mission_status(
        &self,
        mission_id: &MissionId,
        status: MissionStatus,
        error: Option<String>,
    );
}

async fn apply_execution(store: &dyn MissionStore, record: ExecutionRecord) {
    let execution_id = record.id.clone();
    match store.update_execution(record).await {
        Ok(_) => {}
        // an agent report already moved the record further
        Err(err @ MissionError::InvalidExecutionTransition { .. }) => {
            warn!(execution_id = %execution_id, error = %err, "Skipped stale execution write");
        }
        Err(err) => {
            error!(execution_id = %execution_id, error = %err, "Failed to record execution");
        }
    }
}

async fn apply_status(
    store: &dyn MissionStore,
    mission_id: MissionId,
    status: MissionStatus,
    error: Option<String>,
) {
    if let Err(err) = store.update_mission_status(&mission_id, status, error).await {
        error!(mission_id = %mission_id, status = %status, error = %err, "Failed to record mission status");
    }
}

/// Writes through to the store on the caller's task
pub struct StoreSink {
    store: Arc<dyn MissionStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn MissionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ExecutionSink for StoreSink {
    async fn record_execution(&self, record: &ExecutionRecord) {
        apply_execution(self.store.as_ref(), record.clone()).await;
    }

    async fn record_mission_status(
        &self,
        mission_id: &MissionId,
        status: MissionStatus,
        error: Option<String>,
    ) {
        apply_status(self.store.as_ref(), mission_id.clone(), status, error).await;
    }
}

pub enum SinkMessage {
    Execution(ExecutionRecord),
    MissionStatus {
        mission_id: MissionId,
        status: MissionStatus,
        error: Option<String>,
    },
    /// Replies once every earlier message has been applied
    Flush(oneshot::Sender<()>),
}

/// Queues messages for a background worker that owns the store writes
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl ChannelSink {
    /// Spawn the worker; it stops once every `ChannelSink` clone is dropped
    pub fn spawn(store: Arc<dyn MissionStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::process(store, rx));
        (Self { tx }, handle)
    }

    async fn process(store: Arc<dyn MissionStore>, mut rx: mpsc::UnboundedReceiver<SinkMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                SinkMessage::Execution(record) => apply_execution(store.as_ref(), record).await,
                SinkMessage::MissionStatus {
                    mission_id,
                    status,
                    error,
                } => apply_status(store.as_ref(), mission_id, status, error).await,
                SinkMessage::Flush(reply) => {
                    let _ = reply.send(());
                }
            }
        }
        debug!("Execution sink worker stopped");
    }

    fn send(&self, message: SinkMessage) {
        if self.tx.send(message).is_err() {
            warn!("Execution sink worker is gone, dropping update");
        }
    }

    /// Wait until everything queued so far has reached the store
    pub async fn flush(&self) {
        let (reply, done) = oneshot::channel();
        self.send(SinkMessage::Flush(reply));
        let _ = done.await;
    }
}

#[async_trait]
impl ExecutionSink for ChannelSink {
    async fn record_execution(&self, record: &ExecutionRecord) {
        self.send(SinkMessage::Execution(record.clone()));
    }

    async fn record_mission_status(
        &self,
        mission_id: &MissionId,
        status: MissionStatus,
        error: Option<String>,
    ) {
        self.send(SinkMessage::MissionStatus {
            mission_id: mission_id.clone(),
            status,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMissionStore;
    use missionpay_types::{
        AccountId, AgentAssignment, AgentId, Amount, ExecutionStatus, Mission, MissionMode,
        MissionPlan,
    };

    async fn seeded() -> (Arc<InMemoryMissionStore>, MissionId, ExecutionRecord) {
        let store = Arc::new(InMemoryMissionStore::new());
        let plan = MissionPlan {
            client: AccountId::new("0xclient"),
            mode: MissionMode::Sequential,
            total_budget: Amount(10),
            description: "Summarize filings".to_string(),
            requirements: String::new(),
            assignments: vec![],
        };
        let mission = Mission::from_plan(&plan);
        let id = mission.id.clone();
        store.create_mission(mission).await.unwrap();
        store
            .attach_assignment(
                &id,
                AgentAssignment {
                    agent_id: AgentId::new(),
                    capability: "summary".to_string(),
                    payment: Amount(4),
                    position: Some(1),
                    endpoint: "http://summarizer/task".to_string(),
                    account: AccountId::new("0xsummarizer"),
                },
            )
            .await
            .unwrap();
        let record = store.init_executions(&id).await.unwrap().remove(0);
        (store, id, record)
    }

    #[tokio::test]
    async fn test_channel_sink_applies_in_order() {
        let (store, id, mut record) = seeded().await;
        let (sink, _worker) = ChannelSink::spawn(store.clone());

        record.start().unwrap();
        sink.record_execution(&record).await;
        record
            .complete("done".to_string(), None, Amount(4), None)
            .unwrap();
        sink.record_execution(&record).await;
        sink.record_mission_status(&id, MissionStatus::InProgress, None)
            .await;
        sink.flush().await;

        let stored = store.execution(&record.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.paid, Amount(4));
        let snapshot = store.mission(&id).await.unwrap();
        assert_eq!(snapshot.mission.status, MissionStatus::InProgress);
    }

    #[tokio::test]
    async fn test_store_failures_are_swallowed() {
        let (store, id, _) = seeded().await;
        let sink = StoreSink::new(store.clone());

        // Pending -> Completed is illegal; the sink logs and carries on
        sink.record_mission_status(&id, MissionStatus::Completed, None)
            .await;
        let orphan = ExecutionRecord::pending(id.clone(), AgentId::new());
        sink.record_execution(&orphan).await;

        let snapshot = store.mission(&id).await.unwrap();
        assert_eq!(snapshot.mission.status, MissionStatus::Pending);
    }
}
