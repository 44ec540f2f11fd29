//! Job projection.
//!
//! Estimate writes publish [`EstimateEvent`]s; a [`JobProjector`] task turns
//! them into Job records. Publishing never blocks and never fails the write
//! that triggered it.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::store::RecordStore;
use crate::error::DocumentError;
use crate::models::{DashboardSummary, Estimate, EstimateStatus, Job, JobStatus};

#[derive(Debug, Clone)]
pub enum EstimateEvent {
    Created {
        owner_id: Uuid,
        estimate_id: Uuid,
        client_name: String,
        project_name: String,
        status: EstimateStatus,
        total: Decimal,
    },
    StatusChanged {
        owner_id: Uuid,
        estimate_id: Uuid,
        status: EstimateStatus,
        total: Decimal,
    },
}

impl EstimateEvent {
    pub fn created(estimate: &Estimate) -> Self {
        EstimateEvent::Created {
            owner_id: estimate.owner_id,
            estimate_id: estimate.id,
            client_name: estimate.client_name.clone(),
            project_name: estimate.project_name.clone(),
            status: estimate.status,
            total: estimate.total,
        }
    }

    pub fn status_changed(estimate: &Estimate) -> Self {
        EstimateEvent::StatusChanged {
            owner_id: estimate.owner_id,
            estimate_id: estimate.id,
            status: estimate.status,
            total: estimate.total,
        }
    }

    fn estimate_id(&self) -> Uuid {
        match self {
            EstimateEvent::Created { estimate_id, .. }
            | EstimateEvent::StatusChanged { estimate_id, .. } => *estimate_id,
        }
    }
}

/// Sending half handed to the estimate lifecycle.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<EstimateEvent>,
}

impl EventPublisher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EstimateEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Best-effort publish. A full or closed channel is logged and dropped.
    pub fn publish(&self, event: EstimateEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    estimate_id = %event.estimate_id(),
                    "Job projection queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(event)) => {
                warn!(
                    estimate_id = %event.estimate_id(),
                    "Job projection queue closed, dropping event"
                );
            }
        }
    }
}

pub struct JobProjector {
    records: Arc<dyn RecordStore>,
    rx: mpsc::Receiver<EstimateEvent>,
}

impl JobProjector {
    pub fn new(records: Arc<dyn RecordStore>, rx: mpsc::Receiver<EstimateEvent>) -> Self {
        Self { records, rx }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, shutdown: CancellationToken) {
        info!("Job projector started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Job projector shutting down");
                    break;
                }
                event = self.rx.recv() => {
                    match event {
                        Some(event) => {
                            let estimate_id = event.estimate_id();
                            if let Err(e) = self.apply(event).await {
                                error!(estimate_id = %estimate_id, error = %e, "Job projection failed");
                            }
                        }
                        None => {
                            info!("Event channel closed, job projector exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn apply(&self, event: EstimateEvent) -> Result<(), DocumentError> {
        match event {
            EstimateEvent::Created {
                owner_id,
                estimate_id,
                client_name,
                project_name,
                status,
                total,
            } => {
                let job = Job {
                    id: Uuid::new_v4(),
                    owner_id,
                    estimate_id: Some(estimate_id),
                    client_name,
                    project_type: project_name,
                    status: JobStatus::from(status),
                    total,
                    date: Utc::now().date_naive(),
                };
                let job = self.records.insert_job(job).await?;
                debug!(job_id = %job.id, estimate_id = %estimate_id, "Job projected");
            }
            EstimateEvent::StatusChanged {
                owner_id,
                estimate_id,
                status,
                total,
            } => {
                self.records
                    .update_job_for_estimate(owner_id, estimate_id, JobStatus::from(status), total)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Read side for `/jobs` and `/dashboard`.
#[derive(Clone)]
pub struct JobService {
    records: Arc<dyn RecordStore>,
}

impl JobService {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    pub async fn list(&self, owner_id: Uuid) -> Result<Vec<Job>, DocumentError> {
        self.records.list_jobs(owner_id).await
    }

    pub async fn dashboard(&self, owner_id: Uuid) -> Result<DashboardSummary, DocumentError> {
        let jobs = self.records.list_jobs(owner_id).await?;
        Ok(DashboardSummary::from_jobs(&jobs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;
    use std::time::Duration;

    fn created(owner_id: Uuid, estimate_id: Uuid) -> EstimateEvent {
        EstimateEvent::Created {
            owner_id,
            estimate_id,
            client_name: "Sam".to_string(),
            project_name: "Fence".to_string(),
            status: EstimateStatus::Draft,
            total: Decimal::from(120),
        }
    }

    async fn wait_for_jobs(store: &MemoryStore, owner_id: Uuid, predicate: impl Fn(&[Job]) -> bool) -> Vec<Job> {
        for _ in 0..100 {
            let jobs = store.list_jobs(owner_id).await.unwrap();
            if predicate(&jobs) {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("projection did not converge");
    }

    #[tokio::test]
    async fn projects_created_and_status_events() {
        let store = Arc::new(MemoryStore::new());
        let (publisher, rx) = EventPublisher::channel(8);
        let shutdown = CancellationToken::new();
        JobProjector::new(store.clone(), rx).spawn(shutdown.clone());

        let owner = Uuid::new_v4();
        let estimate_id = Uuid::new_v4();
        publisher.publish(created(owner, estimate_id));
        wait_for_jobs(&store, owner, |jobs| jobs.len() == 1).await;

        publisher.publish(EstimateEvent::StatusChanged {
            owner_id: owner,
            estimate_id,
            status: EstimateStatus::Approved,
            total: Decimal::from(150),
        });
        let jobs = wait_for_jobs(&store, owner, |jobs| {
            jobs.first().map(|j| j.status) == Some(JobStatus::Approved)
        })
        .await;
        assert_eq!(jobs[0].total, Decimal::from(150));
        assert_eq!(jobs[0].estimate_id, Some(estimate_id));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn publish_does_not_block_when_full() {
        let (publisher, _rx) = EventPublisher::channel(1);
        let owner = Uuid::new_v4();
        publisher.publish(created(owner, Uuid::new_v4()));
        publisher.publish(created(owner, Uuid::new_v4()));
    }
}
