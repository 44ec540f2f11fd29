//! Job projection model.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EstimateStatus;

/// Coarse job status mirrored from the linked estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Draft,
    Sent,
    Approved,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::Sent => "sent",
            JobStatus::Approved => "approved",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => JobStatus::Sent,
            "approved" => JobStatus::Approved,
            _ => JobStatus::Draft,
        }
    }
}

impl From<EstimateStatus> for JobStatus {
    fn from(status: EstimateStatus) -> Self {
        match status {
            EstimateStatus::Approved => JobStatus::Approved,
            EstimateStatus::Sent => JobStatus::Sent,
            EstimateStatus::Draft | EstimateStatus::Rejected => JobStatus::Draft,
        }
    }
}

/// Dashboard side-record. Never read back into estimate logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub estimate_id: Option<Uuid>,
    pub client_name: String,
    pub project_type: String,
    pub status: JobStatus,
    pub total: Decimal,
    pub date: NaiveDate,
}

/// Aggregate of an owner's jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_jobs: usize,
    pub draft_jobs: usize,
    pub sent_jobs: usize,
    pub approved_jobs: usize,
    pub pipeline_value: Decimal,
    pub approved_value: Decimal,
}

impl DashboardSummary {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        jobs.iter().fold(Self::default(), |mut summary, job| {
            summary.total_jobs += 1;
            summary.pipeline_value = summary.pipeline_value.saturating_add(job.total);
            match job.status {
                JobStatus::Draft => summary.draft_jobs += 1,
                JobStatus::Sent => summary.sent_jobs += 1,
                JobStatus::Approved => {
                    summary.approved_jobs += 1;
                    summary.approved_value = summary.approved_value.saturating_add(job.total);
                }
            }
            summary
        })
    }
}
