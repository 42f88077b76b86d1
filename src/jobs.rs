//! Background job runner.
//!
//! Long-running executions move off the synchronous request path onto a
//! detached task that outlives the originating request. Job state lives
//! in the shared key/value store; polling is the only way to observe
//! progress. A state-write failure is logged and the job stays in its
//! last known state - it never crashes the execution task.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::KvStore;

/// Job state retention window.
const JOB_TTL_SECS: u64 = 86_400;

/// Lifecycle status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

/// One background job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier (`job_<uuid>`).
    pub job_id: String,
    /// Current status. Completed and failed are terminal.
    pub status: JobStatus,
    /// Coarse progress percentage.
    pub progress: u8,
    /// Full response payload, present once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error text, present once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Manages job records and detached execution tasks.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JobRunner")
    }
}

impl JobRunner {
    /// Runner over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Initialize a new job record in the processing state.
    pub async fn create_job(&self) -> String {
        let job_id = format!("job_{}", Uuid::new_v4());
        let job = Job {
            job_id: job_id.clone(),
            status: JobStatus::Processing,
            progress: 0,
            result: None,
            error: None,
        };
        self.write(&job).await;
        job_id
    }

    /// Retrieve current job state, `None` when unknown or expired.
    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        match self.store.get(&Self::key(job_id)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Job store read failed");
                None
            }
        }
    }

    /// Run `task` on a detached tokio task, recording the outcome.
    ///
    /// The task is independent of any caller connection; the spawned
    /// future must resolve to the full response payload or an error
    /// message.
    pub fn spawn<F>(&self, job_id: String, task: F)
    where
        F: std::future::Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        let runner = self.clone();
        tokio::spawn(async move {
            tracing::info!(job_id = %job_id, "Background execution started");
            match task.await {
                Ok(payload) => {
                    runner
                        .write(&Job {
                            job_id: job_id.clone(),
                            status: JobStatus::Completed,
                            progress: 100,
                            result: Some(payload),
                            error: None,
                        })
                        .await;
                    tracing::info!(job_id = %job_id, "Background job completed");
                }
                Err(message) => {
                    runner
                        .write(&Job {
                            job_id: job_id.clone(),
                            status: JobStatus::Failed,
                            progress: 0,
                            result: None,
                            error: Some(message.clone()),
                        })
                        .await;
                    tracing::error!(job_id = %job_id, error = %message, "Background job failed");
                }
            }
        });
    }

    async fn write(&self, job: &Job) {
        let raw = match serde_json::to_string(job) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Job record unserializable");
                return;
            }
        };
        if let Err(e) = self.store.set_ex(&Self::key(&job.job_id), &raw, JOB_TTL_SECS).await {
            tracing::warn!(job_id = %job.job_id, error = %e, "Job store write failed");
        }
    }

    fn key(job_id: &str) -> String {
        format!("job:{job_id}")
    }
}
