use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

const MAX_TRACKED_JOBS: usize = 2_000;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::TimedOut)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    #[serde(rename = "jobId")]
    pub id: Uuid,
    pub video_id: String,
    pub quality: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TransitionError {
    UnknownJob,
    Rejected { from: JobStatus, to: JobStatus },
}

/// In-memory index of download jobs keyed by their id.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, DownloadJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, video_id: &str, quality: &str) -> DownloadJob {
        let now = Utc::now();
        let job = DownloadJob {
            id: Uuid::new_v4(),
            video_id: video_id.to_string(),
            quality: quality.to_string(),
            status: JobStatus::Queued,
            filename: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let mut jobs = self.jobs.lock().await;
        trim_finished_jobs(&mut jobs);
        jobs.insert(job.id, job.clone());
        job
    }

    pub async fn get(&self, id: Uuid) -> Option<DownloadJob> {
        self.jobs.lock().await.get(&id).cloned()
    }

    /// All tracked jobs, oldest first.
    #[cfg(test)]
    pub async fn snapshot(&self) -> Vec<DownloadJob> {
        let mut jobs = self.jobs.lock().await.values().cloned().collect::<Vec<_>>();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub async fn mark_running(&self, id: Uuid) -> Result<(), TransitionError> {
        self.transition(id, JobStatus::Running, None, None).await
    }

    pub async fn mark_succeeded(&self, id: Uuid, filename: String) -> Result<(), TransitionError> {
        self.transition(id, JobStatus::Succeeded, Some(filename), None)
            .await
    }

    pub async fn mark_failed(
        &self,
        id: Uuid,
        status: JobStatus,
        error: String,
    ) -> Result<(), TransitionError> {
        self.transition(id, status, None, Some(error)).await
    }

    async fn transition(
        &self,
        id: Uuid,
        next: JobStatus,
        filename: Option<String>,
        error: Option<String>,
    ) -> Result<(), TransitionError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(TransitionError::UnknownJob)?;

        if !job.status.can_transition_to(next) {
            return Err(TransitionError::Rejected {
                from: job.status,
                to: next,
            });
        }

        job.status = next;
        job.updated_at = Utc::now();
        if filename.is_some() {
            job.filename = filename;
        }
        if error.is_some() {
            job.error = error;
        }

        Ok(())
    }

    /// Drops finished jobs last updated before `now - max_age`. Returns how many were removed.
    pub async fn prune_finished(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let cutoff = now - max_age;
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        before - jobs.len()
    }
}

fn trim_finished_jobs(jobs: &mut HashMap<Uuid, DownloadJob>) {
    if jobs.len() < MAX_TRACKED_JOBS {
        return;
    }

    let mut finished = jobs
        .values()
        .filter(|job| job.status.is_terminal())
        .map(|job| (job.id, job.updated_at))
        .collect::<Vec<_>>();
    finished.sort_by_key(|(_, updated_at)| *updated_at);

    let overflow = jobs.len() + 1 - MAX_TRACKED_JOBS;
    for (id, _) in finished.into_iter().take(overflow) {
        jobs.remove(&id);
    }
}
