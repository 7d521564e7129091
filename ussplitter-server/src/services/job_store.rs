//! Process-wide job registry
//!
//! The job map and the FIFO of QUEUED ids live behind one mutex, so
//! submission, the worker and cleanup all serialize on the same lock. The lock
//! is never held across file I/O or a separation run.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use ussplitter_common::{JobId, JobStatus};

use crate::error::JobError;
use crate::models::{Job, OutputPaths};

/// What `remove` did
#[derive(Debug)]
pub enum Removal {
    /// Record dropped; caller deletes its files
    Removed(Job),
    /// Job is PROCESSING; it will be dropped when it finishes
    Deferred,
    /// Unknown id or already removed
    Absent,
}

/// Result of recording a finished separation
#[derive(Debug)]
pub struct Finished {
    pub job: Job,
    /// Cleanup was requested during processing and the record is gone
    pub removed: bool,
}

/// Queue depth snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: Option<JobId>,
    pub total: usize,
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<JobId, Job>,
    /// QUEUED ids, oldest first
    queue: VecDeque<JobId>,
    /// Every live id in submission order
    submitted: Vec<JobId>,
}

impl StoreInner {
    fn drop_record(&mut self, id: &JobId) -> Option<Job> {
        let job = self.jobs.remove(id)?;
        self.queue.retain(|q| q != id);
        self.submitted.retain(|s| s != id);
        Some(job)
    }

    fn processing(&self) -> Option<JobId> {
        self.jobs
            .values()
            .find(|j| j.status() == JobStatus::Processing)
            .map(|j| j.id())
    }
}

/// In-memory job store
#[derive(Default)]
pub struct JobStore {
    inner: Mutex<StoreInner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a QUEUED job and append it to the FIFO.
    ///
    /// Returns its 0-based queue position, or `ResourceExhausted` when
    /// `max_queued` jobs are already waiting.
    pub async fn enqueue(&self, job: Job, max_queued: usize) -> Result<usize, JobError> {
        let mut inner = self.inner.lock().await;

        if inner.queue.len() >= max_queued {
            return Err(JobError::ResourceExhausted { limit: max_queued });
        }

        let id = job.id();
        inner.jobs.insert(id, job);
        inner.queue.push_back(id);
        inner.submitted.push(id);
        Ok(inner.queue.len() - 1)
    }

    pub async fn queued_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.inner.lock().await.jobs.get(id).cloned()
    }

    /// All jobs in submission order
    pub async fn list(&self) -> Vec<Job> {
        let inner = self.inner.lock().await;
        inner
            .submitted
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            queued: inner.queue.len(),
            processing: inner.processing(),
            total: inner.jobs.len(),
        }
    }

    /// Move the oldest QUEUED job to PROCESSING.
    ///
    /// Returns `None` when nothing is waiting, or when another job still holds
    /// the processing slot.
    pub async fn claim_next(&self) -> Option<Job> {
        let mut inner = self.inner.lock().await;

        if let Some(busy) = inner.processing() {
            tracing::error!(job_id = %busy, "Claim attempted while a job is still processing");
            return None;
        }

        while let Some(id) = inner.queue.pop_front() {
            let Some(job) = inner.jobs.get_mut(&id) else {
                continue;
            };
            match job.start() {
                Ok(()) => return Some(job.clone()),
                Err(e) => tracing::error!(error = %e, "Skipping queue entry"),
            }
        }
        None
    }

    /// Record the end of processing: DONE with outputs, or FAILED with a
    /// diagnostic. Drops the record if cleanup was requested meanwhile.
    pub async fn finish(
        &self,
        id: &JobId,
        result: Result<OutputPaths, String>,
    ) -> Option<Finished> {
        let mut inner = self.inner.lock().await;

        let cleanup_requested = {
            let job = inner.jobs.get_mut(id)?;
            let transition = match result {
                Ok(outputs) => job.complete(outputs),
                Err(message) => job.fail(message),
            };
            if let Err(e) = transition {
                tracing::error!(error = %e, "Finished job was not processing");
            }
            job.cleanup_requested
        };

        if cleanup_requested {
            let job = inner.drop_record(id)?;
            Some(Finished { job, removed: true })
        } else {
            let job = inner.jobs.get(id)?.clone();
            Some(Finished {
                job,
                removed: false,
            })
        }
    }

    /// Drop a job. QUEUED and terminal jobs go immediately; a PROCESSING job
    /// is only flagged and goes when the worker finishes it.
    pub async fn remove(&self, id: &JobId) -> Removal {
        let mut inner = self.inner.lock().await;

        let status = match inner.jobs.get(id) {
            Some(job) => job.status(),
            None => return Removal::Absent,
        };

        if status == JobStatus::Processing {
            if let Some(job) = inner.jobs.get_mut(id) {
                job.cleanup_requested = true;
            }
            return Removal::Deferred;
        }

        match inner.drop_record(id) {
            Some(job) => Removal::Removed(job),
            None => Removal::Absent,
        }
    }

    /// Drop every terminal job
    pub async fn remove_terminal(&self) -> Vec<Job> {
        let mut inner = self.inner.lock().await;
        let ids: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.is_terminal())
            .map(|j| j.id())
            .collect();
        ids.iter().filter_map(|id| inner.drop_record(id)).collect()
    }

    /// Drop terminal jobs whose retention anchor is at least `ttl` before `now`
    pub async fn remove_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<Job> {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return Vec::new();
        };
        let Some(cutoff) = now.checked_sub_signed(ttl) else {
            return Vec::new();
        };

        let mut inner = self.inner.lock().await;
        let ids: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.is_terminal() && j.retention_anchor() <= cutoff)
            .map(|j| j.id())
            .collect();
        ids.iter().filter_map(|id| inner.drop_record(id)).collect()
    }
}
