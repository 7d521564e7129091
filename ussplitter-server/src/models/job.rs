//! Job record and its state machine
//!
//! `QUEUED → PROCESSING → {DONE, FAILED}`. Transitions are only made through
//! the methods below, which keep the record consistent:
//! - `output_paths` is set if and only if status is DONE
//! - `error` is set if and only if status is FAILED
//! - terminal states never change again

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;
use ussplitter_common::api::JobStatusResponse;
use ussplitter_common::{JobId, JobStatus};

/// Rejected state change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("job {job_id}: illegal transition {from} -> {to}")]
pub struct InvalidTransition {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Location of the two result files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub vocals: PathBuf,
    pub instrumental: PathBuf,
}

/// One separation request
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    status: JobStatus,
    pub model: String,
    /// Job-scoped directory, owned by the job manager
    pub dir: PathBuf,
    pub input_path: PathBuf,
    output_paths: Option<OutputPaths>,
    error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Cleanup was requested while processing; remove once terminal
    pub cleanup_requested: bool,
}

impl Job {
    /// New job in QUEUED
    pub fn new(id: JobId, model: String, dir: PathBuf, input_path: PathBuf) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            model,
            dir,
            input_path,
            output_paths: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cleanup_requested: false,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn output_paths(&self) -> Option<&OutputPaths> {
        self.output_paths.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                job_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// QUEUED → PROCESSING
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// PROCESSING → DONE
    pub fn complete(&mut self, outputs: OutputPaths) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Done)?;
        self.output_paths = Some(outputs);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// PROCESSING → FAILED
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        let error = error.into();
        self.error = Some(if error.trim().is_empty() {
            "separation failed".to_string()
        } else {
            error
        });
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Reference time for retention: end of processing, else submission
    pub fn retention_anchor(&self) -> DateTime<Utc> {
        self.finished_at.unwrap_or(self.created_at)
    }

    /// Wire view of the record
    pub fn to_response(&self) -> JobStatusResponse {
        JobStatusResponse {
            job_id: self.id,
            status: self.status,
            model: self.model.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            JobId::new(),
            "htdemucs_ft".to_string(),
            PathBuf::from("/jobs/x"),
            PathBuf::from("/jobs/x/input.audio"),
        )
    }

    fn outputs() -> OutputPaths {
        OutputPaths {
            vocals: PathBuf::from("/jobs/x/vocals.mp3"),
            instrumental: PathBuf::from("/jobs/x/instrumental.mp3"),
        }
    }

    #[test]
    fn happy_path_sets_outputs_only_when_done() {
        let mut job = job();
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(job.output_paths().is_none());

        job.start().unwrap();
        assert_eq!(job.status(), JobStatus::Processing);
        assert!(job.started_at.is_some());
        assert!(job.output_paths().is_none());

        job.complete(outputs()).unwrap();
        assert_eq!(job.status(), JobStatus::Done);
        assert_eq!(job.output_paths(), Some(&outputs()));
        assert!(job.error().is_none());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn failure_sets_error_only() {
        let mut job = job();
        job.start().unwrap();
        job.fail("model crashed").unwrap();

        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error(), Some("model crashed"));
        assert!(job.output_paths().is_none());
    }

    #[test]
    fn blank_error_gets_a_diagnostic() {
        let mut job = job();
        job.start().unwrap();
        job.fail("  ").unwrap();
        assert_eq!(job.error(), Some("separation failed"));
    }

    #[test]
    fn cannot_skip_queued_or_leave_terminal() {
        let mut job = job();
        assert!(job.complete(outputs()).is_err());
        assert!(job.fail("x").is_err());

        job.start().unwrap();
        assert!(job.start().is_err());

        job.complete(outputs()).unwrap();
        let err = job.fail("late").unwrap_err();
        assert_eq!(err.from, JobStatus::Done);
        assert_eq!(job.status(), JobStatus::Done);
        assert!(job.error().is_none());
    }

    #[test]
    fn response_hides_error_unless_failed() {
        let mut job = job();
        job.start().unwrap();
        job.complete(outputs()).unwrap();

        let json = serde_json::to_value(job.to_response()).unwrap();
        assert_eq!(json["status"], "DONE");
        assert!(json.get("error").is_none());
    }
}
