//! Job identifiers and lifecycle states
//!
//! A job moves strictly along `QUEUED → PROCESSING → {DONE, FAILED}`.
//! `DONE` and `FAILED` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job handle returned by `POST /jobs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Accepted and waiting for the worker
    Queued,
    /// Currently being separated (at most one job at a time)
    Processing,
    /// Stems are available
    Done,
    /// Separation failed, diagnostic available
    Failed,
}

impl JobStatus {
    /// `DONE` and `FAILED` never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Wire name, matches the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");

        let parsed: JobStatus = serde_json::from_str("\"DONE\"").unwrap();
        assert_eq!(parsed, JobStatus::Done);
    }

    #[test]
    fn only_forward_transitions_are_legal() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Done));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Done));
        assert!(!JobStatus::Done.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Done.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
