//! Shared test helpers: a scriptable separation engine and polling utilities
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use ussplitter_common::{JobId, JobStatus};
use ussplitter_server::config::JobSettings;
use ussplitter_server::engine::{SeparationEngine, SeparationError, Stems};
use ussplitter_server::models::Job;
use ussplitter_server::services::JobManager;

/// Fake engine driven by the audio payload:
/// - starts with `FAIL`: returns an engine error
/// - starts with `PANIC`: panics
/// - anything else: vocals = `vocals:` + audio, instrumental = `instrumental:` + audio
///
/// When gated, every call waits for a permit from [`FakeEngine::release`].
pub struct FakeEngine {
    gate: Option<Semaphore>,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    seen: Mutex<Vec<Bytes>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Self::build(None, Duration::ZERO)
    }

    /// Every separation blocks until released
    pub fn gated() -> Arc<Self> {
        Self::build(Some(Semaphore::new(0)), Duration::ZERO)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(None, delay)
    }

    fn build(gate: Option<Semaphore>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            gate,
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Let `n` gated separations proceed
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Highest number of overlapping `separate` calls observed
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Payloads in the order the engine received them
    pub fn seen(&self) -> Vec<Bytes> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SeparationEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn models(&self) -> Vec<String> {
        vec!["htdemucs".to_string(), "htdemucs_ft".to_string()]
    }

    fn default_model(&self) -> &str {
        "htdemucs_ft"
    }

    async fn separate(&self, audio: Bytes, _model: &str) -> Result<Stems, SeparationError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().unwrap().push(audio.clone());

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if audio.starts_with(b"PANIC") {
            panic!("fake engine exploded");
        }
        if audio.starts_with(b"FAIL") {
            return Err(SeparationError::Engine {
                status: "exit status: 1".to_string(),
                detail: "CUDA out of memory".to_string(),
            });
        }

        Ok(Stems {
            vocals: Bytes::from([b"vocals:".as_slice(), &audio].concat()),
            instrumental: Bytes::from([b"instrumental:".as_slice(), &audio].concat()),
            extension: "mp3".to_string(),
        })
    }
}

pub fn settings(max_queued: usize) -> JobSettings {
    JobSettings {
        max_queued,
        ..JobSettings::default()
    }
}

/// Start a manager over `engine` in a fresh temp directory
pub async fn start_manager(
    engine: Arc<FakeEngine>,
    max_queued: usize,
) -> (TempDir, Arc<JobManager>) {
    let temp = tempfile::tempdir().expect("Failed to create temp dir");
    let manager = JobManager::start(engine, temp.path().join("jobs"), settings(max_queued))
        .await
        .expect("Failed to start job manager");
    (temp, manager)
}

/// Poll until the job reaches `want`
pub async fn wait_for_status(manager: &JobManager, id: &JobId, want: JobStatus) -> Job {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(job) = manager.get_status(id).await {
                if job.status() == want {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {} never reached {}", id, want))
}

/// Poll until the job is no longer known
pub async fn wait_until_gone(manager: &JobManager, id: &JobId) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while manager.get_status(id).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {} was never removed", id));
}
