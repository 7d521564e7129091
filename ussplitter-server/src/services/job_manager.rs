//! Job manager: admission, the single processing lane, and file lifecycle
//!
//! Exactly one worker task exists per manager. It takes the oldest QUEUED job,
//! runs it to DONE or FAILED, and only then looks at the queue again, so the
//! separation engine never sees two calls at once. HTTP handlers only touch
//! the job store and the job directories, never the engine.
//!
//! Files: every job owns `<jobs_dir>/<job id>/` holding the uploaded audio and,
//! once DONE, the two stems. Nothing outside this module reads or writes there.

use bytes::Bytes;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::Instrument;
use ussplitter_common::{JobId, JobStatus, StemBundle, StemPart};

use super::job_store::{JobStore, QueueStats, Removal};
use crate::config::JobSettings;
use crate::engine::SeparationEngine;
use crate::error::JobError;
use crate::models::{Job, OutputPaths};

const INPUT_FILE: &str = "input.audio";

/// Owner of the job store, the engine, and the worker lane
pub struct JobManager {
    store: JobStore,
    engine: Arc<dyn SeparationEngine>,
    jobs_dir: PathBuf,
    settings: JobSettings,
    wake: Notify,
}

impl JobManager {
    /// Prepare the jobs directory and spawn the worker.
    ///
    /// Job directories left over from a previous process are deleted: jobs do
    /// not survive a restart.
    pub async fn start(
        engine: Arc<dyn SeparationEngine>,
        jobs_dir: PathBuf,
        settings: JobSettings,
    ) -> Result<Arc<Self>, JobError> {
        purge_stale_jobs(&jobs_dir).await?;
        tokio::fs::create_dir_all(&jobs_dir).await?;

        let manager = Arc::new(Self {
            store: JobStore::new(),
            engine,
            jobs_dir,
            settings,
            wake: Notify::new(),
        });

        tokio::spawn(Arc::clone(&manager).run_worker());

        Ok(manager)
    }

    pub fn engine(&self) -> &Arc<dyn SeparationEngine> {
        &self.engine
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Store the audio, register a QUEUED job and wake the worker.
    ///
    /// Returns immediately; the job runs in the background.
    pub async fn submit(&self, audio: Bytes, model: Option<String>) -> Result<Job, JobError> {
        if audio.is_empty() {
            return Err(JobError::InvalidInput("audio payload is empty".to_string()));
        }

        let model = match model.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()) {
            None => self.engine.default_model().to_string(),
            Some(model) if self.engine.models().contains(&model) => model,
            Some(model) => {
                return Err(JobError::InvalidInput(format!("unknown model '{}'", model)))
            }
        };

        // Cheap early reject; the authoritative check happens under the lock
        if self.store.queued_len().await >= self.settings.max_queued {
            return Err(JobError::ResourceExhausted {
                limit: self.settings.max_queued,
            });
        }

        let id = JobId::new();
        let dir = self.jobs_dir.join(id.to_string());
        let input_path = dir.join(INPUT_FILE);
        tokio::fs::create_dir_all(&dir).await?;
        if let Err(e) = tokio::fs::write(&input_path, &audio).await {
            remove_job_files(&dir).await;
            return Err(e.into());
        }

        let job = Job::new(id, model, dir.clone(), input_path);
        match self.store.enqueue(job.clone(), self.settings.max_queued).await {
            Ok(position) => {
                tracing::info!(
                    job_id = %id,
                    model = %job.model,
                    bytes = audio.len(),
                    position,
                    "Job queued"
                );
                self.wake.notify_one();
                Ok(job)
            }
            Err(e) => {
                remove_job_files(&dir).await;
                Err(e)
            }
        }
    }

    /// Current snapshot of a job
    pub async fn get_status(&self, id: &JobId) -> Result<Job, JobError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Stems of a DONE job, vocals first.
    ///
    /// `NotReady` while QUEUED/PROCESSING, `Failed` with the stored diagnostic
    /// for FAILED jobs.
    pub async fn fetch_result(&self, id: &JobId) -> Result<StemBundle, JobError> {
        let job = self.get_status(id).await?;

        let outputs = match job.status() {
            JobStatus::Queued | JobStatus::Processing => {
                return Err(JobError::NotReady {
                    job_id: *id,
                    status: job.status(),
                })
            }
            JobStatus::Failed => {
                return Err(JobError::Failed {
                    job_id: *id,
                    message: job.error().unwrap_or("separation failed").to_string(),
                })
            }
            JobStatus::Done => job
                .output_paths()
                .cloned()
                .ok_or_else(|| JobError::NotFound(id.to_string()))?,
        };

        Ok(StemBundle {
            vocals: read_output(id, &outputs.vocals).await?,
            instrumental: read_output(id, &outputs.instrumental).await?,
        })
    }

    /// Forget a job and delete its files. Never fails; unknown ids are fine.
    ///
    /// A PROCESSING job keeps running and is removed once it finishes.
    pub async fn cleanup(&self, id: &JobId) -> Removal {
        let removal = self.store.remove(id).await;
        match &removal {
            Removal::Removed(job) => {
                remove_job_files(&job.dir).await;
                tracing::info!(job_id = %id, status = %job.status(), "Job cleaned up");
            }
            Removal::Deferred => {
                tracing::info!(job_id = %id, "Cleanup deferred until processing finishes");
            }
            Removal::Absent => {
                tracing::debug!(job_id = %id, "Cleanup of unknown job ignored");
            }
        }
        removal
    }

    /// Remove every DONE/FAILED job. QUEUED and PROCESSING jobs are kept.
    pub async fn cleanup_all(&self) -> usize {
        let removed = self.store.remove_terminal().await;
        for job in &removed {
            remove_job_files(&job.dir).await;
        }
        tracing::info!(removed = removed.len(), "Removed all finished jobs");
        removed.len()
    }

    /// Remove terminal jobs older than `ttl`
    pub async fn sweep_expired(&self, ttl: Duration) -> usize {
        let expired = self.store.remove_expired(Utc::now(), ttl).await;
        for job in &expired {
            remove_job_files(&job.dir).await;
            tracing::info!(job_id = %job.id(), status = %job.status(), "Expired job removed");
        }
        expired.len()
    }

    /// All jobs in submission order
    pub async fn list(&self) -> Vec<Job> {
        self.store.list().await
    }

    pub async fn stats(&self) -> QueueStats {
        self.store.stats().await
    }

    /// The processing lane. One job end-to-end, then the next.
    async fn run_worker(self: Arc<Self>) {
        tracing::info!(engine = self.engine.name(), "Separation worker started");

        loop {
            let Some(job) = self.store.claim_next().await else {
                self.wake.notified().await;
                continue;
            };

            let span = tracing::info_span!("separation_job", job_id = %job.id(), model = %job.model);
            self.process(job).instrument(span).await;
        }
    }

    async fn process(&self, job: Job) {
        let id = job.id();
        tracing::info!("Separating");
        let started = std::time::Instant::now();

        let result = self.separate_job(&job).await;
        if let Err(message) = &result {
            tracing::error!(error = %message, "Separation failed");
        }

        match self.store.finish(&id, result).await {
            Some(finished) => {
                tracing::info!(
                    status = %finished.job.status(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Separation finished"
                );
                if finished.removed {
                    remove_job_files(&finished.job.dir).await;
                    tracing::info!("Job removed after deferred cleanup");
                }
            }
            None => {
                tracing::error!("Processed job vanished from the store");
                remove_job_files(&job.dir).await;
            }
        }
    }

    /// Run the engine on a job's input and write its stems.
    ///
    /// Every failure, including an engine panic, becomes the job's diagnostic.
    /// On failure no output file is left behind.
    async fn separate_job(&self, job: &Job) -> Result<OutputPaths, String> {
        let audio = tokio::fs::read(&job.input_path)
            .await
            .map_err(|e| format!("failed to read uploaded audio: {}", e))?;

        let engine = Arc::clone(&self.engine);
        let model = job.model.clone();
        let stems = tokio::spawn(async move { engine.separate(Bytes::from(audio), &model).await })
            .await
            .map_err(|e| format!("separation engine crashed: {}", e))?
            .map_err(|e| e.to_string())?;

        let extension = sanitize_extension(&stems.extension);
        let outputs = OutputPaths {
            vocals: job.dir.join(format!("vocals.{}", extension)),
            instrumental: job.dir.join(format!("instrumental.{}", extension)),
        };

        let written = async {
            tokio::fs::write(&outputs.vocals, &stems.vocals).await?;
            tokio::fs::write(&outputs.instrumental, &stems.instrumental).await
        }
        .await;

        if let Err(e) = written {
            for path in [&outputs.vocals, &outputs.instrumental] {
                let _ = tokio::fs::remove_file(path).await;
            }
            return Err(format!("failed to store separated stems: {}", e));
        }

        Ok(outputs)
    }
}

async fn read_output(id: &JobId, path: &Path) -> Result<StemPart, JobError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        // Cleaned up between the status check and the read
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(JobError::NotFound(id.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(StemPart::new(filename, data))
}

fn sanitize_extension(extension: &str) -> String {
    let clean: String = extension
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if clean.is_empty() {
        "bin".to_string()
    } else {
        clean.to_ascii_lowercase()
    }
}

/// Delete a job directory. Failures are logged and swallowed.
async fn remove_job_files(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to delete job files");
        }
    }
}

async fn purge_stale_jobs(jobs_dir: &Path) -> Result<(), JobError> {
    let mut entries = match tokio::fs::read_dir(jobs_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut purged = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => purged += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to purge stale job");
            }
        }
    }

    if purged > 0 {
        tracing::warn!(purged, "Removed jobs left over from a previous run");
    }
    Ok(())
}
