//! Separation engine adapter
//!
//! The ML model is an external collaborator. Everything the job manager needs
//! from it is one call: audio in, vocals + instrumental out. Implementations
//! do their expensive initialization once, before the first job, and must be
//! shareable read-only across jobs.

pub mod demucs;

pub use demucs::DemucsEngine;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Separation failure, captured into the job record as its diagnostic
#[derive(Debug, Error)]
pub enum SeparationError {
    /// Engine process could not be started
    #[error("failed to launch separation engine: {0}")]
    Launch(String),

    /// Engine ran and reported a failure
    #[error("separation engine exited with {status}: {detail}")]
    Engine { status: String, detail: String },

    /// Engine reported success but an expected stem was not produced
    #[error("separation engine produced no {0} stem")]
    MissingStem(&'static str),

    /// Input rejected before running the engine
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error during separation: {0}")]
    Io(#[from] std::io::Error),
}

/// Output of one separation run
#[derive(Debug, Clone)]
pub struct Stems {
    pub vocals: Bytes,
    pub instrumental: Bytes,
    /// File extension of both stems (e.g. "mp3")
    pub extension: String,
}

/// Adapter trait over the separation model
#[async_trait]
pub trait SeparationEngine: Send + Sync {
    /// Engine identifier for logs and /health
    fn name(&self) -> &str;

    /// Models accepted by [`SeparationEngine::separate`]
    fn models(&self) -> Vec<String>;

    /// Model used when a submission does not name one
    fn default_model(&self) -> &str;

    /// Split `audio` into vocals and instrumental using `model`.
    ///
    /// Callers serialize invocations; implementations may assume exclusive
    /// use of the compute device for the duration of the call.
    async fn separate(&self, audio: Bytes, model: &str) -> Result<Stems, SeparationError>;
}
