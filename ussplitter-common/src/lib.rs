//! # USSplitter Common Library
//!
//! Shared code for the separation server and the addon client:
//! - Error type
//! - Job identifiers and status values
//! - HTTP request/response bodies
//! - Two-stem result codec
//! - Data directory resolution

pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod stems;

pub use error::{Error, Result};
pub use job::{JobId, JobStatus};
pub use stems::{StemBundle, StemPart};
