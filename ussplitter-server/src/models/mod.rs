//! Data models for ussplitter-server

pub mod job;

pub use job::{InvalidTransition, Job, OutputPaths};
