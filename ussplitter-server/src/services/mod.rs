//! Services for ussplitter-server

pub mod janitor;
pub mod job_manager;
pub mod job_store;

pub use janitor::spawn_janitor;
pub use job_manager::JobManager;
pub use job_store::{JobStore, QueueStats, Removal};
