//! # USSplitter addon
//!
//! Client side of USSplitter: sends a song's audio to a ussplitter server,
//! waits for the separation, stores the vocal and instrumental stems next to
//! the song and links them from the song's metadata file.

pub mod config;
pub mod error;
pub mod net;
pub mod sync;
pub mod tags;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use net::ServerConnection;
pub use sync::{SongFiles, SongOutcome, SyncClient};
pub use tags::{merge_tags, MergeOutcome, TagKey};
