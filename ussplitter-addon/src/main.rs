//! ussplitter-addon - split UltraStar songs on a remote ussplitter server
//!
//! Stands in for the song-library host: each metadata file given on the
//! command line is run through the server one at a time.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ussplitter_addon::{ClientConfig, SongFiles, SongOutcome, SyncClient};

#[derive(Parser, Debug)]
#[command(name = "ussplitter-addon")]
#[command(about = "Add vocal and instrumental stems to UltraStar songs")]
#[command(version)]
struct Args {
    /// Addon config file (KEY=VALUE lines)
    #[arg(short, long, env = "USSPLITTER_ADDON_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split one or more songs and tag their metadata files
    Split {
        /// UltraStar .txt files
        #[arg(required = true)]
        songs: Vec<PathBuf>,

        /// Audio file to use instead of the #AUDIO/#MP3 header (single song only)
        #[arg(long)]
        audio: Option<PathBuf>,
    },
    /// Check that the server is reachable and list its models
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config_path = args
        .config
        .unwrap_or_else(ussplitter_common::config::default_addon_config_path);
    let config = ClientConfig::load(&config_path)
        .with_context(|| format!("Invalid addon config {}", config_path.display()))?;
    info!(server = %config.server_uri, "Using ussplitter server");

    let client = SyncClient::new(config)?;

    match args.command {
        Command::Check => check(&client).await,
        Command::Split { songs, audio } => split(&client, songs, audio).await,
    }
}

async fn check(client: &SyncClient) -> Result<()> {
    let connection = client.connection();
    let health = connection
        .health()
        .await
        .context("Server is not reachable")?;
    println!(
        "{} {} is {} ({} queued{})",
        health.module,
        health.version,
        health.status,
        health.queued,
        health
            .processing
            .map(|id| format!(", processing {}", id))
            .unwrap_or_default()
    );

    let models = connection.models().await.context("Failed to list models")?;
    for model in models.models {
        let marker = if model == models.default_model { " (default)" } else { "" };
        println!("  {}{}", model, marker);
    }
    Ok(())
}

async fn split(client: &SyncClient, txts: Vec<PathBuf>, audio: Option<PathBuf>) -> Result<()> {
    if audio.is_some() && txts.len() != 1 {
        bail!("--audio can only be used with a single song");
    }

    let mut songs = Vec::with_capacity(txts.len());
    let mut failed = 0usize;
    for txt in &txts {
        match SongFiles::resolve(txt, audio.clone()) {
            Ok(song) => songs.push(song),
            Err(e) => {
                println!("FAILED  {}: {}", txt.display(), e);
                failed += 1;
            }
        }
    }

    let results = client.process_songs(&songs).await;
    for (song, result) in songs.iter().zip(results) {
        match result {
            Ok(SongOutcome::Tagged { added, .. }) => {
                let added: Vec<String> = added.iter().map(|k| k.to_string()).collect();
                println!("TAGGED  {} ({})", song.txt.display(), added.join(", "));
            }
            Ok(SongOutcome::AlreadyTagged { .. }) => {
                println!("KEPT    {} (tags already present)", song.txt.display());
            }
            Err(e) => {
                println!("FAILED  {}: {}", song.txt.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} songs failed", failed, txts.len());
    }
    Ok(())
}
