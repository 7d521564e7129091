//! Client sync: one song through submit, poll, download, tag, cleanup
//!
//! The host hands over a song (metadata file plus audio file) and gets back
//! a per-song outcome. Server-side failures, timeouts and network problems end
//! that song's run only; the server job is cleaned up on every path.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn, Instrument};
use ussplitter_common::{JobId, JobStatus, StemBundle, StemPart};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::net::ServerConnection;
use crate::tags::{self, MergeOutcome, TagKey};

/// Consecutive failed status checks tolerated before giving up
const MAX_POLL_ERRORS: u32 = 5;

const VOCALS_SUFFIX: &str = "[VOC]";
const INSTRUMENTAL_SUFFIX: &str = "[INSTR]";

/// Files of one song
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongFiles {
    /// UltraStar metadata file
    pub txt: PathBuf,
    pub audio: PathBuf,
}

impl SongFiles {
    /// Pair a metadata file with its audio.
    ///
    /// Without an explicit audio path, the `#AUDIO` header (or the older
    /// `#MP3`) is read and resolved against the metadata file's directory.
    pub fn resolve(txt: &Path, audio: Option<PathBuf>) -> Result<Self> {
        let audio = match audio {
            Some(audio) => audio,
            None => {
                let text = std::fs::read_to_string(txt)?;
                let name = tags::read_header(&text, "AUDIO")
                    .or_else(|| tags::read_header(&text, "MP3"))
                    .ok_or_else(|| {
                        ClientError::Config(format!(
                            "{} has no #AUDIO or #MP3 header",
                            txt.display()
                        ))
                    })?;
                song_dir(txt).join(name)
            }
        };

        Ok(Self {
            txt: txt.to_path_buf(),
            audio,
        })
    }

    /// Short name for logs
    pub fn name(&self) -> String {
        self.txt
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.txt.display().to_string())
    }
}

/// Successful end of a song's run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SongOutcome {
    /// Stems saved and tags written
    Tagged {
        vocals: PathBuf,
        instrumental: PathBuf,
        added: Vec<TagKey>,
    },
    /// Stems saved; both tags were already set and left alone
    AlreadyTagged {
        vocals: PathBuf,
        instrumental: PathBuf,
    },
}

/// Drives songs through a ussplitter server
pub struct SyncClient {
    connection: ServerConnection,
    config: ClientConfig,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let connection = ServerConnection::new(&config.server_uri, config.request_timeout)?;
        Ok(Self { connection, config })
    }

    pub fn connection(&self) -> &ServerConnection {
        &self.connection
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one song end-to-end
    pub async fn process_song(&self, song: &SongFiles) -> Result<SongOutcome> {
        let span = tracing::info_span!("song", song = %song.name());
        self.run_song(song).instrument(span).await
    }

    /// Run songs one after another; a failure does not stop the others
    pub async fn process_songs(&self, songs: &[SongFiles]) -> Vec<Result<SongOutcome>> {
        let mut results = Vec::with_capacity(songs.len());
        for song in songs {
            let result = self.process_song(song).await;
            if let Err(e) = &result {
                error!(song = %song.name(), error = %e, "Song failed");
            }
            results.push(result);
        }
        results
    }

    async fn run_song(&self, song: &SongFiles) -> Result<SongOutcome> {
        let audio = tokio::fs::read(&song.audio).await?;
        debug!(audio = %song.audio.display(), bytes = audio.len(), "Read audio");

        let submitted = self
            .connection
            .submit(Bytes::from(audio), self.config.model.as_deref())
            .await?;
        let job_id = submitted.job_id;
        info!(job_id = %job_id, model = %submitted.model, "Sent audio for splitting");

        let result = self.finish_job(&job_id, song).await;

        if let Err(e) = self.connection.cleanup(&job_id).await {
            warn!(job_id = %job_id, error = %e, "Server cleanup failed");
        }

        if result.is_ok() {
            info!("Split finished");
        }
        result
    }

    async fn finish_job(&self, job_id: &JobId, song: &SongFiles) -> Result<SongOutcome> {
        // One deadline covers both waiting and the download
        let bundle = tokio::time::timeout(self.config.timeout, async {
            self.wait_until_done(job_id).await?;
            self.download(job_id).await
        })
        .await
        .map_err(|_| ClientError::Timeout(self.config.timeout))??;

        let (vocals, instrumental) = save_stems(&song.audio, &bundle).await?;

        let dir = song_dir(&song.txt);
        let outcome = tags::merge_tags(
            &song.txt,
            &tag_value(dir, &vocals),
            &tag_value(dir, &instrumental),
        )?;

        Ok(match outcome {
            MergeOutcome::Written { added } => {
                info!(?added, "Tags written");
                SongOutcome::Tagged {
                    vocals,
                    instrumental,
                    added,
                }
            }
            MergeOutcome::NoOp => {
                info!("Tags already present, song file left untouched");
                SongOutcome::AlreadyTagged {
                    vocals,
                    instrumental,
                }
            }
        })
    }

    /// Poll until DONE. FAILED becomes [`ClientError::JobFailed`].
    async fn wait_until_done(&self, job_id: &JobId) -> Result<()> {
        let mut errors = 0;
        let mut last_status = None;

        loop {
            match self.connection.status(job_id).await {
                Ok(job) => {
                    errors = 0;
                    if last_status != Some(job.status) {
                        debug!(status = %job.status, "Job status");
                        last_status = Some(job.status);
                    }
                    match job.status {
                        JobStatus::Done => return Ok(()),
                        JobStatus::Failed => {
                            return Err(ClientError::JobFailed(
                                job.error.unwrap_or_else(|| "separation failed".to_string()),
                            ))
                        }
                        JobStatus::Queued | JobStatus::Processing => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    errors += 1;
                    if errors >= MAX_POLL_ERRORS {
                        error!(error = %e, "Too many failed status checks, giving up");
                        return Err(e);
                    }
                    warn!(error = %e, attempt = errors, "Status check failed, retrying");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Fetch the stems, retrying transport errors
    async fn download(&self, job_id: &JobId) -> Result<StemBundle> {
        let mut attempt = 0;
        loop {
            match self.connection.fetch_result(job_id).await {
                Ok(bundle) => return Ok(bundle),
                Err(e) if e.is_transient() && attempt < self.config.download_retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Download failed, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn song_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Destination of a stem: `<audio stem> [VOC].mp3` next to the audio file
fn stem_path(audio: &Path, suffix: &str, part: &StemPart) -> PathBuf {
    let stem = audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "song".to_string());
    let extension = part.extension().unwrap_or("mp3");
    song_dir(audio).join(format!("{} {}.{}", stem, suffix, extension))
}

async fn save_stems(audio: &Path, bundle: &StemBundle) -> Result<(PathBuf, PathBuf)> {
    let vocals = stem_path(audio, VOCALS_SUFFIX, &bundle.vocals);
    let instrumental = stem_path(audio, INSTRUMENTAL_SUFFIX, &bundle.instrumental);

    tokio::fs::write(&vocals, &bundle.vocals.data).await?;
    tokio::fs::write(&instrumental, &bundle.instrumental.data).await?;
    debug!(
        vocals = %vocals.display(),
        instrumental = %instrumental.display(),
        "Saved stems"
    );

    Ok((vocals, instrumental))
}

/// Tag value for `file`: relative to the song directory when possible
fn tag_value(song_dir: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(song_dir).unwrap_or(file);
    relative.to_string_lossy().replace('\\', "/")
}
