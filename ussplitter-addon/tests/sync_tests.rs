//! End-to-end: the sync client against a real server router on a local port

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use ussplitter_addon::{ClientConfig, ClientError, SongFiles, SongOutcome, SyncClient, TagKey};
use ussplitter_common::JobId;
use ussplitter_server::config::JobSettings;
use ussplitter_server::engine::{SeparationEngine, SeparationError, Stems};
use ussplitter_server::services::JobManager;
use ussplitter_server::{build_router, AppState};

/// Engine that prefixes the payload, fails on `FAIL`, and optionally waits on a gate
struct EchoEngine {
    gate: Option<Semaphore>,
}

#[async_trait]
impl SeparationEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    fn models(&self) -> Vec<String> {
        vec!["htdemucs_ft".to_string()]
    }

    fn default_model(&self) -> &str {
        "htdemucs_ft"
    }

    async fn separate(&self, audio: Bytes, _model: &str) -> Result<Stems, SeparationError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if audio.starts_with(b"FAIL") {
            return Err(SeparationError::Engine {
                status: "exit status: 1".to_string(),
                detail: "corrupt input".to_string(),
            });
        }
        Ok(Stems {
            vocals: Bytes::from([b"vocals:".as_slice(), &audio].concat()),
            instrumental: Bytes::from([b"instrumental:".as_slice(), &audio].concat()),
            extension: "mp3".to_string(),
        })
    }
}

struct TestServer {
    addr: SocketAddr,
    manager: Arc<JobManager>,
    engine: Arc<EchoEngine>,
    _data: TempDir,
}

async fn start_server(gated: bool) -> TestServer {
    let data = tempfile::tempdir().unwrap();
    let engine = Arc::new(EchoEngine {
        gate: gated.then(|| Semaphore::new(0)),
    });
    let manager = JobManager::start(
        engine.clone(),
        data.path().join("jobs"),
        JobSettings::default(),
    )
    .await
    .unwrap();

    let app = build_router(AppState::new(manager.clone()), 16 * 1024 * 1024);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        manager,
        engine,
        _data: data,
    }
}

fn client_for(addr: SocketAddr, timeout: Duration) -> SyncClient {
    let mut config = ClientConfig::new(&format!("http://{}", addr)).unwrap();
    config.poll_interval = Duration::from_millis(20);
    config.timeout = timeout;
    config.retry_delay = Duration::from_millis(10);
    SyncClient::new(config).unwrap()
}

/// Song folder with `song.txt` referencing `song.mp3`
fn song_folder(txt: &str, audio: &[u8]) -> (TempDir, SongFiles) {
    let dir = tempfile::tempdir().unwrap();
    let txt_path = dir.path().join("song.txt");
    std::fs::write(&txt_path, txt).unwrap();
    std::fs::write(dir.path().join("song.mp3"), audio).unwrap();
    let song = SongFiles::resolve(&txt_path, None).unwrap();
    (dir, song)
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

const SONG: &str = "#TITLE:Song\n#ARTIST:Band\n#MP3:song.mp3\n: 0 4 5 la\nE\n";

#[tokio::test]
async fn song_is_split_tagged_and_cleaned_up() {
    let server = start_server(false).await;
    let client = client_for(server.addr, Duration::from_secs(10));
    let (dir, song) = song_folder(SONG, b"audio");

    let outcome = client.process_song(&song).await.unwrap();

    let vocals = dir.path().join("song [VOC].mp3");
    let instrumental = dir.path().join("song [INSTR].mp3");
    assert_eq!(
        outcome,
        SongOutcome::Tagged {
            vocals: vocals.clone(),
            instrumental: instrumental.clone(),
            added: vec![TagKey::Vocals, TagKey::Instrumental],
        }
    );
    assert_eq!(std::fs::read(&vocals).unwrap(), b"vocals:audio");
    assert_eq!(std::fs::read(&instrumental).unwrap(), b"instrumental:audio");
    assert_eq!(
        read(&song.txt),
        "#TITLE:Song\n#ARTIST:Band\n#MP3:song.mp3\n#VOCALS:song [VOC].mp3\n#INSTRUMENTAL:song [INSTR].mp3\n: 0 4 5 la\nE\n"
    );

    assert!(server.manager.list().await.is_empty());
}

#[tokio::test]
async fn existing_tags_are_left_alone() {
    let server = start_server(false).await;
    let client = client_for(server.addr, Duration::from_secs(10));
    let txt = "#TITLE:Song\n#MP3:song.mp3\n#VOCALS:mine.mp3\n#INSTRUMENTAL:mine2.mp3\n";
    let (_dir, song) = song_folder(txt, b"audio");

    let outcome = client.process_song(&song).await.unwrap();
    assert!(matches!(outcome, SongOutcome::AlreadyTagged { .. }));
    assert_eq!(read(&song.txt), txt);
}

#[tokio::test]
async fn server_failure_leaves_song_untouched() {
    let server = start_server(false).await;
    let client = client_for(server.addr, Duration::from_secs(10));
    let (dir, song) = song_folder(SONG, b"FAIL bytes");

    let err = client.process_song(&song).await.unwrap_err();
    match err {
        ClientError::JobFailed(message) => assert!(message.contains("corrupt input")),
        other => panic!("expected JobFailed, got {:?}", other),
    }

    assert_eq!(read(&song.txt), SONG);
    assert!(!dir.path().join("song [VOC].mp3").exists());
    assert!(server.manager.list().await.is_empty());
}

#[tokio::test]
async fn waiting_too_long_times_out() {
    let server = start_server(true).await;
    let client = client_for(server.addr, Duration::from_millis(200));
    let (_dir, song) = song_folder(SONG, b"audio");

    let err = client.process_song(&song).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)));
    assert_eq!(read(&song.txt), SONG);

    // the abandoned job finishes and is then dropped by the deferred cleanup
    if let Some(gate) = &server.engine.gate {
        gate.add_permits(1);
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while !server.manager.list().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("abandoned job was not removed");
}

#[tokio::test]
async fn one_failing_song_does_not_stop_the_next() {
    let server = start_server(false).await;
    let client = client_for(server.addr, Duration::from_secs(10));

    let (_missing_dir, mut missing) = song_folder(SONG, b"audio");
    missing.audio = missing.audio.with_file_name("gone.mp3");
    let (_dir, good) = song_folder(SONG, b"good");

    let results = client.process_songs(&[missing, good.clone()]).await;
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], Err(ClientError::Io(_))));
    assert!(matches!(results[1], Ok(SongOutcome::Tagged { .. })));
    assert!(read(&good.txt).contains("#VOCALS:song [VOC].mp3"));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(addr, Duration::from_secs(5));
    let (_dir, song) = song_folder(SONG, b"audio");

    let err = client.process_song(&song).await.unwrap_err();
    assert!(err.is_transient(), "got {:?}", err);
    assert_eq!(read(&song.txt), SONG);
}

#[tokio::test]
async fn check_endpoints_are_reachable() {
    let server = start_server(false).await;
    let client = client_for(server.addr, Duration::from_secs(5));

    let health = client.connection().health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.module, "ussplitter-server");

    let models = client.connection().models().await.unwrap();
    assert_eq!(models.default_model, "htdemucs_ft");
}

/// Server that accepts connections and never answers
async fn start_silent_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// Server whose job is DONE at once but whose result body never arrives
async fn start_stalled_result_server() -> SocketAddr {
    let job_id = JobId::new();
    let submitted = json!({"job_id": job_id, "status": "QUEUED", "model": "htdemucs_ft"});
    let status = json!({
        "job_id": job_id,
        "status": "DONE",
        "model": "htdemucs_ft",
        "created_at": "2026-01-01T00:00:00Z"
    });

    let app = Router::new()
        .route(
            "/jobs",
            post(move || {
                let body = submitted.clone();
                async move { (StatusCode::ACCEPTED, Json(body)) }
            }),
        )
        .route(
            "/jobs/:id",
            get(move || {
                let body = status.clone();
                async move { Json(body) }
            })
            .delete(move || async move { Json(json!({"job_id": job_id, "acknowledged": true})) }),
        )
        .route(
            "/jobs/:id/result",
            get(|| async { std::future::pending::<()>().await }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn silent_server_hits_the_request_timeout() {
    let addr = start_silent_server().await;
    let mut config = ClientConfig::new(&format!("http://{}", addr)).unwrap();
    config.request_timeout = Duration::from_millis(200);
    let client = SyncClient::new(config).unwrap();
    let (_dir, song) = song_folder(SONG, b"audio");

    let err = tokio::time::timeout(Duration::from_secs(10), client.process_song(&song))
        .await
        .expect("request was not bounded")
        .unwrap_err();
    match &err {
        ClientError::Http(e) => assert!(e.is_timeout(), "got {:?}", e),
        other => panic!("expected a timed out request, got {:?}", other),
    }
    assert!(err.is_transient());
    assert_eq!(read(&song.txt), SONG);
}

#[tokio::test]
async fn stalled_download_counts_against_the_job_timeout() {
    let addr = start_stalled_result_server().await;
    let client = client_for(addr, Duration::from_millis(300));
    let (dir, song) = song_folder(SONG, b"audio");

    let err = tokio::time::timeout(Duration::from_secs(10), client.process_song(&song))
        .await
        .expect("download was not bounded")
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)), "got {:?}", err);
    assert_eq!(read(&song.txt), SONG);
    assert!(!dir.path().join("song [VOC].mp3").exists());
}
