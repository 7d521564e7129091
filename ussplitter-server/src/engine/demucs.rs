//! Demucs separation engine
//!
//! Runs the `demucs` command-line tool in two-stem mode:
//!
//! ```text
//! demucs --mp3 --mp3-bitrate=<n> --two-stems=vocals -n <model> -j <workers> -d <device> -o <out> <input>
//! ```
//!
//! demucs writes `<out>/<model>/<input stem>/vocals.mp3` and `no_vocals.mp3`;
//! the latter is the instrumental. Each run gets its own scratch directory,
//! removed when the run ends whatever the outcome.

use async_trait::async_trait;
use bytes::Bytes;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{SeparationEngine, SeparationError, Stems};
use crate::config::{DeviceSetting, EngineConfig};

const INPUT_NAME: &str = "input";
const INPUT_EXTENSION: &str = "mp3";
const STDERR_TAIL_LINES: usize = 20;

/// Compute device passed to demucs (`-d`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

/// Demucs-backed [`SeparationEngine`]
#[derive(Debug, Clone)]
pub struct DemucsEngine {
    program: PathBuf,
    default_model: String,
    models: Vec<String>,
    device: Device,
    mp3_bitrate: u32,
    workers: u32,
    scratch_dir: PathBuf,
}

impl DemucsEngine {
    /// One-time startup: verify demucs can be launched and pick the device.
    pub async fn initialize(
        config: &EngineConfig,
        scratch_dir: PathBuf,
    ) -> Result<Self, SeparationError> {
        let probe = Command::new(&config.program)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = probe {
            return Err(SeparationError::Launch(format!(
                "{}: {}",
                config.program.display(),
                e
            )));
        }

        let device = resolve_device(config.device).await;
        Self::with_device(config, scratch_dir, device)
    }

    /// Build an engine for a known device without probing the system
    pub fn with_device(
        config: &EngineConfig,
        scratch_dir: PathBuf,
        device: Device,
    ) -> Result<Self, SeparationError> {
        std::fs::create_dir_all(&scratch_dir)?;

        Ok(Self {
            program: config.program.clone(),
            default_model: config.default_model.clone(),
            models: config.models.clone(),
            device,
            mp3_bitrate: config.mp3_bitrate,
            workers: config.workers,
            scratch_dir,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Command line for one run
    pub fn command_args(&self, input: &Path, output_dir: &Path, model: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--mp3".into(),
            format!("--mp3-bitrate={}", self.mp3_bitrate).into(),
            "--two-stems=vocals".into(),
            "-n".into(),
            model.into(),
            "-j".into(),
            self.workers.to_string().into(),
            "-d".into(),
            self.device.as_arg().into(),
            "-o".into(),
        ];
        args.push(output_dir.as_os_str().to_owned());
        args.push(input.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl SeparationEngine for DemucsEngine {
    fn name(&self) -> &str {
        "demucs"
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn separate(&self, audio: Bytes, model: &str) -> Result<Stems, SeparationError> {
        if audio.is_empty() {
            return Err(SeparationError::InvalidInput("audio is empty".to_string()));
        }
        if !self.models.iter().any(|m| m == model) {
            return Err(SeparationError::InvalidInput(format!(
                "unknown model '{}'",
                model
            )));
        }

        let scratch = tempfile::Builder::new()
            .prefix("demucs-")
            .tempdir_in(&self.scratch_dir)?;
        let input = scratch
            .path()
            .join(format!("{}.{}", INPUT_NAME, INPUT_EXTENSION));
        let output_dir = scratch.path().join("out");
        tokio::fs::write(&input, &audio).await?;

        tracing::debug!(
            model = %model,
            device = self.device.as_arg(),
            scratch = %scratch.path().display(),
            "Running demucs"
        );

        let output = Command::new(&self.program)
            .args(self.command_args(&input, &output_dir, model))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SeparationError::Launch(format!("{}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SeparationError::Engine {
                status: output.status.to_string(),
                detail: tail_lines(&stderr, STDERR_TAIL_LINES),
            });
        }

        let stem_dir = output_dir.join(model).join(INPUT_NAME);
        let vocals = read_stem(&stem_dir, "vocals", "vocals").await?;
        let instrumental = read_stem(&stem_dir, "no_vocals", "instrumental").await?;

        Ok(Stems {
            vocals,
            instrumental,
            extension: INPUT_EXTENSION.to_string(),
        })
    }
}

async fn read_stem(
    dir: &Path,
    file_stem: &str,
    label: &'static str,
) -> Result<Bytes, SeparationError> {
    let path = dir.join(format!("{}.{}", file_stem, INPUT_EXTENSION));
    match tokio::fs::read(&path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(SeparationError::MissingStem(label))
        }
        Err(e) => Err(e.into()),
    }
}

/// Pick the compute device. `Auto` probes for an NVIDIA GPU once.
async fn resolve_device(setting: DeviceSetting) -> Device {
    match setting {
        DeviceSetting::Cuda => Device::Cuda,
        DeviceSetting::Cpu => Device::Cpu,
        DeviceSetting::Auto => {
            let gpu = Command::new("nvidia-smi")
                .arg("-L")
                .stderr(Stdio::null())
                .output()
                .await
                .map(|out| out.status.success() && !out.stdout.is_empty())
                .unwrap_or(false);
            if gpu {
                tracing::info!("CUDA device found, separating on GPU");
                Device::Cuda
            } else {
                tracing::warn!("No CUDA device found, falling back to CPU separation");
                Device::Cpu
            }
        }
    }
}

fn tail_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max);
    let tail = lines[start..].join("\n");
    if tail.is_empty() {
        "no diagnostic output".to_string()
    } else {
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(program: PathBuf, scratch: &Path) -> DemucsEngine {
        let config = EngineConfig {
            program,
            ..EngineConfig::default()
        };
        DemucsEngine::with_device(&config, scratch.to_path_buf(), Device::Cpu).unwrap()
    }

    #[test]
    fn command_line_requests_two_stems() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = engine(PathBuf::from("demucs"), scratch.path());

        let args = engine.command_args(Path::new("/s/input.mp3"), Path::new("/s/out"), "htdemucs");
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "--mp3",
                "--mp3-bitrate=128",
                "--two-stems=vocals",
                "-n",
                "htdemucs",
                "-j",
                "2",
                "-d",
                "cpu",
                "-o",
                "/s/out",
                "/s/input.mp3",
            ]
        );
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let text = (1..=30).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&text, 3);
        assert_eq!(tail, "line 28\nline 29\nline 30");
        assert_eq!(tail_lines("", 3), "no diagnostic output");
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_before_launch() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = engine(PathBuf::from("/nonexistent/demucs"), scratch.path());

        let err = engine
            .separate(Bytes::from_static(b"audio"), "not-a-model")
            .await
            .unwrap_err();
        assert!(matches!(err, SeparationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = engine(PathBuf::from("/nonexistent/demucs"), scratch.path());

        let err = engine
            .separate(Bytes::from_static(b"audio"), "htdemucs_ft")
            .await
            .unwrap_err();
        assert!(matches!(err, SeparationError::Launch(_)));
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-demucs.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_stems_written_by_demucs() {
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let script = write_script(
            bin.path(),
            r#"out=""; model=""
while [ $# -gt 1 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -n) model="$2"; shift ;;
  esac
  shift
done
name=$(basename "$1" .mp3)
mkdir -p "$out/$model/$name"
printf 'V' > "$out/$model/$name/vocals.mp3"
printf 'I' > "$out/$model/$name/no_vocals.mp3""#,
        );
        let engine = engine(script, scratch.path());

        let stems = engine
            .separate(Bytes::from_static(b"audio"), "htdemucs_ft")
            .await
            .unwrap();

        assert_eq!(stems.vocals, Bytes::from_static(b"V"));
        assert_eq!(stems.instrumental, Bytes::from_static(b"I"));
        assert_eq!(stems.extension, "mp3");
        // scratch directory removed after the run
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_run_carries_stderr() {
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let script = write_script(bin.path(), "echo 'corrupt input' >&2\nexit 3");
        let engine = engine(script, scratch.path());

        let err = engine
            .separate(Bytes::from_static(b"garbage"), "htdemucs_ft")
            .await
            .unwrap_err();

        match err {
            SeparationError::Engine { detail, .. } => assert!(detail.contains("corrupt input")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn success_without_outputs_is_missing_stem() {
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let script = write_script(bin.path(), "exit 0");
        let engine = engine(script, scratch.path());

        let err = engine
            .separate(Bytes::from_static(b"audio"), "htdemucs_ft")
            .await
            .unwrap_err();
        assert!(matches!(err, SeparationError::MissingStem("vocals")));
    }
}
