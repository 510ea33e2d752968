//! External transcoder
//!
//! The compressed encoder is an external program driven through a small
//! file-based contract: files are written into the transcoder's scratch
//! space, a command line is executed against them, and the results are read
//! back. `FfmpegTranscoder` implements it with an ffmpeg executable and a
//! temporary directory.
//!
//! Loading is slow (process spawn, encoder probe), so it runs in the
//! background behind a [`TranscoderHandle`]. Callers either await readiness
//! or get `TranscoderNotReady`; requests are never queued.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::TranscoderConfig;
use crate::error::{EditorError, Result};

/// What a transcoder needs to initialise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderAssets {
    /// Executable to run
    pub program: PathBuf,
    /// Encoder the executable must provide
    pub encoder: String,
}

impl From<&TranscoderConfig> for TranscoderAssets {
    fn from(config: &TranscoderConfig) -> Self {
        Self {
            program: config.program.clone(),
            encoder: config.encoder.clone(),
        }
    }
}

/// File-based transcoder contract
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// One-time initialisation; must succeed before any other call
    async fn load(&mut self, assets: &TranscoderAssets) -> Result<()>;

    /// Put a file into the scratch space
    async fn write_file(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Run the transcoder with the given arguments inside the scratch space
    async fn exec(&self, args: &[String]) -> Result<()>;

    /// Read a file from the scratch space
    async fn read_file(&self, name: &str) -> Result<Vec<u8>>;

    /// Remove a file from the scratch space
    async fn delete_file(&self, name: &str) -> Result<()>;

    /// Release the instance; later calls fail
    async fn terminate(&self);
}

/// Reject names that would escape the scratch space
pub fn validate_scratch_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(EditorError::TranscoderFailure {
            reason: format!("invalid scratch file name '{}'", name),
        });
    }
    Ok(())
}

// ============================================================================
// ffmpeg
// ============================================================================

/// Transcoder backed by an ffmpeg executable
pub struct FfmpegTranscoder {
    program: PathBuf,
    scratch: Mutex<Option<TempDir>>,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self {
            program: PathBuf::new(),
            scratch: Mutex::new(None),
        }
    }

    /// Scratch directory, or `TranscoderNotReady` before load / after terminate
    fn scratch_dir(&self) -> Result<PathBuf> {
        self.scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .ok_or(EditorError::TranscoderNotReady)
    }

    fn scratch_path(&self, name: &str) -> Result<PathBuf> {
        validate_scratch_name(name)?;
        Ok(self.scratch_dir()?.join(name))
    }

    async fn run(program: &Path, args: &[&str], cwd: Option<&Path>) -> Result<std::process::Output> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        command
            .output()
            .await
            .map_err(|e| EditorError::TranscoderFailure {
                reason: format!("failed to run {}: {}", program.display(), e),
            })
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn load(&mut self, assets: &TranscoderAssets) -> Result<()> {
        let output = Self::run(&assets.program, &["-hide_banner", "-encoders"], None).await?;
        if !output.status.success() {
            return Err(EditorError::TranscoderFailure {
                reason: format!(
                    "{} -encoders exited with {}",
                    assets.program.display(),
                    output.status
                ),
            });
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        if !listing.split_whitespace().any(|word| word == assets.encoder) {
            return Err(EditorError::TranscoderFailure {
                reason: format!(
                    "{} does not provide the '{}' encoder",
                    assets.program.display(),
                    assets.encoder
                ),
            });
        }

        let dir = tempfile::Builder::new().prefix("echoform-").tempdir()?;
        debug!("Transcoder scratch directory {}", dir.path().display());

        self.program = assets.program.clone();
        *self.scratch.lock().unwrap_or_else(PoisonError::into_inner) = Some(dir);
        Ok(())
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.scratch_path(name)?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn exec(&self, args: &[String]) -> Result<()> {
        let dir = self.scratch_dir()?;
        let mut full_args = vec!["-hide_banner", "-loglevel", "error", "-y"];
        full_args.extend(args.iter().map(String::as_str));
        debug!("Running {} {}", self.program.display(), full_args.join(" "));

        let output = Self::run(&self.program, &full_args, Some(dir.as_path())).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EditorError::TranscoderFailure {
                reason: format!("exited with {}: {}", output.status, stderr.trim()),
            });
        }
        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.scratch_path(name)?;
        Ok(tokio::fs::read(&path).await?)
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.scratch_path(name)?;
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    async fn terminate(&self) {
        let dir = self
            .scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dir) = dir {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                error!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

// ============================================================================
// Readiness handle
// ============================================================================

/// Public view of a transcoder's initialisation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscoderStatus {
    Loading,
    Ready,
    Failed(String),
}

#[derive(Clone)]
enum Readiness {
    Loading,
    Ready(Arc<dyn Transcoder>),
    Failed(String),
}

/// Capability object for a transcoder that may still be initialising
#[derive(Clone)]
pub struct TranscoderHandle {
    rx: watch::Receiver<Readiness>,
}

impl TranscoderHandle {
    /// Start loading `transcoder` in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_load(mut transcoder: Box<dyn Transcoder>, assets: TranscoderAssets) -> Self {
        let (tx, rx) = watch::channel(Readiness::Loading);
        tokio::spawn(async move {
            let next = match transcoder.load(&assets).await {
                Ok(()) => {
                    info!("Transcoder ready ({})", assets.program.display());
                    Readiness::Ready(Arc::from(transcoder))
                }
                Err(e) => {
                    error!("Transcoder failed to load: {}", e);
                    Readiness::Failed(e.to_string())
                }
            };
            tx.send_replace(next);
        });
        Self { rx }
    }

    /// Handle for a transcoder that is already loaded
    pub fn ready_now(transcoder: Arc<dyn Transcoder>) -> Self {
        let (_tx, rx) = watch::channel(Readiness::Ready(transcoder));
        Self { rx }
    }

    pub fn status(&self) -> TranscoderStatus {
        match &*self.rx.borrow() {
            Readiness::Loading => TranscoderStatus::Loading,
            Readiness::Ready(_) => TranscoderStatus::Ready,
            Readiness::Failed(reason) => TranscoderStatus::Failed(reason.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status() == TranscoderStatus::Ready
    }

    /// The transcoder if it is ready now
    ///
    /// `TranscoderNotReady` while loading, `TranscoderFailure` if loading failed.
    pub fn try_ready(&self) -> Result<Arc<dyn Transcoder>> {
        Self::resolve(&self.rx.borrow())
    }

    /// Wait for loading to finish
    pub async fn ready(&self) -> Result<Arc<dyn Transcoder>> {
        let mut rx = self.rx.clone();
        let state = rx
            .wait_for(|state| !matches!(state, Readiness::Loading))
            .await
            .map_err(|_| EditorError::TranscoderFailure {
                reason: "transcoder loader went away".to_string(),
            })?;
        Self::resolve(&state)
    }

    /// Release the transcoder if it was loaded
    pub async fn terminate(&self) {
        let ready = match &*self.rx.borrow() {
            Readiness::Ready(transcoder) => Some(Arc::clone(transcoder)),
            _ => None,
        };
        if let Some(transcoder) = ready {
            transcoder.terminate().await;
            debug!("Transcoder terminated");
        }
    }

    fn resolve(state: &Readiness) -> Result<Arc<dyn Transcoder>> {
        match state {
            Readiness::Loading => Err(EditorError::TranscoderNotReady),
            Readiness::Ready(transcoder) => Ok(Arc::clone(transcoder)),
            Readiness::Failed(reason) => Err(EditorError::TranscoderFailure {
                reason: reason.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Transcoder whose load finishes after a delay
    struct SlowTranscoder {
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Transcoder for SlowTranscoder {
        async fn load(&mut self, _assets: &TranscoderAssets) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(EditorError::TranscoderFailure {
                    reason: "codec core missing".to_string(),
                });
            }
            Ok(())
        }
        async fn write_file(&self, _name: &str, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn exec(&self, _args: &[String]) -> Result<()> {
            Ok(())
        }
        async fn read_file(&self, _name: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn delete_file(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn terminate(&self) {}
    }

    fn assets() -> TranscoderAssets {
        TranscoderAssets::from(&TranscoderConfig::default())
    }

    #[test]
    fn test_scratch_names() {
        assert!(validate_scratch_name("input.wav").is_ok());
        assert!(validate_scratch_name("../etc/passwd").is_err());
        assert!(validate_scratch_name("a\\b").is_err());
        assert!(validate_scratch_name("..").is_err());
        assert!(validate_scratch_name("").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_while_loading() {
        let handle = TranscoderHandle::spawn_load(
            Box::new(SlowTranscoder {
                delay: Duration::from_secs(2),
                fail: false,
            }),
            assets(),
        );

        assert_eq!(handle.status(), TranscoderStatus::Loading);
        assert!(matches!(
            handle.try_ready(),
            Err(EditorError::TranscoderNotReady)
        ));

        handle.ready().await.unwrap();
        assert!(handle.is_ready());
        assert!(handle.try_ready().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_is_reported() {
        let handle = TranscoderHandle::spawn_load(
            Box::new(SlowTranscoder {
                delay: Duration::from_millis(10),
                fail: true,
            }),
            assets(),
        );

        let err = handle.ready().await.err().unwrap();
        assert!(matches!(err, EditorError::TranscoderFailure { .. }));
        assert!(matches!(handle.status(), TranscoderStatus::Failed(r) if r.contains("codec core")));
    }

    #[tokio::test]
    async fn test_missing_program_fails_load() {
        let mut transcoder = FfmpegTranscoder::new();
        let err = transcoder
            .load(&TranscoderAssets {
                program: PathBuf::from("/nonexistent/ffmpeg"),
                encoder: "libmp3lame".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::TranscoderFailure { .. }));
    }

    /// Stand-in ffmpeg: lists the mp3 encoder and copies `-i` to the last argument
    #[cfg(unix)]
    const STUB_FFMPEG: &str = r#"#!/bin/sh
for arg in "$@"; do
  if [ "$arg" = "-encoders" ]; then
    echo " A..... libmp3lame           libmp3lame MP3 (MPEG audio layer 3)"
    exit 0
  fi
done
echo "$PWD $*" >> "$(dirname "$0")/calls.log"
input=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
done
cp "$input" "$prev"
"#;

    #[cfg(unix)]
    fn stub_ffmpeg(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let program = dir.join("ffmpeg");
        std::fs::write(&program, STUB_FFMPEG).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        program
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffmpeg_load_requires_encoder() {
        let bin = tempfile::tempdir().unwrap();
        let program = stub_ffmpeg(bin.path());

        let mut transcoder = FfmpegTranscoder::new();
        let err = transcoder
            .load(&TranscoderAssets {
                program: program.clone(),
                encoder: "libopus".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("libopus"));
        assert!(matches!(
            transcoder.scratch_dir(),
            Err(EditorError::TranscoderNotReady)
        ));

        transcoder
            .load(&TranscoderAssets {
                program,
                encoder: "libmp3lame".to_string(),
            })
            .await
            .unwrap();
        assert!(transcoder.scratch_dir().unwrap().is_dir());
        transcoder.terminate().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffmpeg_encode_uses_scratch_dir() {
        use crate::dsp::{RenderedAsset, TrimRange};
        use crate::engine::AudioBuffer;
        use crate::export::Encoder;

        let bin = tempfile::tempdir().unwrap();
        let program = stub_ffmpeg(bin.path());
        let mut transcoder = FfmpegTranscoder::new();
        transcoder
            .load(&TranscoderAssets {
                program,
                encoder: "libmp3lame".to_string(),
            })
            .await
            .unwrap();
        let scratch = transcoder.scratch_dir().unwrap().canonicalize().unwrap();
        let transcoder = Arc::new(transcoder);

        let frames = 8000;
        let tone: Vec<f32> = (0..frames).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let rendered = RenderedAsset {
            buffer: AudioBuffer::from_channels(vec![tone.clone(), tone], 8000).unwrap(),
            rate: 1.0,
            window: TrimRange::new(0.0, 1.0),
            chain: serde_json::Value::Null,
        };
        let encoder = Encoder::new(
            TranscoderHandle::ready_now(transcoder.clone()),
            &TranscoderConfig::default(),
        );

        let file = encoder.encode(&rendered).await.unwrap();
        assert_eq!(file.name, "processed_1x.mp3");
        assert_eq!(&file.data[..4], b"RIFF");
        assert_eq!(file.data.len(), 44 + frames * 2 * 2);

        let calls = std::fs::read_to_string(bin.path().join("calls.log")).unwrap();
        assert!(calls.starts_with(scratch.to_str().unwrap()));
        assert!(calls.contains("-y -i input.wav output.mp3"));
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);

        transcoder.terminate().await;
        assert!(!scratch.exists());
        assert!(matches!(
            transcoder.read_file("output.mp3").await,
            Err(EditorError::TranscoderNotReady)
        ));
    }

    #[tokio::test]
    async fn test_unloaded_ffmpeg_rejects_io() {
        let transcoder = FfmpegTranscoder::new();
        assert!(matches!(
            transcoder.write_file("input.wav", b"data").await,
            Err(EditorError::TranscoderNotReady)
        ));
        assert!(matches!(
            transcoder.exec(&[]).await,
            Err(EditorError::TranscoderNotReady)
        ));
    }
}
