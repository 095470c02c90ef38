//! Remuxing of a video and an audio file into one container.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use super::{MediaError, MediaResult};
use crate::config::MuxConfig;

/// Combines two elementary streams without re-encoding.
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Writes a container holding the streams of `video` and `audio` to
    /// `output`, overwriting anything already there.
    ///
    /// # Errors
    /// - `MediaError::ToolNotFound` - Tool not installed
    /// - `MediaError::MuxFailed` - Tool exited unsuccessfully
    /// - `MediaError::MuxTimedOut` - Tool exceeded its time bound
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<MuxOutcome>;

    /// Check if the tool can be started.
    async fn is_available(&self) -> bool;
}

/// Result of a finished remux.
#[derive(Debug, Clone)]
pub struct MuxOutcome {
    /// Size of the output file in bytes
    pub output_size: u64,
    /// Wall time spent in the tool
    pub elapsed: Duration,
}

/// Muxer backed by an ffmpeg-compatible executable.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegMuxer {
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &MuxConfig) -> Self {
        Self::new(config.program.clone(), config.timeout)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, video: &Path, audio: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-y")
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .arg("-c")
            .arg("copy")
            .arg(output)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<MuxOutcome> {
        let start = Instant::now();
        let mut cmd = self.command(video, audio, output);

        tracing::info!(
            program = %self.program.display(),
            video = %video.display(),
            audio = %audio.display(),
            output = %output.display(),
            "Starting remux"
        );

        let run = cmd.output();
        let result = match self.timeout {
            // Dropping the future on timeout kills the child.
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| MediaError::MuxTimedOut { after: limit })?,
            None => run.await,
        };

        let finished = result.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                MediaError::ToolNotFound {
                    program: self.program_name(),
                }
            } else {
                MediaError::Io {
                    operation: format!("spawn {}", self.program_name()),
                    source,
                }
            }
        })?;

        if !finished.status.success() {
            let mut combined = String::from_utf8_lossy(&finished.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&finished.stderr));
            tracing::error!(status = %finished.status, "Remux failed: {}", combined.trim());
            return Err(MediaError::MuxFailed {
                status: finished.status.to_string(),
                output: combined,
            });
        }

        let output_size = tokio::fs::metadata(output)
            .await
            .map_err(|source| MediaError::Io {
                operation: format!("stat remux output {}", output.display()),
                source,
            })?
            .len();
        let elapsed = start.elapsed();

        tracing::info!(output_size, ?elapsed, "Remux finished");
        Ok(MuxOutcome {
            output_size,
            elapsed,
        })
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .is_ok_and(|status| status.success())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn inputs(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let video = dir.join("video.mp4");
        let audio = dir.join("audio.m4a");
        std::fs::write(&video, b"VIDEO").unwrap();
        std::fs::write(&audio, b"AUDIO").unwrap();
        (video, audio, dir.join("output.mp4"))
    }

    #[tokio::test]
    async fn test_mux_passes_inputs_and_output() {
        let dir = TempDir::new().unwrap();
        // Arguments: -y -i VIDEO -i AUDIO -c copy OUTPUT
        let script = write_script(dir.path(), "fake-ffmpeg", r#"cat "$3" "$5" > "$8""#);
        let (video, audio, output) = inputs(dir.path());

        let muxer = FfmpegMuxer::new(&script, Some(Duration::from_secs(10)));
        let outcome = muxer.mux(&video, &audio, &output).await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"VIDEOAUDIO");
        assert_eq!(outcome.output_size, 10);
    }

    #[tokio::test]
    async fn test_mux_failure_carries_tool_output() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            dir.path(),
            "failing-ffmpeg",
            "echo 'Invalid data found' >&2\nexit 3",
        );
        let (video, audio, output) = inputs(dir.path());

        let muxer = FfmpegMuxer::new(&script, None);
        match muxer.mux(&video, &audio, &output).await {
            Err(MediaError::MuxFailed { status, output }) => {
                assert!(status.contains('3'), "status was {status}");
                assert!(output.contains("Invalid data found"));
            }
            other => panic!("expected MuxFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let dir = TempDir::new().unwrap();
        let (video, audio, output) = inputs(dir.path());

        let muxer = FfmpegMuxer::new(dir.path().join("no-such-ffmpeg"), None);
        assert!(!muxer.is_available().await);
        assert!(matches!(
            muxer.mux(&video, &audio, &output).await,
            Err(MediaError::ToolNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_mux_timeout() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "slow-ffmpeg", "sleep 30");
        let (video, audio, output) = inputs(dir.path());

        let muxer = FfmpegMuxer::new(&script, Some(Duration::from_millis(200)));
        let started = Instant::now();
        assert!(matches!(
            muxer.mux(&video, &audio, &output).await,
            Err(MediaError::MuxTimedOut { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_is_available_with_version_flag() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            dir.path(),
            "versioned-ffmpeg",
            r#"[ "$1" = "-version" ] && exit 0
exit 1"#,
        );
        assert!(FfmpegMuxer::new(script, None).is_available().await);
    }
}
