//! Readable handle over a merged file that owns its temporary workspace.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

use super::MediaError;
use super::pipeline::PipelineStage;

/// Removes the artifacts of one pipeline run exactly once.
///
/// Shared between the pipeline and the [`ManagedStream`] it produces. The
/// first call to [`release`](Self::release) wins; later calls, and the drop
/// of the last reference, do nothing.
#[derive(Debug)]
pub struct CleanupGuard {
    released: AtomicBool,
    output: PathBuf,
    intermediates: Vec<PathBuf>,
    workspace: Mutex<Option<TempDir>>,
}

impl CleanupGuard {
    pub fn new(workspace: TempDir, output: PathBuf, intermediates: Vec<PathBuf>) -> Self {
        Self {
            released: AtomicBool::new(false),
            output,
            intermediates,
            workspace: Mutex::new(Some(workspace)),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn workspace_path(&self) -> Option<PathBuf> {
        self.workspace.lock().as_ref().map(|dir| dir.path().to_path_buf())
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Removes the intermediate downloads, keeping the output.
    pub fn discard_intermediates(&self) {
        for path in &self.intermediates {
            remove_quietly(path);
        }
    }

    /// Removes the output, the intermediates and the workspace directory.
    ///
    /// Returns `true` if this call performed the cleanup. Failures are logged
    /// and never returned; missing files count as removed.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        remove_quietly(&self.output);
        self.discard_intermediates();

        if let Some(dir) = self.workspace.lock().take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => log_cleanup_failure(path, source),
            }
        }

        tracing::debug!(stage = ?PipelineStage::Closed, output = %self.output.display(), "Workspace released");
        true
    }

    /// [`release`](Self::release) on the blocking thread pool.
    pub async fn release_async(self: &Arc<Self>) -> bool {
        off_runtime(self, CleanupGuard::release).await
    }

    /// [`discard_intermediates`](Self::discard_intermediates) on the blocking
    /// thread pool.
    pub async fn discard_intermediates_async(self: &Arc<Self>) {
        off_runtime(self, CleanupGuard::discard_intermediates).await
    }
}

/// Runs filesystem cleanup where it cannot stall the async workers.
///
/// Falls back to the calling thread if the blocking task is lost; both
/// operations are safe to repeat.
async fn off_runtime<T: Send + 'static>(
    guard: &Arc<CleanupGuard>,
    work: fn(&CleanupGuard) -> T,
) -> T {
    let owned = Arc::clone(guard);
    match tokio::task::spawn_blocking(move || work(&owned)).await {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Blocking cleanup task lost, cleaning up inline");
            work(guard)
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => log_cleanup_failure(path.to_path_buf(), source),
    }
}

fn log_cleanup_failure(path: PathBuf, source: io::Error) {
    let error = MediaError::Cleanup { path, source };
    tracing::warn!(error = %error, "Cleanup failed");
}

/// Cloneable trigger for the cleanup of a [`ManagedStream`].
///
/// Lets code that does not own the stream, such as an error path or a
/// cancellation hook, release the workspace without coordinating with the
/// reader.
#[derive(Debug, Clone)]
pub struct ReleaseHandle {
    guard: Arc<CleanupGuard>,
}

impl ReleaseHandle {
    /// Returns `true` if this call performed the cleanup.
    pub fn release(&self) -> bool {
        self.guard.release()
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_released()
    }
}

/// Readable merged file whose workspace is removed when released or dropped.
///
/// Reads after release return end of stream.
#[derive(Debug)]
pub struct ManagedStream {
    file: Option<File>,
    guard: Arc<CleanupGuard>,
    content_length: Option<u64>,
}

impl ManagedStream {
    /// Opens the guard's output file for reading.
    ///
    /// # Errors
    /// - `io::Error` - Output missing or unreadable
    pub async fn open(guard: Arc<CleanupGuard>) -> io::Result<Self> {
        let file = File::open(guard.output()).await?;
        let content_length = file.metadata().await.ok().map(|meta| meta.len());
        Ok(Self {
            file: Some(file),
            guard,
            content_length,
        })
    }

    /// Size of the merged file, when known.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn path(&self) -> &Path {
        self.guard.output()
    }

    pub fn release_handle(&self) -> ReleaseHandle {
        ReleaseHandle {
            guard: Arc::clone(&self.guard),
        }
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_released()
    }

    /// Closes the file, then removes the workspace.
    ///
    /// Cleanup runs even when closing fails; the close error is returned.
    /// Calling this again is a no-op.
    ///
    /// # Errors
    /// - `io::Error` - Closing the file handle failed
    pub async fn release(&mut self) -> io::Result<()> {
        let closed = match self.file.take() {
            Some(mut file) => file.flush().await,
            None => Ok(()),
        };
        self.guard.release_async().await;
        closed
    }
}

impl AsyncRead for ManagedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().file.as_mut() {
            Some(file) => Pin::new(file).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for ManagedStream {
    fn drop(&mut self) {
        drop(self.file.take());
        self.guard.release();
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    fn guard_with_files() -> Arc<CleanupGuard> {
        let dir = tempfile::Builder::new()
            .prefix("bilistream_test_")
            .tempdir()
            .unwrap();
        let output = dir.path().join("output.mp4");
        let video = dir.path().join("video.mp4");
        let audio = dir.path().join("audio.m4a");
        std::fs::write(&output, b"merged-bytes").unwrap();
        std::fs::write(&video, b"v").unwrap();
        std::fs::write(&audio, b"a").unwrap();
        Arc::new(CleanupGuard::new(dir, output, vec![video, audio]))
    }

    #[tokio::test]
    async fn test_reads_full_content() {
        let guard = guard_with_files();
        let mut stream = ManagedStream::open(Arc::clone(&guard)).await.unwrap();
        assert_eq!(stream.content_length(), Some(12));

        let mut body = Vec::new();
        stream.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"merged-bytes");
    }

    #[tokio::test]
    async fn test_release_removes_workspace_once() {
        let guard = guard_with_files();
        let workspace = guard.workspace_path().unwrap();
        let mut stream = ManagedStream::open(Arc::clone(&guard)).await.unwrap();
        let handle = stream.release_handle();

        stream.release().await.unwrap();
        assert!(!workspace.exists());
        assert!(stream.is_released());

        // Second release from any owner is a no-op.
        stream.release().await.unwrap();
        assert!(!handle.release());
        assert!(!guard.release());
    }

    #[tokio::test]
    async fn test_read_after_release_is_eof() {
        let guard = guard_with_files();
        let mut stream = ManagedStream::open(guard).await.unwrap();
        stream.release().await.unwrap();

        let mut body = Vec::new();
        let read = stream.read_to_end(&mut body).await.unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_handle_release_before_stream_release() {
        let guard = guard_with_files();
        let workspace = guard.workspace_path().unwrap();
        let mut stream = ManagedStream::open(guard).await.unwrap();

        assert!(stream.release_handle().release());
        assert!(!workspace.exists());
        stream.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let guard = guard_with_files();
        let workspace = guard.workspace_path().unwrap();
        let stream = ManagedStream::open(Arc::clone(&guard)).await.unwrap();

        drop(stream);
        assert!(guard.is_released());
        assert!(!workspace.exists());
    }

    #[test]
    fn test_release_tolerates_missing_files() {
        let guard = guard_with_files();
        let workspace = guard.workspace_path().unwrap();
        std::fs::remove_dir_all(&workspace).unwrap();

        assert!(guard.release());
        assert!(!guard.release());
    }

    #[test]
    fn test_discard_intermediates_keeps_output() {
        let guard = guard_with_files();
        let workspace = guard.workspace_path().unwrap();
        guard.discard_intermediates();

        assert!(guard.output().exists());
        assert!(!workspace.join("video.mp4").exists());
        assert!(!workspace.join("audio.m4a").exists());
        assert!(!guard.is_released());
    }

    #[tokio::test]
    async fn test_async_cleanup_runs_once() {
        let guard = guard_with_files();
        let workspace = guard.workspace_path().unwrap();

        guard.discard_intermediates_async().await;
        assert!(guard.output().exists());
        assert!(!workspace.join("video.mp4").exists());

        assert!(guard.release_async().await);
        assert!(!workspace.exists());
        assert!(!guard.release_async().await);
        assert!(!guard.release());
    }
}
