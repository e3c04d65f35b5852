//! Where live frames come from.

use crate::error::{InspectorError, Result};
use crate::frame::ImageBuffer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Supplier of the most recent camera frame.
///
/// `Ok(None)` means no frame is available right now; callers skip the cycle.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn current_frame(&self) -> Result<Option<ImageBuffer>>;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// Reads an image file that an acquisition process keeps overwriting
pub struct FileFrameSource {
    path: PathBuf,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FrameSource for FileFrameSource {
    async fn current_frame(&self) -> Result<Option<ImageBuffer>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!("Frame file {} not present", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.is_empty() {
            // Writer truncated the file and has not refilled it yet
            return Ok(None);
        }

        let image = tokio::task::spawn_blocking(move || ImageBuffer::decode(&bytes))
            .await
            .map_err(|e| InspectorError::component("frame_source", &e.to_string()))??;
        debug!("Read frame {} from {}", image.describe(), self.path.display());
        Ok(Some(image))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Scripted frame source for tests and dry runs.
///
/// Queued entries are handed out in order; once the queue is empty the
/// fallback frame is repeated.
pub struct MockFrameSource {
    queue: Mutex<VecDeque<Result<Option<ImageBuffer>>>>,
    fallback: Mutex<Option<ImageBuffer>>,
    calls: AtomicU64,
}

impl MockFrameSource {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// Source that always returns `frame`
    pub fn repeating(frame: ImageBuffer) -> Self {
        let source = Self::new();
        source.set_fallback(Some(frame));
        source
    }

    pub fn push_frame(&self, frame: ImageBuffer) {
        self.queue.lock().push_back(Ok(Some(frame)));
    }

    pub fn push_empty(&self) {
        self.queue.lock().push_back(Ok(None));
    }

    pub fn push_error(&self, message: &str) {
        self.queue
            .lock()
            .push_back(Err(InspectorError::component("mock_source", message)));
    }

    pub fn set_fallback(&self, frame: Option<ImageBuffer>) {
        *self.fallback.lock() = frame;
    }

    /// Number of times a frame was requested
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for MockFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    async fn current_frame(&self) -> Result<Option<ImageBuffer>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(next) = self.queue.lock().pop_front() {
            return next;
        }
        Ok(self.fallback.lock().clone())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{EncodedFormat, PixelFormat};

    #[tokio::test]
    async fn test_file_source_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileFrameSource::new(dir.path().join("latest.png"));
        assert!(source.current_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_source_reads_current_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.png");
        let image = ImageBuffer::filled(4, 3, PixelFormat::Bgr24, &[10, 20, 30]).unwrap();
        std::fs::write(&path, image.encode(EncodedFormat::Png, 90).unwrap()).unwrap();

        let source = FileFrameSource::new(&path);
        let frame = source.current_frame().await.unwrap().unwrap();
        assert_eq!(frame, image);
        assert!(source.describe().contains("latest.png"));
    }

    #[tokio::test]
    async fn test_file_source_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        let source = FileFrameSource::new(&path);
        assert!(source.current_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_source_script() {
        let frame = ImageBuffer::filled(2, 2, PixelFormat::Luminance8, &[7]).unwrap();
        let source = MockFrameSource::new();
        source.push_empty();
        source.push_error("lost");
        source.push_frame(frame.clone());

        assert!(source.current_frame().await.unwrap().is_none());
        assert!(source.current_frame().await.is_err());
        assert_eq!(source.current_frame().await.unwrap(), Some(frame));
        assert!(source.current_frame().await.unwrap().is_none());
        assert_eq!(source.calls(), 4);
    }
}
