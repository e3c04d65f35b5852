use crate::classifier::Verdict;
use crate::config::StorageConfig;
use crate::error::{EngineError, InspectorError, Result};
use crate::events::{EventBus, EventFilter, InspectionEvent};
use crate::frame::ImageBuffer;
use crate::source::FrameSource;
use crate::store::ConfigStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sidecar written next to each stored image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotMetadata {
    pub camera: u32,
    pub frame_id: u64,
    pub score: f64,
    pub verdict: Verdict,
    pub captured_at: DateTime<Utc>,
    pub image: String,
}

/// Writes compared frames, highlighted when available, to the storage directory
pub struct SnapshotStore {
    config: StorageConfig,
    root: PathBuf,
    saved: AtomicU64,
}

impl SnapshotStore {
    pub fn new(config: StorageConfig) -> Self {
        let root = PathBuf::from(&config.path);
        Self {
            config,
            root,
            saved: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of images written since creation
    pub fn saved_count(&self) -> u64 {
        self.saved.load(Ordering::Relaxed)
    }

    pub async fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            InspectorError::component(
                "snapshot_store",
                format!(
                    "Failed to create storage directory {}: {}",
                    self.root.display(),
                    e
                ),
            )
        })
    }

    /// Format: cam{index}_YYYYMMDD_HHMMSS_ffffff_{8 hex}.{ext}
    pub fn snapshot_file_name(camera: u32, timestamp: SystemTime, extension: &str) -> String {
        let datetime: DateTime<Utc> = timestamp.into();
        let unique = Uuid::new_v4().simple().to_string();
        format!(
            "cam{}_{}_{}.{}",
            camera,
            datetime.format("%Y%m%d_%H%M%S_%6f"),
            &unique[..8],
            extension
        )
    }

    /// Whether a frame with this verdict should be stored
    pub fn should_save(&self, verdict: Verdict) -> bool {
        self.config.save_all || (self.config.save_anomalies && verdict.is_anomaly())
    }

    /// Encode and write `image`; returns the path written
    pub async fn save_image(
        &self,
        camera: u32,
        image: &ImageBuffer,
        timestamp: SystemTime,
    ) -> Result<PathBuf> {
        let format = self.config.format;
        let quality = self.config.jpeg_quality;
        let image = image.clone();
        let bytes = tokio::task::spawn_blocking(move || image.encode(format, quality))
            .await
            .map_err(|e| InspectorError::component("snapshot_store", e.to_string()))??;

        let path = self.root.join(Self::snapshot_file_name(
            camera,
            timestamp,
            format.extension(),
        ));
        fs::write(&path, bytes).await?;
        self.saved.fetch_add(1, Ordering::Relaxed);

        debug!("Saved snapshot {}", path.display());
        Ok(path)
    }

    /// Write `metadata` as pretty JSON next to `image_path`
    pub async fn save_metadata(
        &self,
        image_path: &Path,
        metadata: &SnapshotMetadata,
    ) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(metadata).map_err(|e| {
            InspectorError::component(
                "snapshot_store",
                format!("Failed to serialize metadata: {}", e),
            )
        })?;
        let path = image_path.with_extension("json");
        fs::write(&path, json).await?;
        Ok(path)
    }

    async fn handle_event(&self, event: InspectionEvent, event_bus: &EventBus) -> Result<()> {
        let InspectionEvent::ComparisonCompleted {
            camera,
            frame_id,
            score,
            verdict,
            frame,
            overlay,
            timestamp,
        } = event
        else {
            return Ok(());
        };

        if !self.should_save(verdict) {
            return Ok(());
        }

        // Highlighting may be disabled; the plain compared frame is stored then
        let Some(image) = overlay.or(frame) else {
            warn!("Camera {} frame {} carried no image to store", camera, frame_id);
            return Ok(());
        };
        let path = self.save_image(camera, &image, timestamp).await?;

        if self.config.save_metadata {
            let metadata = SnapshotMetadata {
                camera,
                frame_id,
                score,
                verdict,
                captured_at: timestamp.into(),
                image: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };
            self.save_metadata(&path, &metadata).await?;
        }

        if let Err(e) = event_bus
            .publish(InspectionEvent::SnapshotSaved {
                camera,
                path,
                timestamp: SystemTime::now(),
            })
            .await
        {
            debug!("Snapshot notification not delivered: {}", e);
        }
        Ok(())
    }

    /// Persist overlays of completed comparisons until `cancel` fires
    pub fn start(
        self: Arc<Self>,
        event_bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut receiver = event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["comparison_completed"]),
            "snapshot_store",
        );

        tokio::spawn(async move {
            info!("Snapshot store writing to {}", self.root.display());
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = receiver.recv() => received,
                };

                match event {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(event, &event_bus).await {
                            error!("Failed to store snapshot: {}", e);
                        }
                    }
                    Err(crate::error::EventBusError::ChannelClosed) => break,
                    Err(e) => warn!("Snapshot store missed events: {}", e),
                }
            }
            info!("Snapshot store stopped after {} image(s)", self.saved_count());
        })
    }
}

/// Store the camera's current frame and make it the camera's standard image.
///
/// The frame is written like any snapshot, so the name is collision resistant.
/// Returns the path of the new standard.
pub async fn capture_standard(
    camera: u32,
    source: &dyn FrameSource,
    snapshots: &SnapshotStore,
    store: &ConfigStore,
) -> Result<PathBuf> {
    if store.snapshot().config.camera(camera).is_none() {
        return Err(EngineError::invalid_configuration(format!(
            "camera {} is not configured",
            camera
        ))
        .into());
    }

    let frame = source.current_frame().await?.ok_or_else(|| {
        EngineError::invalid_input(format!(
            "no frame available from {} for camera {}",
            source.describe(),
            camera
        ))
    })?;

    snapshots.ensure_directory().await?;
    let path = snapshots.save_image(camera, &frame, SystemTime::now()).await?;
    let generation = store
        .set_standard_image(camera, path.to_string_lossy())
        .await?;

    info!("Camera {} standard captured to {} (generation {})", camera, path.display(), generation);
    Ok(path)
}

/// Load and decode an image file
pub async fn read_image(path: impl AsRef<Path>) -> Result<ImageBuffer> {
    let path = path.as_ref();
    let bytes = fs::read(path).await.map_err(|e| {
        InspectorError::component(
            "image_reader",
            format!("Failed to read {}: {}", path.display(), e),
        )
    })?;
    tokio::task::spawn_blocking(move || ImageBuffer::decode(&bytes))
        .await
        .map_err(|e| InspectorError::component("image_reader", e.to_string()))?
}

/// Encode and write an image to an explicit path, choosing the format by extension
pub async fn write_image(
    path: impl AsRef<Path>,
    image: &ImageBuffer,
    jpeg_quality: u8,
) -> Result<()> {
    let path = path.as_ref();
    let format = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("png") => crate::frame::EncodedFormat::Png,
        _ => crate::frame::EncodedFormat::Jpeg,
    };
    let image = image.clone();
    let bytes = tokio::task::spawn_blocking(move || image.encode(format, jpeg_quality))
        .await
        .map_err(|e| InspectorError::component("image_writer", e.to_string()))??;
    fs::write(path, bytes).await?;
    Ok(())
}
