use super::types::{ComponentState, ShutdownReason};
use crate::config::AppConfig;
use crate::error::{InspectorError, Result};
use crate::events::EventBus;
use crate::fieldbus::{ModbusTcpClient, RegisterClient};
use crate::monitor::{CameraMonitor, CameraMonitorBuilder, MonitorStats};
use crate::source::{FileFrameSource, FrameSource};
use crate::storage::{self, SnapshotStore};
use crate::store::ConfigStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EVENT_BUS_CAPACITY: usize = 256;

/// Cloneable trigger that ends [`InspectorApp::run`]
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
}

impl ShutdownHandle {
    /// Returns false when shutdown was already requested
    pub async fn request(&self, reason: ShutdownReason) -> bool {
        match self.sender.lock().await.take() {
            Some(sender) => sender.send(reason).is_ok(),
            None => false,
        }
    }
}

/// Main application coordinator that owns every inspection component
pub struct InspectorApp {
    pub(super) event_bus: Arc<EventBus>,
    pub(super) store: Arc<ConfigStore>,
    pub(super) snapshots: Arc<SnapshotStore>,
    pub(super) register_client: Option<Arc<dyn RegisterClient>>,
    pub(super) sources: HashMap<u32, Arc<dyn FrameSource>>,

    // Components
    pub(super) monitors: Vec<CameraMonitor>,
    pub(super) snapshot_task: Option<JoinHandle<()>>,
    pub(super) signaler_task: Option<JoinHandle<()>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_handle: ShutdownHandle,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl InspectorApp {
    /// Create the application from configuration, reading frames from each camera's source file
    pub async fn new(config: AppConfig, config_path: Option<PathBuf>) -> Result<Self> {
        let mut sources: HashMap<u32, Arc<dyn FrameSource>> = HashMap::new();
        for camera in &config.cameras {
            match &camera.source {
                Some(path) => {
                    sources.insert(camera.index, Arc::new(FileFrameSource::new(path)));
                }
                None => warn!(
                    "Camera {} has no frame source configured, it will not be monitored",
                    camera.index
                ),
            }
        }

        let register_client = config.fieldbus.clone().map(|fieldbus| {
            info!("Verdicts will be signaled to {}", fieldbus.address);
            Arc::new(ModbusTcpClient::new(fieldbus)) as Arc<dyn RegisterClient>
        });

        Self::with_components(config, config_path, sources, register_client).await
    }

    /// Create the application with explicit frame sources and register client
    pub async fn with_components(
        config: AppConfig,
        config_path: Option<PathBuf>,
        sources: HashMap<u32, Arc<dyn FrameSource>>,
        register_client: Option<Arc<dyn RegisterClient>>,
    ) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
        let snapshots = Arc::new(SnapshotStore::new(config.storage.clone()));
        let camera_indices: Vec<u32> = config.cameras.iter().map(|c| c.index).collect();

        let mut store = ConfigStore::new(config)?.with_event_bus(EventBus::clone(&event_bus));
        if let Some(path) = config_path {
            store = store.with_persistence(path);
        }
        let store = Arc::new(store);

        let mut monitors = Vec::new();
        for index in camera_indices {
            let Some(source) = sources.get(&index) else {
                continue;
            };
            let monitor = CameraMonitorBuilder::new()
                .camera(index)
                .source(Arc::clone(source))
                .store(Arc::clone(&store))
                .event_bus(Arc::clone(&event_bus))
                .build()?;
            monitors.push(monitor);
        }

        let (sender, receiver) = oneshot::channel();

        Ok(Self {
            event_bus,
            store,
            snapshots,
            register_client,
            sources,
            monitors,
            snapshot_task: None,
            signaler_task: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_handle: ShutdownHandle {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
            shutdown_receiver: Some(receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn config_store(&self) -> Arc<ConfigStore> {
        Arc::clone(&self.store)
    }

    /// Make the camera's current frame its new standard image.
    ///
    /// Running monitors pick the new baseline up with the next configuration generation.
    pub async fn capture_standard(&self, camera: u32) -> Result<PathBuf> {
        let source = self.sources.get(&camera).ok_or_else(|| {
            InspectorError::component(
                "capture",
                format!("camera {} has no frame source configured", camera),
            )
        })?;
        storage::capture_standard(camera, source.as_ref(), &self.snapshots, &self.store).await
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown_handle.clone()
    }

    /// Indices of the cameras that have a monitoring loop
    pub fn monitored_cameras(&self) -> Vec<u32> {
        self.monitors.iter().map(|m| m.camera()).collect()
    }

    pub fn monitor_stats(&self) -> HashMap<u32, MonitorStats> {
        self.monitors
            .iter()
            .map(|m| (m.camera(), m.stats()))
            .collect()
    }
}
