use super::state::{CycleOutcome, MonitorState, MonitorStats};
use crate::error::{EngineError, InspectorError, Result};
use crate::events::{EventBus, InspectionEvent};
use crate::profile::{CameraProfile, Inspection, StandardRef};
use crate::source::FrameSource;
use crate::storage::read_image;
use crate::store::{ConfigSnapshot, ConfigStore};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// One camera's acquire, preprocess, compare, classify cycle.
///
/// The preprocessed standard is cached per configuration generation, so an
/// edited threshold or standard path takes effect on the next cycle.
pub struct InspectionWorker {
    camera: u32,
    source: Arc<dyn FrameSource>,
    store: Arc<ConfigStore>,
    event_bus: Arc<EventBus>,
    state: Arc<Mutex<MonitorState>>,
    stats: Arc<Mutex<MonitorStats>>,
    cached: Option<(u64, Arc<Inspection>)>,
    frame_counter: u64,
}

impl InspectionWorker {
    pub fn new(
        camera: u32,
        source: Arc<dyn FrameSource>,
        store: Arc<ConfigStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            camera,
            source,
            store,
            event_bus,
            state: Arc::new(Mutex::new(MonitorState::Idle)),
            stats: Arc::new(Mutex::new(MonitorStats::default())),
            cached: None,
            frame_counter: 0,
        }
    }

    pub fn camera(&self) -> u32 {
        self.camera
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats.lock().clone()
    }

    /// Current cycle period from the live configuration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.store.snapshot().config.monitor.interval_ms)
    }

    fn set_state(&self, next: MonitorState) {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            warn!("Camera {} unexpected transition {} -> {}", self.camera, *state, next);
        }
        trace!("Camera {} {} -> {}", self.camera, *state, next);
        *state = next;
    }

    async fn publish(&self, event: InspectionEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            trace!("Camera {} event not delivered: {}", self.camera, e);
        }
    }

    /// Run one full cycle and record its outcome
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.cycle().await;
        match &outcome {
            CycleOutcome::Classified { .. } => {}
            _ => self.set_state(MonitorState::Idle),
        }
        self.stats.lock().record(&outcome);
        outcome
    }

    async fn cycle(&mut self) -> CycleOutcome {
        self.set_state(MonitorState::Capturing);
        let snapshot = self.store.snapshot();

        let frame = match self.source.current_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.publish(InspectionEvent::FrameUnavailable {
                    camera: self.camera,
                    timestamp: SystemTime::now(),
                })
                .await;
                return CycleOutcome::NoFrame;
            }
            Err(e) => {
                warn!(
                    "Camera {} capture from {} failed: {}",
                    self.camera,
                    self.source.describe(),
                    e
                );
                self.publish(InspectionEvent::FrameUnavailable {
                    camera: self.camera,
                    timestamp: SystemTime::now(),
                })
                .await;
                return CycleOutcome::CaptureFailed(e.to_string());
            }
        };
        let captured_at = SystemTime::now();
        self.frame_counter += 1;
        let frame_id = self.frame_counter;

        let inspection = match self.inspection_for(&snapshot).await {
            Ok(inspection) => inspection,
            Err(InspectorError::Engine(EngineError::MissingReference { .. })) => {
                self.publish(InspectionEvent::BaselineMissing {
                    camera: self.camera,
                    timestamp: captured_at,
                })
                .await;
                return CycleOutcome::NoBaseline;
            }
            Err(e) => return self.fail(e.to_string()).await,
        };

        self.set_state(MonitorState::Preprocessing);
        let processed = {
            let inspection = Arc::clone(&inspection);
            tokio::task::spawn_blocking(move || inspection.preprocess(Some(&frame))).await
        };
        let processed = match processed {
            Ok(Ok(processed)) => processed,
            Ok(Err(e)) => return self.fail(e.to_string()).await,
            Err(e) => return self.fail(e.to_string()).await,
        };

        self.set_state(MonitorState::Comparing);
        let monitor = &snapshot.config.monitor;
        let highlight = monitor.highlight.then_some(monitor.highlight_threshold);
        let compared = processed.clone();
        let result = {
            let inspection = Arc::clone(&inspection);
            tokio::task::spawn_blocking(move || inspection.compare_processed(&processed, highlight))
                .await
        };
        let result = match result {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return self.fail(e.to_string()).await,
            Err(e) => return self.fail(e.to_string()).await,
        };

        self.set_state(MonitorState::Classified(result.verdict));
        debug!(
            "Camera {} frame {}: score {:.2}, {}",
            self.camera, frame_id, result.score, result.verdict
        );
        self.publish(InspectionEvent::ComparisonCompleted {
            camera: self.camera,
            frame_id,
            score: result.score,
            verdict: result.verdict,
            frame: Some(compared),
            overlay: result.overlay,
            timestamp: captured_at,
        })
        .await;

        CycleOutcome::Classified {
            score: result.score,
            verdict: result.verdict,
        }
    }

    async fn fail(&self, error: String) -> CycleOutcome {
        warn!("Camera {} comparison failed: {}", self.camera, error);
        self.publish(InspectionEvent::ComparisonFailed {
            camera: self.camera,
            error: error.clone(),
            timestamp: SystemTime::now(),
        })
        .await;
        CycleOutcome::Failed(error)
    }

    /// Inspection for the snapshot's generation, rebuilding the baseline when stale
    async fn inspection_for(&mut self, snapshot: &ConfigSnapshot) -> Result<Arc<Inspection>> {
        if let Some((generation, inspection)) = &self.cached {
            if *generation == snapshot.generation {
                return Ok(Arc::clone(inspection));
            }
        }

        let camera = snapshot.config.camera(self.camera).ok_or_else(|| {
            EngineError::invalid_configuration(format!("camera {} is not configured", self.camera))
        })?;
        let profile = CameraProfile::from_config(camera)?;
        let pipeline = snapshot.config.pipeline()?;

        let standard = match profile.standard() {
            None => {
                return Err(EngineError::MissingReference {
                    camera: self.camera,
                }
                .into())
            }
            Some(StandardRef::Path(path)) => read_image(path).await?,
            Some(StandardRef::Image(image)) => image.clone(),
        };

        let inspection = tokio::task::spawn_blocking(move || {
            Inspection::prepare(profile, pipeline, Some(&standard))
        })
        .await
        .map_err(|e| InspectorError::component("camera_monitor", e.to_string()))??;

        info!(
            "Camera {} baseline prepared for configuration generation {}",
            self.camera, snapshot.generation
        );
        let inspection = Arc::new(inspection);
        self.cached = Some((snapshot.generation, Arc::clone(&inspection)));
        Ok(inspection)
    }
}

/// Runs an [`InspectionWorker`] on a fixed interval as a background task
pub struct CameraMonitor {
    camera: u32,
    worker: Option<InspectionWorker>,
    state: Arc<Mutex<MonitorState>>,
    stats: Arc<Mutex<MonitorStats>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<InspectionWorker>>,
}

impl CameraMonitor {
    pub fn new(worker: InspectionWorker) -> Self {
        Self {
            camera: worker.camera,
            state: Arc::clone(&worker.state),
            stats: Arc::clone(&worker.stats),
            worker: Some(worker),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn camera(&self) -> u32 {
        self.camera
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Start the monitoring loop
    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            warn!("Camera {} monitor is already running", self.camera);
            return Ok(());
        }
        let worker = self.worker.take().ok_or_else(|| {
            InspectorError::component("camera_monitor", "worker was lost by a failed task")
        })?;

        info!(
            "Starting camera {} monitor ({}, every {:?})",
            self.camera,
            worker.source.describe(),
            worker.interval()
        );
        self.task = Some(tokio::spawn(run_loop(worker, self.cancel.clone())));
        Ok(())
    }

    /// Request the loop to stop after the current cycle and wait for it
    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            debug!("Camera {} monitor is not running", self.camera);
            return Ok(());
        };

        info!("Stopping camera {} monitor", self.camera);
        self.cancel.cancel();
        let result = task.await;
        self.cancel = CancellationToken::new();

        match result {
            Ok(worker) => {
                self.worker = Some(worker);
                info!("Camera {} monitor stopped", self.camera);
                Ok(())
            }
            Err(e) => {
                error!("Camera {} monitor task failed: {}", self.camera, e);
                Err(InspectorError::component("camera_monitor", e.to_string()))
            }
        }
    }
}

async fn run_loop(mut worker: InspectionWorker, cancel: CancellationToken) -> InspectionWorker {
    let mut period = worker.interval();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Not raced against cancellation: a started cycle always completes
        let outcome = worker.run_cycle().await;
        trace!("Camera {} cycle: {:?}", worker.camera, outcome);

        let next = worker.interval();
        if next != period {
            debug!("Camera {} interval changed {:?} -> {:?}", worker.camera, period, next);
            period = next;
            ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
    }

    worker.set_state(MonitorState::Idle);
    worker
}

/// Builder for CameraMonitor
#[derive(Default)]
pub struct CameraMonitorBuilder {
    camera: Option<u32>,
    source: Option<Arc<dyn FrameSource>>,
    store: Option<Arc<ConfigStore>>,
    event_bus: Option<Arc<EventBus>>,
}

impl CameraMonitorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera(mut self, camera: u32) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<CameraMonitor> {
        let camera = self.camera.ok_or_else(|| {
            InspectorError::component("camera_monitor_builder", "Camera index is required")
        })?;
        let source = self.source.ok_or_else(|| {
            InspectorError::component("camera_monitor_builder", "Frame source is required")
        })?;
        let store = self.store.ok_or_else(|| {
            InspectorError::component("camera_monitor_builder", "Config store is required")
        })?;
        let event_bus = self.event_bus.ok_or_else(|| {
            InspectorError::component("camera_monitor_builder", "Event bus is required")
        })?;

        if store.snapshot().config.camera(camera).is_none() {
            return Err(EngineError::invalid_configuration(format!(
                "camera {} is not configured",
                camera
            ))
            .into());
        }

        Ok(CameraMonitor::new(InspectionWorker::new(
            camera, source, store, event_bus,
        )))
    }
}
