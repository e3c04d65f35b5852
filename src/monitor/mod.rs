//! Per-camera monitoring loops.

pub mod camera;
pub mod state;

pub use camera::{CameraMonitor, CameraMonitorBuilder, InspectionWorker};
pub use state::{CycleOutcome, MonitorState, MonitorStats};
