pub mod app;
pub mod classifier;
pub mod config;
pub mod difference;
pub mod error;
pub mod events;
pub mod fieldbus;
pub mod frame;
pub mod monitor;
pub mod pipeline;
pub mod profile;
pub mod source;
pub mod storage;
pub mod store;

pub use app::{ComponentState, InspectorApp, ShutdownHandle, ShutdownReason};
pub use classifier::{classify, compare, ComparisonResult, Verdict};
pub use config::{AppConfig, CameraConfig, FieldbusConfig, MonitorConfig, StorageConfig};
pub use difference::{abs_diff, difference_mask, highlight, mse};
pub use error::{EngineError, EventBusError, FieldbusError, InspectorError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, InspectionEvent};
pub use fieldbus::{MockRegisterClient, ModbusTcpClient, RegisterClient, VerdictSignaler};
pub use frame::{EncodedFormat, ImageBuffer, PixelFormat};
pub use monitor::{CameraMonitor, CameraMonitorBuilder, CycleOutcome, MonitorState, MonitorStats};
pub use pipeline::{PreprocessingPipeline, PreprocessingStep, StepOp};
pub use profile::{CameraProfile, Inspection, StandardRef};
pub use source::{FileFrameSource, FrameSource, MockFrameSource};
pub use storage::{capture_standard, read_image, write_image, SnapshotMetadata, SnapshotStore};
pub use store::{ConfigSnapshot, ConfigStore};
