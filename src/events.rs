use crate::classifier::Verdict;
use crate::error::EventBusError;
use crate::frame::ImageBuffer;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur while inspecting cameras
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InspectionEvent {
    /// A frame was compared against its standard image
    ComparisonCompleted {
        camera: u32,
        frame_id: u64,
        score: f64,
        verdict: Verdict,
        /// Preprocessed frame that was compared
        #[serde(skip)]
        frame: Option<ImageBuffer>,
        /// Highlighted copy of `frame`
        #[serde(skip)]
        overlay: Option<ImageBuffer>,
        timestamp: SystemTime,
    },
    /// Preprocessing or comparison of a frame failed
    ComparisonFailed {
        camera: u32,
        error: String,
        timestamp: SystemTime,
    },
    /// The camera has no standard image to compare against
    BaselineMissing { camera: u32, timestamp: SystemTime },
    /// The frame source had nothing to offer this cycle
    FrameUnavailable { camera: u32, timestamp: SystemTime },
    /// An image was written to storage
    SnapshotSaved {
        camera: u32,
        path: PathBuf,
        timestamp: SystemTime,
    },
    /// A verdict was written to the controller
    VerdictSignaled {
        camera: u32,
        register: u16,
        value: u16,
        timestamp: SystemTime,
    },
    /// A new configuration generation is active
    ConfigurationChanged {
        generation: u64,
        timestamp: SystemTime,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl InspectionEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            InspectionEvent::ComparisonCompleted { timestamp, .. } => *timestamp,
            InspectionEvent::ComparisonFailed { timestamp, .. } => *timestamp,
            InspectionEvent::BaselineMissing { timestamp, .. } => *timestamp,
            InspectionEvent::FrameUnavailable { timestamp, .. } => *timestamp,
            InspectionEvent::SnapshotSaved { timestamp, .. } => *timestamp,
            InspectionEvent::VerdictSignaled { timestamp, .. } => *timestamp,
            InspectionEvent::ConfigurationChanged { timestamp, .. } => *timestamp,
            InspectionEvent::SystemError { .. } => SystemTime::now(),
            InspectionEvent::ShutdownRequested { timestamp, .. } => *timestamp,
        }
    }

    /// Camera the event concerns, if any
    pub fn camera(&self) -> Option<u32> {
        match self {
            InspectionEvent::ComparisonCompleted { camera, .. }
            | InspectionEvent::ComparisonFailed { camera, .. }
            | InspectionEvent::BaselineMissing { camera, .. }
            | InspectionEvent::FrameUnavailable { camera, .. }
            | InspectionEvent::SnapshotSaved { camera, .. }
            | InspectionEvent::VerdictSignaled { camera, .. } => Some(*camera),
            _ => None,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            InspectionEvent::ComparisonCompleted {
                camera,
                frame_id,
                score,
                verdict,
                ..
            } => {
                format!(
                    "Camera {} frame {}: {} (score {:.2})",
                    camera, frame_id, verdict, score
                )
            }
            InspectionEvent::ComparisonFailed { camera, error, .. } => {
                format!("Camera {} comparison failed: {}", camera, error)
            }
            InspectionEvent::BaselineMissing { camera, .. } => {
                format!("Camera {} has no standard image", camera)
            }
            InspectionEvent::FrameUnavailable { camera, .. } => {
                format!("Camera {} has no frame", camera)
            }
            InspectionEvent::SnapshotSaved { camera, path, .. } => {
                format!("Camera {} snapshot saved to {}", camera, path.display())
            }
            InspectionEvent::VerdictSignaled {
                camera,
                register,
                value,
                ..
            } => {
                format!(
                    "Camera {} wrote {} to register {}",
                    camera, value, register
                )
            }
            InspectionEvent::ConfigurationChanged { generation, .. } => {
                format!("Configuration generation {} active", generation)
            }
            InspectionEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            InspectionEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            InspectionEvent::ComparisonCompleted { .. } => "comparison_completed",
            InspectionEvent::ComparisonFailed { .. } => "comparison_failed",
            InspectionEvent::BaselineMissing { .. } => "baseline_missing",
            InspectionEvent::FrameUnavailable { .. } => "frame_unavailable",
            InspectionEvent::SnapshotSaved { .. } => "snapshot_saved",
            InspectionEvent::VerdictSignaled { .. } => "verdict_signaled",
            InspectionEvent::ConfigurationChanged { .. } => "configuration_changed",
            InspectionEvent::SystemError { .. } => "system_error",
            InspectionEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<InspectionEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<InspectionEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: InspectionEvent) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        match &event {
            InspectionEvent::ComparisonCompleted {
                verdict: Verdict::Anomaly,
                ..
            } => {
                info!("{}", event.description());
            }
            InspectionEvent::ComparisonFailed { .. } | InspectionEvent::BaselineMissing { .. } => {
                warn!("{}", event.description());
            }
            InspectionEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            InspectionEvent::ConfigurationChanged { generation, .. } => {
                info!("Configuration generation {} active", generation);
            }
            InspectionEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events concerning specific cameras
    Cameras(Vec<u32>),
    /// Accept events from specific components (for SystemError events)
    Components(Vec<String>),
    /// Custom filter function
    Custom(fn(&InspectionEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &InspectionEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Cameras(cameras) => event
                .camera()
                .map(|camera| cameras.contains(&camera))
                .unwrap_or(false),
            EventFilter::Components(components) => {
                if let InspectionEvent::SystemError { component, .. } = event {
                    components.contains(component)
                } else {
                    false
                }
            }
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<InspectionEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<InspectionEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<InspectionEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!("Receiver '{}' received event: {}", self.name, event.description());
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<InspectionEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn completed(camera: u32, verdict: Verdict) -> InspectionEvent {
        InspectionEvent::ComparisonCompleted {
            camera,
            frame_id: 1,
            score: 1500.0,
            verdict,
            frame: None,
            overlay: None,
            timestamp: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus
            .publish(completed(0, Verdict::Anomaly))
            .await
            .unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            InspectionEvent::ComparisonCompleted { score, verdict, .. } => {
                assert_eq!(score, 1500.0);
                assert_eq!(verdict, Verdict::Anomaly);
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(10);
        assert!(event_bus
            .publish(completed(0, Verdict::Normal))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus
            .publish(InspectionEvent::FrameUnavailable {
                camera: 1,
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::EventTypes(vec!["comparison_completed", "baseline_missing"]);
        assert!(filter.matches(&completed(0, Verdict::Normal)));
        assert!(!filter.matches(&InspectionEvent::FrameUnavailable {
            camera: 0,
            timestamp: SystemTime::now(),
        }));

        let cameras = EventFilter::Cameras(vec![2]);
        assert!(cameras.matches(&completed(2, Verdict::Normal)));
        assert!(!cameras.matches(&completed(3, Verdict::Normal)));
        assert!(!cameras.matches(&InspectionEvent::ConfigurationChanged {
            generation: 1,
            timestamp: SystemTime::now(),
        }));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut filtered_receiver =
            event_bus.subscribe_filtered(EventFilter::Cameras(vec![5]), "test");

        event_bus
            .publish(completed(4, Verdict::Anomaly))
            .await
            .unwrap();
        event_bus
            .publish(completed(5, Verdict::Normal))
            .await
            .unwrap();

        let received = timeout(Duration::from_millis(100), filtered_receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.camera(), Some(5));
    }

    #[test]
    fn test_event_properties() {
        let event = completed(7, Verdict::Anomaly);
        assert_eq!(event.event_type(), "comparison_completed");
        assert!(event.description().contains("1500.00"));
        assert!(event.description().contains("Anomaly"));
    }

    #[test]
    fn test_overlay_is_not_serialized() {
        let event = completed(0, Verdict::Normal);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("overlay"));
    }
}
