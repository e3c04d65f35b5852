use super::RegisterClient;
use crate::classifier::Verdict;
use crate::error::EventBusError;
use crate::events::{EventBus, EventFilter, InspectionEvent};
use crate::store::ConfigStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives each camera's verdict onto its configured holding register.
///
/// A register is only written when the camera's verdict changes, or when the
/// previous write failed.
pub struct VerdictSignaler {
    client: Arc<dyn RegisterClient>,
    store: Arc<ConfigStore>,
    event_bus: Arc<EventBus>,
    last_written: HashMap<u32, Verdict>,
}

impl VerdictSignaler {
    pub fn new(
        client: Arc<dyn RegisterClient>,
        store: Arc<ConfigStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            client,
            store,
            event_bus,
            last_written: HashMap::new(),
        }
    }

    /// Write `verdict` for `camera` if it has a register and the value changed.
    ///
    /// Returns the register written, if any.
    pub async fn signal(&mut self, camera: u32, verdict: Verdict) -> Option<u16> {
        let register = self
            .store
            .snapshot()
            .config
            .camera(camera)
            .and_then(|c| c.signal_register)?;

        if self.last_written.get(&camera) == Some(&verdict) {
            return None;
        }

        let value = verdict.signal_value();
        match self.client.write_register(register, value).await {
            Ok(()) => {
                debug!("Camera {} verdict {} written to register {}", camera, verdict, register);
                self.last_written.insert(camera, verdict);
                if let Err(e) = self
                    .event_bus
                    .publish(InspectionEvent::VerdictSignaled {
                        camera,
                        register,
                        value,
                        timestamp: SystemTime::now(),
                    })
                    .await
                {
                    debug!("Verdict notification not delivered: {}", e);
                }
                Some(register)
            }
            Err(e) => {
                warn!(
                    "Failed to signal camera {} verdict on {}: {}",
                    camera,
                    self.client.describe(),
                    e
                );
                self.last_written.remove(&camera);
                None
            }
        }
    }

    /// Follow comparison results until `cancel` fires
    pub fn start(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut receiver = self.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["comparison_completed", "configuration_changed"]),
            "verdict_signaler",
        );

        tokio::spawn(async move {
            info!("Verdict signaler using {}", self.client.describe());
            match self.client.check_connection().await {
                Ok(()) => info!("Controller reachable"),
                Err(e) => warn!("Controller not reachable yet: {}", e),
            }

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = receiver.recv() => received,
                };

                match event {
                    Ok(InspectionEvent::ComparisonCompleted {
                        camera, verdict, ..
                    }) => {
                        self.signal(camera, verdict).await;
                    }
                    // Register assignments may have moved
                    Ok(InspectionEvent::ConfigurationChanged { .. }) => {
                        self.last_written.clear();
                    }
                    Ok(_) => {}
                    Err(EventBusError::ChannelClosed) => break,
                    Err(e) => warn!("Verdict signaler missed events: {}", e),
                }
            }
            info!("Verdict signaler stopped");
        })
    }
}
