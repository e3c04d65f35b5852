use super::{ComponentState, InspectorApp};
use crate::error::Result;
use crate::fieldbus::VerdictSignaler;
use std::sync::Arc;
use tracing::{error, info};

impl InspectorApp {
    /// Register every component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing inspector components");

        let mut states = self.component_states.lock().await;
        states.insert("storage".to_string(), ComponentState::Stopped);
        if self.register_client.is_some() {
            states.insert("fieldbus".to_string(), ComponentState::Stopped);
        }
        for monitor in &self.monitors {
            states.insert(monitor_component(monitor.camera()), ComponentState::Stopped);
        }
        drop(states);

        info!("{} camera monitor(s) initialized", self.monitors.len());
        Ok(())
    }

    /// Start consumers first so no result published by a monitor is missed
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting inspector");

        self.set_component_state("storage", ComponentState::Starting).await;
        self.snapshots.ensure_directory().await.map_err(|e| {
            error!("Failed to prepare snapshot storage: {}", e);
            e
        })?;
        self.snapshot_task = Some(Arc::clone(&self.snapshots).start(
            Arc::clone(&self.event_bus),
            self.cancellation_token.child_token(),
        ));
        self.set_component_state("storage", ComponentState::Running).await;
        info!("Snapshot storage started at {}", self.snapshots.root().display());

        if let Some(client) = &self.register_client {
            self.set_component_state("fieldbus", ComponentState::Starting).await;
            let signaler = VerdictSignaler::new(
                Arc::clone(client),
                Arc::clone(&self.store),
                Arc::clone(&self.event_bus),
            );
            self.signaler_task = Some(signaler.start(self.cancellation_token.child_token()));
            self.set_component_state("fieldbus", ComponentState::Running).await;
        }

        let mut started = Vec::new();
        for monitor in &mut self.monitors {
            monitor.start().map_err(|e| {
                error!("Failed to start camera {} monitor: {}", monitor.camera(), e);
                e
            })?;
            started.push(monitor.camera());
        }
        for camera in started {
            self.set_component_state(&monitor_component(camera), ComponentState::Running).await;
        }

        info!("Inspector started");
        Ok(())
    }
}

pub(super) fn monitor_component(camera: u32) -> String {
    format!("camera{}", camera)
}
