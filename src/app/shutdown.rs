use super::startup::monitor_component;
use super::{ComponentState, InspectorApp};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info};

const MONITOR_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl InspectorApp {
    /// Perform graceful shutdown of all components.
    ///
    /// Producers stop first so consumers can drain what was already published.
    pub async fn shutdown(&mut self) -> crate::error::Result<i32> {
        info!("Beginning graceful shutdown");
        let mut exit_code = 0;

        for index in 0..self.monitors.len() {
            let camera = self.monitors[index].camera();
            let component = monitor_component(camera);
            self.set_component_state(&component, ComponentState::Stopping).await;

            match timeout(MONITOR_STOP_TIMEOUT, self.monitors[index].stop()).await {
                Ok(Ok(())) => {
                    self.set_component_state(&component, ComponentState::Stopped).await;
                }
                Ok(Err(e)) => {
                    error!("Error stopping {}: {}", component, e);
                    self.set_component_state(&component, ComponentState::Failed).await;
                    exit_code = 1;
                }
                Err(_) => {
                    error!("{} stop timeout", component);
                    self.set_component_state(&component, ComponentState::Failed).await;
                    exit_code = 1;
                }
            }
        }

        // Stops the snapshot writer and verdict signaler
        self.cancellation_token.cancel();

        let tasks = [
            ("fieldbus", self.signaler_task.take()),
            ("storage", self.snapshot_task.take()),
        ];
        for (component, task) in tasks {
            let Some(task) = task else {
                continue;
            };
            if !self.stop_task(component, task).await {
                exit_code = 1;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_task(&self, component: &str, task: JoinHandle<()>) -> bool {
        self.set_component_state(component, ComponentState::Stopping).await;
        match timeout(TASK_STOP_TIMEOUT, task).await {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped).await;
                info!("{} component stopped", component);
                true
            }
            Ok(Err(e)) => {
                error!("Error stopping {} component: {}", component, e);
                self.set_component_state(component, ComponentState::Failed).await;
                false
            }
            Err(_) => {
                error!("{} component stop timeout", component);
                self.set_component_state(component, ComponentState::Failed).await;
                false
            }
        }
    }
}
