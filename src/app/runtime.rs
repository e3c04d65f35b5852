use super::{InspectorApp, ShutdownHandle, ShutdownReason};
use crate::error::{InspectorError, Result};
use crate::events::InspectionEvent;
use std::time::SystemTime;
use tokio::signal;
use tracing::{info, warn};

impl InspectorApp {
    /// Run until a signal or shutdown request arrives, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("Inspector is running");

        let shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| InspectorError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;

        self.setup_signal_handlers(self.shutdown_handle());

        let shutdown_reason = shutdown_receiver.await.map_err(|_| InspectorError::System {
            message: "Shutdown channel closed unexpectedly".to_string(),
        })?;

        info!("Shutdown initiated: {}", shutdown_reason);
        if let Err(e) = self
            .event_bus
            .publish(InspectionEvent::ShutdownRequested {
                timestamp: SystemTime::now(),
                reason: shutdown_reason.to_string(),
            })
            .await
        {
            info!("Shutdown notification not delivered: {}", e);
        }

        let exit_code = self.shutdown().await?;

        info!("Inspector shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self, handle: ShutdownHandle) {
        // SIGTERM (systemd stop), Unix only
        #[cfg(unix)]
        {
            let handle = handle.clone();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            handle
                                .request(ShutdownReason::Signal("SIGTERM".to_string()))
                                .await;
                        }
                    }
                    Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        // SIGINT (Ctrl+C)
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                handle
                    .request(ShutdownReason::Signal("SIGINT".to_string()))
                    .await;
            }
        });
    }
}
