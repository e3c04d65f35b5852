//! Shared, atomically replaced configuration.
//!
//! Readers take an `Arc` snapshot and never block writers for longer than a
//! pointer swap. Every accepted update bumps the generation so consumers can
//! tell when cached derived state (preprocessed standards) went stale.

use crate::config::AppConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventBus, InspectionEvent};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// A consistent view of the configuration at one generation
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub config: Arc<AppConfig>,
    pub generation: u64,
}

pub struct ConfigStore {
    current: RwLock<ConfigSnapshot>,
    // Serializes writers so read-modify-write updates never lose each other
    update_lock: Mutex<()>,
    event_bus: Option<EventBus>,
    persist_path: Option<PathBuf>,
}

impl ConfigStore {
    /// Validate `config` and make it generation 0
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(ConfigSnapshot {
                config: Arc::new(config),
                generation: 0,
            }),
            update_lock: Mutex::new(()),
            event_bus: None,
            persist_path: None,
        })
    }

    /// Announce accepted updates on `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Write every accepted update to `path`
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Apply `edit` to a copy of the current configuration and swap it in.
    ///
    /// The edit is rejected, leaving the current generation untouched, when
    /// the result fails validation.
    pub async fn update<F>(&self, edit: F) -> Result<u64>
    where
        F: FnOnce(&mut AppConfig) -> std::result::Result<(), EngineError>,
    {
        let (generation, config) = {
            let _guard = self.update_lock.lock();
            let mut next = (*self.current.read().config).clone();
            edit(&mut next)?;
            next.validate()?;

            let config = Arc::new(next);
            let mut current = self.current.write();
            current.generation += 1;
            current.config = Arc::clone(&config);
            (current.generation, config)
        };

        debug!("Configuration generation {} accepted", generation);

        if let Some(path) = &self.persist_path {
            config.save_to_file(path)?;
        }

        if let Some(event_bus) = &self.event_bus {
            if let Err(e) = event_bus
                .publish(InspectionEvent::ConfigurationChanged {
                    generation,
                    timestamp: SystemTime::now(),
                })
                .await
            {
                debug!("No listeners for configuration change: {}", e);
            }
        }

        Ok(generation)
    }

    /// Point a camera at a new standard image
    pub async fn set_standard_image(&self, camera: u32, path: impl Into<String>) -> Result<u64> {
        let path = path.into();
        info!("Camera {} standard image set to {}", camera, path);
        self.update(move |config| {
            let entry = config.camera_mut(camera).ok_or_else(|| unknown_camera(camera))?;
            entry.standard_image = Some(path);
            Ok(())
        })
        .await
    }

    /// Change a camera's anomaly threshold
    pub async fn set_threshold(&self, camera: u32, threshold: f64) -> Result<u64> {
        self.update(move |config| {
            let entry = config.camera_mut(camera).ok_or_else(|| unknown_camera(camera))?;
            entry.threshold = threshold;
            Ok(())
        })
        .await
    }
}

fn unknown_camera(camera: u32) -> EngineError {
    EngineError::invalid_configuration(format!("camera {} is not configured", camera))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crate::error::InspectorError;
    use crate::pipeline::{PreprocessingStep, StepOp};

    fn store_with_camera() -> ConfigStore {
        let mut config = AppConfig::default();
        config.cameras.push(CameraConfig::new(0, 30.0));
        ConfigStore::new(config).unwrap()
    }

    #[test]
    fn test_rejects_invalid_initial_config() {
        let mut config = AppConfig::default();
        config.cameras.push(CameraConfig::new(0, -3.0));
        assert!(ConfigStore::new(config).is_err());
    }

    #[tokio::test]
    async fn test_update_bumps_generation() {
        let store = store_with_camera();
        let before = store.snapshot();
        assert_eq!(before.generation, 0);

        let generation = store.set_threshold(0, 55.0).await.unwrap();
        assert_eq!(generation, 1);

        let after = store.snapshot();
        assert_eq!(after.config.cameras[0].threshold, 55.0);
        // Earlier snapshots are unaffected
        assert_eq!(before.config.cameras[0].threshold, 30.0);
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected_atomically() {
        let store = store_with_camera();

        let result = store
            .update(|config| {
                config.cameras[0].threshold = 99.0;
                config
                    .preprocessing
                    .push(PreprocessingStep::new(1, StepOp::GaussianBlur { kernel_size: 2 }));
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(InspectorError::Engine(EngineError::InvalidParameter { .. }))
        ));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.generation, 0);
        assert_eq!(snapshot.config.cameras[0].threshold, 30.0);
        assert!(snapshot.config.preprocessing.is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_gray_only_step_on_color_frames() {
        let store = store_with_camera();

        let result = store
            .update(|config| {
                config
                    .preprocessing
                    .push(PreprocessingStep::new(1, StepOp::Threshold { value: 128.0 }));
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(InspectorError::Engine(EngineError::UnsupportedFormat {
                step: "threshold",
                ..
            }))
        ));
        assert_eq!(store.generation(), 0);
    }

    #[tokio::test]
    async fn test_unknown_camera() {
        let store = store_with_camera();
        assert!(store.set_standard_image(9, "x.png").await.is_err());
        assert_eq!(store.generation(), 0);
    }

    #[tokio::test]
    async fn test_update_announces_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inspector.toml");
        let event_bus = EventBus::new(8);
        let mut receiver = event_bus.subscribe();

        let store = store_with_camera()
            .with_event_bus(event_bus)
            .with_persistence(&path);
        store.set_standard_image(0, "std/cam0.png").await.unwrap();

        match receiver.recv().await.unwrap() {
            InspectionEvent::ConfigurationChanged { generation, .. } => assert_eq!(generation, 1),
            other => panic!("unexpected event {:?}", other),
        }

        let reloaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(
            reloaded.cameras[0].standard_image.as_deref(),
            Some("std/cam0.png")
        );
    }
}
