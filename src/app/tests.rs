use super::*;
use crate::classifier::Verdict;
use crate::config::{AppConfig, CameraConfig};
use crate::events::{EventFilter, InspectionEvent};
use crate::fieldbus::{MockRegisterClient, RegisterClient};
use crate::frame::{EncodedFormat, ImageBuffer, PixelFormat};
use crate::source::{FrameSource, MockFrameSource};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn frame(value: u8) -> ImageBuffer {
    ImageBuffer::filled(6, 6, PixelFormat::Bgr24, &[value, value, value]).unwrap()
}

fn test_config(dir: &Path) -> AppConfig {
    let standard = dir.join("standard.png");
    std::fs::write(&standard, frame(0).encode(EncodedFormat::Png, 90).unwrap()).unwrap();

    let mut config = AppConfig::default();
    config.monitor.interval_ms = 10;
    config.storage.path = dir.join("captures").to_string_lossy().into_owned();
    config.storage.format = EncodedFormat::Png;

    let mut camera = CameraConfig::new(0, 30.0);
    camera.standard_image = Some(standard.to_string_lossy().into_owned());
    camera.signal_register = Some(12);
    config.cameras.push(camera);
    // Configured but without a frame source
    config.cameras.push(CameraConfig::new(1, 30.0));
    config
}

async fn build_app(
    dir: &Path,
    source: Arc<MockFrameSource>,
    client: Arc<MockRegisterClient>,
) -> InspectorApp {
    let mut sources: HashMap<u32, Arc<dyn FrameSource>> = HashMap::new();
    sources.insert(0, source as Arc<dyn FrameSource>);
    InspectorApp::with_components(
        test_config(dir),
        None,
        sources,
        Some(client as Arc<dyn RegisterClient>),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_app_creation() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = build_app(
        dir.path(),
        Arc::new(MockFrameSource::new()),
        Arc::new(MockRegisterClient::new()),
    )
    .await;

    assert_eq!(app.monitored_cameras(), vec![0]);
    app.initialize().await.unwrap();
    assert_eq!(
        app.get_component_state("camera0").await,
        Some(ComponentState::Stopped)
    );
    assert_eq!(app.get_component_state("camera1").await, None);
    assert_eq!(
        app.get_component_state("fieldbus").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cameras[0].threshold = -5.0;
    let result = InspectorApp::with_components(config, None, HashMap::new(), None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_anomaly_flows_to_storage_and_fieldbus() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockFrameSource::repeating(frame(255)));
    let client = Arc::new(MockRegisterClient::new());
    let mut app = build_app(dir.path(), Arc::clone(&source), Arc::clone(&client)).await;

    let mut saved = app.event_bus().subscribe_filtered(
        EventFilter::EventTypes(vec!["snapshot_saved"]),
        "test",
    );
    let mut signaled = app.event_bus().subscribe_filtered(
        EventFilter::EventTypes(vec!["verdict_signaled"]),
        "test",
    );

    app.initialize().await.unwrap();
    app.start().await.unwrap();
    assert_eq!(
        app.get_component_state("camera0").await,
        Some(ComponentState::Running)
    );

    let event = timeout(Duration::from_secs(5), saved.recv())
        .await
        .unwrap()
        .unwrap();
    let InspectionEvent::SnapshotSaved { path, camera, .. } = event else {
        panic!("unexpected event");
    };
    assert_eq!(camera, 0);
    assert!(path.exists());
    assert!(path.with_extension("json").exists());

    timeout(Duration::from_secs(5), signaled.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.register(12), Some(Verdict::Anomaly.signal_value()));

    let exit_code = app.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
    for state in app.get_all_component_states().await.values() {
        assert_eq!(state, &ComponentState::Stopped);
    }
    assert!(app.monitor_stats()[&0].anomalies >= 1);
}

#[tokio::test]
async fn test_run_ends_on_shutdown_request() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = build_app(
        dir.path(),
        Arc::new(MockFrameSource::repeating(frame(0))),
        Arc::new(MockRegisterClient::new()),
    )
    .await;
    let handle = app.shutdown_handle();
    let mut shutdown_events = app.event_bus().subscribe_filtered(
        EventFilter::EventTypes(vec!["shutdown_requested"]),
        "test",
    );

    app.initialize().await.unwrap();
    app.start().await.unwrap();
    let runner = tokio::spawn(async move { app.run().await });

    assert!(handle.request(ShutdownReason::UserRequest).await);
    assert!(!handle.request(ShutdownReason::UserRequest).await);

    let exit_code = timeout(Duration::from_secs(10), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit_code, 0);

    let event = shutdown_events.recv().await.unwrap();
    assert!(matches!(
        event,
        InspectionEvent::ShutdownRequested { ref reason, .. } if reason == "user request"
    ));
}

#[tokio::test]
async fn test_standard_update_is_picked_up_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockFrameSource::repeating(frame(200)));
    let mut app = build_app(dir.path(), source, Arc::new(MockRegisterClient::new())).await;
    let mut completed = app
        .event_bus()
        .subscribe_filtered(EventFilter::Cameras(vec![0]), "test");

    app.initialize().await.unwrap();
    app.start().await.unwrap();

    let new_standard = dir.path().join("standard2.png");
    std::fs::write(
        &new_standard,
        frame(200).encode(EncodedFormat::Png, 90).unwrap(),
    )
    .unwrap();
    app.config_store()
        .set_standard_image(0, new_standard.to_string_lossy())
        .await
        .unwrap();

    let normal = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(InspectionEvent::ComparisonCompleted {
                verdict: Verdict::Normal,
                ..
            }) = completed.recv()
            .await
            {
                break;
            }
        }
    })
    .await;
    assert!(normal.is_ok());

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_captured_standard_becomes_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockFrameSource::repeating(frame(180)));
    let mut app = build_app(dir.path(), source, Arc::new(MockRegisterClient::new())).await;

    let path = app.capture_standard(0).await.unwrap();
    assert!(path.starts_with(dir.path().join("captures")));
    let snapshot = app.config_store().snapshot();
    assert_eq!(snapshot.generation, 1);
    assert_eq!(
        snapshot.config.camera(0).unwrap().standard_image.as_deref(),
        Some(path.to_string_lossy().as_ref())
    );

    // Camera 1 has no frame source to capture from
    assert!(app.capture_standard(1).await.is_err());

    let mut completed = app.event_bus().subscribe_filtered(
        EventFilter::EventTypes(vec!["comparison_completed"]),
        "test",
    );
    app.initialize().await.unwrap();
    app.start().await.unwrap();

    let event = timeout(Duration::from_secs(5), completed.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event,
        InspectionEvent::ComparisonCompleted {
            verdict: Verdict::Normal,
            ..
        }
    ));

    app.shutdown().await.unwrap();
}
