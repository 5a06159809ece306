//! Device life cycle: open with retry, mode and camera switches, close

use std::sync::Arc;

use lenscore::hardware::{HardwareError, LensFacing};
use lenscore::invariants::{require_checked, reset_checks};
use lenscore::request::CaptureTemplate;
use lenscore::testing::{back_main_descriptor, front_descriptor};
use lenscore::{
    CameraError, CaptureMode, HandlerState, LogicalCameraId, ManagerState, OrchestratorState,
};

mod support;

#[tokio::test]
async fn test_open_retries_transient_failures() {
    let harness = support::harness_with(|_| {});
    let core = &harness.rig.orchestrator;
    harness.rig.hardware.fail_next_opens(2);

    core.initialize().await.expect("open after retries");

    assert_eq!(harness.rig.hardware.open_attempts(), 3);
    assert_eq!(core.state(), OrchestratorState::Ready);
    assert_eq!(core.current_logical_camera(), Some(LogicalCameraId::Main));
    assert_eq!(harness.rig.hardware.log().opened, vec!["0".to_string()]);
    core.close().await;
}

#[tokio::test]
async fn test_open_gives_up_after_configured_attempts() {
    let harness = support::harness_with(|_| {});
    let core = &harness.rig.orchestrator;
    harness
        .rig
        .hardware
        .set_open_error(Some(HardwareError::PermissionDenied("camera".to_string())));

    let result = core.initialize().await;

    assert!(matches!(result, Err(CameraError::PermissionDenied(_))), "{:?}", result);
    assert_eq!(harness.rig.hardware.open_attempts(), 3);
    assert!(matches!(core.state(), OrchestratorState::Error(_)));
    assert!(harness.rig.hardware.log().opened.is_empty());
}

#[tokio::test]
async fn test_unavailable_device_is_not_retried() {
    let harness = support::harness_with(|_| {});
    let core = &harness.rig.orchestrator;
    harness
        .rig
        .hardware
        .set_open_error(Some(HardwareError::Unavailable("in use".to_string())));

    let result = core.initialize().await;

    assert!(matches!(result, Err(CameraError::ResourceUnavailable(_))), "{:?}", result);
    assert_eq!(harness.rig.hardware.open_attempts(), 1);

    // A later initialize can still succeed once the device frees up.
    harness.rig.hardware.set_open_error(None);
    core.initialize().await.expect("second initialize");
    assert_eq!(core.state(), OrchestratorState::Ready);
    core.close().await;
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;

    core.initialize().await.expect("already open");

    assert_eq!(harness.rig.hardware.open_attempts(), 1);
    assert_eq!(harness.rig.hardware.open_sessions(), 1);
    core.close().await;
}

#[tokio::test]
async fn test_concurrent_initialize_opens_once() {
    let harness = support::harness_with(|_| {});
    let core = &harness.rig.orchestrator;

    let (first, second) = tokio::join!(core.initialize(), core.initialize());

    first.expect("first initialize");
    second.expect("second initialize");
    assert_eq!(harness.rig.hardware.open_attempts(), 1);
    assert_eq!(harness.rig.hardware.log().opened, vec!["0".to_string()]);
    assert_eq!(core.state(), OrchestratorState::Ready);
    core.close().await;
}

#[tokio::test]
async fn test_repeated_session_report_keeps_controllers() {
    let harness = support::harness_with(|_| {});
    let (_, photo, _) = support::register_journaled(&harness);
    support::start(&harness).await;
    let core = &harness.rig.orchestrator;
    let host = photo.host().expect("attached host");
    let session = host.session().expect("configured session");
    let writes = harness.rig.hardware.log().repeating.len();

    host.report_session_configured(session.clone()).await;
    host.report_session_configured(session).await;

    assert_eq!(core.await_controllers().await, ManagerState::Ready);
    assert_eq!(harness.rig.hardware.log().repeating.len(), writes);
    assert!(core.registry().are_all_controllers_ready());
    core.close().await;
}

#[tokio::test]
async fn test_preview_installs_standing_request() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;

    let standing = harness.rig.hardware.last_repeating().expect("preview request");
    assert_eq!(standing.template, CaptureTemplate::Preview);
    assert_eq!(standing.targets, vec![harness.preview.id]);
    assert_eq!(core.preview_target(), Some(harness.preview));

    let photo = core.mode_handler(CaptureMode::Photo).expect("photo handler");
    assert_eq!(photo.state(), HandlerState::PreviewActive);
    core.close().await;
}

#[tokio::test]
async fn test_mode_switch_moves_the_session_between_handlers() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    let photo = core.mode_handler(CaptureMode::Photo).expect("photo handler");
    let video = core.mode_handler(CaptureMode::Video).expect("video handler");

    support::switch_mode(&harness, CaptureMode::Video).await;

    assert_eq!(core.camera_mode(), CaptureMode::Video);
    assert_eq!(photo.state(), HandlerState::Detached);
    assert_eq!(video.state(), HandlerState::PreviewActive);
    assert_eq!(harness.rig.hardware.open_sessions(), 1);
    assert_eq!(
        harness.rig.hardware.last_repeating().map(|r| r.template),
        Some(CaptureTemplate::Record)
    );

    support::switch_mode(&harness, CaptureMode::Photo).await;
    assert_eq!(video.state(), HandlerState::Detached);
    assert_eq!(photo.state(), HandlerState::PreviewActive);
    assert_eq!(harness.rig.hardware.open_sessions(), 1);
    core.close().await;
}

#[tokio::test]
async fn test_mode_switch_detaches_before_attaching() {
    let harness = support::harness_with(|_| {});
    let (journal, _, _) = support::register_journaled(&harness);
    support::start(&harness).await;

    support::switch_mode(&harness, CaptureMode::Video).await;

    assert_eq!(
        support::entries(&journal),
        vec!["photo attach", "photo preview", "photo detach", "video attach", "video preview"]
    );
    harness.rig.orchestrator.close().await;
}

#[tokio::test]
async fn test_modes_without_own_handler_share_one() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    let sessions = harness.rig.hardware.log().sessions.len();

    support::switch_mode(&harness, CaptureMode::Portrait).await;

    assert!(Arc::ptr_eq(
        &core.mode_handler(CaptureMode::Portrait).expect("portrait"),
        &core.mode_handler(CaptureMode::Photo).expect("photo"),
    ));
    // Same handler, so no new session.
    assert_eq!(harness.rig.hardware.log().sessions.len(), sessions);
    core.close().await;
}

#[tokio::test]
async fn test_mode_selected_before_open_attaches_on_initialize() {
    let harness = support::harness_with(|_| {});
    let core = &harness.rig.orchestrator;

    core.set_camera_mode(CaptureMode::Night)
        .await
        .expect("switch task")
        .expect("deferred switch");
    support::start(&harness).await;

    let night = core.mode_handler(CaptureMode::Night).expect("night handler");
    assert_eq!(night.state(), HandlerState::PreviewActive);
    core.close().await;
}

#[tokio::test]
async fn test_switch_camera_flips_facing() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;

    // Preview resumes on the remembered target.
    core.switch_camera().await.expect("switch to front");
    assert_eq!(core.await_controllers().await, ManagerState::Ready);

    assert_eq!(core.current_logical_camera(), Some(LogicalCameraId::Front));
    assert_eq!(
        core.current_descriptor().map(|d| d.facing),
        Some(LensFacing::Front)
    );
    let log = harness.rig.hardware.log();
    assert_eq!(log.opened, vec!["0".to_string(), "1".to_string()]);
    assert_eq!(log.closed_devices, vec!["0".to_string()]);
    assert_eq!(harness.rig.hardware.open_sessions(), 1);
    // Front unit has no zoom.
    assert!(!core.set_zoom(2.0).await);

    core.switch_camera().await.expect("switch back");
    assert_eq!(core.current_logical_camera(), Some(LogicalCameraId::Main));
    core.close().await;
}

#[tokio::test]
async fn test_switch_to_missing_camera_is_rejected() {
    let harness = support::harness_with_descriptors(vec![back_main_descriptor()]);
    let core = &harness.rig.orchestrator;
    support::start(&harness).await;

    let result = core.switch_to_logical_camera(LogicalCameraId::Telephoto).await;
    assert!(matches!(result, Err(CameraError::UnsupportedOperation(_))), "{:?}", result);
    assert!(core.switch_camera().await.is_err());

    // Still on the main unit.
    assert_eq!(core.current_logical_camera(), Some(LogicalCameraId::Main));
    assert_eq!(harness.rig.hardware.open_sessions(), 1);
    core.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;

    core.close().await;
    core.close().await;

    assert_eq!(core.state(), OrchestratorState::Closed);
    assert_eq!(harness.rig.hardware.open_sessions(), 0);
    assert_eq!(harness.rig.hardware.log().closed_devices, vec!["0".to_string()]);
    assert!(matches!(core.initialize().await, Err(CameraError::Closed)));
    assert!(core.capture().await.is_err());
    assert!(!core.set_zoom(2.0).await);
    assert!(!core.is_recording().await);
}

#[tokio::test]
async fn test_state_stream_follows_life_cycle() {
    let harness = support::harness_with(|_| {});
    let core = &harness.rig.orchestrator;
    let mut states = core.state_stream();
    assert_eq!(*states.borrow_and_update(), OrchestratorState::Idle);

    core.initialize().await.expect("initialize");
    assert!(states.has_changed().unwrap_or(false));
    assert_eq!(*states.borrow_and_update(), OrchestratorState::Ready);

    core.close().await;
    assert_eq!(*states.borrow_and_update(), OrchestratorState::Closed);
}

#[tokio::test]
async fn test_discovery_reports_cameras() {
    let harness = support::harness_with_descriptors(vec![back_main_descriptor(), front_descriptor()]);
    let core = &harness.rig.orchestrator;
    support::start(&harness).await;

    let cameras = core.available_cameras();
    assert_eq!(cameras.len(), 2);
    assert_eq!(core.cameras_for_mode(CaptureMode::Night), vec![LogicalCameraId::Main]);
    assert!(core.is_mode_supported(LogicalCameraId::Front, CaptureMode::Photo));
    assert_eq!(core.best_camera_for_mode(CaptureMode::Video), LogicalCameraId::Main);
    assert_eq!(core.max_zoom(), 4.0);
    assert_eq!(core.current_zoom(), 1.0);
    core.close().await;
}

/// Current-thread runtime so the spawned controller init shares the
/// thread-local invariant log.
#[tokio::test]
async fn contract_open_preview_switch_close() {
    reset_checks();

    let harness = support::ready_harness().await;
    support::switch_mode(&harness, CaptureMode::Video).await;
    support::switch_mode(&harness, CaptureMode::Photo).await;
    assert!(harness.rig.orchestrator.set_zoom(2.0).await);
    harness.rig.orchestrator.close().await;

    require_checked(
        "open, preview, switch, close",
        &[
            "At most one mode handler is attached",
            "A device has at most one open session",
            "Controller reaches Ready only after an accepted hardware write",
        ],
    );
}
