//! Controller registry life cycle and aggregate state

use async_trait::async_trait;
use lenscore::controller::{ControllerCore, ControllerHooks, ControllerKind, ManagerState};
use lenscore::hardware::LensFacing;
use lenscore::invariants::{check_record, reset_checks};
use lenscore::{CameraError, ControllerState, ParameterController, RangedController};

mod support;

#[tokio::test]
async fn test_initialize_all_without_session() {
    let harness = support::harness_with(|_| {});
    let registry = harness.rig.orchestrator.registry();

    assert_eq!(registry.manager_state(), ManagerState::Uninitialized);
    let state = registry.initialize_all().await;
    assert_eq!(
        state,
        ManagerState::Error("No active capture session".to_string())
    );
    assert_eq!(registry.manager_state(), state);
}

#[tokio::test]
async fn test_initialize_all_reaches_ready() {
    let harness = support::ready_harness().await;
    let registry = harness.rig.orchestrator.registry();

    assert_eq!(registry.manager_state(), ManagerState::Ready);
    assert!(registry.are_all_controllers_ready());
    assert!(registry.controller_errors().is_empty());

    let states = registry.state_map();
    for name in ["FLASH", "FOCUS", "ZOOM", "ISO", "WHITE_BALANCE", "EXPOSURE", "SHUTTER_SPEED", "HDR", "OIS"] {
        assert_eq!(states.get(name), Some(&ControllerState::Ready), "{}", name);
    }
    harness.rig.orchestrator.close().await;
}

#[tokio::test]
async fn test_failures_are_aggregated() {
    let harness = support::ready_harness().await;
    let registry = harness.rig.orchestrator.registry();

    harness.rig.hardware.reject_repeating_requests(true);
    let state = registry.initialize_all().await;

    match state {
        ManagerState::Error(msg) => assert!(msg.starts_with("9 controller(s) failed"), "{}", msg),
        other => panic!("expected aggregate error, got {:?}", other),
    }
    let errors = registry.controller_errors();
    assert_eq!(errors.len(), 9);
    assert!(errors.iter().any(|(name, _)| name == "ZOOM"));

    // Controllers stay writable after a failed initialization.
    harness.rig.hardware.reject_repeating_requests(false);
    assert!(harness.rig.orchestrator.set_zoom(2.0).await);
    assert_eq!(registry.zoom().state(), ControllerState::Ready);
    harness.rig.orchestrator.close().await;
}

#[tokio::test]
async fn test_release_all_returns_to_uninitialized() {
    let harness = support::ready_harness().await;
    let registry = harness.rig.orchestrator.registry();
    let zoom_before = registry.zoom();

    registry.release_all().await;

    assert_eq!(registry.manager_state(), ManagerState::Uninitialized);
    assert!(registry.state_map().is_empty());
    assert_eq!(zoom_before.state(), ControllerState::Uninitialized);

    // Released controllers ignore writes; the next access builds a fresh set.
    assert!(!zoom_before.zoom_in().await);
    let zoom_after = registry.zoom();
    assert!(!std::sync::Arc::ptr_eq(&zoom_before, &zoom_after));
    assert_eq!(zoom_after.state(), ControllerState::Uninitialized);
    harness.rig.orchestrator.close().await;
}

#[tokio::test]
async fn test_reset_all_skips_errored_controllers() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    let registry = core.registry();
    assert!(core.set_exposure_compensation(6).await);

    harness.rig.hardware.reject_repeating_requests(true);
    assert!(!core.set_zoom(2.0).await);
    harness.rig.hardware.reject_repeating_requests(false);

    core.reset_to_default_settings().await;

    assert_eq!(registry.exposure().current_value(), 0);
    assert!(registry.zoom().state().is_error());
    core.close().await;
}

#[tokio::test]
async fn test_front_unit_supported_and_enabled_sets() {
    let harness = support::ready_harness_with(|config| {
        config.camera.default_facing = LensFacing::Front;
    })
    .await;
    let registry = harness.rig.orchestrator.registry();

    let mut supported: Vec<&str> = registry
        .supported_controllers()
        .iter()
        .map(|controller| controller.name())
        .collect();
    supported.sort_unstable();
    assert_eq!(supported, vec!["EXPOSURE", "WHITE_BALANCE"]);
    assert!(registry.enabled_controllers().is_empty());

    // Unsupported controllers stay out of the aggregate.
    assert_eq!(registry.manager_state(), ManagerState::Ready);
    assert_eq!(
        registry.state_map().get("ZOOM"),
        Some(&ControllerState::Uninitialized)
    );

    assert!(harness.rig.orchestrator.set_exposure_compensation(3).await);
    let enabled: Vec<&str> = registry
        .enabled_controllers()
        .iter()
        .map(|controller| controller.name())
        .collect();
    assert_eq!(enabled, vec!["EXPOSURE"]);
    harness.rig.orchestrator.close().await;
}

#[tokio::test]
async fn test_state_stream_publishes_manager_transitions() {
    let harness = support::harness_with(|_| {});
    let registry = harness.rig.orchestrator.registry();
    let mut stream = registry.manager_state_stream();

    support::start(&harness).await;

    assert!(stream.has_changed().unwrap_or(false));
    assert_eq!(*stream.borrow_and_update(), ManagerState::Ready);
    harness.rig.orchestrator.close().await;
    assert_eq!(*stream.borrow_and_update(), ManagerState::Uninitialized);
}

/// Reports success without ever submitting a request.
struct SilentController {
    core: ControllerCore,
}

#[async_trait]
impl ControllerHooks for SilentController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn check_support(&self) -> bool {
        true
    }

    fn check_enabled(&self) -> bool {
        true
    }

    async fn on_initialize(&self) -> Result<(), CameraError> {
        Ok(())
    }

    async fn on_reset(&self) -> Result<(), CameraError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_initialize_without_accepted_write_ends_in_error() {
    reset_checks();
    let harness = support::ready_harness().await;
    let context = harness.rig.orchestrator.registry().context();
    let silent = SilentController {
        core: ControllerCore::new(ControllerKind::Zoom, context),
    };

    let result = silent.initialize().await;

    assert!(matches!(result, Err(CameraError::ControlError(_))), "{:?}", result);
    assert!(matches!(silent.state(), ControllerState::Error(_)));
    let record = check_record("Controller reaches Ready only after an accepted hardware write")
        .expect("checked");
    assert_eq!(record.violated, 1);
    harness.rig.orchestrator.close().await;
}
