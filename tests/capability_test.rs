//! Camera discovery, role mapping and capability-gated controller routing

use std::sync::Arc;

use lenscore::controller::{FlashMode, FocusMode, HdrMode, WhiteBalanceMode};
use lenscore::hardware::{CameraDescriptor, LensFacing};
use lenscore::operation::ApplyReport;
use lenscore::testing::{back_main_descriptor, front_descriptor, SimulatedHardware};
use lenscore::{
    CameraSettings, CapabilityManager, CaptureMode, ControllerType, LogicalCameraId,
    ParameterController,
};

mod support;

fn unit(physical_id: &str, focal_length: f32) -> CameraDescriptor {
    let mut descriptor = back_main_descriptor();
    descriptor.physical_id = physical_id.to_string();
    descriptor.focal_lengths = vec![focal_length];
    descriptor
}

async fn discovered(descriptors: Vec<CameraDescriptor>) -> CapabilityManager {
    let hardware = SimulatedHardware::new(descriptors);
    let manager = CapabilityManager::new();
    manager.discover_cameras(&hardware).await.expect("discovery");
    manager
}

#[tokio::test]
async fn test_discovery_maps_units_to_roles() {
    let manager = discovered(vec![
        back_main_descriptor(),
        front_descriptor(),
        unit("2", 13.0),
        unit("3", 120.0),
    ])
    .await;

    let cameras = manager.available_cameras();
    assert_eq!(
        cameras.keys().copied().collect::<Vec<_>>(),
        vec![
            LogicalCameraId::Main,
            LogicalCameraId::Front,
            LogicalCameraId::UltraWide,
            LogicalCameraId::Telephoto,
        ]
    );
    assert_eq!(manager.physical_camera_id(LogicalCameraId::UltraWide).as_deref(), Some("2"));
    assert_eq!(manager.physical_camera_id(LogicalCameraId::Macro), None);

    let main = manager.capability(LogicalCameraId::Main).expect("main");
    assert_eq!(main.max_zoom, 4.0);
    assert!(main.has_flash && main.has_ois);
    assert!(main.supports(CaptureMode::Night));
    assert!(main.supports(CaptureMode::Pro));

    let front = manager.capability(LogicalCameraId::Front).expect("front");
    assert!(front.supports(CaptureMode::ArSticker));
    assert!(!front.supports(CaptureMode::Night));
    assert!(!front.has_flash);
}

#[tokio::test]
async fn test_first_unit_keeps_a_role() {
    let manager = discovered(vec![back_main_descriptor(), unit("5", 50.0)]).await;

    assert_eq!(manager.available_cameras().len(), 1);
    assert_eq!(manager.physical_camera_id(LogicalCameraId::Main).as_deref(), Some("0"));
}

#[tokio::test]
async fn test_mode_queries() {
    let manager = discovered(vec![back_main_descriptor(), front_descriptor(), unit("3", 120.0)]).await;

    assert_eq!(
        manager.cameras_for_mode(CaptureMode::Portrait),
        vec![LogicalCameraId::Main, LogicalCameraId::Front, LogicalCameraId::Telephoto]
    );
    assert_eq!(manager.cameras_for_mode(CaptureMode::Night), vec![LogicalCameraId::Main]);
    assert!(manager.is_mode_supported(LogicalCameraId::Telephoto, CaptureMode::SuperResolution));
    assert!(!manager.is_mode_supported(LogicalCameraId::Macro, CaptureMode::Photo));

    assert_eq!(manager.best_camera_for_mode(CaptureMode::Portrait), LogicalCameraId::Telephoto);
    assert_eq!(manager.best_camera_for_mode(CaptureMode::Telephoto), LogicalCameraId::Telephoto);
    // Missing roles fall back to the main unit.
    assert_eq!(manager.best_camera_for_mode(CaptureMode::UltraWide), LogicalCameraId::Main);
    assert_eq!(manager.best_camera_for_mode(CaptureMode::Video), LogicalCameraId::Main);

    assert_eq!(manager.camera_for_facing(LensFacing::Front), Some(LogicalCameraId::Front));
    assert_eq!(manager.camera_for_facing(LensFacing::Back), Some(LogicalCameraId::Main));
}

#[tokio::test]
async fn test_portrait_without_telephoto_uses_main() {
    let manager = discovered(vec![back_main_descriptor(), front_descriptor()]).await;
    assert_eq!(manager.best_camera_for_mode(CaptureMode::Portrait), LogicalCameraId::Main);
}

#[tokio::test]
async fn test_available_controllers_per_mode() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    let operations = core.operations();

    let photo = operations.get_available_controllers(LogicalCameraId::Main, CaptureMode::Photo);
    assert_eq!(
        photo.into_iter().collect::<Vec<_>>(),
        vec![
            ControllerType::Focus,
            ControllerType::Zoom,
            ControllerType::Exposure,
            ControllerType::Flash,
            ControllerType::Ois,
        ]
    );

    let pro = operations.get_available_controllers(LogicalCameraId::Main, CaptureMode::Pro);
    assert!(pro.contains(&ControllerType::Iso));
    assert!(pro.contains(&ControllerType::ShutterSpeed));
    assert!(pro.contains(&ControllerType::WhiteBalance));
    assert!(!pro.contains(&ControllerType::Hdr));

    let night = operations.get_available_controllers(LogicalCameraId::Main, CaptureMode::Night);
    assert!(night.contains(&ControllerType::Hdr));
    assert!(!night.contains(&ControllerType::Iso));

    // Video and scene detection only count once something is registered.
    let video = operations.get_available_controllers(LogicalCameraId::Main, CaptureMode::Video);
    assert!(!video.contains(&ControllerType::Video));
    assert!(operations.register_controller(ControllerType::Video, core.registry().exposure()));
    let video = operations.get_available_controllers(LogicalCameraId::Main, CaptureMode::Video);
    assert!(video.contains(&ControllerType::Video));
    operations.unregister_controller(ControllerType::Video);
    assert!(!operations.is_controller_available(ControllerType::Video));

    assert!(operations
        .get_available_controllers(LogicalCameraId::Macro, CaptureMode::Photo)
        .is_empty());
    assert_eq!(core.available_controllers(CaptureMode::Photo).len(), 5);
    core.close().await;
}

#[tokio::test]
async fn test_registry_backed_types_cannot_be_replaced() {
    let harness = support::ready_harness().await;
    let operations = harness.rig.orchestrator.operations();
    let exposure: Arc<dyn ParameterController> = harness.rig.orchestrator.registry().exposure();

    assert!(!operations.register_controller(ControllerType::Zoom, exposure.clone()));
    let zoom = operations.controller(ControllerType::Zoom).expect("zoom");
    assert_eq!(zoom.name(), "ZOOM");

    assert!(operations.register_controller(ControllerType::SceneDetection, exposure));
    let scene = operations
        .controller(ControllerType::SceneDetection)
        .expect("scene detection");
    assert_eq!(scene.name(), "EXPOSURE");
    harness.rig.orchestrator.close().await;
}

#[derive(Debug, PartialEq)]
struct Panorama {
    frames: u32,
}

#[tokio::test]
async fn test_custom_controllers_are_typed() {
    let harness = support::harness_with(|_| {});
    let operations = harness.rig.orchestrator.operations();

    operations.register_custom("panorama", Arc::new(Panorama { frames: 12 }));

    assert_eq!(
        operations.custom::<Panorama>("panorama").as_deref(),
        Some(&Panorama { frames: 12 })
    );
    assert!(operations.custom::<String>("panorama").is_none());
    assert!(operations.custom::<Panorama>("missing").is_none());
}

#[tokio::test]
async fn test_apply_settings_reports_each_field() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;

    let settings = CameraSettings {
        focus_mode: Some(FocusMode::Macro),
        zoom_ratio: Some(2.0),
        exposure_compensation: Some(99),
        flash_mode: Some(FlashMode::Auto),
        white_balance: Some(WhiteBalanceMode::WarmFluorescent),
        iso: Some(400),
        shutter_speed_ns: None,
        hdr_mode: Some(HdrMode::On),
    };
    let report = core.apply_camera_settings(&settings).await;

    assert_eq!(
        report,
        ApplyReport {
            applied: vec![
                "focus_mode".to_string(),
                "zoom_ratio".to_string(),
                "flash_mode".to_string(),
                "iso".to_string(),
                "hdr_mode".to_string(),
            ],
            failed: vec!["exposure_compensation".to_string(), "white_balance".to_string()],
        }
    );
    assert!(!report.is_complete());

    let current = core.current_settings();
    assert_eq!(current.focus_mode, Some(FocusMode::Macro));
    assert_eq!(current.zoom_ratio, Some(2.0));
    assert_eq!(current.exposure_compensation, Some(0));
    assert_eq!(current.flash_mode, Some(FlashMode::Auto));
    assert_eq!(current.white_balance, Some(WhiteBalanceMode::Auto));
    assert_eq!(current.iso, Some(400));
    assert_eq!(current.shutter_speed_ns, None);
    assert_eq!(current.hdr_mode, Some(HdrMode::On));
    core.close().await;
}
