//! Photo, night and video pipelines end to end on simulated hardware

use std::time::Duration;

use lenscore::hardware::OutputKind;
use lenscore::mode::PhotoCaptureMode;
use lenscore::request::{AeMode, CaptureTemplate};
use lenscore::testing::frame_tag;
use lenscore::{CameraError, CaptureMode, HandlerState, MediaLocator, ModeHandler};

mod support;

fn store_key(locator: &MediaLocator) -> &str {
    match locator {
        MediaLocator::Store(key) => key,
        MediaLocator::File(path) => panic!("expected a store locator, got {}", path.display()),
    }
}

fn files_in(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn test_single_photo_goes_to_store() {
    let (harness, _photo) = support::photo_harness_with(|_| {}).await;
    let core = &harness.rig.orchestrator;

    let locator = core.capture().await.expect("capture").expect("locator");
    assert!(store_key(&locator).starts_with("memory://IMG/"));

    let request = harness.rig.hardware.captures().pop().expect("still request");
    assert_eq!(request.template, CaptureTemplate::StillCapture);
    assert_eq!(request.targets.len(), 1);
    assert_eq!(request.settings.jpeg_quality, Some(95));
    assert_eq!(request.settings.jpeg_orientation, Some(90));

    let bytes = harness.rig.store.get(&locator).expect("stored bytes");
    assert_eq!(frame_tag(&bytes).map(|(_, ev)| ev), Some(0));
    core.close().await;
}

#[tokio::test]
async fn test_still_request_carries_controller_values() {
    let (harness, _photo) = support::photo_harness_with(|_| {}).await;
    let core = &harness.rig.orchestrator;
    assert!(core.set_zoom(2.0).await);
    assert!(core.set_exposure_compensation(3).await);

    core.capture().await.expect("capture");

    let request = harness.rig.hardware.captures().pop().expect("still request");
    assert_eq!(request.settings.ae_compensation, Some(3));
    assert!(request.settings.crop_region.is_some());
    core.close().await;
}

#[tokio::test]
async fn test_burst_returns_first_and_remembers_all() {
    let (harness, photo) = support::photo_harness_with(|_| {}).await;
    let core = &harness.rig.orchestrator;
    photo.set_capture_mode(PhotoCaptureMode::Burst);
    assert!(!photo.set_burst_count(0));
    assert!(!photo.set_burst_count(21));
    assert!(photo.set_burst_count(3));
    let before = harness.rig.hardware.captures().len();

    let first = core.capture().await.expect("burst").expect("locator");

    let burst = photo.last_burst();
    assert_eq!(burst.len(), 3);
    assert_eq!(burst[0], first);
    for (index, locator) in burst.iter().enumerate() {
        let prefix = format!("memory://BURST_{}/", index + 1);
        assert!(store_key(locator).starts_with(&prefix), "{}", locator);
    }
    assert_eq!(harness.rig.hardware.captures().len(), before + 3);
    assert_eq!(photo.state(), HandlerState::PreviewActive);
    core.close().await;
}

#[tokio::test]
async fn test_hdr_brackets_and_fuses() {
    let (harness, photo) = support::photo_harness_with(|_| {}).await;
    let core = &harness.rig.orchestrator;
    photo.set_capture_mode(PhotoCaptureMode::Hdr);
    let before = harness.rig.hardware.captures().len();

    let locator = core.capture().await.expect("hdr").expect("locator");
    assert!(store_key(&locator).starts_with("memory://HDR/"));

    let compensations: Vec<Option<i32>> = harness.rig.hardware.captures()[before..]
        .iter()
        .map(|request| request.settings.ae_compensation)
        .collect();
    assert_eq!(compensations, vec![Some(-2), Some(0), Some(2)]);

    // The reference fusion keeps the normally exposed frame.
    let bytes = harness.rig.store.get(&locator).expect("stored bytes");
    assert_eq!(frame_tag(&bytes).map(|(_, ev)| ev), Some(0));
    core.close().await;
}

#[tokio::test]
async fn test_raw_writes_dng_next_to_jpeg() {
    let (harness, photo) = support::photo_harness_with(|config| {
        config.photo.raw_enabled = true;
    })
    .await;
    let core = &harness.rig.orchestrator;
    photo.set_capture_mode(PhotoCaptureMode::Raw);

    let session = harness.rig.hardware.log().sessions.pop().expect("session");
    assert!(session.1.iter().any(|output| output.kind == OutputKind::Raw));

    let locator = core.capture().await.expect("raw").expect("locator");
    assert!(store_key(&locator).starts_with("memory://IMG/"));

    let request = harness.rig.hardware.captures().pop().expect("raw request");
    assert_eq!(request.targets.len(), 2);

    let files = files_in(&harness.dir.path().join("captures"));
    assert_eq!(files.len(), 1, "{:?}", files);
    assert!(files[0].starts_with("RAW_") && files[0].ends_with(".dng"));
    core.close().await;
}

#[tokio::test]
async fn test_raw_without_raw_stream_captures_jpeg_only() {
    let (harness, photo) = support::photo_harness_with(|_| {}).await;
    let core = &harness.rig.orchestrator;
    photo.set_capture_mode(PhotoCaptureMode::Raw);

    let locator = core.capture().await.expect("capture").expect("locator");
    assert!(store_key(&locator).starts_with("memory://IMG/"));
    assert!(files_in(&harness.dir.path().join("captures")).is_empty());
    core.close().await;
}

#[tokio::test]
async fn test_declining_store_falls_back_to_file() {
    let (harness, _photo) = support::photo_harness_with(|_| {}).await;
    let core = &harness.rig.orchestrator;
    harness.rig.store.set_declining(true);

    let locator = core.capture().await.expect("capture").expect("locator");
    let path = locator.as_path().expect("file locator").to_path_buf();
    assert!(path.starts_with(harness.dir.path().join("captures")));
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
    assert!(name.starts_with("IMG_") && name.ends_with(".jpg"), "{}", name);
    assert!(frame_tag(&std::fs::read(&path).expect("fallback file")).is_some());
    assert!(harness.rig.store.is_empty());
    core.close().await;
}

#[tokio::test]
async fn test_photo_night_sub_mode_forces_manual_exposure() {
    let (harness, photo) = support::photo_harness_with(|_| {}).await;
    let core = &harness.rig.orchestrator;
    photo.set_capture_mode(PhotoCaptureMode::Night);

    let locator = core.capture().await.expect("capture").expect("locator");
    assert!(store_key(&locator).starts_with("memory://NIGHT/"));

    let request = harness.rig.hardware.captures().pop().expect("night request");
    assert_eq!(request.settings.ae_mode, Some(AeMode::Off));
    assert_eq!(request.settings.sensitivity, Some(1600));
    assert_eq!(request.settings.exposure_time_ns, Some(100_000_000));
    core.close().await;
}

#[tokio::test]
async fn test_capture_failure_is_reported() {
    let (harness, photo) = support::photo_harness_with(|_| {}).await;
    let core = &harness.rig.orchestrator;
    harness.rig.hardware.fail_next_captures(1);

    match core.capture().await {
        Err(CameraError::CaptureError(msg)) => assert!(msg.contains("Still capture failed")),
        other => panic!("expected capture error, got {:?}", other),
    }
    assert_eq!(photo.state(), HandlerState::PreviewActive);
    assert!(core.capture().await.expect("retry").is_some());
    core.close().await;
}

#[tokio::test]
async fn test_night_bracket_sequence() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    support::switch_mode(&harness, CaptureMode::Night).await;
    let before = harness.rig.hardware.captures().len();

    let locator = core.capture().await.expect("night").expect("locator");
    assert!(store_key(&locator).starts_with("memory://NIGHT/"));

    let captures = harness.rig.hardware.captures();
    let frames = &captures[before..];
    let compensations: Vec<Option<i32>> =
        frames.iter().map(|r| r.settings.ae_compensation).collect();
    assert_eq!(compensations, vec![Some(-2), Some(-1), Some(0), Some(1), Some(2)]);
    for frame in frames {
        assert_eq!(frame.settings.ae_mode, Some(AeMode::Off));
        assert_eq!(frame.settings.sensitivity, Some(1600));
    }
    core.close().await;
}

#[tokio::test]
async fn test_concurrent_night_capture_is_rejected() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    support::switch_mode(&harness, CaptureMode::Night).await;
    harness.rig.hardware.set_capture_delay(Duration::from_millis(10));

    let (first, second) = tokio::join!(core.capture(), core.capture());
    let first = first.expect("first capture");
    let second = second.expect("second capture");

    assert_eq!(
        [first.is_some(), second.is_some()].iter().filter(|ok| **ok).count(),
        1
    );
    assert_eq!(harness.rig.store.len(), 1);
    core.close().await;
}

#[tokio::test]
async fn test_night_frame_failure_aborts_sequence() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    support::switch_mode(&harness, CaptureMode::Night).await;
    harness.rig.hardware.fail_next_captures(1);

    match core.capture().await {
        Err(CameraError::CaptureError(msg)) => assert!(msg.contains("Night frame 1 failed"), "{}", msg),
        other => panic!("expected night frame failure, got {:?}", other),
    }
    assert!(harness.rig.store.is_empty());

    // The in-flight flag was cleared.
    assert!(core.capture().await.expect("retry").is_some());
    core.close().await;
}

#[tokio::test]
async fn test_video_record_cycle() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    support::switch_mode(&harness, CaptureMode::Video).await;

    let standing = harness.rig.hardware.last_repeating().expect("record request");
    assert_eq!(standing.template, CaptureTemplate::Record);
    assert_eq!(standing.targets.len(), 2);
    let sessions_before = harness.rig.hardware.log().sessions.len();

    let started = core.start_recording().await.expect("start").expect("file");
    assert!(core.is_recording().await);
    assert_eq!(core.start_recording().await.expect("second start"), None);
    assert_eq!(core.capture().await.expect("capture in video"), None);

    let stopped = core.stop_recording().await.expect("stop").expect("file");
    assert_eq!(stopped, started);
    assert!(!core.is_recording().await);
    assert_eq!(core.stop_recording().await.expect("second stop"), None);

    let path = stopped.as_path().expect("file path");
    assert!(path.starts_with(harness.dir.path().join("video")));
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    assert!(name.starts_with("VID_") && name.ends_with(".mp4"), "{}", name);
    assert_eq!(
        std::fs::read(path).expect("video file"),
        b"\x00\x00\x00\x18ftypmp42synthetic".to_vec()
    );

    // Preview resumed on a new session around a fresh pipeline.
    assert_eq!(core.await_controllers().await, lenscore::ManagerState::Ready);
    assert_eq!(harness.rig.hardware.log().sessions.len(), sessions_before + 1);
    assert_eq!(harness.rig.hardware.open_sessions(), 1);
    assert_eq!(harness.rig.recorder.prepared_count(), 2);
    assert_eq!(harness.rig.recorder.started_count(), 1);
    core.close().await;
}

#[tokio::test]
async fn test_concurrent_start_recording_starts_once() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    support::switch_mode(&harness, CaptureMode::Video).await;
    let video = core.mode_handler(CaptureMode::Video).expect("video handler");

    let (first, second) = tokio::join!(video.start_recording(), video.start_recording());

    let started: Vec<_> = [first.expect("first start"), second.expect("second start")]
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(started.len(), 1);
    assert_eq!(harness.rig.recorder.started_count(), 1);
    assert_eq!(video.state(), HandlerState::Recording);
    assert_eq!(core.stop_recording().await.expect("stop"), started.into_iter().next());
    core.close().await;
}

#[tokio::test]
async fn test_unused_video_file_is_removed_on_detach() {
    let harness = support::ready_harness().await;
    let video_dir = harness.dir.path().join("video");

    support::switch_mode(&harness, CaptureMode::Video).await;
    let prepared = files_in(&video_dir);
    assert_eq!(prepared.len(), 1);
    assert!(prepared[0].starts_with("VID_") && prepared[0].ends_with(".mp4"), "{:?}", prepared);

    support::switch_mode(&harness, CaptureMode::Photo).await;
    assert!(files_in(&video_dir).is_empty());
    harness.rig.orchestrator.close().await;
}

#[tokio::test]
async fn test_second_recording_gets_a_new_file() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    support::switch_mode(&harness, CaptureMode::Video).await;

    let first = core.start_recording().await.expect("start").expect("file");
    core.stop_recording().await.expect("stop");
    let second = core.start_recording().await.expect("start again").expect("file");
    core.stop_recording().await.expect("stop again");

    assert_ne!(first, second);
    assert!(first.as_path().map(|p| p.exists()).unwrap_or(false));
    assert!(second.as_path().map(|p| p.exists()).unwrap_or(false));
    core.close().await;
}

#[tokio::test]
async fn test_recorder_failure_blocks_video_mode() {
    let harness = support::ready_harness().await;
    let core = &harness.rig.orchestrator;
    harness.rig.recorder.fail_prepare(true);

    let result = core.set_camera_mode(CaptureMode::Video).await.expect("switch task");
    assert!(matches!(result, Err(CameraError::RecordingError(_))), "{:?}", result);
    assert!(files_in(&harness.dir.path().join("video")).is_empty());
    core.close().await;
}
