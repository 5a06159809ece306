//! Shared setup for the integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lenscore::hardware::{CameraDescriptor, CaptureSession, OutputTarget, PreviewTarget, Size};
use lenscore::mode::{HandlerContext, HandlerState, PhotoModeHandler, SessionHost, VideoModeHandler};
use lenscore::testing::{test_config, FixedOrientation, TestRig};
use lenscore::{
    CameraError, CaptureMode, CoreConfig, ManagerState, MediaLocator, ModeHandler, ReferenceFrame,
};
use tempfile::TempDir;
use tokio::sync::watch;

pub const PREVIEW: Size = Size::new(1440, 1080);

/// A rig plus the temp directory its storage lives in.
pub struct Harness {
    pub rig: TestRig,
    pub dir: TempDir,
    pub preview: PreviewTarget,
}

pub fn config_in(dir: &TempDir) -> CoreConfig {
    test_config(dir.path())
}

/// Build without initializing.
pub fn harness_with(config: impl FnOnce(&mut CoreConfig)) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let mut cfg = config_in(&dir);
    config(&mut cfg);
    let rig = TestRig::new(cfg).expect("rig");
    Harness {
        rig,
        dir,
        preview: PreviewTarget::new(PREVIEW),
    }
}

pub fn harness_with_descriptors(descriptors: Vec<CameraDescriptor>) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let rig = TestRig::with_descriptors(descriptors, config_in(&dir)).expect("rig");
    Harness {
        rig,
        dir,
        preview: PreviewTarget::new(PREVIEW),
    }
}

/// Open the back main unit, start preview and wait for the controllers.
pub async fn ready_harness() -> Harness {
    ready_harness_with(|_| {}).await
}

pub async fn ready_harness_with(config: impl FnOnce(&mut CoreConfig)) -> Harness {
    let harness = harness_with(config);
    start(&harness).await;
    harness
}

pub async fn start(harness: &Harness) {
    let core = &harness.rig.orchestrator;
    core.initialize().await.expect("initialize");
    core.start_preview(harness.preview).await.expect("preview");
    let state = core.await_controllers().await;
    assert_eq!(state, ManagerState::Ready, "controllers: {:?}", core.controller_states());
}

pub fn handler_context(harness: &Harness) -> HandlerContext {
    let core = &harness.rig.orchestrator;
    HandlerContext {
        config: Arc::new(core.config().clone()),
        store: harness.rig.store.clone(),
        orientation: Arc::new(FixedOrientation::degrees(0)),
        recorder: Arc::new(harness.rig.recorder.clone()),
        fusion: Arc::new(ReferenceFrame),
    }
}

/// Replace the built-in photo handler with one the test keeps a handle on.
/// Call before `start`.
pub fn register_photo(harness: &Harness) -> Arc<PhotoModeHandler> {
    let handler = Arc::new(PhotoModeHandler::new(handler_context(harness)));
    harness
        .rig
        .orchestrator
        .register_mode_handler(CaptureMode::Photo, handler.clone());
    handler
}

/// Life-cycle calls seen by journaled handlers, in order.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().expect("journal").clone()
}

/// Forwards to a real handler and notes attach, preview and detach.
pub struct JournaledHandler {
    name: &'static str,
    inner: Arc<dyn ModeHandler>,
    journal: Journal,
    host: Mutex<Option<Arc<dyn SessionHost>>>,
}

impl JournaledHandler {
    pub fn new(name: &'static str, inner: Arc<dyn ModeHandler>, journal: Journal) -> Self {
        Self {
            name,
            inner,
            journal,
            host: Mutex::new(None),
        }
    }

    /// The host handed over on the last attach.
    pub fn host(&self) -> Option<Arc<dyn SessionHost>> {
        self.host.lock().expect("host").clone()
    }

    fn note(&self, event: &str) {
        self.journal
            .lock()
            .expect("journal")
            .push(format!("{} {}", self.name, event));
    }
}

#[async_trait]
impl ModeHandler for JournaledHandler {
    fn mode(&self) -> CaptureMode {
        self.inner.mode()
    }

    fn state(&self) -> HandlerState {
        self.inner.state()
    }

    fn state_stream(&self) -> watch::Receiver<HandlerState> {
        self.inner.state_stream()
    }

    async fn on_attach(&self, host: Arc<dyn SessionHost>) -> Result<(), CameraError> {
        self.note("attach");
        *self.host.lock().expect("host") = Some(host.clone());
        self.inner.on_attach(host).await
    }

    async fn on_detach(&self) {
        self.note("detach");
        self.inner.on_detach().await
    }

    async fn required_outputs(
        &self,
        preview: &PreviewTarget,
    ) -> Result<Vec<OutputTarget>, CameraError> {
        self.inner.required_outputs(preview).await
    }

    async fn on_session_configured(
        &self,
        session: Arc<dyn CaptureSession>,
    ) -> Result<(), CameraError> {
        self.inner.on_session_configured(session).await
    }

    async fn start_preview(&self, preview: PreviewTarget) -> Result<(), CameraError> {
        self.note("preview");
        self.inner.start_preview(preview).await
    }

    async fn capture(&self) -> Result<Option<MediaLocator>, CameraError> {
        self.inner.capture().await
    }

    async fn start_recording(&self) -> Result<Option<MediaLocator>, CameraError> {
        self.inner.start_recording().await
    }

    async fn stop_recording(&self) -> Result<Option<MediaLocator>, CameraError> {
        self.inner.stop_recording().await
    }

    fn supports_capture(&self) -> bool {
        self.inner.supports_capture()
    }

    fn supports_recording(&self) -> bool {
        self.inner.supports_recording()
    }

    fn set_camera_mode(&self, mode: CaptureMode) {
        self.inner.set_camera_mode(mode)
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// Journaled photo and video handlers sharing one journal. Call before `start`.
pub fn register_journaled(
    harness: &Harness,
) -> (Journal, Arc<JournaledHandler>, Arc<JournaledHandler>) {
    let core = &harness.rig.orchestrator;
    let journal = Journal::default();
    let photo = Arc::new(JournaledHandler::new(
        "photo",
        Arc::new(PhotoModeHandler::new(handler_context(harness))),
        journal.clone(),
    ));
    let video = Arc::new(JournaledHandler::new(
        "video",
        Arc::new(VideoModeHandler::new(handler_context(harness))),
        journal.clone(),
    ));
    core.register_mode_handler(CaptureMode::Photo, photo.clone());
    core.register_mode_handler(CaptureMode::Video, video.clone());
    (journal, photo, video)
}

pub async fn photo_harness_with(
    config: impl FnOnce(&mut CoreConfig),
) -> (Harness, Arc<PhotoModeHandler>) {
    let harness = harness_with(config);
    let photo = register_photo(&harness);
    start(&harness).await;
    (harness, photo)
}

/// Switch modes and wait for the new handler's controllers.
pub async fn switch_mode(harness: &Harness, mode: CaptureMode) {
    let core = &harness.rig.orchestrator;
    core.set_camera_mode(mode)
        .await
        .expect("switch task")
        .expect("switch mode");
    assert_eq!(core.await_controllers().await, ManagerState::Ready);
}
