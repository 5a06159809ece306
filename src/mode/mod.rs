//! Capture-mode pipelines
//!
//! A [`ModeHandler`] owns one capture mode's output wiring and its
//! capture/record behavior. Handlers never open devices or build sessions
//! themselves: they declare the outputs they need and negotiate the session
//! through the [`SessionHost`] they were attached to.
//!
//! ```text
//! Detached -> Attached -> PreviewActive -> Capturing | Recording -> PreviewActive
//!                                        -> Detached (mode switch / close)
//! ```

mod night;
mod photo;
mod video;

pub use night::NightModeHandler;
pub use photo::{choose_best_size, PhotoCaptureMode, PhotoModeHandler};
pub use video::VideoModeHandler;

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::capability::CaptureMode;
use crate::config::CoreConfig;
use crate::errors::CameraError;
use crate::hardware::{
    CameraDescriptor, CameraDevice, CaptureSession, MediaRecorder, OrientationSource,
    OutputTarget, PreviewTarget,
};
use crate::request::{RepeatingBase, RequestComposer};
use crate::storage::{MediaLocator, MediaStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerState {
    Detached,
    Attached,
    PreviewActive,
    Capturing,
    Recording,
}

/// The orchestrator side of session negotiation, as seen by a handler.
#[async_trait]
pub trait SessionHost: Send + Sync {
    fn device(&self) -> Option<Arc<dyn CameraDevice>>;

    fn session(&self) -> Option<Arc<dyn CaptureSession>>;

    fn descriptor(&self) -> Option<Arc<CameraDescriptor>>;

    fn composer(&self) -> RequestComposer;

    /// Close the current session (if any) and negotiate one covering `outputs`.
    async fn configure_session(
        &self,
        outputs: Vec<OutputTarget>,
    ) -> Result<Arc<dyn CaptureSession>, CameraError>;

    /// The handler installed its standing request; controllers may start.
    async fn report_session_configured(&self, session: Arc<dyn CaptureSession>);
}

#[async_trait]
pub trait ModeHandler: Send + Sync {
    fn mode(&self) -> CaptureMode;

    fn state(&self) -> HandlerState;

    fn state_stream(&self) -> watch::Receiver<HandlerState>;

    /// Bind to the host's device. Safe to call again after a detach.
    async fn on_attach(&self, host: Arc<dyn SessionHost>) -> Result<(), CameraError>;

    /// Stop mode work and free mode resources. Idempotent.
    async fn on_detach(&self);

    /// Every output the mode needs, preview included.
    async fn required_outputs(
        &self,
        preview: &PreviewTarget,
    ) -> Result<Vec<OutputTarget>, CameraError>;

    /// Install the mode's standing request on a freshly configured session.
    async fn on_session_configured(
        &self,
        session: Arc<dyn CaptureSession>,
    ) -> Result<(), CameraError>;

    async fn start_preview(&self, preview: PreviewTarget) -> Result<(), CameraError>;

    /// `Ok(None)` when the mode does not capture stills or rejected the call.
    async fn capture(&self) -> Result<Option<MediaLocator>, CameraError> {
        Ok(None)
    }

    async fn start_recording(&self) -> Result<Option<MediaLocator>, CameraError> {
        Ok(None)
    }

    async fn stop_recording(&self) -> Result<Option<MediaLocator>, CameraError> {
        Ok(None)
    }

    fn supports_capture(&self) -> bool;

    fn supports_recording(&self) -> bool {
        false
    }

    /// The orchestrator's selected mode changed (sent to the outgoing and the
    /// incoming handler before the swap happens).
    fn set_camera_mode(&self, _mode: CaptureMode) {}

    async fn close(&self);
}

/// One exposure of a bracket sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketFrame {
    pub compensation: i32,
    pub data: Bytes,
}

/// Merges a bracket sequence into one output image.
pub trait FrameFusion: Send + Sync {
    fn fuse(&self, frames: &[BracketFrame]) -> Option<Bytes>;
}

/// Forwards the normally exposed frame (compensation 0), else the first.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceFrame;

impl FrameFusion for ReferenceFrame {
    fn fuse(&self, frames: &[BracketFrame]) -> Option<Bytes> {
        frames
            .iter()
            .find(|frame| frame.compensation == 0)
            .or_else(|| frames.first())
            .map(|frame| frame.data.clone())
    }
}

/// Collaborators and policy shared by the built-in handlers.
#[derive(Clone)]
pub struct HandlerContext {
    pub config: Arc<CoreConfig>,
    pub store: Arc<dyn MediaStore>,
    pub orientation: Arc<dyn OrientationSource>,
    pub recorder: Arc<dyn MediaRecorder>,
    pub fusion: Arc<dyn FrameFusion>,
}

/// State publication and host binding shared by the built-in handlers.
pub struct HandlerCore {
    mode: CaptureMode,
    state: watch::Sender<HandlerState>,
    host: RwLock<Option<Arc<dyn SessionHost>>>,
    preview: Mutex<Option<PreviewTarget>>,
}

impl HandlerCore {
    pub fn new(mode: CaptureMode) -> Self {
        Self {
            mode,
            state: watch::channel(HandlerState::Detached).0,
            host: RwLock::new(None),
            preview: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn state(&self) -> HandlerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HandlerState> {
        self.state.subscribe()
    }

    pub fn set_state(&self, state: HandlerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("{:?} handler: {:?} -> {:?}", self.mode, previous, state);
        }
    }

    pub fn attach(&self, host: Arc<dyn SessionHost>) {
        *self.host.write().unwrap_or_else(PoisonError::into_inner) = Some(host);
        self.set_state(HandlerState::Attached);
    }

    pub fn detach(&self) {
        self.host.write().unwrap_or_else(PoisonError::into_inner).take();
        self.preview
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.set_state(HandlerState::Detached);
    }

    pub fn is_attached(&self) -> bool {
        self.host
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn host(&self) -> Result<Arc<dyn SessionHost>, CameraError> {
        self.host
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                CameraError::ResourceUnavailable(format!("{:?} handler is not attached", self.mode))
            })
    }

    pub fn descriptor(&self) -> Result<Arc<CameraDescriptor>, CameraError> {
        self.host()?
            .descriptor()
            .ok_or_else(|| CameraError::ResourceUnavailable("No camera descriptor".to_string()))
    }

    /// Session to submit against, read fresh for every operation.
    pub fn session(&self) -> Result<Arc<dyn CaptureSession>, CameraError> {
        self.host()?
            .session()
            .ok_or_else(|| CameraError::SessionError("No active capture session".to_string()))
    }

    pub fn preview_target(&self) -> Option<PreviewTarget> {
        *self.preview.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn remember_preview(&self, preview: PreviewTarget) {
        *self.preview.lock().unwrap_or_else(PoisonError::into_inner) = Some(preview);
    }

    /// Install `base` as the standing request and submit it.
    pub async fn install_repeating(
        &self,
        session: &Arc<dyn CaptureSession>,
        base: RepeatingBase,
    ) -> Result<(), CameraError> {
        let composer = self.host()?.composer();
        composer.install_base(base);
        let request = composer
            .repeating_request()
            .ok_or_else(|| CameraError::SessionError("Repeating base missing".to_string()))?;
        session.set_repeating_request(request).await.map_err(|e| {
            log::error!("{:?} handler: repeating request rejected: {}", self.mode, e);
            CameraError::SessionError(format!("Failed to start repeating request: {}", e))
        })?;
        self.set_state(HandlerState::PreviewActive);
        Ok(())
    }
}

/// Shared `start_preview` flow: outputs -> session -> standing request ->
/// controller initialization.
pub async fn run_preview<H>(
    handler: &H,
    core: &HandlerCore,
    preview: PreviewTarget,
) -> Result<(), CameraError>
where
    H: ModeHandler + ?Sized,
{
    let host = core.host()?;
    core.remember_preview(preview);

    let outputs = handler.required_outputs(&preview).await?;
    let session = host.configure_session(outputs).await?;
    handler.on_session_configured(session.clone()).await?;
    host.report_session_configured(session).await;
    Ok(())
}
