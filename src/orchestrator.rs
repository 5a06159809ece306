//! Device and session lifecycle
//!
//! [`DeviceOrchestrator`] is the only component that opens or closes the
//! device and (re)configures sessions. Mode handlers reach it through the
//! [`SessionHost`] interface; controllers only ever see the session slot.
//!
//! Two scoped locks bound the hazards: the initialization lock (concurrent
//! `initialize` calls collapse into one attempt, teardown waits for it) and
//! the per-session controller lock (controller initialization runs once per
//! configured session).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use crate::capability::{CameraCapability, CapabilityManager, CaptureMode, LogicalCameraId};
use crate::check_invariant;
use crate::config::CoreConfig;
use crate::controller::{
    ControllerRegistry, ControllerState, DeviceContext, FocusMode, HdrMode, ManagerState,
    ModeController, RangedController, WhiteBalanceMode,
};
use crate::errors::CameraError;
use crate::hardware::{
    CameraBackend, CameraDescriptor, CameraDevice, CameraProvider, CaptureSession, HandleSlot,
    LensFacing, MediaRecorder, OrientationSource, OutputTarget, PreviewTarget, SessionId,
};
use crate::mode::{
    FrameFusion, HandlerContext, HandlerState, ModeHandler, NightModeHandler, PhotoModeHandler,
    ReferenceFrame, SessionHost, VideoModeHandler,
};
use crate::operation::{ApplyReport, CameraSettings, ControllerType, OperationManager};
use crate::request::RequestComposer;
use crate::storage::{MediaLocator, MediaStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    Idle,
    Opening,
    Ready,
    Error(String),
    Closed,
}

/// Collects the external collaborators and builds a [`DeviceOrchestrator`]
/// with the photo, video and night handlers registered.
pub struct OrchestratorBuilder {
    config: CoreConfig,
    provider: Arc<dyn CameraProvider>,
    backend: Arc<dyn CameraBackend>,
    store: Arc<dyn MediaStore>,
    orientation: Arc<dyn OrientationSource>,
    recorder: Arc<dyn MediaRecorder>,
    fusion: Arc<dyn FrameFusion>,
}

impl OrchestratorBuilder {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        backend: Arc<dyn CameraBackend>,
        store: Arc<dyn MediaStore>,
        orientation: Arc<dyn OrientationSource>,
        recorder: Arc<dyn MediaRecorder>,
    ) -> Self {
        Self {
            config: CoreConfig::default(),
            provider,
            backend,
            store,
            orientation,
            recorder,
            fusion: Arc::new(ReferenceFrame),
        }
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fusion(mut self, fusion: Arc<dyn FrameFusion>) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn build(self) -> Result<DeviceOrchestrator, CameraError> {
        self.config.validate().map_err(CameraError::ConfigError)?;
        let config = Arc::new(self.config);

        let handler_context = HandlerContext {
            config: config.clone(),
            store: self.store,
            orientation: self.orientation,
            recorder: self.recorder,
            fusion: self.fusion,
        };
        let mut handlers: HashMap<CaptureMode, Arc<dyn ModeHandler>> = HashMap::new();
        handlers.insert(
            CaptureMode::Photo,
            Arc::new(PhotoModeHandler::new(handler_context.clone())),
        );
        handlers.insert(
            CaptureMode::Video,
            Arc::new(VideoModeHandler::new(handler_context.clone())),
        );
        handlers.insert(
            CaptureMode::Night,
            Arc::new(NightModeHandler::new(handler_context)),
        );

        let composer = RequestComposer::new();
        let session: HandleSlot<dyn CaptureSession> = HandleSlot::new();
        let placeholder = DeviceContext::new(
            Arc::new(CameraDescriptor::new("", config.camera.default_facing)),
            session.clone(),
            composer.clone(),
            config.controls.clone(),
        );
        let capabilities = Arc::new(CapabilityManager::new());
        let registry = Arc::new(ControllerRegistry::new(placeholder));
        let operations = Arc::new(OperationManager::new(registry.clone(), capabilities.clone()));

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            mode: RwLock::new(config.camera.default_mode),
            config,
            provider: self.provider,
            backend: self.backend,
            capabilities,
            registry,
            operations,
            composer,
            device: HandleSlot::new(),
            session,
            descriptor: RwLock::new(None),
            logical: RwLock::new(None),
            state: watch::channel(OrchestratorState::Idle).0,
            handlers: RwLock::new(handlers),
            attached: tokio::sync::Mutex::new(None),
            preview: Mutex::new(None),
            init_lock: tokio::sync::Mutex::new(()),
            session_lock: tokio::sync::Mutex::new(()),
            controller_session: tokio::sync::Mutex::new(None),
            controller_init: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            this: weak.clone(),
        });
        Ok(DeviceOrchestrator { inner })
    }
}

struct Inner {
    config: Arc<CoreConfig>,
    provider: Arc<dyn CameraProvider>,
    backend: Arc<dyn CameraBackend>,
    capabilities: Arc<CapabilityManager>,
    registry: Arc<ControllerRegistry>,
    operations: Arc<OperationManager>,
    composer: RequestComposer,
    device: HandleSlot<dyn CameraDevice>,
    session: HandleSlot<dyn CaptureSession>,
    descriptor: RwLock<Option<Arc<CameraDescriptor>>>,
    logical: RwLock<Option<LogicalCameraId>>,
    mode: RwLock<CaptureMode>,
    state: watch::Sender<OrchestratorState>,
    handlers: RwLock<HashMap<CaptureMode, Arc<dyn ModeHandler>>>,
    attached: tokio::sync::Mutex<Option<Arc<dyn ModeHandler>>>,
    preview: Mutex<Option<PreviewTarget>>,
    init_lock: tokio::sync::Mutex<()>,
    session_lock: tokio::sync::Mutex<()>,
    controller_session: tokio::sync::Mutex<Option<SessionId>>,
    controller_init: Mutex<Option<JoinHandle<ManagerState>>>,
    tasks: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
    this: Weak<Inner>,
}

impl Inner {
    fn set_state(&self, state: OrchestratorState) {
        log::debug!("Orchestrator -> {:?}", state);
        self.state.send_replace(state);
    }

    fn mode(&self) -> CaptureMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn preview(&self) -> Option<PreviewTarget> {
        *self.preview.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn host(&self) -> Arc<dyn SessionHost> {
        Arc::new(HostLink {
            inner: self.this.clone(),
        })
    }

    fn track(&self, handle: AbortHandle) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Exact registration first, then the photo or video handler for the
    /// mode's family.
    fn handler_for(&self, mode: CaptureMode) -> Option<Arc<dyn ModeHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = handlers.get(&mode) {
            return Some(handler.clone());
        }
        let family = if mode.is_video_family() {
            CaptureMode::Video
        } else {
            CaptureMode::Photo
        };
        handlers.get(&family).cloned()
    }

    async fn attached_handler(&self) -> Result<Arc<dyn ModeHandler>, CameraError> {
        self.attached
            .lock()
            .await
            .clone()
            .ok_or_else(|| CameraError::ResourceUnavailable("Camera not initialized".to_string()))
    }

    async fn open_with_retry(&self, physical_id: &str) -> Result<Arc<dyn CameraDevice>, CameraError> {
        let camera = &self.config.camera;
        let attempts = camera.reconnect_attempts.max(1);
        let mut delay_ms = camera.reconnect_delay_ms as f64;
        let mut attempt = 1;

        loop {
            match self.backend.open(physical_id).await {
                Ok(device) => {
                    log::info!("Opened camera {} (attempt {})", physical_id, attempt);
                    return Ok(device);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    log::warn!(
                        "Opening camera {} failed (attempt {}/{}): {}; retrying in {:.0}ms",
                        physical_id,
                        attempt,
                        attempts,
                        e,
                        delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
                    delay_ms *= camera.backoff_multiplier;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("Failed to open camera {}: {}", physical_id, e);
                    return Err(e.into());
                }
            }
        }
    }

    async fn initialize(&self) -> Result<(), CameraError> {
        let Ok(_init) = self.init_lock.try_lock() else {
            log::debug!("Initialization already in progress");
            return Ok(());
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(CameraError::Closed);
        }
        if self.device.is_set() {
            log::debug!("Camera already open");
            return Ok(());
        }

        self.set_state(OrchestratorState::Opening);
        match self.open_device().await {
            Ok(()) => {
                self.set_state(OrchestratorState::Ready);
                Ok(())
            }
            Err(e) => {
                log::error!("Camera initialization failed: {}", e);
                self.set_state(OrchestratorState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn open_device(&self) -> Result<(), CameraError> {
        if !self.capabilities.is_discovered() {
            let count = self.capabilities.discover_cameras(self.provider.as_ref()).await?;
            log::info!("Discovered {} camera(s)", count);
        }

        let mode = self.mode();
        let selected = *self.logical.read().unwrap_or_else(PoisonError::into_inner);
        let logical = selected
            .or_else(|| {
                self.capabilities
                    .camera_for_facing(self.config.camera.default_facing)
            })
            .unwrap_or_else(|| self.capabilities.best_camera_for_mode(mode));
        let physical_id = self.capabilities.physical_camera_id(logical).ok_or_else(|| {
            CameraError::InitializationError(format!("No camera for {:?}", logical))
        })?;

        let device = self.open_with_retry(&physical_id).await?;
        let descriptor = match self.provider.describe(&physical_id).await {
            Ok(descriptor) => Arc::new(descriptor),
            Err(e) => {
                device.close().await;
                return Err(e.into());
            }
        };

        *self.logical.write().unwrap_or_else(PoisonError::into_inner) = Some(logical);
        *self.descriptor.write().unwrap_or_else(PoisonError::into_inner) = Some(descriptor.clone());
        self.device.replace(device);

        self.composer.clear_base();
        self.composer.reset_controls();
        self.registry.bind(DeviceContext::new(
            descriptor,
            self.session.clone(),
            self.composer.clone(),
            self.config.controls.clone(),
        ));

        let handler = self
            .handler_for(mode)
            .ok_or_else(|| CameraError::UnsupportedOperation(format!("No handler for {:?}", mode)))?;
        let mut attached = self.attached.lock().await;
        check_invariant!(
            attached.is_none(),
            "At most one mode handler is attached",
            "orchestrator::open_device"
        );
        handler.on_attach(self.host()).await?;
        *attached = Some(handler.clone());
        drop(attached);

        log::info!("Camera {:?} ready in {:?} mode", logical, mode);
        if let Some(preview) = self.preview() {
            handler.start_preview(preview).await?;
        }
        Ok(())
    }

    /// Release controllers, detach the handler, close session and device.
    /// Waits for an in-flight initialization first.
    async fn teardown(&self) {
        let _init = self.init_lock.lock().await;

        if let Some(pending) = self
            .controller_init
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pending.abort();
        }
        self.registry.release_all().await;

        if let Some(handler) = self.attached.lock().await.take() {
            handler.on_detach().await;
        }
        {
            let _session = self.session_lock.lock().await;
            if let Some(session) = self.session.take() {
                if let Err(e) = session.stop_repeating().await {
                    log::debug!("stop_repeating during teardown: {}", e);
                }
                session.close().await;
            }
        }
        if let Some(device) = self.device.take() {
            device.close().await;
            log::info!("Camera {} closed", device.physical_id());
        }
        *self.controller_session.lock().await = None;
        self.composer.clear_base();
        self.descriptor
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn switch_handler(&self, mode: CaptureMode) -> Result<(), CameraError> {
        let handler = self
            .handler_for(mode)
            .ok_or_else(|| CameraError::UnsupportedOperation(format!("No handler for {:?}", mode)))?;
        let mut attached = self.attached.lock().await;

        if let Some(current) = attached.as_ref() {
            if Arc::ptr_eq(current, &handler) {
                log::debug!("{:?} shares the attached handler", mode);
                return Ok(());
            }
        }
        if !self.device.is_set() {
            log::debug!("No open device; {:?} handler attaches on initialize", mode);
            return Ok(());
        }

        if let Some(previous) = attached.take() {
            previous.on_detach().await;
        }
        check_invariant!(
            attached.is_none(),
            "At most one mode handler is attached",
            "orchestrator::switch_handler"
        );
        handler.on_attach(self.host()).await?;
        *attached = Some(handler.clone());
        drop(attached);

        log::info!("Switched to {:?} mode", mode);
        if let Some(preview) = self.preview() {
            handler.start_preview(preview).await?;
        }
        Ok(())
    }

    async fn configure_session(
        &self,
        outputs: Vec<OutputTarget>,
    ) -> Result<Arc<dyn CaptureSession>, CameraError> {
        let _session = self.session_lock.lock().await;
        let device = self
            .device
            .current()
            .ok_or_else(|| CameraError::ResourceUnavailable("No open camera device".to_string()))?;

        if let Some(stale) = self.session.take() {
            log::debug!("Closing stale session {}", stale.id());
            if let Err(e) = stale.stop_repeating().await {
                log::debug!("stop_repeating on stale session: {}", e);
            }
            stale.close().await;
        }
        check_invariant!(
            !self.session.is_set(),
            "A device has at most one open session",
            "orchestrator::configure_session"
        );

        let session = device.create_session(outputs).await.map_err(|e| {
            log::error!("Session configuration failed: {}", e);
            CameraError::SessionError(format!("Failed to configure session: {}", e))
        })?;
        log::debug!("Session {} configured with {} outputs", session.id(), session.outputs().len());
        self.session.replace(session.clone());
        Ok(session)
    }

    /// Controller initialization for `session`, at most once per session id.
    async fn initialize_controllers(&self, session: SessionId) -> ManagerState {
        let mut initialized = self.controller_session.lock().await;
        if *initialized == Some(session) {
            log::debug!("Controllers already initialized for session {}", session);
            return self.registry.manager_state();
        }
        match self.session.current() {
            Some(current) if current.id() == session => {}
            _ => {
                log::debug!("Session {} replaced before controller init", session);
                return self.registry.manager_state();
            }
        }
        *initialized = Some(session);
        self.registry.initialize_all().await
    }
}

/// The handlers' view of the orchestrator. Weak so that an attached handler
/// never keeps a closed orchestrator alive.
struct HostLink {
    inner: Weak<Inner>,
}

impl HostLink {
    fn inner(&self) -> Result<Arc<Inner>, CameraError> {
        self.inner.upgrade().ok_or(CameraError::Closed)
    }
}

#[async_trait]
impl SessionHost for HostLink {
    fn device(&self) -> Option<Arc<dyn CameraDevice>> {
        self.inner.upgrade()?.device.current()
    }

    fn session(&self) -> Option<Arc<dyn CaptureSession>> {
        self.inner.upgrade()?.session.current()
    }

    fn descriptor(&self) -> Option<Arc<CameraDescriptor>> {
        self.inner
            .upgrade()?
            .descriptor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn composer(&self) -> RequestComposer {
        self.inner
            .upgrade()
            .map(|inner| inner.composer.clone())
            .unwrap_or_default()
    }

    async fn configure_session(
        &self,
        outputs: Vec<OutputTarget>,
    ) -> Result<Arc<dyn CaptureSession>, CameraError> {
        self.inner()?.configure_session(outputs).await
    }

    async fn report_session_configured(&self, session: Arc<dyn CaptureSession>) {
        let Ok(inner) = self.inner() else {
            return;
        };
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        let id = session.id();
        let worker = inner.clone();
        let handle = tokio::spawn(async move { worker.initialize_controllers(id).await });
        inner.track(handle.abort_handle());
        let previous = inner
            .controller_init
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if previous.is_some_and(|previous| !previous.is_finished()) {
            log::debug!("Superseding controller init for an older session");
        }
    }
}

/// Per-device camera core: device lifecycle, mode handlers and controllers.
#[derive(Clone)]
pub struct DeviceOrchestrator {
    inner: Arc<Inner>,
}

impl DeviceOrchestrator {
    pub fn state(&self) -> OrchestratorState {
        self.inner.state.borrow().clone()
    }

    pub fn state_stream(&self) -> watch::Receiver<OrchestratorState> {
        self.inner.state.subscribe()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    /// Discover units, open the selected one (retrying retryable failures)
    /// and attach the handler for the selected mode. A call while another
    /// initialization is running returns immediately.
    pub async fn initialize(&self) -> Result<(), CameraError> {
        self.inner.initialize().await
    }

    /// Start preview on `preview`. The target is remembered and reused after
    /// mode and camera switches.
    pub async fn start_preview(&self, preview: PreviewTarget) -> Result<(), CameraError> {
        *self
            .inner
            .preview
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(preview);
        let handler = self.inner.attached_handler().await?;
        handler.start_preview(preview).await
    }

    pub fn preview_target(&self) -> Option<PreviewTarget> {
        self.inner.preview()
    }

    /// Wait for the controller initialization kicked off by the latest
    /// session configuration.
    pub async fn await_controllers(&self) -> ManagerState {
        let pending = self
            .inner
            .controller_init
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(handle) => match handle.await {
                Ok(state) => state,
                Err(e) => {
                    log::debug!("Controller init task ended early: {}", e);
                    self.inner.registry.manager_state()
                }
            },
            None => self.inner.registry.manager_state(),
        }
    }

    pub async fn capture(&self) -> Result<Option<MediaLocator>, CameraError> {
        let handler = self.inner.attached_handler().await?;
        if !handler.supports_capture() {
            log::warn!("{:?} mode does not capture stills", handler.mode());
            return Ok(None);
        }
        handler.capture().await
    }

    pub async fn start_recording(&self) -> Result<Option<MediaLocator>, CameraError> {
        let handler = self.inner.attached_handler().await?;
        if !handler.supports_recording() {
            log::warn!("{:?} mode does not record", handler.mode());
            return Ok(None);
        }
        handler.start_recording().await
    }

    pub async fn stop_recording(&self) -> Result<Option<MediaLocator>, CameraError> {
        let handler = self.inner.attached_handler().await?;
        if !handler.supports_recording() {
            return Ok(None);
        }
        handler.stop_recording().await
    }

    pub async fn is_recording(&self) -> bool {
        match self.inner.attached_handler().await {
            Ok(handler) => handler.state() == HandlerState::Recording,
            Err(_) => false,
        }
    }

    /// Flip between front and back units and reopen.
    pub async fn switch_camera(&self) -> Result<(), CameraError> {
        let facing = self
            .inner
            .descriptor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|descriptor| descriptor.facing)
            .unwrap_or(self.inner.config.camera.default_facing);
        let target_facing = match facing {
            LensFacing::Front => LensFacing::Back,
            _ => LensFacing::Front,
        };
        let logical = self
            .inner
            .capabilities
            .camera_for_facing(target_facing)
            .ok_or_else(|| {
                CameraError::UnsupportedOperation(format!("No {:?} camera", target_facing))
            })?;
        self.switch_to_logical_camera(logical).await
    }

    /// Close the current device and fully reinitialize on `logical_id`.
    pub async fn switch_to_logical_camera(
        &self,
        logical_id: LogicalCameraId,
    ) -> Result<(), CameraError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CameraError::Closed);
        }
        if self.inner.capabilities.is_discovered()
            && self.inner.capabilities.capability(logical_id).is_none()
        {
            return Err(CameraError::UnsupportedOperation(format!(
                "{:?} camera not available",
                logical_id
            )));
        }
        log::info!("Switching to {:?} camera", logical_id);
        self.inner.teardown().await;
        *self
            .inner
            .logical
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(logical_id);
        self.inner.initialize().await
    }

    /// Select `mode` now; detaching the old handler, attaching the new one
    /// and resuming preview happen on the returned task.
    pub fn set_camera_mode(&self, mode: CaptureMode) -> JoinHandle<Result<(), CameraError>> {
        let previous = std::mem::replace(
            &mut *self
                .inner
                .mode
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            mode,
        );
        log::info!("Camera mode {:?} -> {:?}", previous, mode);

        if let Some(old) = self.inner.handler_for(previous) {
            old.set_camera_mode(mode);
        }
        if let Some(new) = self.inner.handler_for(mode) {
            new.set_camera_mode(mode);
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let result = inner.switch_handler(mode).await;
            if let Err(e) = &result {
                log::error!("Switching to {:?} failed: {}", mode, e);
            }
            result
        });
        self.inner.track(handle.abort_handle());
        handle
    }

    pub fn camera_mode(&self) -> CaptureMode {
        self.inner.mode()
    }

    pub async fn toggle_flash(&self) -> bool {
        self.inner.registry.flash().toggle_torch().await
    }

    pub async fn focus_at(&self, x: f32, y: f32) -> bool {
        self.inner.registry.focus().focus_at(x, y).await
    }

    pub async fn set_zoom(&self, ratio: f32) -> bool {
        self.inner.registry.zoom().set_value(ratio).await
    }

    pub async fn set_exposure_compensation(&self, compensation: i32) -> bool {
        self.inner.registry.exposure().set_value(compensation).await
    }

    pub async fn set_focus_mode(&self, mode: FocusMode) -> bool {
        self.inner.registry.focus().set_mode(mode).await
    }

    pub async fn set_white_balance(&self, mode: WhiteBalanceMode) -> bool {
        self.inner.registry.white_balance().set_mode(mode).await
    }

    /// `None` hands sensitivity back to auto exposure.
    pub async fn set_iso(&self, iso: Option<u32>) -> bool {
        let controller = self.inner.registry.iso();
        match iso {
            Some(value) => controller.set_value(value).await,
            None => controller.set_auto_mode(true).await,
        }
    }

    /// `None` hands exposure time back to auto exposure.
    pub async fn set_shutter_speed(&self, exposure_ns: Option<u64>) -> bool {
        let controller = self.inner.registry.shutter_speed();
        match exposure_ns {
            Some(value) => controller.set_value(value).await,
            None => controller.set_auto().await,
        }
    }

    pub async fn set_hdr_mode(&self, mode: HdrMode) -> bool {
        self.inner.registry.hdr().set_mode(mode).await
    }

    pub async fn apply_camera_settings(&self, settings: &CameraSettings) -> ApplyReport {
        self.inner.operations.apply_camera_settings(settings).await
    }

    pub async fn reset_to_default_settings(&self) {
        log::info!("Resetting controllers to defaults");
        self.inner.registry.reset_all().await;
    }

    /// Register (or replace) the handler for `mode`.
    pub fn register_mode_handler(
        &self,
        mode: CaptureMode,
        handler: Arc<dyn ModeHandler>,
    ) -> Option<Arc<dyn ModeHandler>> {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mode, handler)
    }

    /// Remove the handler for `mode`, detaching it first if it is attached.
    pub async fn unregister_mode_handler(&self, mode: CaptureMode) -> Option<Arc<dyn ModeHandler>> {
        let removed = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&mode)?;
        let mut attached = self.inner.attached.lock().await;
        if attached
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &removed))
        {
            removed.on_detach().await;
            attached.take();
        }
        Some(removed)
    }

    /// The handler that serves `mode` (falling back to the photo or video
    /// handler for modes without a dedicated one).
    pub fn mode_handler(&self, mode: CaptureMode) -> Option<Arc<dyn ModeHandler>> {
        self.inner.handler_for(mode)
    }

    pub fn registry(&self) -> Arc<ControllerRegistry> {
        self.inner.registry.clone()
    }

    pub fn operations(&self) -> Arc<OperationManager> {
        self.inner.operations.clone()
    }

    pub fn capabilities(&self) -> Arc<CapabilityManager> {
        self.inner.capabilities.clone()
    }

    pub fn current_logical_camera(&self) -> Option<LogicalCameraId> {
        *self
            .inner
            .logical
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_descriptor(&self) -> Option<Arc<CameraDescriptor>> {
        self.inner
            .descriptor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn available_cameras(&self) -> BTreeMap<LogicalCameraId, CameraCapability> {
        self.inner.capabilities.available_cameras()
    }

    pub fn cameras_for_mode(&self, mode: CaptureMode) -> Vec<LogicalCameraId> {
        self.inner.capabilities.cameras_for_mode(mode)
    }

    pub fn is_mode_supported(&self, logical_id: LogicalCameraId, mode: CaptureMode) -> bool {
        self.inner.capabilities.is_mode_supported(logical_id, mode)
    }

    pub fn best_camera_for_mode(&self, mode: CaptureMode) -> LogicalCameraId {
        self.inner.capabilities.best_camera_for_mode(mode)
    }

    /// Controllers usable on the current camera in `mode`.
    pub fn available_controllers(&self, mode: CaptureMode) -> Vec<ControllerType> {
        let logical = self
            .current_logical_camera()
            .unwrap_or_else(|| self.inner.capabilities.best_camera_for_mode(mode));
        self.inner
            .operations
            .get_available_controllers(logical, mode)
            .into_iter()
            .collect()
    }

    pub fn current_settings(&self) -> CameraSettings {
        self.inner.operations.current_settings()
    }

    pub fn current_zoom(&self) -> f32 {
        self.inner.registry.zoom().current_value()
    }

    pub fn max_zoom(&self) -> f32 {
        self.inner.registry.zoom().max_zoom()
    }

    pub fn controller_states(&self) -> BTreeMap<String, ControllerState> {
        self.inner.registry.state_map()
    }

    /// Cancel in-flight work, release controllers, close session and device
    /// and close every registered handler. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Closing camera core");

        let tasks: Vec<AbortHandle> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        self.inner.teardown().await;

        let handlers: Vec<Arc<dyn ModeHandler>> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            handler.close().await;
        }
        self.inner.set_state(OrchestratorState::Closed);
    }
}
