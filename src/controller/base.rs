use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, MutexGuard};

use super::{ControllerKind, ControllerState};
use crate::check_invariant;
use crate::config::ControlsConfig;
use crate::errors::CameraError;
use crate::hardware::{CameraDescriptor, CaptureSession, HandleSlot};
use crate::request::{CaptureRequest, RequestComposer, RequestSettings};

pub(crate) type StateMap = BTreeMap<String, ControllerState>;

/// Everything a controller may touch for the device it was built for.
#[derive(Clone)]
pub struct DeviceContext {
    pub descriptor: Arc<CameraDescriptor>,
    pub session: HandleSlot<dyn CaptureSession>,
    pub composer: RequestComposer,
    pub controls: ControlsConfig,
    pub(crate) state_map: Arc<watch::Sender<StateMap>>,
}

impl DeviceContext {
    pub fn new(
        descriptor: Arc<CameraDescriptor>,
        session: HandleSlot<dyn CaptureSession>,
        composer: RequestComposer,
        controls: ControlsConfig,
    ) -> Self {
        Self {
            descriptor,
            session,
            composer,
            controls,
            state_map: Arc::new(watch::channel(StateMap::new()).0),
        }
    }
}

/// Shared plumbing for one controller: state publication, support caching
/// and the serialized hardware write primitive.
pub struct ControllerCore {
    kind: ControllerKind,
    context: DeviceContext,
    state: watch::Sender<ControllerState>,
    supported: OnceLock<bool>,
    last_write_accepted: AtomicBool,
    writes: Mutex<()>,
}

impl ControllerCore {
    pub fn new(kind: ControllerKind, context: DeviceContext) -> Self {
        let (state, _) = watch::channel(ControllerState::Uninitialized);
        context.state_map.send_modify(|map| {
            map.insert(kind.name().to_string(), ControllerState::Uninitialized);
        });
        Self {
            kind,
            context,
            state,
            supported: OnceLock::new(),
            last_write_accepted: AtomicBool::new(false),
            writes: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> ControllerKind {
        self.kind
    }

    pub fn descriptor(&self) -> &CameraDescriptor {
        &self.context.descriptor
    }

    pub fn controls(&self) -> &ControlsConfig {
        &self.context.controls
    }

    pub fn composer(&self) -> &RequestComposer {
        &self.context.composer
    }

    pub fn session(&self) -> Option<Arc<dyn CaptureSession>> {
        self.context.session.current()
    }

    pub fn state(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    pub(crate) fn cached_support(&self, check: impl FnOnce() -> bool) -> bool {
        *self.supported.get_or_init(check)
    }

    pub(crate) async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    pub(crate) fn mark_released(&self) {
        self.last_write_accepted.store(false, Ordering::SeqCst);
    }

    /// Enter Ready, or Error when no hardware write was accepted since the
    /// controller was (re)bound.
    pub(crate) fn mark_ready(&self) -> Result<(), CameraError> {
        let accepted = check_invariant!(
            self.last_write_accepted.load(Ordering::SeqCst),
            "Controller reaches Ready only after an accepted hardware write",
            self.kind.name()
        );
        if accepted {
            self.set_state(ControllerState::Ready);
            return Ok(());
        }
        let msg = format!("{} finished without an accepted hardware write", self.kind.name());
        self.set_state(ControllerState::Error(msg.clone()));
        Err(CameraError::ControlError(msg))
    }

    pub(crate) fn set_state(&self, state: ControllerState) {
        log::debug!("{} -> {}", self.kind.name(), state);
        self.context.state_map.send_modify(|map| {
            map.insert(self.kind.name().to_string(), state.clone());
        });
        self.state.send_replace(state);
    }

    /// Merge `patch` into the standing request and submit it. The patch is
    /// kept only when the session accepted the request.
    pub async fn submit<F>(&self, patch: F) -> Result<(), CameraError>
    where
        F: FnOnce(&mut RequestSettings) + Send,
    {
        let session = self
            .session()
            .ok_or_else(|| CameraError::ResourceUnavailable("No active capture session".to_string()))?;

        let staged = self.context.composer.stage(patch);
        let request = match staged.request.clone() {
            Some(request) => request,
            None => {
                self.last_write_accepted.store(false, Ordering::SeqCst);
                return Err(CameraError::SessionError(
                    "No repeating request installed".to_string(),
                ));
            }
        };

        match session.set_repeating_request(request).await {
            Ok(()) => {
                self.context.composer.commit(staged);
                self.last_write_accepted.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.last_write_accepted.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Serialized write: Busy for the hardware round-trip, then Ready (after
    /// `on_accepted` published the new value) or Error.
    pub async fn write<F, A>(&self, label: &str, patch: F, on_accepted: A) -> bool
    where
        F: FnOnce(&mut RequestSettings) + Send,
        A: FnOnce() + Send,
    {
        let _write = self.writes.lock().await;
        if !self.begin_write(label) {
            return false;
        }

        match self.submit(patch).await {
            Ok(()) => {
                on_accepted();
                self.mark_ready().is_ok()
            }
            Err(e) => self.fail_write(label, e),
        }
    }

    /// Serialized one-shot request (e.g. an AF trigger); the standing
    /// request is left untouched.
    pub async fn trigger(&self, label: &str, request: CaptureRequest) -> bool {
        let _write = self.writes.lock().await;
        if !self.begin_write(label) {
            return false;
        }
        let Some(session) = self.session() else {
            return self.fail_write(
                label,
                CameraError::ResourceUnavailable("No active capture session".to_string()),
            );
        };

        match session.capture(request).await {
            Ok(_) => {
                self.last_write_accepted.store(true, Ordering::SeqCst);
                self.mark_ready().is_ok()
            }
            Err(e) => {
                self.last_write_accepted.store(false, Ordering::SeqCst);
                self.fail_write(label, e.into())
            }
        }
    }

    fn begin_write(&self, label: &str) -> bool {
        let state = self.state();
        if !state.accepts_writes() {
            log::debug!("{}: ignoring {} while {}", self.kind.name(), label, state);
            return false;
        }
        if self.session().is_none() {
            log::warn!("{}: cannot {} without an active session", self.kind.name(), label);
            return false;
        }
        self.set_state(ControllerState::Busy);
        true
    }

    fn fail_write(&self, label: &str, error: CameraError) -> bool {
        log::error!("{}: failed to {}: {}", self.kind.name(), label, error);
        self.set_state(ControllerState::Error(format!(
            "Failed to {}: {}",
            label, error
        )));
        false
    }
}

/// Per-controller behavior plugged into the shared life cycle. Implementing
/// this trait gives a type the full [`super::ParameterController`] contract.
#[async_trait]
pub trait ControllerHooks: Send + Sync {
    fn core(&self) -> &ControllerCore;

    fn check_support(&self) -> bool;

    fn check_enabled(&self) -> bool;

    /// Push the current value to the session (called with writes locked).
    async fn on_initialize(&self) -> Result<(), CameraError>;

    /// Push the neutral value to the session (called with writes locked).
    async fn on_reset(&self) -> Result<(), CameraError>;

    async fn on_release(&self) {}
}
