//! Parameter controllers
//!
//! Each controller wraps one tunable hardware parameter behind a small state
//! machine:
//!
//! ```text
//! Uninitialized --initialize--> Initializing --ok--> Ready
//!                                            --err-> Error
//! Ready --write/reset--> Busy --accepted--> Ready
//!                             --rejected--> Error
//! any --release--> Uninitialized
//! ```
//!
//! `Ready` is only ever published after the session accepted the request that
//! carried the controller's value, so the state stream doubles as proof that a
//! write reached the hardware. Hardware failures never escape a controller;
//! they surface as `false` and [`ControllerState::Error`].

mod advanced;
mod base;
mod exposure;
mod flash;
mod focus;
mod iso;
mod registry;
mod white_balance;
mod zoom;

pub use advanced::{HdrController, HdrMode, OisController, OisMode, ShutterSpeedController};
pub use base::{ControllerCore, ControllerHooks, DeviceContext};
pub use exposure::{
    compensation_to_ev, ev_to_compensation, metering_regions, ExposureController, MeteringMode,
};
pub use flash::{FlashController, FlashMode};
pub use focus::{focus_region, FocusController, FocusMode};
pub use iso::{IsoController, COMMON_ISO_VALUES};
pub use registry::{ControllerRegistry, ControllerSet, ManagerState};
pub use white_balance::{WhiteBalanceController, WhiteBalanceMode};
pub use zoom::{crop_region, ZoomController};

use std::ops::RangeInclusive;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::errors::CameraError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Uninitialized,
    Initializing,
    Ready,
    Busy,
    Error(String),
}

impl ControllerState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ControllerState::Ready)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ControllerState::Error(_))
    }

    /// Ready or mid-write: counts as healthy for the registry aggregate.
    pub fn is_operational(&self) -> bool {
        matches!(self, ControllerState::Ready | ControllerState::Busy)
    }

    /// Writes are accepted once the controller has been initialized at least once.
    pub fn accepts_writes(&self) -> bool {
        !matches!(
            self,
            ControllerState::Uninitialized | ControllerState::Initializing
        )
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ControllerState::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Uninitialized => write!(f, "Uninitialized"),
            ControllerState::Initializing => write!(f, "Initializing"),
            ControllerState::Ready => write!(f, "Ready"),
            ControllerState::Busy => write!(f, "Busy"),
            ControllerState::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ControllerKind {
    Flash,
    Focus,
    Zoom,
    Iso,
    WhiteBalance,
    Exposure,
    ShutterSpeed,
    Hdr,
    Ois,
}

impl ControllerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerKind::Flash => "FLASH",
            ControllerKind::Focus => "FOCUS",
            ControllerKind::Zoom => "ZOOM",
            ControllerKind::Iso => "ISO",
            ControllerKind::WhiteBalance => "WHITE_BALANCE",
            ControllerKind::Exposure => "EXPOSURE",
            ControllerKind::ShutterSpeed => "SHUTTER_SPEED",
            ControllerKind::Hdr => "HDR",
            ControllerKind::Ois => "OIS",
        }
    }
}

/// Life-cycle contract shared by every controller.
#[async_trait]
pub trait ParameterController: Send + Sync {
    fn kind(&self) -> ControllerKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Hardware support check, evaluated once per device and cached.
    fn is_supported(&self) -> bool;

    /// True when the parameter is away from its neutral value.
    fn is_enabled(&self) -> bool;

    fn state(&self) -> ControllerState;

    fn state_stream(&self) -> watch::Receiver<ControllerState>;

    /// Apply the controller's current value to the active session.
    async fn initialize(&self) -> Result<(), CameraError>;

    async fn release(&self);

    /// Return to the neutral value.
    async fn reset(&self) -> Result<(), CameraError>;
}

/// Continuous parameter (zoom, ISO, exposure compensation, shutter speed).
#[async_trait]
pub trait RangedController<T>: ParameterController
where
    T: Copy + Send + Sync + 'static,
{
    fn supported_range(&self) -> Option<RangeInclusive<T>>;

    fn current_value(&self) -> T;

    /// `false` when `value` is out of range, no session is bound or the
    /// hardware rejected the write.
    async fn set_value(&self, value: T) -> bool;

    fn value_stream(&self) -> watch::Receiver<T>;
}

/// Discrete parameter (flash, white balance, focus, HDR, OIS).
#[async_trait]
pub trait ModeController<M>: ParameterController
where
    M: Copy + Send + Sync + 'static,
{
    fn supported_modes(&self) -> Vec<M>;

    fn current_mode(&self) -> M;

    async fn set_mode(&self, mode: M) -> bool;

    fn mode_stream(&self) -> watch::Receiver<M>;
}

#[async_trait]
impl<T> ParameterController for T
where
    T: ControllerHooks + 'static,
{
    fn kind(&self) -> ControllerKind {
        self.core().kind()
    }

    fn is_supported(&self) -> bool {
        self.core().cached_support(|| self.check_support())
    }

    fn is_enabled(&self) -> bool {
        self.check_enabled()
    }

    fn state(&self) -> ControllerState {
        self.core().state()
    }

    fn state_stream(&self) -> watch::Receiver<ControllerState> {
        self.core().subscribe()
    }

    async fn initialize(&self) -> Result<(), CameraError> {
        let core = self.core();
        if !self.is_supported() {
            return Err(CameraError::UnsupportedOperation(format!(
                "{} is not supported by this camera",
                core.kind().name()
            )));
        }

        let _write = core.lock_writes().await;
        core.set_state(ControllerState::Initializing);

        if core.session().is_none() {
            let msg = "No active capture session".to_string();
            core.set_state(ControllerState::Error(msg.clone()));
            return Err(CameraError::ResourceUnavailable(msg));
        }

        match self.on_initialize().await {
            Ok(()) => core.mark_ready(),
            Err(e) => {
                log::error!("Failed to initialize {}: {}", core.kind().name(), e);
                core.set_state(ControllerState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn release(&self) {
        let core = self.core();
        let _write = core.lock_writes().await;
        self.on_release().await;
        core.mark_released();
        core.set_state(ControllerState::Uninitialized);
    }

    async fn reset(&self) -> Result<(), CameraError> {
        let core = self.core();
        let _write = core.lock_writes().await;
        if !core.state().accepts_writes() {
            return Err(CameraError::ControlError(format!(
                "{} cannot reset while {}",
                core.kind().name(),
                core.state()
            )));
        }

        core.set_state(ControllerState::Busy);
        match self.on_reset().await {
            Ok(()) => core.mark_ready(),
            Err(e) => {
                log::error!("Failed to reset {}: {}", core.kind().name(), e);
                core.set_state(ControllerState::Error(e.to_string()));
                Err(e)
            }
        }
    }
}
