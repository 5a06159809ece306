use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::base::{ControllerCore, ControllerHooks, DeviceContext};
use super::{ControllerKind, ModeController};
use crate::errors::CameraError;
use crate::request::{AeMode, FlashState, RequestSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlashMode {
    Off,
    Auto,
    On,
    Torch,
    RedEye,
}

impl FlashMode {
    /// AE-off and manual overrides owned by other controllers are left alone;
    /// OFF and TORCH only withdraw the AE flash modes this controller set.
    fn apply(self, settings: &mut RequestSettings) {
        let (ae_mode, flash) = match self {
            FlashMode::Off => (None, FlashState::Off),
            FlashMode::Auto => (Some(AeMode::OnAutoFlash), FlashState::Off),
            FlashMode::On => (Some(AeMode::OnAlwaysFlash), FlashState::Off),
            FlashMode::Torch => (None, FlashState::Torch),
            FlashMode::RedEye => (Some(AeMode::OnAutoFlashRedEye), FlashState::Off),
        };
        match ae_mode {
            Some(mode) => settings.ae_mode = Some(mode),
            None if is_flash_ae_mode(settings.ae_mode) => settings.ae_mode = None,
            None => {}
        }
        settings.flash_mode = Some(flash);
    }
}

fn is_flash_ae_mode(mode: Option<AeMode>) -> bool {
    matches!(
        mode,
        Some(AeMode::OnAutoFlash | AeMode::OnAlwaysFlash | AeMode::OnAutoFlashRedEye)
    )
}

const TOGGLE_CYCLE: [FlashMode; 3] = [FlashMode::Off, FlashMode::Auto, FlashMode::On];

pub struct FlashController {
    core: ControllerCore,
    mode: watch::Sender<FlashMode>,
}

impl FlashController {
    pub fn new(context: DeviceContext) -> Self {
        Self {
            core: ControllerCore::new(ControllerKind::Flash, context),
            mode: watch::channel(FlashMode::Off).0,
        }
    }

    pub fn is_torch_on(&self) -> bool {
        self.current_mode() == FlashMode::Torch
    }

    /// Step through OFF, AUTO and ON (whichever the unit supports).
    pub async fn toggle_mode(&self) -> bool {
        let supported = self.supported_modes();
        let cycle: Vec<FlashMode> = TOGGLE_CYCLE
            .iter()
            .copied()
            .filter(|mode| supported.contains(mode))
            .collect();
        if cycle.len() < 2 {
            return false;
        }
        let next = match cycle.iter().position(|mode| *mode == self.current_mode()) {
            Some(index) => cycle[(index + 1) % cycle.len()],
            None => cycle[0],
        };
        self.set_mode(next).await
    }

    pub async fn toggle_torch(&self) -> bool {
        let next = if self.is_torch_on() {
            FlashMode::Off
        } else {
            FlashMode::Torch
        };
        self.set_mode(next).await
    }
}

#[async_trait]
impl ControllerHooks for FlashController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn check_support(&self) -> bool {
        self.core.descriptor().flash_available
    }

    fn check_enabled(&self) -> bool {
        self.current_mode() != FlashMode::Off
    }

    async fn on_initialize(&self) -> Result<(), CameraError> {
        let mode = self.current_mode();
        self.core.submit(|s| mode.apply(s)).await
    }

    async fn on_reset(&self) -> Result<(), CameraError> {
        self.core.submit(|s| FlashMode::Off.apply(s)).await?;
        self.mode.send_replace(FlashMode::Off);
        Ok(())
    }
}

#[async_trait]
impl ModeController<FlashMode> for FlashController {
    fn supported_modes(&self) -> Vec<FlashMode> {
        let descriptor = self.core.descriptor();
        let mut modes = vec![FlashMode::Off];
        if descriptor.flash_available {
            modes.extend([FlashMode::Auto, FlashMode::On]);
            if descriptor.ae_modes.contains(&AeMode::On) {
                modes.push(FlashMode::Torch);
            }
            if descriptor.ae_modes.contains(&AeMode::OnAutoFlashRedEye) {
                modes.push(FlashMode::RedEye);
            }
        }
        modes
    }

    fn current_mode(&self) -> FlashMode {
        *self.mode.borrow()
    }

    async fn set_mode(&self, mode: FlashMode) -> bool {
        if !self.supported_modes().contains(&mode) {
            log::warn!("Flash mode {:?} not supported", mode);
            return false;
        }
        self.core
            .write("set flash mode", |s| mode.apply(s), || {
                self.mode.send_replace(mode);
            })
            .await
    }

    fn mode_stream(&self) -> watch::Receiver<FlashMode> {
        self.mode.subscribe()
    }
}
