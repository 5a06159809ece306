use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::base::{ControllerCore, ControllerHooks, DeviceContext};
use super::{ControllerKind, ModeController};
use crate::errors::CameraError;
use crate::hardware::{MeteringRegion, Rect};
use crate::request::{AfMode, AfTrigger, RequestSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocusMode {
    Auto,
    ContinuousPicture,
    ContinuousVideo,
    Macro,
    Manual,
    Off,
}

impl FocusMode {
    pub fn af_mode(self) -> AfMode {
        match self {
            FocusMode::Auto => AfMode::Auto,
            FocusMode::ContinuousPicture => AfMode::ContinuousPicture,
            FocusMode::ContinuousVideo => AfMode::ContinuousVideo,
            FocusMode::Macro => AfMode::Macro,
            FocusMode::Manual | FocusMode::Off => AfMode::Off,
        }
    }

    pub fn is_auto_focus(self) -> bool {
        !matches!(self, FocusMode::Manual | FocusMode::Off)
    }
}

const ALL_MODES: [FocusMode; 6] = [
    FocusMode::Auto,
    FocusMode::ContinuousPicture,
    FocusMode::ContinuousVideo,
    FocusMode::Macro,
    FocusMode::Manual,
    FocusMode::Off,
];

/// Square metering region of `size` pixels around a normalized point,
/// clamped to the active array.
pub fn focus_region(array: Rect, x: f32, y: f32, size: u32) -> Rect {
    let px = array.left + (x.clamp(0.0, 1.0) * array.width() as f32) as i32;
    let py = array.top + (y.clamp(0.0, 1.0) * array.height() as f32) as i32;
    let half = (size as i32 / 2).max(1);
    Rect::new(
        (px - half).max(array.left),
        (py - half).max(array.top),
        (px + half).min(array.right),
        (py + half).min(array.bottom),
    )
}

/// AF mode plus tap-to-focus.
pub struct FocusController {
    core: ControllerCore,
    mode: watch::Sender<FocusMode>,
    focusing: watch::Sender<bool>,
}

impl FocusController {
    pub fn new(context: DeviceContext) -> Self {
        let af_modes = &context.descriptor.af_modes;
        let initial = if af_modes.contains(&AfMode::ContinuousPicture) {
            FocusMode::ContinuousPicture
        } else {
            FocusMode::Auto
        };
        Self {
            core: ControllerCore::new(ControllerKind::Focus, context),
            mode: watch::channel(initial).0,
            focusing: watch::channel(false).0,
        }
    }

    pub fn is_auto_focus(&self) -> bool {
        self.current_mode().is_auto_focus()
    }

    pub fn is_focusing(&self) -> bool {
        *self.focusing.borrow()
    }

    pub fn focusing_stream(&self) -> watch::Receiver<bool> {
        self.focusing.subscribe()
    }

    pub async fn set_focus_mode(&self, mode: FocusMode) -> bool {
        self.set_mode(mode).await
    }

    pub async fn set_auto_focus(&self, enabled: bool) -> bool {
        let supported = self.supported_modes();
        let target = if enabled {
            if supported.contains(&FocusMode::ContinuousPicture) {
                FocusMode::ContinuousPicture
            } else {
                FocusMode::Auto
            }
        } else {
            FocusMode::Manual
        };
        self.set_mode(target).await
    }

    /// Trigger a one-shot AF scan around a normalized point (0.0..=1.0 on
    /// both axes), using the active mode's template and outputs.
    pub async fn focus_at(&self, x: f32, y: f32) -> bool {
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
            log::warn!("Focus point ({}, {}) outside the frame", x, y);
            return false;
        }
        let Some(array) = self.core.descriptor().active_array else {
            return false;
        };
        let targets = self.core.composer().base_targets();
        if targets.is_empty() {
            log::warn!("No standing request to focus against");
            return false;
        }

        let region = MeteringRegion::new(focus_region(
            array,
            x,
            y,
            self.core.controls().focus_region_size,
        ));
        let forced = RequestSettings {
            af_mode: Some(AfMode::Auto),
            af_trigger: Some(AfTrigger::Start),
            af_regions: Some(vec![region]),
            ae_regions: Some(vec![region]),
            ..Default::default()
        };
        let request = self.core.composer().one_shot(
            self.core.composer().template(),
            targets,
            &RequestSettings::default(),
            &forced,
        );

        self.focusing.send_replace(true);
        let accepted = self.core.trigger("trigger autofocus", request).await;
        self.focusing.send_replace(false);
        accepted
    }

    /// Focus on the frame center.
    pub async fn perform_focus(&self) -> bool {
        self.focus_at(0.5, 0.5).await
    }
}

#[async_trait]
impl ControllerHooks for FocusController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn check_support(&self) -> bool {
        self.core.descriptor().af_modes.contains(&AfMode::Auto)
    }

    fn check_enabled(&self) -> bool {
        !self.is_auto_focus()
    }

    async fn on_initialize(&self) -> Result<(), CameraError> {
        let af = self.current_mode().af_mode();
        self.core.submit(|s| s.af_mode = Some(af)).await
    }

    async fn on_reset(&self) -> Result<(), CameraError> {
        let neutral = if self.supported_modes().contains(&FocusMode::ContinuousPicture) {
            FocusMode::ContinuousPicture
        } else {
            FocusMode::Auto
        };
        self.core
            .submit(|s| {
                s.af_mode = Some(neutral.af_mode());
                s.af_regions = None;
            })
            .await?;
        self.mode.send_replace(neutral);
        Ok(())
    }
}

#[async_trait]
impl ModeController<FocusMode> for FocusController {
    fn supported_modes(&self) -> Vec<FocusMode> {
        let af_modes = &self.core.descriptor().af_modes;
        ALL_MODES
            .iter()
            .copied()
            .filter(|mode| af_modes.contains(&mode.af_mode()))
            .collect()
    }

    fn current_mode(&self) -> FocusMode {
        *self.mode.borrow()
    }

    async fn set_mode(&self, mode: FocusMode) -> bool {
        if !self.supported_modes().contains(&mode) {
            log::warn!("Focus mode {:?} not supported", mode);
            return false;
        }
        let af = mode.af_mode();
        self.core
            .write("set focus mode", |s| s.af_mode = Some(af), || {
                self.mode.send_replace(mode);
            })
            .await
    }

    fn mode_stream(&self) -> watch::Receiver<FocusMode> {
        self.mode.subscribe()
    }
}
