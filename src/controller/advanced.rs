//! Controllers that only some modes expose: manual shutter (PRO), HDR scene
//! mode (NIGHT) and optical stabilization.

use std::ops::RangeInclusive;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::base::{ControllerCore, ControllerHooks, DeviceContext};
use super::{ControllerKind, ModeController, RangedController};
use crate::errors::CameraError;
use crate::request::{AeMode, RequestSettings, SceneMode, StabilizationMode};

/// 1/60 s
const DEFAULT_EXPOSURE_NS: u64 = 16_666_667;

/// Drop the exposure-time pin; AE stays off while ISO is still manual.
fn release_exposure_time(settings: &mut RequestSettings) {
    settings.exposure_time_ns = None;
    if settings.ae_mode == Some(AeMode::Off) && settings.sensitivity.is_none() {
        settings.ae_mode = None;
    }
}

/// Manual exposure time in nanoseconds. Any manual value switches AE off.
pub struct ShutterSpeedController {
    core: ControllerCore,
    exposure_ns: watch::Sender<u64>,
    manual: watch::Sender<bool>,
}

impl ShutterSpeedController {
    pub fn new(context: DeviceContext) -> Self {
        let initial = context
            .descriptor
            .exposure_time_range
            .as_ref()
            .map(|range| DEFAULT_EXPOSURE_NS.clamp(*range.start(), *range.end()))
            .unwrap_or(DEFAULT_EXPOSURE_NS);
        Self {
            core: ControllerCore::new(ControllerKind::ShutterSpeed, context),
            exposure_ns: watch::channel(initial).0,
            manual: watch::channel(false).0,
        }
    }

    pub fn is_manual(&self) -> bool {
        *self.manual.borrow()
    }

    /// Hand exposure time back to AE.
    pub async fn set_auto(&self) -> bool {
        self.core
            .write("release shutter speed", release_exposure_time, || {
                self.manual.send_replace(false);
            })
            .await
    }
}

#[async_trait]
impl ControllerHooks for ShutterSpeedController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn check_support(&self) -> bool {
        let descriptor = self.core.descriptor();
        descriptor.exposure_time_range.is_some() && descriptor.capabilities.manual_sensor
    }

    fn check_enabled(&self) -> bool {
        self.is_manual()
    }

    async fn on_initialize(&self) -> Result<(), CameraError> {
        let manual = self.is_manual();
        let exposure = self.current_value();
        self.core
            .submit(|s| {
                if manual {
                    s.ae_mode = Some(AeMode::Off);
                    s.exposure_time_ns = Some(exposure);
                }
            })
            .await
    }

    async fn on_reset(&self) -> Result<(), CameraError> {
        self.core.submit(release_exposure_time).await?;
        self.manual.send_replace(false);
        Ok(())
    }
}

#[async_trait]
impl RangedController<u64> for ShutterSpeedController {
    fn supported_range(&self) -> Option<RangeInclusive<u64>> {
        self.core.descriptor().exposure_time_range.clone()
    }

    fn current_value(&self) -> u64 {
        *self.exposure_ns.borrow()
    }

    async fn set_value(&self, value: u64) -> bool {
        match self.supported_range() {
            Some(range) if range.contains(&value) => {}
            _ => {
                log::warn!("Exposure time {}ns outside supported range", value);
                return false;
            }
        }
        self.core
            .write(
                "set shutter speed",
                |s| {
                    s.ae_mode = Some(AeMode::Off);
                    s.exposure_time_ns = Some(value);
                },
                || {
                    self.exposure_ns.send_replace(value);
                    self.manual.send_replace(true);
                },
            )
            .await
    }

    fn value_stream(&self) -> watch::Receiver<u64> {
        self.exposure_ns.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HdrMode {
    Off,
    On,
    /// Leaves the scene choice to the mode's own settings.
    Auto,
}

impl HdrMode {
    fn scene_mode(self) -> Option<SceneMode> {
        match self {
            HdrMode::On => Some(SceneMode::Hdr),
            HdrMode::Off | HdrMode::Auto => None,
        }
    }
}

pub struct HdrController {
    core: ControllerCore,
    mode: watch::Sender<HdrMode>,
}

impl HdrController {
    pub fn new(context: DeviceContext) -> Self {
        Self {
            core: ControllerCore::new(ControllerKind::Hdr, context),
            mode: watch::channel(HdrMode::Off).0,
        }
    }
}

#[async_trait]
impl ControllerHooks for HdrController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn check_support(&self) -> bool {
        self.core.descriptor().hdr_scene_mode
    }

    fn check_enabled(&self) -> bool {
        self.current_mode() != HdrMode::Off
    }

    async fn on_initialize(&self) -> Result<(), CameraError> {
        let scene = self.current_mode().scene_mode();
        self.core.submit(|s| s.scene_mode = scene).await
    }

    async fn on_reset(&self) -> Result<(), CameraError> {
        self.core.submit(|s| s.scene_mode = None).await?;
        self.mode.send_replace(HdrMode::Off);
        Ok(())
    }
}

#[async_trait]
impl ModeController<HdrMode> for HdrController {
    fn supported_modes(&self) -> Vec<HdrMode> {
        if self.core.descriptor().hdr_scene_mode {
            vec![HdrMode::Off, HdrMode::On, HdrMode::Auto]
        } else {
            vec![HdrMode::Off]
        }
    }

    fn current_mode(&self) -> HdrMode {
        *self.mode.borrow()
    }

    async fn set_mode(&self, mode: HdrMode) -> bool {
        if !self.supported_modes().contains(&mode) {
            log::warn!("HDR mode {:?} not supported", mode);
            return false;
        }
        let scene = mode.scene_mode();
        self.core
            .write("set HDR mode", |s| s.scene_mode = scene, || {
                self.mode.send_replace(mode);
            })
            .await
    }

    fn mode_stream(&self) -> watch::Receiver<HdrMode> {
        self.mode.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OisMode {
    Off,
    On,
}

impl OisMode {
    fn stabilization(self) -> StabilizationMode {
        match self {
            OisMode::Off => StabilizationMode::Off,
            OisMode::On => StabilizationMode::On,
        }
    }
}

pub struct OisController {
    core: ControllerCore,
    mode: watch::Sender<OisMode>,
}

impl OisController {
    pub fn new(context: DeviceContext) -> Self {
        Self {
            core: ControllerCore::new(ControllerKind::Ois, context),
            mode: watch::channel(OisMode::Off).0,
        }
    }
}

#[async_trait]
impl ControllerHooks for OisController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn check_support(&self) -> bool {
        self.core.descriptor().ois_available
    }

    fn check_enabled(&self) -> bool {
        self.current_mode() == OisMode::On
    }

    async fn on_initialize(&self) -> Result<(), CameraError> {
        let stabilization = self.current_mode().stabilization();
        self.core.submit(|s| s.stabilization = Some(stabilization)).await
    }

    async fn on_reset(&self) -> Result<(), CameraError> {
        self.core
            .submit(|s| s.stabilization = Some(StabilizationMode::Off))
            .await?;
        self.mode.send_replace(OisMode::Off);
        Ok(())
    }
}

#[async_trait]
impl ModeController<OisMode> for OisController {
    fn supported_modes(&self) -> Vec<OisMode> {
        if self.core.descriptor().ois_available {
            vec![OisMode::Off, OisMode::On]
        } else {
            vec![OisMode::Off]
        }
    }

    fn current_mode(&self) -> OisMode {
        *self.mode.borrow()
    }

    async fn set_mode(&self, mode: OisMode) -> bool {
        if !self.supported_modes().contains(&mode) {
            return false;
        }
        let stabilization = mode.stabilization();
        self.core
            .write("set stabilization", |s| s.stabilization = Some(stabilization), || {
                self.mode.send_replace(mode);
            })
            .await
    }

    fn mode_stream(&self) -> watch::Receiver<OisMode> {
        self.mode.subscribe()
    }
}
