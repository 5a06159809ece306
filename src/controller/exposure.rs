use std::ops::RangeInclusive;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::base::{ControllerCore, ControllerHooks, DeviceContext};
use super::{ControllerKind, RangedController};
use crate::errors::CameraError;
use crate::hardware::{MeteringRegion, Rect};
use crate::request::AeMode;

/// EV per compensation unit when the hardware does not report a step.
const FALLBACK_STEP: f32 = 1.0 / 3.0;

pub fn compensation_to_ev(compensation: i32, step: Option<f32>) -> f32 {
    match step {
        Some(step) if step > 0.0 => compensation as f32 * step,
        _ => compensation as f32 / 3.0,
    }
}

pub fn ev_to_compensation(ev: f32, step: Option<f32>) -> i32 {
    let step = step.filter(|s| *s > 0.0).unwrap_or(FALLBACK_STEP);
    (ev / step).round() as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeteringMode {
    CenterWeighted,
    Spot,
    Matrix,
}

/// AE regions for a metering mode over the active array.
pub fn metering_regions(mode: MeteringMode, array: Rect) -> Vec<MeteringRegion> {
    let (cx, cy) = array.center();
    let centered = |fraction: i32| {
        let half_w = array.width() / fraction / 2;
        let half_h = array.height() / fraction / 2;
        Rect::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    };
    match mode {
        MeteringMode::Matrix => vec![MeteringRegion::new(array)],
        MeteringMode::CenterWeighted => vec![MeteringRegion::new(centered(2))],
        MeteringMode::Spot => vec![MeteringRegion::new(centered(10))],
    }
}

/// Exposure compensation, AE mode, metering and AE lock.
pub struct ExposureController {
    core: ControllerCore,
    compensation: watch::Sender<i32>,
    ae_mode: watch::Sender<AeMode>,
    metering: watch::Sender<MeteringMode>,
    locked: watch::Sender<bool>,
}

impl ExposureController {
    pub fn new(context: DeviceContext) -> Self {
        Self {
            core: ControllerCore::new(ControllerKind::Exposure, context),
            compensation: watch::channel(0).0,
            ae_mode: watch::channel(AeMode::On).0,
            metering: watch::channel(MeteringMode::CenterWeighted).0,
            locked: watch::channel(false).0,
        }
    }

    fn step(&self) -> Option<f32> {
        self.core.descriptor().compensation_step
    }

    pub fn current_ev(&self) -> f32 {
        compensation_to_ev(self.current_value(), self.step())
    }

    pub fn ev_range(&self) -> Option<RangeInclusive<f32>> {
        self.supported_range().map(|range| {
            compensation_to_ev(*range.start(), self.step())..=compensation_to_ev(*range.end(), self.step())
        })
    }

    /// Nearest compensation for `ev`, clamped into the supported range.
    pub async fn set_exposure_ev(&self, ev: f32) -> bool {
        let Some(range) = self.supported_range() else {
            return false;
        };
        let compensation = ev_to_compensation(ev, self.step()).clamp(*range.start(), *range.end());
        self.set_value(compensation).await
    }

    pub async fn increase_exposure(&self) -> bool {
        self.step_by(self.core.controls().exposure_step).await
    }

    pub async fn decrease_exposure(&self) -> bool {
        self.step_by(-self.core.controls().exposure_step).await
    }

    async fn step_by(&self, delta: i32) -> bool {
        let Some(range) = self.supported_range() else {
            return false;
        };
        let current = self.current_value();
        let target = current.saturating_add(delta).clamp(*range.start(), *range.end());
        if target == current {
            return false;
        }
        self.set_value(target).await
    }

    pub async fn reset_exposure(&self) -> bool {
        self.set_value(0).await
    }

    pub fn ae_mode(&self) -> AeMode {
        *self.ae_mode.borrow()
    }

    pub fn supported_ae_modes(&self) -> Vec<AeMode> {
        self.core.descriptor().ae_modes.clone()
    }

    pub async fn set_ae_mode(&self, mode: AeMode) -> bool {
        if !self.core.descriptor().ae_modes.contains(&mode) {
            log::warn!("AE mode {:?} not supported", mode);
            return false;
        }
        self.core
            .write("set AE mode", |s| s.ae_mode = Some(mode), || {
                self.ae_mode.send_replace(mode);
            })
            .await
    }

    pub fn metering_mode(&self) -> MeteringMode {
        *self.metering.borrow()
    }

    pub async fn set_metering_mode(&self, mode: MeteringMode) -> bool {
        let Some(array) = self.core.descriptor().active_array else {
            return false;
        };
        let regions = metering_regions(mode, array);
        self.core
            .write("set metering mode", |s| s.ae_regions = Some(regions), || {
                self.metering.send_replace(mode);
            })
            .await
    }

    pub fn is_exposure_locked(&self) -> bool {
        *self.locked.borrow()
    }

    pub async fn set_exposure_lock(&self, locked: bool) -> bool {
        self.core
            .write("set exposure lock", |s| s.ae_lock = Some(locked), || {
                self.locked.send_replace(locked);
            })
            .await
    }

    pub async fn toggle_exposure_lock(&self) -> bool {
        self.set_exposure_lock(!self.is_exposure_locked()).await
    }

    pub fn ev_stream(&self) -> watch::Receiver<i32> {
        self.compensation.subscribe()
    }
}

#[async_trait]
impl ControllerHooks for ExposureController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn check_support(&self) -> bool {
        self.core
            .descriptor()
            .compensation_range
            .as_ref()
            .map(|range| range.start() < range.end())
            .unwrap_or(false)
    }

    fn check_enabled(&self) -> bool {
        self.current_value() != 0 || self.is_exposure_locked() || self.ae_mode() != AeMode::On
    }

    async fn on_initialize(&self) -> Result<(), CameraError> {
        let compensation = self.current_value();
        let mode = self.ae_mode();
        let locked = self.is_exposure_locked();
        self.core
            .submit(|s| {
                if mode != AeMode::On {
                    s.ae_mode = Some(mode);
                }
                s.ae_compensation = Some(compensation);
                s.ae_lock = Some(locked);
            })
            .await
    }

    async fn on_reset(&self) -> Result<(), CameraError> {
        let pinned_mode = self.ae_mode() != AeMode::On;
        self.core
            .submit(|s| {
                if pinned_mode {
                    s.ae_mode = Some(AeMode::On);
                }
                s.ae_compensation = Some(0);
                s.ae_lock = Some(false);
                s.ae_regions = None;
            })
            .await?;
        self.compensation.send_replace(0);
        self.ae_mode.send_replace(AeMode::On);
        self.locked.send_replace(false);
        self.metering.send_replace(MeteringMode::CenterWeighted);
        Ok(())
    }
}

#[async_trait]
impl RangedController<i32> for ExposureController {
    fn supported_range(&self) -> Option<RangeInclusive<i32>> {
        self.core.descriptor().compensation_range.clone()
    }

    fn current_value(&self) -> i32 {
        *self.compensation.borrow()
    }

    async fn set_value(&self, value: i32) -> bool {
        match self.supported_range() {
            Some(range) if range.contains(&value) => {}
            _ => {
                log::warn!("Exposure compensation {} outside supported range", value);
                return false;
            }
        }
        self.core
            .write("set exposure compensation", |s| s.ae_compensation = Some(value), || {
                self.compensation.send_replace(value);
            })
            .await
    }

    fn value_stream(&self) -> watch::Receiver<i32> {
        self.compensation.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ev_conversion_with_reported_step() {
        assert_eq!(compensation_to_ev(3, Some(0.5)), 1.5);
        assert_eq!(ev_to_compensation(1.5, Some(0.5)), 3);
        assert_eq!(ev_to_compensation(-2.0, Some(1.0 / 6.0)), -12);
    }

    #[test]
    fn test_ev_conversion_fallback_third_stop() {
        assert!((compensation_to_ev(2, None) - 0.6667).abs() < 1e-3);
        assert_eq!(ev_to_compensation(1.0, None), 3);
        assert_eq!(ev_to_compensation(1.0, Some(0.0)), 3);
    }

    #[test]
    fn test_metering_regions_stay_inside_array() {
        let array = Rect::from_size(4000, 3000);
        for mode in [MeteringMode::CenterWeighted, MeteringMode::Spot, MeteringMode::Matrix] {
            let regions = metering_regions(mode, array);
            assert_eq!(regions.len(), 1);
            assert!(array.contains(&regions[0].rect));
        }
        assert_eq!(metering_regions(MeteringMode::Spot, array)[0].rect, Rect::new(1800, 1350, 2200, 1650));
    }
}
