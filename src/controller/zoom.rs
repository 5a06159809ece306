use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use super::base::{ControllerCore, ControllerHooks, DeviceContext};
use super::{ControllerKind, RangedController};
use crate::errors::CameraError;
use crate::hardware::Rect;

/// Centered crop of `sensor` for a zoom factor, clamped to the sensor bounds.
pub fn crop_region(sensor: Rect, zoom: f32) -> Rect {
    let zoom = if zoom.is_finite() { zoom.max(1.0) } else { 1.0 };
    let crop_width = (sensor.width() as f32 / zoom) as i32;
    let crop_height = (sensor.height() as f32 / zoom) as i32;
    let (center_x, center_y) = sensor.center();

    let left = (center_x - crop_width / 2).max(sensor.left);
    let top = (center_y - crop_height / 2).max(sensor.top);
    Rect::new(
        left,
        top,
        (left + crop_width).min(sensor.right),
        (top + crop_height).min(sensor.bottom),
    )
}

/// Digital zoom through the request crop region.
pub struct ZoomController {
    core: ControllerCore,
    zoom: watch::Sender<f32>,
    crop: Mutex<Option<Rect>>,
}

impl ZoomController {
    pub fn new(context: DeviceContext) -> Self {
        Self {
            core: ControllerCore::new(ControllerKind::Zoom, context),
            zoom: watch::channel(1.0).0,
            crop: Mutex::new(None),
        }
    }

    fn sensor(&self) -> Option<Rect> {
        self.core.descriptor().active_array
    }

    pub fn max_zoom(&self) -> f32 {
        self.core.descriptor().max_digital_zoom.max(1.0)
    }

    /// Crop currently applied to the standing request.
    pub fn crop_region(&self) -> Option<Rect> {
        *self.crop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn can_zoom_in(&self) -> bool {
        self.current_value() < self.max_zoom()
    }

    pub fn can_zoom_out(&self) -> bool {
        self.current_value() > 1.0
    }

    pub async fn zoom_in(&self) -> bool {
        let target = (self.current_value() + self.core.controls().zoom_step).min(self.max_zoom());
        if !self.can_zoom_in() {
            return false;
        }
        self.set_value(target).await
    }

    pub async fn zoom_out(&self) -> bool {
        let target = (self.current_value() - self.core.controls().zoom_step).max(1.0);
        if !self.can_zoom_out() {
            return false;
        }
        self.set_value(target).await
    }

    async fn apply(&self, zoom: f32) -> Result<(), CameraError> {
        let sensor = self
            .sensor()
            .ok_or_else(|| CameraError::UnsupportedOperation("No active array reported".to_string()))?;
        let crop = crop_region(sensor, zoom);
        self.core.submit(|s| s.crop_region = Some(crop)).await?;
        self.zoom.send_replace(zoom);
        *self.crop.lock().unwrap_or_else(PoisonError::into_inner) = Some(crop);
        Ok(())
    }
}

#[async_trait]
impl ControllerHooks for ZoomController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn check_support(&self) -> bool {
        self.sensor().is_some() && self.core.descriptor().max_digital_zoom > 1.0
    }

    fn check_enabled(&self) -> bool {
        self.current_value() > 1.0
    }

    async fn on_initialize(&self) -> Result<(), CameraError> {
        self.apply(self.current_value()).await
    }

    async fn on_reset(&self) -> Result<(), CameraError> {
        self.apply(1.0).await
    }
}

#[async_trait]
impl RangedController<f32> for ZoomController {
    fn supported_range(&self) -> Option<RangeInclusive<f32>> {
        Some(1.0..=self.max_zoom())
    }

    fn current_value(&self) -> f32 {
        *self.zoom.borrow()
    }

    async fn set_value(&self, value: f32) -> bool {
        if !(1.0..=self.max_zoom()).contains(&value) {
            log::warn!("Zoom {} outside 1.0..={}", value, self.max_zoom());
            return false;
        }
        let Some(sensor) = self.sensor() else {
            return false;
        };

        let crop = crop_region(sensor, value);
        self.core
            .write(
                "set zoom",
                |s| s.crop_region = Some(crop),
                || {
                    self.zoom.send_replace(value);
                    *self.crop.lock().unwrap_or_else(PoisonError::into_inner) = Some(crop);
                },
            )
            .await
    }

    fn value_stream(&self) -> watch::Receiver<f32> {
        self.zoom.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_region_at_2x() {
        let crop = crop_region(Rect::from_size(4000, 3000), 2.0);
        assert_eq!(crop, Rect::new(1000, 750, 3000, 2250));
        assert_eq!(crop.center(), (2000, 1500));
    }

    #[test]
    fn test_crop_region_at_1x_is_full_sensor() {
        let sensor = Rect::new(8, 8, 4008, 3008);
        assert_eq!(crop_region(sensor, 1.0), sensor);
        assert_eq!(crop_region(sensor, 0.5), sensor);
        assert_eq!(crop_region(sensor, f32::NAN), sensor);
    }
}
