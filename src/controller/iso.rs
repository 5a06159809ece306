use std::ops::RangeInclusive;

use async_trait::async_trait;
use tokio::sync::watch;

use super::base::{ControllerCore, ControllerHooks, DeviceContext};
use super::{ControllerKind, RangedController};
use crate::errors::CameraError;
use crate::request::{AeMode, RequestSettings};

pub const COMMON_ISO_VALUES: [u32; 7] = [100, 200, 400, 800, 1600, 3200, 6400];

/// Drop the sensitivity pin. AE stays off while a manual exposure time is
/// still pinned; otherwise the mode's own AE settings apply again.
fn release_manual_exposure(settings: &mut RequestSettings) {
    settings.sensitivity = None;
    if settings.ae_mode == Some(AeMode::Off) && settings.exposure_time_ns.is_none() {
        settings.ae_mode = None;
    }
}

/// Sensor sensitivity. Auto hands exposure back to the device; any manual
/// value switches AE off and pins the sensitivity.
pub struct IsoController {
    core: ControllerCore,
    iso: watch::Sender<u32>,
    auto: watch::Sender<bool>,
}

impl IsoController {
    pub fn new(context: DeviceContext) -> Self {
        let initial = context
            .descriptor
            .sensitivity_range
            .as_ref()
            .map(|range| 100u32.clamp(*range.start(), *range.end()))
            .unwrap_or(100);
        Self {
            core: ControllerCore::new(ControllerKind::Iso, context),
            iso: watch::channel(initial).0,
            auto: watch::channel(true).0,
        }
    }

    pub fn is_auto_mode(&self) -> bool {
        *self.auto.borrow()
    }

    pub fn auto_mode_stream(&self) -> watch::Receiver<bool> {
        self.auto.subscribe()
    }

    pub async fn set_auto_mode(&self, auto: bool) -> bool {
        if !auto {
            return self.set_value(self.current_value()).await;
        }
        self.core
            .write(
                "enable auto ISO",
                release_manual_exposure,
                || {
                    self.auto.send_replace(true);
                },
            )
            .await
    }

    /// The fixed ladder filtered to what the sensor supports.
    pub fn common_iso_values(&self) -> Vec<u32> {
        match self.supported_range() {
            Some(range) => COMMON_ISO_VALUES
                .iter()
                .copied()
                .filter(|iso| range.contains(iso))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Cycle to the next ladder value, wrapping back to the lowest.
    pub async fn set_next_common_value(&self) -> bool {
        let ladder = self.common_iso_values();
        let current = self.current_value();
        let Some(&first) = ladder.first() else {
            return false;
        };
        let next = ladder
            .iter()
            .copied()
            .find(|iso| *iso > current)
            .unwrap_or(first);
        self.set_value(next).await
    }

    pub async fn increase_iso(&self) -> bool {
        let current = self.current_value();
        match self.common_iso_values().into_iter().find(|iso| *iso > current) {
            Some(next) => self.set_value(next).await,
            None => false,
        }
    }

    pub async fn decrease_iso(&self) -> bool {
        let current = self.current_value();
        match self
            .common_iso_values()
            .into_iter()
            .rev()
            .find(|iso| *iso < current)
        {
            Some(next) => self.set_value(next).await,
            None => false,
        }
    }
}

#[async_trait]
impl ControllerHooks for IsoController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn check_support(&self) -> bool {
        self.core.descriptor().sensitivity_range.is_some()
    }

    fn check_enabled(&self) -> bool {
        !self.is_auto_mode()
    }

    async fn on_initialize(&self) -> Result<(), CameraError> {
        let auto = self.is_auto_mode();
        let iso = self.current_value();
        self.core
            .submit(|s| {
                if auto {
                    release_manual_exposure(s);
                } else {
                    s.ae_mode = Some(AeMode::Off);
                    s.sensitivity = Some(iso);
                }
            })
            .await
    }

    async fn on_reset(&self) -> Result<(), CameraError> {
        self.core.submit(release_manual_exposure).await?;
        self.auto.send_replace(true);
        Ok(())
    }
}

#[async_trait]
impl RangedController<u32> for IsoController {
    fn supported_range(&self) -> Option<RangeInclusive<u32>> {
        self.core.descriptor().sensitivity_range.clone()
    }

    fn current_value(&self) -> u32 {
        *self.iso.borrow()
    }

    async fn set_value(&self, value: u32) -> bool {
        match self.supported_range() {
            Some(range) if range.contains(&value) => {}
            _ => {
                log::warn!("ISO {} outside supported range", value);
                return false;
            }
        }
        self.core
            .write(
                "set ISO",
                |s| {
                    s.ae_mode = Some(AeMode::Off);
                    s.sensitivity = Some(value);
                },
                || {
                    self.iso.send_replace(value);
                    self.auto.send_replace(false);
                },
            )
            .await
    }

    fn value_stream(&self) -> watch::Receiver<u32> {
        self.iso.subscribe()
    }
}
