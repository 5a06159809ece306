use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::base::{ControllerCore, ControllerHooks, DeviceContext};
use super::{ControllerKind, ModeController};
use crate::errors::CameraError;
use crate::request::AwbMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhiteBalanceMode {
    Auto,
    Daylight,
    Cloudy,
    Shade,
    Tungsten,
    Fluorescent,
    WarmFluorescent,
}

const ALL_MODES: [WhiteBalanceMode; 7] = [
    WhiteBalanceMode::Auto,
    WhiteBalanceMode::Daylight,
    WhiteBalanceMode::Cloudy,
    WhiteBalanceMode::Shade,
    WhiteBalanceMode::Tungsten,
    WhiteBalanceMode::Fluorescent,
    WhiteBalanceMode::WarmFluorescent,
];

const COMMON_CYCLE: [WhiteBalanceMode; 4] = [
    WhiteBalanceMode::Auto,
    WhiteBalanceMode::Daylight,
    WhiteBalanceMode::Cloudy,
    WhiteBalanceMode::Tungsten,
];

impl WhiteBalanceMode {
    pub fn awb_mode(self) -> AwbMode {
        match self {
            WhiteBalanceMode::Auto => AwbMode::Auto,
            WhiteBalanceMode::Daylight => AwbMode::Daylight,
            WhiteBalanceMode::Cloudy => AwbMode::CloudyDaylight,
            WhiteBalanceMode::Shade => AwbMode::Shade,
            WhiteBalanceMode::Tungsten => AwbMode::Incandescent,
            WhiteBalanceMode::Fluorescent => AwbMode::Fluorescent,
            WhiteBalanceMode::WarmFluorescent => AwbMode::WarmFluorescent,
        }
    }

    pub fn color_temperature_description(self) -> &'static str {
        match self {
            WhiteBalanceMode::Auto => "Auto",
            WhiteBalanceMode::Daylight => "5200K",
            WhiteBalanceMode::Cloudy => "6000K",
            WhiteBalanceMode::Shade => "7000K",
            WhiteBalanceMode::Tungsten => "3200K",
            WhiteBalanceMode::Fluorescent => "4000K",
            WhiteBalanceMode::WarmFluorescent => "2700K",
        }
    }
}

pub struct WhiteBalanceController {
    core: ControllerCore,
    mode: watch::Sender<WhiteBalanceMode>,
}

impl WhiteBalanceController {
    pub fn new(context: DeviceContext) -> Self {
        let available = &context.descriptor.awb_modes;
        let initial = ALL_MODES
            .iter()
            .copied()
            .find(|mode| available.contains(&mode.awb_mode()))
            .unwrap_or(WhiteBalanceMode::Auto);
        Self {
            core: ControllerCore::new(ControllerKind::WhiteBalance, context),
            mode: watch::channel(initial).0,
        }
    }

    pub fn color_temperature_description(&self) -> &'static str {
        self.current_mode().color_temperature_description()
    }

    /// AUTO, DAYLIGHT, CLOUDY, TUNGSTEN and around again.
    pub async fn toggle_common_modes(&self) -> bool {
        let supported = self.supported_modes();
        let cycle: Vec<WhiteBalanceMode> = COMMON_CYCLE
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
}

#[async_trait]
impl ControllerHooks for WhiteBalanceController {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn check_support(&self) -> bool {
        !self.supported_modes().is_empty()
    }

    fn check_enabled(&self) -> bool {
        self.current_mode() != WhiteBalanceMode::Auto
    }

    async fn on_initialize(&self) -> Result<(), CameraError> {
        let awb = self.current_mode().awb_mode();
        self.core.submit(|s| s.awb_mode = Some(awb)).await
    }

    async fn on_reset(&self) -> Result<(), CameraError> {
        let neutral = if self.supported_modes().contains(&WhiteBalanceMode::Auto) {
            WhiteBalanceMode::Auto
        } else {
            self.current_mode()
        };
        self.core.submit(|s| s.awb_mode = Some(neutral.awb_mode())).await?;
        self.mode.send_replace(neutral);
        Ok(())
    }
}

#[async_trait]
impl ModeController<WhiteBalanceMode> for WhiteBalanceController {
    fn supported_modes(&self) -> Vec<WhiteBalanceMode> {
        let available = &self.core.descriptor().awb_modes;
        ALL_MODES
            .iter()
            .copied()
            .filter(|mode| available.contains(&mode.awb_mode()))
            .collect()
    }

    fn current_mode(&self) -> WhiteBalanceMode {
        *self.mode.borrow()
    }

    async fn set_mode(&self, mode: WhiteBalanceMode) -> bool {
        if !self.supported_modes().contains(&mode) {
            log::warn!("White balance {:?} not supported", mode);
            return false;
        }
        let awb = mode.awb_mode();
        self.core
            .write("set white balance", |s| s.awb_mode = Some(awb), || {
                self.mode.send_replace(mode);
            })
            .await
    }

    fn mode_stream(&self) -> watch::Receiver<WhiteBalanceMode> {
        self.mode.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_temperatures() {
        assert_eq!(WhiteBalanceMode::Daylight.color_temperature_description(), "5200K");
        assert_eq!(WhiteBalanceMode::Tungsten.color_temperature_description(), "3200K");
        assert_eq!(WhiteBalanceMode::Auto.color_temperature_description(), "Auto");
    }

    #[test]
    fn test_mode_table_maps_cloudy_and_tungsten() {
        assert_eq!(WhiteBalanceMode::Cloudy.awb_mode(), AwbMode::CloudyDaylight);
        assert_eq!(WhiteBalanceMode::Tungsten.awb_mode(), AwbMode::Incandescent);
    }
}
