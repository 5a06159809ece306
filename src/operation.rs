//! Capability-gated controller routing
//!
//! [`OperationManager`] sits above the [`ControllerRegistry`]: it answers
//! which controllers make sense for a logical camera in a given mode, and
//! applies a [`CameraSettings`] bundle across controllers field by field.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityManager, CaptureMode, LogicalCameraId};
use crate::controller::{
    ControllerRegistry, FlashMode, FocusMode, HdrMode, ModeController, ParameterController,
    RangedController, WhiteBalanceMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ControllerType {
    Focus,
    Zoom,
    Exposure,
    Flash,
    WhiteBalance,
    Iso,
    ShutterSpeed,
    Ois,
    Hdr,
    SceneDetection,
    Video,
}

/// Settings applied together; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub focus_mode: Option<FocusMode>,
    pub zoom_ratio: Option<f32>,
    pub exposure_compensation: Option<i32>,
    pub flash_mode: Option<FlashMode>,
    pub white_balance: Option<WhiteBalanceMode>,
    pub iso: Option<u32>,
    pub shutter_speed_ns: Option<u64>,
    pub hdr_mode: Option<HdrMode>,
}

/// Which fields of a [`CameraSettings`] bundle took effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub failed: Vec<String>,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, field: &str, ok: bool) {
        if ok {
            self.applied.push(field.to_string());
        } else {
            log::warn!("Failed to apply {}", field);
            self.failed.push(field.to_string());
        }
    }
}

type CustomController = Arc<dyn Any + Send + Sync>;

pub struct OperationManager {
    registry: Arc<ControllerRegistry>,
    capabilities: Arc<CapabilityManager>,
    extra: RwLock<BTreeMap<ControllerType, Arc<dyn ParameterController>>>,
    custom: RwLock<HashMap<String, CustomController>>,
}

impl OperationManager {
    pub fn new(registry: Arc<ControllerRegistry>, capabilities: Arc<CapabilityManager>) -> Self {
        Self {
            registry,
            capabilities,
            extra: RwLock::new(BTreeMap::new()),
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Register a controller the registry does not own (scene detection,
    /// video). Registry-backed types cannot be overridden.
    pub fn register_controller(
        &self,
        controller_type: ControllerType,
        controller: Arc<dyn ParameterController>,
    ) -> bool {
        if Self::registry_backed(controller_type) {
            log::warn!("{:?} is owned by the controller registry", controller_type);
            return false;
        }
        self.extra
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(controller_type, controller);
        true
    }

    pub fn unregister_controller(&self, controller_type: ControllerType) {
        self.extra
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&controller_type);
    }

    pub fn register_custom<T>(&self, name: impl Into<String>, controller: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        self.custom
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), controller);
    }

    /// Typed lookup of a custom controller; `None` on a missing name or a
    /// type mismatch.
    pub fn custom<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let controller = self
            .custom
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()?;
        controller.downcast::<T>().ok()
    }

    fn registry_backed(controller_type: ControllerType) -> bool {
        !matches!(
            controller_type,
            ControllerType::SceneDetection | ControllerType::Video
        )
    }

    pub fn controller(&self, controller_type: ControllerType) -> Option<Arc<dyn ParameterController>> {
        let controller: Arc<dyn ParameterController> = match controller_type {
            ControllerType::Focus => self.registry.focus(),
            ControllerType::Zoom => self.registry.zoom(),
            ControllerType::Exposure => self.registry.exposure(),
            ControllerType::Flash => self.registry.flash(),
            ControllerType::WhiteBalance => self.registry.white_balance(),
            ControllerType::Iso => self.registry.iso(),
            ControllerType::ShutterSpeed => self.registry.shutter_speed(),
            ControllerType::Ois => self.registry.ois(),
            ControllerType::Hdr => self.registry.hdr(),
            ControllerType::SceneDetection | ControllerType::Video => {
                return self
                    .extra
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&controller_type)
                    .cloned();
            }
        };
        Some(controller)
    }

    pub fn is_controller_available(&self, controller_type: ControllerType) -> bool {
        self.controller(controller_type)
            .map(|controller| controller.is_supported())
            .unwrap_or(false)
    }

    pub fn get_available_controllers(
        &self,
        logical_id: LogicalCameraId,
        mode: CaptureMode,
    ) -> BTreeSet<ControllerType> {
        log::debug!("Query available controllers: {:?} in {:?}", logical_id, mode);
        let Some(capability) = self.capabilities.capability(logical_id) else {
            return BTreeSet::new();
        };

        let mut candidates = vec![ControllerType::Focus, ControllerType::Exposure];
        if capability.max_zoom > 1.0 {
            candidates.push(ControllerType::Zoom);
        }
        if capability.has_flash {
            candidates.push(ControllerType::Flash);
        }
        if capability.has_ois {
            candidates.push(ControllerType::Ois);
        }
        match mode {
            CaptureMode::Pro => candidates.extend([
                ControllerType::Iso,
                ControllerType::ShutterSpeed,
                ControllerType::WhiteBalance,
            ]),
            CaptureMode::Night => candidates.push(ControllerType::Hdr),
            mode if mode.is_video_family() => candidates.push(ControllerType::Video),
            _ => {}
        }
        candidates.push(ControllerType::SceneDetection);

        let available: BTreeSet<ControllerType> = candidates
            .into_iter()
            .filter(|controller_type| self.is_controller_available(*controller_type))
            .collect();
        log::debug!("Available controllers: {:?}", available);
        available
    }

    /// Apply every populated field. Each field is attempted even when an
    /// earlier one failed.
    pub async fn apply_camera_settings(&self, settings: &CameraSettings) -> ApplyReport {
        log::debug!("Applying camera settings: {:?}", settings);
        let mut report = ApplyReport::default();

        if let Some(mode) = settings.focus_mode {
            report.record("focus_mode", self.registry.focus().set_mode(mode).await);
        }
        if let Some(ratio) = settings.zoom_ratio {
            report.record("zoom_ratio", self.registry.zoom().set_value(ratio).await);
        }
        if let Some(compensation) = settings.exposure_compensation {
            report.record(
                "exposure_compensation",
                self.registry.exposure().set_value(compensation).await,
            );
        }
        if let Some(mode) = settings.flash_mode {
            report.record("flash_mode", self.registry.flash().set_mode(mode).await);
        }
        if let Some(mode) = settings.white_balance {
            report.record(
                "white_balance",
                self.registry.white_balance().set_mode(mode).await,
            );
        }
        if let Some(iso) = settings.iso {
            report.record("iso", self.registry.iso().set_value(iso).await);
        }
        if let Some(exposure_ns) = settings.shutter_speed_ns {
            report.record(
                "shutter_speed_ns",
                self.registry.shutter_speed().set_value(exposure_ns).await,
            );
        }
        if let Some(mode) = settings.hdr_mode {
            report.record("hdr_mode", self.registry.hdr().set_mode(mode).await);
        }
        report
    }

    /// Snapshot of the supported controllers' current values.
    pub fn current_settings(&self) -> CameraSettings {
        let focus = self.registry.focus();
        let zoom = self.registry.zoom();
        let exposure = self.registry.exposure();
        let flash = self.registry.flash();
        let white_balance = self.registry.white_balance();
        let iso = self.registry.iso();
        let shutter = self.registry.shutter_speed();
        let hdr = self.registry.hdr();

        CameraSettings {
            focus_mode: focus.is_supported().then(|| focus.current_mode()),
            zoom_ratio: zoom.is_supported().then(|| zoom.current_value()),
            exposure_compensation: exposure.is_supported().then(|| exposure.current_value()),
            flash_mode: flash.is_supported().then(|| flash.current_mode()),
            white_balance: white_balance
                .is_supported()
                .then(|| white_balance.current_mode()),
            iso: (iso.is_supported() && !iso.is_auto_mode()).then(|| iso.current_value()),
            shutter_speed_ns: (shutter.is_supported() && shutter.is_manual())
                .then(|| shutter.current_value()),
            hdr_mode: hdr.is_supported().then(|| hdr.current_mode()),
        }
    }
}
