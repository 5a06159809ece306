//! Camera discovery and logical-role mapping
//!
//! Every physical unit is classified into a stable [`LogicalCameraId`] by its
//! facing and focal length, and summarized as an immutable
//! [`CameraCapability`] snapshot. Application logic addresses cameras by role;
//! the physical id behind a role may differ from device to device.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::errors::CameraError;
use crate::hardware::{CameraDescriptor, CameraProvider, LensFacing, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogicalCameraId {
    Main,
    Front,
    WideAngle,
    UltraWide,
    Telephoto,
    Macro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CaptureMode {
    Photo,
    Video,
    Night,
    Portrait,
    Panorama,
    SlowMotion,
    TimeLapse,
    Pro,
    Macro,
    WideAngle,
    Telephoto,
    UltraWide,
    DualCamera,
    AiBeauty,
    Document,
    QrCode,
    ArSticker,
    LiveFocus,
    SuperResolution,
}

impl CaptureMode {
    /// Modes that drive the record pipeline.
    pub fn is_video_family(&self) -> bool {
        matches!(
            self,
            CaptureMode::Video | CaptureMode::SlowMotion | CaptureMode::TimeLapse
        )
    }
}

/// Immutable per-camera snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCapability {
    pub logical_id: LogicalCameraId,
    pub physical_id: String,
    pub facing: LensFacing,
    pub supported_modes: BTreeSet<CaptureMode>,
    pub max_zoom: f32,
    pub has_flash: bool,
    pub has_ois: bool,
    pub has_eis: bool,
    pub max_resolution: Size,
    pub supported_video_sizes: Vec<Size>,
    pub supported_fps: Vec<u32>,
    pub aperture: Option<f32>,
    pub focal_length: Option<f32>,
    pub sensor_size: Option<Size>,
}

impl CameraCapability {
    pub fn supports(&self, mode: CaptureMode) -> bool {
        self.supported_modes.contains(&mode)
    }

    pub fn is_ultra_wide(&self) -> bool {
        self.logical_id == LogicalCameraId::UltraWide
    }

    pub fn is_telephoto(&self) -> bool {
        self.logical_id == LogicalCameraId::Telephoto
    }

    pub fn is_macro(&self) -> bool {
        self.logical_id == LogicalCameraId::Macro
    }
}

const DEFAULT_RESOLUTION: Size = Size::new(1920, 1080);
const DEFAULT_VIDEO_SIZES: [Size; 2] = [Size::new(1920, 1080), Size::new(1280, 720)];
const DEFAULT_FPS: [u32; 2] = [30, 60];

/// Facing first, then focal length buckets, then the positional table.
pub fn classify(descriptor: &CameraDescriptor) -> LogicalCameraId {
    match descriptor.facing {
        LensFacing::Front => LogicalCameraId::Front,
        LensFacing::External => LogicalCameraId::Main,
        LensFacing::Back => match descriptor.focal_lengths.first() {
            Some(&focal) if focal < 20.0 => LogicalCameraId::UltraWide,
            Some(&focal) if focal > 80.0 => LogicalCameraId::Telephoto,
            Some(&focal) if (20.0..=35.0).contains(&focal) => LogicalCameraId::WideAngle,
            Some(_) => LogicalCameraId::Main,
            None => match descriptor.physical_id.as_str() {
                "2" => LogicalCameraId::UltraWide,
                "3" => LogicalCameraId::Telephoto,
                "4" => LogicalCameraId::Macro,
                _ => LogicalCameraId::Main,
            },
        },
    }
}

fn seeded_modes(descriptor: &CameraDescriptor, logical_id: LogicalCameraId) -> BTreeSet<CaptureMode> {
    use CaptureMode::*;

    let mut modes: BTreeSet<CaptureMode> = [Photo, Video].into_iter().collect();
    let role_modes: &[CaptureMode] = match logical_id {
        LogicalCameraId::Main => &[Night, Portrait, Pro, Panorama, TimeLapse, AiBeauty],
        LogicalCameraId::UltraWide => &[UltraWide, Panorama, WideAngle],
        LogicalCameraId::Telephoto => &[Telephoto, Portrait, SuperResolution],
        LogicalCameraId::Macro => &[Macro],
        LogicalCameraId::Front => &[Portrait, AiBeauty, ArSticker],
        LogicalCameraId::WideAngle => &[],
    };
    modes.extend(role_modes.iter().copied());

    if descriptor.capabilities.manual_sensor {
        modes.insert(Pro);
    }
    if descriptor.capabilities.high_speed_video {
        modes.insert(SlowMotion);
    }
    modes
}

pub fn build_capability(descriptor: &CameraDescriptor) -> CameraCapability {
    let logical_id = classify(descriptor);
    let sensor_size = descriptor.max_resolution();

    CameraCapability {
        logical_id,
        physical_id: descriptor.physical_id.clone(),
        facing: descriptor.facing,
        supported_modes: seeded_modes(descriptor, logical_id),
        max_zoom: descriptor.max_digital_zoom,
        has_flash: descriptor.flash_available,
        has_ois: descriptor.ois_available,
        has_eis: false,
        max_resolution: sensor_size.unwrap_or(DEFAULT_RESOLUTION),
        supported_video_sizes: if descriptor.video_sizes.is_empty() {
            DEFAULT_VIDEO_SIZES.to_vec()
        } else {
            descriptor.video_sizes.clone()
        },
        supported_fps: if descriptor.fps_ranges.is_empty() {
            DEFAULT_FPS.to_vec()
        } else {
            descriptor.fps_ranges.clone()
        },
        aperture: descriptor.apertures.first().copied(),
        focal_length: descriptor.focal_lengths.first().copied(),
        sensor_size,
    }
}

/// Discovers units once and answers role/mode questions about them.
#[derive(Default)]
pub struct CapabilityManager {
    cameras: RwLock<BTreeMap<LogicalCameraId, CameraCapability>>,
}

impl CapabilityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate every unit. A unit that cannot be described is skipped; when
    /// two units land on the same role the first one keeps it.
    pub async fn discover_cameras(&self, provider: &dyn CameraProvider) -> Result<usize, CameraError> {
        let ids = provider.camera_ids().await.map_err(|e| {
            log::error!("Failed to discover cameras: {}", e);
            CameraError::from(e)
        })?;
        log::debug!("Found {} cameras: {}", ids.len(), ids.join(", "));

        let mut discovered = BTreeMap::new();
        for id in ids {
            let descriptor = match provider.describe(&id).await {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    log::warn!("Skipping camera {}: {}", id, e);
                    continue;
                }
            };
            let capability = build_capability(&descriptor);
            let logical_id = capability.logical_id;
            if discovered.contains_key(&logical_id) {
                log::warn!(
                    "Camera {} also classifies as {:?}; keeping the first unit",
                    id,
                    logical_id
                );
                continue;
            }
            log::debug!("Mapped camera {} to {:?}", id, logical_id);
            discovered.insert(logical_id, capability);
        }

        let count = discovered.len();
        *self.cameras.write().unwrap_or_else(PoisonError::into_inner) = discovered;
        Ok(count)
    }

    pub fn is_discovered(&self) -> bool {
        !self
            .cameras
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn available_cameras(&self) -> BTreeMap<LogicalCameraId, CameraCapability> {
        self.cameras
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn capability(&self, logical_id: LogicalCameraId) -> Option<CameraCapability> {
        self.cameras
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&logical_id)
            .cloned()
    }

    pub fn physical_camera_id(&self, logical_id: LogicalCameraId) -> Option<String> {
        let id = self.capability(logical_id).map(|c| c.physical_id);
        log::debug!("physical_camera_id({:?}) -> {:?}", logical_id, id);
        id
    }

    pub fn cameras_for_mode(&self, mode: CaptureMode) -> Vec<LogicalCameraId> {
        self.cameras
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, capability)| capability.supports(mode))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_mode_supported(&self, logical_id: LogicalCameraId, mode: CaptureMode) -> bool {
        self.capability(logical_id)
            .map(|c| c.supports(mode))
            .unwrap_or(false)
    }

    pub fn best_camera_for_mode(&self, mode: CaptureMode) -> LogicalCameraId {
        let cameras = self.cameras.read().unwrap_or_else(PoisonError::into_inner);
        let preferred: &[LogicalCameraId] = match mode {
            CaptureMode::UltraWide => &[LogicalCameraId::UltraWide],
            CaptureMode::Telephoto => &[LogicalCameraId::Telephoto],
            CaptureMode::Macro => &[LogicalCameraId::Macro],
            CaptureMode::WideAngle => &[LogicalCameraId::WideAngle],
            CaptureMode::Portrait => &[LogicalCameraId::Telephoto, LogicalCameraId::Main],
            _ => &[],
        };
        let best = preferred
            .iter()
            .copied()
            .find(|id| cameras.contains_key(id))
            .unwrap_or(LogicalCameraId::Main);
        log::debug!("best_camera_for_mode({:?}) -> {:?}", mode, best);
        best
    }

    /// Preferred role for a facing: FRONT for front units, MAIN otherwise,
    /// falling back to any unit with that facing.
    pub fn camera_for_facing(&self, facing: LensFacing) -> Option<LogicalCameraId> {
        let cameras = self.cameras.read().unwrap_or_else(PoisonError::into_inner);
        let preferred = match facing {
            LensFacing::Front => LogicalCameraId::Front,
            _ => LogicalCameraId::Main,
        };
        if cameras.contains_key(&preferred) {
            return Some(preferred);
        }
        cameras
            .values()
            .find(|capability| capability.facing == facing)
            .map(|capability| capability.logical_id)
    }
}
