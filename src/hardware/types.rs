//! Value types shared by the hardware interfaces: geometry, output targets and
//! the per-unit capability descriptor.

use std::ops::RangeInclusive;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::{AeMode, AfMode, AwbMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel rectangle in sensor coordinates. `right`/`bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (i32, i32) {
        (
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }
}

/// Weighted metering area used for AF/AE regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringRegion {
    pub rect: Rect,
    pub weight: u16,
}

impl MeteringRegion {
    pub const MAX_WEIGHT: u16 = 1000;

    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            weight: Self::MAX_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LensFacing {
    Front,
    Back,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    Preview,
    Still,
    Raw,
    Record,
}

/// One output a capture session writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputTarget {
    pub id: Uuid,
    pub kind: OutputKind,
    pub size: Size,
}

impl OutputTarget {
    pub fn new(kind: OutputKind, size: Size) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            size,
        }
    }
}

/// Host-owned preview surface. The orchestrator remembers the last one it was
/// given so preview can resume after a mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewTarget {
    pub id: Uuid,
    pub size: Size,
}

impl PreviewTarget {
    pub fn new(size: Size) -> Self {
        Self {
            id: Uuid::new_v4(),
            size,
        }
    }

    pub fn as_output(&self) -> OutputTarget {
        OutputTarget {
            id: self.id,
            kind: OutputKind::Preview,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareCapabilities {
    pub manual_sensor: bool,
    pub high_speed_video: bool,
    pub raw: bool,
}

/// Everything the hardware reports about one physical unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub physical_id: String,
    pub facing: LensFacing,
    /// Clockwise rotation of the sensor relative to the device's natural orientation.
    pub sensor_orientation: i32,
    pub active_array: Option<Rect>,
    pub max_digital_zoom: f32,
    pub flash_available: bool,
    pub ois_available: bool,
    pub hdr_scene_mode: bool,
    /// 35mm-equivalent focal lengths in millimetres.
    pub focal_lengths: Vec<f32>,
    pub apertures: Vec<f32>,
    pub compensation_range: Option<RangeInclusive<i32>>,
    /// EV per compensation unit.
    pub compensation_step: Option<f32>,
    pub sensitivity_range: Option<RangeInclusive<u32>>,
    pub exposure_time_range: Option<RangeInclusive<u64>>,
    pub ae_modes: Vec<AeMode>,
    pub af_modes: Vec<AfMode>,
    pub awb_modes: Vec<AwbMode>,
    pub max_af_regions: u32,
    pub jpeg_sizes: Vec<Size>,
    pub preview_sizes: Vec<Size>,
    pub raw_sizes: Vec<Size>,
    pub video_sizes: Vec<Size>,
    pub fps_ranges: Vec<u32>,
    pub capabilities: HardwareCapabilities,
}

impl CameraDescriptor {
    /// A bare descriptor: no controls, no outputs, 1x zoom.
    pub fn new(physical_id: impl Into<String>, facing: LensFacing) -> Self {
        Self {
            physical_id: physical_id.into(),
            facing,
            sensor_orientation: 0,
            active_array: None,
            max_digital_zoom: 1.0,
            flash_available: false,
            ois_available: false,
            hdr_scene_mode: false,
            focal_lengths: Vec::new(),
            apertures: Vec::new(),
            compensation_range: None,
            compensation_step: None,
            sensitivity_range: None,
            exposure_time_range: None,
            ae_modes: Vec::new(),
            af_modes: Vec::new(),
            awb_modes: Vec::new(),
            max_af_regions: 0,
            jpeg_sizes: Vec::new(),
            preview_sizes: Vec::new(),
            raw_sizes: Vec::new(),
            video_sizes: Vec::new(),
            fps_ranges: Vec::new(),
            capabilities: HardwareCapabilities::default(),
        }
    }

    pub fn max_resolution(&self) -> Option<Size> {
        self.active_array
            .map(|rect| Size::new(rect.width().max(0) as u32, rect.height().max(0) as u32))
    }
}

/// A frame delivered for an image-producing target of a one-shot request.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    pub target: Uuid,
    pub kind: OutputKind,
    pub data: Bytes,
}

/// Capture-completed acknowledgement for one submitted request.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    pub frame_number: u64,
    pub timestamp_ns: u64,
    pub images: Vec<CapturedImage>,
}

impl CaptureResult {
    pub fn image(&self, kind: OutputKind) -> Option<&CapturedImage> {
        self.images.iter().find(|image| image.kind == kind)
    }
}

/// Encoder parameters handed to the record pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoProfile {
    pub size: Size,
    pub fps: u32,
    pub bitrate: u32,
    pub orientation_hint: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_geometry() {
        let rect = Rect::new(100, 50, 4100, 3050);
        assert_eq!(rect.width(), 4000);
        assert_eq!(rect.height(), 3000);
        assert_eq!(rect.center(), (2100, 1550));
        assert!(rect.contains(&Rect::new(100, 50, 200, 60)));
        assert!(!rect.contains(&Rect::new(0, 50, 200, 60)));
    }

    #[test]
    fn size_ratio_handles_zero_height() {
        assert_eq!(Size::new(640, 0).aspect_ratio(), 0.0);
        assert!((Size::new(4000, 3000).aspect_ratio() - 4.0 / 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn preview_target_keeps_its_id_as_output() {
        let preview = PreviewTarget::new(Size::new(1440, 1080));
        let output = preview.as_output();
        assert_eq!(output.id, preview.id);
        assert_eq!(output.kind, OutputKind::Preview);
    }
}
