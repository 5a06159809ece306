//! Synthetic frames and unit descriptors
//!
//! Frames are JPEG-shaped byte blobs (SOI marker, a small header carrying
//! frame number and exposure bias, gradient payload, EOI marker) so tests can
//! tell captures apart without decoding anything.

use bytes::{BufMut, Bytes, BytesMut};

use crate::hardware::{CameraDescriptor, HardwareCapabilities, LensFacing, Rect, Size};
use crate::request::{AeMode, AfMode, AwbMode};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const PAYLOAD_LEN: usize = 256;

/// A synthetic still frame for `size`, tagged with its frame number and the
/// exposure compensation it was taken at.
pub fn synthetic_jpeg_frame(frame_number: u64, size: Size, compensation: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(PAYLOAD_LEN + 24);
    buf.put_slice(&SOI);
    buf.put_u64(frame_number);
    buf.put_i32(compensation);
    buf.put_u32(size.width);
    buf.put_u32(size.height);

    // Brightness follows the exposure bias, the gradient follows the frame.
    let base = (128 + compensation * 32).clamp(0, 255) as u8;
    let shift = (frame_number % 256) as u8;
    for i in 0..PAYLOAD_LEN {
        buf.put_u8(base.wrapping_add(shift).wrapping_add(i as u8 / 8));
    }
    buf.put_slice(&EOI);
    buf.freeze()
}

/// Frame number and compensation encoded by [`synthetic_jpeg_frame`].
pub fn frame_tag(data: &[u8]) -> Option<(u64, i32)> {
    if data.len() < 14 || data[..2] != SOI {
        return None;
    }
    let frame = u64::from_be_bytes(data[2..10].try_into().ok()?);
    let compensation = i32::from_be_bytes(data[10..14].try_into().ok()?);
    Some((frame, compensation))
}

/// Back main unit "0": 4000x3000 array, 4x digital zoom, flash, manual
/// sensor, full AE/AF/AWB tables.
pub fn back_main_descriptor() -> CameraDescriptor {
    let mut descriptor = CameraDescriptor::new("0", LensFacing::Back);
    descriptor.sensor_orientation = 90;
    descriptor.active_array = Some(Rect::from_size(4000, 3000));
    descriptor.max_digital_zoom = 4.0;
    descriptor.flash_available = true;
    descriptor.ois_available = true;
    descriptor.hdr_scene_mode = true;
    descriptor.focal_lengths = vec![50.0];
    descriptor.apertures = vec![1.8];
    descriptor.compensation_range = Some(-12..=12);
    descriptor.compensation_step = Some(1.0 / 6.0);
    descriptor.sensitivity_range = Some(100..=3200);
    descriptor.exposure_time_range = Some(100_000..=500_000_000);
    descriptor.ae_modes = vec![
        AeMode::Off,
        AeMode::On,
        AeMode::OnAutoFlash,
        AeMode::OnAlwaysFlash,
        AeMode::OnAutoFlashRedEye,
    ];
    descriptor.af_modes = vec![
        AfMode::Off,
        AfMode::Auto,
        AfMode::Macro,
        AfMode::ContinuousVideo,
        AfMode::ContinuousPicture,
    ];
    descriptor.awb_modes = vec![
        AwbMode::Auto,
        AwbMode::Incandescent,
        AwbMode::Fluorescent,
        AwbMode::Daylight,
        AwbMode::CloudyDaylight,
        AwbMode::Shade,
    ];
    descriptor.max_af_regions = 1;
    descriptor.jpeg_sizes = vec![
        Size::new(4000, 3000),
        Size::new(4000, 2250),
        Size::new(1920, 1080),
        Size::new(1600, 1200),
    ];
    descriptor.preview_sizes = vec![Size::new(1440, 1080), Size::new(1920, 1080)];
    descriptor.raw_sizes = vec![Size::new(4000, 3000)];
    descriptor.video_sizes = vec![
        Size::new(3840, 2160),
        Size::new(1920, 1080),
        Size::new(1280, 720),
    ];
    descriptor.fps_ranges = vec![30, 60];
    descriptor.capabilities = HardwareCapabilities {
        manual_sensor: true,
        high_speed_video: false,
        raw: true,
    };
    descriptor
}

/// Front unit "1": fixed focus, no flash, no manual sensor.
pub fn front_descriptor() -> CameraDescriptor {
    let mut descriptor = CameraDescriptor::new("1", LensFacing::Front);
    descriptor.sensor_orientation = 270;
    descriptor.active_array = Some(Rect::from_size(3264, 2448));
    descriptor.max_digital_zoom = 1.0;
    descriptor.focal_lengths = vec![2.9];
    descriptor.apertures = vec![2.2];
    descriptor.compensation_range = Some(-6..=6);
    descriptor.compensation_step = Some(1.0 / 3.0);
    descriptor.ae_modes = vec![AeMode::On];
    descriptor.af_modes = vec![AfMode::Off];
    descriptor.awb_modes = vec![AwbMode::Auto, AwbMode::Daylight];
    descriptor.jpeg_sizes = vec![Size::new(3264, 2448), Size::new(1920, 1080)];
    descriptor.preview_sizes = vec![Size::new(1440, 1080)];
    descriptor.video_sizes = vec![Size::new(1920, 1080)];
    descriptor.fps_ranges = vec![30];
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_frame_carries_its_tag() {
        let frame = synthetic_jpeg_frame(7, Size::new(4000, 3000), -2);
        assert_eq!(&frame[..2], &SOI);
        assert_eq!(&frame[frame.len() - 2..], &EOI);
        assert_eq!(frame_tag(&frame), Some((7, -2)));
    }

    #[test]
    fn test_synthetic_frames_differ() {
        let frame0 = synthetic_jpeg_frame(0, Size::new(320, 240), 0);
        let frame1 = synthetic_jpeg_frame(1, Size::new(320, 240), 0);
        assert_ne!(frame0, frame1);
        assert_eq!(frame_tag(b"not a frame"), None);
    }

    #[test]
    fn test_presets_classify_as_expected() {
        use crate::capability::{classify, LogicalCameraId};

        assert_eq!(classify(&back_main_descriptor()), LogicalCameraId::Main);
        assert_eq!(classify(&front_descriptor()), LogicalCameraId::Front);
    }
}
