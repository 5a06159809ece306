//! Hardware seams consumed by the core
//!
//! The core never talks to a camera stack directly. A host supplies
//! implementations of these traits (a platform backend in production,
//! `crate::testing` stand-ins in tests):
//!
//! - [`CameraProvider`]: enumerate physical units and describe their capabilities
//! - [`CameraBackend`] / [`CameraDevice`] / [`CaptureSession`]: open a unit,
//!   negotiate sessions and submit one-shot or repeating requests
//! - [`MediaRecorder`] / [`RecordPipeline`]: the video record pipeline whose
//!   input surface is itself a session output
//! - [`OrientationSource`]: current device rotation for output tagging

mod slot;
mod types;

pub use slot::HandleSlot;
pub use types::{
    CameraDescriptor, CaptureResult, CapturedImage, HardwareCapabilities, LensFacing,
    MeteringRegion, OutputKind, OutputTarget, PreviewTarget, Rect, SessionId, Size,
    VideoProfile,
};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::request::CaptureRequest;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HardwareError {
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device disconnected: {0}")]
    Disconnected(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("invalid session configuration: {0}")]
    InvalidConfiguration(String),
    #[error("hardware unavailable: {0}")]
    Unavailable(String),
}

impl HardwareError {
    /// Only timeouts and permission failures are worth another open attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HardwareError::Timeout(_) | HardwareError::PermissionDenied(_)
        )
    }
}

/// Capability interface: which units exist and what each can do.
#[async_trait]
pub trait CameraProvider: Send + Sync {
    async fn camera_ids(&self) -> Result<Vec<String>, HardwareError>;

    async fn describe(&self, physical_id: &str) -> Result<CameraDescriptor, HardwareError>;
}

/// Session interface entry point.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Resolves once the device-opened acknowledgement arrives.
    async fn open(&self, physical_id: &str) -> Result<Arc<dyn CameraDevice>, HardwareError>;
}

#[async_trait]
pub trait CameraDevice: Send + Sync {
    fn physical_id(&self) -> &str;

    /// Resolves once the session-configured acknowledgement arrives.
    async fn create_session(
        &self,
        outputs: Vec<OutputTarget>,
    ) -> Result<Arc<dyn CaptureSession>, HardwareError>;

    async fn close(&self);
}

#[async_trait]
pub trait CaptureSession: Send + Sync {
    fn id(&self) -> SessionId;

    fn outputs(&self) -> Vec<OutputTarget>;

    /// Submit a one-shot request and wait for its capture-completed signal.
    async fn capture(&self, request: CaptureRequest) -> Result<CaptureResult, HardwareError>;

    async fn capture_burst(
        &self,
        requests: Vec<CaptureRequest>,
    ) -> Result<Vec<CaptureResult>, HardwareError> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.capture(request).await?);
        }
        Ok(results)
    }

    /// Replace the standing request. Resolves when the hardware accepted it.
    async fn set_repeating_request(&self, request: CaptureRequest) -> Result<(), HardwareError>;

    async fn stop_repeating(&self) -> Result<(), HardwareError>;

    async fn close(&self);
}

#[async_trait]
pub trait MediaRecorder: Send + Sync {
    /// Prepare a pipeline writing into `output`. The returned pipeline's
    /// target must be part of the session before `start` is called.
    async fn prepare(
        &self,
        output: &Path,
        profile: &VideoProfile,
    ) -> Result<Box<dyn RecordPipeline>, HardwareError>;
}

#[async_trait]
pub trait RecordPipeline: Send + Sync {
    fn target(&self) -> OutputTarget;

    async fn start(&mut self) -> Result<(), HardwareError>;

    /// Finalize the output file.
    async fn stop(&mut self) -> Result<(), HardwareError>;

    async fn release(&mut self);
}

pub trait OrientationSource: Send + Sync {
    /// Current device rotation in degrees, any value in `0..360`.
    fn rotation_degrees(&self) -> Result<i32, HardwareError>;
}

/// Snap a raw rotation reading to the nearest quarter turn.
pub fn snap_rotation(degrees: i32) -> i32 {
    match degrees.rem_euclid(360) {
        d if !(45..315).contains(&d) => 0,
        d if d < 135 => 90,
        d if d < 225 => 180,
        _ => 270,
    }
}

/// Orientation tag for still output: sensor orientation combined with the
/// device rotation, mirrored for front-facing units. Sensor failures count as 0.
pub fn output_orientation(descriptor: &CameraDescriptor, source: &dyn OrientationSource) -> i32 {
    let rotation = match source.rotation_degrees() {
        Ok(degrees) => snap_rotation(degrees),
        Err(e) => {
            log::warn!("Orientation unavailable, defaulting to 0: {}", e);
            0
        }
    };
    let sensor = descriptor.sensor_orientation.rem_euclid(360);
    if descriptor.facing == LensFacing::Front {
        (sensor + rotation) % 360
    } else {
        (sensor - rotation + 360) % 360
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rotation(Result<i32, HardwareError>);

    impl OrientationSource for Rotation {
        fn rotation_degrees(&self) -> Result<i32, HardwareError> {
            self.0.clone()
        }
    }

    #[test]
    fn test_snap_rotation_buckets() {
        assert_eq!(snap_rotation(0), 0);
        assert_eq!(snap_rotation(320), 0);
        assert_eq!(snap_rotation(44), 0);
        assert_eq!(snap_rotation(45), 90);
        assert_eq!(snap_rotation(180), 180);
        assert_eq!(snap_rotation(250), 270);
        assert_eq!(snap_rotation(-90), 270);
    }

    #[test]
    fn test_output_orientation_back_and_front() {
        let mut back = CameraDescriptor::new("0", LensFacing::Back);
        back.sensor_orientation = 90;
        let mut front = CameraDescriptor::new("1", LensFacing::Front);
        front.sensor_orientation = 270;

        assert_eq!(output_orientation(&back, &Rotation(Ok(0))), 90);
        assert_eq!(output_orientation(&back, &Rotation(Ok(90))), 0);
        assert_eq!(output_orientation(&front, &Rotation(Ok(90))), 0);
        assert_eq!(output_orientation(&front, &Rotation(Ok(180))), 90);
    }

    #[test]
    fn test_orientation_failure_defaults_to_zero_rotation() {
        let mut back = CameraDescriptor::new("0", LensFacing::Back);
        back.sensor_orientation = 90;
        let failing = Rotation(Err(HardwareError::Unavailable("no sensor".into())));
        assert_eq!(output_orientation(&back, &failing), 90);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(HardwareError::Timeout("open".into()).is_retryable());
        assert!(HardwareError::PermissionDenied("open".into()).is_retryable());
        assert!(!HardwareError::Rejected("bad".into()).is_retryable());
        assert!(!HardwareError::Disconnected("gone".into()).is_retryable());
    }
}
