use std::fmt;

use crate::hardware::HardwareError;

#[derive(Debug, Clone, PartialEq)]
pub enum CameraError {
    InitializationError(String),
    PermissionDenied(String),
    Timeout(String),
    CaptureError(String),
    ControlError(String),
    SessionError(String),
    RecordingError(String),
    UnsupportedOperation(String),
    ResourceUnavailable(String),
    ConfigError(String),
    IoError(String),
    Closed,
}

impl CameraError {
    /// Device-open failures that the orchestrator may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CameraError::Timeout(_) | CameraError::PermissionDenied(_))
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CameraError::InitializationError(msg) => write!(f, "Camera initialization error: {}", msg),
            CameraError::PermissionDenied(msg) => write!(f, "Permission denied error: {}", msg),
            CameraError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CameraError::CaptureError(msg) => write!(f, "Capture error: {}", msg),
            CameraError::ControlError(msg) => write!(f, "Camera control error: {}", msg),
            CameraError::SessionError(msg) => write!(f, "Capture session error: {}", msg),
            CameraError::RecordingError(msg) => write!(f, "Recording error: {}", msg),
            CameraError::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {}", msg),
            CameraError::ResourceUnavailable(msg) => write!(f, "Resource unavailable: {}", msg),
            CameraError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            CameraError::IoError(msg) => write!(f, "IO error: {}", msg),
            CameraError::Closed => write!(f, "Camera core is closed"),
        }
    }
}

impl std::error::Error for CameraError {}

impl From<HardwareError> for CameraError {
    fn from(error: HardwareError) -> Self {
        match error {
            HardwareError::Timeout(msg) => CameraError::Timeout(msg),
            HardwareError::PermissionDenied(msg) => CameraError::PermissionDenied(msg),
            HardwareError::Unavailable(msg) | HardwareError::Disconnected(msg) => {
                CameraError::ResourceUnavailable(msg)
            }
            HardwareError::Rejected(msg) => CameraError::ControlError(msg),
            HardwareError::InvalidConfiguration(msg) => CameraError::SessionError(msg),
        }
    }
}

impl From<std::io::Error> for CameraError {
    fn from(error: std::io::Error) -> Self {
        CameraError::IoError(error.to_string())
    }
}
