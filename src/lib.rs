//! lenscore: per-device camera control core
//!
//! This crate coordinates one camera device: opening it, negotiating capture
//! sessions, keeping a set of independently stateful parameter controllers in
//! step with the hardware, and running pluggable capture-mode pipelines.
//!
//! # Features
//! - Device lifecycle with bounded, backed-off open retries
//! - Controllers for zoom, exposure, focus, ISO, white balance, flash,
//!   shutter speed, HDR and stabilization, each publishing its state
//! - Photo (single/burst/HDR/RAW/night/portrait), video and multi-frame
//!   night mode handlers
//! - Capability discovery and capability-gated controller routing
//! - Simulated hardware for offline testing
//!
//! # Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use lenscore::{OrchestratorBuilder, hardware::{PreviewTarget, Size}};
//!
//! let core = OrchestratorBuilder::new(provider, backend, store, orientation, recorder)
//!     .config(lenscore::CoreConfig::load_or_default())
//!     .build()?;
//! core.initialize().await?;
//! core.start_preview(PreviewTarget::new(Size::new(1440, 1080))).await?;
//! core.set_zoom(2.0).await;
//! let photo = core.capture().await?;
//! ```

pub mod capability;
pub mod config;
pub mod controller;
pub mod errors;
pub mod hardware;
pub mod invariants;
pub mod mode;
pub mod operation;
pub mod orchestrator;
pub mod request;
pub mod storage;

// Testing utilities - simulated hardware for offline testing
pub mod testing;

// Re-exports for convenience
pub use capability::{CameraCapability, CapabilityManager, CaptureMode, LogicalCameraId};
pub use config::CoreConfig;
pub use controller::{
    ControllerKind, ControllerRegistry, ControllerState, ManagerState, ModeController,
    ParameterController, RangedController,
};
pub use errors::CameraError;
pub use mode::{FrameFusion, HandlerState, ModeHandler, ReferenceFrame};
pub use operation::{CameraSettings, ControllerType, OperationManager};
pub use orchestrator::{DeviceOrchestrator, OrchestratorBuilder, OrchestratorState};
pub use storage::{MediaLocator, MediaStore};

/// Initialize logging for the camera core
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "lenscore=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
