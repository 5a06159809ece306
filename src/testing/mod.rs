//! Testing utilities for lenscore
//!
//! Simulated hardware, recorder, media store and orientation source, plus
//! preset unit descriptors and synthetic frames, so the whole core can run
//! offline.

pub mod simulated;
pub mod synthetic_data;

pub use simulated::{
    FixedOrientation, HardwareLog, MemoryMediaStore, SimulatedHardware, SimulatedRecorder,
};
pub use synthetic_data::{back_main_descriptor, frame_tag, front_descriptor, synthetic_jpeg_frame};

use std::path::Path;
use std::sync::Arc;

use crate::config::CoreConfig;
use crate::errors::CameraError;
use crate::hardware::CameraDescriptor;
use crate::orchestrator::{DeviceOrchestrator, OrchestratorBuilder};

/// Defaults with storage under `root` and fast retry/night timings.
pub fn test_config(root: &Path) -> CoreConfig {
    let mut config = CoreConfig::default();
    config.camera.reconnect_delay_ms = 1;
    config.night.frame_interval_ms = 1;
    config.storage.fallback_directory = root.join("captures");
    config.storage.video_directory = root.join("video");
    config
}

/// An orchestrator wired to simulated collaborators, with handles on each.
pub struct TestRig {
    pub hardware: SimulatedHardware,
    pub recorder: SimulatedRecorder,
    pub store: Arc<MemoryMediaStore>,
    pub orchestrator: DeviceOrchestrator,
}

impl TestRig {
    /// Back main unit "0" and front unit "1".
    pub fn new(config: CoreConfig) -> Result<Self, CameraError> {
        Self::with_descriptors(vec![back_main_descriptor(), front_descriptor()], config)
    }

    pub fn with_descriptors(
        descriptors: Vec<CameraDescriptor>,
        config: CoreConfig,
    ) -> Result<Self, CameraError> {
        let hardware = SimulatedHardware::new(descriptors);
        let recorder = SimulatedRecorder::new();
        let store = Arc::new(MemoryMediaStore::new());
        let orchestrator = OrchestratorBuilder::new(
            Arc::new(hardware.clone()),
            Arc::new(hardware.clone()),
            store.clone(),
            Arc::new(FixedOrientation::degrees(0)),
            Arc::new(recorder.clone()),
        )
        .config(config)
        .build()?;

        Ok(Self {
            hardware,
            recorder,
            store,
            orchestrator,
        })
    }
}
