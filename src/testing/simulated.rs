//! In-memory hardware
//!
//! [`SimulatedHardware`] plays provider and backend at once. Every request it
//! sees is recorded, and failures can be scripted: timed-out opens, rejected
//! repeating requests, failing or slow captures.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::synthetic_data::synthetic_jpeg_frame;
use crate::hardware::{
    CameraBackend, CameraDescriptor, CameraDevice, CameraProvider, CaptureResult, CaptureSession,
    CapturedImage, HardwareError, MediaRecorder, OrientationSource, OutputKind, OutputTarget,
    RecordPipeline, SessionId, VideoProfile,
};
use crate::request::CaptureRequest;
use crate::storage::{MediaLocator, MediaStore};

/// Everything the simulated hardware was asked to do.
#[derive(Debug, Default, Clone)]
pub struct HardwareLog {
    pub opened: Vec<String>,
    pub closed_devices: Vec<String>,
    pub sessions: Vec<(SessionId, Vec<OutputTarget>)>,
    pub closed_sessions: Vec<SessionId>,
    pub repeating: Vec<CaptureRequest>,
    pub captures: Vec<CaptureRequest>,
}

#[derive(Default)]
struct SimState {
    descriptors: Vec<CameraDescriptor>,
    open_attempts: AtomicU32,
    failing_opens: AtomicU32,
    permanent_open_error: Mutex<Option<HardwareError>>,
    reject_repeating: AtomicBool,
    failing_captures: AtomicU32,
    capture_delay_ms: AtomicU64,
    frame_counter: AtomicU64,
    open_sessions: AtomicUsize,
    log: Mutex<HardwareLog>,
}

impl SimState {
    fn log(&self) -> std::sync::MutexGuard<'_, HardwareLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct SimulatedHardware {
    state: Arc<SimState>,
}

impl SimulatedHardware {
    pub fn new(descriptors: Vec<CameraDescriptor>) -> Self {
        Self {
            state: Arc::new(SimState {
                descriptors,
                ..Default::default()
            }),
        }
    }

    /// The next `count` opens time out.
    pub fn fail_next_opens(&self, count: u32) {
        self.state.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Every open fails with `error` until cleared.
    pub fn set_open_error(&self, error: Option<HardwareError>) {
        *self
            .state
            .permanent_open_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    pub fn reject_repeating_requests(&self, reject: bool) {
        self.state.reject_repeating.store(reject, Ordering::SeqCst);
    }

    /// The next `count` one-shot captures are rejected.
    pub fn fail_next_captures(&self, count: u32) {
        self.state.failing_captures.store(count, Ordering::SeqCst);
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        self.state
            .capture_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn open_attempts(&self) -> u32 {
        self.state.open_attempts.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> HardwareLog {
        self.state.log().clone()
    }

    pub fn last_repeating(&self) -> Option<CaptureRequest> {
        self.state.log().repeating.last().cloned()
    }

    pub fn captures(&self) -> Vec<CaptureRequest> {
        self.state.log().captures.clone()
    }

    fn take_budget(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CameraProvider for SimulatedHardware {
    async fn camera_ids(&self) -> Result<Vec<String>, HardwareError> {
        Ok(self
            .state
            .descriptors
            .iter()
            .map(|d| d.physical_id.clone())
            .collect())
    }

    async fn describe(&self, physical_id: &str) -> Result<CameraDescriptor, HardwareError> {
        self.state
            .descriptors
            .iter()
            .find(|d| d.physical_id == physical_id)
            .cloned()
            .ok_or_else(|| HardwareError::Unavailable(format!("no camera {}", physical_id)))
    }
}

#[async_trait]
impl CameraBackend for SimulatedHardware {
    async fn open(&self, physical_id: &str) -> Result<Arc<dyn CameraDevice>, HardwareError> {
        self.state.open_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self
            .state
            .permanent_open_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(error);
        }
        if Self::take_budget(&self.state.failing_opens) {
            return Err(HardwareError::Timeout(format!("open {} timed out", physical_id)));
        }
        if !self.state.descriptors.iter().any(|d| d.physical_id == physical_id) {
            return Err(HardwareError::Unavailable(format!("no camera {}", physical_id)));
        }

        self.state.log().opened.push(physical_id.to_string());
        Ok(Arc::new(SimulatedDevice {
            physical_id: physical_id.to_string(),
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct SimulatedDevice {
    physical_id: String,
    state: Arc<SimState>,
    closed: AtomicBool,
}

#[async_trait]
impl CameraDevice for SimulatedDevice {
    fn physical_id(&self) -> &str {
        &self.physical_id
    }

    async fn create_session(
        &self,
        outputs: Vec<OutputTarget>,
    ) -> Result<Arc<dyn CaptureSession>, HardwareError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HardwareError::Disconnected(self.physical_id.clone()));
        }
        if outputs.is_empty() {
            return Err(HardwareError::InvalidConfiguration("no outputs".to_string()));
        }
        let id = SessionId::generate();
        self.state.log().sessions.push((id, outputs.clone()));
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimulatedSession {
            id,
            outputs,
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.log().closed_devices.push(self.physical_id.clone());
        }
    }
}

struct SimulatedSession {
    id: SessionId,
    outputs: Vec<OutputTarget>,
    state: Arc<SimState>,
    closed: AtomicBool,
}

impl SimulatedSession {
    fn check_request(&self, request: &CaptureRequest) -> Result<(), HardwareError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HardwareError::Disconnected(format!("session {} closed", self.id)));
        }
        if request.targets.is_empty() {
            return Err(HardwareError::Rejected("request has no targets".to_string()));
        }
        if let Some(unknown) = request
            .targets
            .iter()
            .find(|target| !self.outputs.iter().any(|o| o.id == **target))
        {
            return Err(HardwareError::Rejected(format!(
                "target {} is not part of session {}",
                unknown, self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CaptureSession for SimulatedSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn outputs(&self) -> Vec<OutputTarget> {
        self.outputs.clone()
    }

    async fn capture(&self, request: CaptureRequest) -> Result<CaptureResult, HardwareError> {
        self.check_request(&request)?;
        let delay = self.state.capture_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.state.log().captures.push(request.clone());
        if SimulatedHardware::take_budget(&self.state.failing_captures) {
            return Err(HardwareError::Rejected("capture failed".to_string()));
        }

        let frame_number = self.state.frame_counter.fetch_add(1, Ordering::SeqCst);
        let compensation = request.settings.ae_compensation.unwrap_or(0);
        let images = self
            .outputs
            .iter()
            .filter(|output| request.targets.contains(&output.id))
            .filter(|output| matches!(output.kind, OutputKind::Still | OutputKind::Raw))
            .map(|output| CapturedImage {
                target: output.id,
                kind: output.kind,
                data: synthetic_jpeg_frame(frame_number, output.size, compensation),
            })
            .collect();

        Ok(CaptureResult {
            frame_number,
            timestamp_ns: frame_number * 33_333_333,
            images,
        })
    }

    async fn set_repeating_request(&self, request: CaptureRequest) -> Result<(), HardwareError> {
        self.check_request(&request)?;
        if self.state.reject_repeating.load(Ordering::SeqCst) {
            return Err(HardwareError::Rejected("repeating request refused".to_string()));
        }
        self.state.log().repeating.push(request);
        Ok(())
    }

    async fn stop_repeating(&self) -> Result<(), HardwareError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HardwareError::Disconnected(format!("session {} closed", self.id)));
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
            self.state.log().closed_sessions.push(self.id);
        }
    }
}

#[derive(Default)]
struct RecorderState {
    prepared: AtomicUsize,
    started: AtomicUsize,
    fail_prepare: AtomicBool,
}

/// Record pipelines that write a small placeholder container on stop.
#[derive(Clone, Default)]
pub struct SimulatedRecorder {
    state: Arc<RecorderState>,
}

impl SimulatedRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_prepare(&self, fail: bool) {
        self.state.fail_prepare.store(fail, Ordering::SeqCst);
    }

    pub fn prepared_count(&self) -> usize {
        self.state.prepared.load(Ordering::SeqCst)
    }

    pub fn started_count(&self) -> usize {
        self.state.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaRecorder for SimulatedRecorder {
    async fn prepare(
        &self,
        output: &Path,
        profile: &VideoProfile,
    ) -> Result<Box<dyn RecordPipeline>, HardwareError> {
        if self.state.fail_prepare.load(Ordering::SeqCst) {
            return Err(HardwareError::Unavailable("encoder unavailable".to_string()));
        }
        self.state.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedPipeline {
            target: OutputTarget::new(OutputKind::Record, profile.size),
            path: output.to_path_buf(),
            recorder: self.state.clone(),
            running: false,
            released: false,
        }))
    }
}

struct SimulatedPipeline {
    target: OutputTarget,
    path: PathBuf,
    recorder: Arc<RecorderState>,
    running: bool,
    released: bool,
}

#[async_trait]
impl RecordPipeline for SimulatedPipeline {
    fn target(&self) -> OutputTarget {
        self.target
    }

    async fn start(&mut self) -> Result<(), HardwareError> {
        if self.released {
            return Err(HardwareError::Rejected("pipeline released".to_string()));
        }
        if self.running {
            return Err(HardwareError::Rejected("already recording".to_string()));
        }
        self.running = true;
        self.recorder.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), HardwareError> {
        if !self.running {
            return Err(HardwareError::Rejected("not recording".to_string()));
        }
        self.running = false;
        tokio::fs::write(&self.path, b"\x00\x00\x00\x18ftypmp42synthetic")
            .await
            .map_err(|e| HardwareError::Unavailable(e.to_string()))
    }

    async fn release(&mut self) {
        self.running = false;
        self.released = true;
    }
}

/// Keeps persisted bytes in memory; can be told to decline.
#[derive(Default)]
pub struct MemoryMediaStore {
    items: Mutex<HashMap<String, Bytes>>,
    counter: AtomicU64,
    declining: AtomicBool,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_declining(&self, declining: bool) {
        self.declining.store(declining, Ordering::SeqCst);
    }

    pub fn get(&self, locator: &MediaLocator) -> Option<Bytes> {
        match locator {
            MediaLocator::Store(key) => self
                .items
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned(),
            MediaLocator::File(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn persist(&self, data: Bytes, prefix: &str) -> Option<MediaLocator> {
        if self.declining.load(Ordering::SeqCst) {
            return None;
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let key = format!("memory://{}/{}", prefix, n);
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), data);
        Some(MediaLocator::Store(key))
    }
}

/// Orientation source with a fixed reading, or a failing sensor.
#[derive(Debug, Clone, Copy)]
pub struct FixedOrientation(pub Option<i32>);

impl FixedOrientation {
    pub fn degrees(degrees: i32) -> Self {
        Self(Some(degrees))
    }

    pub fn failing() -> Self {
        Self(None)
    }
}

impl OrientationSource for FixedOrientation {
    fn rotation_degrees(&self) -> Result<i32, HardwareError> {
        self.0
            .ok_or_else(|| HardwareError::Unavailable("orientation sensor offline".to_string()))
    }
}
