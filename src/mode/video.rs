use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{run_preview, HandlerContext, HandlerCore, HandlerState, ModeHandler, SessionHost};
use crate::capability::CaptureMode;
use crate::errors::CameraError;
use crate::hardware::{
    output_orientation, CameraDescriptor, CaptureSession, OutputTarget, PreviewTarget,
    RecordPipeline, Size, VideoProfile,
};
use crate::request::{AeMode, AfMode, CaptureTemplate, RepeatingBase, RequestSettings};
use crate::storage::{timestamped_file_name, MediaLocator};

/// A record pipeline bound to its output file.
struct PreparedRecording {
    pipeline: Box<dyn RecordPipeline>,
    path: PathBuf,
    recorded: bool,
}

/// The configured size if the unit lists it, otherwise the largest listed
/// size that is not bigger.
fn video_size(descriptor: &CameraDescriptor, requested: Size) -> Size {
    if descriptor.video_sizes.is_empty() || descriptor.video_sizes.contains(&requested) {
        return requested;
    }
    descriptor
        .video_sizes
        .iter()
        .filter(|size| size.area() <= requested.area())
        .max_by_key(|size| size.area())
        .or_else(|| descriptor.video_sizes.iter().min_by_key(|size| size.area()))
        .copied()
        .unwrap_or(requested)
}

async fn discard_if_empty(path: &Path) {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() == 0 => match tokio::fs::remove_file(path).await {
            Ok(()) => log::debug!("Deleted unused video file {}", path.display()),
            Err(e) => log::warn!("Failed to delete unused video file {}: {}", path.display(), e),
        },
        _ => {}
    }
}

/// Video recording over a {preview, record} session.
///
/// A pipeline is single-use: after `stop_recording` it is released, a fresh
/// one is prepared and the session is rebuilt around the new record target.
pub struct VideoModeHandler {
    core: HandlerCore,
    ctx: HandlerContext,
    recording: tokio::sync::Mutex<Option<PreparedRecording>>,
    targets: Mutex<Option<(OutputTarget, OutputTarget)>>,
    active: AtomicBool,
}

impl VideoModeHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            core: HandlerCore::new(CaptureMode::Video),
            ctx,
            recording: tokio::sync::Mutex::new(None),
            targets: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Makes sure the record target is live, then starts the pipeline.
    /// Runs with `active` already claimed by the caller.
    async fn begin_recording(&self, host: &dyn SessionHost) -> Result<PathBuf, CameraError> {
        let session_ready = match host.session() {
            Some(session) => self.record_target_in(&session) && self.recording.lock().await.is_some(),
            None => false,
        };
        if !session_ready {
            let preview = self.core.preview_target().ok_or_else(|| {
                CameraError::SessionError("Start preview before recording".to_string())
            })?;
            run_preview(self, &self.core, preview).await?;
        }

        let mut recording = self.recording.lock().await;
        let prepared = recording
            .as_mut()
            .ok_or_else(|| CameraError::RecordingError("Record pipeline missing".to_string()))?;
        prepared
            .pipeline
            .start()
            .await
            .map_err(|e| CameraError::RecordingError(format!("Failed to start recording: {}", e)))?;
        prepared.recorded = true;
        Ok(prepared.path.clone())
    }

    async fn prepare(&self) -> Result<PreparedRecording, CameraError> {
        let descriptor = self.core.descriptor()?;
        let video = &self.ctx.config.video;
        let directory = &self.ctx.config.storage.video_directory;

        tokio::fs::create_dir_all(directory).await?;
        let path = directory.join(timestamped_file_name("VID", "mp4"));
        tokio::fs::File::create(&path).await?;

        let profile = VideoProfile {
            size: video_size(
                &descriptor,
                Size::new(video.resolution[0], video.resolution[1]),
            ),
            fps: video.fps,
            bitrate: video.bitrate,
            orientation_hint: output_orientation(&descriptor, self.ctx.orientation.as_ref()),
        };
        let pipeline = match self.ctx.recorder.prepare(&path, &profile).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                discard_if_empty(&path).await;
                return Err(CameraError::RecordingError(format!(
                    "Failed to prepare recorder: {}",
                    e
                )));
            }
        };
        log::debug!(
            "Record pipeline prepared: {} at {}x{}@{}",
            path.display(),
            profile.size.width,
            profile.size.height,
            profile.fps
        );
        Ok(PreparedRecording {
            pipeline,
            path,
            recorded: false,
        })
    }

    /// Stop (if running) and release the current pipeline.
    async fn teardown(&self, prepared: Option<PreparedRecording>, was_recording: bool) {
        let Some(mut prepared) = prepared else {
            return;
        };
        if was_recording {
            if let Err(e) = prepared.pipeline.stop().await {
                log::warn!("Failed to stop recording during teardown: {}", e);
            }
        }
        prepared.pipeline.release().await;
        if !prepared.recorded {
            discard_if_empty(&prepared.path).await;
        }
    }

    fn record_target_in(&self, session: &Arc<dyn CaptureSession>) -> bool {
        let targets = *self.targets.lock().unwrap_or_else(PoisonError::into_inner);
        match targets {
            Some((_, record)) => session.outputs().iter().any(|o| o.id == record.id),
            None => false,
        }
    }
}

#[async_trait]
impl ModeHandler for VideoModeHandler {
    fn mode(&self) -> CaptureMode {
        self.core.mode()
    }

    fn state(&self) -> HandlerState {
        self.core.state()
    }

    fn state_stream(&self) -> watch::Receiver<HandlerState> {
        self.core.subscribe()
    }

    async fn on_attach(&self, host: Arc<dyn SessionHost>) -> Result<(), CameraError> {
        if host.device().is_none() {
            return Err(CameraError::ResourceUnavailable("No open camera device".to_string()));
        }
        self.core.attach(host);
        Ok(())
    }

    async fn on_detach(&self) {
        let was_recording = self.active.swap(false, Ordering::AcqRel);
        let prepared = self.recording.lock().await.take();
        self.teardown(prepared, was_recording).await;
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.core.detach();
    }

    async fn required_outputs(
        &self,
        preview: &PreviewTarget,
    ) -> Result<Vec<OutputTarget>, CameraError> {
        let mut recording = self.recording.lock().await;
        if recording.is_none() {
            *recording = Some(self.prepare().await?);
        }
        let record = recording
            .as_ref()
            .map(|prepared| prepared.pipeline.target())
            .ok_or_else(|| CameraError::RecordingError("Record pipeline missing".to_string()))?;

        let preview_output = preview.as_output();
        *self.targets.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((preview_output, record));
        Ok(vec![preview_output, record])
    }

    async fn on_session_configured(
        &self,
        session: Arc<dyn CaptureSession>,
    ) -> Result<(), CameraError> {
        let (preview, record) = self
            .targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| CameraError::SessionError("Video outputs not configured".to_string()))?;
        let base = RepeatingBase {
            template: CaptureTemplate::Record,
            targets: vec![preview.id, record.id],
            settings: RequestSettings {
                ae_mode: Some(AeMode::On),
                af_mode: Some(AfMode::ContinuousVideo),
                ..Default::default()
            },
        };
        self.core.install_repeating(&session, base).await
    }

    async fn start_preview(&self, preview: PreviewTarget) -> Result<(), CameraError> {
        run_preview(self, &self.core, preview).await
    }

    async fn start_recording(&self) -> Result<Option<MediaLocator>, CameraError> {
        let host = self.core.host()?;
        if host.device().is_none() {
            return Err(CameraError::ResourceUnavailable("No camera attached".to_string()));
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Recording already in progress");
            return Ok(None);
        }

        match self.begin_recording(host.as_ref()).await {
            Ok(path) => {
                self.core.set_state(HandlerState::Recording);
                log::info!("Recording started: {}", path.display());
                Ok(Some(MediaLocator::File(path)))
            }
            Err(e) => {
                self.active.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn stop_recording(&self) -> Result<Option<MediaLocator>, CameraError> {
        if !self.active.swap(false, Ordering::AcqRel) {
            log::debug!("stop_recording without an active recording");
            return Ok(None);
        }

        let Some(mut finished) = self.recording.lock().await.take() else {
            return Err(CameraError::RecordingError("Record pipeline missing".to_string()));
        };
        let stopped = finished.pipeline.stop().await;
        finished.pipeline.release().await;
        self.core.set_state(HandlerState::PreviewActive);

        // The old record target is gone; rebuild the session around a fresh one.
        if let Some(preview) = self.core.preview_target() {
            if let Err(e) = run_preview(self, &self.core, preview).await {
                log::error!("Failed to restore preview after recording: {}", e);
            }
        }

        stopped.map_err(|e| CameraError::RecordingError(format!("Failed to stop recording: {}", e)))?;
        log::info!("Recording saved: {}", finished.path.display());
        Ok(Some(MediaLocator::File(finished.path)))
    }

    fn supports_capture(&self) -> bool {
        false
    }

    fn supports_recording(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.on_detach().await;
    }
}
