use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::photo::choose_best_size;
use super::{
    run_preview, BracketFrame, HandlerContext, HandlerCore, HandlerState, ModeHandler,
    SessionHost,
};
use crate::capability::CaptureMode;
use crate::errors::CameraError;
use crate::hardware::{
    output_orientation, CameraDescriptor, CaptureSession, OutputKind, OutputTarget, PreviewTarget,
};
use crate::request::{
    AeMode, AfMode, CaptureTemplate, FlashState, QualityMode, RepeatingBase, RequestSettings,
};
use crate::storage::{persist_with_fallback, MediaLocator};

/// Clears the in-flight flag however the capture ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Exposure compensation of frame `index` in an `count`-frame bracket,
/// centered on zero.
pub(crate) fn bracket_compensation(index: u32, count: u32) -> i32 {
    index as i32 - (count / 2) as i32
}

/// Multi-frame low-light capture. One bracket sequence at a time; a second
/// `capture()` while one is running is rejected.
pub struct NightModeHandler {
    core: HandlerCore,
    ctx: HandlerContext,
    in_flight: AtomicBool,
    outputs: Mutex<Option<(OutputTarget, OutputTarget)>>,
}

impl NightModeHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            core: HandlerCore::new(CaptureMode::Night),
            ctx,
            in_flight: AtomicBool::new(false),
            outputs: Mutex::new(None),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn frame_settings(&self, descriptor: &CameraDescriptor, compensation: i32) -> RequestSettings {
        let night = &self.ctx.config.night;
        let mut forced = RequestSettings {
            ae_compensation: Some(match &descriptor.compensation_range {
                Some(range) => compensation.clamp(*range.start(), *range.end()),
                None => 0,
            }),
            flash_mode: Some(FlashState::Off),
            noise_reduction: Some(QualityMode::HighQuality),
            edge_mode: Some(QualityMode::HighQuality),
            color_correction: Some(QualityMode::HighQuality),
            jpeg_orientation: Some(output_orientation(descriptor, self.ctx.orientation.as_ref())),
            ..Default::default()
        };
        if descriptor.capabilities.manual_sensor {
            forced.ae_mode = Some(AeMode::Off);
            forced.sensitivity = Some(match &descriptor.sensitivity_range {
                Some(range) => night.iso.clamp(*range.start(), *range.end()),
                None => night.iso,
            });
            forced.exposure_time_ns = Some(match &descriptor.exposure_time_range {
                Some(range) => night.exposure_time_ns.clamp(*range.start(), *range.end()),
                None => night.exposure_time_ns,
            });
        } else {
            forced.ae_mode = Some(AeMode::On);
        }
        forced
    }

    async fn capture_sequence(
        &self,
        session: &Arc<dyn CaptureSession>,
        still: OutputTarget,
    ) -> Result<MediaLocator, CameraError> {
        let descriptor = self.core.descriptor()?;
        let composer = self.core.host()?.composer();
        let night = &self.ctx.config.night;
        let count = night.frame_count.max(1);
        let interval = Duration::from_millis(night.frame_interval_ms);

        let mut frames = Vec::with_capacity(count as usize);
        for index in 0..count {
            let compensation = bracket_compensation(index, count);
            let request = composer.one_shot(
                CaptureTemplate::StillCapture,
                [still.id],
                &RequestSettings::default(),
                &self.frame_settings(&descriptor, compensation),
            );
            log::debug!("Night frame {}/{} (ev {})", index + 1, count, compensation);

            let result = session.capture(request).await.map_err(|e| {
                CameraError::CaptureError(format!("Night frame {} failed: {}", index + 1, e))
            })?;
            let image = result.image(OutputKind::Still).ok_or_else(|| {
                CameraError::CaptureError(format!("Night frame {} has no image", index + 1))
            })?;
            frames.push(BracketFrame {
                compensation,
                data: image.data.clone(),
            });

            if index + 1 < count && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        let fused = self
            .ctx
            .fusion
            .fuse(&frames)
            .ok_or_else(|| CameraError::CaptureError("Night fusion produced no image".to_string()))?;
        persist_with_fallback(
            self.ctx.store.as_ref(),
            &self.ctx.config.storage.fallback_directory,
            fused,
            "NIGHT",
            "jpg",
        )
        .await
    }
}

#[async_trait]
impl ModeHandler for NightModeHandler {
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
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.core.detach();
    }

    async fn required_outputs(
        &self,
        preview: &PreviewTarget,
    ) -> Result<Vec<OutputTarget>, CameraError> {
        let descriptor = self.core.descriptor()?;
        let photo = &self.ctx.config.photo;
        let size = choose_best_size(
            &descriptor.jpeg_sizes,
            photo.target_aspect_ratio,
            photo.aspect_tolerance,
        )
        .unwrap_or(preview.size);

        let preview_output = preview.as_output();
        let still = OutputTarget::new(OutputKind::Still, size);
        *self.outputs.lock().unwrap_or_else(PoisonError::into_inner) = Some((preview_output, still));
        Ok(vec![preview_output, still])
    }

    async fn on_session_configured(
        &self,
        session: Arc<dyn CaptureSession>,
    ) -> Result<(), CameraError> {
        let (preview, _) = self
            .outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| CameraError::SessionError("Night outputs not configured".to_string()))?;
        let base = RepeatingBase {
            template: CaptureTemplate::Preview,
            targets: vec![preview.id],
            settings: RequestSettings {
                ae_mode: Some(AeMode::On),
                af_mode: Some(AfMode::ContinuousPicture),
                noise_reduction: Some(QualityMode::HighQuality),
                ..Default::default()
            },
        };
        self.core.install_repeating(&session, base).await
    }

    async fn start_preview(&self, preview: PreviewTarget) -> Result<(), CameraError> {
        run_preview(self, &self.core, preview).await
    }

    async fn capture(&self) -> Result<Option<MediaLocator>, CameraError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Night capture already in progress, ignoring request");
            return Ok(None);
        }
        let _guard = InFlight(&self.in_flight);

        let session = self.core.session()?;
        let (_, still) = self
            .outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| CameraError::SessionError("Night outputs not configured".to_string()))?;

        self.core.set_state(HandlerState::Capturing);
        let result = self.capture_sequence(&session, still).await;
        if self.core.is_attached() {
            self.core.set_state(HandlerState::PreviewActive);
        }

        match result {
            Ok(locator) => {
                log::info!("Night capture saved: {}", locator);
                Ok(Some(locator))
            }
            Err(e) => {
                log::error!("Night capture failed: {}", e);
                Err(e)
            }
        }
    }

    fn supports_capture(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.on_detach().await;
    }
}
