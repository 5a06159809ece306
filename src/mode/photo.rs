use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{run_preview, BracketFrame, HandlerContext, HandlerCore, HandlerState, ModeHandler, SessionHost};
use crate::capability::CaptureMode;
use crate::errors::CameraError;
use crate::hardware::{
    output_orientation, CameraDescriptor, CaptureSession, OutputKind, OutputTarget, PreviewTarget,
    Size,
};
use crate::request::{
    AeMode, AfMode, CaptureTemplate, QualityMode, RepeatingBase, RequestSettings,
};
use crate::storage::{persist_with_fallback, write_fallback_file, MediaLocator};

const MAX_BURST: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhotoCaptureMode {
    Single,
    Burst,
    Hdr,
    Raw,
    Night,
    Portrait,
}

/// Largest size within `tolerance` of `ratio`; otherwise the size whose
/// aspect ratio is closest (larger area on ties).
pub fn choose_best_size(sizes: &[Size], ratio: f32, tolerance: f32) -> Option<Size> {
    let matching = sizes
        .iter()
        .filter(|size| (size.aspect_ratio() - ratio).abs() <= tolerance)
        .max_by_key(|size| size.area());
    if let Some(size) = matching {
        return Some(*size);
    }

    sizes.iter().copied().min_by(|a, b| {
        let da = (a.aspect_ratio() - ratio).abs();
        let db = (b.aspect_ratio() - ratio).abs();
        da.total_cmp(&db).then_with(|| b.area().cmp(&a.area()))
    })
}

#[derive(Debug, Clone, Copy)]
struct PhotoSettings {
    capture_mode: PhotoCaptureMode,
    burst_count: u32,
    jpeg_quality: u8,
    raw_enabled: bool,
}

#[derive(Debug, Clone, Copy)]
struct PhotoOutputs {
    preview: OutputTarget,
    still: OutputTarget,
    raw: Option<OutputTarget>,
}

/// Still capture: single, burst, bracketed HDR, RAW+JPEG, night and
/// portrait tunings over one {preview, still[, raw]} session.
pub struct PhotoModeHandler {
    core: HandlerCore,
    ctx: HandlerContext,
    settings: Mutex<PhotoSettings>,
    outputs: Mutex<Option<PhotoOutputs>>,
    last_burst: Mutex<Vec<MediaLocator>>,
}

impl PhotoModeHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        let photo = &ctx.config.photo;
        let settings = PhotoSettings {
            capture_mode: PhotoCaptureMode::Single,
            burst_count: photo.burst_count.clamp(1, MAX_BURST),
            jpeg_quality: photo.jpeg_quality.clamp(1, 100),
            raw_enabled: photo.raw_enabled,
        };
        Self {
            core: HandlerCore::new(CaptureMode::Photo),
            ctx,
            settings: Mutex::new(settings),
            outputs: Mutex::new(None),
            last_burst: Mutex::new(Vec::new()),
        }
    }

    fn settings(&self) -> PhotoSettings {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, change: impl FnOnce(&mut PhotoSettings)) {
        change(&mut self.settings.lock().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn capture_mode(&self) -> PhotoCaptureMode {
        self.settings().capture_mode
    }

    pub fn set_capture_mode(&self, mode: PhotoCaptureMode) {
        log::info!("Photo capture mode: {:?}", mode);
        self.update(|s| s.capture_mode = mode);
    }

    pub fn burst_count(&self) -> u32 {
        self.settings().burst_count
    }

    pub fn set_burst_count(&self, count: u32) -> bool {
        if !(1..=MAX_BURST).contains(&count) {
            log::warn!("Burst count {} outside 1..={}", count, MAX_BURST);
            return false;
        }
        self.update(|s| s.burst_count = count);
        true
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.settings().jpeg_quality
    }

    pub fn set_jpeg_quality(&self, quality: u8) -> bool {
        if !(1..=100).contains(&quality) {
            return false;
        }
        self.update(|s| s.jpeg_quality = quality);
        true
    }

    pub fn is_raw_capture_enabled(&self) -> bool {
        self.settings().raw_enabled
    }

    /// Takes effect at the next session configuration.
    pub fn set_raw_capture_enabled(&self, enabled: bool) {
        self.update(|s| s.raw_enabled = enabled);
    }

    /// Locators of the most recent burst, in capture order.
    pub fn last_burst(&self) -> Vec<MediaLocator> {
        self.last_burst
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn outputs(&self) -> Result<PhotoOutputs, CameraError> {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| CameraError::SessionError("Photo outputs not configured".to_string()))
    }

    fn still_settings(
        &self,
        descriptor: &CameraDescriptor,
        mode: PhotoCaptureMode,
        quality: u8,
    ) -> (RequestSettings, RequestSettings) {
        let mut defaults = RequestSettings {
            jpeg_quality: Some(quality),
            jpeg_orientation: Some(output_orientation(descriptor, self.ctx.orientation.as_ref())),
            ..Default::default()
        };
        let mut forced = RequestSettings::default();

        match mode {
            PhotoCaptureMode::Night => {
                defaults.noise_reduction = Some(QualityMode::HighQuality);
                defaults.edge_mode = Some(QualityMode::HighQuality);
                if descriptor.capabilities.manual_sensor {
                    let night = &self.ctx.config.night;
                    forced.ae_mode = Some(AeMode::Off);
                    forced.sensitivity = Some(match &descriptor.sensitivity_range {
                        Some(range) => night.iso.clamp(*range.start(), *range.end()),
                        None => night.iso,
                    });
                    forced.exposure_time_ns = Some(match &descriptor.exposure_time_range {
                        Some(range) => night.exposure_time_ns.clamp(*range.start(), *range.end()),
                        None => night.exposure_time_ns,
                    });
                }
            }
            PhotoCaptureMode::Portrait => {
                defaults.noise_reduction = Some(QualityMode::Fast);
                defaults.edge_mode = Some(QualityMode::Fast);
                defaults.af_mode = Some(AfMode::ContinuousPicture);
            }
            _ => {}
        }
        (defaults, forced)
    }

    async fn persist(&self, data: bytes::Bytes, prefix: &str) -> Result<MediaLocator, CameraError> {
        persist_with_fallback(
            self.ctx.store.as_ref(),
            &self.ctx.config.storage.fallback_directory,
            data,
            prefix,
            "jpg",
        )
        .await
    }

    async fn capture_single(
        &self,
        session: &Arc<dyn CaptureSession>,
        outputs: &PhotoOutputs,
        defaults: &RequestSettings,
        forced: &RequestSettings,
        prefix: &str,
    ) -> Result<MediaLocator, CameraError> {
        let composer = self.core.host()?.composer();
        let request = composer.one_shot(
            CaptureTemplate::StillCapture,
            [outputs.still.id],
            defaults,
            forced,
        );
        let result = session
            .capture(request)
            .await
            .map_err(|e| CameraError::CaptureError(format!("Still capture failed: {}", e)))?;
        let image = result
            .image(OutputKind::Still)
            .ok_or_else(|| CameraError::CaptureError("No still frame in result".to_string()))?;
        self.persist(image.data.clone(), prefix).await
    }

    async fn capture_burst(
        &self,
        session: &Arc<dyn CaptureSession>,
        outputs: &PhotoOutputs,
        defaults: &RequestSettings,
        count: u32,
    ) -> Result<MediaLocator, CameraError> {
        let composer = self.core.host()?.composer();
        let requests = (0..count)
            .map(|_| {
                composer.one_shot(
                    CaptureTemplate::StillCapture,
                    [outputs.still.id],
                    defaults,
                    &RequestSettings::default(),
                )
            })
            .collect();
        let results = session
            .capture_burst(requests)
            .await
            .map_err(|e| CameraError::CaptureError(format!("Burst capture failed: {}", e)))?;

        let mut locators = Vec::with_capacity(results.len());
        for (index, result) in results.iter().enumerate() {
            let Some(image) = result.image(OutputKind::Still) else {
                log::warn!("Burst frame {} has no still image", index + 1);
                continue;
            };
            let prefix = format!("BURST_{}", index + 1);
            locators.push(self.persist(image.data.clone(), &prefix).await?);
        }
        log::info!("Burst saved {} of {} frames", locators.len(), count);

        let first = locators
            .first()
            .cloned()
            .ok_or_else(|| CameraError::CaptureError("Burst produced no frames".to_string()))?;
        *self.last_burst.lock().unwrap_or_else(PoisonError::into_inner) = locators;
        Ok(first)
    }

    async fn capture_hdr(
        &self,
        session: &Arc<dyn CaptureSession>,
        outputs: &PhotoOutputs,
        descriptor: &CameraDescriptor,
        defaults: &RequestSettings,
    ) -> Result<MediaLocator, CameraError> {
        let composer = self.core.host()?.composer();
        let mut frames = Vec::new();
        for &bracket in &self.ctx.config.photo.hdr_brackets {
            let compensation = match &descriptor.compensation_range {
                Some(range) => bracket.clamp(*range.start(), *range.end()),
                None => 0,
            };
            let forced = RequestSettings {
                ae_compensation: Some(compensation),
                ..Default::default()
            };
            let request = composer.one_shot(
                CaptureTemplate::StillCapture,
                [outputs.still.id],
                defaults,
                &forced,
            );
            let result = session.capture(request).await.map_err(|e| {
                CameraError::CaptureError(format!("HDR bracket {} failed: {}", bracket, e))
            })?;
            let image = result.image(OutputKind::Still).ok_or_else(|| {
                CameraError::CaptureError(format!("HDR bracket {} has no frame", bracket))
            })?;
            frames.push(BracketFrame {
                compensation: bracket,
                data: image.data.clone(),
            });
        }

        let fused = self
            .ctx
            .fusion
            .fuse(&frames)
            .ok_or_else(|| CameraError::CaptureError("HDR fusion produced no image".to_string()))?;
        self.persist(fused, "HDR").await
    }

    async fn capture_raw(
        &self,
        session: &Arc<dyn CaptureSession>,
        outputs: &PhotoOutputs,
        defaults: &RequestSettings,
    ) -> Result<MediaLocator, CameraError> {
        let raw = match outputs.raw {
            Some(raw) if session.outputs().iter().any(|o| o.id == raw.id) => raw,
            _ => {
                log::debug!("No RAW stream configured, capturing JPEG only");
                return self
                    .capture_single(session, outputs, defaults, &RequestSettings::default(), "IMG")
                    .await;
            }
        };

        let composer = self.core.host()?.composer();
        let request = composer.one_shot(
            CaptureTemplate::StillCapture,
            [outputs.still.id, raw.id],
            defaults,
            &RequestSettings::default(),
        );
        let result = session
            .capture(request)
            .await
            .map_err(|e| CameraError::CaptureError(format!("RAW capture failed: {}", e)))?;

        if let Some(image) = result.image(OutputKind::Raw) {
            let path = write_fallback_file(
                &self.ctx.config.storage.fallback_directory,
                "RAW",
                "dng",
                image.data.clone(),
            )
            .await?;
            log::info!("RAW frame written to {}", path.display());
        }
        let jpeg = result
            .image(OutputKind::Still)
            .ok_or_else(|| CameraError::CaptureError("No still frame in result".to_string()))?;
        self.persist(jpeg.data.clone(), "IMG").await
    }
}

#[async_trait]
impl ModeHandler for PhotoModeHandler {
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
        let still_size = choose_best_size(
            &descriptor.jpeg_sizes,
            photo.target_aspect_ratio,
            photo.aspect_tolerance,
        )
        .unwrap_or(preview.size);

        let raw = if self.settings().raw_enabled {
            descriptor
                .raw_sizes
                .iter()
                .max_by_key(|size| size.area())
                .map(|size| OutputTarget::new(OutputKind::Raw, *size))
        } else {
            None
        };
        let outputs = PhotoOutputs {
            preview: preview.as_output(),
            still: OutputTarget::new(OutputKind::Still, still_size),
            raw,
        };
        log::debug!("Photo outputs: still {}, raw {:?}", still_size, raw.map(|r| r.size));
        *self.outputs.lock().unwrap_or_else(PoisonError::into_inner) = Some(outputs);

        let mut targets = vec![outputs.preview, outputs.still];
        targets.extend(outputs.raw);
        Ok(targets)
    }

    async fn on_session_configured(
        &self,
        session: Arc<dyn CaptureSession>,
    ) -> Result<(), CameraError> {
        let outputs = self.outputs()?;
        let base = RepeatingBase {
            template: CaptureTemplate::Preview,
            targets: vec![outputs.preview.id],
            settings: RequestSettings {
                ae_mode: Some(AeMode::On),
                af_mode: Some(AfMode::ContinuousPicture),
                ..Default::default()
            },
        };
        self.core.install_repeating(&session, base).await
    }

    async fn start_preview(&self, preview: PreviewTarget) -> Result<(), CameraError> {
        run_preview(self, &self.core, preview).await
    }

    async fn capture(&self) -> Result<Option<MediaLocator>, CameraError> {
        let session = self.core.session()?;
        let descriptor = self.core.descriptor()?;
        let outputs = self.outputs()?;
        let settings = self.settings();
        let (defaults, forced) =
            self.still_settings(&descriptor, settings.capture_mode, settings.jpeg_quality);

        log::info!("Photo capture ({:?})", settings.capture_mode);
        self.core.set_state(HandlerState::Capturing);
        let result = match settings.capture_mode {
            PhotoCaptureMode::Single => {
                self.capture_single(&session, &outputs, &defaults, &forced, "IMG")
                    .await
            }
            PhotoCaptureMode::Burst => {
                self.capture_burst(&session, &outputs, &defaults, settings.burst_count)
                    .await
            }
            PhotoCaptureMode::Hdr => {
                self.capture_hdr(&session, &outputs, &descriptor, &defaults)
                    .await
            }
            PhotoCaptureMode::Raw => self.capture_raw(&session, &outputs, &defaults).await,
            PhotoCaptureMode::Night => {
                self.capture_single(&session, &outputs, &defaults, &forced, "NIGHT")
                    .await
            }
            PhotoCaptureMode::Portrait => {
                self.capture_single(&session, &outputs, &defaults, &forced, "PORTRAIT")
                    .await
            }
        };
        if self.core.is_attached() {
            self.core.set_state(HandlerState::PreviewActive);
        }

        match result {
            Ok(locator) => {
                log::info!("Photo saved: {}", locator);
                Ok(Some(locator))
            }
            Err(e) => {
                log::error!("Photo capture failed: {}", e);
                Err(e)
            }
        }
    }

    fn supports_capture(&self) -> bool {
        true
    }

    /// Portrait and Night fall back to this handler when no dedicated one
    /// is registered; map them onto the matching sub-mode.
    fn set_camera_mode(&self, mode: CaptureMode) {
        let sub_mode = match mode {
            CaptureMode::Portrait => PhotoCaptureMode::Portrait,
            CaptureMode::Night => PhotoCaptureMode::Night,
            _ => PhotoCaptureMode::Single,
        };
        if sub_mode != self.capture_mode() {
            self.set_capture_mode(sub_mode);
        }
    }

    async fn close(&self) {
        self.on_detach().await;
        self.last_burst
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
