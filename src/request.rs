//! Capture request model
//!
//! A [`CaptureRequest`] is a template, a set of output targets and a typed bag
//! of [`RequestSettings`]. The [`RequestComposer`] keeps the standing
//! (repeating) request for the current session: the active mode handler owns
//! its base, the parameter controllers layer their fields on top.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hardware::{MeteringRegion, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureTemplate {
    Preview,
    StillCapture,
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AeMode {
    Off,
    On,
    OnAutoFlash,
    OnAlwaysFlash,
    OnAutoFlashRedEye,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AfMode {
    Off,
    Auto,
    Macro,
    ContinuousVideo,
    ContinuousPicture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AfTrigger {
    Idle,
    Start,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AwbMode {
    Off,
    Auto,
    Incandescent,
    Fluorescent,
    WarmFluorescent,
    Daylight,
    CloudyDaylight,
    Twilight,
    Shade,
}

/// Hardware flash unit state (distinct from the user-facing flash mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlashState {
    Off,
    Single,
    Torch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityMode {
    Off,
    Fast,
    HighQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneMode {
    Disabled,
    Hdr,
    Night,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StabilizationMode {
    Off,
    On,
}

/// Every field is optional; `None` means "no opinion".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSettings {
    pub af_mode: Option<AfMode>,
    pub af_trigger: Option<AfTrigger>,
    pub af_regions: Option<Vec<MeteringRegion>>,
    pub ae_mode: Option<AeMode>,
    pub ae_lock: Option<bool>,
    pub ae_compensation: Option<i32>,
    pub ae_regions: Option<Vec<MeteringRegion>>,
    pub awb_mode: Option<AwbMode>,
    pub flash_mode: Option<FlashState>,
    pub crop_region: Option<Rect>,
    pub sensitivity: Option<u32>,
    pub exposure_time_ns: Option<u64>,
    pub noise_reduction: Option<QualityMode>,
    pub edge_mode: Option<QualityMode>,
    pub color_correction: Option<QualityMode>,
    pub tonemap: Option<QualityMode>,
    pub stabilization: Option<StabilizationMode>,
    pub scene_mode: Option<SceneMode>,
    pub jpeg_quality: Option<u8>,
    pub jpeg_orientation: Option<i32>,
}

macro_rules! overlay_fields {
    ($base:ident, $top:ident, [$($field:ident),* $(,)?]) => {
        RequestSettings {
            $($field: $top.$field.clone().or_else(|| $base.$field.clone()),)*
        }
    };
}

impl RequestSettings {
    /// Fields set in `top` win over fields set in `self`.
    pub fn overlay(&self, top: &RequestSettings) -> RequestSettings {
        let base = self;
        overlay_fields!(
            base,
            top,
            [
                af_mode,
                af_trigger,
                af_regions,
                ae_mode,
                ae_lock,
                ae_compensation,
                ae_regions,
                awb_mode,
                flash_mode,
                crop_region,
                sensitivity,
                exposure_time_ns,
                noise_reduction,
                edge_mode,
                color_correction,
                tonemap,
                stabilization,
                scene_mode,
                jpeg_quality,
                jpeg_orientation,
            ]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub template: CaptureTemplate,
    pub targets: Vec<Uuid>,
    pub settings: RequestSettings,
}

impl CaptureRequest {
    pub fn new(template: CaptureTemplate) -> Self {
        Self {
            template,
            targets: Vec::new(),
            settings: RequestSettings::default(),
        }
    }

    pub fn with_target(mut self, target: Uuid) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = Uuid>) -> Self {
        self.targets.extend(targets);
        self
    }

    pub fn with_settings(mut self, settings: RequestSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Standing request installed by the active mode handler.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatingBase {
    pub template: CaptureTemplate,
    pub targets: Vec<Uuid>,
    pub settings: RequestSettings,
}

/// A controller patch that has been merged but not yet accepted.
#[derive(Debug, Clone)]
pub struct StagedRequest {
    pub request: Option<CaptureRequest>,
    controls: RequestSettings,
}

#[derive(Debug, Default)]
struct ComposerState {
    base: Option<RepeatingBase>,
    controls: RequestSettings,
}

#[derive(Debug, Clone, Default)]
pub struct RequestComposer {
    state: Arc<Mutex<ComposerState>>,
}

impl RequestComposer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ComposerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn install_base(&self, base: RepeatingBase) {
        self.lock().base = Some(base);
    }

    pub fn clear_base(&self) {
        self.lock().base = None;
    }

    /// Template of the active mode's standing request.
    pub fn template(&self) -> CaptureTemplate {
        self.lock()
            .base
            .as_ref()
            .map(|base| base.template)
            .unwrap_or(CaptureTemplate::Preview)
    }

    pub fn base_targets(&self) -> Vec<Uuid> {
        self.lock()
            .base
            .as_ref()
            .map(|base| base.targets.clone())
            .unwrap_or_default()
    }

    pub fn controls(&self) -> RequestSettings {
        self.lock().controls.clone()
    }

    /// Merged standing request, if a mode handler installed a base.
    pub fn repeating_request(&self) -> Option<CaptureRequest> {
        let state = self.lock();
        state.base.as_ref().map(|base| CaptureRequest {
            template: base.template,
            targets: base.targets.clone(),
            settings: base.settings.overlay(&state.controls),
        })
    }

    /// Merge a controller patch without committing it.
    pub fn stage(&self, patch: impl FnOnce(&mut RequestSettings)) -> StagedRequest {
        let state = self.lock();
        let mut controls = state.controls.clone();
        patch(&mut controls);
        let request = state.base.as_ref().map(|base| CaptureRequest {
            template: base.template,
            targets: base.targets.clone(),
            settings: base.settings.overlay(&controls),
        });
        StagedRequest { request, controls }
    }

    /// Keep a staged patch once the hardware accepted it.
    pub fn commit(&self, staged: StagedRequest) {
        self.lock().controls = staged.controls;
    }

    pub fn reset_controls(&self) {
        self.lock().controls = RequestSettings::default();
    }

    /// One-shot request: mode defaults, then controller fields, then the
    /// per-request values the caller must force.
    pub fn one_shot(
        &self,
        template: CaptureTemplate,
        targets: impl IntoIterator<Item = Uuid>,
        mode_settings: &RequestSettings,
        forced: &RequestSettings,
    ) -> CaptureRequest {
        let controls = self.controls();
        CaptureRequest::new(template)
            .with_targets(targets)
            .with_settings(mode_settings.overlay(&controls).overlay(forced))
    }
}
