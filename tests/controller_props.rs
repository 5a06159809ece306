//! Property-Based Tests for the control math and range guards
//!
//! Run with: cargo test --test controller_props

use lenscore::controller::{
    compensation_to_ev, crop_region, ev_to_compensation, focus_region, RangedController,
};
use lenscore::hardware::Rect;
use proptest::prelude::*;

mod support;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    /// The crop is centered and sized sensor/zoom, within a pixel of rounding.
    #[test]
    fn crop_is_centered_and_scaled(
        width in 640i32..8000,
        height in 480i32..6000,
        zoom in 1.0f32..10.0,
    ) {
        let sensor = Rect::from_size(width, height);
        let crop = crop_region(sensor, zoom);

        let expected_w = width as f32 / zoom;
        let expected_h = height as f32 / zoom;
        prop_assert!((crop.width() as f32 - expected_w).abs() <= 1.0,
            "width {} vs {}", crop.width(), expected_w);
        prop_assert!((crop.height() as f32 - expected_h).abs() <= 1.0,
            "height {} vs {}", crop.height(), expected_h);

        let (cx, cy) = crop.center();
        let (sx, sy) = sensor.center();
        prop_assert!((cx - sx).abs() <= 1 && (cy - sy).abs() <= 1);
    }

    /// The crop never leaves the active array.
    #[test]
    fn crop_stays_inside_sensor(
        left in 0i32..64,
        top in 0i32..64,
        width in 400i32..8000,
        height in 400i32..6000,
        zoom in -4.0f32..20.0,
    ) {
        let sensor = Rect::new(left, top, left + width, top + height);
        let crop = crop_region(sensor, zoom);
        prop_assert!(crop.left >= sensor.left && crop.top >= sensor.top);
        prop_assert!(crop.right <= sensor.right && crop.bottom <= sensor.bottom);
        prop_assert!(crop.width() > 0 && crop.height() > 0);
    }

    /// Compensation survives a trip through EV for any positive step.
    #[test]
    fn ev_round_trip(
        compensation in -24i32..=24,
        step in prop::sample::select(vec![1.0f32 / 6.0, 1.0 / 3.0, 0.5, 1.0]),
    ) {
        let ev = compensation_to_ev(compensation, Some(step));
        prop_assert_eq!(ev_to_compensation(ev, Some(step)), compensation);
    }

    /// A missing or non-positive step falls back to thirds both ways.
    #[test]
    fn ev_fallback_step_round_trip(
        compensation in -24i32..=24,
        step in prop::option::of(-1.0f32..=0.0),
    ) {
        let ev = compensation_to_ev(compensation, step);
        prop_assert!((ev - compensation as f32 / 3.0).abs() < 1e-5);
        prop_assert_eq!(ev_to_compensation(ev, step), compensation);
    }

    /// Tap-to-focus regions are clamped into the array for any point.
    #[test]
    fn focus_region_inside_array(
        x in -1.0f32..2.0,
        y in -1.0f32..2.0,
        size in 2u32..1000,
    ) {
        let array = Rect::from_size(4000, 3000);
        let region = focus_region(array, x, y, size);
        prop_assert!(region.left >= 0 && region.top >= 0);
        prop_assert!(region.right <= 4000 && region.bottom <= 3000);
        prop_assert!(region.width() <= size as i32);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Out-of-range writes are rejected without touching the hardware.
    #[test]
    fn out_of_range_writes_rejected(
        zoom in prop_oneof![-10.0f32..0.99, 4.01f32..50.0],
        compensation in prop_oneof![-100i32..-12, 13i32..100],
        iso in prop_oneof![0u32..100, 3201u32..100_000],
    ) {
        runtime().block_on(async {
            let harness = support::ready_harness().await;
            let core = &harness.rig.orchestrator;
            let registry = core.registry();
            let submitted = harness.rig.hardware.log().repeating.len();

            assert!(!core.set_zoom(zoom).await);
            assert!(!core.set_exposure_compensation(compensation).await);
            assert!(!core.set_iso(Some(iso)).await);

            assert_eq!(harness.rig.hardware.log().repeating.len(), submitted);
            assert_eq!(registry.zoom().current_value(), 1.0);
            assert_eq!(registry.exposure().current_value(), 0);
            assert!(registry.iso().is_auto_mode());
            core.close().await;
        });
    }
}
