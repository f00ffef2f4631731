//! Property-based tests for the hazard reducers and the braking policy.
//!
//! Run with: cargo test --test reducer_properties

use emergency_brake::{
    control::{BrakingPolicy, Decision},
    lidar::{LidarPoint, PointCloudReducer, PointFrame},
    radar::{RadarDetection, RadarFrame, RadarReducer},
};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_point() -> impl Strategy<Value = LidarPoint> {
    (-30.0..30.0f32, -30.0..30.0f32, -5.0..5.0f32, 0.0..1.0f32)
        .prop_map(|(x, y, z, i)| LidarPoint::new(x, y, z, i))
}

fn arb_cloud() -> impl Strategy<Value = Vec<LidarPoint>> {
    prop::collection::vec(arb_point(), 0..64)
}

fn arb_detection() -> impl Strategy<Value = RadarDetection> {
    (-180.0..180.0f32, 0.0..60.0f32, -20.0..20.0f32)
        .prop_map(|(az, depth, vel)| RadarDetection::new(az, depth, vel))
}

fn qualifies(p: &LidarPoint) -> bool {
    p.x > 0.0 && p.z > -2.0
}

// =============================================================================
// Point cloud reducer
// =============================================================================

proptest! {
    #[test]
    fn infinite_iff_nothing_qualifies(points in arb_cloud()) {
        let nearest = PointCloudReducer::default().nearest_obstacle(&PointFrame::new(points.clone()));
        prop_assert_eq!(nearest.is_infinite(), !points.iter().any(qualifies));
    }

    #[test]
    fn nearest_is_min_over_qualifying(points in arb_cloud()) {
        let expected = points
            .iter()
            .filter(|p| qualifies(p))
            .map(|p| (p.x * p.x + p.y * p.y + p.z * p.z).sqrt())
            .fold(f32::INFINITY, f32::min);

        let nearest = PointCloudReducer::default().nearest_obstacle(&PointFrame::new(points));
        if expected.is_finite() {
            prop_assert!((nearest - expected).abs() <= 1e-4 * expected.max(1.0));
        } else {
            prop_assert!(nearest.is_infinite());
        }
    }

    #[test]
    fn point_order_does_not_matter(points in arb_cloud()) {
        let reducer = PointCloudReducer::default();
        let mut reversed = points.clone();
        reversed.reverse();
        prop_assert_eq!(
            reducer.nearest_obstacle(&PointFrame::new(points)),
            reducer.nearest_obstacle(&PointFrame::new(reversed))
        );
    }

    #[test]
    fn reducing_twice_gives_same_result(points in arb_cloud()) {
        let reducer = PointCloudReducer::default();
        let frame = PointFrame::new(points);
        prop_assert_eq!(reducer.reduce(&frame), reducer.reduce(&frame));
    }

    #[test]
    fn raw_decoding_preserves_points(points in arb_cloud()) {
        let frame = PointFrame::new(points);
        let decoded = PointFrame::from_raw(&frame.to_raw(), frame.len()).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn any_partial_point_is_rejected(points in arb_cloud(), extra in 1usize..16) {
        let frame = PointFrame::new(points);
        let mut raw = frame.to_raw();
        raw.extend(std::iter::repeat(0u8).take(extra));
        prop_assert!(PointFrame::from_raw(&raw, frame.len()).is_err());
    }
}

// =============================================================================
// Radar reducer
// =============================================================================

proptest! {
    #[test]
    fn rear_detections_never_qualify(
        az in 90.5..180.0f32,
        sign in prop::bool::ANY,
        depth in 0.0..60.0f32,
        closing in 0.2..50.0f32,
    ) {
        let az = if sign { az } else { -az };
        let frame = RadarFrame::new(vec![RadarDetection::new(az, depth, -closing)]);
        let hazard = RadarReducer::default().reduce(&frame, 0.0);
        prop_assert!(hazard.detections.is_empty());
        prop_assert!(hazard.min_ttc.is_infinite());
    }

    #[test]
    fn qualifying_detections_are_forward_and_closing(
        detections in prop::collection::vec(arb_detection(), 0..32),
    ) {
        let hazard = RadarReducer::default().reduce(&RadarFrame::new(detections), 0.0);
        for d in &hazard.detections {
            prop_assert!(d.azimuth.abs() <= 90.0);
            prop_assert!(-d.relative_velocity > 0.1);
            prop_assert!(d.ttc >= 0.0 && d.ttc.is_finite());
            prop_assert!(d.ttc >= hazard.min_ttc);
        }
        prop_assert_eq!(hazard.detections.is_empty(), hazard.min_ttc.is_infinite());
    }
}

// =============================================================================
// Braking policy
// =============================================================================

proptest! {
    #[test]
    fn brakes_exactly_after_stable_streak(
        hazards in prop::collection::vec(prop_oneof![0.0..4.0f32, Just(f32::INFINITY)], 0..64),
        stable in 1u32..6,
    ) {
        let threshold = 2.0;
        let mut policy = BrakingPolicy::new(threshold, stable);
        let mut streak = 0u32;

        for h in hazards {
            streak = if h < threshold { streak + 1 } else { 0 };
            let expected = if streak >= stable { Decision::Brake } else { Decision::Advance };
            prop_assert_eq!(policy.update(h), expected);
            prop_assert_eq!(policy.counter(), streak);
        }
    }
}
