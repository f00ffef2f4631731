// ================================
// src/radar.rs - radar detections and time-to-collision
// ================================
use crate::{
    config::Config,
    error::{BrakeError, Result},
    hazard::{Hazard, HazardReducer},
    sim::SensorPayload,
};

/// Bytes per detection in a raw radar buffer:
/// `velocity, azimuth (rad), altitude (rad), depth` as `f32`.
pub const DETECTION_STRIDE: usize = 16;

/// One tracked reflection. Positive `relative_velocity` means moving away.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarDetection {
    pub azimuth_deg: f32,
    pub depth_m: f32,
    pub relative_velocity_mps: f32,
}

impl RadarDetection {
    pub fn new(azimuth_deg: f32, depth_m: f32, relative_velocity_mps: f32) -> Self {
        Self {
            azimuth_deg,
            depth_m,
            relative_velocity_mps,
        }
    }

    pub fn closing_speed(&self) -> f32 {
        -self.relative_velocity_mps
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RadarFrame {
    pub detections: Vec<RadarDetection>,
}

impl RadarFrame {
    pub fn new(detections: Vec<RadarDetection>) -> Self {
        Self { detections }
    }

    /// Decodes the simulator layout; azimuth is converted to degrees and the
    /// altitude channel is dropped.
    pub fn from_raw(raw: &[u8], declared: usize) -> Result<Self> {
        if raw.len() % DETECTION_STRIDE != 0 || raw.len() / DETECTION_STRIDE != declared {
            return Err(BrakeError::malformed(
                "radar",
                raw.len(),
                DETECTION_STRIDE,
                declared,
            ));
        }

        let detections = raw
            .chunks_exact(DETECTION_STRIDE)
            .map(|chunk| {
                let get_f32 = |pos: usize| {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(&chunk[pos..pos + 4]);
                    f32::from_le_bytes(bytes)
                };
                RadarDetection {
                    relative_velocity_mps: get_f32(0),
                    azimuth_deg: get_f32(4).to_degrees(),
                    depth_m: get_f32(12),
                }
            })
            .collect();
        Ok(Self { detections })
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Writes one detection in the simulator's raw layout.
pub fn encode_detection(
    out: &mut Vec<u8>,
    velocity: f32,
    azimuth_rad: f32,
    altitude_rad: f32,
    depth: f32,
) {
    for v in [velocity, azimuth_rad, altitude_rad, depth] {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// A detection that is in front and closing, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproachingDetection {
    pub distance: f32,
    pub relative_velocity: f32,
    pub ttc: f32,
    pub azimuth: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadarHazard {
    pub min_ttc: f32,
    pub detections: Vec<ApproachingDetection>,
    /// Ego speed when the frame was reduced.
    pub ego_speed_mps: f32,
}

impl RadarHazard {
    pub fn closest(&self) -> Option<&ApproachingDetection> {
        self.detections
            .iter()
            .min_by(|a, b| a.ttc.total_cmp(&b.ttc))
    }
}

impl Hazard for RadarHazard {
    const LABEL: &'static str = "ttc";
    const UNIT: &'static str = "s";

    fn none() -> Self {
        Self {
            min_ttc: f32::INFINITY,
            detections: Vec::new(),
            ego_speed_mps: 0.0,
        }
    }

    fn scalar(&self) -> f32 {
        self.min_ttc
    }
}

pub struct RadarReducer {
    azimuth_limit_deg: f32,
    min_closing_speed: f32,
}

impl RadarReducer {
    pub fn new(azimuth_limit_deg: f32, min_closing_speed: f32) -> Self {
        Self {
            azimuth_limit_deg,
            min_closing_speed,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.forward_azimuth_limit_deg,
            config.min_closing_speed_mps,
        )
    }

    fn approaching(&self, detection: &RadarDetection) -> Option<ApproachingDetection> {
        let closing_speed = detection.closing_speed();
        // both checks reject NaN
        if !(detection.azimuth_deg.abs() <= self.azimuth_limit_deg)
            || !(closing_speed > self.min_closing_speed)
        {
            return None;
        }

        Some(ApproachingDetection {
            distance: detection.depth_m,
            relative_velocity: detection.relative_velocity_mps,
            ttc: detection.depth_m / closing_speed,
            azimuth: detection.azimuth_deg,
        })
    }

    pub fn reduce(&self, frame: &RadarFrame, ego_speed_mps: f32) -> RadarHazard {
        let detections: Vec<ApproachingDetection> = frame
            .detections
            .iter()
            .filter_map(|d| self.approaching(d))
            .collect();

        let min_ttc = detections
            .iter()
            .map(|d| d.ttc)
            .fold(f32::INFINITY, f32::min);

        RadarHazard {
            min_ttc,
            detections,
            ego_speed_mps,
        }
    }
}

impl Default for RadarReducer {
    fn default() -> Self {
        Self::new(90.0, 0.1)
    }
}

impl HazardReducer for RadarReducer {
    type Output = RadarHazard;

    fn reduce_payload(&self, payload: &SensorPayload, ego_speed_mps: f32) -> Result<RadarHazard> {
        match payload {
            SensorPayload::Radar(measurement) => {
                let frame = RadarFrame::from_raw(&measurement.raw_data, measurement.count)?;
                Ok(self.reduce(&frame, ego_speed_mps))
            }
            other => Err(BrakeError::PayloadKind {
                expected: "radar",
                actual: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn closing(azimuth_deg: f32, depth: f32, closing_speed: f32) -> RadarDetection {
        RadarDetection::new(azimuth_deg, depth, -closing_speed)
    }

    #[test]
    fn head_on_ttc() {
        let hazard = RadarReducer::default().reduce(&RadarFrame::new(vec![closing(0.0, 10.0, 5.0)]), 5.0);
        assert_relative_eq!(hazard.min_ttc, 2.0);
        assert_eq!(hazard.detections.len(), 1);
        let d = hazard.detections[0];
        assert_relative_eq!(d.distance, 10.0);
        assert_relative_eq!(d.relative_velocity, -5.0);
        assert_relative_eq!(d.azimuth, 0.0);
        assert_eq!(hazard.ego_speed_mps, 5.0);
    }

    #[test]
    fn outside_forward_hemisphere_is_ignored() {
        let reducer = RadarReducer::default();
        let frame = RadarFrame::new(vec![closing(91.0, 1.0, 50.0), closing(-91.0, 1.0, 50.0)]);
        let hazard = reducer.reduce(&frame, 0.0);
        assert_eq!(hazard.min_ttc, f32::INFINITY);
        assert!(hazard.detections.is_empty());
    }

    #[test]
    fn hemisphere_edges_are_included() {
        let reducer = RadarReducer::default();
        let frame = RadarFrame::new(vec![closing(90.0, 4.0, 2.0), closing(-90.0, 9.0, 3.0)]);
        let hazard = reducer.reduce(&frame, 0.0);
        assert_eq!(hazard.detections.len(), 2);
        assert_relative_eq!(hazard.min_ttc, 2.0);
    }

    #[test]
    fn slow_or_receding_detections_are_ignored() {
        let reducer = RadarReducer::default();
        let frame = RadarFrame::new(vec![
            closing(0.0, 5.0, 0.1),  // exactly at the cut
            closing(0.0, 5.0, 0.05), // too slow
            RadarDetection::new(0.0, 5.0, 3.0), // moving away
        ]);
        assert_eq!(reducer.reduce(&frame, 0.0).min_ttc, f32::INFINITY);
    }

    #[test]
    fn zero_depth_is_immediate_collision() {
        let hazard = RadarReducer::default().reduce(&RadarFrame::new(vec![closing(0.0, 0.0, 1.0)]), 1.0);
        assert_eq!(hazard.min_ttc, 0.0);
    }

    #[test]
    fn minimum_over_all_qualifying() {
        let frame = RadarFrame::new(vec![
            closing(10.0, 20.0, 2.0),
            closing(-5.0, 6.0, 4.0),
            closing(30.0, 3.0, 0.5),
        ]);
        let hazard = RadarReducer::default().reduce(&frame, 0.0);
        assert_relative_eq!(hazard.min_ttc, 1.5);
        assert_eq!(hazard.closest().map(|d| d.azimuth), Some(-5.0));
    }

    #[test]
    fn same_frame_twice_same_result() {
        let reducer = RadarReducer::default();
        let frame = RadarFrame::new(vec![closing(12.0, 7.0, 3.5), closing(0.0, 30.0, 1.0)]);
        assert_eq!(reducer.reduce(&frame, 2.0), reducer.reduce(&frame, 2.0));
    }

    #[test]
    fn raw_layout_converts_azimuth_to_degrees() {
        let mut raw = Vec::new();
        encode_detection(&mut raw, -4.0, std::f32::consts::FRAC_PI_6, 0.1, 12.0);
        let frame = RadarFrame::from_raw(&raw, 1).unwrap();
        let d = frame.detections[0];
        assert_relative_eq!(d.azimuth_deg, 30.0, epsilon = 1e-4);
        assert_relative_eq!(d.depth_m, 12.0);
        assert_relative_eq!(d.relative_velocity_mps, -4.0);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut raw = Vec::new();
        encode_detection(&mut raw, 0.0, 0.0, 0.0, 1.0);
        raw.pop();
        assert!(matches!(
            RadarFrame::from_raw(&raw, 1),
            Err(BrakeError::MalformedPayload { stride: 16, .. })
        ));
    }
}
