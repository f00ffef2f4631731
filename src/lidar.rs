// ================================
// src/lidar.rs - LiDAR 포인트 클라우드 처리
// ================================
use nalgebra::Vector3;

use crate::{
    config::Config,
    error::{BrakeError, Result},
    hazard::{Hazard, HazardReducer},
    sim::SensorPayload,
};

/// Bytes per point in a raw point cloud: `x, y, z, intensity` as `f32`.
pub const POINT_STRIDE: usize = 16;

/// A LiDAR return in the sensor's local frame (x forward, z up).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LidarPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl LidarPoint {
    pub fn new(x: f32, y: f32, z: f32, intensity: f32) -> Self {
        Self { x, y, z, intensity }
    }

    /// Parse a point from a full 16-byte chunk.
    fn from_chunk(chunk: &[u8]) -> Self {
        let get_f32 = |pos: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&chunk[pos..pos + 4]);
            f32::from_le_bytes(bytes)
        };

        LidarPoint {
            x: get_f32(0),          // Bytes 0-3
            y: get_f32(4),          // Bytes 4-7
            z: get_f32(8),          // Bytes 8-11
            intensity: get_f32(12), // Bytes 12-15
        }
    }

    pub fn position(&self) -> Vector3<f32> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn distance(&self) -> f32 {
        self.position().norm()
    }

    /// Appends the point to a raw buffer in the same layout `from_chunk` reads.
    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        for v in [self.x, self.y, self.z, self.intensity] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
}

/// All points of one sensor tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointFrame {
    pub points: Vec<LidarPoint>,
}

impl PointFrame {
    pub fn new(points: Vec<LidarPoint>) -> Self {
        Self { points }
    }

    /// Decodes a flat `[x, y, z, i]*` buffer. A trailing partial point or a
    /// count that disagrees with `declared` is an error, never truncated.
    pub fn from_raw(raw: &[u8], declared: usize) -> Result<Self> {
        if raw.len() % POINT_STRIDE != 0 || raw.len() / POINT_STRIDE != declared {
            return Err(BrakeError::malformed(
                "point cloud",
                raw.len(),
                POINT_STRIDE,
                declared,
            ));
        }

        let points = raw
            .chunks_exact(POINT_STRIDE)
            .map(LidarPoint::from_chunk)
            .collect();
        Ok(Self { points })
    }

    pub fn to_raw(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.points.len() * POINT_STRIDE);
        for point in &self.points {
            point.write_bytes(&mut raw);
        }
        raw
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Forward half-space above the ground plane. Returns with a non-finite
/// coordinate are skipped, never treated as obstacles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionOfInterest {
    pub ground_z: f32,
}

impl Default for RegionOfInterest {
    fn default() -> Self {
        Self { ground_z: -2.0 }
    }
}

impl RegionOfInterest {
    pub fn contains(&self, point: &LidarPoint) -> bool {
        point.x > 0.0 && point.z > self.ground_z && point.position().iter().all(|c| c.is_finite())
    }
}

/// Nearest obstacle seen by the LiDAR in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LidarHazard {
    pub min_distance: f32,
    /// Points that passed the ROI filter.
    pub qualifying_points: usize,
}

impl Hazard for LidarHazard {
    const LABEL: &'static str = "distance";
    const UNIT: &'static str = "m";

    fn none() -> Self {
        Self {
            min_distance: f32::INFINITY,
            qualifying_points: 0,
        }
    }

    fn scalar(&self) -> f32 {
        self.min_distance
    }
}

pub struct PointCloudReducer {
    roi: RegionOfInterest,
}

impl PointCloudReducer {
    pub fn new(roi: RegionOfInterest) -> Self {
        Self { roi }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(RegionOfInterest {
            ground_z: config.ground_z,
        })
    }

    /// Minimum distance from the sensor origin over the points inside the
    /// ROI, `+inf` when none qualify.
    pub fn nearest_obstacle(&self, frame: &PointFrame) -> f32 {
        self.reduce(frame).min_distance
    }

    pub fn reduce(&self, frame: &PointFrame) -> LidarHazard {
        frame
            .points
            .iter()
            .filter(|point| self.roi.contains(point))
            .fold(LidarHazard::none(), |acc, point| LidarHazard {
                min_distance: acc.min_distance.min(point.distance()),
                qualifying_points: acc.qualifying_points + 1,
            })
    }
}

impl Default for PointCloudReducer {
    fn default() -> Self {
        Self::new(RegionOfInterest::default())
    }
}

impl HazardReducer for PointCloudReducer {
    type Output = LidarHazard;

    fn reduce_payload(&self, payload: &SensorPayload, _ego_speed_mps: f32) -> Result<LidarHazard> {
        match payload {
            SensorPayload::PointCloud(measurement) => {
                let frame = PointFrame::from_raw(&measurement.raw_data, measurement.count)?;
                Ok(self.reduce(&frame))
            }
            other => Err(BrakeError::PayloadKind {
                expected: "point cloud",
                actual: other.kind(),
            }),
        }
    }
}
