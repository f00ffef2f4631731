//! Interface to the driving simulator.
//!
//! The simulator itself is an external collaborator. These traits describe
//! the part of its client API the exercises consume; `kinematic` provides an
//! in-process backend used by the binaries and the tests.

pub mod actors;
pub mod kinematic;

use nalgebra::{Rotation3, Vector3};
use std::{collections::BTreeMap, time::Duration};

use crate::{control::VehicleControl, error::{BrakeError, Result}};

pub use actors::{spawn_sensor, spawn_vehicle, ActorRegistry};
pub use kinematic::{KinematicSimulator, KinematicWorld};

pub type ActorId = u32;

/// Pose of an actor: location in meters, heading (yaw) in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub location: Vector3<f32>,
    pub yaw_deg: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(Vector3::zeros(), 0.0)
    }
}

impl Transform {
    pub fn new(location: Vector3<f32>, yaw_deg: f32) -> Self {
        Self { location, yaw_deg }
    }

    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self::new(Vector3::new(x, y, z), 0.0)
    }

    fn rotation(&self) -> Rotation3<f32> {
        Rotation3::from_axis_angle(&Vector3::z_axis(), self.yaw_deg.to_radians())
    }

    pub fn forward(&self) -> Vector3<f32> {
        self.rotation() * Vector3::x()
    }

    /// Local offset (x forward, y right-hand lateral, z up) to world coordinates.
    pub fn transform_point(&self, local: &Vector3<f32>) -> Vector3<f32> {
        self.location + self.rotation() * local
    }

    /// World point into this transform's local frame.
    pub fn inverse_transform_point(&self, world: &Vector3<f32>) -> Vector3<f32> {
        self.rotation().inverse() * (world - self.location)
    }

    /// Same heading, `distance` meters further along it.
    pub fn ahead(&self, distance: f32) -> Self {
        Self::new(self.location + self.forward() * distance, self.yaw_deg)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    pub id: String,
    attributes: BTreeMap<String, String>,
}

impl Blueprint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn set_attribute(&mut self, key: &str, value: impl ToString) {
        self.attributes.insert(key.to_string(), value.to_string());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attribute parsed as a number, if present and well formed.
    pub fn attribute_f32(&self, key: &str) -> Option<f32> {
        self.attribute(key).and_then(|v| v.parse().ok())
    }

    pub fn is_vehicle(&self) -> bool {
        self.id.starts_with("vehicle.")
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlueprintLibrary {
    blueprints: Vec<Blueprint>,
}

impl BlueprintLibrary {
    pub fn new(blueprints: Vec<Blueprint>) -> Self {
        Self { blueprints }
    }

    pub fn find(&self, id: &str) -> Result<Blueprint> {
        self.blueprints
            .iter()
            .find(|bp| bp.id == id)
            .cloned()
            .ok_or_else(|| BrakeError::UnknownBlueprint(id.to_string()))
    }

    /// Blueprints whose id matches `pattern`; `*` matches any run of characters.
    pub fn filter(&self, pattern: &str) -> Vec<Blueprint> {
        self.blueprints
            .iter()
            .filter(|bp| wildcard_match(pattern, &bp.id))
            .cloned()
            .collect()
    }
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    if !pattern.contains('*') {
        return rest.is_empty();
    }

    let parts: Vec<&str> = parts.collect();
    for (i, part) in parts.iter().enumerate() {
        let last = i + 1 == parts.len();
        if last {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

/// Raw measurement as delivered by a sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMeasurement {
    pub frame: u64,
    /// Sample count the sensor declares for `raw_data`.
    pub count: usize,
    pub raw_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorPayload {
    PointCloud(RawMeasurement),
    Radar(RawMeasurement),
}

impl SensorPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SensorPayload::PointCloud(_) => "point cloud",
            SensorPayload::Radar(_) => "radar",
        }
    }

    pub fn measurement(&self) -> &RawMeasurement {
        match self {
            SensorPayload::PointCloud(m) | SensorPayload::Radar(m) => m,
        }
    }
}

/// Invoked once per produced sensor frame, possibly from a simulator thread.
pub type SensorHandler = Box<dyn FnMut(SensorPayload) + Send + 'static>;

/// A connected simulation world.
pub trait World: Send + Sync {
    /// Advances the simulation one step and returns the new frame number.
    fn tick(&self) -> Result<u64>;

    fn blueprint_library(&self) -> BlueprintLibrary;

    fn spawn_points(&self) -> Vec<Transform>;

    /// Spawns an actor, relative to `attach_to` when given.
    fn try_spawn_actor(
        &self,
        blueprint: &Blueprint,
        transform: Transform,
        attach_to: Option<ActorId>,
    ) -> Result<ActorId>;

    fn transform(&self, actor: ActorId) -> Result<Transform>;

    fn set_transform(&self, actor: ActorId, transform: Transform) -> Result<()>;

    /// Forward speed in m/s.
    fn speed(&self, actor: ActorId) -> Result<f32>;

    fn apply_control(&self, actor: ActorId, control: VehicleControl) -> Result<()>;

    fn listen(&self, sensor: ActorId, handler: SensorHandler) -> Result<()>;

    fn destroy(&self, actor: ActorId) -> Result<()>;

    fn is_alive(&self, actor: ActorId) -> bool;

    fn type_id(&self, actor: ActorId) -> Option<String>;
}

/// Client side of a simulator connection.
pub trait Simulator {
    type World: World;

    fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<Self::World>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ahead_follows_heading() {
        let pose = Transform::new(Vector3::new(1.0, 2.0, 0.0), 90.0);
        let target = pose.ahead(10.0);
        assert_relative_eq!(target.location.x, 1.0, epsilon = 1e-4);
        assert_relative_eq!(target.location.y, 12.0, epsilon = 1e-4);
        assert_eq!(target.yaw_deg, 90.0);
    }

    #[test]
    fn local_and_world_round_trip() {
        let pose = Transform::new(Vector3::new(5.0, -3.0, 0.0), 30.0);
        let local = Vector3::new(2.5, 0.0, 1.0);
        let back = pose.inverse_transform_point(&pose.transform_point(&local));
        assert_relative_eq!(back, local, epsilon = 1e-4);
    }

    #[test]
    fn library_lookup() {
        let library = BlueprintLibrary::new(vec![
            Blueprint::new("vehicle.audi.tt"),
            Blueprint::new("vehicle.volkswagen.t2"),
            Blueprint::new("sensor.other.radar"),
        ]);
        assert!(library.find("sensor.other.radar").is_ok());
        assert!(matches!(
            library.find("sensor.camera.rgb"),
            Err(BrakeError::UnknownBlueprint(_))
        ));
        assert_eq!(library.filter("vehicle.audi.tt").len(), 1);
        assert_eq!(library.filter("vehicle.*").len(), 2);
        assert_eq!(library.filter("*radar").len(), 1);
        assert!(library.filter("vehicle.audi").is_empty());
    }

    #[test]
    fn blueprint_attributes() {
        let mut bp = Blueprint::new("sensor.lidar.ray_cast");
        bp.set_attribute("range", 20.0);
        bp.set_attribute("channels", "32");
        assert_eq!(bp.attribute_f32("range"), Some(20.0));
        assert_eq!(bp.attribute("channels"), Some("32"));
        assert_eq!(bp.attribute("missing"), None);
        assert!(!bp.is_vehicle());
    }
}
