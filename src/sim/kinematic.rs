//! In-process stand-in for the simulator server.
//!
//! A flat, straight world with longitudinal vehicle motion only. LiDAR
//! returns are synthesized from the near face of every other vehicle plus a
//! ground grid; radar returns from the same face inside the field of view,
//! with the simulator's sign convention (positive velocity = moving away).

use nalgebra::Vector3;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Mutex,
    time::Duration,
};
use tracing::{debug, warn};

use super::{
    ActorId, Blueprint, BlueprintLibrary, RawMeasurement, SensorHandler, SensorPayload, Simulator,
    Transform, World,
};
use crate::{
    control::VehicleControl,
    error::{BrakeError, Result},
    hazard::lock,
    lidar::LidarPoint,
    radar::encode_detection,
};

pub const VEHICLE_HALF_LENGTH: f32 = 2.5;
pub const VEHICLE_HALF_WIDTH: f32 = 0.9;
pub const VEHICLE_HEIGHT: f32 = 1.6;

const MAX_ACCEL: f32 = 3.0; // m/s² at full throttle
const MAX_DECEL: f32 = 8.0; // m/s² at full brake
const DEFAULT_STEP_S: f32 = 0.05;
const SPAWN_CLEARANCE_M: f32 = 5.0;

const GROUND_GRID_STEP_M: f32 = 2.0;
const FACE_GRID_STEP_M: f32 = 0.3;

/// Connects to a fresh `KinematicWorld`.
#[derive(Debug, Clone)]
pub struct KinematicSimulator {
    step_s: f32,
    reachable: bool,
}

impl Default for KinematicSimulator {
    fn default() -> Self {
        Self {
            step_s: DEFAULT_STEP_S,
            reachable: true,
        }
    }
}

impl KinematicSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A simulator whose every connection attempt fails.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::default()
        }
    }
}

impl Simulator for KinematicSimulator {
    type World = KinematicWorld;

    fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<KinematicWorld> {
        let refuse = |reason: &str| BrakeError::Connection {
            host: host.to_string(),
            port,
            reason: reason.to_string(),
        };

        if !self.reachable {
            return Err(refuse("connection refused"));
        }
        if host.is_empty() || port == 0 {
            return Err(refuse("invalid address"));
        }
        if timeout.is_zero() {
            return Err(refuse("timed out"));
        }

        Ok(KinematicWorld::new(self.step_s))
    }
}

#[derive(Debug, Clone, Copy)]
enum ActorKind {
    Vehicle,
    Lidar {
        range: f32,
    },
    Radar {
        range: f32,
        half_hfov_deg: f32,
        half_vfov_deg: f32,
    },
}

#[derive(Debug, Clone)]
struct ActorState {
    type_id: String,
    kind: ActorKind,
    /// World pose for vehicles, mount relative to `parent` for sensors.
    transform: Transform,
    parent: Option<ActorId>,
    speed: f32,
    control: VehicleControl,
}

#[derive(Debug, Default)]
struct WorldState {
    frame: u64,
    next_id: ActorId,
    actors: BTreeMap<ActorId, ActorState>,
    spawn_points: Vec<Transform>,
    collisions: u32,
    /// Highest relative speed seen at any collision.
    impact_speed: f32,
}

impl WorldState {
    fn actor(&self, id: ActorId) -> Result<&ActorState> {
        self.actors.get(&id).ok_or(BrakeError::ActorNotFound(id))
    }

    fn vehicles(&self) -> impl Iterator<Item = (ActorId, &ActorState)> {
        self.actors
            .iter()
            .filter(|(_, a)| matches!(a.kind, ActorKind::Vehicle))
            .map(|(&id, a)| (id, a))
    }

    fn world_pose(&self, id: ActorId) -> Result<Transform> {
        let actor = self.actor(id)?;
        match actor.parent {
            None => Ok(actor.transform),
            Some(parent) => {
                let base = self.actor(parent)?.transform;
                Ok(Transform::new(
                    base.transform_point(&actor.transform.location),
                    base.yaw_deg + actor.transform.yaw_deg,
                ))
            }
        }
    }

    fn velocity(&self, id: ActorId) -> Result<Vector3<f32>> {
        let actor = self.actor(id)?;
        match actor.parent {
            None => Ok(actor.transform.forward() * actor.speed),
            Some(parent) => self.velocity(parent),
        }
    }

    fn step(&mut self, dt: f32) {
        for actor in self.actors.values_mut() {
            if !matches!(actor.kind, ActorKind::Vehicle) {
                continue;
            }
            let accel = actor.control.throttle * MAX_ACCEL - actor.control.brake * MAX_DECEL;
            actor.speed = (actor.speed + accel * dt).max(0.0);
            let delta = actor.transform.forward() * actor.speed * dt;
            actor.transform.location += delta;
        }

        let ids: Vec<ActorId> = self.vehicles().map(|(id, _)| id).collect();
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                let (pa, pb) = (self.actors[&a].transform, self.actors[&b].transform);
                let local = pa.inverse_transform_point(&pb.location);
                let overlapping = local.x.abs() < 2.0 * VEHICLE_HALF_LENGTH
                    && local.y.abs() < 2.0 * VEHICLE_HALF_WIDTH;
                let moving = self.actors[&a].speed > 0.0 || self.actors[&b].speed > 0.0;

                if overlapping && moving {
                    let impact = (self.actors[&a].speed - self.actors[&b].speed).abs();
                    warn!(a, b, impact, "collision");
                    self.collisions += 1;
                    self.impact_speed = self.impact_speed.max(impact);
                    for id in [a, b] {
                        if let Some(actor) = self.actors.get_mut(&id) {
                            actor.speed = 0.0;
                        }
                    }
                }
            }
        }
    }

    /// Sample points on the face of `vehicle` nearest to the sensor, in the
    /// sensor frame.
    fn near_face(&self, sensor_pose: &Transform, vehicle: &ActorState, ys: &[f32], hs: &[f32]) -> Vec<Vector3<f32>> {
        let center = sensor_pose.inverse_transform_point(&vehicle.transform.location);
        let face_x = if center.x >= 0.0 {
            center.x - VEHICLE_HALF_LENGTH
        } else {
            center.x + VEHICLE_HALF_LENGTH
        };

        let mut points = Vec::with_capacity(ys.len() * hs.len());
        for &dy in ys {
            for &h in hs {
                points.push(Vector3::new(face_x, center.y + dy, center.z + h));
            }
        }
        points
    }

    fn lidar_frame(&self, sensor: ActorId, parent: ActorId, range: f32) -> Result<RawMeasurement> {
        let pose = self.world_pose(sensor)?;
        let mut points: Vec<Vector3<f32>> = Vec::new();

        let ys = grid(-VEHICLE_HALF_WIDTH, VEHICLE_HALF_WIDTH, FACE_GRID_STEP_M);
        let hs = grid(FACE_GRID_STEP_M, VEHICLE_HEIGHT, FACE_GRID_STEP_M);
        for (id, vehicle) in self.vehicles() {
            if id != parent {
                points.extend(self.near_face(&pose, vehicle, &ys, &hs));
            }
        }

        // ground plane at z = 0
        for x in grid(-range, range, GROUND_GRID_STEP_M) {
            for y in grid(-4.0, 4.0, GROUND_GRID_STEP_M) {
                points.push(Vector3::new(x, y, -pose.location.z));
            }
        }

        let mut raw = Vec::new();
        let mut count = 0;
        for p in points.iter().filter(|p| p.norm() <= range) {
            let intensity = (1.0 - p.norm() / range).max(0.0);
            LidarPoint::new(p.x, p.y, p.z, intensity).write_bytes(&mut raw);
            count += 1;
        }

        Ok(RawMeasurement {
            frame: self.frame,
            count,
            raw_data: raw,
        })
    }

    fn radar_frame(
        &self,
        sensor: ActorId,
        parent: ActorId,
        range: f32,
        half_hfov_deg: f32,
        half_vfov_deg: f32,
    ) -> Result<RawMeasurement> {
        let pose = self.world_pose(sensor)?;
        let own_velocity = self.velocity(sensor)?;

        let mut raw = Vec::new();
        let mut count = 0;
        for (id, vehicle) in self.vehicles() {
            if id == parent {
                continue;
            }
            let relative_world = vehicle.transform.forward() * vehicle.speed - own_velocity;
            let relative = pose.inverse_transform_point(&(pose.location + relative_world));

            // full face height plus the row level with the sensor, which stays
            // inside the vertical FOV however close the target gets
            let mut hs = grid(FACE_GRID_STEP_M, VEHICLE_HEIGHT, FACE_GRID_STEP_M);
            hs.push((pose.location.z - vehicle.transform.location.z).clamp(0.0, VEHICLE_HEIGHT));

            for p in self.near_face(&pose, vehicle, &[-0.6, 0.0, 0.6], &hs) {
                let depth = p.norm();
                let azimuth = p.y.atan2(p.x);
                let altitude = p.z.atan2(p.x.hypot(p.y));
                if depth > range
                    || depth == 0.0
                    || azimuth.to_degrees().abs() > half_hfov_deg
                    || altitude.to_degrees().abs() > half_vfov_deg
                {
                    continue;
                }

                let radial = relative.dot(&(p / depth));
                encode_detection(&mut raw, radial, azimuth, altitude, depth);
                count += 1;
            }
        }

        Ok(RawMeasurement {
            frame: self.frame,
            count,
            raw_data: raw,
        })
    }

    fn sensor_payloads(&self) -> Vec<(ActorId, SensorPayload)> {
        let mut payloads = Vec::new();

        for (&id, actor) in &self.actors {
            let Some(parent) = actor.parent else { continue };
            let payload = match actor.kind {
                ActorKind::Vehicle => continue,
                ActorKind::Lidar { range } => {
                    self.lidar_frame(id, parent, range).map(SensorPayload::PointCloud)
                }
                ActorKind::Radar {
                    range,
                    half_hfov_deg,
                    half_vfov_deg,
                } => self
                    .radar_frame(id, parent, range, half_hfov_deg, half_vfov_deg)
                    .map(SensorPayload::Radar),
            };

            match payload {
                Ok(payload) => payloads.push((id, payload)),
                // parent destroyed before the sensor
                Err(e) => debug!(sensor = id, error = %e, "sensor skipped"),
            }
        }

        payloads
    }
}

/// `start, start + step, ...` up to and including `end`.
fn grid(start: f32, end: f32, step: f32) -> Vec<f32> {
    let n = ((end - start) / step + 1e-3).floor() as usize;
    (0..=n).map(|i| start + i as f32 * step).collect()
}

fn default_spawn_points() -> Vec<Transform> {
    (0..10).map(|i| Transform::at(i as f32 * 50.0, 0.0, 0.0)).collect()
}

fn default_library() -> BlueprintLibrary {
    BlueprintLibrary::new(
        [
            "vehicle.audi.tt",
            "vehicle.volkswagen.t2",
            "vehicle.tesla.model3",
            "sensor.lidar.ray_cast",
            "sensor.other.radar",
        ]
        .into_iter()
        .map(Blueprint::new)
        .collect(),
    )
}

pub struct KinematicWorld {
    step_s: f32,
    state: Mutex<WorldState>,
    listeners: Mutex<HashMap<ActorId, SensorHandler>>,
}

impl fmt::Debug for KinematicWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("KinematicWorld")
            .field("step_s", &self.step_s)
            .field("frame", &state.frame)
            .field("actors", &state.actors.len())
            .field("listeners", &lock(&self.listeners).len())
            .finish()
    }
}

impl Default for KinematicWorld {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_S)
    }
}

impl KinematicWorld {
    pub fn new(step_s: f32) -> Self {
        Self {
            step_s,
            state: Mutex::new(WorldState {
                next_id: 1,
                spawn_points: default_spawn_points(),
                ..WorldState::default()
            }),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_spawn_points(spawn_points: Vec<Transform>) -> Self {
        let world = Self::default();
        lock(&world.state).spawn_points = spawn_points;
        world
    }

    pub fn collided(&self) -> bool {
        lock(&self.state).collisions > 0
    }

    /// Worst closing speed at contact, 0 when nothing collided.
    pub fn impact_speed(&self) -> f32 {
        lock(&self.state).impact_speed
    }

    pub fn alive_actors(&self) -> usize {
        lock(&self.state).actors.len()
    }

    /// Bumper-to-bumper distance between two vehicles.
    pub fn gap(&self, a: ActorId, b: ActorId) -> Result<f32> {
        let state = lock(&self.state);
        let (pa, pb) = (state.actor(a)?.transform, state.actor(b)?.transform);
        Ok((pb.location - pa.location).norm() - 2.0 * VEHICLE_HALF_LENGTH)
    }
}

impl World for KinematicWorld {
    fn tick(&self) -> Result<u64> {
        let (frame, payloads) = {
            let mut state = lock(&self.state);
            state.frame += 1;
            state.step(self.step_s);
            (state.frame, state.sensor_payloads())
        };

        let mut listeners = lock(&self.listeners);
        for (sensor, payload) in payloads {
            if let Some(handler) = listeners.get_mut(&sensor) {
                handler(payload);
            }
        }

        Ok(frame)
    }

    fn blueprint_library(&self) -> BlueprintLibrary {
        default_library()
    }

    fn spawn_points(&self) -> Vec<Transform> {
        lock(&self.state).spawn_points.clone()
    }

    fn try_spawn_actor(
        &self,
        blueprint: &Blueprint,
        transform: Transform,
        attach_to: Option<ActorId>,
    ) -> Result<ActorId> {
        let fail = |reason: String| BrakeError::Spawn {
            blueprint: blueprint.id.clone(),
            reason,
        };

        let kind = match blueprint.id.as_str() {
            id if id.starts_with("vehicle.") => ActorKind::Vehicle,
            "sensor.lidar.ray_cast" => ActorKind::Lidar {
                range: blueprint.attribute_f32("range").unwrap_or(10.0),
            },
            "sensor.other.radar" => ActorKind::Radar {
                range: blueprint.attribute_f32("range").unwrap_or(100.0),
                half_hfov_deg: blueprint.attribute_f32("horizontal_fov").unwrap_or(30.0) / 2.0,
                half_vfov_deg: blueprint.attribute_f32("vertical_fov").unwrap_or(10.0) / 2.0,
            },
            other => return Err(BrakeError::UnknownBlueprint(other.to_string())),
        };

        let mut state = lock(&self.state);
        match (kind, attach_to) {
            (ActorKind::Vehicle, Some(_)) => {
                return Err(fail("vehicles cannot be attached".to_string()))
            }
            (ActorKind::Vehicle, None) => {
                let occupied = state.vehicles().any(|(_, v)| {
                    (v.transform.location - transform.location).norm() < SPAWN_CLEARANCE_M
                });
                if occupied {
                    return Err(fail("spawn point occupied".to_string()));
                }
            }
            (_, None) => return Err(fail("sensors must be attached to a vehicle".to_string())),
            (_, Some(parent)) => {
                if !matches!(state.actor(parent)?.kind, ActorKind::Vehicle) {
                    return Err(fail(format!("parent {parent} is not a vehicle")));
                }
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.actors.insert(
            id,
            ActorState {
                type_id: blueprint.id.clone(),
                kind,
                transform,
                parent: attach_to,
                speed: 0.0,
                control: VehicleControl::default(),
            },
        );
        Ok(id)
    }

    fn transform(&self, actor: ActorId) -> Result<Transform> {
        lock(&self.state).world_pose(actor)
    }

    fn set_transform(&self, actor: ActorId, transform: Transform) -> Result<()> {
        let mut state = lock(&self.state);
        let actor = state
            .actors
            .get_mut(&actor)
            .ok_or(BrakeError::ActorNotFound(actor))?;
        actor.transform = transform;
        Ok(())
    }

    fn speed(&self, actor: ActorId) -> Result<f32> {
        Ok(lock(&self.state).velocity(actor)?.norm())
    }

    fn apply_control(&self, actor: ActorId, control: VehicleControl) -> Result<()> {
        let mut state = lock(&self.state);
        match state.actors.get_mut(&actor) {
            Some(a) if matches!(a.kind, ActorKind::Vehicle) => {
                a.control = control.clamped();
                Ok(())
            }
            _ => Err(BrakeError::ActorNotFound(actor)),
        }
    }

    fn listen(&self, sensor: ActorId, handler: SensorHandler) -> Result<()> {
        let kind = lock(&self.state).actor(sensor)?.kind;
        if matches!(kind, ActorKind::Vehicle) {
            return Err(BrakeError::ActorNotFound(sensor));
        }
        lock(&self.listeners).insert(sensor, handler);
        Ok(())
    }

    fn destroy(&self, actor: ActorId) -> Result<()> {
        lock(&self.state)
            .actors
            .remove(&actor)
            .ok_or(BrakeError::ActorNotFound(actor))?;
        lock(&self.listeners).remove(&actor);
        Ok(())
    }

    fn is_alive(&self, actor: ActorId) -> bool {
        lock(&self.state).actors.contains_key(&actor)
    }

    fn type_id(&self, actor: ActorId) -> Option<String> {
        lock(&self.state).actors.get(&actor).map(|a| a.type_id.clone())
    }
}
