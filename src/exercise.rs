// ================================
// src/exercise.rs - 연결, 액터 생성, 제어 루프, 정리
// ================================
use nalgebra::Vector3;
use std::sync::atomic::AtomicBool;
use tracing::{error, info};

use crate::{
    config::Config,
    control::BrakingPolicy,
    error::{BrakeError, Result},
    hazard::SensorFeed,
    lidar::PointCloudReducer,
    node::{EmergencyBrakeNode, RunSummary},
    radar::RadarReducer,
    sim::{spawn_sensor, spawn_vehicle, ActorId, ActorRegistry, Simulator, Transform, World},
};

pub const LIDAR_BLUEPRINT: &str = "sensor.lidar.ray_cast";
pub const RADAR_BLUEPRINT: &str = "sensor.other.radar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Lidar,
    Radar,
}

/// Connects to the simulator. Failure here is fatal.
pub fn connect<S: Simulator>(simulator: &S, config: &Config) -> Result<S::World> {
    info!(host = %config.host, port = config.port, "connecting to simulator");
    let world = simulator.connect(&config.host, config.port, config.timeout()?)?;
    info!("connected");
    Ok(world)
}

/// Runs one exercise on a connected world. Every actor spawned here is
/// destroyed before returning, whether the run ended normally or not.
pub async fn run<W: World + ?Sized>(
    world: &W,
    config: &Config,
    kind: SensorKind,
    shutdown: &AtomicBool,
    max_ticks: Option<u64>,
) -> Result<RunSummary> {
    let mut registry = ActorRegistry::new(world);

    let result = drive(world, &mut registry, config, kind, shutdown, max_ticks).await;
    if let Err(e) = &result {
        error!(error = %e, "exercise aborted");
    }

    info!("cleaning up actors");
    let released = registry.release_all();
    info!(released, "cleanup done");

    result
}

async fn drive<W: World + ?Sized>(
    world: &W,
    registry: &mut ActorRegistry<'_, W>,
    config: &Config,
    kind: SensorKind,
    shutdown: &AtomicBool,
    max_ticks: Option<u64>,
) -> Result<RunSummary> {
    let (ego, target) = {
        let mut rng = rand::rng();
        let ego = spawn_or_abort(world, &config.ego_model, &mut rng)?;
        registry.track(ego);
        let target = spawn_or_abort(world, &config.target_model, &mut rng)?;
        registry.track(target);
        (ego, target)
    };

    // target straight ahead with the ego's heading
    let ego_pose = world.transform(ego)?;
    world.set_transform(target, ego_pose.ahead(config.target_offset_m))?;
    info!(
        offset_m = config.target_offset_m,
        "target placed in front of the ego vehicle"
    );

    match kind {
        SensorKind::Lidar => {
            let sensor = registry.track(spawn_sensor(
                world,
                LIDAR_BLUEPRINT,
                &lidar_attributes(config),
                mount(config.lidar.mount),
                ego,
            )?);
            let feed = SensorFeed::subscribe(world, sensor, PointCloudReducer::from_config(config))?;
            info!("LIDAR sensor active");

            let policy = BrakingPolicy::for_distance(config);
            EmergencyBrakeNode::new(world, ego, feed, policy, config)
                .run(shutdown, max_ticks)
                .await
        }
        SensorKind::Radar => {
            let sensor = registry.track(spawn_sensor(
                world,
                RADAR_BLUEPRINT,
                &radar_attributes(config),
                mount(config.radar.mount),
                ego,
            )?);
            let feed = SensorFeed::subscribe(world, sensor, RadarReducer::from_config(config))?;
            info!("radar sensor active");

            let policy = BrakingPolicy::for_ttc(config);
            EmergencyBrakeNode::new(world, ego, feed, policy, config)
                .run(shutdown, max_ticks)
                .await
        }
    }
}

fn spawn_or_abort<W, R>(world: &W, model: &str, rng: &mut R) -> Result<ActorId>
where
    W: World + ?Sized,
    R: rand::Rng + ?Sized,
{
    spawn_vehicle(world, model, rng).ok_or_else(|| BrakeError::Spawn {
        blueprint: model.to_string(),
        reason: "no valid spawn point".to_string(),
    })
}

fn mount(position: [f32; 3]) -> Transform {
    Transform::new(Vector3::from(position), 0.0)
}

pub fn lidar_attributes(config: &Config) -> Vec<(&'static str, String)> {
    vec![
        ("channels", config.lidar.channels.to_string()),
        ("points_per_second", config.lidar.points_per_second.to_string()),
        ("rotation_frequency", config.lidar.rotation_frequency.to_string()),
        ("range", config.sensor_range_m.to_string()),
    ]
}

pub fn radar_attributes(config: &Config) -> Vec<(&'static str, String)> {
    vec![
        ("horizontal_fov", config.radar.horizontal_fov.to_string()),
        ("vertical_fov", config.radar.vertical_fov.to_string()),
        ("points_per_second", config.radar.points_per_second.to_string()),
        ("range", config.sensor_range_m.to_string()),
    ]
}
