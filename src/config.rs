// ================================
// src/config.rs - every threshold and setting of the exercises
// ================================
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

use crate::error::{BrakeError, Result};

/// LIDAR blueprint attributes (`sensor.lidar.ray_cast`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LidarSettings {
    pub channels: u32,
    pub points_per_second: u32,
    pub rotation_frequency: f32,
    /// Mount position relative to the ego vehicle, meters.
    pub mount: [f32; 3],
}

impl Default for LidarSettings {
    fn default() -> Self {
        Self {
            channels: 32,
            points_per_second: 90_000,
            rotation_frequency: 10.0,
            mount: [0.0, 0.0, 2.5],
        }
    }
}

/// Radar blueprint attributes (`sensor.other.radar`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RadarSettings {
    pub horizontal_fov: f32,
    pub vertical_fov: f32,
    pub points_per_second: u32,
    pub mount: [f32; 3],
}

impl Default for RadarSettings {
    fn default() -> Self {
        Self {
            horizontal_fov: 45.0,
            vertical_fov: 30.0,
            points_per_second: 1500,
            mount: [2.5, 0.0, 1.0],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // 시뮬레이터 연결
    pub host: String,
    pub port: u16,
    pub timeout_s: f64,
    pub tick_period_ms: u64,

    // 위험 판단
    pub brake_threshold_m: f32,
    pub ttc_threshold_s: f32,
    pub stable_detection_count: u32,
    pub ground_z: f32,
    pub forward_azimuth_limit_deg: f32,
    pub min_closing_speed_mps: f32,

    // 센서 / 제어
    pub sensor_range_m: f32,
    pub cruise_throttle: f32,

    // 시나리오
    pub ego_model: String,
    pub target_model: String,
    pub target_offset_m: f32,

    pub lidar: LidarSettings,
    pub radar: RadarSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 2000,
            timeout_s: 10.0,
            tick_period_ms: 100,
            brake_threshold_m: 5.0,
            ttc_threshold_s: 2.0,
            stable_detection_count: 3,
            ground_z: -2.0,
            forward_azimuth_limit_deg: 90.0,
            min_closing_speed_mps: 0.1,
            sensor_range_m: 20.0,
            cruise_throttle: 0.3,
            ego_model: "vehicle.audi.tt".to_string(),
            target_model: "vehicle.volkswagen.t2".to_string(),
            target_offset_m: 10.0,
            lidar: LidarSettings::default(),
            radar: RadarSettings::default(),
        }
    }
}

impl Config {
    /// Preset of the LIDAR exercise: 20 m range, slow cruise.
    pub fn lidar_preset() -> Self {
        Self::default()
    }

    /// Preset of the radar exercise: 50 m range, faster cruise.
    pub fn radar_preset() -> Self {
        Self {
            sensor_range_m: 50.0,
            cruise_throttle: 0.5,
            ..Self::default()
        }
    }

    /// Loads the TOML file named by `CONFIG_PATH` on top of `preset`, or
    /// uses `preset` as is when the variable is unset.
    pub fn load(preset: Config) -> Result<Self> {
        match env::var("CONFIG_PATH") {
            Ok(path) => preset.overlay_file(path),
            Err(_) => {
                preset.validate()?;
                Ok(preset)
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::default().overlay_file(path)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        Self::default().overlay_toml(config_str)
    }

    pub fn overlay_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        self.overlay_toml(&config_str)
    }

    /// Keys present in `config_str` replace the current values; everything
    /// else, including keys of a partially given `[lidar]`/`[radar]` table,
    /// is kept.
    pub fn overlay_toml(self, config_str: &str) -> Result<Self> {
        let overrides: toml::Table = config_str.parse()?;
        let toml::Value::Table(mut table) = toml::Value::try_from(&self)? else {
            return Err(BrakeError::InvalidConfig(
                "configuration does not encode as a table".to_string(),
            ));
        };
        merge(&mut table, overrides);

        let config: Config = toml::Value::Table(table).try_into()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(BrakeError::InvalidConfig(msg));

        if !(0.0..=1.0).contains(&self.cruise_throttle) {
            return invalid(format!(
                "cruise_throttle must be in [0, 1], got {}",
                self.cruise_throttle
            ));
        }
        if self.stable_detection_count == 0 {
            return invalid("stable_detection_count must be at least 1".to_string());
        }
        for (name, value) in [
            ("brake_threshold_m", self.brake_threshold_m),
            ("ttc_threshold_s", self.ttc_threshold_s),
            ("sensor_range_m", self.sensor_range_m),
            ("forward_azimuth_limit_deg", self.forward_azimuth_limit_deg),
        ] {
            if !(value > 0.0) {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        if !(self.min_closing_speed_mps >= 0.0) {
            return invalid(format!(
                "min_closing_speed_mps must not be negative, got {}",
                self.min_closing_speed_mps
            ));
        }
        if !self.ground_z.is_finite() {
            return invalid(format!("ground_z must be finite, got {}", self.ground_z));
        }
        if !(self.timeout_s > 0.0) || Duration::try_from_secs_f64(self.timeout_s).is_err() {
            return invalid(format!(
                "timeout_s must be a positive, finite number of seconds, got {}",
                self.timeout_s
            ));
        }
        if self.tick_period_ms == 0 {
            return invalid("tick_period_ms must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn timeout(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.timeout_s).map_err(|e| {
            BrakeError::InvalidConfig(format!("timeout_s = {}: {e}", self.timeout_s))
        })
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

fn merge(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match value {
            toml::Value::Table(inner) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge(existing, inner),
                _ => {
                    base.insert(key, toml::Value::Table(inner));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}
