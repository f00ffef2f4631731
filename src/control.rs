// ================================
// src/control.rs - 제동 판단과 차량 제어 명령
// ================================
use crate::Config;

/// Actuation command handed to the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleControl {
    pub throttle: f32,
    pub brake: f32,
    pub steer: f32,
}

impl VehicleControl {
    pub fn advance(throttle: f32) -> Self {
        Self {
            throttle,
            brake: 0.0,
            steer: 0.0,
        }
    }

    pub fn full_brake() -> Self {
        Self {
            throttle: 0.0,
            brake: 1.0,
            steer: 0.0,
        }
    }

    /// Clamps every channel into the range the actuation interface accepts.
    /// NaN collapses to zero.
    pub fn clamped(self) -> Self {
        let clamp = |v: f32, lo: f32, hi: f32| if v.is_nan() { 0.0 } else { v.clamp(lo, hi) };
        Self {
            throttle: clamp(self.throttle, 0.0, 1.0),
            brake: clamp(self.brake, 0.0, 1.0),
            steer: clamp(self.steer, -1.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Advance,
    Brake,
}

impl Decision {
    pub fn control(self, cruise_throttle: f32) -> VehicleControl {
        match self {
            Decision::Advance => VehicleControl::advance(cruise_throttle),
            Decision::Brake => VehicleControl::full_brake(),
        }
    }
}

/// Debounced braking: engaging requires `stable_count` consecutive hazard
/// readings under the threshold, releasing happens on the first reading that
/// is not.
#[derive(Debug, Clone)]
pub struct BrakingPolicy {
    threshold: f32,
    stable_count: u32,
    counter: u32,
}

impl BrakingPolicy {
    pub fn new(threshold: f32, stable_count: u32) -> Self {
        Self {
            threshold,
            stable_count: stable_count.max(1),
            counter: 0,
        }
    }

    /// Policy on LIDAR distance (meters).
    pub fn for_distance(config: &Config) -> Self {
        Self::new(config.brake_threshold_m, config.stable_detection_count)
    }

    /// Policy on radar time-to-collision (seconds).
    pub fn for_ttc(config: &Config) -> Self {
        Self::new(config.ttc_threshold_s, config.stable_detection_count)
    }

    /// Feeds one tick's hazard scalar. `+inf` and NaN never qualify.
    pub fn update(&mut self, hazard: f32) -> Decision {
        if hazard < self.threshold {
            self.counter = self.counter.saturating_add(1);
        } else {
            self.counter = 0;
        }

        if self.counter >= self.stable_count {
            Decision::Brake
        } else {
            Decision::Advance
        }
    }

    /// Consecutive qualifying ticks seen so far.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}
