// ================================
// src/lib.rs
// ================================
pub mod config;
pub mod control; // 제동 판단
pub mod error;
pub mod exercise;
pub mod hazard;
pub mod lidar; // 포인트 클라우드 → 최소 거리
pub mod node;
pub mod radar; // 레이더 → 최소 TTC
pub mod sim;

pub use config::Config;
pub use error::{BrakeError, Result};
pub use exercise::SensorKind;
pub use node::EmergencyBrakeNode;
