// ================================
// src/node.rs - 제어 루프 (tick → hazard → 판단 → 제어)
// ================================
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    control::{BrakingPolicy, Decision},
    error::Result,
    hazard::{Hazard, HazardReducer, SensorFeed},
    sim::{ActorId, World},
};

/// What happened during one control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub frame: u64,
    pub hazard: f32,
    pub decision: Decision,
    pub counter: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunSummary {
    pub ticks: u64,
    pub brake_ticks: u64,
    pub first_brake_frame: Option<u64>,
    pub last_hazard: Option<f32>,
}

impl RunSummary {
    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.last_hazard = Some(report.hazard);
        if report.decision == Decision::Brake {
            self.brake_ticks += 1;
            self.first_brake_frame.get_or_insert(report.frame);
        }
    }
}

/// Drives the ego vehicle from one sensor feed.
pub struct EmergencyBrakeNode<'w, W: World + ?Sized, R: HazardReducer> {
    world: &'w W,
    ego: ActorId,
    feed: SensorFeed<R>,
    policy: BrakingPolicy,
    cruise_throttle: f32,
    tick_period: Duration,
}

impl<'w, W: World + ?Sized, R: HazardReducer> EmergencyBrakeNode<'w, W, R> {
    pub fn new(
        world: &'w W,
        ego: ActorId,
        feed: SensorFeed<R>,
        policy: BrakingPolicy,
        config: &Config,
    ) -> Self {
        Self {
            world,
            ego,
            feed,
            policy,
            cruise_throttle: config.cruise_throttle,
            tick_period: config.tick_period(),
        }
    }

    pub fn policy(&self) -> &BrakingPolicy {
        &self.policy
    }

    /// Advances the world one step and acts on the latest hazard. The hazard
    /// may come from an earlier frame if the sensor has not caught up.
    pub fn step(&mut self) -> Result<TickReport> {
        let frame = self.world.tick()?;
        self.feed.check()?;
        self.feed.set_ego_speed(self.world.speed(self.ego)?);

        let hazard = self.feed.latest().scalar();
        let decision = self.policy.update(hazard);
        self.world
            .apply_control(self.ego, decision.control(self.cruise_throttle))?;

        let report = TickReport {
            frame,
            hazard,
            decision,
            counter: self.policy.counter(),
        };
        Self::print_status(&report, self.policy.stable_count());
        Ok(report)
    }

    /// Runs until `shutdown` is set, `max_ticks` is reached, or a tick fails.
    pub async fn run(&mut self, shutdown: &AtomicBool, max_ticks: Option<u64>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        info!(
            threshold = self.policy.threshold(),
            unit = R::Output::UNIT,
            stable_count = self.policy.stable_count(),
            cruise_throttle = self.cruise_throttle,
            "control loop started, press Ctrl+C to stop"
        );

        while !shutdown.load(Ordering::SeqCst) {
            if max_ticks.is_some_and(|max| summary.ticks >= max) {
                break;
            }

            let report = self.step()?;
            summary.record(&report);

            tokio::time::sleep(self.tick_period).await;
        }

        info!(
            ticks = summary.ticks,
            brake_ticks = summary.brake_ticks,
            "control loop stopped"
        );
        Ok(summary)
    }

    fn print_status(report: &TickReport, stable_count: u32) {
        let label = R::Output::LABEL;
        let unit = R::Output::UNIT;

        match report.decision {
            Decision::Brake => warn!(
                frame = report.frame,
                "obstacle detected, {label} {:.2}{unit}: EMERGENCY BRAKE",
                report.hazard
            ),
            Decision::Advance if report.counter > 0 => info!(
                frame = report.frame,
                "possible detection ({}/{}), {label} {:.2}{unit}",
                report.counter,
                stable_count,
                report.hazard
            ),
            Decision::Advance => debug!(
                frame = report.frame,
                "no obstacle, {label} {:.2}{unit}, advancing",
                report.hazard
            ),
        }
    }
}
