use anyhow::Result;
use emergency_brake::{exercise, sim::KinematicSimulator, Config, SensorKind};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Radar time-to-collision braking exercise");

    let config = Config::load(Config::radar_preset())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    // connection failure aborts startup
    let world = exercise::connect(&KinematicSimulator::new(), &config)?;

    match exercise::run(&world, &config, SensorKind::Radar, &shutdown, None).await {
        Ok(summary) => {
            if shutdown.load(Ordering::SeqCst) {
                info!("interrupted by user");
            }
            info!(
                ticks = summary.ticks,
                brake_ticks = summary.brake_ticks,
                "script finished"
            );
        }
        Err(e) => error!(error = %e, "script finished with error"),
    }

    Ok(())
}
