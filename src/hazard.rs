// ================================
// src/hazard.rs - shared hazard state and sensor subscriptions
// ================================
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::{
    error::{BrakeError, Result},
    sim::{ActorId, SensorPayload, World},
};

/// Frames buffered between the simulator callback and the reducer task.
const FEED_CAPACITY: usize = 10;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of reducing one sensor frame.
pub trait Hazard: Clone + Send + 'static {
    /// Name and unit of the scalar, for log lines.
    const LABEL: &'static str;
    const UNIT: &'static str;

    /// The "nothing ahead" value held before the first frame arrives.
    fn none() -> Self;

    /// Scalar compared against the braking threshold (meters or seconds).
    fn scalar(&self) -> f32;
}

/// Turns a raw sensor payload into a hazard.
pub trait HazardReducer: Send + Sync + 'static {
    type Output: Hazard;

    fn reduce_payload(&self, payload: &SensorPayload, ego_speed_mps: f32) -> Result<Self::Output>;
}

/// Last-known-value cell. Readers never wait for a new frame; they see
/// whatever the writer published last.
#[derive(Debug)]
pub struct HazardCell<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for HazardCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> HazardCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn publish(&self, value: T) {
        *lock(&self.inner) = value;
    }

    pub fn latest(&self) -> T {
        lock(&self.inner).clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.inner))
    }
}

impl<T: Hazard> Default for HazardCell<T> {
    fn default() -> Self {
        Self::new(T::none())
    }
}

/// Subscription to one sensor. Frames are reduced on a tokio task and the
/// result lands in a `HazardCell`; dropping the feed stops the task.
pub struct SensorFeed<R: HazardReducer> {
    hazard: HazardCell<R::Output>,
    ego_speed: HazardCell<f32>,
    fault: Arc<Mutex<Option<BrakeError>>>,
    frames: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl<R: HazardReducer> SensorFeed<R> {
    /// Registers a handler on `sensor`. Must be called inside a tokio runtime.
    pub fn subscribe<W: World + ?Sized>(world: &W, sensor: ActorId, reducer: R) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<SensorPayload>(FEED_CAPACITY);

        world.listen(
            sensor,
            Box::new(move |payload: SensorPayload| {
                // Non-blocking send to the reducer task
                match tx.try_send(payload) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(sensor, "sensor feed full, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(sensor, "sensor feed closed");
                    }
                }
            }),
        )?;

        let hazard = HazardCell::<R::Output>::default();
        let ego_speed = HazardCell::new(0.0f32);
        let fault = Arc::new(Mutex::new(None));
        let frames = Arc::new(AtomicU64::new(0));

        let task = {
            let hazard = hazard.clone();
            let ego_speed = ego_speed.clone();
            let fault = fault.clone();
            let frames = frames.clone();

            tokio::spawn(async move {
                while let Some(payload) = rx.recv().await {
                    // Skip old frames and reduce only the latest
                    let mut latest = payload;
                    while let Ok(newer) = rx.try_recv() {
                        latest = newer;
                    }

                    match reducer.reduce_payload(&latest, ego_speed.latest()) {
                        Ok(result) => {
                            hazard.publish(result);
                            frames.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            error!(sensor, error = %e, "cannot reduce sensor frame");
                            lock(&fault).get_or_insert(e);
                        }
                    }
                }
            })
        };

        Ok(Self {
            hazard,
            ego_speed,
            fault,
            frames,
            task,
        })
    }

    /// Most recent hazard, possibly from an earlier tick.
    pub fn latest(&self) -> R::Output {
        self.hazard.latest()
    }

    /// Ego speed handed to the reducer with the next frame.
    pub fn set_ego_speed(&self, speed_mps: f32) {
        self.ego_speed.publish(speed_mps);
    }

    /// Surfaces the first reduction failure since the last check.
    pub fn check(&self) -> Result<()> {
        match lock(&self.fault).take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn frames_reduced(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl<R: HazardReducer> Drop for SensorFeed<R> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
