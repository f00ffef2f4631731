use rand::{seq::SliceRandom, Rng};
use tracing::{info, warn};

use super::{ActorId, Blueprint, Transform, World};
use crate::error::Result;

/// Tracks every actor an exercise spawns and destroys them all when
/// released or dropped, whichever comes first.
pub struct ActorRegistry<'w, W: World + ?Sized> {
    world: &'w W,
    actors: Vec<ActorId>,
}

impl<'w, W: World + ?Sized> ActorRegistry<'w, W> {
    pub fn new(world: &'w W) -> Self {
        Self {
            world,
            actors: Vec::new(),
        }
    }

    pub fn track(&mut self, actor: ActorId) -> ActorId {
        self.actors.push(actor);
        actor
    }

    pub fn actors(&self) -> &[ActorId] {
        &self.actors
    }

    /// Destroys tracked actors, sensors first. Failures are logged and the
    /// remaining actors are still released. Returns how many were destroyed.
    pub fn release_all(&mut self) -> usize {
        let mut destroyed = 0;

        for actor in self.actors.drain(..).rev() {
            if !self.world.is_alive(actor) {
                continue;
            }
            let type_id = self.world.type_id(actor).unwrap_or_default();
            info!(actor, %type_id, "destroying actor");

            match self.world.destroy(actor) {
                Ok(()) => destroyed += 1,
                Err(e) => warn!(actor, %type_id, error = %e, "failed to destroy actor"),
            }
        }

        destroyed
    }
}

impl<W: World + ?Sized> Drop for ActorRegistry<'_, W> {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Spawns `model` at a random free spawn point. Returns `None` (after
/// logging why) when the model is unknown or every spawn point is taken.
pub fn spawn_vehicle<W, R>(world: &W, model: &str, rng: &mut R) -> Option<ActorId>
where
    W: World + ?Sized,
    R: Rng + ?Sized,
{
    let Some(blueprint) = world.blueprint_library().filter(model).into_iter().next() else {
        warn!(model, "no vehicle blueprint matches");
        return None;
    };

    let mut spawn_points = world.spawn_points();
    if spawn_points.is_empty() {
        warn!(model, "map has no spawn points");
        return None;
    }
    spawn_points.shuffle(rng);

    for spawn_point in spawn_points {
        if let Ok(vehicle) = world.try_spawn_actor(&blueprint, spawn_point, None) {
            info!(model, actor = vehicle, "vehicle spawned");
            return Some(vehicle);
        }
    }

    warn!(model, "cannot spawn vehicle: no free spawn point");
    None
}

/// Spawns a sensor with the given blueprint attributes, attached to `parent`.
pub fn spawn_sensor<W: World + ?Sized>(
    world: &W,
    blueprint_id: &str,
    attributes: &[(&str, String)],
    mount: Transform,
    parent: ActorId,
) -> Result<ActorId> {
    let mut blueprint: Blueprint = world.blueprint_library().find(blueprint_id)?;
    for (key, value) in attributes {
        blueprint.set_attribute(key, value);
    }

    let sensor = world.try_spawn_actor(&blueprint, mount, Some(parent))?;
    info!(
        blueprint = blueprint_id,
        actor = sensor,
        parent,
        mount = ?mount.location,
        "sensor spawned"
    );
    Ok(sensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::kinematic::KinematicWorld;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn vehicles_take_distinct_spawn_points() {
        let world = KinematicWorld::with_spawn_points(vec![Transform::at(0.0, 0.0, 0.0), Transform::at(50.0, 0.0, 0.0)]);
        let mut rng = StdRng::seed_from_u64(7);

        let a = spawn_vehicle(&world, "vehicle.audi.tt", &mut rng).unwrap();
        let b = spawn_vehicle(&world, "vehicle.volkswagen.t2", &mut rng).unwrap();
        assert_ne!(
            world.transform(a).unwrap().location,
            world.transform(b).unwrap().location
        );

        // both points are now occupied
        assert!(spawn_vehicle(&world, "vehicle.audi.tt", &mut rng).is_none());
    }

    #[test]
    fn unknown_model_spawns_nothing() {
        let world = KinematicWorld::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(spawn_vehicle(&world, "vehicle.does.not.exist", &mut rng).is_none());
    }

    #[test]
    fn sensor_gets_attributes() {
        let world = KinematicWorld::default();
        let mut rng = StdRng::seed_from_u64(3);
        let ego = spawn_vehicle(&world, "vehicle.audi.tt", &mut rng).unwrap();

        let radar = spawn_sensor(
            &world,
            "sensor.other.radar",
            &[("range", "50".to_string())],
            Transform::at(2.5, 0.0, 1.0),
            ego,
        )
        .unwrap();
        assert_eq!(world.type_id(radar).as_deref(), Some("sensor.other.radar"));
        assert!(spawn_sensor(&world, "sensor.camera.depth", &[], Transform::default(), ego).is_err());
    }

    #[test]
    fn registry_releases_on_drop() {
        let world = KinematicWorld::default();
        let mut rng = StdRng::seed_from_u64(5);
        let ego;
        {
            let mut registry = ActorRegistry::new(&world);
            ego = registry.track(spawn_vehicle(&world, "vehicle.audi.tt", &mut rng).unwrap());
            assert!(world.is_alive(ego));
        }
        assert!(!world.is_alive(ego));
    }

    #[test]
    fn release_skips_dead_actors() {
        let world = KinematicWorld::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut registry = ActorRegistry::new(&world);
        let a = registry.track(spawn_vehicle(&world, "vehicle.audi.tt", &mut rng).unwrap());
        registry.track(spawn_vehicle(&world, "vehicle.volkswagen.t2", &mut rng).unwrap());

        world.destroy(a).unwrap();
        assert_eq!(registry.release_all(), 1);
        assert!(registry.actors().is_empty());
        assert_eq!(registry.release_all(), 0);
    }
}
